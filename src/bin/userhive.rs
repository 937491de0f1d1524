//! userhive binary

use clap::{Args, Parser, Subcommand};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use userhive::balancer::{Balancer, BalancerState, WorkerTable};
use userhive::common::{Config, ProcessRole};
use userhive::coordinator::server::run_until_shutdown;
use userhive::worker::{StoreClient, WorkerServer};
use userhive::Primary;

#[derive(Parser)]
#[command(name = "userhive")]
#[command(version = userhive::VERSION)]
#[command(about = "Multi-process user records API")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the primary (coordinator, workers and load balancer)
    Serve {
        #[command(flatten)]
        common: CommonArgs,

        /// Number of worker processes
        #[arg(long)]
        workers: Option<usize>,

        /// Serve everything from this process, without workers
        #[arg(long)]
        single: bool,

        /// How long a worker waits for the coordinator (ms)
        #[arg(long)]
        reply_timeout_ms: Option<u64>,

        /// Delay before a dead worker is respawned (ms)
        #[arg(long)]
        restart_delay_ms: Option<u64>,

        /// Maximum accepted request body (bytes)
        #[arg(long)]
        max_body_bytes: Option<usize>,
    },

    /// Run as a worker (spawned by `serve`)
    Worker {
        /// Bind host
        #[arg(long, default_value = "127.0.0.1")]
        host: IpAddr,

        /// Bind port
        #[arg(long)]
        port: u16,

        /// How long to wait for the coordinator (ms)
        #[arg(long, default_value = "5000")]
        reply_timeout_ms: u64,

        /// Maximum accepted request body (bytes)
        #[arg(long, default_value = "1048576")]
        max_body_bytes: usize,

        /// Log level when RUST_LOG is unset
        #[arg(long, default_value = "info")]
        log_level: String,
    },

    /// Run only the load balancer in front of workers on port+1..=port+N
    Balance {
        #[command(flatten)]
        common: CommonArgs,

        /// Number of worker endpoints
        #[arg(long)]
        workers: Option<usize>,
    },
}

#[derive(Args)]
struct CommonArgs {
    /// Config file (default: ./userhive.toml if present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Bind host
    #[arg(long)]
    host: Option<IpAddr>,

    /// Public port
    #[arg(long)]
    port: Option<u16>,

    /// Upstream timeout for proxied requests (ms)
    #[arg(long)]
    proxy_timeout_ms: Option<u64>,

    /// Log level when RUST_LOG is unset
    #[arg(long)]
    log_level: Option<String>,
}

impl CommonArgs {
    /// Load the config file and environment, then apply CLI overrides.
    fn load(&self) -> userhive::Result<Config> {
        let mut config = Config::load(self.config.as_deref())?;
        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(ms) = self.proxy_timeout_ms {
            config.proxy_timeout_ms = ms;
        }
        if let Some(level) = &self.log_level {
            config.log_level = level.clone();
        }
        Ok(config)
    }
}

fn init_tracing(level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        // stdout is the worker channel
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            common,
            workers,
            single,
            reply_timeout_ms,
            restart_delay_ms,
            max_body_bytes,
        } => {
            let mut config = common.load()?;
            if workers.is_some() {
                config.workers = workers;
            }
            if single {
                config.multi = false;
            }
            if let Some(ms) = reply_timeout_ms {
                config.reply_timeout_ms = ms;
            }
            if let Some(ms) = restart_delay_ms {
                config.restart_delay_ms = ms;
            }
            if let Some(bytes) = max_body_bytes {
                config.max_body_bytes = bytes;
            }
            config.validate()?;

            init_tracing(&config.log_level);
            tracing::info!("userhive {}", userhive::VERSION);
            Primary::new(config).serve().await?;
        }

        Commands::Worker {
            host,
            port,
            reply_timeout_ms,
            max_body_bytes,
            log_level,
        } => {
            init_tracing(&log_level);
            let role = ProcessRole::detect();
            let client = StoreClient::connect_stdio(role, Duration::from_millis(reply_timeout_ms))?;
            tracing::info!("Starting {} on port {}", role, port);

            let server = WorkerServer::new(SocketAddr::new(host, port), client, max_body_bytes);
            server.serve().await?;
        }

        Commands::Balance { common, workers } => {
            let mut config = common.load()?;
            if workers.is_some() {
                config.workers = workers;
            }
            config.validate()?;

            init_tracing(&config.log_level);
            let table = WorkerTable::from_base_port(config.host, config.port, config.worker_count())?;
            let state = BalancerState::new(table, config.proxy_timeout(), config.max_body_bytes)?;
            let balancer = Balancer::new(config.public_addr(), state);
            run_until_shutdown(balancer.serve()).await?;
        }
    }

    Ok(())
}
