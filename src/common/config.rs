//! Configuration for userhive processes
//!
//! Values are layered: serde defaults, then an optional TOML file, then
//! `USERHIVE_*` environment variables. The CLI overrides on top of that.

use crate::common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;

/// Config file looked up in the working directory when none is given.
pub const DEFAULT_CONFIG_FILE: &str = "userhive.toml";

/// Prefix for environment overrides (`USERHIVE_PORT=5000`).
pub const ENV_PREFIX: &str = "USERHIVE";

/// Global configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Interface every listener binds to
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Public port; worker ports are derived as `port + 1 ..= port + workers`
    #[serde(default = "default_port")]
    pub port: u16,

    /// Worker count; `None` means available parallelism minus one
    #[serde(default)]
    pub workers: Option<usize>,

    /// Primary/worker split when true, a single process otherwise
    #[serde(default = "default_multi")]
    pub multi: bool,

    /// Bounded wait for a coordinator reply
    #[serde(default = "default_reply_timeout")]
    pub reply_timeout_ms: u64,

    /// Bounded wait for a proxied worker response
    #[serde(default = "default_proxy_timeout")]
    pub proxy_timeout_ms: u64,

    /// Pause before a dead worker is respawned
    #[serde(default = "default_restart_delay")]
    pub restart_delay_ms: u64,

    /// Largest accepted request body
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_host() -> IpAddr {
    IpAddr::from([127, 0, 0, 1])
}
fn default_port() -> u16 {
    4000
}
fn default_multi() -> bool {
    true
}
fn default_reply_timeout() -> u64 {
    5_000
}
fn default_proxy_timeout() -> u64 {
    10_000
}
fn default_restart_delay() -> u64 {
    500
}
fn default_max_body_bytes() -> usize {
    1024 * 1024
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            workers: None,
            multi: default_multi(),
            reply_timeout_ms: default_reply_timeout(),
            proxy_timeout_ms: default_proxy_timeout(),
            restart_delay_ms: default_restart_delay(),
            max_body_bytes: default_max_body_bytes(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load from `path` (required) or from `userhive.toml` if present, then
    /// apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(p) => ::config::File::from(p).required(true),
            None => ::config::File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let config: Config = ::config::Config::builder()
            .add_source(file)
            .add_source(::config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Number of worker processes to run.
    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get().saturating_sub(1))
                .unwrap_or(1)
                .max(1)
        })
    }

    /// Public address (balancer in multi mode, the only server otherwise)
    pub fn public_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Ports of the worker endpoints, in rotation order
    pub fn worker_ports(&self) -> Result<Vec<u16>> {
        derive_worker_ports(self.port, self.worker_count())
    }

    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_timeout_ms)
    }

    pub fn proxy_timeout(&self) -> Duration {
        Duration::from_millis(self.proxy_timeout_ms)
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.reply_timeout_ms == 0 {
            return Err(Error::InvalidConfig("reply_timeout_ms must be > 0".into()));
        }
        if self.proxy_timeout_ms == 0 {
            return Err(Error::InvalidConfig("proxy_timeout_ms must be > 0".into()));
        }
        if self.max_body_bytes == 0 {
            return Err(Error::InvalidConfig("max_body_bytes must be > 0".into()));
        }
        if self.multi {
            self.worker_ports()?;
        }
        Ok(())
    }
}

/// Worker `i` (0-based) listens on `base + i + 1`.
pub fn derive_worker_ports(base: u16, count: usize) -> Result<Vec<u16>> {
    (1..=count)
        .map(|offset| {
            u16::try_from(offset)
                .ok()
                .and_then(|o| base.checked_add(o))
                .ok_or_else(|| {
                    Error::InvalidConfig(format!(
                        "{} workers above port {} exceed the port range",
                        count, base
                    ))
                })
        })
        .collect()
}
