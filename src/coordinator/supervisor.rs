//! Worker process supervision
//!
//! Each worker slot is a loop: spawn the worker process, bridge its stdio to
//! the coordinator, wait for it to exit, respawn on the same port. The slot
//! table therefore never changes even as processes come and go.

use crate::common::role::WORKER_ID_ENV;
use crate::common::{Config, Result};
use crate::coordinator::service::{serve_worker_io, CoordinatorHandle};
use std::net::IpAddr;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Settings handed to every worker on its command line.
#[derive(Debug, Clone)]
pub struct WorkerLaunch {
    pub program: PathBuf,
    pub host: IpAddr,
    pub reply_timeout_ms: u64,
    pub max_body_bytes: usize,
    pub log_level: String,
}

impl WorkerLaunch {
    /// Re-run the current executable in worker mode.
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            program: std::env::current_exe()?,
            host: config.host,
            reply_timeout_ms: config.reply_timeout_ms,
            max_body_bytes: config.max_body_bytes,
            log_level: config.log_level.clone(),
        })
    }

    pub fn command(&self, id: usize, port: u16) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("worker")
            .arg("--host")
            .arg(self.host.to_string())
            .arg("--port")
            .arg(port.to_string())
            .arg("--reply-timeout-ms")
            .arg(self.reply_timeout_ms.to_string())
            .arg("--max-body-bytes")
            .arg(self.max_body_bytes.to_string())
            .arg("--log-level")
            .arg(&self.log_level)
            .env(WORKER_ID_ENV, id.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        cmd
    }
}

pub struct Supervisor {
    launch: WorkerLaunch,
    handle: CoordinatorHandle,
    restart_delay: Duration,
    /// Respawns across all slots
    restarts: AtomicU64,
}

impl Supervisor {
    pub fn new(launch: WorkerLaunch, handle: CoordinatorHandle, restart_delay: Duration) -> Self {
        Self {
            launch,
            handle,
            restart_delay,
            restarts: AtomicU64::new(0),
        }
    }

    pub fn restarts(&self) -> u64 {
        self.restarts.load(Ordering::Relaxed)
    }

    /// Start one supervised slot per port. Aborting a returned task kills
    /// its worker process.
    pub fn spawn_all(self: Arc<Self>, ports: &[u16]) -> Vec<JoinHandle<()>> {
        ports
            .iter()
            .enumerate()
            .map(|(id, &port)| tokio::spawn(self.clone().supervise(id, port)))
            .collect()
    }

    async fn supervise(self: Arc<Self>, id: usize, port: u16) {
        let mut restarts: u64 = 0;
        loop {
            match self.launch.command(id, port).spawn() {
                Ok(child) => {
                    info!(
                        worker = id,
                        port,
                        pid = child.id().unwrap_or_default(),
                        restarts,
                        "Worker started"
                    );
                    match self.run(id, child).await {
                        Ok(status) => warn!(worker = id, port, %status, "Worker exited"),
                        Err(e) => error!(worker = id, port, error = %e, "Lost track of worker"),
                    }
                }
                Err(e) => error!(worker = id, port, error = %e, "Failed to spawn worker"),
            }
            tokio::time::sleep(self.restart_delay).await;
            restarts += 1;
            self.restarts.fetch_add(1, Ordering::Relaxed);
            info!(worker = id, port, "Restarting worker");
        }
    }

    /// Bridge the worker's pipes to the coordinator until it exits.
    async fn run(&self, id: usize, mut child: Child) -> std::io::Result<ExitStatus> {
        let (Some(stdout), Some(stdin)) = (child.stdout.take(), child.stdin.take()) else {
            child.kill().await?;
            return Err(std::io::Error::other("worker spawned without piped stdio"));
        };

        let bridge = tokio::spawn(serve_worker_io(
            stdout,
            stdin,
            self.handle.clone(),
            format!("worker-{}", id),
        ));
        let status = child.wait().await;
        bridge.abort();
        status
    }
}
