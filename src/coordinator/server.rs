//! Primary process
//!
//! Owns the coordinator loop. In multi mode it also supervises the worker
//! processes and runs the load balancer on the public port; in single mode it
//! serves the HTTP API itself against an in-process coordinator.

use crate::balancer::{Balancer, BalancerState, WorkerTable};
use crate::common::{Config, ProcessRole, Result};
use crate::coordinator::service::Coordinator;
use crate::coordinator::supervisor::{Supervisor, WorkerLaunch};
use crate::worker::{StoreClient, WorkerServer};
use std::sync::Arc;

/// Submissions queued ahead of the coordinator loop
const COORDINATOR_BUFFER: usize = 1024;

pub struct Primary {
    config: Config,
}

impl Primary {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub async fn serve(self) -> Result<()> {
        self.config.validate()?;
        let role = ProcessRole::detect();
        let handle = Coordinator::spawn(role, COORDINATOR_BUFFER)?;

        if !self.config.multi {
            tracing::info!("Starting in single-process mode");
            tracing::info!("  HTTP API: {}", self.config.public_addr());
            let client = StoreClient::connect_local(handle, self.config.reply_timeout());
            let server = WorkerServer::new(
                self.config.public_addr(),
                client,
                self.config.max_body_bytes,
            );
            return run_until_shutdown(server.serve()).await;
        }

        let ports = self.config.worker_ports()?;
        tracing::info!("Starting primary {}", std::process::id());
        tracing::info!("  Balancer: {}", self.config.public_addr());
        tracing::info!("  Reply timeout: {:?}", self.config.reply_timeout());

        let supervisor = Arc::new(Supervisor::new(
            WorkerLaunch::from_config(&self.config)?,
            handle,
            self.config.restart_delay(),
        ));
        let workers = supervisor.clone().spawn_all(&ports);

        let table = WorkerTable::from_base_port(self.config.host, self.config.port, ports.len())?;
        tracing::info!("  Workers: {} on ports {:?}", table.len(), ports);
        let state = BalancerState::new(
            table,
            self.config.proxy_timeout(),
            self.config.max_body_bytes,
        )?;
        let balancer = Balancer::new(self.config.public_addr(), state);

        let result = run_until_shutdown(balancer.serve()).await;

        tracing::info!(restarts = supervisor.restarts(), "Stopping workers");

        for worker in workers {
            worker.abort();
        }
        result
    }
}

/// Drive `server` until it fails or Ctrl-C arrives.
pub async fn run_until_shutdown<F>(server: F) -> Result<()>
where
    F: std::future::Future<Output = Result<()>>,
{
    tokio::select! {
        res = server => {
            if let Err(e) = &res {
                tracing::error!("HTTP server error: {}", e);
            }
            res
        }
        res = tokio::signal::ctrl_c() => {
            res?;
            tracing::info!("Shutdown signal received");
            Ok(())
        }
    }
}
