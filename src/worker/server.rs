//! Worker server

use crate::common::{Error, Result};
use crate::worker::client::StoreClient;
use crate::worker::http::{create_router, WorkerState};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

pub struct WorkerServer {
    bind_addr: SocketAddr,
    client: Arc<StoreClient>,
    max_body_bytes: usize,
}

impl WorkerServer {
    pub fn new(bind_addr: SocketAddr, client: StoreClient, max_body_bytes: usize) -> Self {
        Self {
            bind_addr,
            client: Arc::new(client),
            max_body_bytes,
        }
    }

    pub async fn serve(self) -> Result<()> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        self.serve_on(listener).await
    }

    /// Serve on an already bound listener.
    ///
    /// Stops with [`Error::ChannelClosed`] once the coordinator channel is
    /// gone, so a supervised worker exits and gets replaced instead of
    /// answering 500 forever.
    pub async fn serve_on(self, listener: TcpListener) -> Result<()> {
        tracing::info!("Worker {} listening on {}", std::process::id(), listener.local_addr()?);

        let client = self.client.clone();
        let router = create_router(
            WorkerState {
                client: self.client,
            },
            self.max_body_bytes,
        );
        let watched = client.clone();
        axum::serve(listener, router)
            .with_graceful_shutdown(async move { watched.closed().await })
            .await?;

        if client.is_closed() {
            tracing::error!("Coordinator channel closed; worker shutting down");
            return Err(Error::ChannelClosed);
        }
        Ok(())
    }
}
