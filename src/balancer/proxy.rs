//! HTTP front door
//!
//! Every inbound request is relayed to one worker picked from the
//! [`WorkerTable`]. There is no retry: if the chosen worker is down the client
//! gets 502, and the next request simply goes to the next worker.

use crate::balancer::table::WorkerTable;
use crate::common::tracing_middleware::request_tracing_middleware;
use crate::common::{Error, Result};
use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderMap, HeaderName},
    middleware,
    response::{IntoResponse, Response},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

/// Shared balancer state for the proxy handler.
#[derive(Clone)]
pub struct BalancerState {
    pub table: Arc<WorkerTable>,
    pub client: reqwest::Client,
    pub max_body_bytes: usize,
}

impl BalancerState {
    pub fn new(table: WorkerTable, proxy_timeout: Duration, max_body_bytes: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(proxy_timeout)
            .build()
            .map_err(|e| Error::Internal(format!("failed to build proxy client: {}", e)))?;
        Ok(Self {
            table: Arc::new(table),
            client,
            max_body_bytes,
        })
    }
}

/// Every path and method goes through the proxy.
pub fn create_router(state: BalancerState) -> Router {
    Router::new()
        .fallback(proxy)
        .layer(middleware::from_fn(request_tracing_middleware))
        .with_state(state)
}

async fn proxy(State(state): State<BalancerState>, request: Request) -> Response {
    let Some(endpoint) = state.table.select() else {
        tracing::warn!("No worker endpoints configured");
        return Error::NoWorkers.into_response();
    };
    match forward(&state, endpoint, request).await {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!(%endpoint, error = %e, "Proxy attempt failed");
            e.into_response()
        }
    }
}

async fn forward(state: &BalancerState, endpoint: SocketAddr, request: Request) -> Result<Response> {
    let (parts, body) = request.into_parts();
    let path = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let url = format!("http://{}{}", endpoint, path);
    tracing::debug!(method = %parts.method, %url, "Forwarding request");

    let body = axum::body::to_bytes(body, state.max_body_bytes)
        .await
        .map_err(|_| Error::BodyTooLarge)?;

    let mut headers = strip_hop_by_hop(parts.headers);
    headers.remove(header::HOST);
    headers.remove(header::CONTENT_LENGTH);

    let upstream = state
        .client
        .request(parts.method, url)
        .headers(headers)
        .body(body)
        .send()
        .await
        .map_err(|e| upstream_error(endpoint, e))?;

    let status = upstream.status();
    let headers = strip_hop_by_hop(upstream.headers().clone());
    let bytes = upstream
        .bytes()
        .await
        .map_err(|e| upstream_error(endpoint, e))?;

    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    Ok(response)
}

fn upstream_error(endpoint: SocketAddr, e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(format!("worker {} did not answer: {}", endpoint, e))
    } else {
        Error::Proxy(format!("worker {}: {}", endpoint, e))
    }
}

/// Drop the headers that describe one hop and must not be forwarded.
fn strip_hop_by_hop(mut headers: HeaderMap) -> HeaderMap {
    let hop_by_hop: [HeaderName; 7] = [
        header::CONNECTION,
        header::PROXY_AUTHENTICATE,
        header::PROXY_AUTHORIZATION,
        header::TE,
        header::TRAILER,
        header::TRANSFER_ENCODING,
        header::UPGRADE,
    ];
    for name in &hop_by_hop {
        headers.remove(name);
    }
    headers.remove("keep-alive");
    headers
}

pub struct Balancer {
    bind_addr: SocketAddr,
    state: BalancerState,
}

impl Balancer {
    pub fn new(bind_addr: SocketAddr, state: BalancerState) -> Self {
        Self { bind_addr, state }
    }

    pub async fn serve(self) -> Result<()> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        self.serve_on(listener).await
    }

    /// Serve on an already bound listener.
    pub async fn serve_on(self, listener: TcpListener) -> Result<()> {
        tracing::info!("Load balancer listening on {}", listener.local_addr()?);
        if self.state.table.is_empty() {
            tracing::warn!("  No worker endpoints; every request will get 503");
        } else {
            tracing::info!("  Worker endpoints: {:?}", self.state.table.endpoints());
        }
        axum::serve(listener, create_router(self.state)).await?;
        Ok(())
    }
}
