//! HTTP API served by each worker
//!
//! | Method | Path            | Success                 |
//! |--------|-----------------|-------------------------|
//! | GET    | /api/users      | 200, all users          |
//! | GET    | /api/users/{id} | 200, one user           |
//! | POST   | /api/users      | 201, the created user   |
//! | PUT    | /api/users/{id} | 200, the updated user   |
//! | DELETE | /api/users/{id} | 204, empty body         |
//!
//! Anything else is 404 `{"error":"Endpoint not found"}`. Ids and bodies are
//! validated here, before any operation is sent to the coordinator.

use crate::common::tracing_middleware::request_tracing_middleware;
use crate::common::user::{parse_attributes, parse_user_id, User};
use crate::common::{Error, Result};
use crate::worker::client::StoreClient;
use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, DefaultBodyLimit, Path, State},
    http::StatusCode,
    middleware,
    routing::get,
    Json, Router,
};
use std::sync::Arc;

/// Shared worker state for HTTP handlers.
#[derive(Clone)]
pub struct WorkerState {
    pub client: Arc<StoreClient>,
}

/// Creates the HTTP router with all public endpoints.
pub fn create_router(state: WorkerState, max_body_bytes: usize) -> Router {
    Router::new()
        .route(
            "/api/users",
            get(list_users)
                .post(create_user)
                .fallback(endpoint_not_found),
        )
        .route(
            "/api/users/:id",
            get(get_user)
                .put(update_user)
                .delete(delete_user)
                .fallback(endpoint_not_found),
        )
        .fallback(endpoint_not_found)
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(middleware::from_fn(request_tracing_middleware))
        .with_state(state)
}

async fn list_users(State(state): State<WorkerState>) -> Result<Json<Vec<User>>> {
    Ok(Json(state.client.list().await?))
}

async fn get_user(
    State(state): State<WorkerState>,
    Path(id): Path<String>,
) -> Result<Json<User>> {
    let id = parse_user_id(&id)?;
    state
        .client
        .get_by_id(id)
        .await?
        .map(Json)
        .ok_or(Error::UserNotFound)
}

async fn create_user(
    State(state): State<WorkerState>,
    body: std::result::Result<Bytes, BytesRejection>,
) -> Result<(StatusCode, Json<User>)> {
    let attributes = parse_attributes(&read_body(body)?)?;
    let user = state.client.create(attributes).await?;
    tracing::debug!(id = %user.id, "User created");
    Ok((StatusCode::CREATED, Json(user)))
}

async fn update_user(
    State(state): State<WorkerState>,
    Path(id): Path<String>,
    body: std::result::Result<Bytes, BytesRejection>,
) -> Result<Json<User>> {
    let id = parse_user_id(&id)?;
    let attributes = parse_attributes(&read_body(body)?)?;
    state
        .client
        .update(id, attributes)
        .await?
        .map(Json)
        .ok_or(Error::UserNotFound)
}

async fn delete_user(
    State(state): State<WorkerState>,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    let id = parse_user_id(&id)?;
    if state.client.remove(id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(Error::UserNotFound)
    }
}

/// Body extraction failures answer in the same JSON shape as every other error.
fn read_body(body: std::result::Result<Bytes, BytesRejection>) -> Result<Bytes> {
    body.map_err(|rejection| {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            Error::BodyTooLarge
        } else {
            Error::InvalidBody
        }
    })
}

async fn endpoint_not_found() -> Error {
    Error::EndpointNotFound
}
