//! Error types for userhive

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Client Input Errors ===
    #[error("User ID is invalid (not uuid)")]
    InvalidUserId,

    #[error("Invalid request body")]
    InvalidBody,

    #[error("Missing required fields")]
    MissingFields,

    #[error("Invalid field types: {}", .0.join("; "))]
    InvalidFields(Vec<String>),

    #[error("Request body too large")]
    BodyTooLarge,

    // === Lookup Errors ===
    #[error("User not found")]
    UserNotFound,

    #[error("Endpoint not found")]
    EndpointNotFound,

    // === Balancer Errors ===
    #[error("Service Unavailable")]
    NoWorkers,

    #[error("Bad Gateway: {0}")]
    Proxy(String),

    // === Channel Errors ===
    #[error("Operation channel closed")]
    ChannelClosed,

    #[error("Operation rejected by coordinator: {0}")]
    Rejected(String),

    #[error("Operation timeout: {0}")]
    Timeout(String),

    // === Invariant Violations ===
    #[error("Process role violation: {0}")]
    RoleViolation(String),

    // === Config Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Convert to HTTP status code
    pub fn to_http_status(&self) -> StatusCode {
        match self {
            Error::InvalidUserId
            | Error::InvalidBody
            | Error::MissingFields
            | Error::InvalidFields(_) => StatusCode::BAD_REQUEST,
            Error::BodyTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Error::UserNotFound | Error::EndpointNotFound => StatusCode::NOT_FOUND,
            Error::NoWorkers => StatusCode::SERVICE_UNAVAILABLE,
            Error::Proxy(_) => StatusCode::BAD_GATEWAY,
            Error::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message shown to HTTP clients. Transport and internal failures are
    /// collapsed to a generic text; the detail only goes to the log.
    pub fn public_message(&self) -> String {
        match self {
            Error::NoWorkers => self.to_string(),
            Error::Proxy(_) => "Bad Gateway".to_string(),
            Error::Timeout(_) => "Request timed out".to_string(),
            e if e.to_http_status().is_server_error() => "Internal server error".to_string(),
            e => e.to_string(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.to_http_status();
        if status.is_server_error() {
            tracing::error!(error = %self, status = status.as_u16(), "Request failed");
        }
        (status, axum::Json(json!({ "error": self.public_message() }))).into_response()
    }
}

impl From<::config::ConfigError> for Error {
    fn from(e: ::config::ConfigError) -> Self {
        Error::InvalidConfig(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_errors_keep_their_message() {
        assert_eq!(Error::UserNotFound.public_message(), "User not found");
        assert_eq!(
            Error::InvalidFields(vec!["age must be a number".into()]).public_message(),
            "Invalid field types: age must be a number"
        );
    }

    #[test]
    fn test_server_errors_are_generic() {
        assert_eq!(Error::ChannelClosed.to_http_status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(Error::ChannelClosed.public_message(), "Internal server error");
        assert_eq!(
            Error::Timeout("op 3".into()).to_http_status(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(Error::NoWorkers.to_http_status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(Error::NoWorkers.public_message(), "Service Unavailable");
    }
}
