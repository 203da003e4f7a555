//! Server error types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use keeper_core::{ProtocolError, StoreError, ValidationError};

/// HTTP-facing errors for the auth endpoints, mapped to status codes.
#[derive(Debug)]
pub enum ServerError {
    Database(String),
    Auth(String),
    Conflict(String),
    BadRequest(String),
    Internal(String),
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Database(e) => write!(f, "Database error: {}", e),
            Self::Auth(e) => write!(f, "Auth error: {}", e),
            Self::Conflict(e) => write!(f, "Conflict: {}", e),
            Self::BadRequest(e) => write!(f, "Bad request: {}", e),
            Self::Internal(e) => write!(f, "Internal error: {}", e),
        }
    }
}

impl std::error::Error for ServerError {}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::Database(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
            Self::Auth(e) => (StatusCode::UNAUTHORIZED, e.clone()),
            Self::Conflict(e) => (StatusCode::CONFLICT, e.clone()),
            Self::BadRequest(e) => (StatusCode::BAD_REQUEST, e.clone()),
            Self::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

impl From<StoreError> for ServerError {
    fn from(e: StoreError) -> Self {
        Self::Database(e.to_string())
    }
}

/// Why a sync message was dropped by the keeper service.
#[derive(Debug)]
pub enum KeeperError {
    /// The envelope or its payload could not be decoded.
    Decode(ProtocolError),
    /// The record decoded but failed semantic checks.
    Validation(ValidationError),
    /// The secret store failed.
    Persistence(StoreError),
}

impl std::fmt::Display for KeeperError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Decode(e) => write!(f, "Decode error: {}", e),
            Self::Validation(e) => write!(f, "Validation error: {}", e),
            Self::Persistence(e) => write!(f, "Persistence error: {}", e),
        }
    }
}

impl std::error::Error for KeeperError {}

impl From<ProtocolError> for KeeperError {
    fn from(e: ProtocolError) -> Self {
        Self::Decode(e)
    }
}

impl From<ValidationError> for KeeperError {
    fn from(e: ValidationError) -> Self {
        Self::Validation(e)
    }
}

impl From<StoreError> for KeeperError {
    fn from(e: StoreError) -> Self {
        Self::Persistence(e)
    }
}

/// A write to one peer connection failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    /// The connection's writer has gone away.
    Closed,
    /// The peer did not drain its queue within the write timeout.
    TimedOut,
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "connection closed"),
            Self::TimedOut => write!(f, "write timed out"),
        }
    }
}

impl std::error::Error for TransportError {}

