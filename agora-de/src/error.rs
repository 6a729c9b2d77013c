//! Error types for agora-de
//!
//! Engine operations return `Error` directly; the axum layer maps each
//! variant to an HTTP status via `IntoResponse`. A completed cell being
//! processed again is not an error (callers receive a no-op outcome).

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Deliberation engine error type
#[derive(Debug, Error)]
pub enum Error {
    /// Operation not legal in the deliberation's current phase (409)
    #[error("Invalid phase: {0}")]
    InvalidPhase(String),

    /// Fewer than two submitted ideas at voting start (409)
    #[error("Insufficient ideas: {0}")]
    InsufficientIdeas(String),

    /// Fewer than three members at voting start (409)
    #[error("Insufficient members: {0}")]
    InsufficientMembers(String),

    /// Vote or placement violates cell membership, seating, or budget (400)
    #[error("Invalid allocation: {0}")]
    InvalidAllocation(String),

    /// Seat cannot be taken or released (409)
    #[error("Seat unavailable: {0}")]
    SeatUnavailable(String),

    /// Revision proposal or vote conflicts with an existing one (409)
    #[error("Revision conflict: {0}")]
    RevisionConflict(String),

    /// Resource not found (404)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid request payload (400)
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Database error (500)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// IO error (500)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Shared library error (500)
    #[error("Common error: {0}")]
    Common(#[from] agora_common::Error),

    /// Internal engine error (500)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            Error::InvalidPhase(msg) => (StatusCode::CONFLICT, "INVALID_PHASE", msg),
            Error::InsufficientIdeas(msg) => (StatusCode::CONFLICT, "INSUFFICIENT_IDEAS", msg),
            Error::InsufficientMembers(msg) => (StatusCode::CONFLICT, "INSUFFICIENT_MEMBERS", msg),
            Error::InvalidAllocation(msg) => (StatusCode::BAD_REQUEST, "INVALID_ALLOCATION", msg),
            Error::SeatUnavailable(msg) => (StatusCode::CONFLICT, "SEAT_UNAVAILABLE", msg),
            Error::RevisionConflict(msg) => (StatusCode::CONFLICT, "REVISION_CONFLICT", msg),
            Error::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            Error::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            Error::Database(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "DATABASE_ERROR",
                err.to_string(),
            ),
            Error::Io(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "IO_ERROR",
                err.to_string(),
            ),
            Error::Common(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "COMMON_ERROR",
                err.to_string(),
            ),
            Error::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for engine operations and API handlers
pub type Result<T> = std::result::Result<T, Error>;
