//! Health check endpoint

use axum::Json;
use serde::Serialize;

/// Health check response with module identification
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub module: String,
    pub version: String,
}

/// GET /health
///
/// Health check endpoint for monitoring. Does not touch the database.
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        module: "agora-de".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
