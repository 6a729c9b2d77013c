//! agora-de library - Deliberation Engine module
//!
//! Runs tiered elimination voting for deliberations: ideas are dealt
//! into small cells, each cell votes a winner forward, and tiers repeat
//! until a single champion remains. Optional accumulation keeps the
//! deliberation alive afterwards, with new ideas challenging the
//! champion in periodic challenge rounds.

use agora_common::events::EventBus;
use axum::{
    routing::{delete, get, post},
    Router,
};
use sqlx::SqlitePool;
use tower_http::cors::CorsLayer;

pub mod api;
pub mod db;
pub mod engine;
pub mod error;
pub mod scheduler;

pub use error::{Error, Result};

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    /// Engine event bus, shared with the scheduler and SSE clients
    pub events: EventBus,
}

impl AppState {
    /// Create new application state
    pub fn new(db: SqlitePool, events: EventBus) -> Self {
        Self { db, events }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(api::health_check))
        .route("/api/events", get(api::event_stream))
        .route(
            "/api/deliberations",
            post(api::deliberations::create_deliberation),
        )
        .route(
            "/api/deliberations/:id",
            get(api::deliberations::get_deliberation),
        )
        .route(
            "/api/deliberations/:id/join",
            post(api::deliberations::join_deliberation),
        )
        .route(
            "/api/deliberations/:id/ideas",
            post(api::deliberations::submit_idea),
        )
        .route(
            "/api/deliberations/:id/start",
            post(api::deliberations::start_voting),
        )
        .route(
            "/api/deliberations/:id/close-submissions",
            post(api::deliberations::close_submissions),
        )
        .route(
            "/api/deliberations/:id/reopen",
            post(api::deliberations::reopen_submissions),
        )
        .route(
            "/api/deliberations/:id/check-tier",
            post(api::deliberations::check_tier),
        )
        .route("/api/deliberations/:id/seat", post(api::cells::take_seat))
        .route("/api/cells/:id", get(api::cells::get_cell))
        .route("/api/cells/:id/vote", post(api::cells::cast_vote))
        .route("/api/cells/:id/process", post(api::cells::process_cell))
        .route(
            "/api/cells/:id/seat/:user_id",
            delete(api::cells::release_seat),
        )
        .route(
            "/api/cells/:id/revisions",
            post(api::revisions::propose_revision),
        )
        .route(
            "/api/revisions/:id/vote",
            post(api::revisions::vote_on_revision),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}
