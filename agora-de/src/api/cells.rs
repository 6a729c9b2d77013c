//! Cell voting and seat handlers

use crate::db::{cells, ideas};
use crate::engine::{ledger, progression, seats};
use crate::error::Result;
use crate::AppState;
use agora_common::db::models::{Cell, Idea};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Cell detail shown to seated voters
#[derive(Debug, Serialize)]
pub struct CellDetail {
    #[serde(flatten)]
    pub cell: Cell,
    pub ideas: Vec<Idea>,
    pub seat_count: i64,
}

/// GET /api/cells/:id
pub async fn get_cell(
    State(state): State<AppState>,
    Path(cell_id): Path<String>,
) -> Result<Json<CellDetail>> {
    let cell = cells::get_cell(&state.db, &cell_id).await?;
    let ideas = ideas::list_cell_ideas(&state.db, &cell_id).await?;
    let seat_count = cells::seat_count(&state.db, &cell_id).await?;
    Ok(Json(CellDetail {
        cell,
        ideas,
        seat_count,
    }))
}

/// Request body for casting a vote
#[derive(Debug, Deserialize)]
pub struct VoteRequest {
    pub user_id: String,
    pub idea_id: String,
    pub points: i64,
}

/// POST /api/cells/:id/vote
pub async fn cast_vote(
    State(state): State<AppState>,
    Path(cell_id): Path<String>,
    Json(req): Json<VoteRequest>,
) -> Result<StatusCode> {
    let now = Utc::now();
    ledger::cast_vote(
        &state.db,
        &state.events,
        &cell_id,
        &req.user_id,
        &req.idea_id,
        req.points,
        now,
    )
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Result of forcing a cell to process
#[derive(Debug, Serialize)]
pub struct ProcessResponse {
    pub outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winner_idea_id: Option<String>,
}

/// POST /api/cells/:id/process
///
/// Operator override: tallies the cell with timeout semantics, counting
/// whatever votes exist, then runs the tier check for its deliberation.
pub async fn process_cell(
    State(state): State<AppState>,
    Path(cell_id): Path<String>,
) -> Result<Json<ProcessResponse>> {
    let now = Utc::now();

    let cell = cells::get_cell(&state.db, &cell_id).await?;
    let outcome =
        progression::process_cell_results(&state.db, &state.events, &cell_id, true, now).await?;

    let response = match outcome {
        progression::CellOutcome::Processed { winner_idea_id, .. } => {
            progression::check_tier_completion(
                &state.db,
                &state.events,
                &cell.deliberation_id,
                cell.tier,
                now,
            )
            .await?;
            ProcessResponse {
                outcome: "processed".to_string(),
                winner_idea_id,
            }
        }
        progression::CellOutcome::AlreadyProcessed => ProcessResponse {
            outcome: "already_processed".to_string(),
            winner_idea_id: None,
        },
        progression::CellOutcome::NotReady => ProcessResponse {
            outcome: "not_ready".to_string(),
            winner_idea_id: None,
        },
    };

    Ok(Json(response))
}

/// Request body for taking a late-joiner seat
#[derive(Debug, Deserialize)]
pub struct SeatRequest {
    pub user_id: String,
}

/// Seat response; `cell_id` is None when every open cell is full
#[derive(Debug, Serialize)]
pub struct SeatResponse {
    pub seated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cell_id: Option<String>,
}

/// POST /api/deliberations/:id/seat
pub async fn take_seat(
    State(state): State<AppState>,
    Path(deliberation_id): Path<String>,
    Json(req): Json<SeatRequest>,
) -> Result<Json<SeatResponse>> {
    let now = Utc::now();
    let cell_id = seats::add_late_joiner_to_cell(
        &state.db,
        &state.events,
        &deliberation_id,
        &req.user_id,
        now,
    )
    .await?;
    Ok(Json(SeatResponse {
        seated: cell_id.is_some(),
        cell_id,
    }))
}

/// DELETE /api/cells/:id/seat/:user_id
pub async fn release_seat(
    State(state): State<AppState>,
    Path((cell_id, user_id)): Path<(String, String)>,
) -> Result<StatusCode> {
    let now = Utc::now();
    seats::release_seat(&state.db, &state.events, &cell_id, &user_id, now).await?;
    Ok(StatusCode::NO_CONTENT)
}
