//! Idea revision handlers

use crate::engine::revision;
use crate::error::{Error, Result};
use crate::AppState;
use agora_common::db::models::{IdeaRevision, RevisionStatus};
use agora_common::db::settings;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Request body for proposing a revision
#[derive(Debug, Deserialize)]
pub struct ProposeRevisionRequest {
    pub idea_id: String,
    pub user_id: String,
    pub text: String,
}

/// POST /api/cells/:id/revisions
pub async fn propose_revision(
    State(state): State<AppState>,
    Path(cell_id): Path<String>,
    Json(req): Json<ProposeRevisionRequest>,
) -> Result<(StatusCode, Json<IdeaRevision>)> {
    let now = Utc::now();

    let max_length = settings::get_idea_max_length(&state.db).await?;
    if req.text.len() > max_length {
        return Err(Error::BadRequest(format!(
            "Revision text exceeds {} bytes",
            max_length
        )));
    }

    let revision = revision::propose_revision(
        &state.db,
        &state.events,
        &cell_id,
        &req.idea_id,
        &req.user_id,
        &req.text,
        now,
    )
    .await?;

    Ok((StatusCode::CREATED, Json(revision)))
}

/// Request body for voting on a revision
#[derive(Debug, Deserialize)]
pub struct RevisionVoteRequest {
    pub user_id: String,
    pub approve: bool,
}

/// Revision status after the vote was applied
#[derive(Debug, Serialize)]
pub struct RevisionVoteResponse {
    pub status: RevisionStatus,
}

/// POST /api/revisions/:id/vote
pub async fn vote_on_revision(
    State(state): State<AppState>,
    Path(revision_id): Path<String>,
    Json(req): Json<RevisionVoteRequest>,
) -> Result<Json<RevisionVoteResponse>> {
    let now = Utc::now();
    let status = revision::vote_on_revision(
        &state.db,
        &state.events,
        &revision_id,
        &req.user_id,
        req.approve,
        now,
    )
    .await?;
    Ok(Json(RevisionVoteResponse { status }))
}
