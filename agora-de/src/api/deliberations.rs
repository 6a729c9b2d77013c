//! Deliberation lifecycle handlers

use crate::db::deliberations::{self, DeliberationSummary, NewDeliberation};
use crate::engine::{flow, progression};
use crate::error::{Error, Result};
use crate::AppState;
use agora_common::db::models::{Deliberation, DeliberationPhase, Idea};
use agora_common::db::settings;
use agora_common::events::AgoraEvent;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Request body for creating a deliberation
///
/// Unset sizing fields fall back to the settings defaults.
#[derive(Debug, Deserialize)]
pub struct CreateDeliberationRequest {
    pub question: String,
    pub cell_size: Option<i64>,
    pub vote_budget: Option<i64>,
    pub discussion_seconds: Option<i64>,
    pub voting_seconds: Option<i64>,
    #[serde(default)]
    pub continuous_flow: bool,
    #[serde(default)]
    pub accumulation_enabled: bool,
}

/// POST /api/deliberations
pub async fn create_deliberation(
    State(state): State<AppState>,
    Json(req): Json<CreateDeliberationRequest>,
) -> Result<(StatusCode, Json<Deliberation>)> {
    let now = Utc::now();

    if req.question.trim().is_empty() {
        return Err(Error::BadRequest("Question must not be empty".to_string()));
    }

    let defaults = settings::get_deliberation_defaults(&state.db).await?;
    let params = NewDeliberation {
        question: req.question.trim().to_string(),
        cell_size: req.cell_size.unwrap_or(defaults.cell_size),
        vote_budget: req.vote_budget.unwrap_or(defaults.vote_budget),
        discussion_seconds: req.discussion_seconds.unwrap_or(defaults.discussion_seconds),
        voting_seconds: req.voting_seconds.unwrap_or(defaults.voting_seconds),
        continuous_flow: req.continuous_flow,
        accumulation_enabled: req.accumulation_enabled,
    };

    if params.cell_size < 2 {
        return Err(Error::BadRequest("cell_size must be at least 2".to_string()));
    }
    if params.vote_budget <= 0 {
        return Err(Error::BadRequest("vote_budget must be positive".to_string()));
    }
    if params.voting_seconds <= 0 {
        return Err(Error::BadRequest(
            "voting_seconds must be positive".to_string(),
        ));
    }
    if params.discussion_seconds < 0 {
        return Err(Error::BadRequest(
            "discussion_seconds must not be negative".to_string(),
        ));
    }

    let deliberation = deliberations::create_deliberation(&state.db, &params, now).await?;

    state.events.emit_lossy(AgoraEvent::DeliberationCreated {
        deliberation_id: deliberation.guid.clone(),
        timestamp: now,
    });

    Ok((StatusCode::CREATED, Json(deliberation)))
}

/// Request body for joining a deliberation
#[derive(Debug, Deserialize)]
pub struct JoinRequest {
    pub user_id: String,
}

/// Join response; `joined` is false when the user was already a member
#[derive(Debug, Serialize)]
pub struct JoinResponse {
    pub joined: bool,
}

/// POST /api/deliberations/:id/join
pub async fn join_deliberation(
    State(state): State<AppState>,
    Path(deliberation_id): Path<String>,
    Json(req): Json<JoinRequest>,
) -> Result<Json<JoinResponse>> {
    let now = Utc::now();

    if req.user_id.trim().is_empty() {
        return Err(Error::BadRequest("user_id must not be empty".to_string()));
    }

    let deliberation = deliberations::get_deliberation(&state.db, &deliberation_id).await?;
    if deliberation.phase == DeliberationPhase::Completed {
        return Err(Error::InvalidPhase(
            "Deliberation has completed".to_string(),
        ));
    }

    let joined =
        deliberations::add_member(&state.db, &deliberation_id, &req.user_id, now).await?;
    if joined {
        state.events.emit_lossy(AgoraEvent::MemberJoined {
            deliberation_id: deliberation_id.clone(),
            user_id: req.user_id.clone(),
            timestamp: now,
        });
    }

    Ok(Json(JoinResponse { joined }))
}

/// Request body for submitting an idea
#[derive(Debug, Deserialize)]
pub struct SubmitIdeaRequest {
    pub user_id: String,
    pub text: String,
}

/// POST /api/deliberations/:id/ideas
pub async fn submit_idea(
    State(state): State<AppState>,
    Path(deliberation_id): Path<String>,
    Json(req): Json<SubmitIdeaRequest>,
) -> Result<(StatusCode, Json<Idea>)> {
    let now = Utc::now();

    let max_length = settings::get_idea_max_length(&state.db).await?;
    if req.text.len() > max_length {
        return Err(Error::BadRequest(format!(
            "Idea text exceeds {} bytes",
            max_length
        )));
    }

    let idea = flow::submit_idea(
        &state.db,
        &state.events,
        &deliberation_id,
        &req.user_id,
        &req.text,
        now,
    )
    .await?;

    Ok((StatusCode::CREATED, Json(idea)))
}

/// Response to starting the voting phase
#[derive(Debug, Serialize)]
pub struct StartResponse {
    pub cell_count: usize,
}

/// POST /api/deliberations/:id/start
pub async fn start_voting(
    State(state): State<AppState>,
    Path(deliberation_id): Path<String>,
) -> Result<Json<StartResponse>> {
    let now = Utc::now();
    let cell_count =
        progression::start_voting_phase(&state.db, &state.events, &deliberation_id, now).await?;
    Ok(Json(StartResponse { cell_count }))
}

/// Response to closing the submission window
#[derive(Debug, Serialize)]
pub struct CloseSubmissionsResponse {
    pub cells_created: usize,
    pub cells_completed: usize,
    pub ideas_parked: usize,
}

/// POST /api/deliberations/:id/close-submissions
pub async fn close_submissions(
    State(state): State<AppState>,
    Path(deliberation_id): Path<String>,
) -> Result<Json<CloseSubmissionsResponse>> {
    let now = Utc::now();
    let report =
        flow::close_submissions(&state.db, &state.events, &deliberation_id, now).await?;
    Ok(Json(CloseSubmissionsResponse {
        cells_created: report.cells_created,
        cells_completed: report.cells_completed,
        ideas_parked: report.ideas_parked,
    }))
}

/// POST /api/deliberations/:id/reopen
pub async fn reopen_submissions(
    State(state): State<AppState>,
    Path(deliberation_id): Path<String>,
) -> Result<StatusCode> {
    let now = Utc::now();
    flow::reopen_submissions(&state.db, &deliberation_id, now).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Result of an explicit tier-completion check
#[derive(Debug, Serialize)]
pub struct TierCheckResponse {
    pub outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cell_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub champion_idea_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replaced: Option<bool>,
}

impl From<progression::TierOutcome> for TierCheckResponse {
    fn from(outcome: progression::TierOutcome) -> Self {
        use progression::TierOutcome::*;
        match outcome {
            NotApplicable => Self::bare("not_applicable"),
            CellsOutstanding => Self::bare("cells_outstanding"),
            Advanced { tier, cell_count } => Self {
                tier: Some(tier),
                cell_count: Some(cell_count),
                ..Self::bare("advanced")
            },
            ChampionCrowned { idea_id } => Self {
                champion_idea_id: Some(idea_id),
                ..Self::bare("champion_crowned")
            },
            ChallengeResolved {
                champion_idea_id,
                replaced,
            } => Self {
                champion_idea_id: Some(champion_idea_id),
                replaced: Some(replaced),
                ..Self::bare("challenge_resolved")
            },
            CompletedWithoutChampion => Self::bare("completed_without_champion"),
        }
    }
}

impl TierCheckResponse {
    fn bare(outcome: &str) -> Self {
        Self {
            outcome: outcome.to_string(),
            tier: None,
            cell_count: None,
            champion_idea_id: None,
            replaced: None,
        }
    }
}

/// POST /api/deliberations/:id/check-tier
///
/// Manual nudge for the progression check the engine normally runs after
/// votes and timeouts. Harmless to call at any time.
pub async fn check_tier(
    State(state): State<AppState>,
    Path(deliberation_id): Path<String>,
) -> Result<Json<TierCheckResponse>> {
    let now = Utc::now();
    let deliberation = deliberations::get_deliberation(&state.db, &deliberation_id).await?;
    let outcome = progression::check_tier_completion(
        &state.db,
        &state.events,
        &deliberation_id,
        deliberation.current_tier,
        now,
    )
    .await?;
    Ok(Json(outcome.into()))
}

/// GET /api/deliberations/:id
pub async fn get_deliberation(
    State(state): State<AppState>,
    Path(deliberation_id): Path<String>,
) -> Result<Json<DeliberationSummary>> {
    let summary = deliberations::get_summary(&state.db, &deliberation_id).await?;
    Ok(Json(summary))
}
