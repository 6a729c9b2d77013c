//! Deliberation queries

use crate::error::{Error, Result};
use agora_common::db::models::{Deliberation, DeliberationPhase};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;

/// Fetch a deliberation by guid
pub async fn get_deliberation(db: &SqlitePool, guid: &str) -> Result<Deliberation> {
    sqlx::query_as::<_, Deliberation>("SELECT * FROM deliberations WHERE guid = ?")
        .bind(guid)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Deliberation not found: {}", guid)))
}

/// Parameters for creating a deliberation
///
/// Unset fields fall back to the seeded settings defaults.
#[derive(Debug, Clone)]
pub struct NewDeliberation {
    pub question: String,
    pub cell_size: i64,
    pub vote_budget: i64,
    pub discussion_seconds: i64,
    pub voting_seconds: i64,
    pub continuous_flow: bool,
    pub accumulation_enabled: bool,
}

/// Insert a new deliberation in the submission phase
pub async fn create_deliberation(
    db: &SqlitePool,
    params: &NewDeliberation,
    now: DateTime<Utc>,
) -> Result<Deliberation> {
    let guid = uuid::Uuid::new_v4().to_string();

    sqlx::query(
        r#"
        INSERT INTO deliberations
            (guid, question, phase, current_tier, cell_size, vote_budget,
             discussion_seconds, voting_seconds, continuous_flow,
             accumulation_enabled, submissions_open, challenge_round,
             created_at, updated_at)
        VALUES (?, ?, 'submission', 0, ?, ?, ?, ?, ?, ?, 1, 0, ?, ?)
        "#,
    )
    .bind(&guid)
    .bind(&params.question)
    .bind(params.cell_size)
    .bind(params.vote_budget)
    .bind(params.discussion_seconds)
    .bind(params.voting_seconds)
    .bind(params.continuous_flow)
    .bind(params.accumulation_enabled)
    .bind(now)
    .bind(now)
    .execute(db)
    .await?;

    get_deliberation(db, &guid).await
}

/// Add a user to the deliberation's member pool
///
/// Returns false when the user was already a member.
pub async fn add_member(
    db: &SqlitePool,
    deliberation_id: &str,
    user_id: &str,
    now: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT OR IGNORE INTO deliberation_members (deliberation_id, user_id, joined_at)
        VALUES (?, ?, ?)
        "#,
    )
    .bind(deliberation_id)
    .bind(user_id)
    .bind(now)
    .execute(db)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Check membership of a user in a deliberation
pub async fn is_member(db: &SqlitePool, deliberation_id: &str, user_id: &str) -> Result<bool> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM deliberation_members WHERE deliberation_id = ? AND user_id = ?",
    )
    .bind(deliberation_id)
    .bind(user_id)
    .fetch_one(db)
    .await?;

    Ok(count > 0)
}

/// Per-status idea count for the status summary
#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct IdeaStatusCount {
    pub status: String,
    pub count: i64,
}

/// Deliberation status summary returned by the API
#[derive(Debug, Serialize)]
pub struct DeliberationSummary {
    pub guid: String,
    pub question: String,
    pub phase: DeliberationPhase,
    pub current_tier: i64,
    pub challenge_round: i64,
    pub submissions_open: bool,
    pub member_count: i64,
    pub idea_counts: Vec<IdeaStatusCount>,
    pub open_cell_count: i64,
    pub champion_idea_id: Option<String>,
    pub champion_text: Option<String>,
}

/// Build the status summary for a deliberation
pub async fn get_summary(db: &SqlitePool, guid: &str) -> Result<DeliberationSummary> {
    let deliberation = get_deliberation(db, guid).await?;

    let member_count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM deliberation_members WHERE deliberation_id = ?")
            .bind(guid)
            .fetch_one(db)
            .await?;

    let idea_counts = sqlx::query_as::<_, IdeaStatusCount>(
        r#"
        SELECT status, COUNT(*) AS count
        FROM ideas
        WHERE deliberation_id = ?
        GROUP BY status
        ORDER BY status
        "#,
    )
    .bind(guid)
    .fetch_all(db)
    .await?;

    let open_cell_count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM cells WHERE deliberation_id = ? AND status != 'completed'",
    )
    .bind(guid)
    .fetch_one(db)
    .await?;

    let champion_text: Option<String> = match deliberation.champion_idea_id.as_deref() {
        Some(champion_id) => sqlx::query_scalar("SELECT text FROM ideas WHERE guid = ?")
            .bind(champion_id)
            .fetch_optional(db)
            .await?,
        None => None,
    };

    Ok(DeliberationSummary {
        guid: deliberation.guid,
        question: deliberation.question,
        phase: deliberation.phase,
        current_tier: deliberation.current_tier,
        challenge_round: deliberation.challenge_round,
        submissions_open: deliberation.submissions_open,
        member_count,
        idea_counts,
        open_cell_count,
        champion_idea_id: deliberation.champion_idea_id,
        champion_text,
    })
}
