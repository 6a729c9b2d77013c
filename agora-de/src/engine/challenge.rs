//! Challenge rounds
//!
//! While a deliberation accumulates, new ideas queue up as challengers
//! against the reigning champion. When enough of them gather, a challenge
//! round re-enters the ladder at the configured entry tier with the
//! champion defending its title. Progression then runs as usual and the
//! round resolves back to accumulation.

use crate::engine::{allocator, load_deliberation, progression};
use crate::error::{Error, Result};
use agora_common::db::models::{DeliberationPhase, IdeaStatus};
use agora_common::db::settings;
use agora_common::events::{AgoraEvent, EventBus};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::info;

/// Start a challenge round if enough challengers are pending
///
/// Returns true when a round was started. Quietly does nothing outside
/// the accumulation phase, below quorum, or without enough members to
/// staff a cell.
pub async fn check_challenge_quorum(
    db: &SqlitePool,
    events: &EventBus,
    deliberation_id: &str,
    now: DateTime<Utc>,
) -> Result<bool> {
    let quorum = settings::get_challenge_quorum(db).await?;
    let entry_tier = settings::get_challenge_entry_tier(db).await?;

    let mut tx = db.begin().await?;

    let deliberation = load_deliberation(&mut tx, deliberation_id).await?;
    if deliberation.phase != DeliberationPhase::Accumulating
        || !deliberation.accumulation_enabled
    {
        return Ok(false);
    }

    let champion_id = deliberation.champion_idea_id.clone().ok_or_else(|| {
        Error::Internal(format!(
            "Accumulating deliberation {} has no champion",
            deliberation_id
        ))
    })?;

    let challenger_ids: Vec<String> = sqlx::query_scalar(
        r#"
        SELECT guid FROM ideas
        WHERE deliberation_id = ? AND status = 'pending'
        ORDER BY submitted_at, guid
        "#,
    )
    .bind(deliberation_id)
    .fetch_all(&mut *tx)
    .await?;
    if (challenger_ids.len() as i64) < quorum {
        return Ok(false);
    }

    let member_ids: Vec<String> = sqlx::query_scalar(
        r#"
        SELECT user_id FROM deliberation_members
        WHERE deliberation_id = ?
        ORDER BY joined_at, user_id
        "#,
    )
    .bind(deliberation_id)
    .fetch_all(&mut *tx)
    .await?;
    if member_ids.len() < allocator::MIN_MEMBERS_PER_CELL {
        return Ok(false);
    }

    // Phase guard doubles as the concurrency gate: only one caller flips
    // accumulating to voting.
    let flipped = sqlx::query(
        r#"
        UPDATE deliberations
        SET phase = ?, current_tier = ?, challenge_round = challenge_round + 1,
            submissions_open = 0, updated_at = ?
        WHERE guid = ? AND phase = ?
        "#,
    )
    .bind(DeliberationPhase::Voting)
    .bind(entry_tier)
    .bind(now)
    .bind(deliberation_id)
    .bind(DeliberationPhase::Accumulating)
    .execute(&mut *tx)
    .await?;
    if flipped.rows_affected() == 0 {
        return Ok(false);
    }
    let round = deliberation.challenge_round + 1;

    // Champion first in the deal so it lands in the first cell.
    let mut idea_ids = Vec::with_capacity(challenger_ids.len() + 1);
    idea_ids.push(champion_id.clone());
    idea_ids.extend(challenger_ids.iter().cloned());

    let plan = allocator::allocate_cells(
        &mut tx,
        &deliberation,
        entry_tier,
        round,
        &idea_ids,
        &member_ids,
        now,
    )
    .await?;

    // The allocator placed the champion as a normal contestant; restore
    // its defender marking.
    sqlx::query("UPDATE ideas SET status = ? WHERE guid = ?")
        .bind(IdeaStatus::Defending)
        .bind(&champion_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    info!(
        deliberation_id,
        round,
        challengers = challenger_ids.len(),
        cells = plan.opened.len(),
        "Challenge round started"
    );
    events.emit_lossy(AgoraEvent::ChallengeRoundStarted {
        deliberation_id: deliberation_id.to_string(),
        round,
        challenger_count: challenger_ids.len(),
        timestamp: now,
    });
    for opened in &plan.opened {
        progression::emit_cell_opened(events, deliberation_id, opened, now);
    }

    Ok(true)
}
