//! Vote ledger and tally
//!
//! Point-allocation voting within a cell. Each seated member spreads a
//! fixed budget of points across the cell's ideas; re-voting an idea
//! replaces the previous allocation. Tallies are deterministic: ties
//! break by fewer prior losses, earlier submission, then smaller guid.

use crate::engine::{load_cell, load_deliberation};
use crate::error::{Error, Result};
use agora_common::db::models::{CellStatus, ParticipationStatus};
use agora_common::events::{AgoraEvent, EventBus};
use chrono::{DateTime, Duration, Utc};
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::debug;

/// Record (or replace) one member's vote for an idea in a cell
///
/// When the vote leaves every seat in the cell `VOTED`, the cell is
/// processed and tier completion is checked in the same call.
pub async fn cast_vote(
    db: &SqlitePool,
    events: &EventBus,
    cell_id: &str,
    user_id: &str,
    idea_id: &str,
    points: i64,
    now: DateTime<Utc>,
) -> Result<()> {
    if points <= 0 {
        return Err(Error::InvalidAllocation(
            "Points must be positive".to_string(),
        ));
    }

    let mut tx = db.begin().await?;

    let cell = load_cell(&mut tx, cell_id).await?;
    let deliberation = load_deliberation(&mut tx, &cell.deliberation_id).await?;

    match cell.status {
        CellStatus::Completed => {
            return Err(Error::InvalidAllocation(
                "Cell is not open for voting".to_string(),
            ));
        }
        CellStatus::Deliberating => {
            // An elapsed discussion window opens voting on the first vote.
            let elapsed = cell.discussion_ends_at.map(|t| t <= now).unwrap_or(false);
            if !elapsed {
                return Err(Error::InvalidAllocation(
                    "Cell is still in discussion".to_string(),
                ));
            }
            sqlx::query("UPDATE cells SET status = ?, voting_ends_at = ? WHERE guid = ?")
                .bind(CellStatus::Voting)
                .bind(now + Duration::seconds(deliberation.voting_seconds))
                .bind(cell_id)
                .execute(&mut *tx)
                .await?;
        }
        CellStatus::Voting => {
            if let Some(ends) = cell.voting_ends_at {
                if ends <= now {
                    return Err(Error::InvalidAllocation(
                        "Voting window has closed".to_string(),
                    ));
                }
            }
        }
    }

    let in_cell: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM cell_ideas WHERE cell_id = ? AND idea_id = ?")
            .bind(cell_id)
            .bind(idea_id)
            .fetch_one(&mut *tx)
            .await?;
    if in_cell == 0 {
        return Err(Error::InvalidAllocation(format!(
            "Idea {} is not in cell {}",
            idea_id, cell_id
        )));
    }

    let seated: Option<String> = sqlx::query_scalar(
        "SELECT status FROM cell_participations WHERE cell_id = ? AND user_id = ?",
    )
    .bind(cell_id)
    .bind(user_id)
    .fetch_optional(&mut *tx)
    .await?;
    if seated.is_none() {
        return Err(Error::InvalidAllocation(format!(
            "User {} holds no seat in cell {}",
            user_id, cell_id
        )));
    }

    let prior: i64 = sqlx::query_scalar(
        "SELECT COALESCE(points, 0) FROM votes WHERE cell_id = ? AND user_id = ? AND idea_id = ?",
    )
    .bind(cell_id)
    .bind(user_id)
    .bind(idea_id)
    .fetch_optional(&mut *tx)
    .await?
    .unwrap_or(0);

    let spent: i64 =
        sqlx::query_scalar("SELECT COALESCE(SUM(points), 0) FROM votes WHERE cell_id = ? AND user_id = ?")
            .bind(cell_id)
            .bind(user_id)
            .fetch_one(&mut *tx)
            .await?;

    let new_total = spent - prior + points;
    if new_total > deliberation.vote_budget {
        return Err(Error::InvalidAllocation(format!(
            "Vote of {} points would exceed the budget of {} ({} already allocated)",
            points,
            deliberation.vote_budget,
            spent - prior
        )));
    }

    sqlx::query(
        r#"
        INSERT INTO votes (cell_id, user_id, idea_id, points, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(cell_id, user_id, idea_id)
        DO UPDATE SET points = excluded.points, updated_at = excluded.updated_at
        "#,
    )
    .bind(cell_id)
    .bind(user_id)
    .bind(idea_id)
    .bind(points)
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    // Keep the idea's running total in step with the replacement semantics.
    sqlx::query("UPDATE ideas SET total_points = total_points + ? WHERE guid = ?")
        .bind(points - prior)
        .bind(idea_id)
        .execute(&mut *tx)
        .await?;

    let participation = if new_total == deliberation.vote_budget {
        ParticipationStatus::Voted
    } else {
        ParticipationStatus::Active
    };
    sqlx::query("UPDATE cell_participations SET status = ? WHERE cell_id = ? AND user_id = ?")
        .bind(participation)
        .bind(cell_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    events.emit_lossy(AgoraEvent::VoteRecorded {
        cell_id: cell_id.to_string(),
        user_id: user_id.to_string(),
        idea_id: idea_id.to_string(),
        points,
        timestamp: now,
    });

    // A fully-voted cell completes without waiting for its deadline.
    let active: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM cell_participations WHERE cell_id = ? AND status = 'active'",
    )
    .bind(cell_id)
    .fetch_one(db)
    .await?;
    if active == 0 {
        crate::engine::progression::process_cell_results(db, events, cell_id, false, now).await?;
        crate::engine::progression::check_tier_completion(
            db,
            events,
            &cell.deliberation_id,
            cell.tier,
            now,
        )
        .await?;
    }

    Ok(())
}

/// One idea's point total within a cell
#[derive(Debug, Clone)]
pub struct TallyRow {
    pub idea_id: String,
    pub points: i64,
}

/// Tally a cell's votes and pick the winner
///
/// Rows come back best-first; the winner is the top row unless the cell
/// drew zero points overall.
pub(crate) async fn tally_cell(
    tx: &mut Transaction<'_, Sqlite>,
    cell_id: &str,
) -> Result<(Option<String>, Vec<TallyRow>)> {
    let rows = sqlx::query_as::<_, (String, i64)>(
        r#"
        SELECT i.guid, COALESCE(SUM(v.points), 0) AS pts
        FROM cell_ideas ci
        JOIN ideas i ON i.guid = ci.idea_id
        LEFT JOIN votes v ON v.cell_id = ci.cell_id AND v.idea_id = i.guid
        WHERE ci.cell_id = ?
        GROUP BY i.guid
        ORDER BY pts DESC, i.loss_count ASC, i.submitted_at ASC, i.guid ASC
        "#,
    )
    .bind(cell_id)
    .fetch_all(&mut **tx)
    .await?;

    let tallies: Vec<TallyRow> = rows
        .into_iter()
        .map(|(idea_id, points)| TallyRow { idea_id, points })
        .collect();

    let winner = tallies
        .first()
        .filter(|top| top.points > 0)
        .map(|top| top.idea_id.clone());

    debug!(
        cell_id,
        winner = winner.as_deref().unwrap_or("none"),
        ideas = tallies.len(),
        "Tallied cell"
    );

    Ok((winner, tallies))
}
