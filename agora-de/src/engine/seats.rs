//! Seat management for late joiners
//!
//! Members who arrive after allocation can take a spare seat in an open
//! current-tier cell. Seats are exclusive (one per user per tier) and a
//! seat with recorded votes can never be released.

use crate::engine::{load_cell, load_deliberation};
use crate::error::{Error, Result};
use agora_common::db::models::{CellStatus, DeliberationPhase, ParticipationStatus};
use agora_common::events::{AgoraEvent, EventBus};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::info;

/// Seat a late joiner into an open cell at the current tier
///
/// Returns the cell guid, or None when every open cell is full; the user
/// then simply stays an unseated member, eligible at the next tier.
pub async fn add_late_joiner_to_cell(
    db: &SqlitePool,
    events: &EventBus,
    deliberation_id: &str,
    user_id: &str,
    now: DateTime<Utc>,
) -> Result<Option<String>> {
    let mut tx = db.begin().await?;

    let deliberation = load_deliberation(&mut tx, deliberation_id).await?;
    if deliberation.phase != DeliberationPhase::Voting {
        return Err(Error::InvalidPhase(format!(
            "No open cells in phase {}",
            deliberation.phase
        )));
    }

    let member: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM deliberation_members WHERE deliberation_id = ? AND user_id = ?",
    )
    .bind(deliberation_id)
    .bind(user_id)
    .fetch_one(&mut *tx)
    .await?;
    if member == 0 {
        return Err(Error::InvalidAllocation(format!(
            "User {} is not a member of deliberation {}",
            user_id, deliberation_id
        )));
    }

    let seated: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*)
        FROM cell_participations cp
        JOIN cells c ON c.guid = cp.cell_id
        WHERE c.deliberation_id = ? AND c.tier = ? AND cp.user_id = ?
        "#,
    )
    .bind(deliberation_id)
    .bind(deliberation.current_tier)
    .bind(user_id)
    .fetch_one(&mut *tx)
    .await?;
    if seated > 0 {
        return Err(Error::SeatUnavailable(format!(
            "User {} already holds a seat at tier {}",
            user_id, deliberation.current_tier
        )));
    }

    // Least-occupied open cell with spare capacity wins.
    let cell_id: Option<String> = sqlx::query_scalar(
        r#"
        SELECT c.guid
        FROM cells c
        LEFT JOIN cell_participations cp ON cp.cell_id = c.guid
        WHERE c.deliberation_id = ? AND c.tier = ? AND c.status != 'completed'
        GROUP BY c.guid
        HAVING COUNT(cp.user_id) < ?
        ORDER BY COUNT(cp.user_id), c.created_at, c.guid
        LIMIT 1
        "#,
    )
    .bind(deliberation_id)
    .bind(deliberation.current_tier)
    .bind(deliberation.cell_size)
    .fetch_optional(&mut *tx)
    .await?;

    let Some(cell_id) = cell_id else {
        return Ok(None);
    };

    sqlx::query(
        r#"
        INSERT INTO cell_participations (cell_id, user_id, status, joined_at)
        VALUES (?, ?, ?, ?)
        "#,
    )
    .bind(&cell_id)
    .bind(user_id)
    .bind(ParticipationStatus::Active)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    info!(deliberation_id, user_id, cell_id, "Late joiner seated");
    events.emit_lossy(AgoraEvent::SeatTaken {
        cell_id: cell_id.clone(),
        user_id: user_id.to_string(),
        timestamp: now,
    });

    Ok(Some(cell_id))
}

/// Release an unvoted seat from a still-open cell
pub async fn release_seat(
    db: &SqlitePool,
    events: &EventBus,
    cell_id: &str,
    user_id: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    let mut tx = db.begin().await?;

    let cell = load_cell(&mut tx, cell_id).await?;
    if cell.status == CellStatus::Completed {
        return Err(Error::SeatUnavailable(
            "Cell has already completed".to_string(),
        ));
    }

    let seated: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM cell_participations WHERE cell_id = ? AND user_id = ?",
    )
    .bind(cell_id)
    .bind(user_id)
    .fetch_one(&mut *tx)
    .await?;
    if seated == 0 {
        return Err(Error::NotFound(format!(
            "User {} holds no seat in cell {}",
            user_id, cell_id
        )));
    }

    let votes: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM votes WHERE cell_id = ? AND user_id = ?")
            .bind(cell_id)
            .bind(user_id)
            .fetch_one(&mut *tx)
            .await?;
    if votes > 0 {
        return Err(Error::SeatUnavailable(
            "Seat has recorded votes and cannot be released".to_string(),
        ));
    }

    sqlx::query("DELETE FROM cell_participations WHERE cell_id = ? AND user_id = ?")
        .bind(cell_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    info!(cell_id, user_id, "Seat released");
    events.emit_lossy(AgoraEvent::SeatReleased {
        cell_id: cell_id.to_string(),
        user_id: user_id.to_string(),
        timestamp: now,
    });

    Ok(())
}
