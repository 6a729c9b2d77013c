//! Idea intake and continuous-flow cell formation
//!
//! Owns the submission window. In continuous-flow deliberations the
//! window stays open through tier 1 and full cells spawn as ideas
//! arrive; closing the window allocates the leftovers and lets the tier
//! finish. Submissions during accumulation become challengers instead.

use crate::engine::allocator::{self, MIN_MEMBERS_PER_CELL};
use crate::engine::{challenge, load_deliberation, progression};
use crate::error::{Error, Result};
use agora_common::db::models::{DeliberationPhase, Idea, IdeaStatus};
use agora_common::events::{AgoraEvent, EventBus};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::{info, warn};

/// Accept an idea into a deliberation
///
/// The phase decides where it lands: the submission pool, the live tier-1
/// flow, or the challenger pool during accumulation. Drives the
/// continuous-flow spawner and the challenge quorum check.
pub async fn submit_idea(
    db: &SqlitePool,
    events: &EventBus,
    deliberation_id: &str,
    author_id: &str,
    text: &str,
    now: DateTime<Utc>,
) -> Result<Idea> {
    if text.trim().is_empty() {
        return Err(Error::BadRequest("Idea text must not be empty".to_string()));
    }

    let mut tx = db.begin().await?;

    let deliberation = load_deliberation(&mut tx, deliberation_id).await?;

    let member: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM deliberation_members WHERE deliberation_id = ? AND user_id = ?",
    )
    .bind(deliberation_id)
    .bind(author_id)
    .fetch_one(&mut *tx)
    .await?;
    if member == 0 {
        return Err(Error::InvalidAllocation(format!(
            "User {} is not a member of deliberation {}",
            author_id, deliberation_id
        )));
    }

    let status = match deliberation.phase {
        DeliberationPhase::Submission => {
            if !deliberation.submissions_open {
                return Err(Error::InvalidPhase("Submissions are closed".to_string()));
            }
            IdeaStatus::Submitted
        }
        DeliberationPhase::Voting => {
            let flowing = deliberation.continuous_flow
                && deliberation.current_tier == 1
                && deliberation.submissions_open;
            if !flowing {
                return Err(Error::InvalidPhase(
                    "Deliberation is not accepting ideas during voting".to_string(),
                ));
            }
            IdeaStatus::Submitted
        }
        DeliberationPhase::Accumulating => IdeaStatus::Pending,
        DeliberationPhase::Completed => {
            return Err(Error::InvalidPhase(
                "Deliberation has completed".to_string(),
            ));
        }
    };

    let idea = Idea {
        guid: uuid::Uuid::new_v4().to_string(),
        deliberation_id: deliberation_id.to_string(),
        author_id: author_id.to_string(),
        text: text.to_string(),
        status,
        tier_reached: 0,
        total_points: 0,
        loss_count: 0,
        is_champion: false,
        submitted_at: now,
    };

    sqlx::query(
        r#"
        INSERT INTO ideas
            (guid, deliberation_id, author_id, text, status, tier_reached,
             total_points, loss_count, is_champion, submitted_at)
        VALUES (?, ?, ?, ?, ?, 0, 0, 0, 0, ?)
        "#,
    )
    .bind(&idea.guid)
    .bind(deliberation_id)
    .bind(author_id)
    .bind(&idea.text)
    .bind(status)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    events.emit_lossy(AgoraEvent::IdeaSubmitted {
        deliberation_id: deliberation_id.to_string(),
        idea_id: idea.guid.clone(),
        timestamp: now,
    });

    match deliberation.phase {
        DeliberationPhase::Voting => {
            try_create_continuous_flow_cell(db, events, deliberation_id, now).await?;
        }
        DeliberationPhase::Accumulating => {
            challenge::check_challenge_quorum(db, events, deliberation_id, now).await?;
        }
        _ => {}
    }

    Ok(idea)
}

/// Spawn full tier-1 cells from the unassigned pool
///
/// No-op unless the deliberation is in tier-1 voting with the window
/// open. Only full cells form here; the remainder waits for more ideas
/// or for the window to close. Returns the number of cells created.
pub async fn try_create_continuous_flow_cell(
    db: &SqlitePool,
    events: &EventBus,
    deliberation_id: &str,
    now: DateTime<Utc>,
) -> Result<usize> {
    let mut tx = db.begin().await?;

    let deliberation = load_deliberation(&mut tx, deliberation_id).await?;
    let flowing = deliberation.phase == DeliberationPhase::Voting
        && deliberation.continuous_flow
        && deliberation.current_tier == 1
        && deliberation.submissions_open;
    if !flowing {
        return Ok(0);
    }

    let pool_ids = unassigned_idea_ids(&mut tx, deliberation_id).await?;
    let eligible = unseated_member_ids(&mut tx, deliberation_id).await?;

    let cell_size = deliberation.cell_size.max(2) as usize;
    let full_cells = (pool_ids.len() / cell_size).min(eligible.len() / MIN_MEMBERS_PER_CELL);
    if full_cells == 0 {
        return Ok(0);
    }

    let batch = next_batch(&mut tx, deliberation_id).await?;
    let plan = allocator::allocate_cells(
        &mut tx,
        &deliberation,
        1,
        batch,
        &pool_ids[..full_cells * cell_size],
        &eligible,
        now,
    )
    .await?;
    let created = plan.opened.len();
    tx.commit().await?;

    info!(deliberation_id, created, "Continuous-flow cells spawned");
    for opened in &plan.opened {
        progression::emit_cell_opened(events, deliberation_id, opened, now);
    }

    Ok(created)
}

/// Report from closing the submission window
#[derive(Debug, Default, Clone, Copy)]
pub struct CloseReport {
    pub cells_created: usize,
    pub cells_completed: usize,
    pub ideas_parked: usize,
}

/// Close the submission window
///
/// During the submission phase this just shuts the window. During tier-1
/// continuous flow it also allocates the leftover pool (one final cell
/// when it supports one, otherwise the accumulation pool), completes any
/// fully-voted open cells, and checks the tier. Already-closed windows
/// are a no-op.
pub async fn close_submissions(
    db: &SqlitePool,
    events: &EventBus,
    deliberation_id: &str,
    now: DateTime<Utc>,
) -> Result<CloseReport> {
    let mut tx = db.begin().await?;

    let deliberation = load_deliberation(&mut tx, deliberation_id).await?;
    if !deliberation.submissions_open {
        return Ok(CloseReport::default());
    }

    let in_flow = deliberation.phase == DeliberationPhase::Voting
        && deliberation.continuous_flow
        && deliberation.current_tier == 1;
    if deliberation.phase != DeliberationPhase::Submission && !in_flow {
        return Err(Error::InvalidPhase(format!(
            "Cannot close submissions in phase {}",
            deliberation.phase
        )));
    }

    sqlx::query("UPDATE deliberations SET submissions_open = 0, updated_at = ? WHERE guid = ?")
        .bind(now)
        .bind(deliberation_id)
        .execute(&mut *tx)
        .await?;

    let mut report = CloseReport::default();

    if in_flow {
        let pool_ids = unassigned_idea_ids(&mut tx, deliberation_id).await?;
        let eligible = unseated_member_ids(&mut tx, deliberation_id).await?;
        let batch = next_batch(&mut tx, deliberation_id).await?;

        let plan = allocator::allocate_cells(
            &mut tx,
            &deliberation,
            1,
            batch,
            &pool_ids,
            &eligible,
            now,
        )
        .await?;
        report.cells_created = plan.opened.len();
        report.ideas_parked = plan.pending_idea_ids.len();
        tx.commit().await?;

        events.emit_lossy(AgoraEvent::SubmissionsClosed {
            deliberation_id: deliberation_id.to_string(),
            timestamp: now,
        });
        for opened in &plan.opened {
            progression::emit_cell_opened(events, deliberation_id, opened, now);
        }

        // Wrap up cells whose seats have all voted; the rest run to
        // their deadlines. One bad cell must not block the others.
        let open_cells: Vec<String> = sqlx::query_scalar(
            "SELECT guid FROM cells WHERE deliberation_id = ? AND tier = 1 AND status != 'completed'",
        )
        .bind(deliberation_id)
        .fetch_all(db)
        .await?;
        for cell_id in open_cells {
            match progression::process_cell_results(db, events, &cell_id, false, now).await {
                Ok(progression::CellOutcome::Processed { .. }) => report.cells_completed += 1,
                Ok(_) => {}
                Err(e) => {
                    warn!(cell_id, error = %e, "Failed to process cell at close");
                }
            }
        }

        progression::check_tier_completion(db, events, deliberation_id, 1, now).await?;
    } else {
        tx.commit().await?;
        events.emit_lossy(AgoraEvent::SubmissionsClosed {
            deliberation_id: deliberation_id.to_string(),
            timestamp: now,
        });
    }

    Ok(report)
}

/// Reopen a closed submission window while still in the submission phase
pub async fn reopen_submissions(
    db: &SqlitePool,
    deliberation_id: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    let mut tx = db.begin().await?;

    let deliberation = load_deliberation(&mut tx, deliberation_id).await?;
    if deliberation.phase != DeliberationPhase::Submission {
        return Err(Error::InvalidPhase(format!(
            "Cannot reopen submissions in phase {}",
            deliberation.phase
        )));
    }

    sqlx::query("UPDATE deliberations SET submissions_open = 1, updated_at = ? WHERE guid = ?")
        .bind(now)
        .bind(deliberation_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    Ok(())
}

async fn unassigned_idea_ids(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    deliberation_id: &str,
) -> Result<Vec<String>> {
    Ok(sqlx::query_scalar(
        r#"
        SELECT guid FROM ideas
        WHERE deliberation_id = ? AND status = 'submitted'
        ORDER BY submitted_at, guid
        "#,
    )
    .bind(deliberation_id)
    .fetch_all(&mut **tx)
    .await?)
}

/// Members without a tier-1 seat, in join order
async fn unseated_member_ids(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    deliberation_id: &str,
) -> Result<Vec<String>> {
    Ok(sqlx::query_scalar(
        r#"
        SELECT dm.user_id
        FROM deliberation_members dm
        WHERE dm.deliberation_id = ?
          AND dm.user_id NOT IN (
              SELECT cp.user_id
              FROM cell_participations cp
              JOIN cells c ON c.guid = cp.cell_id
              WHERE c.deliberation_id = ? AND c.tier = 1
          )
        ORDER BY dm.joined_at, dm.user_id
        "#,
    )
    .bind(deliberation_id)
    .bind(deliberation_id)
    .fetch_all(&mut **tx)
    .await?)
}

async fn next_batch(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    deliberation_id: &str,
) -> Result<i64> {
    Ok(sqlx::query_scalar(
        "SELECT COALESCE(MAX(batch), 0) + 1 FROM cells WHERE deliberation_id = ? AND tier = 1",
    )
    .bind(deliberation_id)
    .fetch_one(&mut **tx)
    .await?)
}
