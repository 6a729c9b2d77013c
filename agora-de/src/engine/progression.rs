//! Tier progression
//!
//! Completes cells, applies elimination and promotion, and advances a
//! deliberation through its tiers until one idea survives. Cell
//! processing is idempotent (a completed cell reports `AlreadyProcessed`)
//! and tier advancement is guarded by a compare-and-set on
//! `current_tier`, so concurrent sweeps and API calls cannot double-run
//! a round.

use crate::engine::allocator::{self, MIN_MEMBERS_PER_CELL};
use crate::engine::{ledger, load_cell, load_deliberation};
use crate::error::{Error, Result};
use agora_common::db::models::{CellStatus, DeliberationPhase, IdeaStatus};
use agora_common::db::settings;
use agora_common::events::{AgoraEvent, EventBus};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::{info, warn};

/// Result of processing one cell
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CellOutcome {
    /// The cell was tallied and closed in this call
    Processed {
        winner_idea_id: Option<String>,
        timed_out: bool,
    },
    /// The cell had already been completed; nothing changed
    AlreadyProcessed,
    /// Seats are still unvoted and no timeout was declared
    NotReady,
}

/// Result of a tier-completion check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TierOutcome {
    /// Wrong phase or tier, or submissions still open; nothing to do
    NotApplicable,
    /// At least one cell at the tier is still open
    CellsOutstanding,
    /// The next tier was allocated
    Advanced { tier: i64, cell_count: usize },
    /// A single survivor became champion
    ChampionCrowned { idea_id: String },
    /// A challenge round ended; the champion was retained or replaced
    ChallengeResolved {
        champion_idea_id: String,
        replaced: bool,
    },
    /// Every idea died out; the deliberation completed without a champion
    CompletedWithoutChampion,
}

/// Tally a cell and apply elimination and promotion
///
/// Without `is_timeout` every seat must be `VOTED`; a timeout tallies
/// whatever votes exist. A cell with zero votes returns its ideas to the
/// accumulation pool with no loss charged. Pending revisions scoped to
/// the cell are rejected when it closes.
pub async fn process_cell_results(
    db: &SqlitePool,
    events: &EventBus,
    cell_id: &str,
    is_timeout: bool,
    now: DateTime<Utc>,
) -> Result<CellOutcome> {
    let max_losses = settings::get_idea_max_losses(db).await?;

    let mut tx = db.begin().await?;

    let cell = load_cell(&mut tx, cell_id).await?;
    if cell.status == CellStatus::Completed {
        return Ok(CellOutcome::AlreadyProcessed);
    }

    let deliberation = load_deliberation(&mut tx, &cell.deliberation_id).await?;

    if !is_timeout {
        let active: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM cell_participations WHERE cell_id = ? AND status = 'active'",
        )
        .bind(cell_id)
        .fetch_one(&mut *tx)
        .await?;
        if active > 0 {
            return Ok(CellOutcome::NotReady);
        }
    }

    let (winner, tallies) = ledger::tally_cell(&mut tx, cell_id).await?;

    match winner.as_deref() {
        None => {
            // Nobody voted: ideas go back to the pool, no loss charged.
            for row in &tallies {
                sqlx::query("UPDATE ideas SET status = ? WHERE guid = ?")
                    .bind(IdeaStatus::Pending)
                    .bind(&row.idea_id)
                    .execute(&mut *tx)
                    .await?;
            }
        }
        Some(winner_id) => {
            sqlx::query("UPDATE ideas SET status = ? WHERE guid = ?")
                .bind(IdeaStatus::Advancing)
                .bind(winner_id)
                .execute(&mut *tx)
                .await?;

            let challenge_round = deliberation.challenge_round > 0;
            for row in tallies.iter().filter(|r| r.idea_id != winner_id) {
                if challenge_round && deliberation.accumulation_enabled {
                    // Challenge losers keep returning to the pool until
                    // their loss allowance runs out.
                    sqlx::query(
                        r#"
                        UPDATE ideas
                        SET loss_count = loss_count + 1,
                            status = CASE
                                WHEN loss_count + 1 >= ? THEN 'eliminated'
                                ELSE 'pending'
                            END
                        WHERE guid = ?
                        "#,
                    )
                    .bind(max_losses)
                    .bind(&row.idea_id)
                    .execute(&mut *tx)
                    .await?;
                } else {
                    sqlx::query(
                        "UPDATE ideas SET loss_count = loss_count + 1, status = ? WHERE guid = ?",
                    )
                    .bind(IdeaStatus::Eliminated)
                    .bind(&row.idea_id)
                    .execute(&mut *tx)
                    .await?;
                }
            }
        }
    }

    sqlx::query("UPDATE cells SET status = ?, winner_idea_id = ? WHERE guid = ?")
        .bind(CellStatus::Completed)
        .bind(winner.as_deref())
        .bind(cell_id)
        .execute(&mut *tx)
        .await?;

    // A closed cell can no longer host revision voting.
    let rejected_revisions = sqlx::query_as::<_, (String, String)>(
        "SELECT guid, idea_id FROM idea_revisions WHERE cell_id = ? AND status = 'pending'",
    )
    .bind(cell_id)
    .fetch_all(&mut *tx)
    .await?;
    if !rejected_revisions.is_empty() {
        sqlx::query(
            "UPDATE idea_revisions SET status = 'rejected', resolved_at = ? WHERE cell_id = ? AND status = 'pending'",
        )
        .bind(now)
        .bind(cell_id)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    info!(
        cell_id,
        tier = cell.tier,
        winner = winner.as_deref().unwrap_or("none"),
        timed_out = is_timeout,
        "Cell completed"
    );

    events.emit_lossy(AgoraEvent::CellCompleted {
        deliberation_id: cell.deliberation_id.clone(),
        cell_id: cell_id.to_string(),
        tier: cell.tier,
        winner_idea_id: winner.clone(),
        timed_out: is_timeout,
        timestamp: now,
    });
    for (revision_id, idea_id) in rejected_revisions {
        events.emit_lossy(AgoraEvent::RevisionResolved {
            revision_id,
            idea_id,
            approved: false,
            timestamp: now,
        });
    }

    Ok(CellOutcome::Processed {
        winner_idea_id: winner,
        timed_out: is_timeout,
    })
}

/// Advance the deliberation once every cell at a tier has completed
///
/// One survivor crowns a champion (or resolves a challenge round); a
/// handful fight a showdown cell; more re-allocate at the next tier.
pub async fn check_tier_completion(
    db: &SqlitePool,
    events: &EventBus,
    deliberation_id: &str,
    tier: i64,
    now: DateTime<Utc>,
) -> Result<TierOutcome> {
    let mut tx = db.begin().await?;

    let deliberation = load_deliberation(&mut tx, deliberation_id).await?;
    if deliberation.phase != DeliberationPhase::Voting || deliberation.current_tier != tier {
        return Ok(TierOutcome::NotApplicable);
    }
    // With submissions open, tier 1 can still grow new cells.
    if deliberation.submissions_open {
        return Ok(TierOutcome::NotApplicable);
    }

    let (total, open): (i64, i64) = sqlx::query_as(
        r#"
        SELECT COUNT(*), COALESCE(SUM(status != 'completed'), 0)
        FROM cells
        WHERE deliberation_id = ? AND tier = ?
        "#,
    )
    .bind(deliberation_id)
    .bind(tier)
    .fetch_one(&mut *tx)
    .await?;
    if total == 0 {
        return Ok(TierOutcome::NotApplicable);
    }
    if open > 0 {
        return Ok(TierOutcome::CellsOutstanding);
    }

    let survivor_ids: Vec<String> = sqlx::query_scalar(
        r#"
        SELECT guid FROM ideas
        WHERE deliberation_id = ? AND status = 'advancing'
        ORDER BY submitted_at, guid
        "#,
    )
    .bind(deliberation_id)
    .fetch_all(&mut *tx)
    .await?;

    match survivor_ids.len() {
        0 => {
            if deliberation.challenge_round > 0 {
                // A challenge round that starves out retains the champion.
                let champion_id = deliberation.champion_idea_id.clone().ok_or_else(|| {
                    Error::Internal(format!(
                        "Challenge round without champion in {}",
                        deliberation_id
                    ))
                })?;
                sqlx::query("UPDATE ideas SET status = ? WHERE guid = ?")
                    .bind(IdeaStatus::Winner)
                    .bind(&champion_id)
                    .execute(&mut *tx)
                    .await?;
                sqlx::query(
                    "UPDATE deliberations SET phase = ?, updated_at = ? WHERE guid = ?",
                )
                .bind(DeliberationPhase::Accumulating)
                .bind(now)
                .bind(deliberation_id)
                .execute(&mut *tx)
                .await?;
                tx.commit().await?;

                events.emit_lossy(AgoraEvent::ChallengeResolved {
                    deliberation_id: deliberation_id.to_string(),
                    champion_idea_id: champion_id.clone(),
                    replaced: false,
                    timestamp: now,
                });
                Ok(TierOutcome::ChallengeResolved {
                    champion_idea_id: champion_id,
                    replaced: false,
                })
            } else {
                sqlx::query(
                    "UPDATE deliberations SET phase = ?, updated_at = ? WHERE guid = ?",
                )
                .bind(DeliberationPhase::Completed)
                .bind(now)
                .bind(deliberation_id)
                .execute(&mut *tx)
                .await?;
                tx.commit().await?;

                warn!(deliberation_id, "Deliberation completed without a champion");
                events.emit_lossy(AgoraEvent::DeliberationCompleted {
                    deliberation_id: deliberation_id.to_string(),
                    champion_idea_id: None,
                    timestamp: now,
                });
                Ok(TierOutcome::CompletedWithoutChampion)
            }
        }
        1 => {
            let champion_id = survivor_ids[0].clone();
            crown_champion(&mut tx, &deliberation, &champion_id, now).await?;
            tx.commit().await?;

            if deliberation.challenge_round > 0 {
                let replaced =
                    deliberation.champion_idea_id.as_deref() != Some(champion_id.as_str());
                info!(deliberation_id, champion_id, replaced, "Challenge resolved");
                events.emit_lossy(AgoraEvent::ChallengeResolved {
                    deliberation_id: deliberation_id.to_string(),
                    champion_idea_id: champion_id.clone(),
                    replaced,
                    timestamp: now,
                });
                Ok(TierOutcome::ChallengeResolved {
                    champion_idea_id: champion_id,
                    replaced,
                })
            } else {
                info!(deliberation_id, champion_id, "Champion crowned");
                events.emit_lossy(AgoraEvent::ChampionCrowned {
                    deliberation_id: deliberation_id.to_string(),
                    idea_id: champion_id.clone(),
                    timestamp: now,
                });
                if !deliberation.accumulation_enabled {
                    events.emit_lossy(AgoraEvent::DeliberationCompleted {
                        deliberation_id: deliberation_id.to_string(),
                        champion_idea_id: Some(champion_id.clone()),
                        timestamp: now,
                    });
                }
                Ok(TierOutcome::ChampionCrowned {
                    idea_id: champion_id,
                })
            }
        }
        n if n as i64 <= deliberation.cell_size => {
            // Few enough survivors for one final showdown, judged by
            // everyone who has voted so far.
            let next_tier = tier + 1;
            if !advance_tier(&mut tx, deliberation_id, tier, now).await? {
                return Ok(TierOutcome::NotApplicable);
            }

            let voter_ids: Vec<String> = sqlx::query_scalar(
                r#"
                SELECT DISTINCT v.user_id
                FROM votes v
                JOIN cells c ON c.guid = v.cell_id
                WHERE c.deliberation_id = ?
                ORDER BY v.user_id
                "#,
            )
            .bind(deliberation_id)
            .fetch_all(&mut *tx)
            .await?;

            let opened = allocator::allocate_showdown(
                &mut tx,
                &deliberation,
                next_tier,
                &survivor_ids,
                &voter_ids,
                now,
            )
            .await?;
            tx.commit().await?;

            info!(deliberation_id, tier = next_tier, "Showdown cell opened");
            emit_tier_advanced(events, deliberation_id, next_tier, &[opened], now);
            Ok(TierOutcome::Advanced {
                tier: next_tier,
                cell_count: 1,
            })
        }
        _ => {
            let next_tier = tier + 1;
            if !advance_tier(&mut tx, deliberation_id, tier, now).await? {
                return Ok(TierOutcome::NotApplicable);
            }

            // Seat the members who took part so far, voters first.
            let member_ids: Vec<String> = sqlx::query_scalar(
                r#"
                SELECT cp.user_id
                FROM cell_participations cp
                JOIN cells c ON c.guid = cp.cell_id
                WHERE c.deliberation_id = ?
                GROUP BY cp.user_id
                ORDER BY MAX(cp.status = 'voted') DESC, cp.user_id
                "#,
            )
            .bind(deliberation_id)
            .fetch_all(&mut *tx)
            .await?;

            let plan = allocator::allocate_cells(
                &mut tx,
                &deliberation,
                next_tier,
                1,
                &survivor_ids,
                &member_ids,
                now,
            )
            .await?;
            let cell_count = plan.opened.len();
            tx.commit().await?;

            info!(deliberation_id, tier = next_tier, cell_count, "Tier advanced");
            emit_tier_advanced(events, deliberation_id, next_tier, &plan.opened, now);
            Ok(TierOutcome::Advanced {
                tier: next_tier,
                cell_count,
            })
        }
    }
}

/// Open a deliberation's ladder: end submissions, allocate tier 1
pub async fn start_voting_phase(
    db: &SqlitePool,
    events: &EventBus,
    deliberation_id: &str,
    now: DateTime<Utc>,
) -> Result<usize> {
    let mut tx = db.begin().await?;

    let deliberation = load_deliberation(&mut tx, deliberation_id).await?;
    if deliberation.phase != DeliberationPhase::Submission {
        return Err(Error::InvalidPhase(format!(
            "Cannot start voting from phase {}",
            deliberation.phase
        )));
    }

    let idea_ids: Vec<String> = sqlx::query_scalar(
        r#"
        SELECT guid FROM ideas
        WHERE deliberation_id = ? AND status = 'submitted'
        ORDER BY submitted_at, guid
        "#,
    )
    .bind(deliberation_id)
    .fetch_all(&mut *tx)
    .await?;
    if idea_ids.len() < 2 {
        return Err(Error::InsufficientIdeas(format!(
            "Need at least 2 submitted ideas, have {}",
            idea_ids.len()
        )));
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
    if member_ids.len() < MIN_MEMBERS_PER_CELL {
        return Err(Error::InsufficientMembers(format!(
            "Need at least {} members, have {}",
            MIN_MEMBERS_PER_CELL,
            member_ids.len()
        )));
    }

    // Continuous flow keeps the submission window open through tier 1;
    // only full cells form now, the rest wait for more ideas.
    let cell_size = deliberation.cell_size.max(2) as usize;
    let allocatable: &[String] = if deliberation.continuous_flow {
        let full_cells =
            (idea_ids.len() / cell_size).min(member_ids.len() / MIN_MEMBERS_PER_CELL);
        &idea_ids[..full_cells * cell_size]
    } else {
        &idea_ids[..]
    };

    sqlx::query(
        r#"
        UPDATE deliberations
        SET phase = ?, current_tier = 1, submissions_open = ?, updated_at = ?
        WHERE guid = ?
        "#,
    )
    .bind(DeliberationPhase::Voting)
    .bind(deliberation.continuous_flow)
    .bind(now)
    .bind(deliberation_id)
    .execute(&mut *tx)
    .await?;

    let plan =
        allocator::allocate_cells(&mut tx, &deliberation, 1, 1, allocatable, &member_ids, now)
            .await?;
    let cell_count = plan.opened.len();
    tx.commit().await?;

    info!(deliberation_id, cell_count, "Voting started");
    events.emit_lossy(AgoraEvent::VotingStarted {
        deliberation_id: deliberation_id.to_string(),
        cell_count,
        timestamp: now,
    });
    for opened in &plan.opened {
        emit_cell_opened(events, deliberation_id, opened, now);
    }

    Ok(cell_count)
}

/// Crown a sole survivor and settle the deliberation's next phase
async fn crown_champion(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    deliberation: &agora_common::db::models::Deliberation,
    champion_id: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    if let Some(old_champion) = deliberation.champion_idea_id.as_deref() {
        if old_champion != champion_id {
            sqlx::query("UPDATE ideas SET is_champion = 0 WHERE guid = ?")
                .bind(old_champion)
                .execute(&mut **tx)
                .await?;
        }
    }

    sqlx::query("UPDATE ideas SET status = ?, is_champion = 1 WHERE guid = ?")
        .bind(IdeaStatus::Winner)
        .bind(champion_id)
        .execute(&mut **tx)
        .await?;

    let next_phase = if deliberation.accumulation_enabled {
        DeliberationPhase::Accumulating
    } else {
        DeliberationPhase::Completed
    };
    sqlx::query(
        "UPDATE deliberations SET phase = ?, champion_idea_id = ?, updated_at = ? WHERE guid = ?",
    )
    .bind(next_phase)
    .bind(champion_id)
    .bind(now)
    .bind(&deliberation.guid)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Compare-and-set tier advance; false means another caller won the race
async fn advance_tier(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    deliberation_id: &str,
    from_tier: i64,
    now: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE deliberations
        SET current_tier = current_tier + 1, updated_at = ?
        WHERE guid = ? AND current_tier = ?
        "#,
    )
    .bind(now)
    .bind(deliberation_id)
    .bind(from_tier)
    .execute(&mut **tx)
    .await?;
    Ok(result.rows_affected() > 0)
}

fn emit_tier_advanced(
    events: &EventBus,
    deliberation_id: &str,
    tier: i64,
    opened: &[allocator::OpenedCell],
    now: DateTime<Utc>,
) {
    events.emit_lossy(AgoraEvent::TierAdvanced {
        deliberation_id: deliberation_id.to_string(),
        tier,
        cell_count: opened.len(),
        timestamp: now,
    });
    for cell in opened {
        emit_cell_opened(events, deliberation_id, cell, now);
    }
}

pub(crate) fn emit_cell_opened(
    events: &EventBus,
    deliberation_id: &str,
    opened: &allocator::OpenedCell,
    now: DateTime<Utc>,
) {
    events.emit_lossy(AgoraEvent::CellOpened {
        deliberation_id: deliberation_id.to_string(),
        cell_id: opened.cell_id.clone(),
        tier: opened.tier,
        idea_count: opened.idea_count,
        member_count: opened.member_count,
        timestamp: now,
    });
}
