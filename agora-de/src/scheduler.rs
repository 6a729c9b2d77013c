//! Deadline sweep scheduler
//!
//! The engine holds no timers; this task is the clock. On every tick it
//! flips cells whose discussion window elapsed into voting, times out
//! cells whose voting window elapsed, and checks the affected tiers.
//! Failures in one cell never block the rest of the sweep.

use crate::engine::progression;
use crate::error::Result;
use agora_common::db::settings;
use agora_common::events::EventBus;
use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;
use std::collections::BTreeSet;
use tracing::{debug, error, info, warn};

/// Run the sweep loop until the process exits
pub async fn run(db: SqlitePool, events: EventBus) {
    let interval_seconds = match settings::get_tick_interval_seconds(&db).await {
        Ok(seconds) => seconds,
        Err(e) => {
            warn!("Could not read tick interval, using 5s: {}", e);
            5
        }
    };
    info!("Scheduler started with {}s tick interval", interval_seconds);

    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(interval_seconds));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        if let Err(e) = sweep(&db, &events, Utc::now()).await {
            error!("Scheduler sweep failed: {}", e);
        }
    }
}

/// One pass over every open cell's deadlines
///
/// Separated from the loop so tests can drive it with an explicit clock.
pub async fn sweep(db: &SqlitePool, events: &EventBus, now: DateTime<Utc>) -> Result<()> {
    open_elapsed_discussions(db, now).await?;
    timeout_expired_voting(db, events, now).await?;
    Ok(())
}

/// Flip cells whose discussion window has elapsed into voting
async fn open_elapsed_discussions(db: &SqlitePool, now: DateTime<Utc>) -> Result<()> {
    let candidates = sqlx::query_as::<_, (String, DateTime<Utc>, i64)>(
        r#"
        SELECT c.guid, c.discussion_ends_at, d.voting_seconds
        FROM cells c
        JOIN deliberations d ON d.guid = c.deliberation_id
        WHERE c.status = 'deliberating' AND c.discussion_ends_at IS NOT NULL
        "#,
    )
    .fetch_all(db)
    .await?;

    for (cell_id, ends_at, voting_seconds) in candidates {
        if ends_at > now {
            continue;
        }
        let result = sqlx::query(
            r#"
            UPDATE cells SET status = 'voting', voting_ends_at = ?
            WHERE guid = ? AND status = 'deliberating'
            "#,
        )
        .bind(now + Duration::seconds(voting_seconds))
        .bind(&cell_id)
        .execute(db)
        .await?;
        if result.rows_affected() > 0 {
            debug!(cell_id, "Discussion window elapsed, voting opened");
        }
    }

    Ok(())
}

/// Time out cells whose voting window has elapsed, then check their tiers
async fn timeout_expired_voting(
    db: &SqlitePool,
    events: &EventBus,
    now: DateTime<Utc>,
) -> Result<()> {
    let candidates = sqlx::query_as::<_, (String, String, i64, DateTime<Utc>)>(
        r#"
        SELECT guid, deliberation_id, tier, voting_ends_at
        FROM cells
        WHERE status = 'voting' AND voting_ends_at IS NOT NULL
        "#,
    )
    .fetch_all(db)
    .await?;

    let mut touched_tiers: BTreeSet<(String, i64)> = BTreeSet::new();
    for (cell_id, deliberation_id, tier, ends_at) in candidates {
        if ends_at > now {
            continue;
        }
        match progression::process_cell_results(db, events, &cell_id, true, now).await {
            Ok(progression::CellOutcome::Processed { .. }) => {
                touched_tiers.insert((deliberation_id, tier));
            }
            Ok(_) => {}
            Err(e) => {
                warn!(cell_id, error = %e, "Failed to time out cell");
            }
        }
    }

    for (deliberation_id, tier) in touched_tiers {
        if let Err(e) =
            progression::check_tier_completion(db, events, &deliberation_id, tier, now).await
        {
            warn!(deliberation_id, tier, error = %e, "Tier check failed after timeout");
        }
    }

    Ok(())
}
