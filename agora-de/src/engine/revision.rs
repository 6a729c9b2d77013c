//! Idea revision consensus
//!
//! Seated participants may propose a rewording of an idea in their open
//! cell. The other participants approve or reject; reaching the
//! configured consensus overwrites the idea text in place. Votes already
//! cast on the idea are untouched. At most one revision per idea may be
//! pending, and proposers cannot vote on their own proposal.

use crate::engine::load_cell;
use crate::error::{Error, Result};
use agora_common::db::models::{CellStatus, IdeaRevision, RevisionStatus};
use agora_common::db::settings::{self, RevisionPolicy};
use agora_common::events::{AgoraEvent, EventBus};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::info;

/// Approvals needed from the other participants under a policy
pub fn required_approvals(policy: RevisionPolicy, fraction: f64, others: i64) -> i64 {
    match policy {
        RevisionPolicy::Threshold => ((fraction * others as f64).ceil() as i64).max(1),
        RevisionPolicy::Unanimous => others.max(1),
    }
}

/// Propose a revision to an idea in an open cell
pub async fn propose_revision(
    db: &SqlitePool,
    events: &EventBus,
    cell_id: &str,
    idea_id: &str,
    proposed_by: &str,
    text: &str,
    now: DateTime<Utc>,
) -> Result<IdeaRevision> {
    if text.trim().is_empty() {
        return Err(Error::BadRequest(
            "Revision text must not be empty".to_string(),
        ));
    }

    let policy = settings::get_revision_policy(db).await?;
    let fraction = settings::get_revision_approval_fraction(db).await?;

    let mut tx = db.begin().await?;

    let cell = load_cell(&mut tx, cell_id).await?;
    if cell.status == CellStatus::Completed {
        return Err(Error::InvalidAllocation(
            "Cell has already completed".to_string(),
        ));
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

    let seated: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM cell_participations WHERE cell_id = ? AND user_id = ?",
    )
    .bind(cell_id)
    .bind(proposed_by)
    .fetch_one(&mut *tx)
    .await?;
    if seated == 0 {
        return Err(Error::InvalidAllocation(format!(
            "User {} holds no seat in cell {}",
            proposed_by, cell_id
        )));
    }

    let pending: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM idea_revisions WHERE idea_id = ? AND status = 'pending'",
    )
    .bind(idea_id)
    .fetch_one(&mut *tx)
    .await?;
    if pending > 0 {
        return Err(Error::RevisionConflict(format!(
            "Idea {} already has a pending revision",
            idea_id
        )));
    }

    let others: i64 =
        sqlx::query_scalar("SELECT COUNT(*) - 1 FROM cell_participations WHERE cell_id = ?")
            .bind(cell_id)
            .fetch_one(&mut *tx)
            .await?;
    let required = required_approvals(policy, fraction, others.max(0));

    let revision = IdeaRevision {
        guid: uuid::Uuid::new_v4().to_string(),
        idea_id: idea_id.to_string(),
        cell_id: cell_id.to_string(),
        proposed_by: proposed_by.to_string(),
        text: text.to_string(),
        status: RevisionStatus::Pending,
        required_approvals: required,
        created_at: now,
        resolved_at: None,
    };

    sqlx::query(
        r#"
        INSERT INTO idea_revisions
            (guid, idea_id, cell_id, proposed_by, text, status,
             required_approvals, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&revision.guid)
    .bind(idea_id)
    .bind(cell_id)
    .bind(proposed_by)
    .bind(text)
    .bind(RevisionStatus::Pending)
    .bind(required)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    info!(cell_id, idea_id, revision_id = revision.guid, "Revision proposed");
    events.emit_lossy(AgoraEvent::RevisionProposed {
        revision_id: revision.guid.clone(),
        idea_id: idea_id.to_string(),
        cell_id: cell_id.to_string(),
        timestamp: now,
    });

    Ok(revision)
}

/// Vote on a pending revision
///
/// Returns the revision status after the vote. Consensus flips the
/// revision approved and rewrites the idea text in the same transaction;
/// under the unanimous policy a single rejection resolves it rejected.
pub async fn vote_on_revision(
    db: &SqlitePool,
    events: &EventBus,
    revision_id: &str,
    user_id: &str,
    approve: bool,
    now: DateTime<Utc>,
) -> Result<RevisionStatus> {
    let policy = settings::get_revision_policy(db).await?;

    let mut tx = db.begin().await?;

    let revision =
        sqlx::query_as::<_, IdeaRevision>("SELECT * FROM idea_revisions WHERE guid = ?")
            .bind(revision_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Revision not found: {}", revision_id)))?;

    if revision.status != RevisionStatus::Pending {
        return Err(Error::RevisionConflict(
            "Revision has already been resolved".to_string(),
        ));
    }
    if revision.proposed_by == user_id {
        return Err(Error::RevisionConflict(
            "Proposers cannot vote on their own revision".to_string(),
        ));
    }

    let seated: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM cell_participations WHERE cell_id = ? AND user_id = ?",
    )
    .bind(&revision.cell_id)
    .bind(user_id)
    .fetch_one(&mut *tx)
    .await?;
    if seated == 0 {
        return Err(Error::InvalidAllocation(format!(
            "User {} holds no seat in cell {}",
            user_id, revision.cell_id
        )));
    }

    sqlx::query(
        r#"
        INSERT INTO idea_revision_votes (revision_id, user_id, approve, created_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(revision_id, user_id) DO UPDATE SET approve = excluded.approve
        "#,
    )
    .bind(revision_id)
    .bind(user_id)
    .bind(approve)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    let (approvals, rejections): (i64, i64) = sqlx::query_as(
        r#"
        SELECT COALESCE(SUM(approve = 1), 0), COALESCE(SUM(approve = 0), 0)
        FROM idea_revision_votes
        WHERE revision_id = ?
        "#,
    )
    .bind(revision_id)
    .fetch_one(&mut *tx)
    .await?;

    let resolved = if policy == RevisionPolicy::Unanimous && rejections > 0 {
        Some(RevisionStatus::Rejected)
    } else if approvals >= revision.required_approvals {
        Some(RevisionStatus::Approved)
    } else {
        None
    };

    let status = match resolved {
        None => {
            tx.commit().await?;
            RevisionStatus::Pending
        }
        Some(final_status) => {
            if final_status == RevisionStatus::Approved {
                sqlx::query("UPDATE ideas SET text = ? WHERE guid = ?")
                    .bind(&revision.text)
                    .bind(&revision.idea_id)
                    .execute(&mut *tx)
                    .await?;
            }
            sqlx::query(
                "UPDATE idea_revisions SET status = ?, resolved_at = ? WHERE guid = ?",
            )
            .bind(final_status)
            .bind(now)
            .bind(revision_id)
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;

            info!(
                revision_id,
                idea_id = revision.idea_id,
                approved = final_status == RevisionStatus::Approved,
                "Revision resolved"
            );
            events.emit_lossy(AgoraEvent::RevisionResolved {
                revision_id: revision_id.to_string(),
                idea_id: revision.idea_id.clone(),
                approved: final_status == RevisionStatus::Approved,
                timestamp: now,
            });
            final_status
        }
    };

    Ok(status)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_rounds_up() {
        // 0.3 of 4 others is 1.2, so 2 approvals are needed
        assert_eq!(required_approvals(RevisionPolicy::Threshold, 0.3, 4), 2);
        assert_eq!(required_approvals(RevisionPolicy::Threshold, 0.3, 10), 3);
        assert_eq!(required_approvals(RevisionPolicy::Threshold, 0.5, 3), 2);
    }

    #[test]
    fn test_threshold_never_below_one() {
        assert_eq!(required_approvals(RevisionPolicy::Threshold, 0.3, 1), 1);
        assert_eq!(required_approvals(RevisionPolicy::Threshold, 0.0, 5), 1);
        assert_eq!(required_approvals(RevisionPolicy::Threshold, 0.3, 0), 1);
    }

    #[test]
    fn test_unanimous_requires_all_others() {
        assert_eq!(required_approvals(RevisionPolicy::Unanimous, 0.3, 4), 4);
        assert_eq!(required_approvals(RevisionPolicy::Unanimous, 0.3, 1), 1);
        assert_eq!(required_approvals(RevisionPolicy::Unanimous, 0.3, 0), 1);
    }
}
