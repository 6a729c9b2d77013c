//! Cell allocation
//!
//! Partitions a pool of ideas and members into voting cells for one tier.
//! Cells are filled to `cell_size` ideas; a trailing remainder of at least
//! two ideas opens one final smaller cell, while a lone leftover idea goes
//! to the accumulation pool. The cell count is also bounded by members:
//! every cell needs at least three seated members. Members are dealt
//! round-robin across cells, capped at `cell_size` seats per cell; surplus
//! members stay unseated and remain eligible at the next tier.
//!
//! Runs inside the caller's transaction. Events are returned to the caller
//! for emission after commit.

use crate::error::Result;
use agora_common::db::models::{CellStatus, Deliberation, IdeaStatus};
use chrono::{DateTime, Duration, Utc};
use sqlx::{Sqlite, Transaction};
use uuid::Uuid;

/// Minimum seated members for a cell to function
pub const MIN_MEMBERS_PER_CELL: usize = 3;

/// A cell created by the allocator, reported for event emission
#[derive(Debug, Clone)]
pub struct OpenedCell {
    pub cell_id: String,
    pub tier: i64,
    pub idea_count: usize,
    pub member_count: usize,
}

/// Outcome of one allocation pass
#[derive(Debug, Default)]
pub struct CellPlan {
    pub opened: Vec<OpenedCell>,
    pub pending_idea_ids: Vec<String>,
    pub unseated_member_ids: Vec<String>,
}

/// Number of cells a pool of ideas and members supports
pub fn plan_cell_count(idea_count: usize, member_count: usize, cell_size: usize) -> usize {
    let by_ideas = idea_count / cell_size + usize::from(idea_count % cell_size >= 2);
    let by_members = member_count / MIN_MEMBERS_PER_CELL;
    by_ideas.min(by_members)
}

/// Allocate one tier's worth of cells
///
/// Ideas that do not fit the plan are parked in the accumulation pool
/// (`PENDING`). Placed ideas become `IN_VOTING` with `tier_reached` set.
pub async fn allocate_cells(
    tx: &mut Transaction<'_, Sqlite>,
    deliberation: &Deliberation,
    tier: i64,
    batch: i64,
    idea_ids: &[String],
    member_ids: &[String],
    now: DateTime<Utc>,
) -> Result<CellPlan> {
    let cell_size = deliberation.cell_size.max(2) as usize;
    let cell_count = plan_cell_count(idea_ids.len(), member_ids.len(), cell_size);

    let mut plan = CellPlan::default();

    if cell_count == 0 {
        for idea_id in idea_ids {
            park_idea(tx, idea_id).await?;
            plan.pending_idea_ids.push(idea_id.clone());
        }
        plan.unseated_member_ids = member_ids.to_vec();
        return Ok(plan);
    }

    // Deal ideas sequentially: cell 0 fills first, overflow goes pending.
    let mut cell_ideas: Vec<Vec<&String>> = vec![Vec::new(); cell_count];
    for (i, idea_id) in idea_ids.iter().enumerate() {
        let slot = i / cell_size;
        if slot < cell_count {
            cell_ideas[slot].push(idea_id);
        } else {
            plan.pending_idea_ids.push(idea_id.clone());
        }
    }

    // Deal members round-robin, capped at cell_size seats per cell.
    let mut cell_members: Vec<Vec<&String>> = vec![Vec::new(); cell_count];
    for (i, member_id) in member_ids.iter().enumerate() {
        let slot = i % cell_count;
        if cell_members[slot].len() < cell_size {
            cell_members[slot].push(member_id);
        } else {
            plan.unseated_member_ids.push(member_id.clone());
        }
    }

    for (ideas, members) in cell_ideas.iter().zip(cell_members.iter()) {
        let opened = create_cell(tx, deliberation, tier, batch, ideas, members, now).await?;
        plan.opened.push(opened);
    }

    for idea_id in &plan.pending_idea_ids {
        park_idea(tx, idea_id).await?;
    }

    Ok(plan)
}

/// Allocate the single showdown cell for a final round
///
/// Holds every surviving idea and seats every listed member with no
/// capacity cap.
pub async fn allocate_showdown(
    tx: &mut Transaction<'_, Sqlite>,
    deliberation: &Deliberation,
    tier: i64,
    idea_ids: &[String],
    member_ids: &[String],
    now: DateTime<Utc>,
) -> Result<OpenedCell> {
    let ideas: Vec<&String> = idea_ids.iter().collect();
    let members: Vec<&String> = member_ids.iter().collect();
    create_cell(tx, deliberation, tier, 1, &ideas, &members, now).await
}

/// Create one cell with the given ideas and seats
async fn create_cell(
    tx: &mut Transaction<'_, Sqlite>,
    deliberation: &Deliberation,
    tier: i64,
    batch: i64,
    idea_ids: &[&String],
    member_ids: &[&String],
    now: DateTime<Utc>,
) -> Result<OpenedCell> {
    let cell_id = Uuid::new_v4().to_string();

    let (status, discussion_ends_at, voting_ends_at) = if deliberation.discussion_seconds > 0 {
        (
            CellStatus::Deliberating,
            Some(now + Duration::seconds(deliberation.discussion_seconds)),
            None,
        )
    } else {
        (
            CellStatus::Voting,
            None,
            Some(now + Duration::seconds(deliberation.voting_seconds)),
        )
    };

    sqlx::query(
        r#"
        INSERT INTO cells
            (guid, deliberation_id, tier, batch, status,
             discussion_ends_at, voting_ends_at, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&cell_id)
    .bind(&deliberation.guid)
    .bind(tier)
    .bind(batch)
    .bind(status)
    .bind(discussion_ends_at)
    .bind(voting_ends_at)
    .bind(now)
    .execute(&mut **tx)
    .await?;

    for idea_id in idea_ids {
        sqlx::query("INSERT INTO cell_ideas (cell_id, idea_id) VALUES (?, ?)")
            .bind(&cell_id)
            .bind(idea_id.as_str())
            .execute(&mut **tx)
            .await?;

        sqlx::query("UPDATE ideas SET status = ?, tier_reached = ? WHERE guid = ?")
            .bind(IdeaStatus::InVoting)
            .bind(tier)
            .bind(idea_id.as_str())
            .execute(&mut **tx)
            .await?;
    }

    for member_id in member_ids {
        sqlx::query(
            r#"
            INSERT INTO cell_participations (cell_id, user_id, status, joined_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&cell_id)
        .bind(member_id.as_str())
        .bind(agora_common::db::models::ParticipationStatus::Active)
        .bind(now)
        .execute(&mut **tx)
        .await?;
    }

    Ok(OpenedCell {
        cell_id,
        tier,
        idea_count: idea_ids.len(),
        member_count: member_ids.len(),
    })
}

/// Move an unplaceable idea to the accumulation pool
async fn park_idea(tx: &mut Transaction<'_, Sqlite>, idea_id: &str) -> Result<()> {
    sqlx::query("UPDATE ideas SET status = ? WHERE guid = ?")
        .bind(IdeaStatus::Pending)
        .bind(idea_id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_multiples_pack_fully() {
        assert_eq!(plan_cell_count(25, 100, 5), 5);
        assert_eq!(plan_cell_count(10, 30, 5), 2);
        assert_eq!(plan_cell_count(5, 5, 5), 1);
    }

    #[test]
    fn test_remainder_of_two_or_more_opens_final_cell() {
        assert_eq!(plan_cell_count(7, 100, 5), 2);
        assert_eq!(plan_cell_count(12, 100, 5), 3);
    }

    #[test]
    fn test_lone_remainder_goes_to_pool() {
        assert_eq!(plan_cell_count(6, 100, 5), 1);
        assert_eq!(plan_cell_count(11, 100, 5), 2);
    }

    #[test]
    fn test_member_bound_caps_cells() {
        // 25 ideas want 5 cells but 9 members only staff 3
        assert_eq!(plan_cell_count(25, 9, 5), 3);
        // Fewer than three members staff nothing
        assert_eq!(plan_cell_count(10, 2, 5), 0);
    }

    #[test]
    fn test_too_few_ideas() {
        assert_eq!(plan_cell_count(1, 100, 5), 0);
        assert_eq!(plan_cell_count(0, 100, 5), 0);
        // Two ideas are enough for one small cell
        assert_eq!(plan_cell_count(2, 3, 5), 1);
    }
}
