//! Test fixtures for deliberation engine integration tests
//!
//! Builds real temp-file databases with the full schema and walks
//! deliberations through their phases with the engine's own operations.

#![allow(dead_code)]

use agora_common::db::init::init_database;
use agora_common::db::models::Deliberation;
use agora_common::events::EventBus;
use agora_de::db::deliberations::{self, NewDeliberation};
use agora_de::engine::{flow, ledger};
use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;
use tempfile::TempDir;

/// Temp-file database; dropping the struct removes the file
pub struct TestDb {
    pub pool: SqlitePool,
    _dir: TempDir,
}

/// Create a fresh database with the full schema and seeded settings
pub async fn setup_db() -> TestDb {
    let dir = tempfile::tempdir().expect("create temp dir");
    let pool = init_database(&dir.path().join("agora.db"))
        .await
        .expect("init database");
    TestDb { pool, _dir: dir }
}

pub fn event_bus() -> EventBus {
    EventBus::new(100)
}

/// Deliberation with explicit sizing; no discussion window, 1h voting
pub async fn create_deliberation(
    db: &SqlitePool,
    cell_size: i64,
    vote_budget: i64,
    continuous_flow: bool,
    accumulation_enabled: bool,
    now: DateTime<Utc>,
) -> Deliberation {
    deliberations::create_deliberation(
        db,
        &NewDeliberation {
            question: "What should we build next?".to_string(),
            cell_size,
            vote_budget,
            discussion_seconds: 0,
            voting_seconds: 3600,
            continuous_flow,
            accumulation_enabled,
        },
        now,
    )
    .await
    .expect("create deliberation")
}

/// Join `count` members named user-00, user-01, ...
pub async fn add_members(
    db: &SqlitePool,
    deliberation_id: &str,
    count: usize,
    now: DateTime<Utc>,
) -> Vec<String> {
    let mut users = Vec::with_capacity(count);
    for i in 0..count {
        let user_id = format!("user-{:02}", i);
        deliberations::add_member(db, deliberation_id, &user_id, now)
            .await
            .expect("add member");
        users.push(user_id);
    }
    users
}

/// Submit one idea per author, spaced a second apart for stable ordering
pub async fn submit_one_idea_each(
    db: &SqlitePool,
    events: &EventBus,
    deliberation_id: &str,
    authors: &[String],
    now: DateTime<Utc>,
) -> Vec<String> {
    let mut idea_ids = Vec::with_capacity(authors.len());
    for (i, author) in authors.iter().enumerate() {
        let idea = flow::submit_idea(
            db,
            events,
            deliberation_id,
            author,
            &format!("Idea from {}", author),
            now + Duration::seconds(i as i64),
        )
        .await
        .expect("submit idea");
        idea_ids.push(idea.guid);
    }
    idea_ids
}

/// Seated user ids of a cell, in join order
pub async fn cell_participants(db: &SqlitePool, cell_id: &str) -> Vec<String> {
    sqlx::query_scalar(
        "SELECT user_id FROM cell_participations WHERE cell_id = ? ORDER BY joined_at, user_id",
    )
    .bind(cell_id)
    .fetch_all(db)
    .await
    .expect("list participants")
}

/// Idea ids dealt to a cell
pub async fn cell_idea_ids(db: &SqlitePool, cell_id: &str) -> Vec<String> {
    sqlx::query_scalar("SELECT idea_id FROM cell_ideas WHERE cell_id = ? ORDER BY idea_id")
        .bind(cell_id)
        .fetch_all(db)
        .await
        .expect("list cell ideas")
}

/// Every participant spends the full budget on one idea
///
/// When this empties the cell's active seats the engine processes the
/// cell and checks the tier inside the final vote.
pub async fn vote_cell_unanimous(
    db: &SqlitePool,
    events: &EventBus,
    cell_id: &str,
    idea_id: &str,
    budget: i64,
    now: DateTime<Utc>,
) {
    for user_id in cell_participants(db, cell_id).await {
        ledger::cast_vote(db, events, cell_id, &user_id, idea_id, budget, now)
            .await
            .expect("cast vote");
    }
}
