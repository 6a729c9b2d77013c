//! Deadline sweep tests
//!
//! Drives `scheduler::sweep` with an explicit clock to cover voting
//! timeouts, discussion windows, and deadline-driven tier advancement.

mod helpers;

use agora_common::db::models::{CellStatus, DeliberationPhase, IdeaStatus};
use agora_de::db::deliberations::{self, NewDeliberation};
use agora_de::db::{cells, ideas};
use agora_de::engine::{ledger, progression};
use agora_de::error::Error;
use agora_de::scheduler;
use chrono::{Duration, Utc};

#[tokio::test]
async fn test_sweep_times_out_expired_voting() {
    let test_db = helpers::setup_db().await;
    let events = helpers::event_bus();
    let now = Utc::now();

    let deliberation =
        helpers::create_deliberation(&test_db.pool, 5, 10, false, false, now).await;
    let users = helpers::add_members(&test_db.pool, &deliberation.guid, 5, now).await;
    helpers::submit_one_idea_each(&test_db.pool, &events, &deliberation.guid, &users, now).await;
    progression::start_voting_phase(&test_db.pool, &events, &deliberation.guid, now)
        .await
        .expect("start voting");
    let cell = cells::list_cells_at_tier(&test_db.pool, &deliberation.guid, 1)
        .await
        .unwrap()
        .remove(0);
    let idea_ids = helpers::cell_idea_ids(&test_db.pool, &cell.guid).await;
    let voters = helpers::cell_participants(&test_db.pool, &cell.guid).await;

    // A single vote before the deadline decides the cell.
    ledger::cast_vote(&test_db.pool, &events, &cell.guid, &voters[0], &idea_ids[0], 10, now)
        .await
        .unwrap();

    // Before the deadline the sweep leaves the cell alone.
    scheduler::sweep(&test_db.pool, &events, now + Duration::seconds(10))
        .await
        .expect("early sweep");
    let open = cells::get_cell(&test_db.pool, &cell.guid).await.unwrap();
    assert_eq!(open.status, CellStatus::Voting);

    // The 1h voting window has elapsed.
    scheduler::sweep(&test_db.pool, &events, now + Duration::seconds(3700))
        .await
        .expect("sweep");

    let closed = cells::get_cell(&test_db.pool, &cell.guid).await.unwrap();
    assert_eq!(closed.status, CellStatus::Completed);
    assert_eq!(closed.winner_idea_id.as_deref(), Some(idea_ids[0].as_str()));

    // The lone survivor became champion in the same sweep.
    let done = deliberations::get_deliberation(&test_db.pool, &deliberation.guid)
        .await
        .unwrap();
    assert_eq!(done.phase, DeliberationPhase::Completed);
    assert_eq!(done.champion_idea_id.as_deref(), Some(idea_ids[0].as_str()));
    let champion = ideas::get_idea(&test_db.pool, &idea_ids[0]).await.unwrap();
    assert_eq!(champion.status, IdeaStatus::Winner);
}

#[tokio::test]
async fn test_sweep_opens_voting_after_discussion_window() {
    let test_db = helpers::setup_db().await;
    let events = helpers::event_bus();
    let now = Utc::now();

    let deliberation = deliberations::create_deliberation(
        &test_db.pool,
        &NewDeliberation {
            question: "What should we build next?".to_string(),
            cell_size: 5,
            vote_budget: 10,
            discussion_seconds: 600,
            voting_seconds: 3600,
            continuous_flow: false,
            accumulation_enabled: false,
        },
        now,
    )
    .await
    .expect("create deliberation");
    let users = helpers::add_members(&test_db.pool, &deliberation.guid, 5, now).await;
    helpers::submit_one_idea_each(&test_db.pool, &events, &deliberation.guid, &users, now).await;
    progression::start_voting_phase(&test_db.pool, &events, &deliberation.guid, now)
        .await
        .expect("start voting");

    let cell = cells::list_cells_at_tier(&test_db.pool, &deliberation.guid, 1)
        .await
        .unwrap()
        .remove(0);
    assert_eq!(cell.status, CellStatus::Deliberating);
    assert!(cell.discussion_ends_at.is_some());
    assert!(cell.voting_ends_at.is_none());

    let idea_ids = helpers::cell_idea_ids(&test_db.pool, &cell.guid).await;
    let voters = helpers::cell_participants(&test_db.pool, &cell.guid).await;

    // Votes are rejected while the discussion window runs.
    let early =
        ledger::cast_vote(&test_db.pool, &events, &cell.guid, &voters[0], &idea_ids[0], 5, now)
            .await;
    assert!(matches!(early, Err(Error::InvalidAllocation(_))));

    let later = now + Duration::seconds(700);
    scheduler::sweep(&test_db.pool, &events, later).await.expect("sweep");

    let open = cells::get_cell(&test_db.pool, &cell.guid).await.unwrap();
    assert_eq!(open.status, CellStatus::Voting);
    let ends = open.voting_ends_at.expect("voting deadline set");
    assert!(ends > later, "the voting window starts from the sweep");

    ledger::cast_vote(&test_db.pool, &events, &cell.guid, &voters[0], &idea_ids[0], 5, later)
        .await
        .expect("vote after the window opens");
}

#[tokio::test]
async fn test_timeouts_advance_the_tier() {
    let test_db = helpers::setup_db().await;
    let events = helpers::event_bus();
    let now = Utc::now();

    let deliberation =
        helpers::create_deliberation(&test_db.pool, 5, 10, false, false, now).await;
    let users = helpers::add_members(&test_db.pool, &deliberation.guid, 10, now).await;
    helpers::submit_one_idea_each(&test_db.pool, &events, &deliberation.guid, &users, now).await;
    let cell_count =
        progression::start_voting_phase(&test_db.pool, &events, &deliberation.guid, now)
            .await
            .expect("start voting");
    assert_eq!(cell_count, 2);

    // One vote per cell, then let both deadlines lapse in a single sweep.
    let tier1 = cells::list_cells_at_tier(&test_db.pool, &deliberation.guid, 1)
        .await
        .unwrap();
    for cell in &tier1 {
        let idea_ids = helpers::cell_idea_ids(&test_db.pool, &cell.guid).await;
        let voters = helpers::cell_participants(&test_db.pool, &cell.guid).await;
        ledger::cast_vote(&test_db.pool, &events, &cell.guid, &voters[0], &idea_ids[0], 10, now)
            .await
            .unwrap();
    }

    scheduler::sweep(&test_db.pool, &events, now + Duration::seconds(3700))
        .await
        .expect("sweep");

    let advanced = deliberations::get_deliberation(&test_db.pool, &deliberation.guid)
        .await
        .unwrap();
    assert_eq!(advanced.current_tier, 2, "both timeouts close the tier");
    assert_eq!(advanced.phase, DeliberationPhase::Voting);

    let tier2 = cells::list_cells_at_tier(&test_db.pool, &deliberation.guid, 2)
        .await
        .unwrap();
    assert_eq!(tier2.len(), 1, "two survivors fight a showdown");
    assert_eq!(helpers::cell_idea_ids(&test_db.pool, &tier2[0].guid).await.len(), 2);
    assert_eq!(
        helpers::cell_participants(&test_db.pool, &tier2[0].guid).await.len(),
        2,
        "only the members who voted judge the showdown"
    );
}
