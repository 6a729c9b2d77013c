//! Challenge round tests
//!
//! Covers the accumulation phase: challenger quorum, title defenses, and
//! champion replacement.

mod helpers;

use agora_common::db::models::{DeliberationPhase, IdeaStatus};
use agora_common::events::EventBus;
use agora_de::db::{cells, deliberations, ideas};
use agora_de::engine::progression;
use chrono::{Duration, Utc};

/// Accumulating deliberation of 5 members with a freshly crowned champion
async fn accumulating_fixture() -> (helpers::TestDb, EventBus, String, String, Vec<String>) {
    let test_db = helpers::setup_db().await;
    let events = helpers::event_bus();
    let now = Utc::now();

    let deliberation =
        helpers::create_deliberation(&test_db.pool, 5, 10, false, true, now).await;
    let users = helpers::add_members(&test_db.pool, &deliberation.guid, 5, now).await;
    let idea_ids = helpers::submit_one_idea_each(
        &test_db.pool,
        &events,
        &deliberation.guid,
        &users[..2],
        now,
    )
    .await;

    progression::start_voting_phase(&test_db.pool, &events, &deliberation.guid, now)
        .await
        .expect("start voting");
    let cell = cells::list_cells_at_tier(&test_db.pool, &deliberation.guid, 1)
        .await
        .unwrap()
        .remove(0);
    helpers::vote_cell_unanimous(&test_db.pool, &events, &cell.guid, &idea_ids[0], 10, now).await;

    let crowned = deliberations::get_deliberation(&test_db.pool, &deliberation.guid)
        .await
        .unwrap();
    assert_eq!(crowned.phase, DeliberationPhase::Accumulating);
    let champion_id = crowned.champion_idea_id.expect("champion set");

    (test_db, events, deliberation.guid, champion_id, users)
}

#[tokio::test]
async fn test_fifth_challenger_starts_a_challenge_round() {
    let (test_db, events, deliberation_id, champion_id, users) = accumulating_fixture().await;
    let later = Utc::now() + Duration::seconds(60);

    let challenger_ids =
        helpers::submit_one_idea_each(&test_db.pool, &events, &deliberation_id, &users, later)
            .await;

    let deliberation = deliberations::get_deliberation(&test_db.pool, &deliberation_id)
        .await
        .unwrap();
    assert_eq!(deliberation.phase, DeliberationPhase::Voting);
    assert_eq!(deliberation.current_tier, 2, "challenge rounds enter at tier 2");
    assert_eq!(deliberation.challenge_round, 1);
    assert!(!deliberation.submissions_open);

    let champion = ideas::get_idea(&test_db.pool, &champion_id).await.unwrap();
    assert_eq!(champion.status, IdeaStatus::Defending);
    assert!(champion.is_champion);

    let tier2 = cells::list_cells_at_tier(&test_db.pool, &deliberation_id, 2)
        .await
        .unwrap();
    assert_eq!(tier2.len(), 1, "6 contenders at size 5 fill one cell");
    let contenders = helpers::cell_idea_ids(&test_db.pool, &tier2[0].guid).await;
    assert_eq!(contenders.len(), 5);
    assert!(
        contenders.contains(&champion_id),
        "the champion is dealt into the challenge cell"
    );

    // The challenger that did not fit stays queued for the next round.
    let parked = ideas::get_idea(&test_db.pool, &challenger_ids[4]).await.unwrap();
    assert_eq!(parked.status, IdeaStatus::Pending);
}

#[tokio::test]
async fn test_below_quorum_keeps_accumulating() {
    let (test_db, events, deliberation_id, _champion_id, users) = accumulating_fixture().await;
    let later = Utc::now() + Duration::seconds(60);

    let challenger_ids = helpers::submit_one_idea_each(
        &test_db.pool,
        &events,
        &deliberation_id,
        &users[..4],
        later,
    )
    .await;

    let deliberation = deliberations::get_deliberation(&test_db.pool, &deliberation_id)
        .await
        .unwrap();
    assert_eq!(deliberation.phase, DeliberationPhase::Accumulating);
    assert_eq!(deliberation.challenge_round, 0);

    for challenger_id in &challenger_ids {
        let idea = ideas::get_idea(&test_db.pool, challenger_id).await.unwrap();
        assert_eq!(idea.status, IdeaStatus::Pending, "challengers queue up");
    }

    let tier2 = cells::list_cells_at_tier(&test_db.pool, &deliberation_id, 2)
        .await
        .unwrap();
    assert!(tier2.is_empty());
}

#[tokio::test]
async fn test_winning_challenger_takes_the_title() {
    let (test_db, events, deliberation_id, champion_id, users) = accumulating_fixture().await;
    let later = Utc::now() + Duration::seconds(60);

    helpers::submit_one_idea_each(&test_db.pool, &events, &deliberation_id, &users, later).await;
    let cell = cells::list_cells_at_tier(&test_db.pool, &deliberation_id, 2)
        .await
        .unwrap()
        .remove(0);
    let contenders = helpers::cell_idea_ids(&test_db.pool, &cell.guid).await;
    let challenger = contenders
        .iter()
        .find(|id| **id != champion_id)
        .expect("a challenger in the cell")
        .clone();

    helpers::vote_cell_unanimous(&test_db.pool, &events, &cell.guid, &challenger, 10, later).await;

    let deliberation = deliberations::get_deliberation(&test_db.pool, &deliberation_id)
        .await
        .unwrap();
    assert_eq!(
        deliberation.phase,
        DeliberationPhase::Accumulating,
        "a resolved round returns to accumulation"
    );
    assert_eq!(deliberation.champion_idea_id.as_deref(), Some(challenger.as_str()));

    let new_champion = ideas::get_idea(&test_db.pool, &challenger).await.unwrap();
    assert_eq!(new_champion.status, IdeaStatus::Winner);
    assert!(new_champion.is_champion);

    let dethroned = ideas::get_idea(&test_db.pool, &champion_id).await.unwrap();
    assert!(!dethroned.is_champion);
    assert_eq!(
        dethroned.status,
        IdeaStatus::Pending,
        "a dethroned champion rejoins the challenger pool"
    );
    assert_eq!(dethroned.loss_count, 1);
}

#[tokio::test]
async fn test_champion_survives_its_defense() {
    let (test_db, events, deliberation_id, champion_id, users) = accumulating_fixture().await;
    let later = Utc::now() + Duration::seconds(60);

    helpers::submit_one_idea_each(&test_db.pool, &events, &deliberation_id, &users, later).await;
    let cell = cells::list_cells_at_tier(&test_db.pool, &deliberation_id, 2)
        .await
        .unwrap()
        .remove(0);
    let contenders = helpers::cell_idea_ids(&test_db.pool, &cell.guid).await;

    helpers::vote_cell_unanimous(&test_db.pool, &events, &cell.guid, &champion_id, 10, later)
        .await;

    let deliberation = deliberations::get_deliberation(&test_db.pool, &deliberation_id)
        .await
        .unwrap();
    assert_eq!(deliberation.phase, DeliberationPhase::Accumulating);
    assert_eq!(deliberation.champion_idea_id.as_deref(), Some(champion_id.as_str()));
    assert_eq!(deliberation.challenge_round, 1, "the round counter sticks");

    let champion = ideas::get_idea(&test_db.pool, &champion_id).await.unwrap();
    assert_eq!(champion.status, IdeaStatus::Winner);
    assert!(champion.is_champion);

    // Beaten challengers return to the pool with one loss on record.
    for contender_id in contenders.iter().filter(|id| **id != champion_id) {
        let idea = ideas::get_idea(&test_db.pool, contender_id).await.unwrap();
        assert_eq!(idea.status, IdeaStatus::Pending);
        assert_eq!(idea.loss_count, 1);
    }
}
