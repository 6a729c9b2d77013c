//! Tests for database initialization
//!
//! Covers automatic database creation, idempotent re-initialization,
//! default setting seeding, and schema constraint enforcement.

use agora_common::db::init::init_database;
use std::path::PathBuf;

fn test_db_path(tag: &str) -> PathBuf {
    PathBuf::from(format!("/tmp/agora-test-db-{}-{}.db", tag, std::process::id()))
}

#[tokio::test]
async fn test_database_creation_when_missing() {
    let db_path = test_db_path("create");
    let _ = std::fs::remove_file(&db_path);

    let result = init_database(&db_path).await;
    assert!(
        result.is_ok(),
        "Database initialization failed: {:?}",
        result.err()
    );
    assert!(db_path.exists(), "Database file was not created");

    let _ = std::fs::remove_file(&db_path);
}

#[tokio::test]
async fn test_database_opens_existing() {
    let db_path = test_db_path("existing");
    let _ = std::fs::remove_file(&db_path);

    let pool1 = init_database(&db_path).await;
    assert!(pool1.is_ok());

    let pool2 = init_database(&db_path).await;
    assert!(
        pool2.is_ok(),
        "Failed to open existing database: {:?}",
        pool2.err()
    );

    drop(pool1);
    drop(pool2);
    let _ = std::fs::remove_file(&db_path);
}

#[tokio::test]
async fn test_default_settings_initialized() {
    let db_path = test_db_path("settings");
    let _ = std::fs::remove_file(&db_path);

    let pool = init_database(&db_path).await.unwrap();

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM settings")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert!(count >= 11, "Expected 11+ default settings, got {}", count);

    let test_cases = vec![
        ("default_cell_size", "5"),
        ("default_vote_budget", "10"),
        ("default_voting_seconds", "86400"),
        ("default_discussion_seconds", "0"),
        ("challenge_quorum", "5"),
        ("challenge_entry_tier", "2"),
        ("idea_max_losses", "3"),
        ("revision_policy", "threshold"),
        ("revision_approval_fraction", "0.3"),
        ("tick_interval_seconds", "5"),
        ("idea_max_length", "2000"),
    ];

    for (key, expected_value) in test_cases {
        let value: Option<String> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&pool)
            .await
            .unwrap();

        assert!(value.is_some(), "Setting '{}' not initialized", key);
        assert_eq!(
            value.unwrap(),
            expected_value,
            "Setting '{}' has wrong default value",
            key
        );
    }

    drop(pool);
    let _ = std::fs::remove_file(&db_path);
}

#[tokio::test]
async fn test_idempotent_initialization() {
    let db_path = test_db_path("idempotent");
    let _ = std::fs::remove_file(&db_path);

    let pool1 = init_database(&db_path).await.unwrap();
    let count1: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM settings")
        .fetch_one(&pool1)
        .await
        .unwrap();
    drop(pool1);

    let pool2 = init_database(&db_path).await.unwrap();
    let count2: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM settings")
        .fetch_one(&pool2)
        .await
        .unwrap();

    assert_eq!(
        count1, count2,
        "Settings count changed on second initialization"
    );

    drop(pool2);
    let _ = std::fs::remove_file(&db_path);
}

#[tokio::test]
async fn test_null_value_handling() {
    let db_path = test_db_path("null");
    let _ = std::fs::remove_file(&db_path);

    let pool = init_database(&db_path).await.unwrap();

    sqlx::query("UPDATE settings SET value = NULL WHERE key = 'challenge_quorum'")
        .execute(&pool)
        .await
        .unwrap();
    drop(pool);

    // Re-initialization resets NULL settings to defaults
    let pool2 = init_database(&db_path).await.unwrap();
    let value: Option<String> =
        sqlx::query_scalar("SELECT value FROM settings WHERE key = 'challenge_quorum'")
            .fetch_one(&pool2)
            .await
            .unwrap();

    assert_eq!(value.as_deref(), Some("5"), "NULL value was not reset");

    drop(pool2);
    let _ = std::fs::remove_file(&db_path);
}

#[tokio::test]
async fn test_foreign_keys_enabled() {
    let db_path = test_db_path("fk");
    let _ = std::fs::remove_file(&db_path);

    let pool = init_database(&db_path).await.unwrap();

    let fk_enabled: i64 = sqlx::query_scalar("PRAGMA foreign_keys")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(fk_enabled, 1, "Foreign keys should be enabled");

    // An idea pointing at a missing deliberation must be rejected
    let result = sqlx::query(
        "INSERT INTO ideas (guid, deliberation_id, author_id, text) VALUES ('i-1', 'missing', 'u-1', 'orphan')",
    )
    .execute(&pool)
    .await;
    assert!(result.is_err(), "Orphan idea insert should fail");

    drop(pool);
    let _ = std::fs::remove_file(&db_path);
}

#[tokio::test]
async fn test_status_check_constraints() {
    let db_path = test_db_path("checks");
    let _ = std::fs::remove_file(&db_path);

    let pool = init_database(&db_path).await.unwrap();

    sqlx::query("INSERT INTO deliberations (guid, question) VALUES ('d-1', 'What next?')")
        .execute(&pool)
        .await
        .unwrap();

    // Unknown phase value violates the CHECK constraint
    let result = sqlx::query("UPDATE deliberations SET phase = 'paused' WHERE guid = 'd-1'")
        .execute(&pool)
        .await;
    assert!(result.is_err(), "Unknown phase should be rejected");

    // Zero-point votes violate the CHECK constraint
    sqlx::query("INSERT INTO cells (guid, deliberation_id, tier) VALUES ('c-1', 'd-1', 1)")
        .execute(&pool)
        .await
        .unwrap();
    sqlx::query(
        "INSERT INTO ideas (guid, deliberation_id, author_id, text) VALUES ('i-1', 'd-1', 'u-1', 'an idea')",
    )
    .execute(&pool)
    .await
    .unwrap();
    let result = sqlx::query(
        "INSERT INTO votes (cell_id, user_id, idea_id, points) VALUES ('c-1', 'u-1', 'i-1', 0)",
    )
    .execute(&pool)
    .await;
    assert!(result.is_err(), "Zero-point vote should be rejected");

    drop(pool);
    let _ = std::fs::remove_file(&db_path);
}

#[tokio::test]
async fn test_concurrent_initialization() {
    let db_path = test_db_path("concurrent");
    let _ = std::fs::remove_file(&db_path);

    let mut handles = vec![];
    for _ in 0..5 {
        let db_path_clone = db_path.clone();
        handles.push(tokio::spawn(
            async move { init_database(&db_path_clone).await },
        ));
    }

    let mut results = vec![];
    for handle in handles {
        results.push(handle.await.unwrap());
    }

    for result in &results {
        assert!(
            result.is_ok(),
            "Concurrent initialization failed: {:?}",
            result
        );
    }

    let pool = results[0].as_ref().unwrap();
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM settings")
        .fetch_one(pool)
        .await
        .unwrap();
    assert!(count >= 11, "Settings not initialized after concurrent access");

    for result in results {
        drop(result);
    }
    let _ = std::fs::remove_file(&db_path);
}
