//! Settings database access
//!
//! Read/write settings from the settings table (key-value store).
//! All settings are global/system-wide (not per-deliberation).

use crate::error::{Error, Result};
use sqlx::{Pool, Sqlite};
use std::str::FromStr;

/// Deliberation defaults applied when a create request leaves a field unset
#[derive(Debug, Clone)]
pub struct DeliberationDefaults {
    pub cell_size: i64,
    pub vote_budget: i64,
    pub voting_seconds: i64,
    pub discussion_seconds: i64,
}

/// Get deliberation default settings
pub async fn get_deliberation_defaults(db: &Pool<Sqlite>) -> Result<DeliberationDefaults> {
    Ok(DeliberationDefaults {
        cell_size: get_setting::<i64>(db, "default_cell_size").await?.unwrap_or(5),
        vote_budget: get_setting::<i64>(db, "default_vote_budget")
            .await?
            .unwrap_or(10),
        voting_seconds: get_setting::<i64>(db, "default_voting_seconds")
            .await?
            .unwrap_or(86400),
        discussion_seconds: get_setting::<i64>(db, "default_discussion_seconds")
            .await?
            .unwrap_or(0),
    })
}

/// Number of pending challengers that starts a challenge round
pub async fn get_challenge_quorum(db: &Pool<Sqlite>) -> Result<i64> {
    Ok(get_setting::<i64>(db, "challenge_quorum")
        .await?
        .unwrap_or(5)
        .max(1))
}

/// Tier at which a challenge round enters the ladder
pub async fn get_challenge_entry_tier(db: &Pool<Sqlite>) -> Result<i64> {
    Ok(get_setting::<i64>(db, "challenge_entry_tier")
        .await?
        .unwrap_or(2)
        .max(1))
}

/// Losses after which an idea stops returning to the accumulation pool
pub async fn get_idea_max_losses(db: &Pool<Sqlite>) -> Result<i64> {
    Ok(get_setting::<i64>(db, "idea_max_losses")
        .await?
        .unwrap_or(3)
        .max(1))
}

/// Maximum idea/revision text length accepted at the API boundary
pub async fn get_idea_max_length(db: &Pool<Sqlite>) -> Result<usize> {
    Ok(get_setting::<usize>(db, "idea_max_length")
        .await?
        .unwrap_or(2000)
        .clamp(1, 65536))
}

/// Scheduler sweep interval
pub async fn get_tick_interval_seconds(db: &Pool<Sqlite>) -> Result<u64> {
    Ok(get_setting::<u64>(db, "tick_interval_seconds")
        .await?
        .unwrap_or(5)
        .clamp(1, 3600))
}

/// Revision approval policy for the deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevisionPolicy {
    /// Approvals from a fraction of the other active participants suffice
    Threshold,
    /// Every other active participant must approve; one rejection rejects
    Unanimous,
}

/// Get the configured revision policy, defaulting to threshold
pub async fn get_revision_policy(db: &Pool<Sqlite>) -> Result<RevisionPolicy> {
    match get_setting::<String>(db, "revision_policy").await? {
        Some(s) if s == "unanimous" => Ok(RevisionPolicy::Unanimous),
        Some(s) if s == "threshold" => Ok(RevisionPolicy::Threshold),
        Some(other) => Err(Error::Config(format!(
            "Unknown revision_policy setting: {}",
            other
        ))),
        None => Ok(RevisionPolicy::Threshold),
    }
}

/// Fraction of other active participants needed under the threshold policy
pub async fn get_revision_approval_fraction(db: &Pool<Sqlite>) -> Result<f64> {
    Ok(get_setting::<f64>(db, "revision_approval_fraction")
        .await?
        .unwrap_or(0.3)
        .clamp(0.0, 1.0))
}

/// Generic setting getter
///
/// Returns None if key doesn't exist in database.
/// Parses value from string using FromStr trait.
pub async fn get_setting<T: FromStr>(db: &Pool<Sqlite>, key: &str) -> Result<Option<T>> {
    let value: Option<String> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(db)
        .await?;

    match value {
        Some(s) => match s.parse::<T>() {
            Ok(parsed) => Ok(Some(parsed)),
            Err(_) => Err(Error::Config(format!(
                "Failed to parse setting '{}' value: {}",
                key, s
            ))),
        },
        None => Ok(None),
    }
}

/// Generic setting setter
///
/// Inserts or updates setting in database.
pub async fn set_setting<T: ToString>(db: &Pool<Sqlite>, key: &str, value: T) -> Result<()> {
    let value_str = value.to_string();

    sqlx::query(
        r#"
        INSERT INTO settings (key, value)
        VALUES (?, ?)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value
        "#,
    )
    .bind(key)
    .bind(value_str)
    .execute(db)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup_test_db() -> Pool<Sqlite> {
        let pool = SqlitePoolOptions::new()
            .connect("sqlite::memory:")
            .await
            .unwrap();

        sqlx::query(
            r#"
            CREATE TABLE settings (
                key TEXT PRIMARY KEY,
                value TEXT,
                updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&pool)
        .await
        .unwrap();

        pool
    }

    #[tokio::test]
    async fn test_generic_setting_get_set() {
        let db = setup_test_db().await;

        set_setting(&db, "test_int", 42).await.unwrap();
        let value: Option<i32> = get_setting(&db, "test_int").await.unwrap();
        assert_eq!(value, Some(42));

        set_setting(&db, "test_str", "hello".to_string())
            .await
            .unwrap();
        let value: Option<String> = get_setting(&db, "test_str").await.unwrap();
        assert_eq!(value, Some("hello".to_string()));

        let value: Option<String> = get_setting(&db, "nonexistent").await.unwrap();
        assert_eq!(value, None);
    }

    #[tokio::test]
    async fn test_setting_update() {
        let db = setup_test_db().await;

        set_setting(&db, "test_key", "value1".to_string())
            .await
            .unwrap();
        set_setting(&db, "test_key", "value2".to_string())
            .await
            .unwrap();
        let value: Option<String> = get_setting(&db, "test_key").await.unwrap();
        assert_eq!(value, Some("value2".to_string()));
    }

    #[tokio::test]
    async fn test_deliberation_defaults_fall_back() {
        let db = setup_test_db().await;

        // Nothing seeded yet, so compiled defaults apply
        let defaults = get_deliberation_defaults(&db).await.unwrap();
        assert_eq!(defaults.cell_size, 5);
        assert_eq!(defaults.vote_budget, 10);
        assert_eq!(defaults.voting_seconds, 86400);
        assert_eq!(defaults.discussion_seconds, 0);

        set_setting(&db, "default_cell_size", 7).await.unwrap();
        let defaults = get_deliberation_defaults(&db).await.unwrap();
        assert_eq!(defaults.cell_size, 7);
    }

    #[tokio::test]
    async fn test_revision_policy_parsing() {
        let db = setup_test_db().await;

        assert_eq!(
            get_revision_policy(&db).await.unwrap(),
            RevisionPolicy::Threshold
        );

        set_setting(&db, "revision_policy", "unanimous".to_string())
            .await
            .unwrap();
        assert_eq!(
            get_revision_policy(&db).await.unwrap(),
            RevisionPolicy::Unanimous
        );

        set_setting(&db, "revision_policy", "plurality".to_string())
            .await
            .unwrap();
        assert!(get_revision_policy(&db).await.is_err());
    }

    #[tokio::test]
    async fn test_clamped_getters() {
        let db = setup_test_db().await;

        set_setting(&db, "challenge_quorum", 0).await.unwrap();
        assert_eq!(get_challenge_quorum(&db).await.unwrap(), 1);

        set_setting(&db, "tick_interval_seconds", 0).await.unwrap();
        assert_eq!(get_tick_interval_seconds(&db).await.unwrap(), 1);

        set_setting(&db, "idea_max_length", 10_000_000).await.unwrap();
        assert_eq!(get_idea_max_length(&db).await.unwrap(), 65536);
    }
}
