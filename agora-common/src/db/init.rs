//! Database initialization
//!
//! Creates the SQLite database on first run and brings the schema up
//! idempotently on every start. All statements are `CREATE ... IF NOT EXISTS`
//! so repeated initialization is safe.

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::{info, warn};

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(20)
        .min_connections(5)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    // Enable foreign keys
    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&pool)
        .await?;

    // WAL allows concurrent readers with one writer, which matters when the
    // scheduler sweep and API handlers hit the same database
    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(&pool)
        .await?;

    sqlx::query("PRAGMA busy_timeout = 5000")
        .execute(&pool)
        .await?;

    // Migrations (idempotent - safe to call multiple times)
    create_schema_version_table(&pool).await?;
    create_settings_table(&pool).await?;
    create_deliberations_table(&pool).await?;
    create_ideas_table(&pool).await?;
    create_deliberation_members_table(&pool).await?;
    create_cells_table(&pool).await?;
    create_cell_ideas_table(&pool).await?;
    create_cell_participations_table(&pool).await?;
    create_votes_table(&pool).await?;
    create_idea_revisions_table(&pool).await?;
    create_idea_revision_votes_table(&pool).await?;

    init_default_settings(&pool).await?;

    Ok(pool)
}

async fn create_schema_version_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the settings table
///
/// Stores engine configuration key-value pairs.
pub async fn create_settings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the deliberations table
///
/// One row per deliberation. `submissions_open` guards the continuous-flow
/// submission window; tier completion is a no-op while it is set.
pub async fn create_deliberations_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS deliberations (
            guid TEXT PRIMARY KEY,
            question TEXT NOT NULL,
            phase TEXT NOT NULL DEFAULT 'submission' CHECK (phase IN ('submission', 'voting', 'accumulating', 'completed')),
            current_tier INTEGER NOT NULL DEFAULT 0,
            cell_size INTEGER NOT NULL DEFAULT 5,
            vote_budget INTEGER NOT NULL DEFAULT 10,
            discussion_seconds INTEGER NOT NULL DEFAULT 0,
            voting_seconds INTEGER NOT NULL DEFAULT 86400,
            continuous_flow INTEGER NOT NULL DEFAULT 0,
            accumulation_enabled INTEGER NOT NULL DEFAULT 0,
            submissions_open INTEGER NOT NULL DEFAULT 1,
            challenge_round INTEGER NOT NULL DEFAULT 0,
            champion_idea_id TEXT,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            CHECK (cell_size >= 2),
            CHECK (vote_budget > 0),
            CHECK (current_tier >= 0),
            CHECK (discussion_seconds >= 0),
            CHECK (voting_seconds > 0),
            CHECK (challenge_round >= 0)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_deliberations_phase ON deliberations(phase)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Create the ideas table
pub async fn create_ideas_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ideas (
            guid TEXT PRIMARY KEY,
            deliberation_id TEXT NOT NULL REFERENCES deliberations(guid) ON DELETE CASCADE,
            author_id TEXT NOT NULL,
            text TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'submitted' CHECK (status IN ('submitted', 'pending', 'in_voting', 'advancing', 'winner', 'eliminated', 'defending')),
            tier_reached INTEGER NOT NULL DEFAULT 0,
            total_points INTEGER NOT NULL DEFAULT 0,
            loss_count INTEGER NOT NULL DEFAULT 0,
            is_champion INTEGER NOT NULL DEFAULT 0,
            submitted_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            CHECK (length(text) > 0),
            CHECK (tier_reached >= 0),
            CHECK (total_points >= 0),
            CHECK (loss_count >= 0)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_ideas_deliberation_status ON ideas(deliberation_id, status)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_deliberation_members_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS deliberation_members (
            deliberation_id TEXT NOT NULL REFERENCES deliberations(guid) ON DELETE CASCADE,
            user_id TEXT NOT NULL,
            joined_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            PRIMARY KEY (deliberation_id, user_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the cells table
///
/// `batch` groups cells created by the same allocation pass.
pub async fn create_cells_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS cells (
            guid TEXT PRIMARY KEY,
            deliberation_id TEXT NOT NULL REFERENCES deliberations(guid) ON DELETE CASCADE,
            tier INTEGER NOT NULL,
            batch INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'deliberating' CHECK (status IN ('deliberating', 'voting', 'completed')),
            discussion_ends_at TIMESTAMP,
            voting_ends_at TIMESTAMP,
            winner_idea_id TEXT,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            CHECK (tier >= 1)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_cells_deliberation_tier ON cells(deliberation_id, tier)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_cells_status ON cells(status)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_cell_ideas_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS cell_ideas (
            cell_id TEXT NOT NULL REFERENCES cells(guid) ON DELETE CASCADE,
            idea_id TEXT NOT NULL REFERENCES ideas(guid) ON DELETE CASCADE,
            PRIMARY KEY (cell_id, idea_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_cell_ideas_idea ON cell_ideas(idea_id)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Create the cell_participations table
///
/// One seat per user per cell; the tier-wide one-seat rule is enforced by
/// the allocator and seat manager, not the schema.
pub async fn create_cell_participations_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS cell_participations (
            cell_id TEXT NOT NULL REFERENCES cells(guid) ON DELETE CASCADE,
            user_id TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'active' CHECK (status IN ('active', 'voted')),
            joined_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            PRIMARY KEY (cell_id, user_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_cell_participations_user ON cell_participations(user_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the votes table
pub async fn create_votes_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS votes (
            cell_id TEXT NOT NULL REFERENCES cells(guid) ON DELETE CASCADE,
            user_id TEXT NOT NULL,
            idea_id TEXT NOT NULL REFERENCES ideas(guid) ON DELETE CASCADE,
            points INTEGER NOT NULL,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            PRIMARY KEY (cell_id, user_id, idea_id),
            CHECK (points > 0)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_votes_cell_idea ON votes(cell_id, idea_id)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_idea_revisions_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS idea_revisions (
            guid TEXT PRIMARY KEY,
            idea_id TEXT NOT NULL REFERENCES ideas(guid) ON DELETE CASCADE,
            cell_id TEXT NOT NULL REFERENCES cells(guid) ON DELETE CASCADE,
            proposed_by TEXT NOT NULL,
            text TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending' CHECK (status IN ('pending', 'approved', 'rejected')),
            required_approvals INTEGER NOT NULL,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            resolved_at TIMESTAMP,
            CHECK (length(text) > 0),
            CHECK (required_approvals >= 1)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_idea_revisions_idea_status ON idea_revisions(idea_id, status)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_idea_revisions_cell ON idea_revisions(cell_id)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_idea_revision_votes_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS idea_revision_votes (
            revision_id TEXT NOT NULL REFERENCES idea_revisions(guid) ON DELETE CASCADE,
            user_id TEXT NOT NULL,
            approve INTEGER NOT NULL,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            PRIMARY KEY (revision_id, user_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Initialize or update default settings
///
/// Ensures all engine settings exist with default values. NULL values are
/// reset to defaults.
async fn init_default_settings(pool: &SqlitePool) -> Result<()> {
    // Deliberation defaults applied at creation time
    ensure_setting(pool, "default_cell_size", "5").await?;
    ensure_setting(pool, "default_vote_budget", "10").await?;
    ensure_setting(pool, "default_voting_seconds", "86400").await?; // 24 hours
    ensure_setting(pool, "default_discussion_seconds", "0").await?; // 0 = no discussion period

    // Challenge / accumulation settings
    ensure_setting(pool, "challenge_quorum", "5").await?;
    ensure_setting(pool, "challenge_entry_tier", "2").await?;
    ensure_setting(pool, "idea_max_losses", "3").await?;

    // Revision consensus settings
    ensure_setting(pool, "revision_policy", "threshold").await?;
    ensure_setting(pool, "revision_approval_fraction", "0.3").await?;

    // Scheduler and API settings
    ensure_setting(pool, "tick_interval_seconds", "5").await?;
    ensure_setting(pool, "idea_max_length", "2000").await?;

    info!("Default settings initialized");
    Ok(())
}

/// Ensure a setting exists with the specified default value
///
/// If the setting doesn't exist, it will be created with the default.
/// If the setting exists but has a NULL value, it will be reset to the default.
async fn ensure_setting(pool: &SqlitePool, key: &str, default_value: &str) -> Result<()> {
    let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM settings WHERE key = ?)")
        .bind(key)
        .fetch_one(pool)
        .await?;

    if !exists {
        // INSERT OR IGNORE handles concurrent initialization: multiple tasks
        // may pass the exists check simultaneously
        sqlx::query("INSERT OR IGNORE INTO settings (key, value) VALUES (?, ?)")
            .bind(key)
            .bind(default_value)
            .execute(pool)
            .await?;

        info!(
            "Initialized setting '{}' with default value: {}",
            key, default_value
        );
        return Ok(());
    }

    let value: Option<String> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_one(pool)
        .await?;

    if value.is_none() {
        sqlx::query("UPDATE settings SET value = ? WHERE key = ?")
            .bind(default_value)
            .bind(key)
            .execute(pool)
            .await?;

        warn!(
            "Setting '{}' was NULL, reset to default: {}",
            key, default_value
        );
    }

    Ok(())
}
