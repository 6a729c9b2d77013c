//! Idea revision queries

use crate::error::{Error, Result};
use agora_common::db::models::IdeaRevision;
use sqlx::SqlitePool;

/// Fetch a revision by guid
pub async fn get_revision(db: &SqlitePool, guid: &str) -> Result<IdeaRevision> {
    sqlx::query_as::<_, IdeaRevision>("SELECT * FROM idea_revisions WHERE guid = ?")
        .bind(guid)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Revision not found: {}", guid)))
}
