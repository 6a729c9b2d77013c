//! Idea queries

use crate::error::{Error, Result};
use agora_common::db::models::Idea;
use sqlx::SqlitePool;

/// Fetch an idea by guid
pub async fn get_idea(db: &SqlitePool, guid: &str) -> Result<Idea> {
    sqlx::query_as::<_, Idea>("SELECT * FROM ideas WHERE guid = ?")
        .bind(guid)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Idea not found: {}", guid)))
}

/// List ideas in a cell, submission order
pub async fn list_cell_ideas(db: &SqlitePool, cell_id: &str) -> Result<Vec<Idea>> {
    Ok(sqlx::query_as::<_, Idea>(
        r#"
        SELECT i.*
        FROM cell_ideas ci
        JOIN ideas i ON i.guid = ci.idea_id
        WHERE ci.cell_id = ?
        ORDER BY i.submitted_at, i.guid
        "#,
    )
    .bind(cell_id)
    .fetch_all(db)
    .await?)
}
