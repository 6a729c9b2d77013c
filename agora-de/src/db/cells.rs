//! Cell queries

use crate::error::{Error, Result};
use agora_common::db::models::Cell;
use sqlx::SqlitePool;

/// Fetch a cell by guid
pub async fn get_cell(db: &SqlitePool, guid: &str) -> Result<Cell> {
    sqlx::query_as::<_, Cell>("SELECT * FROM cells WHERE guid = ?")
        .bind(guid)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Cell not found: {}", guid)))
}

/// List cells for a deliberation at a tier, oldest first
pub async fn list_cells_at_tier(
    db: &SqlitePool,
    deliberation_id: &str,
    tier: i64,
) -> Result<Vec<Cell>> {
    Ok(sqlx::query_as::<_, Cell>(
        "SELECT * FROM cells WHERE deliberation_id = ? AND tier = ? ORDER BY created_at, guid",
    )
    .bind(deliberation_id)
    .bind(tier)
    .fetch_all(db)
    .await?)
}

/// Number of seats taken in a cell
pub async fn seat_count(db: &SqlitePool, cell_id: &str) -> Result<i64> {
    Ok(
        sqlx::query_scalar("SELECT COUNT(*) FROM cell_participations WHERE cell_id = ?")
            .bind(cell_id)
            .fetch_one(db)
            .await?,
    )
}
