//! Deliberation engine
//!
//! Pure-logic core of the service: allocation, vote accounting, tier
//! progression, continuous flow, challenge rounds, seating, and idea
//! revisions. Every operation is a short async fn over the shared pool;
//! composite mutations run inside a single transaction and `now` is
//! injected by the caller (the scheduler owns the clock).

pub mod allocator;
pub mod challenge;
pub mod flow;
pub mod ledger;
pub mod progression;
pub mod revision;
pub mod seats;

use crate::error::{Error, Result};
use agora_common::db::models::{Cell, Deliberation};
use sqlx::{Sqlite, Transaction};

/// Load a deliberation inside an open transaction
pub(crate) async fn load_deliberation(
    tx: &mut Transaction<'_, Sqlite>,
    guid: &str,
) -> Result<Deliberation> {
    sqlx::query_as::<_, Deliberation>("SELECT * FROM deliberations WHERE guid = ?")
        .bind(guid)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Deliberation not found: {}", guid)))
}

/// Load a cell inside an open transaction
pub(crate) async fn load_cell(tx: &mut Transaction<'_, Sqlite>, guid: &str) -> Result<Cell> {
    sqlx::query_as::<_, Cell>("SELECT * FROM cells WHERE guid = ?")
        .bind(guid)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Cell not found: {}", guid)))
}
