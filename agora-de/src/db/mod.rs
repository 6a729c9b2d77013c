//! Database access layer for the deliberation engine
//!
//! Thin typed query helpers over the shared pool. Engine modules that
//! need multi-statement atomicity open their own transactions and run
//! their statements inline; these helpers cover the single-query read
//! and insert paths used by the API surface.

pub mod cells;
pub mod deliberations;
pub mod ideas;
pub mod revisions;
