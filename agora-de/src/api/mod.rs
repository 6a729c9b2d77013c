//! HTTP API handlers for agora-de

pub mod cells;
pub mod deliberations;
pub mod health;
pub mod revisions;
pub mod sse;

pub use health::health_check;
pub use sse::event_stream;
