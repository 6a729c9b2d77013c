//! # Agora Common Library
//!
//! Shared code for the Agora deliberation services including:
//! - Database schema, initialization, and settings access
//! - Entity models and status enums
//! - Event types (AgoraEvent enum) and the EventBus
//! - Configuration loading and root folder resolution
//! - Error types

pub mod config;
pub mod db;
pub mod error;
pub mod events;

pub use error::{Error, Result};
