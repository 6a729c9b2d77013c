//! Database models, schema initialization, and settings access

pub mod init;
pub mod models;
pub mod settings;

pub use init::*;
pub use models::*;
pub use settings::*;
