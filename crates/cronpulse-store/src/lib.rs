//! `cronpulse-store`: SQLite persistence for jobs, executions and alert rules.
//!
//! [`SqliteStore`] implements the engine-facing contracts from
//! `cronpulse_core::store` and also carries the create/update/delete helpers
//! the management layer uses.

pub mod db;
pub mod error;
pub mod sqlite;

pub use error::{Result, StoreError};
pub use sqlite::SqliteStore;
