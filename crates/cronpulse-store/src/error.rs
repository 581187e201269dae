use cronpulse_core::CronpulseError;
use thiserror::Error;

/// Errors that can occur within the persistence layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A JSON column could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Rejected before it reached the database.
    #[error(transparent)]
    InvalidCron(CronpulseError),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// A close was attempted on a row that is no longer `running`.
    #[error("Execution already closed: {id}")]
    AlreadyClosed { id: String },
}

impl From<StoreError> for CronpulseError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::InvalidCron(inner) => inner,
            StoreError::NotFound { kind: "job", id } => CronpulseError::JobNotFound { id },
            StoreError::AlreadyClosed { id } => CronpulseError::ExecutionAlreadyClosed { id },
            StoreError::Serialization(e) => CronpulseError::Serialization(e),
            other => CronpulseError::Database(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
