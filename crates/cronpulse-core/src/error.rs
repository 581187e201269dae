use thiserror::Error;

#[derive(Debug, Error)]
pub enum CronpulseError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Invalid cron expression '{expr}': {reason}")]
    InvalidCron { expr: String, reason: String },

    #[error("Job not found: {id}")]
    JobNotFound { id: String },

    #[error("Job is disabled: {id}")]
    JobDisabled { id: String },

    #[error("Execution already closed: {id}")]
    ExecutionAlreadyClosed { id: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CronpulseError {
    /// Short, stable error code for logs and the management layer.
    pub fn code(&self) -> &'static str {
        match self {
            CronpulseError::Config(_) => "CONFIG_ERROR",
            CronpulseError::Database(_) => "DATABASE_ERROR",
            CronpulseError::InvalidCron { .. } => "INVALID_CRON",
            CronpulseError::JobNotFound { .. } => "JOB_NOT_FOUND",
            CronpulseError::JobDisabled { .. } => "JOB_DISABLED",
            CronpulseError::ExecutionAlreadyClosed { .. } => "EXECUTION_ALREADY_CLOSED",
            CronpulseError::Serialization(_) => "SERIALIZATION_ERROR",
            CronpulseError::Io(_) => "IO_ERROR",
            CronpulseError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, CronpulseError>;
