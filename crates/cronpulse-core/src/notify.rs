use async_trait::async_trait;
use thiserror::Error;

/// Errors a notification channel can report. The engine logs them and moves on.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Delivery failed: {0}")]
    Delivery(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Outbound alert channel (email, chat, ...). Delivery is best-effort.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, recipients: &[String], subject: &str, body: &str)
        -> Result<(), NotifyError>;

    /// Human-readable channel name for logs.
    fn channel_name(&self) -> &str;
}
