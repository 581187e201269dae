//! Alert channel that writes to the log. Used until a real transport
//! (email, chat) is configured.

use async_trait::async_trait;
use cronpulse_core::{Notifier, NotifyError};
use tracing::warn;

pub(crate) struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, recipients: &[String], subject: &str, body: &str) -> Result<(), NotifyError> {
        if recipients.is_empty() {
            return Err(NotifyError::Config("no recipients".into()));
        }
        warn!(
            recipients = %recipients.join(","),
            subject,
            body,
            "ALERT"
        );
        Ok(())
    }

    fn channel_name(&self) -> &str {
        "log"
    }
}
