//! Threshold alerts over a job's recent failures.
//!
//! Every enabled rule for the job is checked independently. There is no
//! suppression beyond the rule's own window: while the count stays at or
//! above the threshold, each further failure notifies again.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use cronpulse_core::{AlertRule, AlertRuleStore, ExecutionStore, Job, Notifier, Result};

#[derive(Clone)]
pub struct AlertEvaluator {
    rules: Arc<dyn AlertRuleStore>,
    executions: Arc<dyn ExecutionStore>,
    notifier: Arc<dyn Notifier>,
}

impl AlertEvaluator {
    pub fn new(
        rules: Arc<dyn AlertRuleStore>,
        executions: Arc<dyn ExecutionStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            rules,
            executions,
            notifier,
        }
    }

    /// Check the job's rules after a failure. Returns how many notifications
    /// were delivered. Notifier errors are logged, not returned.
    pub async fn evaluate(
        &self,
        job: &Job,
        latest_error: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let rules = self.rules.list_enabled_rules_for_job(&job.id).await?;
        let mut sent = 0;

        for rule in rules.iter().filter(|r| r.enabled) {
            let since = now - Duration::minutes(i64::from(rule.window_minutes));
            let failures = self.executions.count_recent_failures(&job.id, since).await?;
            if failures < rule.failure_threshold {
                debug!(
                    job_id = %job.id,
                    rule_id = %rule.id,
                    failures,
                    threshold = rule.failure_threshold,
                    "alert threshold not reached"
                );
                continue;
            }
            if rule.recipients.is_empty() {
                warn!(rule_id = %rule.id, "alert rule has no recipients");
                continue;
            }

            let (subject, body) = render(job, rule, failures, latest_error);
            match self.notifier.send(&rule.recipients, &subject, &body).await {
                Ok(()) => {
                    sent += 1;
                    info!(
                        job_id = %job.id,
                        rule_id = %rule.id,
                        failures,
                        channel = self.notifier.channel_name(),
                        "failure alert sent"
                    );
                }
                Err(e) => warn!(
                    job_id = %job.id,
                    rule_id = %rule.id,
                    channel = self.notifier.channel_name(),
                    "failed to send alert: {e}"
                ),
            }
        }

        Ok(sent)
    }
}

fn render(job: &Job, rule: &AlertRule, failures: u32, latest_error: Option<&str>) -> (String, String) {
    let subject = format!("[cronpulse] job '{}' is failing", job.name);
    let body = format!(
        "Job '{}' failed {} times in the last {} minutes (threshold: {}).\nLatest error: {}",
        job.name,
        failures,
        rule.window_minutes,
        rule.failure_threshold,
        latest_error.unwrap_or("none"),
    );
    (subject, body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{failing_outcome, RecordingNotifier};
    use cronpulse_core::{NewAlertRule, NewJob, TriggerType};
    use cronpulse_store::SqliteStore;

    struct Fixture {
        store: Arc<SqliteStore>,
        notifier: Arc<RecordingNotifier>,
        evaluator: AlertEvaluator,
        job: Job,
    }

    fn fixture(threshold: u32, recipients: Vec<String>) -> Fixture {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let job = store
            .create_job(&NewJob::http("billing-sync", "0 * * * *", "http://localhost/sync"))
            .unwrap();
        store
            .create_alert_rule(&NewAlertRule {
                job_id: job.id.clone(),
                window_minutes: 60,
                failure_threshold: threshold,
                recipients,
                enabled: true,
            })
            .unwrap();
        let notifier = Arc::new(RecordingNotifier::default());
        let evaluator = AlertEvaluator::new(store.clone(), store.clone(), notifier.clone());
        Fixture {
            store,
            notifier,
            evaluator,
            job,
        }
    }

    async fn record_failures(store: &SqliteStore, job: &Job, at: DateTime<Utc>, n: usize) {
        for _ in 0..n {
            let id = store
                .create_running(&job.id, at, 0, TriggerType::Scheduled)
                .await
                .unwrap();
            store.close_execution(&id, &failing_outcome(at)).await.unwrap();
        }
    }

    #[tokio::test]
    async fn three_failures_notify_once_per_evaluation() {
        let f = fixture(3, vec!["ops@example.com".into()]);
        let now = Utc::now();
        record_failures(&f.store, &f.job, now - Duration::minutes(5), 3).await;

        let sent = f.evaluator.evaluate(&f.job, Some("HTTP 500"), now).await.unwrap();
        assert_eq!(sent, 1);

        let calls = f.notifier.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].recipients, vec!["ops@example.com".to_string()]);
        assert!(calls[0].subject.contains("billing-sync"));
        assert!(calls[0].body.contains("failed 3 times"));
        assert!(calls[0].body.contains("60 minutes"));
        assert!(calls[0].body.contains("threshold: 3"));
        assert!(calls[0].body.contains("HTTP 500"));

        // Still over threshold: the next evaluation notifies again.
        f.evaluator.evaluate(&f.job, Some("HTTP 500"), now).await.unwrap();
        assert_eq!(f.notifier.calls().len(), 2);
    }

    #[tokio::test]
    async fn two_failures_stay_quiet() {
        let f = fixture(3, vec!["ops@example.com".into()]);
        let now = Utc::now();
        record_failures(&f.store, &f.job, now - Duration::minutes(5), 2).await;

        assert_eq!(f.evaluator.evaluate(&f.job, None, now).await.unwrap(), 0);
        assert!(f.notifier.calls().is_empty());
    }

    #[tokio::test]
    async fn failures_outside_window_are_ignored() {
        let f = fixture(3, vec!["ops@example.com".into()]);
        let now = Utc::now();
        record_failures(&f.store, &f.job, now - Duration::minutes(90), 5).await;
        record_failures(&f.store, &f.job, now - Duration::minutes(1), 2).await;

        assert_eq!(f.evaluator.evaluate(&f.job, None, now).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn no_recipients_means_no_send() {
        let f = fixture(1, Vec::new());
        let now = Utc::now();
        record_failures(&f.store, &f.job, now, 1).await;

        assert_eq!(f.evaluator.evaluate(&f.job, None, now).await.unwrap(), 0);
        assert!(f.notifier.calls().is_empty());
    }

    #[tokio::test]
    async fn notifier_error_is_swallowed() {
        let f = fixture(1, vec!["ops@example.com".into()]);
        f.notifier.fail_next_sends(true);
        let now = Utc::now();
        record_failures(&f.store, &f.job, now, 1).await;

        assert_eq!(f.evaluator.evaluate(&f.job, Some("boom"), now).await.unwrap(), 0);
        assert_eq!(f.notifier.calls().len(), 1);
    }
}
