//! Execution runner: one trigger in, one closed Execution row out.
//!
//! Invocation problems (transport, non-2xx, timeout, open breaker) end up in
//! the row as a `failed` status with an error message; only storage failures
//! surface as `Err`. Retries and alerts are spawned and never delay the
//! caller.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, instrument, warn};

use cronpulse_core::cron::{self, Tz};
use cronpulse_core::{
    CronpulseConfig, CronpulseError, ExecutionId, ExecutionOutcome, ExecutionStatus,
    ExecutionStore, Job, JobStore, Result, TriggerType,
};

use crate::alert::AlertEvaluator;
use crate::breaker::{target_key, CircuitBreaker};
use crate::error::InvokeError;
use crate::invoke::{InvocationRequest, Invoker};
use crate::output::truncate_output;
use crate::placeholders::{PlaceholderContext, PlaceholderRenderer};
use crate::retry::{RetryController, RetryDecision};

pub const INTERNAL_HEADER: &str = "x-cronpulse-internal";
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Error message prefix for calls short-circuited by an open breaker.
pub const CIRCUIT_OPEN: &str = "circuit-open";

/// What a single run produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub execution_id: ExecutionId,
    pub status: ExecutionStatus,
    pub attempt: u32,
    pub error: Option<String>,
}

struct CallResult {
    status: ExecutionStatus,
    output: Option<String>,
    error: Option<String>,
}

impl CallResult {
    fn failed(error: String, output: Option<String>) -> Self {
        Self {
            status: ExecutionStatus::Failed,
            output,
            error: Some(error),
        }
    }
}

pub struct ExecutionRunner {
    jobs: Arc<dyn JobStore>,
    executions: Arc<dyn ExecutionStore>,
    invoker: Arc<dyn Invoker>,
    alerts: AlertEvaluator,
    breaker: CircuitBreaker,
    retry: RetryController,
    placeholders: PlaceholderRenderer,
    timezone: Tz,
    permits: Semaphore,
    default_timeout: Duration,
    output_limit: usize,
}

impl ExecutionRunner {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        executions: Arc<dyn ExecutionStore>,
        invoker: Arc<dyn Invoker>,
        alerts: AlertEvaluator,
        config: &CronpulseConfig,
    ) -> Self {
        let timezone = config.scheduler.timezone;
        let open_for = chrono::Duration::from_std(Duration::from_secs(config.breaker.open_secs))
            .unwrap_or(chrono::Duration::MAX);
        Self {
            jobs,
            executions,
            invoker,
            alerts,
            breaker: CircuitBreaker::new(config.breaker.failure_threshold, open_for),
            retry: RetryController::from_config(&config.retry).with_timezone(timezone),
            placeholders: PlaceholderRenderer::new(),
            timezone,
            permits: Semaphore::new(config.scheduler.max_concurrent_executions.max(1)),
            default_timeout: Duration::from_secs(config.runner.default_timeout_secs.max(1)),
            output_limit: config.runner.output_limit_chars,
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Run the first attempt of `job` for `trigger`.
    pub async fn run(self: &Arc<Self>, job: &Job, trigger: TriggerType) -> Result<RunReport> {
        self.run_attempt(job, trigger, 0).await
    }

    #[instrument(skip(self, job, trigger), fields(job_id = %job.id, trigger = %trigger))]
    pub async fn run_attempt(
        self: &Arc<Self>,
        job: &Job,
        trigger: TriggerType,
        attempt: u32,
    ) -> Result<RunReport> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| CronpulseError::Internal(format!("execution permits closed: {e}")))?;

        let started_at = Utc::now();
        let clock = tokio::time::Instant::now();
        let execution_id = if job.concurrency_control {
            match self
                .executions
                .create_running_exclusive(&job.id, started_at, attempt, trigger)
                .await?
            {
                Some(id) => id,
                None => return self.record_skip(job, trigger, attempt).await,
            }
        } else {
            self.executions
                .create_running(&job.id, started_at, attempt, trigger)
                .await?
        };
        debug!(execution_id = %execution_id, attempt, "execution started");

        let result = self.call_target(job, &execution_id, attempt, started_at).await;

        let ended_at = Utc::now();
        let outcome = ExecutionOutcome {
            status: result.status,
            ended_at,
            duration_ms: clock.elapsed().as_millis() as i64,
            output: result.output,
            error_message: result.error,
        };
        self.executions.close_execution(&execution_id, &outcome).await?;
        info!(
            execution_id = %execution_id,
            attempt,
            status = %outcome.status,
            duration_ms = outcome.duration_ms,
            error = outcome.error_message.as_deref().unwrap_or(""),
            "execution closed"
        );

        let next_at = cron::next_after(&job.cron_expression, ended_at, self.timezone);
        if let Err(e) = self
            .jobs
            .set_last_execution_and_next(&job.id, ended_at, next_at)
            .await
        {
            warn!("failed to update job timestamps: {e}");
        }

        if outcome.status.is_failure() {
            self.schedule_retry(job, attempt, ended_at);
            self.spawn_alerts(job, outcome.error_message.clone(), ended_at);
        }

        Ok(RunReport {
            execution_id,
            status: outcome.status,
            attempt,
            error: outcome.error_message,
        })
    }

    async fn record_skip(&self, job: &Job, trigger: TriggerType, attempt: u32) -> Result<RunReport> {
        let now = Utc::now();
        let execution_id = self
            .executions
            .create_running(&job.id, now, attempt, trigger)
            .await?;
        let error = "skipped: previous execution still running".to_string();
        self.executions
            .close_execution(
                &execution_id,
                &ExecutionOutcome {
                    status: ExecutionStatus::Skipped,
                    ended_at: now,
                    duration_ms: 0,
                    output: None,
                    error_message: Some(error.clone()),
                },
            )
            .await?;
        info!(execution_id = %execution_id, "previous execution still running, skipped");
        Ok(RunReport {
            execution_id,
            status: ExecutionStatus::Skipped,
            attempt,
            error: Some(error),
        })
    }

    async fn call_target(
        &self,
        job: &Job,
        execution_id: &ExecutionId,
        attempt: u32,
        now: DateTime<Utc>,
    ) -> CallResult {
        let key = target_key(&job.invocation.url);
        if let Some(until) = self.breaker.open_until(&key, now) {
            return CallResult::failed(
                format!("{CIRCUIT_OPEN}: calls to {key} suspended until {}", until.to_rfc3339()),
                None,
            );
        }

        let request = self.build_request(job, execution_id, attempt, now);
        let timeout = match job.invocation.timeout_secs {
            0 => self.default_timeout,
            secs => Duration::from_secs(secs),
        };

        let response = match tokio::time::timeout(timeout, self.invoker.invoke(&request)).await {
            Ok(r) => r,
            Err(_) => Err(InvokeError::Timeout {
                secs: timeout.as_secs(),
            }),
        };

        match response {
            Ok(res) => {
                let output = (!res.body.is_empty()).then(|| truncate_output(&res.body, self.output_limit));
                if res.is_success() {
                    self.breaker.record_success(&key);
                    CallResult {
                        status: ExecutionStatus::Success,
                        output,
                        error: None,
                    }
                } else {
                    self.breaker.record_failure(&key, Utc::now());
                    CallResult::failed(format!("HTTP {}", res.status), output)
                }
            }
            Err(e) => {
                if e.counts_against_target() {
                    self.breaker.record_failure(&key, Utc::now());
                }
                CallResult::failed(e.to_string(), None)
            }
        }
    }

    fn build_request(
        &self,
        job: &Job,
        execution_id: &ExecutionId,
        attempt: u32,
        now: DateTime<Utc>,
    ) -> InvocationRequest {
        let values = PlaceholderContext {
            now,
            timezone: self.timezone,
            execution_id: execution_id.as_str(),
            attempt,
        }
        .values();
        let render = |text: &str| self.placeholders.render(text, &values);
        let inv = &job.invocation;

        let mut headers: std::collections::BTreeMap<String, String> = inv
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), render(v)))
            .collect();
        headers.insert(INTERNAL_HEADER.to_string(), "1".to_string());
        headers.insert(REQUEST_ID_HEADER.to_string(), execution_id.to_string());

        InvocationRequest {
            url: render(&inv.url),
            method: inv.method.clone(),
            headers,
            body: inv.body.as_deref().map(render),
        }
    }

    /// Spawn the next attempt after a failure, if the retry policy allows one.
    ///
    /// The job is re-read when the delay elapses; a job deleted or disabled
    /// in the meantime is not retried.
    fn schedule_retry(self: &Arc<Self>, job: &Job, failed_attempt: u32, failed_at: DateTime<Utc>) {
        let plan = match self.retry.plan(job, failed_attempt, failed_at) {
            RetryDecision::Exhausted => {
                debug!(job_id = %job.id, attempt = failed_attempt, "no retries left");
                return;
            }
            RetryDecision::Superseded { next_run } => {
                info!(
                    job_id = %job.id,
                    next_run = %next_run,
                    "retry dropped, next scheduled run comes first"
                );
                return;
            }
            RetryDecision::OutOfRange { delay } => {
                warn!(
                    job_id = %job.id,
                    delay_secs = delay.as_secs(),
                    "retry delay out of range, retry dropped"
                );
                return;
            }
            RetryDecision::Scheduled(plan) => plan,
        };

        info!(
            job_id = %job.id,
            attempt = plan.attempt,
            fire_at = %plan.fire_at,
            "retry scheduled"
        );
        let runner = Arc::clone(self);
        let job_id = job.id.clone();
        tokio::spawn(async move {
            tokio::time::sleep(plan.delay).await;
            let job = match runner.jobs.get_job(&job_id).await {
                Ok(Some(job)) if job.enabled => job,
                Ok(_) => {
                    info!(job_id = %job_id, "job removed or disabled, retry dropped");
                    return;
                }
                Err(e) => {
                    error!(job_id = %job_id, "retry could not load job: {e}");
                    return;
                }
            };
            if let Err(e) = runner.run_attempt(&job, TriggerType::Retry, plan.attempt).await {
                error!(job_id = %job_id, attempt = plan.attempt, "retry failed to run: {e}");
            }
        });
    }

    fn spawn_alerts(&self, job: &Job, latest_error: Option<String>, now: DateTime<Utc>) {
        let alerts = self.alerts.clone();
        let job = job.clone();
        tokio::spawn(async move {
            if let Err(e) = alerts.evaluate(&job, latest_error.as_deref(), now).await {
                error!(job_id = %job.id, "alert evaluation failed: {e}");
            }
        });
    }
}
