//! Persistence contracts consumed by the engine.
//!
//! The engine never talks to a database directly; it reads jobs and rules and
//! writes executions through these traits. `cronpulse-store` provides the
//! SQLite implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::{AlertRule, ExecutionId, ExecutionOutcome, Job, JobId, TriggerType};

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn list_enabled_jobs(&self) -> Result<Vec<Job>>;

    async fn get_job(&self, id: &JobId) -> Result<Option<Job>>;

    /// Record the end of the latest execution and the informational next run.
    async fn set_last_execution_and_next(
        &self,
        id: &JobId,
        last_at: DateTime<Utc>,
        next_at: Option<DateTime<Utc>>,
    ) -> Result<()>;
}

#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Open a new execution row in `running`.
    async fn create_running(
        &self,
        job_id: &JobId,
        started_at: DateTime<Utc>,
        attempt: u32,
        trigger_type: TriggerType,
    ) -> Result<ExecutionId>;

    /// Open a `running` row only if the job has none open, as one atomic
    /// step. `None` means another execution of the job is still running.
    async fn create_running_exclusive(
        &self,
        job_id: &JobId,
        started_at: DateTime<Utc>,
        attempt: u32,
        trigger_type: TriggerType,
    ) -> Result<Option<ExecutionId>>;

    /// Close a `running` row. Closing twice is an `ExecutionAlreadyClosed` error.
    async fn close_execution(&self, id: &ExecutionId, outcome: &ExecutionOutcome) -> Result<()>;

    /// Failed (or timed-out) executions of `job_id` started at or after `since`.
    async fn count_recent_failures(&self, job_id: &JobId, since: DateTime<Utc>) -> Result<u32>;

    async fn has_open_execution(&self, job_id: &JobId) -> Result<bool>;

    /// Close every row still `running` as failed with `reason`. Used once at
    /// startup; returns the number of rows closed.
    async fn fail_orphaned(&self, ended_at: DateTime<Utc>, reason: &str) -> Result<usize>;
}

#[async_trait]
pub trait AlertRuleStore: Send + Sync {
    async fn list_enabled_rules_for_job(&self, job_id: &JobId) -> Result<Vec<AlertRule>>;
}
