use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// UUIDv7, so ids sort by creation time.
            pub fn new() -> Self {
                Self(Uuid::now_v7().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id!(
    /// Primary key of a persisted [`Job`].
    JobId
);
string_id!(
    /// Primary key of a persisted [`Execution`].
    ExecutionId
);
string_id!(AlertRuleId);

/// How to call the job's target. HTTP is the only invocation kind today.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invocation {
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<String>,
    /// Per-invocation timeout; 0 means "use the runner default".
    #[serde(default)]
    pub timeout_secs: u64,
}

fn default_method() -> String {
    "GET".to_string()
}

impl Invocation {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: default_method(),
            headers: BTreeMap::new(),
            body: None,
            timeout_secs: 0,
        }
    }
}

/// A persisted, cron-driven unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub name: String,
    pub cron_expression: String,
    pub enabled: bool,
    pub invocation: Invocation,
    /// Skip a trigger while a previous execution of this job is still running.
    pub concurrency_control: bool,
    pub max_retries: u32,
    pub retry_backoff_secs: u64,
    pub last_execution_at: Option<DateTime<Utc>>,
    /// Informational only. The scheduler's timer table is authoritative.
    pub next_execution_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields supplied by the management layer when creating a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewJob {
    pub name: String,
    pub cron_expression: String,
    #[serde(default = "bool_true")]
    pub enabled: bool,
    pub invocation: Invocation,
    #[serde(default)]
    pub concurrency_control: bool,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default = "default_backoff")]
    pub retry_backoff_secs: u64,
}

fn bool_true() -> bool {
    true
}

fn default_backoff() -> u64 {
    60
}

impl NewJob {
    /// An enabled GET job with no retries and no concurrency control.
    pub fn http(
        name: impl Into<String>,
        cron_expression: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            cron_expression: cron_expression.into(),
            enabled: true,
            invocation: Invocation::get(url),
            concurrency_control: false,
            max_retries: 0,
            retry_backoff_secs: default_backoff(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Success,
    Failed,
    Skipped,
    Timeout,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Success => "success",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Skipped => "skipped",
            ExecutionStatus::Timeout => "timeout",
        }
    }

    /// True for statuses that count toward alert thresholds.
    pub fn is_failure(&self) -> bool {
        matches!(self, ExecutionStatus::Failed | ExecutionStatus::Timeout)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ExecutionStatus::Pending),
            "running" => Ok(ExecutionStatus::Running),
            "success" => Ok(ExecutionStatus::Success),
            "failed" => Ok(ExecutionStatus::Failed),
            "skipped" => Ok(ExecutionStatus::Skipped),
            "timeout" => Ok(ExecutionStatus::Timeout),
            other => Err(format!("unknown execution status: {other}")),
        }
    }
}

/// Why an execution was created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    Scheduled,
    Manual,
    Retry,
    Api,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerType::Scheduled => "scheduled",
            TriggerType::Manual => "manual",
            TriggerType::Retry => "retry",
            TriggerType::Api => "api",
        }
    }
}

impl fmt::Display for TriggerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TriggerType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(TriggerType::Scheduled),
            "manual" => Ok(TriggerType::Manual),
            "retry" => Ok(TriggerType::Retry),
            "api" => Ok(TriggerType::Api),
            other => Err(format!("unknown trigger type: {other}")),
        }
    }
}

/// One attempt to run a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: ExecutionId,
    pub job_id: JobId,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    /// Captured response body, already truncated by the runner.
    pub output: Option<String>,
    pub error_message: Option<String>,
    /// 0 for the first attempt, incremented by each retry.
    pub attempt: u32,
    pub trigger_type: TriggerType,
}

/// The terminal fields written when an execution is closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub status: ExecutionStatus,
    pub ended_at: DateTime<Utc>,
    pub duration_ms: i64,
    pub output: Option<String>,
    pub error_message: Option<String>,
}

/// Threshold policy: notify when a job fails too often within a window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: AlertRuleId,
    pub job_id: JobId,
    pub window_minutes: u32,
    pub failure_threshold: u32,
    pub recipients: Vec<String>,
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAlertRule {
    pub job_id: JobId,
    pub window_minutes: u32,
    pub failure_threshold: u32,
    pub recipients: Vec<String>,
    #[serde(default = "bool_true")]
    pub enabled: bool,
}
