use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::cron::Tz;

pub const DEFAULT_RECONCILE_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_MAX_CONCURRENT_EXECUTIONS: usize = 10;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_OUTPUT_LIMIT_CHARS: usize = 4000;
pub const DEFAULT_BREAKER_THRESHOLD: u32 = 3;
pub const DEFAULT_BREAKER_OPEN_SECS: u64 = 60;
pub const DEFAULT_MAX_BACKOFF_SECS: u64 = 3600;

/// Top-level config (cronpulse.toml + CRONPULSE_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CronpulseConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default)]
    pub breaker: BreakerConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// How often the timer table is reconciled against the job store.
    #[serde(default = "default_reconcile_interval")]
    pub reconcile_interval_secs: u64,
    /// Upper bound on invocations in flight across all jobs.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_executions: usize,
    /// Zone cron expressions and date placeholders are evaluated in, as an
    /// IANA name (`Europe/Berlin`). An unknown name fails config loading.
    #[serde(default = "default_timezone")]
    pub timezone: Tz,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            reconcile_interval_secs: DEFAULT_RECONCILE_INTERVAL_SECS,
            max_concurrent_executions: DEFAULT_MAX_CONCURRENT_EXECUTIONS,
            timezone: default_timezone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Applied when a job's own timeout is 0.
    #[serde(default = "default_timeout")]
    pub default_timeout_secs: u64,
    #[serde(default = "default_output_limit")]
    pub output_limit_chars: usize,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: DEFAULT_TIMEOUT_SECS,
            output_limit_chars: DEFAULT_OUTPUT_LIMIT_CHARS,
            user_agent: default_user_agent(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures against one target before the breaker opens.
    #[serde(default = "default_breaker_threshold")]
    pub failure_threshold: u32,
    /// How long an open breaker short-circuits calls.
    #[serde(default = "default_breaker_open")]
    pub open_secs: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_BREAKER_THRESHOLD,
            open_secs: DEFAULT_BREAKER_OPEN_SECS,
        }
    }
}

/// Shape of the delay between a failed attempt and its retry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Always wait the job's `retry_backoff_secs`.
    #[default]
    Flat,
    /// `retry_backoff_secs * 2^attempt`, capped at `max_backoff_secs`.
    Exponential,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default)]
    pub backoff: BackoffStrategy,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            backoff: BackoffStrategy::Flat,
            max_backoff_secs: DEFAULT_MAX_BACKOFF_SECS,
        }
    }
}

fn default_reconcile_interval() -> u64 {
    DEFAULT_RECONCILE_INTERVAL_SECS
}
fn default_max_concurrent() -> usize {
    DEFAULT_MAX_CONCURRENT_EXECUTIONS
}
fn default_timezone() -> Tz {
    Tz::UTC
}
fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}
fn default_output_limit() -> usize {
    DEFAULT_OUTPUT_LIMIT_CHARS
}
fn default_user_agent() -> String {
    format!("cronpulse/{}", env!("CARGO_PKG_VERSION"))
}
fn default_breaker_threshold() -> u32 {
    DEFAULT_BREAKER_THRESHOLD
}
fn default_breaker_open() -> u64 {
    DEFAULT_BREAKER_OPEN_SECS
}
fn default_max_backoff() -> u64 {
    DEFAULT_MAX_BACKOFF_SECS
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.cronpulse/cronpulse.db", home)
}

impl CronpulseConfig {
    /// Load config from a TOML file with CRONPULSE_* env var overrides.
    ///
    /// Nested keys use a double underscore in env vars, e.g.
    /// `CRONPULSE_BREAKER__OPEN_SECS=120`. A missing file is not an error;
    /// every field has a default.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        Self::figment(&path)
            .extract()
            .map_err(|e| crate::error::CronpulseError::Config(e.to_string()))
    }

    fn figment(path: &str) -> Figment {
        Figment::from(Serialized::defaults(CronpulseConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("CRONPULSE_").split("__"))
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.cronpulse/cronpulse.toml", home)
}
