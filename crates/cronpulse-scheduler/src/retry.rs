//! Retry controller: decides whether and when a failed attempt is re-run.
//!
//! A retry that would land at or after the job's next natural cron
//! occurrence is dropped; the scheduled run covers it.

use std::time::Duration;

use chrono::{DateTime, Utc};
use cronpulse_core::config::{BackoffStrategy, RetryConfig};
use cronpulse_core::cron::{self, Tz};
use cronpulse_core::Job;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPlan {
    /// Attempt number the retry will run as.
    pub attempt: u32,
    pub delay: Duration,
    pub fire_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// `max_retries` reached.
    Exhausted,
    /// The next scheduled run comes first.
    Superseded { next_run: DateTime<Utc> },
    /// The delay reaches past the representable calendar.
    OutOfRange { delay: Duration },
    Scheduled(RetryPlan),
}

#[derive(Debug, Clone)]
pub struct RetryController {
    strategy: BackoffStrategy,
    max_backoff: Duration,
    timezone: Tz,
}

impl RetryController {
    pub fn new(strategy: BackoffStrategy, max_backoff: Duration) -> Self {
        Self {
            strategy,
            max_backoff,
            timezone: Tz::UTC,
        }
    }

    /// Zone used to find the job's next natural occurrence.
    pub fn with_timezone(mut self, timezone: Tz) -> Self {
        self.timezone = timezone;
        self
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.backoff, Duration::from_secs(config.max_backoff_secs))
    }

    /// Delay before re-running after attempt `failed_attempt` failed.
    /// Never less than one second.
    pub fn delay_for(&self, backoff_secs: u64, failed_attempt: u32) -> Duration {
        let secs = match self.strategy {
            BackoffStrategy::Flat => backoff_secs,
            BackoffStrategy::Exponential => {
                let factor = 2u64.checked_pow(failed_attempt).unwrap_or(u64::MAX);
                backoff_secs
                    .saturating_mul(factor)
                    .min(self.max_backoff.as_secs())
            }
        };
        Duration::from_secs(secs.max(1))
    }

    pub fn plan(&self, job: &Job, failed_attempt: u32, failed_at: DateTime<Utc>) -> RetryDecision {
        if failed_attempt >= job.max_retries {
            return RetryDecision::Exhausted;
        }

        let delay = self.delay_for(job.retry_backoff_secs, failed_attempt);
        let Some(fire_at) = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|d| failed_at.checked_add_signed(d))
        else {
            return RetryDecision::OutOfRange { delay };
        };

        if let Some(next_run) = cron::next_after(&job.cron_expression, failed_at, self.timezone) {
            if fire_at >= next_run {
                return RetryDecision::Superseded { next_run };
            }
        }

        RetryDecision::Scheduled(RetryPlan {
            attempt: failed_attempt + 1,
            delay,
            fire_at,
        })
    }
}

impl Default for RetryController {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}
