//! Per-target circuit breaker.
//!
//! State lives in a sharded [`DashMap`] so unrelated targets never contend on
//! one lock. Entries are created on the first failure and removed on success;
//! nothing is persisted, so a restart closes every breaker.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tracing::warn;

/// Failure bookkeeping for one target key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerState {
    pub consecutive_failures: u32,
    pub open_until: Option<DateTime<Utc>>,
}

pub struct CircuitBreaker {
    entries: DashMap<String, BreakerState>,
    threshold: u32,
    open_for: Duration,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, open_for: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            threshold: threshold.max(1),
            open_for,
        }
    }

    /// True while `now` is before the key's open-until instant.
    pub fn is_open(&self, key: &str, now: DateTime<Utc>) -> bool {
        self.open_until(key, now).is_some()
    }

    /// The open-until instant if the breaker for `key` is currently open.
    pub fn open_until(&self, key: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.entries
            .get(key)
            .and_then(|s| s.open_until)
            .filter(|until| now < *until)
    }

    /// Count one more consecutive failure, opening the breaker at the threshold.
    ///
    /// Once past the threshold every further failure re-opens it, so a trial call
    /// that fails after the cool-down puts the key straight back to open.
    pub fn record_failure(&self, key: &str, now: DateTime<Utc>) -> BreakerState {
        let mut entry = self.entries.entry(key.to_string()).or_insert(BreakerState {
            consecutive_failures: 0,
            open_until: None,
        });
        entry.consecutive_failures += 1;
        if entry.consecutive_failures >= self.threshold {
            let until = now
                .checked_add_signed(self.open_for)
                .unwrap_or(DateTime::<Utc>::MAX_UTC);
            entry.open_until = Some(until);
            warn!(
                target_key = key,
                failures = entry.consecutive_failures,
                open_until = %until,
                "circuit breaker opened"
            );
        }
        *entry
    }

    pub fn record_success(&self, key: &str) {
        self.entries.remove(key);
    }

    pub fn state(&self, key: &str) -> Option<BreakerState> {
        self.entries.get(key).map(|s| *s)
    }
}

/// Breaker key for a target URL: scheme, host, port and path, without query
/// or fragment. Unparseable input is used trimmed as-is.
pub fn target_key(url: &str) -> String {
    match reqwest::Url::parse(url.trim()) {
        Ok(mut parsed) => {
            parsed.set_query(None);
            parsed.set_fragment(None);
            parsed.to_string()
        }
        Err(_) => url.trim().to_string(),
    }
}
