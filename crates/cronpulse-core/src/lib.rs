//! `cronpulse-core`: shared types, contracts and configuration for the
//! cronpulse scheduling engine.
//!
//! The engine itself lives in `cronpulse-scheduler`; persistence in
//! `cronpulse-store`. This crate holds what both sides agree on: the entity
//! model, the cron evaluator, the store and notifier contracts, and config.

pub mod config;
pub mod cron;
pub mod error;
pub mod notify;
pub mod store;
pub mod types;

pub use config::CronpulseConfig;
pub use error::{CronpulseError, Result};
pub use notify::{Notifier, NotifyError};
pub use store::{AlertRuleStore, ExecutionStore, JobStore};
pub use types::{
    AlertRule, AlertRuleId, Execution, ExecutionId, ExecutionOutcome, ExecutionStatus, Invocation,
    Job, JobId, NewAlertRule, NewJob, TriggerType,
};
