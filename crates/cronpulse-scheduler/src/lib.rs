//! `cronpulse-scheduler`: the scheduling and execution engine.
//!
//! [`Scheduler`] keeps one timer per enabled job and reconciles them against
//! the job store. Fired timers, retries and manual triggers all go through
//! [`ExecutionRunner`], which records an Execution row, guards targets with a
//! [`CircuitBreaker`] and hands failures to the [`RetryController`] and
//! [`AlertEvaluator`].

pub mod alert;
pub mod breaker;
pub mod engine;
pub mod error;
pub mod invoke;
pub mod output;
pub mod placeholders;
pub mod retry;
pub mod runner;

#[cfg(test)]
mod test_support;

pub use alert::AlertEvaluator;
pub use breaker::{target_key, BreakerState, CircuitBreaker};
pub use engine::{ReconcileReport, Scheduler, TimerInfo};
pub use error::InvokeError;
pub use invoke::{HttpInvoker, InvocationRequest, InvocationResponse, Invoker};
pub use placeholders::{PlaceholderContext, PlaceholderRenderer};
pub use retry::{RetryController, RetryDecision, RetryPlan};
pub use runner::{ExecutionRunner, RunReport, CIRCUIT_OPEN};
