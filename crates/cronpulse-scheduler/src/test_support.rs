//! Fakes shared by the unit tests in this crate.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Notify;

use cronpulse_core::{ExecutionOutcome, ExecutionStatus, Notifier, NotifyError};

use crate::error::InvokeError;
use crate::invoke::{InvocationRequest, InvocationResponse, Invoker};

/// What the scripted invoker does for one call.
#[derive(Clone)]
pub enum Step {
    Status(u16, String),
    Error(InvokeError),
    /// Sleep, then answer 200. Long sleeps exercise the runner timeout.
    Sleep(Duration),
    /// Block until the gate is notified, then answer 200.
    Gate(Arc<Notify>),
}

impl Step {
    pub fn ok() -> Self {
        Step::Status(200, "ok".into())
    }

    pub fn status(code: u16) -> Self {
        Step::Status(code, format!("status {code}"))
    }
}

#[derive(Debug, Clone)]
pub struct Call {
    pub request: InvocationRequest,
    pub at: tokio::time::Instant,
}

/// Answers from a queue of steps, then repeats `fallback`.
pub struct ScriptedInvoker {
    steps: Mutex<VecDeque<Step>>,
    fallback: Step,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedInvoker {
    pub fn always(step: Step) -> Self {
        Self::scripted(Vec::new(), step)
    }

    pub fn scripted(steps: Vec<Step>, fallback: Step) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            fallback,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Invoker for ScriptedInvoker {
    async fn invoke(&self, request: &InvocationRequest) -> Result<InvocationResponse, InvokeError> {
        self.calls.lock().unwrap().push(Call {
            request: request.clone(),
            at: tokio::time::Instant::now(),
        });
        let step = self
            .steps
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        match step {
            Step::Status(status, body) => Ok(InvocationResponse { status, body }),
            Step::Error(e) => Err(e),
            Step::Sleep(d) => {
                tokio::time::sleep(d).await;
                Ok(InvocationResponse {
                    status: 200,
                    body: "slow".into(),
                })
            }
            Step::Gate(gate) => {
                gate.notified().await;
                Ok(InvocationResponse {
                    status: 200,
                    body: "released".into(),
                })
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct SentAlert {
    pub recipients: Vec<String>,
    pub subject: String,
    pub body: String,
}

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<SentAlert>>,
    fail: AtomicBool,
}

impl RecordingNotifier {
    pub fn calls(&self) -> Vec<SentAlert> {
        self.sent.lock().unwrap().clone()
    }

    pub fn fail_next_sends(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, recipients: &[String], subject: &str, body: &str) -> Result<(), NotifyError> {
        self.sent.lock().unwrap().push(SentAlert {
            recipients: recipients.to_vec(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        if self.fail.load(Ordering::SeqCst) {
            return Err(NotifyError::Delivery("smtp unreachable".into()));
        }
        Ok(())
    }

    fn channel_name(&self) -> &str {
        "recording"
    }
}

pub fn failing_outcome(at: DateTime<Utc>) -> ExecutionOutcome {
    ExecutionOutcome {
        status: ExecutionStatus::Failed,
        ended_at: at,
        duration_ms: 1,
        output: None,
        error_message: Some("HTTP 500".into()),
    }
}

/// Poll `check` until it holds or `within` elapses.
pub async fn eventually<F>(within: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + within;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
