use thiserror::Error;

/// Why a call to an invocation target produced no response.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InvokeError {
    /// The call exceeded its per-invocation timeout and was cancelled.
    #[error("timed out after {secs}s")]
    Timeout { secs: u64 },

    /// Connection, DNS, TLS or body-read failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The descriptor could not be turned into a request (bad URL, method, ...).
    /// No network call was attempted.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl InvokeError {
    /// Whether this failure reached (or tried to reach) the target and so
    /// counts against its circuit breaker.
    pub fn counts_against_target(&self) -> bool {
        !matches!(self, InvokeError::InvalidRequest(_))
    }
}
