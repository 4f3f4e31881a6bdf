//! Agent-level error type.

use thiserror::Error;

/// Errors returned by an agent or an external capability.
///
/// The pipeline uses the variant to decide retry behaviour:
/// - `Retryable`: the call is retried with exponential back-off.
/// - `Fatal`: the call is recorded as failed immediately.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AgentError {
    /// Transient failure (rate limit, timeout, 5xx); the call may be retried.
    #[error("retryable agent error: {0}")]
    Retryable(String),

    /// Permanent failure; no retry should be attempted.
    #[error("fatal agent error: {0}")]
    Fatal(String),
}

impl AgentError {
    pub fn retryable(msg: impl Into<String>) -> Self {
        Self::Retryable(msg.into())
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::Fatal(msg.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }

    /// The message without the variant prefix.
    pub fn message(&self) -> &str {
        match self {
            Self::Retryable(msg) | Self::Fatal(msg) => msg,
        }
    }
}
