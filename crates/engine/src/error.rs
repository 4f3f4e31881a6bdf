//! Engine-level error types.

use thiserror::Error;

/// Errors produced by the workflow engine (graph queries + execution).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    // ------ Graph errors ------

    /// Two or more steps share the same ID.
    #[error("duplicate step id {0}")]
    DuplicateStepId(String),

    /// An edge references a step ID that doesn't exist in the workflow.
    #[error("edge {edge_id} references unknown step {step_id}")]
    UnknownStepReference { edge_id: String, step_id: String },

    /// Depth-first search found a back-edge into `step_id`.
    #[error("cycle detected at step {step_id}")]
    CycleDetected { step_id: String },

    // ------ Execution errors ------

    /// A step failed outside the per-item boundary.
    #[error("step {step} failed: {message}")]
    StepFatal { step: String, message: String },

    /// A step's retryable failure was exhausted.
    #[error("step {step} exceeded retry limit: {message}")]
    RetryExhausted { step: String, message: String },

    /// The run was cancelled cooperatively.
    #[error("cancelled")]
    Cancelled,

    /// Persisting workflows or run statistics failed.
    #[error("store error: {0}")]
    Store(String),

    #[error("workflow {0} not found")]
    WorkflowNotFound(uuid::Uuid),

    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Wrap an agent failure that escaped the per-item boundary of `step`.
    pub fn from_agent(step: &str, err: agents::AgentError) -> Self {
        match err {
            agents::AgentError::Retryable(message) => Self::RetryExhausted {
                step: step.to_string(),
                message,
            },
            agents::AgentError::Fatal(message) => Self::StepFatal {
                step: step.to_string(),
                message,
            },
        }
    }

    pub fn step_fatal(step: &str, message: impl Into<String>) -> Self {
        Self::StepFatal {
            step: step.to_string(),
            message: message.into(),
        }
    }
}
