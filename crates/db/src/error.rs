//! Typed error type for the db crate.

use agents::AgentError;
use engine::EngineError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("sqlx error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("row not found")]
    NotFound,

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("stored definition is malformed: {0}")]
    Definition(#[from] serde_json::Error),

    #[error("invalid table name '{0}'")]
    InvalidTable(String),
}

impl DbError {
    /// Connection-level failures that may succeed on a later attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Sqlx(sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::PoolClosed)
        )
    }
}

impl From<DbError> for EngineError {
    fn from(err: DbError) -> Self {
        EngineError::Store(err.to_string())
    }
}

impl From<DbError> for AgentError {
    fn from(err: DbError) -> Self {
        if err.is_transient() {
            AgentError::Retryable(err.to_string())
        } else {
            AgentError::Fatal(err.to_string())
        }
    }
}
