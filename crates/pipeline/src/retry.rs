//! Exponential back-off around a single agent call.

use std::future::Future;

use agents::AgentError;
use tracing::warn;

use crate::RetryPolicy;

/// Run `call`, retrying `Retryable` failures up to `policy.max_retries` times.
///
/// A `Fatal` failure is returned immediately; an exhausted retry budget
/// returns the last retryable error.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, what: &str, mut call: F) -> Result<T, AgentError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AgentError>>,
{
    let mut attempts = 0u32;

    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(err @ AgentError::Fatal(_)) => return Err(err),
            Err(AgentError::Retryable(msg)) => {
                attempts += 1;
                if attempts > policy.max_retries {
                    return Err(AgentError::Retryable(format!(
                        "{msg} (gave up after {} retries)",
                        policy.max_retries
                    )));
                }

                let delay = policy.delay_for(attempts);
                warn!(
                    "{} retryable error (attempt {}/{}), retrying in {:?}: {}",
                    what, attempts, policy.max_retries, delay, msg
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn retryable_errors_are_retried_until_success() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(10),
        };

        let result = with_retry(&policy, "classify", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(AgentError::retryable("429"))
            } else {
                Ok(7)
            }
        })
        .await;

        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&RetryPolicy::default(), "extract", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(AgentError::fatal("bad document"))
        })
        .await;

        assert_eq!(result, Err(AgentError::Fatal("bad document".into())));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_budget_is_bounded() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(1),
        };
        let result: Result<(), _> = with_retry(&policy, "insert", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(AgentError::retryable("timeout"))
        })
        .await;

        assert!(matches!(result, Err(AgentError::Retryable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
