//! Tuning knobs for the document pipeline.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Retry behaviour for agent calls that fail with a retryable error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Maximum number of times a retryable failure will be retried.
    pub max_retries: u32,
    /// Base delay for exponential back-off between retries.
    #[serde(with = "millis")]
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    /// No retries at all.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PipelineConfig {
    /// Signal terms looked for during context analysis. Matched
    /// case-insensitively on word boundaries.
    pub keywords: Vec<String>,
    /// Attachments larger than this are ignored.
    pub max_attachment_bytes: u64,
    /// Parts nested deeper than this are ignored.
    pub max_part_depth: usize,
    /// Confidence below this flags an attachment for manual review.
    pub review_threshold: f32,
    /// Number of items processed concurrently within one step.
    pub concurrency: usize,
    pub retry: RetryPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            keywords: [
                "invoice",
                "PO",
                "purchase order",
                "amount due",
                "bill",
                "receipt",
                "payment",
                "total due",
                "tax invoice",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            max_attachment_bytes: 25 * 1024 * 1024,
            max_part_depth: 16,
            review_threshold: 0.7,
            concurrency: 4,
            retry: RetryPolicy::default(),
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
    }

    #[test]
    fn partial_config_falls_back_to_defaults() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{ "reviewThreshold": 0.8, "retry": { "baseDelay": 5 } }"#).unwrap();
        assert_eq!(config.review_threshold, 0.8);
        assert_eq!(config.retry.base_delay, Duration::from_millis(5));
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.concurrency, 4);
    }
}
