//! The agent contract and the external capabilities the pipeline consumes.

use async_trait::async_trait;
use bytes::Bytes;

use crate::types::{
    Classification, ExtractedInvoice, InvoiceRow, ItemRef, Notification, Provider, RawItem, RowId,
};
use crate::AgentError;

/// The uniform stage interface.
///
/// Classification, extraction and storage stages all implement this so the
/// pipeline can drive them (and wrap them in retries) the same way.
#[async_trait]
pub trait Agent: Send + Sync {
    type Input: Send;
    type Output: Send;

    /// Short stage name used in logs.
    fn name(&self) -> &'static str;

    async fn process(&self, input: Self::Input) -> Result<Self::Output, AgentError>;
}

/// A document source: an email inbox or a cloud drive.
#[async_trait]
pub trait SourceProvider: Send + Sync {
    fn provider(&self) -> Provider;

    /// Whether a live credential/token is held for this provider.
    async fn is_authenticated(&self) -> bool;

    async fn list_items(&self, query: &str, max: usize) -> Result<Vec<ItemRef>, AgentError>;

    async fn fetch_item(&self, item: &ItemRef) -> Result<RawItem, AgentError>;
}

/// The vision-language classification call.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, bytes: Bytes, mime_type: &str) -> Result<Classification, AgentError>;
}

/// The vision-language structured extraction call.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, bytes: Bytes, mime_type: &str) -> Result<ExtractedInvoice, AgentError>;
}

/// A keyed store accepting one row per call.
#[async_trait]
pub trait StorageSink: Send + Sync {
    async fn insert_row(&self, table: &str, record: &InvoiceRow) -> Result<RowId, AgentError>;
}

/// Delivery channel for Alert steps.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<(), AgentError>;
}

/// Notifier that writes alerts to the log. Used when nothing else is wired.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), AgentError> {
        tracing::warn!(
            channel = %notification.channel,
            subject = %notification.subject,
            "{}",
            notification.body
        );
        Ok(())
    }
}
