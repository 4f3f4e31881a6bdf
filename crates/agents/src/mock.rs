//! In-memory test doubles for every external capability.
//!
//! Each double records the calls it receives and returns a
//! programmer-specified result, so tests can assert both outcomes and the
//! exact set of agent calls issued.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;

use crate::traits::{Classifier, Extractor, Notifier, SourceProvider, StorageSink};
use crate::types::{
    Classification, ExtractedInvoice, InvoiceRow, ItemRef, Notification, Provider, RawItem, RowId,
};
use crate::AgentError;

/// Behaviour injected into a mock at construction time.
#[derive(Debug, Clone)]
pub enum MockBehaviour<T> {
    /// Return a specific value.
    Return(T),
    /// Fail with a `Retryable` error on every call.
    FailRetryable(String),
    /// Fail with a `Fatal` error on every call.
    FailFatal(String),
    /// Fail with a `Retryable` error `n` times, then return the value.
    Flaky(u32, T),
}

/// Per-key scripted outcomes plus a fallback.
#[derive(Debug)]
struct Script<T> {
    by_key: HashMap<Bytes, MockBehaviour<T>>,
    fallback: MockBehaviour<T>,
    attempts: HashMap<Bytes, u32>,
}

impl<T: Clone> Script<T> {
    fn new(fallback: MockBehaviour<T>) -> Self {
        Self {
            by_key: HashMap::new(),
            fallback,
            attempts: HashMap::new(),
        }
    }

    fn next(&mut self, key: &Bytes) -> Result<T, AgentError> {
        let attempt = self.attempts.entry(key.clone()).or_insert(0);
        *attempt += 1;
        let behaviour = self.by_key.get(key).unwrap_or(&self.fallback);
        match behaviour {
            MockBehaviour::Return(v) => Ok(v.clone()),
            MockBehaviour::FailRetryable(msg) => Err(AgentError::Retryable(msg.clone())),
            MockBehaviour::FailFatal(msg) => Err(AgentError::Fatal(msg.clone())),
            MockBehaviour::Flaky(failures, v) => {
                if *attempt <= *failures {
                    Err(AgentError::Retryable(format!("transient failure {attempt}")))
                } else {
                    Ok(v.clone())
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Source
// ---------------------------------------------------------------------------

/// A source that serves a fixed list of items.
pub struct MockSource {
    provider: Provider,
    authenticated: bool,
    items: Vec<RawItem>,
    broken: Vec<String>,
    list_error: Option<AgentError>,
    /// Item ids passed to `fetch_item`, in call order.
    pub fetches: Arc<Mutex<Vec<String>>>,
    /// Queries passed to `list_items`, in call order.
    pub queries: Arc<Mutex<Vec<String>>>,
}

impl MockSource {
    pub fn new(provider: Provider, items: Vec<RawItem>) -> Self {
        Self {
            provider,
            authenticated: true,
            items,
            broken: Vec::new(),
            list_error: None,
            fetches: Arc::new(Mutex::new(Vec::new())),
            queries: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// The provider reports no live token.
    pub fn unauthenticated(mut self) -> Self {
        self.authenticated = false;
        self
    }

    /// `fetch_item` fails fatally for `id`.
    pub fn with_broken_item(mut self, id: impl Into<String>) -> Self {
        self.broken.push(id.into());
        self
    }

    /// `list_items` fails with `err`.
    pub fn with_list_error(mut self, err: AgentError) -> Self {
        self.list_error = Some(err);
        self
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.lock().unwrap().len()
    }
}

#[async_trait]
impl SourceProvider for MockSource {
    fn provider(&self) -> Provider {
        self.provider
    }

    async fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    async fn list_items(&self, query: &str, max: usize) -> Result<Vec<ItemRef>, AgentError> {
        self.queries.lock().unwrap().push(query.to_string());
        if let Some(err) = &self.list_error {
            return Err(err.clone());
        }
        Ok(self
            .items
            .iter()
            .take(max)
            .map(|item| ItemRef::new(item.id.clone()))
            .collect())
    }

    async fn fetch_item(&self, item: &ItemRef) -> Result<RawItem, AgentError> {
        self.fetches.lock().unwrap().push(item.id.clone());
        if self.broken.contains(&item.id) {
            return Err(AgentError::Fatal(format!("cannot fetch {}", item.id)));
        }
        self.items
            .iter()
            .find(|raw| raw.id == item.id)
            .cloned()
            .ok_or_else(|| AgentError::Fatal(format!("unknown item {}", item.id)))
    }
}

// ---------------------------------------------------------------------------
// Classifier / Extractor
// ---------------------------------------------------------------------------

/// A classifier scripted by attachment bytes.
pub struct MockClassifier {
    script: Mutex<Script<Classification>>,
    /// Attachment payloads seen, in call order.
    pub calls: Arc<Mutex<Vec<Bytes>>>,
}

impl MockClassifier {
    /// Every attachment classifies as `classification` unless overridden.
    pub fn returning(classification: Classification) -> Self {
        Self::with_fallback(MockBehaviour::Return(classification))
    }

    pub fn with_fallback(fallback: MockBehaviour<Classification>) -> Self {
        Self {
            script: Mutex::new(Script::new(fallback)),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Override the outcome for one attachment payload.
    pub fn on(self, bytes: impl Into<Bytes>, behaviour: MockBehaviour<Classification>) -> Self {
        self.script.lock().unwrap().by_key.insert(bytes.into(), behaviour);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Classifier for MockClassifier {
    async fn classify(&self, bytes: Bytes, _mime_type: &str) -> Result<Classification, AgentError> {
        self.calls.lock().unwrap().push(bytes.clone());
        self.script.lock().unwrap().next(&bytes)
    }
}

/// An extractor scripted by attachment bytes.
pub struct MockExtractor {
    script: Mutex<Script<ExtractedInvoice>>,
    /// Attachment payloads seen, in call order.
    pub calls: Arc<Mutex<Vec<Bytes>>>,
}

impl MockExtractor {
    pub fn returning(invoice: ExtractedInvoice) -> Self {
        Self::with_fallback(MockBehaviour::Return(invoice))
    }

    pub fn with_fallback(fallback: MockBehaviour<ExtractedInvoice>) -> Self {
        Self {
            script: Mutex::new(Script::new(fallback)),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn on(self, bytes: impl Into<Bytes>, behaviour: MockBehaviour<ExtractedInvoice>) -> Self {
        self.script.lock().unwrap().by_key.insert(bytes.into(), behaviour);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Extractor for MockExtractor {
    async fn extract(&self, bytes: Bytes, _mime_type: &str) -> Result<ExtractedInvoice, AgentError> {
        self.calls.lock().unwrap().push(bytes.clone());
        self.script.lock().unwrap().next(&bytes)
    }
}

// ---------------------------------------------------------------------------
// Storage / notification
// ---------------------------------------------------------------------------

/// A sink that keeps inserted rows in memory.
#[derive(Default)]
pub struct MemorySink {
    /// `(table, row)` pairs, in insertion order.
    pub rows: Arc<Mutex<Vec<(String, InvoiceRow)>>>,
    reject_invoice: Option<String>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every row whose invoice number is `invoice_number`.
    pub fn rejecting(invoice_number: impl Into<String>) -> Self {
        Self {
            rows: Arc::new(Mutex::new(Vec::new())),
            reject_invoice: Some(invoice_number.into()),
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    pub fn rows(&self) -> Vec<(String, InvoiceRow)> {
        self.rows.lock().unwrap().clone()
    }
}

#[async_trait]
impl StorageSink for MemorySink {
    async fn insert_row(&self, table: &str, record: &InvoiceRow) -> Result<RowId, AgentError> {
        if self.reject_invoice.is_some() && record.invoice_number == self.reject_invoice {
            return Err(AgentError::Fatal("constraint violation".into()));
        }
        let mut rows = self.rows.lock().unwrap();
        rows.push((table.to_string(), record.clone()));
        Ok(RowId(format!("{table}-{}", rows.len())))
    }
}

/// A notifier that records every notification it is asked to send.
#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Arc<Mutex<Vec<Notification>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), AgentError> {
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}
