//! Pipeline stages expressed through the uniform [`Agent`] contract.
//!
//! Each stage wraps one external capability and applies the retry policy, so
//! the runner never calls a classifier, extractor or sink directly.

use std::sync::Arc;

use agents::{
    Agent, AgentError, Attachment, Classification, Classifier, ExtractedInvoice, Extractor,
    InvoiceRow, RowId, StorageSink,
};
use async_trait::async_trait;

use crate::retry::with_retry;
use crate::RetryPolicy;

pub struct ClassifyStage {
    classifier: Arc<dyn Classifier>,
    retry: RetryPolicy,
}

impl ClassifyStage {
    pub fn new(classifier: Arc<dyn Classifier>, retry: RetryPolicy) -> Self {
        Self { classifier, retry }
    }
}

#[async_trait]
impl Agent for ClassifyStage {
    type Input = Attachment;
    type Output = Classification;

    fn name(&self) -> &'static str {
        "classify"
    }

    async fn process(&self, input: Attachment) -> Result<Classification, AgentError> {
        with_retry(&self.retry, self.name(), || {
            self.classifier.classify(input.bytes.clone(), &input.mime_type)
        })
        .await
    }
}

pub struct ExtractStage {
    extractor: Arc<dyn Extractor>,
    retry: RetryPolicy,
}

impl ExtractStage {
    pub fn new(extractor: Arc<dyn Extractor>, retry: RetryPolicy) -> Self {
        Self { extractor, retry }
    }
}

#[async_trait]
impl Agent for ExtractStage {
    type Input = Attachment;
    type Output = ExtractedInvoice;

    fn name(&self) -> &'static str {
        "extract"
    }

    async fn process(&self, input: Attachment) -> Result<ExtractedInvoice, AgentError> {
        with_retry(&self.retry, self.name(), || {
            self.extractor.extract(input.bytes.clone(), &input.mime_type)
        })
        .await
    }
}

/// Writes single rows into one table of one sink.
pub struct PersistStage {
    sink: Arc<dyn StorageSink>,
    table: String,
    retry: RetryPolicy,
}

impl PersistStage {
    pub fn new(sink: Arc<dyn StorageSink>, table: impl Into<String>, retry: RetryPolicy) -> Self {
        Self {
            sink,
            table: table.into(),
            retry,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }
}

#[async_trait]
impl Agent for PersistStage {
    type Input = InvoiceRow;
    type Output = RowId;

    fn name(&self) -> &'static str {
        "persist"
    }

    async fn process(&self, input: InvoiceRow) -> Result<RowId, AgentError> {
        with_retry(&self.retry, self.name(), || {
            self.sink.insert_row(&self.table, &input)
        })
        .await
    }
}

/// One row per line item, each carrying the shared invoice header.
pub fn fan_out(
    source_ref: &str,
    filename: &str,
    invoice: &ExtractedInvoice,
    needs_review: bool,
) -> Vec<InvoiceRow> {
    invoice
        .line_items
        .iter()
        .enumerate()
        .map(|(index, line)| InvoiceRow {
            source_ref: source_ref.to_string(),
            filename: filename.to_string(),
            invoice_number: invoice.invoice_number.clone(),
            po_number: invoice.po_number.clone(),
            invoice_date: invoice.date.clone(),
            supplier_tax_id: invoice.tax_ids.supplier.clone(),
            buyer_tax_id: invoice.tax_ids.buyer.clone(),
            currency: invoice.currency.clone(),
            line_index: index as u32,
            line: line.clone(),
            extraction_confidence: invoice.extraction_confidence,
            needs_review,
        })
        .collect()
}
