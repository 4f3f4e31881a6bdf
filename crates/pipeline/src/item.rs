//! Per-item state carried through the pipeline.

use std::fmt;

use agents::{Attachment, Classification, ExtractedInvoice, RowId};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::context::ContextSignals;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Processing,
    Completed,
    Error,
}

/// Benign reasons an item finishes without reaching extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemSkip {
    NotInvoiceRelated,
    NoSupportedAttachments,
}

impl fmt::Display for ItemSkip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotInvoiceRelated => f.write_str("not invoice-related"),
            Self::NoSupportedAttachments => f.write_str("no supported attachments"),
        }
    }
}

/// Everything the pipeline learned about one attachment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentState {
    pub attachment: Attachment,
    pub classification: Option<Classification>,
    pub extracted: Option<ExtractedInvoice>,
    /// Low confidence somewhere along the way; surface for manual review.
    pub needs_review: bool,
    /// Validation findings on the extracted record.
    pub issues: Vec<String>,
    pub rows: Vec<RowId>,
    /// Most recent failure for this attachment, if any.
    pub error: Option<String>,
}

impl AttachmentState {
    pub fn new(attachment: Attachment) -> Self {
        Self {
            attachment,
            classification: None,
            extracted: None,
            needs_review: false,
            issues: Vec::new(),
            rows: Vec::new(),
            error: None,
        }
    }

    pub fn is_invoice(&self) -> bool {
        self.classification.as_ref().is_some_and(|c| c.is_invoice)
    }

    pub fn failed(&self) -> bool {
        self.error.is_some()
    }
}

/// One email or file flowing through the pipeline.
///
/// Owned by exactly one pipeline invocation at a time; fan-out to several
/// downstream steps hands each of them its own clone.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingItem {
    pub source_ref: String,
    pub context: ContextSignals,
    pub attachments: Vec<AttachmentState>,
    pub status: ItemStatus,
    /// Skip reason or unexpected failure, in user-facing form.
    pub error: Option<String>,
    pub skip: Option<ItemSkip>,
    /// Per-attachment failures, prefixed with the attachment filename.
    pub failures: Vec<String>,
}

impl ProcessingItem {
    pub fn new(source_ref: impl Into<String>) -> Self {
        Self {
            source_ref: source_ref.into(),
            context: ContextSignals::default(),
            attachments: Vec::new(),
            status: ItemStatus::Processing,
            error: None,
            skip: None,
            failures: Vec::new(),
        }
    }

    /// An item that could not even be fetched.
    pub fn failed(source_ref: impl Into<String>, error: impl Into<String>) -> Self {
        let mut item = Self::new(source_ref);
        item.status = ItemStatus::Error;
        item.error = Some(error.into());
        item
    }

    pub(crate) fn skip_with(&mut self, reason: ItemSkip) {
        self.status = ItemStatus::Completed;
        self.skip = Some(reason);
        self.error = Some(reason.to_string());
    }

    /// Later stages only touch items that are neither skipped nor failed.
    pub fn is_workable(&self) -> bool {
        self.status != ItemStatus::Error && self.skip.is_none()
    }

    pub(crate) fn record_failure(&mut self, index: usize, message: String) {
        let state = &mut self.attachments[index];
        self.failures
            .push(format!("{}: {message}", state.attachment.filename));
        state.error = Some(message);
    }

    /// Every attachment has been attempted by the current stage.
    pub(crate) fn settle(&mut self) {
        if self.status == ItemStatus::Processing {
            self.status = ItemStatus::Completed;
        }
    }

    /// Drop attachment payloads; the metadata stays.
    pub fn release_payloads(&mut self) {
        for state in &mut self.attachments {
            state.attachment.bytes = Bytes::new();
        }
    }
}

/// Counts surfaced in a step's output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub items: usize,
    pub processing: usize,
    pub completed: usize,
    pub skipped: usize,
    pub errors: usize,
    pub attachments: usize,
    pub invoices: usize,
    pub extracted: usize,
    pub rows_persisted: usize,
    pub needs_review: usize,
    pub failures: usize,
    pub issues: usize,
}

impl BatchSummary {
    pub fn of(items: &[ProcessingItem]) -> Self {
        let mut summary = Self {
            items: items.len(),
            ..Self::default()
        };
        for item in items {
            match item.status {
                ItemStatus::Processing => summary.processing += 1,
                ItemStatus::Completed if item.skip.is_some() => summary.skipped += 1,
                ItemStatus::Completed => summary.completed += 1,
                ItemStatus::Error => summary.errors += 1,
            }
            summary.failures += item.failures.len();
            for state in &item.attachments {
                summary.attachments += 1;
                summary.invoices += usize::from(state.is_invoice());
                summary.extracted += usize::from(state.extracted.is_some());
                summary.rows_persisted += state.rows.len();
                summary.needs_review += usize::from(state.needs_review);
                summary.issues += state.issues.len();
            }
        }
        summary
    }

    /// Merge another summary into this one.
    pub fn absorb(&mut self, other: &BatchSummary) {
        self.items += other.items;
        self.processing += other.processing;
        self.completed += other.completed;
        self.skipped += other.skipped;
        self.errors += other.errors;
        self.attachments += other.attachments;
        self.invoices += other.invoices;
        self.extracted += other.extracted;
        self.rows_persisted += other.rows_persisted;
        self.needs_review += other.needs_review;
        self.failures += other.failures;
        self.issues += other.issues;
    }

    /// Any item error, attachment failure or validation issue.
    pub fn has_error(&self) -> bool {
        self.errors > 0 || self.failures > 0 || self.issues > 0
    }
}
