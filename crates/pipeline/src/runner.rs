//! The document agent pipeline.
//!
//! Per item the pipeline runs: context analysis → attachment extraction →
//! classification → structured extraction → review → persistence. The
//! engine drives these stages one workflow step at a time through
//! [`DocumentPipeline::ingest`] and the `*_batch` methods.
//!
//! Failures are isolated: a failed call marks one attachment (or, for a
//! fetch, one item) and processing carries on with the rest of the batch.

use std::future::Future;
use std::sync::Arc;

use agents::{Agent, Classifier, Extractor, ItemRef, RawItem, SourceProvider, StorageSink};
use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::attachments::{collect_attachments, AttachmentLimits};
use crate::context::analyze_context;
use crate::item::{AttachmentState, BatchSummary, ItemSkip, ProcessingItem};
use crate::retry::with_retry;
use crate::stages::{fan_out, ClassifyStage, ExtractStage, PersistStage};
use crate::PipelineConfig;

/// Items after a batch stage, plus whether cancellation cut it short.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub items: Vec<ProcessingItem>,
    pub cancelled: bool,
}

impl BatchOutcome {
    pub fn summary(&self) -> BatchSummary {
        BatchSummary::of(&self.items)
    }
}

/// Checks applied by the review stage on top of the confidence threshold.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReviewRules {
    pub require_invoice_number: bool,
    pub require_line_items: bool,
    /// Overrides the configured review threshold when set.
    pub min_confidence: Option<f32>,
}

pub struct DocumentPipeline {
    config: PipelineConfig,
    classify: ClassifyStage,
    extract: ExtractStage,
}

impl DocumentPipeline {
    pub fn new(
        config: PipelineConfig,
        classifier: Arc<dyn Classifier>,
        extractor: Arc<dyn Extractor>,
    ) -> Self {
        let classify = ClassifyStage::new(classifier, config.retry.clone());
        let extract = ExtractStage::new(extractor, config.retry.clone());
        Self {
            config,
            classify,
            extract,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// A persistence stage for `table` on `sink`, using this pipeline's retry policy.
    pub fn persist_stage(&self, sink: Arc<dyn StorageSink>, table: &str) -> PersistStage {
        PersistStage::new(sink, table, self.config.retry.clone())
    }

    // -----------------------------------------------------------------------
    // Single-item stages
    // -----------------------------------------------------------------------

    /// Context analysis and attachment extraction.
    pub fn prepare(&self, raw: &RawItem) -> ProcessingItem {
        let mut item = ProcessingItem::new(raw.id.clone());
        item.context = analyze_context(raw, &self.config.keywords, self.config.max_part_depth);
        if !item.context.is_likely_invoice {
            item.skip_with(ItemSkip::NotInvoiceRelated);
            return item;
        }

        let limits = AttachmentLimits {
            max_bytes: self.config.max_attachment_bytes,
            max_depth: self.config.max_part_depth,
        };
        let attachments = collect_attachments(&raw.parts, limits);
        if attachments.is_empty() {
            item.skip_with(ItemSkip::NoSupportedAttachments);
            return item;
        }

        item.attachments = attachments.into_iter().map(AttachmentState::new).collect();
        item
    }

    /// Classify every attachment not yet classified.
    pub async fn classify_item(&self, mut item: ProcessingItem, min_confidence: Option<f32>) -> ProcessingItem {
        if !item.is_workable() {
            return item;
        }
        let threshold = min_confidence.unwrap_or(self.config.review_threshold);

        for index in 0..item.attachments.len() {
            let state = &item.attachments[index];
            if state.classification.is_some() || state.failed() {
                continue;
            }
            match self.classify.process(state.attachment.clone()).await {
                Ok(classification) => {
                    let state = &mut item.attachments[index];
                    if classification.is_invoice && classification.confidence < threshold {
                        state.needs_review = true;
                    }
                    state.classification = Some(classification);
                }
                Err(err) => {
                    warn!(item = %item.source_ref, error = %err, "classification failed");
                    item.record_failure(index, format!("classification failed: {}", err.message()));
                }
            }
        }

        item.settle();
        item
    }

    /// Extract every invoice attachment not yet extracted. Attachments that
    /// were never classified are classified first.
    pub async fn extract_item(&self, item: ProcessingItem, min_confidence: Option<f32>) -> ProcessingItem {
        let mut item = self.classify_item(item, min_confidence).await;
        if !item.is_workable() {
            return item;
        }
        let threshold = min_confidence.unwrap_or(self.config.review_threshold);

        for index in 0..item.attachments.len() {
            let state = &item.attachments[index];
            if !state.is_invoice() || state.extracted.is_some() || state.failed() {
                continue;
            }
            match self.extract.process(state.attachment.clone()).await {
                Ok(invoice) => {
                    let state = &mut item.attachments[index];
                    if invoice.extraction_confidence < threshold {
                        state.needs_review = true;
                    }
                    state.extracted = Some(invoice);
                }
                Err(err) => {
                    warn!(item = %item.source_ref, error = %err, "extraction failed");
                    item.record_failure(index, format!("extraction failed: {}", err.message()));
                }
            }
        }

        item.settle();
        item
    }

    /// Flag low-confidence and incomplete extracted records.
    pub fn review_item(&self, mut item: ProcessingItem, rules: ReviewRules) -> ProcessingItem {
        if !item.is_workable() {
            return item;
        }
        let threshold = rules.min_confidence.unwrap_or(self.config.review_threshold);

        for state in &mut item.attachments {
            if let Some(classification) = &state.classification {
                if classification.is_invoice && classification.confidence < threshold {
                    state.needs_review = true;
                }
            }
            let Some(invoice) = &state.extracted else {
                continue;
            };
            if invoice.extraction_confidence < threshold {
                state.needs_review = true;
            }
            state.issues.clear();
            let missing_number = invoice
                .invoice_number
                .as_deref()
                .map_or(true, |n| n.trim().is_empty());
            if rules.require_invoice_number && missing_number {
                state.issues.push("missing invoice number".to_string());
            }
            if rules.require_line_items && invoice.line_items.is_empty() {
                state.issues.push("no line items".to_string());
            }
            if !state.issues.is_empty() {
                state.needs_review = true;
            }
        }

        item.settle();
        item
    }

    /// Write one row per line item of every extracted record.
    ///
    /// A failed row is recorded against its attachment; rows already written
    /// stay written and the remaining rows are still attempted.
    pub async fn persist_item(&self, mut item: ProcessingItem, stage: &PersistStage) -> ProcessingItem {
        if !item.is_workable() {
            return item;
        }

        for index in 0..item.attachments.len() {
            let state = &item.attachments[index];
            let Some(invoice) = &state.extracted else {
                continue;
            };
            let rows = fan_out(
                &item.source_ref,
                &state.attachment.filename,
                invoice,
                state.needs_review,
            );

            for row in rows {
                let line = row.line_index;
                match stage.process(row).await {
                    Ok(id) => item.attachments[index].rows.push(id),
                    Err(err) => {
                        warn!(item = %item.source_ref, table = stage.table(), line, error = %err, "row insert failed");
                        item.record_failure(
                            index,
                            format!("persistence failed for line {line}: {}", err.message()),
                        );
                    }
                }
            }
        }

        item.settle();
        item
    }

    /// Every stage for one already-fetched item.
    pub async fn run_item(&self, raw: &RawItem, persist: Option<&PersistStage>) -> ProcessingItem {
        let item = self.prepare(raw);
        let item = self.extract_item(item, None).await;
        let item = self.review_item(item, ReviewRules::default());
        match persist {
            Some(stage) => self.persist_item(item, stage).await,
            None => item,
        }
    }

    // -----------------------------------------------------------------------
    // Batch stages
    // -----------------------------------------------------------------------

    /// Apply `stage` to every item with at most `concurrency` in flight.
    ///
    /// Once `cancel` fires no further items are started; in-flight ones run
    /// to completion. Output order matches input order.
    async fn for_each_item<F, Fut>(
        &self,
        items: Vec<ProcessingItem>,
        cancel: &CancellationToken,
        stage: F,
    ) -> BatchOutcome
    where
        F: Fn(ProcessingItem) -> Fut,
        Fut: Future<Output = ProcessingItem>,
    {
        let stage = &stage;
        let mut results: Vec<(usize, ProcessingItem)> = stream::iter(items.into_iter().enumerate())
            .map(|(index, item)| async move {
                if cancel.is_cancelled() {
                    return (index, item);
                }
                (index, stage(item).await)
            })
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;
        results.sort_by_key(|(index, _)| *index);

        BatchOutcome {
            items: results.into_iter().map(|(_, item)| item).collect(),
            cancelled: cancel.is_cancelled(),
        }
    }

    /// Enumerate, fetch and prepare items from `source`.
    ///
    /// A failing `list_items` is returned as an error (the step itself
    /// fails); a failing `fetch_item` only marks that item.
    #[instrument(skip(self, source, cancel), fields(provider = %source.provider()))]
    pub async fn ingest(
        &self,
        source: &dyn SourceProvider,
        query: &str,
        max: usize,
        cancel: &CancellationToken,
    ) -> Result<BatchOutcome, agents::AgentError> {
        let mut refs = with_retry(&self.config.retry, "list", || source.list_items(query, max)).await?;
        if refs.len() > max {
            warn!(found = refs.len(), max, "source ignored the item cap, truncating");
            refs.truncate(max);
        }
        info!(found = refs.len(), "enumerated source items");

        let placeholders: Vec<ProcessingItem> =
            refs.iter().map(|r| ProcessingItem::new(r.id.clone())).collect();

        let outcome = self
            .for_each_item(placeholders, cancel, |placeholder| async move {
                let item_ref = ItemRef::new(placeholder.source_ref.clone());
                match with_retry(&self.config.retry, "fetch", || source.fetch_item(&item_ref)).await {
                    Ok(raw) => self.prepare(&raw),
                    Err(err) => {
                        warn!(item = %item_ref.id, error = %err, "fetch failed");
                        ProcessingItem::failed(item_ref.id, format!("fetch failed: {}", err.message()))
                    }
                }
            })
            .await;

        debug!(summary = ?outcome.summary(), "ingest finished");
        Ok(outcome)
    }

    pub async fn classify_batch(
        &self,
        items: Vec<ProcessingItem>,
        min_confidence: Option<f32>,
        cancel: &CancellationToken,
    ) -> BatchOutcome {
        self.for_each_item(items, cancel, |item| self.classify_item(item, min_confidence))
            .await
    }

    pub async fn extract_batch(
        &self,
        items: Vec<ProcessingItem>,
        min_confidence: Option<f32>,
        cancel: &CancellationToken,
    ) -> BatchOutcome {
        self.for_each_item(items, cancel, |item| self.extract_item(item, min_confidence))
            .await
    }

    pub fn review_batch(&self, items: Vec<ProcessingItem>, rules: ReviewRules) -> BatchOutcome {
        BatchOutcome {
            items: items
                .into_iter()
                .map(|item| self.review_item(item, rules))
                .collect(),
            cancelled: false,
        }
    }

    pub async fn persist_batch(
        &self,
        items: Vec<ProcessingItem>,
        stage: &PersistStage,
        cancel: &CancellationToken,
    ) -> BatchOutcome {
        self.for_each_item(items, cancel, |item| self.persist_item(item, stage))
            .await
    }
}
