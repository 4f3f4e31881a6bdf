//! Behaviour tests for the document pipeline, driven entirely by the
//! in-memory doubles from `agents::mock`.

use std::collections::BTreeMap;
use std::sync::Arc;

use agents::mock::{MemorySink, MockBehaviour, MockClassifier, MockExtractor, MockSource};
use agents::{
    AgentError, Classification, ExtractedInvoice, ItemRef, LineItem, MimePart, Provider, RawItem,
    SourceProvider,
};
use tokio_util::sync::CancellationToken;

use crate::{DocumentPipeline, ItemSkip, ItemStatus, PipelineConfig, RetryPolicy, ReviewRules};

fn email(id: &str, subject: &str, parts: Vec<MimePart>) -> RawItem {
    let mut headers = BTreeMap::new();
    headers.insert("Subject".to_string(), subject.to_string());
    RawItem {
        id: id.into(),
        headers,
        body: String::new(),
        parts,
    }
}

fn pdf(name: &str, payload: &'static [u8]) -> MimePart {
    MimePart::leaf(name, "application/pdf", payload)
}

fn invoice(number: &str, lines: usize, confidence: f32) -> ExtractedInvoice {
    ExtractedInvoice {
        invoice_number: Some(number.into()),
        po_number: Some("PO-1".into()),
        date: Some("2024-05-02".into()),
        line_items: (0..lines)
            .map(|i| LineItem {
                description: format!("item {i}"),
                quantity: 2.0,
                unit_price: 5.0,
                amount: 10.0,
                ..Default::default()
            })
            .collect(),
        extraction_confidence: confidence,
        ..Default::default()
    }
}

fn config() -> PipelineConfig {
    PipelineConfig {
        retry: RetryPolicy::none(),
        ..PipelineConfig::default()
    }
}

struct Harness {
    classifier: Arc<MockClassifier>,
    extractor: Arc<MockExtractor>,
    pipeline: DocumentPipeline,
}

fn harness(classifier: MockClassifier, extractor: MockExtractor) -> Harness {
    let classifier = Arc::new(classifier);
    let extractor = Arc::new(extractor);
    let pipeline = DocumentPipeline::new(config(), classifier.clone(), extractor.clone());
    Harness {
        classifier,
        extractor,
        pipeline,
    }
}

fn default_harness() -> Harness {
    harness(
        MockClassifier::returning(Classification::new(true, 0.95)),
        MockExtractor::returning(invoice("INV-1", 2, 0.9)),
    )
}

#[tokio::test]
async fn item_without_supported_attachments_is_skipped_without_agent_calls() {
    let h = default_harness();
    let raw = email(
        "m1",
        "Invoice attached",
        vec![MimePart::leaf("notes.txt", "text/plain", &b"hi"[..])],
    );

    let item = h.pipeline.run_item(&raw, None).await;

    assert_eq!(item.status, ItemStatus::Completed);
    assert_eq!(item.skip, Some(ItemSkip::NoSupportedAttachments));
    assert_eq!(item.error.as_deref(), Some("no supported attachments"));
    assert_eq!(h.classifier.call_count(), 0);
    assert_eq!(h.extractor.call_count(), 0);
}

#[tokio::test]
async fn unrelated_item_is_skipped_before_attachment_extraction() {
    let h = default_harness();
    let raw = email("m1", "Team lunch on Friday", vec![pdf("menu.pdf", b"menu")]);

    let item = h.pipeline.run_item(&raw, None).await;

    assert_eq!(item.status, ItemStatus::Completed);
    assert_eq!(item.error.as_deref(), Some("not invoice-related"));
    assert!(item.attachments.is_empty());
    assert_eq!(h.classifier.call_count(), 0);
}

#[tokio::test]
async fn only_invoice_attachments_are_extracted_and_persisted() {
    let h = harness(
        MockClassifier::returning(Classification::new(false, 0.2))
            .on(&b"A"[..], MockBehaviour::Return(Classification::new(true, 0.95))),
        MockExtractor::returning(invoice("INV-A", 3, 0.92)),
    );
    let sink = Arc::new(MemorySink::new());
    let stage = h.pipeline.persist_stage(sink.clone(), "invoice_lines");
    let raw = email("m1", "Invoice 2024-77", vec![pdf("a.pdf", b"A"), pdf("b.pdf", b"B")]);

    let item = h.pipeline.run_item(&raw, Some(&stage)).await;

    assert_eq!(item.status, ItemStatus::Completed);
    assert_eq!(h.classifier.call_count(), 2);
    assert_eq!(h.extractor.call_count(), 1);
    assert_eq!(h.extractor.calls.lock().unwrap()[0].as_ref(), b"A");

    let rows = sink.rows();
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|(table, row)| table == "invoice_lines" && row.filename == "a.pdf"));
    assert!(item.failures.is_empty());
}

#[tokio::test]
async fn low_confidence_invoice_is_flagged_for_review() {
    let h = harness(
        MockClassifier::returning(Classification::new(true, 0.55)),
        MockExtractor::returning(invoice("INV-1", 1, 0.95)),
    );
    let raw = email("m1", "invoice", vec![pdf("a.pdf", b"A")]);

    let item = h.pipeline.run_item(&raw, None).await;

    assert!(item.attachments[0].needs_review);
    assert!(item.attachments[0].extracted.is_some());
}

#[tokio::test]
async fn extraction_failure_is_isolated_to_its_attachment() {
    let h = harness(
        MockClassifier::returning(Classification::new(true, 0.9)),
        MockExtractor::returning(invoice("INV-OK", 1, 0.9))
            .on(&b"bad"[..], MockBehaviour::FailFatal("unreadable scan".into())),
    );
    let raw = email("m1", "invoice batch", vec![pdf("bad.pdf", b"bad"), pdf("good.pdf", b"good")]);

    let item = h.pipeline.run_item(&raw, None).await;

    assert_eq!(item.status, ItemStatus::Completed);
    assert_eq!(item.failures.len(), 1);
    assert!(item.failures[0].starts_with("bad.pdf: extraction failed"));
    assert!(item.attachments[0].extracted.is_none());
    assert!(item.attachments[1].extracted.is_some());
}

#[tokio::test]
async fn persistence_failure_keeps_earlier_rows() {
    let h = harness(
        MockClassifier::returning(Classification::new(true, 0.9)),
        MockExtractor::returning(invoice("INV-OK", 2, 0.9))
            .on(&b"rejected"[..], MockBehaviour::Return(invoice("INV-BAD", 2, 0.9))),
    );
    let sink = Arc::new(MemorySink::rejecting("INV-BAD"));
    let stage = h.pipeline.persist_stage(sink.clone(), "lines");
    let raw = email("m1", "invoice", vec![pdf("ok.pdf", b"ok"), pdf("no.pdf", b"rejected")]);

    let item = h.pipeline.run_item(&raw, Some(&stage)).await;

    assert_eq!(item.status, ItemStatus::Completed);
    assert_eq!(sink.row_count(), 2);
    assert_eq!(item.attachments[0].rows.len(), 2);
    assert_eq!(item.failures.len(), 2);
}

#[tokio::test]
async fn one_broken_item_does_not_stop_the_batch() {
    let h = default_harness();
    let items = (1..=3)
        .map(|i| email(&format!("m{i}"), "invoice", vec![pdf("a.pdf", b"A")]))
        .collect();
    let source = MockSource::new(Provider::Gmail, items).with_broken_item("m2");
    let cancel = CancellationToken::new();

    let outcome = h.pipeline.ingest(&source, "has:attachment", 50, &cancel).await.unwrap();
    let outcome = h.pipeline.extract_batch(outcome.items, None, &cancel).await;

    let statuses: Vec<_> = outcome.items.iter().map(|i| i.status).collect();
    assert_eq!(
        statuses,
        vec![ItemStatus::Completed, ItemStatus::Error, ItemStatus::Completed]
    );
    let summary = outcome.summary();
    assert_eq!(summary.completed, 2);
    assert_eq!(summary.errors, 1);
    assert_eq!(summary.extracted, 2);
}

#[tokio::test]
async fn list_failure_is_a_step_level_error() {
    let h = default_harness();
    let source = MockSource::new(Provider::Gmail, Vec::new())
        .with_list_error(agents::AgentError::fatal("token revoked"));

    let result = h
        .pipeline
        .ingest(&source, "", 10, &CancellationToken::new())
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn cancelled_batch_starts_no_new_items() {
    let h = default_harness();
    let items = vec![h.pipeline.prepare(&email("m1", "invoice", vec![pdf("a.pdf", b"A")]))];
    let cancel = CancellationToken::new();
    cancel.cancel();

    let outcome = h.pipeline.classify_batch(items, None, &cancel).await;

    assert!(outcome.cancelled);
    assert_eq!(outcome.items[0].status, ItemStatus::Processing);
    assert_eq!(h.classifier.call_count(), 0);
}

#[tokio::test]
async fn review_rules_record_issues() {
    let h = harness(
        MockClassifier::returning(Classification::new(true, 0.9)),
        MockExtractor::returning(ExtractedInvoice {
            extraction_confidence: 0.9,
            ..Default::default()
        }),
    );
    let item = h.pipeline.prepare(&email("m1", "invoice", vec![pdf("a.pdf", b"A")]));
    let item = h.pipeline.extract_item(item, None).await;

    let rules = ReviewRules {
        require_invoice_number: true,
        require_line_items: true,
        min_confidence: None,
    };
    let outcome = h.pipeline.review_batch(vec![item], rules);

    let state = &outcome.items[0].attachments[0];
    assert_eq!(state.issues, vec!["missing invoice number", "no line items"]);
    assert!(state.needs_review);
    assert!(outcome.summary().has_error());
}

/// Source that returns every item no matter what cap it is asked for.
struct UncappedSource(MockSource);

#[async_trait::async_trait]
impl SourceProvider for UncappedSource {
    fn provider(&self) -> Provider {
        self.0.provider()
    }

    async fn is_authenticated(&self) -> bool {
        true
    }

    async fn list_items(&self, query: &str, _max: usize) -> Result<Vec<ItemRef>, AgentError> {
        self.0.list_items(query, usize::MAX).await
    }

    async fn fetch_item(&self, item: &ItemRef) -> Result<RawItem, AgentError> {
        self.0.fetch_item(item).await
    }
}

#[tokio::test]
async fn ingest_enforces_the_item_cap() {
    let h = default_harness();
    let items = (1..=5)
        .map(|i| email(&format!("m{i}"), "invoice", vec![pdf("a.pdf", b"A")]))
        .collect();
    let source = UncappedSource(MockSource::new(Provider::Gmail, items));

    let outcome = h
        .pipeline
        .ingest(&source, "has:attachment", 3, &CancellationToken::new())
        .await
        .unwrap();

    let ids: Vec<&str> = outcome.items.iter().map(|i| i.source_ref.as_str()).collect();
    assert_eq!(ids, vec!["m1", "m2", "m3"]);
    assert_eq!(source.0.fetch_count(), 3);
}
