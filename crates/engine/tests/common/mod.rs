//! Shared fixtures for the engine scenario tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use agents::mock::{MemorySink, MockClassifier, MockExtractor, MockSource, RecordingNotifier};
use agents::{Classification, ExtractedInvoice, LineItem, MimePart, Provider, RawItem, TaxIds};
use engine::{
    AgentRegistry, AlertConfig, ClassifyConfig, ExecutorConfig, ExtractConfig, ExtractMethod,
    ReportConfig, SourceConfig, Step, StepKind, StoreConfig, StoreTarget, ValidateConfig,
};
use pipeline::{PipelineConfig, RetryPolicy};

pub const WAREHOUSE: &str = "warehouse";

pub fn email(id: &str, subject: &str, parts: Vec<MimePart>) -> RawItem {
    let mut headers = BTreeMap::new();
    headers.insert("Subject".to_string(), subject.to_string());
    headers.insert("From".to_string(), "billing@supplier.example".to_string());
    RawItem {
        id: id.into(),
        headers,
        body: String::new(),
        parts,
    }
}

pub fn pdf(name: &str, payload: &'static [u8]) -> MimePart {
    MimePart::leaf(name, "application/pdf", payload)
}

pub fn invoice(number: &str, lines: usize) -> ExtractedInvoice {
    ExtractedInvoice {
        invoice_number: Some(number.into()),
        po_number: Some("PO-778".into()),
        date: Some("2024-03-31".into()),
        tax_ids: TaxIds {
            supplier: Some("DE811907980".into()),
            buyer: Some("GB980780684".into()),
        },
        currency: Some("EUR".into()),
        line_items: (0..lines)
            .map(|i| LineItem {
                description: format!("widget {i}"),
                sku: Some(format!("W-{i}")),
                quantity: 1.0 + i as f64,
                unit_price: 12.5,
                amount: 12.5 * (1.0 + i as f64),
            })
            .collect(),
        extraction_confidence: 0.93,
    }
}

pub fn config() -> ExecutorConfig {
    ExecutorConfig {
        pipeline: PipelineConfig {
            retry: RetryPolicy::none(),
            ..PipelineConfig::default()
        },
        ..ExecutorConfig::default()
    }
}

/// Doubles behind an `AgentRegistry`, kept so tests can inspect them.
pub struct Agents {
    pub gmail: Arc<MockSource>,
    pub classifier: Arc<MockClassifier>,
    pub extractor: Arc<MockExtractor>,
    pub sink: Arc<MemorySink>,
    pub notifier: Arc<RecordingNotifier>,
}

impl Agents {
    pub fn new(gmail: MockSource, classifier: MockClassifier, extractor: MockExtractor) -> Self {
        Self {
            gmail: Arc::new(gmail),
            classifier: Arc::new(classifier),
            extractor: Arc::new(extractor),
            sink: Arc::new(MemorySink::new()),
            notifier: Arc::new(RecordingNotifier::new()),
        }
    }

    /// One invoice email with a single two-line PDF; everything authenticated.
    pub fn standard() -> Self {
        Self::new(
            MockSource::new(
                Provider::Gmail,
                vec![email("m1", "Invoice INV-1", vec![pdf("inv.pdf", b"INV-1")])],
            ),
            MockClassifier::returning(Classification::new(true, 0.95)),
            MockExtractor::returning(invoice("INV-1", 2)),
        )
    }

    pub fn registry(&self) -> AgentRegistry {
        AgentRegistry::new(self.classifier.clone(), self.extractor.clone())
            .with_source(self.gmail.clone())
            .with_sink(WAREHOUSE, self.sink.clone())
            .with_notifier(self.notifier.clone())
    }
}

// ---------------------------------------------------------------------------
// Step builders
// ---------------------------------------------------------------------------

pub fn source(id: &str, provider: Provider) -> Step {
    Step::new(
        id,
        format!("{provider} inbox"),
        StepKind::Source {
            provider,
            config: SourceConfig {
                query: Some("has:attachment newer_than:7d".into()),
                max_items: None,
            },
        },
    )
}

pub fn classify(id: &str) -> Step {
    Step::new(id, "Classify documents", StepKind::Classify { config: ClassifyConfig::default() })
}

pub fn extract(id: &str) -> Step {
    Step::new(
        id,
        "Extract fields",
        StepKind::Extract {
            method: ExtractMethod::Document,
            config: ExtractConfig::default(),
        },
    )
}

pub fn validate(id: &str) -> Step {
    Step::new(
        id,
        "Check invoices",
        StepKind::Validate {
            config: ValidateConfig {
                require_invoice_number: true,
                require_line_items: true,
                min_confidence: None,
            },
        },
    )
}

pub fn store(id: &str) -> Step {
    Step::new(
        id,
        "Save line items",
        StepKind::Store {
            target: StoreTarget::Database,
            config: StoreConfig {
                connection: Some(WAREHOUSE.into()),
                table_name: Some("invoice_lines".into()),
            },
        },
    )
}

pub fn report(id: &str) -> Step {
    Step::new(
        id,
        "Summary",
        StepKind::Report {
            config: ReportConfig {
                title: Some("Intake summary".into()),
            },
        },
    )
}

pub fn alert(id: &str, only_on_error: bool) -> Step {
    Step::new(
        id,
        "Notify finance",
        StepKind::Alert {
            config: AlertConfig {
                channel: Some("#finance".into()),
                only_on_error,
            },
        },
    )
}
