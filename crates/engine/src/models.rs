//! Core domain models for the workflow engine.
//!
//! These types are the source of truth for what a workflow looks like
//! in memory. They serialise to/from the JSON `definition` column of the
//! `workflows` table and to the HTTP API.

use std::fmt;
use std::str::FromStr;

use agents::Provider;
use chrono::{DateTime, Utc};
use pipeline::BatchSummary;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Step configuration
// ---------------------------------------------------------------------------

/// Typed per-kind configuration. Required keys come from the type itself.
pub trait StepConfig {
    /// Config keys (in their wire spelling) that must be present and non-blank.
    const REQUIRED: &'static [&'static str];

    /// Whether `key` holds a usable value.
    fn is_present(&self, key: &str) -> bool;

    fn missing_keys(&self) -> Vec<&'static str> {
        Self::REQUIRED
            .iter()
            .copied()
            .filter(|key| !self.is_present(key))
            .collect()
    }
}

fn filled(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.trim().is_empty())
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceConfig {
    /// Provider-specific search query (mail search string, folder, ...).
    pub query: Option<String>,
    pub max_items: Option<u32>,
}

impl StepConfig for SourceConfig {
    const REQUIRED: &'static [&'static str] = &["query"];

    fn is_present(&self, key: &str) -> bool {
        match key {
            "query" => filled(&self.query),
            "maxItems" => self.max_items.is_some(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifyConfig {
    pub min_confidence: Option<f32>,
}

impl StepConfig for ClassifyConfig {
    const REQUIRED: &'static [&'static str] = &[];

    fn is_present(&self, key: &str) -> bool {
        key == "minConfidence" && self.min_confidence.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractConfig {
    pub min_confidence: Option<f32>,
}

impl StepConfig for ExtractConfig {
    const REQUIRED: &'static [&'static str] = &[];

    fn is_present(&self, key: &str) -> bool {
        key == "minConfidence" && self.min_confidence.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateConfig {
    #[serde(default)]
    pub require_invoice_number: bool,
    #[serde(default)]
    pub require_line_items: bool,
    pub min_confidence: Option<f32>,
}

impl StepConfig for ValidateConfig {
    const REQUIRED: &'static [&'static str] = &[];

    fn is_present(&self, key: &str) -> bool {
        key == "minConfidence" && self.min_confidence.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreConfig {
    /// Name of a registered storage connection.
    pub connection: Option<String>,
    pub table_name: Option<String>,
}

impl StepConfig for StoreConfig {
    const REQUIRED: &'static [&'static str] = &["connection", "tableName"];

    fn is_present(&self, key: &str) -> bool {
        match key {
            "connection" => filled(&self.connection),
            "tableName" => filled(&self.table_name),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportConfig {
    pub title: Option<String>,
}

impl StepConfig for ReportConfig {
    const REQUIRED: &'static [&'static str] = &[];

    fn is_present(&self, key: &str) -> bool {
        key == "title" && filled(&self.title)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertConfig {
    pub channel: Option<String>,
    #[serde(default)]
    pub only_on_error: bool,
}

impl StepConfig for AlertConfig {
    const REQUIRED: &'static [&'static str] = &["channel"];

    fn is_present(&self, key: &str) -> bool {
        key == "channel" && filled(&self.channel)
    }
}

// ---------------------------------------------------------------------------
// StepKind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExtractMethod {
    /// Whole-document invoice/PO recognition.
    #[default]
    Document,
    /// Line-item table extraction.
    Table,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StoreTarget {
    #[default]
    Database,
    Spreadsheet,
}

/// What a step does, with its kind-specific configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum StepKind {
    Source {
        provider: Provider,
        #[serde(default)]
        config: SourceConfig,
    },
    Extract {
        #[serde(default)]
        method: ExtractMethod,
        #[serde(default)]
        config: ExtractConfig,
    },
    Classify {
        #[serde(default)]
        config: ClassifyConfig,
    },
    Validate {
        #[serde(default)]
        config: ValidateConfig,
    },
    Store {
        #[serde(default)]
        target: StoreTarget,
        #[serde(default)]
        config: StoreConfig,
    },
    Report {
        #[serde(default)]
        config: ReportConfig,
    },
    Alert {
        #[serde(default)]
        config: AlertConfig,
    },
}

impl StepKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Source { .. } => "source",
            Self::Extract { .. } => "extract",
            Self::Classify { .. } => "classify",
            Self::Validate { .. } => "validate",
            Self::Store { .. } => "store",
            Self::Report { .. } => "report",
            Self::Alert { .. } => "alert",
        }
    }

    /// Config keys this kind requires, in wire spelling.
    pub fn required_config_keys(&self) -> &'static [&'static str] {
        match self {
            Self::Source { .. } => SourceConfig::REQUIRED,
            Self::Extract { .. } => ExtractConfig::REQUIRED,
            Self::Classify { .. } => ClassifyConfig::REQUIRED,
            Self::Validate { .. } => ValidateConfig::REQUIRED,
            Self::Store { .. } => StoreConfig::REQUIRED,
            Self::Report { .. } => ReportConfig::REQUIRED,
            Self::Alert { .. } => AlertConfig::REQUIRED,
        }
    }

    /// Required keys absent from this step's config.
    pub fn missing_config_keys(&self) -> Vec<&'static str> {
        match self {
            Self::Source { config, .. } => config.missing_keys(),
            Self::Extract { config, .. } => config.missing_keys(),
            Self::Classify { config } => config.missing_keys(),
            Self::Validate { config } => config.missing_keys(),
            Self::Store { config, .. } => config.missing_keys(),
            Self::Report { config } => config.missing_keys(),
            Self::Alert { config } => config.missing_keys(),
        }
    }
}

// ---------------------------------------------------------------------------
// Step
// ---------------------------------------------------------------------------

/// A single node in the workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Unique identifier within this workflow (referenced by edges).
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub kind: StepKind,
}

impl Step {
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: StepKind) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            kind,
        }
    }
}

// ---------------------------------------------------------------------------
// Edge
// ---------------------------------------------------------------------------

/// Predicates an edge may be gated on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Condition {
    IsInvoice,
    NotInvoice,
    HasError,
    NoError,
    NeedsReview,
    HasRows,
}

impl Condition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IsInvoice => "isInvoice",
            Self::NotInvoice => "notInvoice",
            Self::HasError => "hasError",
            Self::NoError => "noError",
            Self::NeedsReview => "needsReview",
            Self::HasRows => "hasRows",
        }
    }

    /// Evaluate against the output summary of an edge's source step.
    pub fn holds(&self, summary: &BatchSummary) -> bool {
        match self {
            Self::IsInvoice => summary.invoices > 0,
            Self::NotInvoice => summary.invoices == 0,
            Self::HasError => summary.has_error(),
            Self::NoError => !summary.has_error(),
            Self::NeedsReview => summary.needs_review > 0,
            Self::HasRows => summary.rows_persisted > 0,
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Condition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "isInvoice" => Ok(Self::IsInvoice),
            "notInvoice" => Ok(Self::NotInvoice),
            "hasError" => Ok(Self::HasError),
            "noError" => Ok(Self::NoError),
            "needsReview" => Ok(Self::NeedsReview),
            "hasRows" => Ok(Self::HasRows),
            other => Err(format!("unknown condition '{other}'")),
        }
    }
}

/// Directed edge from one step to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub id: String,
    pub source_step_id: String,
    pub target_step_id: String,
    /// Predicate name evaluated against the source step's output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

impl Edge {
    pub fn new(id: impl Into<String>, from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source_step_id: from.into(),
            target_step_id: to.into(),
            condition: None,
        }
    }

    pub fn when(mut self, condition: Condition) -> Self {
        self.condition = Some(condition.as_str().to_string());
        self
    }
}

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

/// A complete workflow definition plus its run statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    pub id: Uuid,
    pub name: String,
    pub steps: Vec<Step>,
    pub edges: Vec<Edge>,
    #[serde(default = "default_active")]
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub total_runs: u64,
    /// Fraction of counted runs that completed, in `[0, 1]`.
    #[serde(default)]
    pub success_rate: f64,
}

fn default_active() -> bool {
    true
}

impl Workflow {
    pub fn new(name: impl Into<String>, steps: Vec<Step>, edges: Vec<Edge>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            steps,
            edges,
            is_active: true,
            created_at: Utc::now(),
            total_runs: 0,
            success_rate: 0.0,
        }
    }

    pub fn step(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// Edges arriving at `step_id`, in declaration order.
    pub fn inbound<'a>(&'a self, step_id: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| e.target_step_id == step_id)
    }

    /// Fold one finished run into the statistics.
    pub fn record_run(&mut self, succeeded: bool) {
        let (total_runs, success_rate) =
            next_stats(self.total_runs, self.success_rate, succeeded);
        self.total_runs = total_runs;
        self.success_rate = success_rate;
    }
}

/// Cumulative success rate after one more run.
pub fn next_stats(total_runs: u64, success_rate: f64, succeeded: bool) -> (u64, f64) {
    let n = total_runs as f64;
    let s = if succeeded { 1.0 } else { 0.0 };
    (total_runs + 1, (success_rate * n + s) / (n + 1.0))
}
