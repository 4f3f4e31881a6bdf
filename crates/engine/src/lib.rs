//! `engine` crate: the step graph model, pre-run validation, and the
//! execution engine that drives the document pipeline step by step.

pub mod dag;
pub mod error;
pub mod executor;
pub mod models;
pub mod registry;
pub mod run;
pub mod steps;
pub mod store;
pub mod validator;

pub use dag::{topological_order, validate_dag};
pub use error::EngineError;
pub use executor::{ExecutorConfig, WorkflowExecutor};
pub use models::{
    AlertConfig, ClassifyConfig, Condition, Edge, ExtractConfig, ExtractMethod, ReportConfig,
    SourceConfig, Step, StepConfig, StepKind, StoreConfig, StoreTarget, ValidateConfig, Workflow,
};
pub use registry::AgentRegistry;
pub use run::{Run, RunHandle, RunMonitor, RunReport, RunStatus, RunTracker, StepOutput, StepStatus};
pub use store::{MemoryWorkflowStore, WorkflowStats, WorkflowStore};
pub use validator::{IssueKind, Readiness, ValidationIssue, ValidationResult, Validator};
