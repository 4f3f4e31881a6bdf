//! `pipeline` crate: the multi-stage job run for every document a workflow
//! step touches: classify → detect invoice → extract fields → persist.

pub mod attachments;
pub mod config;
pub mod context;
pub mod item;
pub mod retry;
pub mod runner;
pub mod stages;

pub use config::{PipelineConfig, RetryPolicy};
pub use context::ContextSignals;
pub use item::{AttachmentState, BatchSummary, ItemSkip, ItemStatus, ProcessingItem};
pub use runner::{BatchOutcome, DocumentPipeline, ReviewRules};
pub use stages::{ClassifyStage, ExtractStage, PersistStage};

#[cfg(test)]
mod runner_tests;
