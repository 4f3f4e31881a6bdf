//! `agents` crate: the `Agent` contract, the external capabilities the
//! document pipeline consumes, and their built-in implementations.
//!
//! The pipeline and engine crates only ever talk to sources, classifiers,
//! extractors, sinks and notifiers through the traits defined here.

pub mod error;
pub mod http;
pub mod local;
pub mod mock;
pub mod traits;
pub mod types;

pub use error::AgentError;
pub use traits::{Agent, Classifier, Extractor, Notifier, SourceProvider, StorageSink, TracingNotifier};
pub use types::{
    Attachment, Classification, ExtractedInvoice, InvoiceRow, ItemRef, LineItem, MimePart,
    Notification, Provider, RawItem, RowId, TaxIds,
};
