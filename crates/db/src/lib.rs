//! `db` crate: Postgres persistence.
//!
//! Provides a connection pool, typed row structs, repository functions for
//! every table, and the Postgres implementations of the engine's
//! `WorkflowStore` and the pipeline's `StorageSink`.

pub mod error;
pub mod models;
pub mod pool;
pub mod repository;
pub mod sink;
pub mod store;

pub use error::DbError;
pub use pool::{create_pool, run_migrations, DbPool};
pub use sink::PgSink;
pub use store::PgWorkflowStore;
