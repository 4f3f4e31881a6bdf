//! `agents::StorageSink` writing line-item rows to Postgres tables.

use agents::{AgentError, InvoiceRow, RowId, StorageSink};
use async_trait::async_trait;
use tracing::debug;

use crate::repository::invoice_rows::insert_invoice_row;
use crate::DbPool;

/// Writes rows into whichever table a Store step names.
#[derive(Clone)]
pub struct PgSink {
    pool: DbPool,
}

impl PgSink {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StorageSink for PgSink {
    async fn insert_row(&self, table: &str, record: &InvoiceRow) -> Result<RowId, AgentError> {
        let id = insert_invoice_row(&self.pool, table, record).await?;
        debug!(table, id, source_ref = %record.source_ref, "row inserted");
        Ok(RowId(format!("{table}:{id}")))
    }
}
