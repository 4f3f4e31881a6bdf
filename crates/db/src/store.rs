//! `engine::WorkflowStore` backed by Postgres.

use async_trait::async_trait;
use engine::{EngineError, Run, Workflow, WorkflowStats, WorkflowStore};
use uuid::Uuid;

use crate::models::{RunRow, WorkflowRow};
use crate::repository::{runs, workflows};
use crate::{DbError, DbPool};

#[derive(Clone)]
pub struct PgWorkflowStore {
    pool: DbPool,
}

impl PgWorkflowStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WorkflowStore for PgWorkflowStore {
    async fn get(&self, id: Uuid) -> Result<Option<Workflow>, EngineError> {
        let row = workflows::get_workflow(&self.pool, id).await?;
        Ok(row.map(WorkflowRow::into_workflow).transpose()?)
    }

    async fn list(&self) -> Result<Vec<Workflow>, EngineError> {
        let rows = workflows::list_workflows(&self.pool).await?;
        let workflows = rows
            .into_iter()
            .map(WorkflowRow::into_workflow)
            .collect::<Result<Vec<_>, DbError>>()?;
        Ok(workflows)
    }

    async fn save(&self, workflow: &Workflow) -> Result<(), EngineError> {
        let row = WorkflowRow::from_workflow(workflow)?;
        workflows::upsert_workflow(&self.pool, &row).await?;
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<bool, EngineError> {
        match workflows::delete_workflow(&self.pool, id).await {
            Ok(()) => Ok(true),
            Err(DbError::NotFound) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    async fn record_run(&self, id: Uuid, succeeded: bool) -> Result<WorkflowStats, EngineError> {
        match workflows::record_run(&self.pool, id, succeeded).await {
            Ok((total_runs, success_rate)) => Ok(WorkflowStats {
                total_runs: u64::try_from(total_runs).unwrap_or(0),
                success_rate,
            }),
            Err(DbError::NotFound) => Err(EngineError::WorkflowNotFound(id)),
            Err(err) => Err(err.into()),
        }
    }

    async fn save_run(&self, run: &Run) -> Result<(), EngineError> {
        let row = RunRow::from_run(run)?;
        runs::upsert_run(&self.pool, &row).await?;
        Ok(())
    }

    async fn get_run(&self, id: Uuid) -> Result<Option<Run>, EngineError> {
        let row = runs::get_run(&self.pool, id).await?;
        Ok(row.map(RunRow::into_run).transpose()?)
    }

    async fn list_runs(&self, workflow_id: Uuid, limit: usize) -> Result<Vec<Run>, EngineError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = runs::list_runs(&self.pool, workflow_id, limit).await?;
        let runs = rows
            .into_iter()
            .map(RunRow::into_run)
            .collect::<Result<Vec<_>, DbError>>()?;
        Ok(runs)
    }
}
