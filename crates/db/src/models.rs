//! Row structs that map 1-to-1 onto database tables, and their conversions
//! to and from the engine's domain types.

use chrono::{DateTime, Utc};
use engine::{Edge, Run, Step, Workflow};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::DbError;

// ---------------------------------------------------------------------------
// workflows
// ---------------------------------------------------------------------------

/// What the `definition` column holds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Definition {
    pub steps: Vec<Step>,
    pub edges: Vec<Edge>,
}

/// A persisted workflow row.
#[derive(Debug, Clone, FromRow)]
pub struct WorkflowRow {
    pub id: Uuid,
    pub name: String,
    pub definition: serde_json::Value,
    pub is_active: bool,
    pub total_runs: i64,
    pub success_rate: f64,
    pub created_at: DateTime<Utc>,
}

impl WorkflowRow {
    pub fn from_workflow(workflow: &Workflow) -> Result<Self, DbError> {
        let definition = serde_json::to_value(Definition {
            steps: workflow.steps.clone(),
            edges: workflow.edges.clone(),
        })?;
        Ok(Self {
            id: workflow.id,
            name: workflow.name.clone(),
            definition,
            is_active: workflow.is_active,
            total_runs: i64::try_from(workflow.total_runs).unwrap_or(i64::MAX),
            success_rate: workflow.success_rate,
            created_at: workflow.created_at,
        })
    }

    pub fn into_workflow(self) -> Result<Workflow, DbError> {
        let definition: Definition = serde_json::from_value(self.definition)?;
        Ok(Workflow {
            id: self.id,
            name: self.name,
            steps: definition.steps,
            edges: definition.edges,
            is_active: self.is_active,
            created_at: self.created_at,
            total_runs: u64::try_from(self.total_runs).unwrap_or(0),
            success_rate: self.success_rate,
        })
    }
}

// ---------------------------------------------------------------------------
// workflow_runs
// ---------------------------------------------------------------------------

/// A persisted run row. `record` is the full serialized [`Run`].
#[derive(Debug, Clone, FromRow)]
pub struct RunRow {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub status: String,
    pub record: serde_json::Value,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl RunRow {
    pub fn from_run(run: &Run) -> Result<Self, DbError> {
        let record = serde_json::to_value(run)?;
        let status = record
            .get("status")
            .and_then(|s| s.as_str())
            .unwrap_or("pending")
            .to_string();
        Ok(Self {
            id: run.id,
            workflow_id: run.workflow_id,
            status,
            record,
            started_at: run.started_at,
            ended_at: run.ended_at,
        })
    }

    pub fn into_run(self) -> Result<Run, DbError> {
        Ok(serde_json::from_value(self.record)?)
    }
}
