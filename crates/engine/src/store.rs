//! Persistence seam for workflows, their statistics and finished runs.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::models::{next_stats, Workflow};
use crate::run::Run;
use crate::EngineError;

/// Run statistics of one workflow after an update.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStats {
    pub total_runs: u64,
    pub success_rate: f64,
}

#[async_trait]
pub trait WorkflowStore: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Option<Workflow>, EngineError>;

    async fn list(&self) -> Result<Vec<Workflow>, EngineError>;

    /// Insert or replace a workflow definition.
    async fn save(&self, workflow: &Workflow) -> Result<(), EngineError>;

    /// Returns whether a workflow was removed.
    async fn delete(&self, id: Uuid) -> Result<bool, EngineError>;

    /// Fold one finished run into the workflow's statistics. Implementations
    /// must apply the read-modify-write as a single serialized update.
    async fn record_run(&self, id: Uuid, succeeded: bool) -> Result<WorkflowStats, EngineError>;

    async fn save_run(&self, run: &Run) -> Result<(), EngineError>;

    async fn get_run(&self, id: Uuid) -> Result<Option<Run>, EngineError>;

    /// The `limit` most recent runs of one workflow, newest first.
    async fn list_runs(&self, workflow_id: Uuid, limit: usize) -> Result<Vec<Run>, EngineError>;
}

/// Process-local store. A single mutex serializes statistics updates.
#[derive(Default)]
pub struct MemoryWorkflowStore {
    workflows: Mutex<HashMap<Uuid, Workflow>>,
    runs: Mutex<HashMap<Uuid, Run>>,
}

impl MemoryWorkflowStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkflowStore for MemoryWorkflowStore {
    async fn get(&self, id: Uuid) -> Result<Option<Workflow>, EngineError> {
        Ok(self.workflows.lock().await.get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<Workflow>, EngineError> {
        let mut all: Vec<Workflow> = self.workflows.lock().await.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(all)
    }

    async fn save(&self, workflow: &Workflow) -> Result<(), EngineError> {
        self.workflows
            .lock()
            .await
            .insert(workflow.id, workflow.clone());
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<bool, EngineError> {
        Ok(self.workflows.lock().await.remove(&id).is_some())
    }

    async fn record_run(&self, id: Uuid, succeeded: bool) -> Result<WorkflowStats, EngineError> {
        let mut workflows = self.workflows.lock().await;
        let workflow = workflows
            .get_mut(&id)
            .ok_or(EngineError::WorkflowNotFound(id))?;
        let (total_runs, success_rate) =
            next_stats(workflow.total_runs, workflow.success_rate, succeeded);
        workflow.total_runs = total_runs;
        workflow.success_rate = success_rate;
        Ok(WorkflowStats {
            total_runs,
            success_rate,
        })
    }

    async fn save_run(&self, run: &Run) -> Result<(), EngineError> {
        self.runs.lock().await.insert(run.id, run.clone());
        Ok(())
    }

    async fn get_run(&self, id: Uuid) -> Result<Option<Run>, EngineError> {
        Ok(self.runs.lock().await.get(&id).cloned())
    }

    async fn list_runs(&self, workflow_id: Uuid, limit: usize) -> Result<Vec<Run>, EngineError> {
        let mut runs: Vec<Run> = self
            .runs
            .lock()
            .await
            .values()
            .filter(|run| run.workflow_id == workflow_id)
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        runs.truncate(limit);
        Ok(runs)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn concurrent_updates_are_serialized() {
        let store = Arc::new(MemoryWorkflowStore::new());
        let wf = Workflow::new("stats", vec![], vec![]);
        store.save(&wf).await.unwrap();
        let id = wf.id;

        let mut tasks = Vec::new();
        for i in 0..20 {
            let store = Arc::clone(&store);
            tasks.push(tokio::spawn(async move {
                store.record_run(id, i % 2 == 0).await.unwrap()
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let saved = store.get(id).await.unwrap().unwrap();
        assert_eq!(saved.total_runs, 20);
        assert!((saved.success_rate - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn recording_against_a_missing_workflow_fails() {
        let store = MemoryWorkflowStore::new();
        let id = Uuid::new_v4();
        assert_eq!(
            store.record_run(id, true).await,
            Err(EngineError::WorkflowNotFound(id))
        );
    }

    #[tokio::test]
    async fn delete_reports_whether_anything_was_removed() {
        let store = MemoryWorkflowStore::new();
        let wf = Workflow::new("gone", vec![], vec![]);
        store.save(&wf).await.unwrap();
        assert!(store.delete(wf.id).await.unwrap());
        assert!(!store.delete(wf.id).await.unwrap());
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn runs_are_listed_per_workflow_newest_first() {
        let store = MemoryWorkflowStore::new();
        let wf = Workflow::new("intake", vec![], vec![]);
        let other = Workflow::new("other", vec![], vec![]);

        let mut ids = Vec::new();
        for minutes in 0..3 {
            let mut run = Run::new(&wf);
            run.started_at = wf.created_at + chrono::Duration::minutes(minutes);
            store.save_run(&run).await.unwrap();
            ids.push(run.id);
        }
        store.save_run(&Run::new(&other)).await.unwrap();

        let listed: Vec<Uuid> = store
            .list_runs(wf.id, 2)
            .await
            .unwrap()
            .iter()
            .map(|run| run.id)
            .collect();
        assert_eq!(listed, vec![ids[2], ids[1]]);
    }
}
