//! The Run record and its live status stream.
//!
//! A [`RunTracker`] is owned by the task driving one run; every mutation is
//! published on a `watch` channel so observers (HTTP pollers, the CLI) always
//! see a consistent snapshot. Step statuses only ever move forward:
//! `pending → active → {complete | error}`.

use std::collections::BTreeMap;

use agents::Notification;
use chrono::{DateTime, Utc};
use pipeline::{BatchSummary, ProcessingItem};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::models::Workflow;
use crate::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Active,
    Complete,
    Error,
}

impl StepStatus {
    fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Active => 1,
            Self::Complete | Self::Error => 2,
        }
    }

    /// Whether moving to `next` keeps the transition order.
    pub fn can_advance_to(self, next: StepStatus) -> bool {
        next.rank() > self.rank()
    }
}

// ---------------------------------------------------------------------------
// Step outputs
// ---------------------------------------------------------------------------

/// A document that needs a human look.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewEntry {
    pub source_ref: String,
    pub filename: String,
    pub invoice_number: Option<String>,
    pub issues: Vec<String>,
}

/// What a Report step produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub title: String,
    pub summary: BatchSummary,
    pub needs_review: Vec<ReviewEntry>,
    /// Item and attachment failures, prefixed with the item reference.
    pub failures: Vec<String>,
}

/// The value a step hands to its downstream consumers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum StepOutput {
    /// A batch of items from a Source or pipeline stage.
    Documents {
        summary: BatchSummary,
        items: Vec<ProcessingItem>,
    },
    Report {
        report: RunReport,
    },
    /// `notification` is `None` when the alert had nothing to say.
    Alert {
        summary: BatchSummary,
        notification: Option<Notification>,
    },
    /// The step did not run; it has no output.
    Skipped {
        reason: String,
    },
}

impl StepOutput {
    pub fn documents(items: Vec<ProcessingItem>) -> Self {
        Self::Documents {
            summary: BatchSummary::of(&items),
            items,
        }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Self::Skipped {
            reason: reason.into(),
        }
    }

    pub fn summary(&self) -> BatchSummary {
        match self {
            Self::Documents { summary, .. } | Self::Alert { summary, .. } => summary.clone(),
            Self::Report { report } => report.summary.clone(),
            Self::Skipped { .. } => BatchSummary::default(),
        }
    }

    pub fn items(&self) -> &[ProcessingItem] {
        match self {
            Self::Documents { items, .. } => items,
            _ => &[],
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped { .. })
    }

    /// A copy suitable for keeping on the Run record: attachment bytes dropped.
    pub fn without_payloads(&self) -> Self {
        let mut copy = self.clone();
        if let Self::Documents { items, .. } = &mut copy {
            items.iter_mut().for_each(ProcessingItem::release_payloads);
        }
        copy
    }
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

/// One execution of a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Run {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub status: RunStatus,
    pub step_statuses: BTreeMap<String, StepStatus>,
    pub errors: Vec<String>,
    /// Outputs of steps that finished, without attachment payloads.
    pub outputs: BTreeMap<String, StepOutput>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl Run {
    pub fn new(workflow: &Workflow) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_id: workflow.id,
            status: RunStatus::Pending,
            step_statuses: workflow
                .steps
                .iter()
                .map(|s| (s.id.clone(), StepStatus::Pending))
                .collect(),
            errors: Vec::new(),
            outputs: BTreeMap::new(),
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    pub fn step_status(&self, step_id: &str) -> Option<StepStatus> {
        self.step_statuses.get(step_id).copied()
    }

    pub fn output(&self, step_id: &str) -> Option<&StepOutput> {
        self.outputs.get(step_id)
    }
}

// ---------------------------------------------------------------------------
// RunTracker
// ---------------------------------------------------------------------------

/// Exclusive owner of a Run while it executes.
pub struct RunTracker {
    run: Run,
    tx: watch::Sender<Run>,
}

impl RunTracker {
    pub fn new(run: Run) -> Self {
        let (tx, _rx) = watch::channel(run.clone());
        Self { run, tx }
    }

    pub fn run(&self) -> &Run {
        &self.run
    }

    pub fn subscribe(&self) -> watch::Receiver<Run> {
        self.tx.subscribe()
    }

    fn publish(&self) {
        self.tx.send_replace(self.run.clone());
    }

    pub fn set_status(&mut self, status: RunStatus) {
        self.run.status = status;
        self.publish();
    }

    /// Move a step forward. Returns `false` (and changes nothing) for a
    /// transition that would go backwards or an unknown step.
    pub fn set_step(&mut self, step_id: &str, next: StepStatus) -> bool {
        let Some(current) = self.run.step_statuses.get_mut(step_id) else {
            return false;
        };
        if !current.can_advance_to(next) {
            return false;
        }
        *current = next;
        self.publish();
        true
    }

    pub fn record_output(&mut self, step_id: &str, output: &StepOutput) {
        self.run
            .outputs
            .insert(step_id.to_string(), output.without_payloads());
        self.publish();
    }

    pub fn push_error(&mut self, error: impl Into<String>) {
        self.run.errors.push(error.into());
        self.publish();
    }

    /// Settle the final status and close the stream.
    pub fn finish(mut self) -> Run {
        let any_step_failed = self
            .run
            .step_statuses
            .values()
            .any(|s| *s == StepStatus::Error);
        self.run.status = if any_step_failed || !self.run.errors.is_empty() {
            RunStatus::Failed
        } else {
            RunStatus::Completed
        };
        self.run.ended_at = Some(Utc::now());
        self.publish();
        self.run
    }
}

// ---------------------------------------------------------------------------
// Handles
// ---------------------------------------------------------------------------

/// Observer side of a run: snapshot, subscribe, cancel. Cheap to clone.
#[derive(Clone)]
pub struct RunMonitor {
    run_id: Uuid,
    rx: watch::Receiver<Run>,
    cancel: CancellationToken,
}

impl RunMonitor {
    pub fn new(rx: watch::Receiver<Run>, cancel: CancellationToken) -> Self {
        let run_id = rx.borrow().id;
        Self { run_id, rx, cancel }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn snapshot(&self) -> Run {
        self.rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Run> {
        self.rx.clone()
    }

    /// Ask the run to stop. In-flight item calls finish; nothing new starts.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait until the published run reaches a final status.
    pub async fn finished(&self) -> Run {
        let mut rx = self.rx.clone();
        loop {
            {
                let run = rx.borrow_and_update();
                if run.status.is_finished() {
                    return run.clone();
                }
            }
            if rx.changed().await.is_err() {
                return rx.borrow().clone();
            }
        }
    }
}

/// Owner side of a spawned run.
pub struct RunHandle {
    monitor: RunMonitor,
    task: JoinHandle<Run>,
}

impl RunHandle {
    pub fn new(monitor: RunMonitor, task: JoinHandle<Run>) -> Self {
        Self { monitor, task }
    }

    pub fn run_id(&self) -> Uuid {
        self.monitor.run_id()
    }

    pub fn monitor(&self) -> RunMonitor {
        self.monitor.clone()
    }

    pub fn snapshot(&self) -> Run {
        self.monitor.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<Run> {
        self.monitor.subscribe()
    }

    pub fn cancel(&self) {
        self.monitor.cancel();
    }

    pub async fn wait(self) -> Result<Run, EngineError> {
        self.task
            .await
            .map_err(|e| EngineError::Internal(format!("run task failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ReportConfig, Step, StepKind};

    fn workflow() -> Workflow {
        let report = |id: &str| {
            Step::new(id, id, StepKind::Report { config: ReportConfig::default() })
        };
        Workflow::new("wf", vec![report("a"), report("b")], vec![])
    }

    #[test]
    fn step_status_never_regresses() {
        let mut tracker = RunTracker::new(Run::new(&workflow()));
        assert!(tracker.set_step("a", StepStatus::Active));
        assert!(tracker.set_step("a", StepStatus::Complete));
        assert!(!tracker.set_step("a", StepStatus::Active));
        assert!(!tracker.set_step("a", StepStatus::Error));
        assert!(!tracker.set_step("missing", StepStatus::Active));
        assert_eq!(tracker.run().step_status("a"), Some(StepStatus::Complete));
    }

    #[test]
    fn skipped_steps_may_jump_straight_to_complete() {
        let mut tracker = RunTracker::new(Run::new(&workflow()));
        assert!(tracker.set_step("b", StepStatus::Complete));
    }

    #[test]
    fn finish_fails_the_run_on_any_error() {
        let mut tracker = RunTracker::new(Run::new(&workflow()));
        tracker.set_step("a", StepStatus::Complete);
        tracker.set_step("b", StepStatus::Error);
        let run = tracker.finish();
        assert_eq!(run.status, RunStatus::Failed);
        assert!(run.ended_at.is_some());

        let mut tracker = RunTracker::new(Run::new(&workflow()));
        tracker.set_step("a", StepStatus::Complete);
        tracker.set_step("b", StepStatus::Complete);
        assert_eq!(tracker.finish().status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn subscribers_see_every_published_state() {
        let mut tracker = RunTracker::new(Run::new(&workflow()));
        let monitor = RunMonitor::new(tracker.subscribe(), CancellationToken::new());
        let mut rx = monitor.subscribe();

        tracker.set_status(RunStatus::Running);
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().status, RunStatus::Running);

        tracker.push_error("cancelled");
        let run = tracker.finish();
        let seen = monitor.finished().await;
        assert_eq!(seen.id, run.id);
        assert_eq!(seen.status, RunStatus::Failed);
        assert_eq!(seen.errors, vec!["cancelled"]);
    }
}
