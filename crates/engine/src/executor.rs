//! Workflow execution engine.
//!
//! `WorkflowExecutor` is the central orchestrator:
//! 1. Validates the workflow; an invalid one yields a failed Run and no step runs.
//! 2. Computes the topological order.
//! 3. Walks the steps in order. Each step receives the outputs of the
//!    upstream steps whose edges are live (condition true, source step
//!    complete) and runs its stage of the document pipeline.
//! 4. A step that fails is recorded and its downstream consumers are
//!    skipped; unrelated branches keep running.
//! 5. Records run statistics through the `WorkflowStore`, if one is set.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use agents::Notification;
use pipeline::retry::with_retry;
use pipeline::{BatchOutcome, DocumentPipeline, PipelineConfig, ReviewRules};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, instrument, warn, Instrument};

use crate::dag::topological_order;
use crate::models::{Condition, Step, StepKind, Workflow};
use crate::registry::AgentRegistry;
use crate::run::{Run, RunHandle, RunMonitor, RunStatus, RunTracker, StepOutput, StepStatus};
use crate::steps::{build_report, merge_items, merged_summary, render_summary};
use crate::store::WorkflowStore;
use crate::validator::{ValidationResult, Validator};
use crate::EngineError;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tuning knobs for the executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ExecutorConfig {
    pub pipeline: PipelineConfig,
    /// Item cap for Source steps that do not set `maxItems`.
    pub default_max_items: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            pipeline: PipelineConfig::default(),
            default_max_items: 50,
        }
    }
}

/// How a step's inbound edges resolved.
enum Inputs<'a> {
    /// No inbound edges at all.
    Root,
    Live(Vec<&'a StepOutput>),
    Skip(String),
}

// ---------------------------------------------------------------------------
// WorkflowExecutor
// ---------------------------------------------------------------------------

/// Runs workflows against a fixed set of agents.
///
/// One executor serves any number of runs; each run owns its own
/// [`RunTracker`], so runs share nothing mutable but the store.
pub struct WorkflowExecutor {
    registry: Arc<AgentRegistry>,
    pipeline: DocumentPipeline,
    store: Option<Arc<dyn WorkflowStore>>,
    config: ExecutorConfig,
}

impl WorkflowExecutor {
    pub fn new(registry: Arc<AgentRegistry>, config: ExecutorConfig) -> Self {
        let pipeline = DocumentPipeline::new(
            config.pipeline.clone(),
            registry.classifier(),
            registry.extractor(),
        );
        Self {
            registry,
            pipeline,
            store: None,
            config,
        }
    }

    /// Record statistics and finished runs in `store`.
    pub fn with_store(mut self, store: Arc<dyn WorkflowStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub async fn validate(&self, workflow: &Workflow) -> ValidationResult {
        Validator::new(self.registry.as_ref()).validate(workflow).await
    }

    /// Run `workflow` to completion.
    pub async fn execute(&self, workflow: &Workflow) -> Run {
        self.execute_with_cancel(workflow, CancellationToken::new())
            .await
    }

    pub async fn execute_with_cancel(&self, workflow: &Workflow, cancel: CancellationToken) -> Run {
        let tracker = RunTracker::new(Run::new(workflow));
        self.drive(workflow, tracker, cancel).await
    }

    /// Spawn a run of `workflow` and return a handle to observe or cancel it.
    pub fn start(self: &Arc<Self>, workflow: Workflow) -> RunHandle {
        let tracker = RunTracker::new(Run::new(&workflow));
        let cancel = CancellationToken::new();
        let monitor = RunMonitor::new(tracker.subscribe(), cancel.clone());
        let executor = Arc::clone(self);
        let task = tokio::spawn(async move { executor.drive(&workflow, tracker, cancel).await });
        RunHandle::new(monitor, task)
    }

    #[instrument(
        name = "run",
        skip_all,
        fields(workflow_id = %workflow.id, run_id = %tracker.run().id)
    )]
    async fn drive(&self, workflow: &Workflow, mut tracker: RunTracker, cancel: CancellationToken) -> Run {
        // ------------------------------------------------------------------
        // Validate; an invalid workflow never runs and is not counted.
        // ------------------------------------------------------------------
        let validation = self.validate(workflow).await;
        if !validation.valid {
            warn!(errors = ?validation.errors, "workflow failed validation");
            for message in validation.errors {
                tracker.push_error(message);
            }
            return self.persist(tracker.finish(), None).await;
        }

        let order = match topological_order(&workflow.steps, &workflow.edges) {
            Ok(order) => order,
            Err(err) => {
                tracker.push_error(err.to_string());
                return self.persist(tracker.finish(), None).await;
            }
        };
        info!("executing {} steps in order: {:?}", order.len(), order);
        tracker.set_status(RunStatus::Running);

        // ------------------------------------------------------------------
        // Walk the steps.
        // ------------------------------------------------------------------
        let mut outputs: HashMap<String, StepOutput> = HashMap::new();
        let mut failed: HashSet<String> = HashSet::new();

        for step_id in &order {
            let Some(step) = workflow.step(step_id) else {
                continue;
            };
            if cancel.is_cancelled() {
                info!(step_id = %step.id, "run cancelled before step");
                tracker.push_error(EngineError::Cancelled.to_string());
                break;
            }

            let inputs = match gather_inputs(workflow, step, &outputs, &failed) {
                Inputs::Skip(reason) => {
                    info!(step_id = %step.id, %reason, "skipping step");
                    let output = StepOutput::skipped(reason);
                    tracker.set_step(&step.id, StepStatus::Complete);
                    tracker.record_output(&step.id, &output);
                    outputs.insert(step.id.clone(), output);
                    continue;
                }
                Inputs::Root => Vec::new(),
                Inputs::Live(inputs) => inputs,
            };

            tracker.set_step(&step.id, StepStatus::Active);
            let span = info_span!("step", step_id = %step.id, kind = step.kind.label());
            let result = self
                .run_step(workflow, step, &inputs, &cancel)
                .instrument(span)
                .await;

            match result {
                Ok(StepRun::Done(output)) => {
                    info!(step_id = %step.id, summary = ?output.summary(), "step complete");
                    tracker.set_step(&step.id, StepStatus::Complete);
                    tracker.record_output(&step.id, &output);
                    outputs.insert(step.id.clone(), output);
                }
                Ok(StepRun::Interrupted(partial)) => {
                    warn!(step_id = %step.id, summary = ?partial.summary(), "step cancelled mid-batch");
                    tracker.record_output(&step.id, &partial);
                    tracker.set_step(&step.id, StepStatus::Error);
                    tracker.push_error(EngineError::Cancelled.to_string());
                    break;
                }
                Err(EngineError::Cancelled) => {
                    warn!(step_id = %step.id, "step cancelled");
                    tracker.set_step(&step.id, StepStatus::Error);
                    tracker.push_error(EngineError::Cancelled.to_string());
                    break;
                }
                Err(err) => {
                    error!(step_id = %step.id, error = %err, "step failed");
                    tracker.set_step(&step.id, StepStatus::Error);
                    tracker.push_error(err.to_string());
                    failed.insert(step.id.clone());
                }
            }
        }

        let run = tracker.finish();
        info!(status = ?run.status, errors = run.errors.len(), "run finished");
        self.persist(run, Some(workflow)).await
    }

    /// Store the run and, for runs that executed, update statistics.
    async fn persist(&self, run: Run, executed: Option<&Workflow>) -> Run {
        let Some(store) = &self.store else {
            return run;
        };
        if let Some(workflow) = executed {
            match store
                .record_run(workflow.id, run.status == RunStatus::Completed)
                .await
            {
                Ok(stats) => debug!(
                    total_runs = stats.total_runs,
                    success_rate = stats.success_rate,
                    "statistics updated"
                ),
                Err(err) => warn!(error = %err, "could not update workflow statistics"),
            }
        }
        if let Err(err) = store.save_run(&run).await {
            warn!(error = %err, "could not save run");
        }
        run
    }

    // -----------------------------------------------------------------------
    // Step dispatch
    // -----------------------------------------------------------------------

    async fn run_step(
        &self,
        workflow: &Workflow,
        step: &Step,
        inputs: &[&StepOutput],
        cancel: &CancellationToken,
    ) -> Result<StepRun, EngineError> {
        match &step.kind {
            StepKind::Source { provider, config } => {
                let source = self.registry.source(*provider).ok_or_else(|| {
                    EngineError::step_fatal(&step.name, format!("no source registered for {provider}"))
                })?;
                let max = config
                    .max_items
                    .map_or(self.config.default_max_items, |m| m as usize);
                let query = config.query.as_deref().unwrap_or_default();
                let outcome = self
                    .pipeline
                    .ingest(source.as_ref(), query, max, cancel)
                    .await
                    .map_err(|err| EngineError::from_agent(&step.name, err))?;
                Ok(documents(outcome))
            }

            StepKind::Classify { config } => {
                let outcome = self
                    .pipeline
                    .classify_batch(merge_items(inputs), config.min_confidence, cancel)
                    .await;
                Ok(documents(outcome))
            }

            StepKind::Extract { method, config } => {
                debug!(?method, "extracting");
                let outcome = self
                    .pipeline
                    .extract_batch(merge_items(inputs), config.min_confidence, cancel)
                    .await;
                Ok(documents(outcome))
            }

            StepKind::Validate { config } => {
                let rules = ReviewRules {
                    require_invoice_number: config.require_invoice_number,
                    require_line_items: config.require_line_items,
                    min_confidence: config.min_confidence,
                };
                Ok(documents(self.pipeline.review_batch(merge_items(inputs), rules)))
            }

            StepKind::Store { target, config } => {
                let connection = config.connection.as_deref().unwrap_or_default();
                let table = config.table_name.as_deref().unwrap_or_default();
                let sink = self.registry.sink(connection).ok_or_else(|| {
                    EngineError::step_fatal(
                        &step.name,
                        format!("storage connection '{connection}' is not configured"),
                    )
                })?;
                debug!(?target, connection, table, "persisting rows");
                let stage = self.pipeline.persist_stage(Arc::clone(sink), table);
                let outcome = self
                    .pipeline
                    .persist_batch(merge_items(inputs), &stage, cancel)
                    .await;
                Ok(documents(outcome))
            }

            StepKind::Report { config } => {
                let title = config.title.as_deref().unwrap_or(&step.name);
                Ok(StepRun::Done(StepOutput::Report {
                    report: build_report(title, inputs),
                }))
            }

            StepKind::Alert { config } => {
                let summary = merged_summary(inputs);
                if config.only_on_error && !summary.has_error() {
                    return Ok(StepRun::Done(StepOutput::Alert {
                        summary,
                        notification: None,
                    }));
                }
                let notification = Notification {
                    channel: config.channel.clone().unwrap_or_default(),
                    subject: format!("{}: {}", workflow.name, step.name),
                    body: render_summary(&summary),
                };
                let notifier = self.registry.notifier();
                with_retry(&self.config.pipeline.retry, "notify", || {
                    notifier.notify(&notification)
                })
                .await
                .map_err(|err| EngineError::from_agent(&step.name, err))?;
                Ok(StepRun::Done(StepOutput::Alert {
                    summary,
                    notification: Some(notification),
                }))
            }
        }
    }
}

/// Result of dispatching one step.
enum StepRun {
    Done(StepOutput),
    /// Cancelled mid-batch; holds the items that finished before the stop.
    Interrupted(StepOutput),
}

fn documents(outcome: BatchOutcome) -> StepRun {
    let output = StepOutput::documents(outcome.items);
    if outcome.cancelled {
        StepRun::Interrupted(output)
    } else {
        StepRun::Done(output)
    }
}

/// Resolve `step`'s inbound edges against the outputs produced so far.
///
/// An edge is live when its source step completed with a real output and
/// its condition (if any) holds. A failed predecessor skips the step.
fn gather_inputs<'a>(
    workflow: &Workflow,
    step: &Step,
    outputs: &'a HashMap<String, StepOutput>,
    failed: &HashSet<String>,
) -> Inputs<'a> {
    let mut inbound = workflow.inbound(&step.id).peekable();
    if inbound.peek().is_none() {
        return Inputs::Root;
    }

    let mut live: Vec<&'a StepOutput> = Vec::new();
    let mut sources: HashSet<&str> = HashSet::new();
    for edge in inbound {
        if failed.contains(&edge.source_step_id) {
            let name = workflow
                .step(&edge.source_step_id)
                .map_or(edge.source_step_id.as_str(), |s| s.name.as_str());
            return Inputs::Skip(format!("upstream step {name} failed"));
        }
        let Some(output) = outputs.get(&edge.source_step_id) else {
            continue;
        };
        if output.is_skipped() {
            continue;
        }
        let holds = match edge.condition.as_deref().map(str::parse::<Condition>) {
            None => true,
            Some(Ok(condition)) => condition.holds(&output.summary()),
            Some(Err(_)) => false,
        };
        if holds && sources.insert(edge.source_step_id.as_str()) {
            live.push(output);
        }
    }

    if live.is_empty() {
        Inputs::Skip("no live inbound edge".to_string())
    } else {
        Inputs::Live(live)
    }
}
