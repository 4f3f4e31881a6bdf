//! Pre-run workflow validation.
//!
//! Every applicable problem is reported, in check order: structure first,
//! then per-step configuration, then external readiness. The engine refuses
//! to run anything that comes back invalid.

use std::collections::HashSet;

use agents::Provider;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::dag::{roots, topological_order};
use crate::models::{Condition, Edge, StepKind, Workflow};
use crate::EngineError;

/// External readiness checks the validator depends on.
#[async_trait]
pub trait Readiness: Send + Sync {
    /// A live credential is held for `provider`.
    async fn is_authenticated(&self, provider: Provider) -> bool;

    /// `connection` names a storage target that can be written to.
    async fn has_connection(&self, connection: &str) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IssueKind {
    Structural,
    Config,
    Credential,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationIssue {
    pub kind: IssueKind,
    /// Step the issue is about, when there is one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
    pub issues: Vec<ValidationIssue>,
}

impl ValidationResult {
    fn from_issues(issues: Vec<ValidationIssue>) -> Self {
        Self {
            valid: issues.is_empty(),
            errors: issues.iter().map(|i| i.message.clone()).collect(),
            issues,
        }
    }
}

#[derive(Default)]
struct Issues(Vec<ValidationIssue>);

impl Issues {
    fn push(&mut self, kind: IssueKind, step_id: Option<&str>, message: String) {
        self.0.push(ValidationIssue {
            kind,
            step_id: step_id.map(str::to_string),
            message,
        });
    }
}

pub struct Validator<'a> {
    readiness: &'a dyn Readiness,
}

impl<'a> Validator<'a> {
    pub fn new(readiness: &'a dyn Readiness) -> Self {
        Self { readiness }
    }

    pub async fn validate(&self, workflow: &Workflow) -> ValidationResult {
        let mut issues = Issues::default();
        check_structure(workflow, &mut issues);
        check_config(workflow, &mut issues);
        self.check_readiness(workflow, &mut issues).await;
        ValidationResult::from_issues(issues.0)
    }

    async fn check_readiness(&self, workflow: &Workflow, issues: &mut Issues) {
        let mut reported: HashSet<Provider> = HashSet::new();
        for step in &workflow.steps {
            match &step.kind {
                StepKind::Source { provider, .. } => {
                    if reported.contains(provider) || self.readiness.is_authenticated(*provider).await {
                        continue;
                    }
                    reported.insert(*provider);
                    issues.push(
                        IssueKind::Credential,
                        Some(&step.id),
                        format!("{provider} not connected — authenticate before running"),
                    );
                }
                StepKind::Store { config, .. } => {
                    let Some(connection) = config.connection.as_deref().filter(|c| !c.trim().is_empty())
                    else {
                        continue;
                    };
                    if !self.readiness.has_connection(connection).await {
                        issues.push(
                            IssueKind::Credential,
                            Some(&step.id),
                            format!(
                                "step {} storage connection '{connection}' is not configured",
                                step.name
                            ),
                        );
                    }
                }
                _ => {}
            }
        }
    }
}

fn check_structure(workflow: &Workflow, issues: &mut Issues) {
    if workflow.steps.is_empty() {
        issues.push(IssueKind::Structural, None, "workflow has no steps".to_string());
        return;
    }

    let mut seen: HashSet<&str> = HashSet::new();
    for step in &workflow.steps {
        if !seen.insert(step.id.as_str()) {
            let err = EngineError::DuplicateStepId(step.id.clone());
            issues.push(IssueKind::Structural, Some(&step.id), err.to_string());
        }
    }

    let mut connected: Vec<Edge> = Vec::with_capacity(workflow.edges.len());
    for edge in &workflow.edges {
        let mut dangling = false;
        for endpoint in [&edge.source_step_id, &edge.target_step_id] {
            if !seen.contains(endpoint.as_str()) {
                dangling = true;
                let err = EngineError::UnknownStepReference {
                    edge_id: edge.id.clone(),
                    step_id: endpoint.clone(),
                };
                issues.push(IssueKind::Structural, None, err.to_string());
            }
        }
        if let Some(name) = &edge.condition {
            if name.parse::<Condition>().is_err() {
                issues.push(
                    IssueKind::Structural,
                    None,
                    format!("edge {} has unknown condition '{name}'", edge.id),
                );
            }
        }
        if !dangling {
            connected.push(edge.clone());
        }
    }

    // Cycles among the edges that do connect known steps.
    if let Err(EngineError::CycleDetected { step_id }) = topological_order(&workflow.steps, &connected) {
        issues.push(
            IssueKind::Structural,
            Some(&step_id),
            format!("cycle detected at step {step_id}"),
        );
    }

    if roots(&workflow.steps, &connected).is_empty() {
        issues.push(
            IssueKind::Structural,
            None,
            "workflow has no entry step".to_string(),
        );
    }
}

fn check_config(workflow: &Workflow, issues: &mut Issues) {
    for step in &workflow.steps {
        for key in step.kind.missing_config_keys() {
            issues.push(
                IssueKind::Config,
                Some(&step.id),
                format!("step {} missing {key}", step.name),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        AlertConfig, ClassifyConfig, Edge, SourceConfig, Step, StoreConfig, StoreTarget,
    };

    struct Fixed {
        authenticated: Vec<Provider>,
        connections: Vec<&'static str>,
    }

    #[async_trait]
    impl Readiness for Fixed {
        async fn is_authenticated(&self, provider: Provider) -> bool {
            self.authenticated.contains(&provider)
        }

        async fn has_connection(&self, connection: &str) -> bool {
            self.connections.contains(&connection)
        }
    }

    fn ready() -> Fixed {
        Fixed {
            authenticated: vec![Provider::Gmail, Provider::Outlook],
            connections: vec!["warehouse"],
        }
    }

    fn source(id: &str, provider: Provider) -> Step {
        Step::new(
            id,
            format!("{provider} inbox"),
            StepKind::Source {
                provider,
                config: SourceConfig {
                    query: Some("has:attachment".into()),
                    max_items: None,
                },
            },
        )
    }

    fn classify(id: &str) -> Step {
        Step::new(id, "Classify", StepKind::Classify { config: ClassifyConfig::default() })
    }

    fn store(id: &str, connection: Option<&str>, table: Option<&str>) -> Step {
        Step::new(
            id,
            "Save rows",
            StepKind::Store {
                target: StoreTarget::Database,
                config: StoreConfig {
                    connection: connection.map(Into::into),
                    table_name: table.map(Into::into),
                },
            },
        )
    }

    async fn run(workflow: &Workflow, readiness: &Fixed) -> ValidationResult {
        Validator::new(readiness).validate(workflow).await
    }

    #[tokio::test]
    async fn well_formed_workflow_is_valid() {
        let wf = Workflow::new(
            "ok",
            vec![
                source("src", Provider::Gmail),
                classify("cls"),
                store("db", Some("warehouse"), Some("invoice_lines")),
            ],
            vec![Edge::new("e1", "src", "cls"), Edge::new("e2", "cls", "db")],
        );
        let result = run(&wf, &ready()).await;
        assert!(result.valid, "{:?}", result.errors);
        assert!(result.errors.is_empty());
    }

    #[tokio::test]
    async fn every_problem_is_reported_in_one_pass() {
        let wf = Workflow::new(
            "broken",
            vec![
                source("src", Provider::Dropbox),
                store("db", None, Some("")),
                Step::new("alert", "Ping", StepKind::Alert { config: AlertConfig::default() }),
            ],
            vec![
                Edge::new("e1", "src", "db"),
                Edge::new("e2", "db", "ghost"),
                Edge::new("e3", "src", "alert").when(Condition::HasError),
                Edge {
                    condition: Some("maybe".into()),
                    ..Edge::new("e4", "db", "alert")
                },
            ],
        );
        let result = run(&wf, &ready()).await;
        assert!(!result.valid);
        assert_eq!(
            result.errors,
            vec![
                "edge e2 references unknown step ghost",
                "edge e4 has unknown condition 'maybe'",
                "step Save rows missing connection",
                "step Save rows missing tableName",
                "step Ping missing channel",
                "Dropbox not connected — authenticate before running",
            ]
        );
        let kinds: Vec<IssueKind> = result.issues.iter().map(|i| i.kind).collect();
        assert_eq!(
            kinds,
            vec![
                IssueKind::Structural,
                IssueKind::Structural,
                IssueKind::Config,
                IssueKind::Config,
                IssueKind::Config,
                IssueKind::Credential,
            ]
        );
    }

    #[tokio::test]
    async fn cycle_is_reported_with_its_step() {
        let wf = Workflow::new(
            "loop",
            vec![source("src", Provider::Gmail), classify("a"), classify("b")],
            vec![
                Edge::new("e1", "src", "a"),
                Edge::new("e2", "a", "b"),
                Edge::new("e3", "b", "a"),
            ],
        );
        let result = run(&wf, &ready()).await;
        assert!(!result.valid);
        let cycle = result
            .issues
            .iter()
            .find(|i| i.message.starts_with("cycle detected at step "))
            .expect("cycle issue");
        assert!(matches!(cycle.step_id.as_deref(), Some("a") | Some("b")));
    }

    #[tokio::test]
    async fn graph_without_roots_is_invalid() {
        let wf = Workflow::new(
            "ring",
            vec![classify("a"), classify("b")],
            vec![Edge::new("e1", "a", "b"), Edge::new("e2", "b", "a")],
        );
        let result = run(&wf, &ready()).await;
        assert!(result.errors.iter().any(|e| e == "workflow has no entry step"));
    }

    #[tokio::test]
    async fn duplicate_step_ids_are_structural() {
        let wf = Workflow::new("dup", vec![classify("a"), classify("a")], vec![]);
        let result = run(&wf, &ready()).await;
        assert_eq!(result.errors, vec!["duplicate step id a"]);
    }

    #[tokio::test]
    async fn unknown_connection_is_reported() {
        let wf = Workflow::new("conn", vec![store("db", Some("erp"), Some("t"))], vec![]);
        let result = run(&wf, &ready()).await;
        assert_eq!(
            result.errors,
            vec!["step Save rows storage connection 'erp' is not configured"]
        );
    }

    #[tokio::test]
    async fn unauthenticated_provider_is_reported_once() {
        let wf = Workflow::new(
            "two drives",
            vec![source("a", Provider::OneDrive), source("b", Provider::OneDrive)],
            vec![],
        );
        let result = run(&wf, &ready()).await;
        assert_eq!(
            result.errors,
            vec!["OneDrive not connected — authenticate before running"]
        );
    }

    #[tokio::test]
    async fn blank_source_query_counts_as_missing() {
        let mut step = source("src", Provider::Gmail);
        if let StepKind::Source { config, .. } = &mut step.kind {
            config.query = Some("   ".into());
        }
        let wf = Workflow::new("blank", vec![step], vec![]);
        let result = run(&wf, &ready()).await;
        assert!(!result.valid);
        assert_eq!(result.errors, vec!["step Gmail inbox missing query"]);
    }
}
