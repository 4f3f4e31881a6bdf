//! `docflow` CLI entry-point.
//!
//! Available sub-commands:
//! - `serve`    start the API server.
//! - `migrate`  run pending database migrations.
//! - `validate` validate a workflow JSON file.
//! - `run`      execute a workflow JSON file once and print the run record.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use agents::http::VisionAgentClient;
use agents::local::LocalDirSource;
use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use db::{DbPool, PgSink, PgWorkflowStore};
use engine::{
    AgentRegistry, Edge, ExecutorConfig, MemoryWorkflowStore, RunStatus, Step, Workflow,
    WorkflowExecutor, WorkflowStore,
};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "docflow",
    about = "Workflow orchestration for document intake",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the REST API server.
    Serve {
        #[arg(long, env = "DOCFLOW_BIND", default_value = "0.0.0.0:8080")]
        bind: SocketAddr,
        #[command(flatten)]
        runtime: RuntimeArgs,
    },
    /// Run pending database migrations.
    Migrate {
        #[arg(long, env = "DATABASE_URL")]
        database_url: String,
    },
    /// Validate a workflow definition JSON file.
    Validate {
        /// Path to the workflow JSON file.
        path: PathBuf,
        #[command(flatten)]
        runtime: RuntimeArgs,
    },
    /// Execute a workflow definition once and print the resulting run.
    Run {
        /// Path to the workflow JSON file.
        path: PathBuf,
        #[command(flatten)]
        runtime: RuntimeArgs,
    },
}

/// Settings shared by every command that builds an executor.
#[derive(Args)]
struct RuntimeArgs {
    /// Postgres connection string. Without it workflows live in memory and
    /// no storage connection is available.
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,
    /// Base URL of the vision agent used for classification and extraction.
    #[arg(long, env = "DOCFLOW_AGENT_URL", default_value = "http://localhost:9090")]
    agent_url: String,
    #[arg(long, env = "DOCFLOW_AGENT_KEY", hide_env_values = true)]
    agent_key: Option<String>,
    /// Directory backing the `upload` source provider.
    #[arg(long, env = "DOCFLOW_UPLOAD_DIR", default_value = "./uploads")]
    upload_dir: PathBuf,
    /// Name under which the Postgres sink is registered as a storage connection.
    #[arg(long, default_value = "postgres")]
    connection: String,
    /// JSON file holding an executor configuration.
    #[arg(long)]
    config: Option<PathBuf>,
}

/// Workflow file layout: the definition without identity or statistics.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WorkflowFile {
    name: String,
    steps: Vec<Step>,
    #[serde(default)]
    edges: Vec<Edge>,
}

struct Runtime {
    store: Arc<dyn WorkflowStore>,
    executor: Arc<WorkflowExecutor>,
}

impl RuntimeArgs {
    fn executor_config(&self) -> Result<ExecutorConfig> {
        let Some(path) = &self.config else {
            return Ok(ExecutorConfig::default());
        };
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("invalid config {}", path.display()))
    }

    async fn pool(&self) -> Result<Option<DbPool>> {
        match &self.database_url {
            Some(url) => {
                let pool = db::create_pool(url, 10)
                    .await
                    .context("failed to connect to database")?;
                Ok(Some(pool))
            }
            None => Ok(None),
        }
    }

    async fn build(&self) -> Result<Runtime> {
        let config = self.executor_config()?;
        let vision = Arc::new(
            VisionAgentClient::new(&self.agent_url, self.agent_key.clone())
                .context("cannot build vision agent client")?,
        );
        let mut registry = AgentRegistry::new(vision.clone(), vision)
            .with_source(Arc::new(LocalDirSource::new(&self.upload_dir)));

        let store: Arc<dyn WorkflowStore> = match self.pool().await? {
            Some(pool) => {
                registry = registry.with_sink(&self.connection, Arc::new(PgSink::new(pool.clone())));
                Arc::new(PgWorkflowStore::new(pool))
            }
            None => {
                warn!("DATABASE_URL not set; workflows are kept in memory");
                Arc::new(MemoryWorkflowStore::new())
            }
        };

        let executor = WorkflowExecutor::new(Arc::new(registry), config).with_store(Arc::clone(&store));
        Ok(Runtime {
            store,
            executor: Arc::new(executor),
        })
    }
}

fn load_workflow(path: &Path) -> Result<Workflow> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read file {}", path.display()))?;
    let file: WorkflowFile =
        serde_json::from_str(&content).with_context(|| format!("invalid workflow {}", path.display()))?;
    Ok(Workflow::new(file.name, file.steps, file.edges))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve { bind, runtime } => {
            let runtime = runtime.build().await?;
            let state = api::AppState::new(runtime.store, runtime.executor);
            api::serve(bind, state).await.context("API server failed")?;
        }
        Command::Migrate { database_url } => {
            info!("Running migrations");
            let pool = db::create_pool(&database_url, 2)
                .await
                .context("failed to connect to database")?;
            db::run_migrations(&pool).await.context("migration failed")?;
            info!("Migrations applied successfully");
        }
        Command::Validate { path, runtime } => {
            let workflow = load_workflow(&path)?;
            let runtime = runtime.build().await?;
            let result = runtime.executor.validate(&workflow).await;
            if !result.valid {
                for error in &result.errors {
                    eprintln!("  - {error}");
                }
                bail!("workflow {} is not valid", workflow.name);
            }
            let order = engine::validate_dag(&workflow)?;
            println!("Workflow is valid. Execution order: {}", order.join(" -> "));
        }
        Command::Run { path, runtime } => {
            let workflow = load_workflow(&path)?;
            let runtime = runtime.build().await?;
            runtime.store.save(&workflow).await?;

            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("interrupt received, cancelling run");
                    on_signal.cancel();
                }
            });

            let run = runtime.executor.execute_with_cancel(&workflow, cancel).await;
            println!("{}", serde_json::to_string_pretty(&run)?);
            if run.status != RunStatus::Completed {
                bail!("run {} finished with status {:?}", run.id, run.status);
            }
        }
    }

    Ok(())
}
