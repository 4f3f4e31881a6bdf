//! `api` crate: HTTP REST API layer.
//!
//! Exposes:
//!   GET    /api/v1/workflows
//!   POST   /api/v1/workflows
//!   GET    /api/v1/workflows/:id
//!   DELETE /api/v1/workflows/:id
//!   POST   /api/v1/workflows/:id/validate
//!   GET    /api/v1/workflows/:id/runs
//!   POST   /api/v1/workflows/:id/runs
//!   GET    /api/v1/runs/:id
//!   POST   /api/v1/runs/:id/cancel

pub mod error;
pub mod handlers;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use engine::{RunMonitor, WorkflowExecutor, WorkflowStore};
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

pub use error::ApiError;
use handlers::{runs, workflows};

/// Finished runs are only dropped from the live map once it grows past this.
const MAX_TRACKED_RUNS: usize = 256;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn WorkflowStore>,
    pub executor: Arc<WorkflowExecutor>,
    runs: Arc<RwLock<HashMap<Uuid, RunMonitor>>>,
}

impl AppState {
    pub fn new(store: Arc<dyn WorkflowStore>, executor: Arc<WorkflowExecutor>) -> Self {
        Self {
            store,
            executor,
            runs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    async fn track(&self, monitor: RunMonitor) {
        let mut runs = self.runs.write().await;
        if runs.len() >= MAX_TRACKED_RUNS {
            runs.retain(|_, m| !m.snapshot().status.is_finished());
        }
        runs.insert(monitor.run_id(), monitor);
    }

    pub async fn monitor(&self, run_id: Uuid) -> Option<RunMonitor> {
        self.runs.read().await.get(&run_id).cloned()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/workflows", get(workflows::list).post(workflows::create))
        .route(
            "/api/v1/workflows/:id",
            get(workflows::get).delete(workflows::delete),
        )
        .route("/api/v1/workflows/:id/validate", post(workflows::validate))
        .route("/api/v1/workflows/:id/runs", get(runs::list).post(runs::start))
        .route("/api/v1/runs/:id", get(runs::get))
        .route("/api/v1/runs/:id/cancel", post(runs::cancel))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind `addr` and serve until the process is stopped.
pub async fn serve(addr: SocketAddr, state: AppState) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("API listening on {}", listener.local_addr()?);
    axum::serve(listener, router(state)).await
}
