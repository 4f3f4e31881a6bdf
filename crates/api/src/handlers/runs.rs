use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use engine::{Run, RunStatus};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use super::workflows::load;
use crate::{ApiError, AppState};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStarted {
    pub run_id: Uuid,
    pub status: RunStatus,
}

const DEFAULT_HISTORY: usize = 20;
const MAX_HISTORY: usize = 100;

#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

/// Stored runs of one workflow, newest first.
pub async fn list(
    Path(id): Path<Uuid>,
    Query(query): Query<HistoryQuery>,
    State(state): State<AppState>,
) -> Result<Json<Vec<Run>>, ApiError> {
    load(&state, id).await?;
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY).min(MAX_HISTORY);
    Ok(Json(state.store.list_runs(id, limit).await?))
}

/// Validate, then start a run in the background. Invalid workflows are
/// refused with every validation error and nothing runs.
pub async fn start(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<RunStarted>), ApiError> {
    let workflow = load(&state, id).await?;
    if !workflow.is_active {
        return Err(ApiError::Conflict(format!("workflow {id} is inactive")));
    }

    let validation = state.executor.validate(&workflow).await;
    if !validation.valid {
        return Err(ApiError::Invalid(validation.errors));
    }

    let handle = state.executor.start(workflow);
    let monitor = handle.monitor();
    let started = RunStarted {
        run_id: monitor.run_id(),
        status: monitor.snapshot().status,
    };
    state.track(monitor).await;
    info!(workflow_id = %id, run_id = %started.run_id, "run started");

    Ok((StatusCode::ACCEPTED, Json(started)))
}

/// Live snapshot for runs this process is tracking, else the stored record.
pub async fn get(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<Run>, ApiError> {
    if let Some(monitor) = state.monitor(id).await {
        return Ok(Json(monitor.snapshot()));
    }
    state
        .store
        .get_run(id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("run {id}")))
}

pub async fn cancel(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<Run>), ApiError> {
    let monitor = state
        .monitor(id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("run {id}")))?;
    let run = monitor.snapshot();
    if run.status.is_finished() {
        return Err(ApiError::Conflict(format!("run {id} has already finished")));
    }
    monitor.cancel();
    info!(run_id = %id, "cancellation requested");
    Ok((StatusCode::ACCEPTED, Json(run)))
}
