use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use engine::{Edge, Step, ValidationResult, Workflow};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::{ApiError, AppState};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateWorkflowDto {
    pub name: String,
    pub steps: Vec<Step>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

pub(crate) async fn load(state: &AppState, id: Uuid) -> Result<Workflow, ApiError> {
    state
        .store
        .get(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("workflow {id}")))
}

pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<Workflow>>, ApiError> {
    Ok(Json(state.store.list().await?))
}

pub async fn get(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<Workflow>, ApiError> {
    Ok(Json(load(&state, id).await?))
}

/// Save a new workflow. Drafts are accepted; validity is checked on run.
pub async fn create(
    State(state): State<AppState>,
    Json(payload): Json<CreateWorkflowDto>,
) -> Result<(StatusCode, Json<Workflow>), ApiError> {
    if payload.name.trim().is_empty() {
        return Err(ApiError::BadRequest("workflow name must not be empty".into()));
    }

    let workflow = Workflow {
        id: Uuid::new_v4(),
        name: payload.name,
        steps: payload.steps,
        edges: payload.edges,
        is_active: payload.is_active.unwrap_or(true),
        created_at: Utc::now(),
        total_runs: 0,
        success_rate: 0.0,
    };
    state.store.save(&workflow).await?;
    info!(workflow_id = %workflow.id, steps = workflow.steps.len(), "workflow created");

    Ok((StatusCode::CREATED, Json(workflow)))
}

pub async fn delete(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<StatusCode, ApiError> {
    if state.store.delete(id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("workflow {id}")))
    }
}

pub async fn validate(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<ValidationResult>, ApiError> {
    let workflow = load(&state, id).await?;
    Ok(Json(state.executor.validate(&workflow).await))
}
