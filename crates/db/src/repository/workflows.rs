//! Workflow CRUD and statistics.

use sqlx::{PgPool, Postgres};
use tracing::instrument;
use uuid::Uuid;

use crate::{models::WorkflowRow, DbError};

const COLUMNS: &str = "id, name, definition, is_active, total_runs, success_rate, created_at";

/// Insert a workflow, or replace the definition of an existing one.
///
/// Statistics are left alone on update; only [`record_run`] changes them.
#[instrument(skip(pool, row), fields(db.table = "workflows", workflow_id = %row.id))]
pub async fn upsert_workflow(pool: &PgPool, row: &WorkflowRow) -> Result<(), DbError> {
    sqlx::query(
        r#"
        INSERT INTO workflows (id, name, definition, is_active, total_runs, success_rate, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (id) DO UPDATE
        SET name = EXCLUDED.name,
            definition = EXCLUDED.definition,
            is_active = EXCLUDED.is_active
        "#,
    )
    .bind(row.id)
    .bind(&row.name)
    .bind(&row.definition)
    .bind(row.is_active)
    .bind(row.total_runs)
    .bind(row.success_rate)
    .bind(row.created_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Fetch a single workflow by its primary key.
pub async fn get_workflow(pool: &PgPool, id: Uuid) -> Result<Option<WorkflowRow>, DbError> {
    let row = sqlx::query_as::<Postgres, WorkflowRow>(&format!(
        "SELECT {COLUMNS} FROM workflows WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Return all workflows ordered by creation time (newest first).
pub async fn list_workflows(pool: &PgPool) -> Result<Vec<WorkflowRow>, DbError> {
    let rows = sqlx::query_as::<Postgres, WorkflowRow>(&format!(
        "SELECT {COLUMNS} FROM workflows ORDER BY created_at DESC"
    ))
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Permanently delete a workflow (and, by cascade, its runs).
///
/// Returns `DbError::NotFound` if no row was deleted.
pub async fn delete_workflow(pool: &PgPool, id: Uuid) -> Result<(), DbError> {
    let result = sqlx::query("DELETE FROM workflows WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }

    Ok(())
}

/// Fold one finished run into the statistics in a single statement, so
/// concurrent runs of the same workflow cannot lose updates.
///
/// Returns the new `(total_runs, success_rate)`.
#[instrument(skip(pool), fields(db.table = "workflows"))]
pub async fn record_run(pool: &PgPool, id: Uuid, succeeded: bool) -> Result<(i64, f64), DbError> {
    let outcome: f64 = if succeeded { 1.0 } else { 0.0 };
    let stats = sqlx::query_as::<Postgres, (i64, f64)>(
        r#"
        UPDATE workflows
        SET success_rate = (success_rate * total_runs + $2) / (total_runs + 1),
            total_runs = total_runs + 1
        WHERE id = $1
        RETURNING total_runs, success_rate
        "#,
    )
    .bind(id)
    .bind(outcome)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)?;

    Ok(stats)
}
