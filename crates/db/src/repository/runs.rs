//! Run records.

use sqlx::{PgPool, Postgres};
use uuid::Uuid;

use crate::{models::RunRow, DbError};

/// Insert a run or overwrite its record.
pub async fn upsert_run(pool: &PgPool, row: &RunRow) -> Result<(), DbError> {
    sqlx::query(
        r#"
        INSERT INTO workflow_runs (id, workflow_id, status, record, started_at, ended_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (id) DO UPDATE
        SET status = EXCLUDED.status,
            record = EXCLUDED.record,
            ended_at = EXCLUDED.ended_at
        "#,
    )
    .bind(row.id)
    .bind(row.workflow_id)
    .bind(&row.status)
    .bind(&row.record)
    .bind(row.started_at)
    .bind(row.ended_at)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn get_run(pool: &PgPool, id: Uuid) -> Result<Option<RunRow>, DbError> {
    let row = sqlx::query_as::<Postgres, RunRow>(
        "SELECT id, workflow_id, status, record, started_at, ended_at FROM workflow_runs WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Most recent runs of one workflow, newest first.
pub async fn list_runs(pool: &PgPool, workflow_id: Uuid, limit: i64) -> Result<Vec<RunRow>, DbError> {
    let rows = sqlx::query_as::<Postgres, RunRow>(
        r#"
        SELECT id, workflow_id, status, record, started_at, ended_at
        FROM workflow_runs
        WHERE workflow_id = $1
        ORDER BY started_at DESC
        LIMIT $2
        "#,
    )
    .bind(workflow_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
