//! The sync run ledger: one row per orchestration, one row per endpoint attempt.

use crate::error::StorageError;
use crate::repository::DbRepository;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use core_types::{EndpointAttempt, ItemError, RunCounts, RunStatus};
use sqlx::FromRow;

#[derive(Debug, Clone, PartialEq)]
pub struct RunRecord {
    pub id: i64,
    pub run_type: String,
    pub league_id: Option<String>,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub counts: RunCounts,
    pub errors: Vec<ItemError>,
}

#[async_trait]
pub trait RunLedger: Send + Sync {
    /// Opens a run in the `running` state and returns its id.
    async fn open_run(&self, run_type: &str, league_id: Option<&str>) -> Result<i64, StorageError>;

    async fn record_attempt(&self, run_id: i64, attempt: &EndpointAttempt) -> Result<(), StorageError>;

    /// Closes a run. Counters are derived from the recorded attempts.
    async fn close_run(
        &self,
        run_id: i64,
        status: RunStatus,
        errors: &[ItemError],
    ) -> Result<RunRecord, StorageError>;

    /// Most recent runs first.
    async fn recent_runs(&self, limit: usize) -> Result<Vec<RunRecord>, StorageError>;
}

#[derive(FromRow)]
struct RunRow {
    id: i64,
    run_type: String,
    league_id: Option<String>,
    status: String,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    success_count: i64,
    error_count: i64,
    skipped_count: i64,
    errors: serde_json::Value,
}

impl TryFrom<RunRow> for RunRecord {
    type Error = StorageError;

    fn try_from(row: RunRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse()
            .map_err(|e: core_types::CoreError| StorageError::Query(format!("run {}: {e}", row.id)))?;
        Ok(RunRecord {
            id: row.id,
            run_type: row.run_type,
            league_id: row.league_id,
            status,
            started_at: row.started_at,
            finished_at: row.finished_at,
            counts: RunCounts {
                success: row.success_count,
                error: row.error_count,
                skipped: row.skipped_count,
            },
            errors: serde_json::from_value(row.errors)?,
        })
    }
}

const RUN_COLUMNS: &str = "id, run_type, league_id, status, started_at, finished_at, \
                           success_count, error_count, skipped_count, errors";

#[async_trait]
impl RunLedger for DbRepository {
    async fn open_run(&self, run_type: &str, league_id: Option<&str>) -> Result<i64, StorageError> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO raw.sync_runs (run_type, league_id, status) VALUES ($1, $2, 'running') RETURNING id",
        )
        .bind(run_type)
        .bind(league_id)
        .fetch_one(self.pool())
        .await?;
        Ok(id)
    }

    async fn record_attempt(&self, run_id: i64, attempt: &EndpointAttempt) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO raw.sync_attempts (run_id, endpoint, outcome, latency_ms, size_bytes, error, snapshot_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(run_id)
        .bind(attempt.endpoint.path())
        .bind(attempt.outcome.as_str())
        .bind(attempt.latency_ms)
        .bind(attempt.size_bytes)
        .bind(&attempt.error)
        .bind(attempt.snapshot_id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn close_run(
        &self,
        run_id: i64,
        status: RunStatus,
        errors: &[ItemError],
    ) -> Result<RunRecord, StorageError> {
        let sql = format!(
            r#"
            WITH tally AS (
                SELECT
                    COUNT(*) FILTER (WHERE outcome = 'success') AS success_count,
                    COUNT(*) FILTER (WHERE outcome = 'error') AS error_count,
                    COUNT(*) FILTER (WHERE outcome = 'skipped') AS skipped_count
                FROM raw.sync_attempts
                WHERE run_id = $1
            )
            UPDATE raw.sync_runs SET
                status = $2,
                finished_at = NOW(),
                success_count = tally.success_count,
                error_count = tally.error_count,
                skipped_count = tally.skipped_count,
                errors = $3
            FROM tally
            WHERE id = $1
            RETURNING {RUN_COLUMNS}
            "#
        );
        let row: Option<RunRow> = sqlx::query_as(&sql)
            .bind(run_id)
            .bind(status.as_str())
            .bind(serde_json::to_value(errors)?)
            .fetch_optional(self.pool())
            .await?;

        let record: RunRecord = row
            .ok_or_else(|| StorageError::NotFound(format!("sync run {run_id}")))?
            .try_into()?;
        Ok(record)
    }

    async fn recent_runs(&self, limit: usize) -> Result<Vec<RunRecord>, StorageError> {
        let sql = format!("SELECT {RUN_COLUMNS} FROM raw.sync_runs ORDER BY started_at DESC, id DESC LIMIT $1");
        let rows: Vec<RunRow> = sqlx::query_as(&sql)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(self.pool())
            .await?;
        rows.into_iter().map(RunRecord::try_from).collect()
    }
}
