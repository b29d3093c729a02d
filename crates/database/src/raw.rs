//! Content-addressed capture of upstream payloads.

use crate::error::StorageError;
use crate::hashing::content_hash;
use crate::repository::DbRepository;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use core_types::{Endpoint, EndpointKind, ProcessingStatus};
use sqlx::FromRow;

/// Processing note for `[]`, `{}` and `null` payloads, which carry nothing to project.
pub const EMPTY_PAYLOAD_NOTE: &str = "empty payload";

/// Outcome of a single [`RawStore::store`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredSnapshot {
    pub snapshot_id: i64,
    pub content_hash: String,
    /// The same bytes were already captured for this endpoint.
    pub deduplicated: bool,
    /// The latest payload for the endpoint's logical key changed.
    pub changed: bool,
}

/// One captured payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub id: i64,
    pub endpoint: String,
    pub kind: EndpointKind,
    pub content_hash: String,
    pub payload: Vec<u8>,
    pub size_bytes: i64,
    pub fetched_at: DateTime<Utc>,
    pub status: ProcessingStatus,
    pub notes: Option<String>,
    /// Set while `processing`; cleared when the snapshot goes back to `new`.
    pub claimed_at: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub new: i64,
    pub processing: i64,
    pub processed: i64,
    pub failed: i64,
}

impl StatusCounts {
    pub fn add(&mut self, status: ProcessingStatus, count: i64) {
        match status {
            ProcessingStatus::New => self.new += count,
            ProcessingStatus::Processing => self.processing += count,
            ProcessingStatus::Processed => self.processed += count,
            ProcessingStatus::Failed => self.failed += count,
        }
    }

    pub fn total(&self) -> i64 {
        self.new + self.processing + self.processed + self.failed
    }
}

/// The append-only raw capture store and its processing-status machine.
///
/// `new -> processing -> {processed, failed}`; `requeue` is the only move back.
#[async_trait]
pub trait RawStore: Send + Sync {
    /// Records a fetch. The snapshot row is only created the first time this
    /// endpoint returns these exact bytes; the fetch log always gains a row.
    async fn store(
        &self,
        endpoint: &Endpoint,
        payload: &[u8],
        fetched_at: DateTime<Utc>,
    ) -> Result<StoredSnapshot, StorageError>;

    /// Moves up to `limit` of the oldest `new` snapshots to `processing`.
    async fn claim_unprocessed(&self, limit: usize) -> Result<Vec<Snapshot>, StorageError>;

    /// Moves one snapshot to `processing`. Returns `false` when it is not `new`.
    async fn claim(&self, id: i64) -> Result<bool, StorageError>;

    async fn mark_processed(&self, id: i64, notes: Option<&str>) -> Result<(), StorageError>;

    async fn mark_failed(&self, id: i64, notes: &str) -> Result<(), StorageError>;

    /// Sends a snapshot back to `new` for another pass.
    async fn requeue(&self, id: i64) -> Result<(), StorageError>;

    /// Sends every `failed` snapshot back to `new`. Returns how many moved.
    async fn requeue_failed(&self) -> Result<u64, StorageError>;

    /// Sends `processing` snapshots claimed at or before `claimed_before` back
    /// to `new`. A worker that died between claim and settle leaves these behind.
    async fn requeue_stale(&self, claimed_before: DateTime<Utc>) -> Result<u64, StorageError>;

    /// The oldest `new` snapshots, without claiming them.
    async fn get_unprocessed(&self, limit: usize) -> Result<Vec<Snapshot>, StorageError>;

    async fn status_counts(&self) -> Result<StatusCounts, StorageError>;
}

#[derive(FromRow)]
struct SnapshotRow {
    id: i64,
    endpoint: String,
    endpoint_kind: String,
    content_hash: String,
    payload: Vec<u8>,
    size_bytes: i64,
    fetched_at: DateTime<Utc>,
    status: String,
    notes: Option<String>,
    claimed_at: Option<DateTime<Utc>>,
    processed_at: Option<DateTime<Utc>>,
}

impl TryFrom<SnapshotRow> for Snapshot {
    type Error = StorageError;

    fn try_from(row: SnapshotRow) -> Result<Self, Self::Error> {
        let invalid = |e: core_types::CoreError| StorageError::Query(format!("snapshot {}: {e}", row.id));
        Ok(Snapshot {
            id: row.id,
            kind: row.endpoint_kind.parse().map_err(invalid)?,
            status: row.status.parse().map_err(invalid)?,
            endpoint: row.endpoint,
            content_hash: row.content_hash,
            payload: row.payload,
            size_bytes: row.size_bytes,
            fetched_at: row.fetched_at,
            notes: row.notes,
            claimed_at: row.claimed_at,
            processed_at: row.processed_at,
        })
    }
}

const SNAPSHOT_COLUMNS: &str =
    "id, endpoint, endpoint_kind, content_hash, payload, size_bytes, fetched_at, status, notes, claimed_at, processed_at";

fn to_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

impl DbRepository {
    /// Resolves why a guarded status update touched no row.
    async fn transition_error(
        &self,
        id: i64,
        to: ProcessingStatus,
    ) -> Result<StorageError, StorageError> {
        let current: Option<String> = sqlx::query_scalar("SELECT status FROM raw.snapshots WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        Ok(match current {
            None => StorageError::NotFound(format!("snapshot {id}")),
            Some(status) => {
                let from = status
                    .parse()
                    .map_err(|e| StorageError::Query(format!("snapshot {id}: {e}")))?;
                StorageError::InvalidTransition { id, from, to }
            }
        })
    }

    async fn finish(
        &self,
        id: i64,
        to: ProcessingStatus,
        notes: Option<&str>,
    ) -> Result<(), StorageError> {
        let updated = sqlx::query(
            r#"
            UPDATE raw.snapshots
            SET status = $2, notes = $3, claimed_at = NULL, processed_at = NOW()
            WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(id)
        .bind(to.as_str())
        .bind(notes)
        .execute(self.pool())
        .await?
        .rows_affected();

        if updated == 0 {
            return Err(self.transition_error(id, to).await?);
        }
        Ok(())
    }
}

#[async_trait]
impl RawStore for DbRepository {
    async fn store(
        &self,
        endpoint: &Endpoint,
        payload: &[u8],
        fetched_at: DateTime<Utc>,
    ) -> Result<StoredSnapshot, StorageError> {
        let hash = content_hash(payload);
        let path = endpoint.path();
        let kind = endpoint.kind();
        let size = payload.len() as i64;

        let mut tx = self.pool().begin().await?;

        let inserted: Option<i64> = sqlx::query_scalar(
            r#"
            INSERT INTO raw.snapshots (endpoint, endpoint_kind, content_hash, payload, size_bytes, fetched_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (endpoint, content_hash) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(&path)
        .bind(kind.as_str())
        .bind(&hash)
        .bind(payload)
        .bind(size)
        .bind(fetched_at)
        .fetch_optional(&mut *tx)
        .await?;

        let (snapshot_id, deduplicated) = match inserted {
            Some(id) => (id, false),
            None => {
                let id: i64 = sqlx::query_scalar(
                    "SELECT id FROM raw.snapshots WHERE endpoint = $1 AND content_hash = $2",
                )
                .bind(&path)
                .bind(&hash)
                .fetch_one(&mut *tx)
                .await?;
                (id, true)
            }
        };

        sqlx::query(
            r#"
            INSERT INTO raw.fetch_log (endpoint, content_hash, snapshot_id, size_bytes, fetched_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&path)
        .bind(&hash)
        .bind(snapshot_id)
        .bind(size)
        .bind(fetched_at)
        .execute(&mut *tx)
        .await?;

        let changed = sqlx::query(
            r#"
            INSERT INTO raw.latest_payloads (endpoint_kind, entity_key, content_hash, snapshot_id, payload, fetched_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (endpoint_kind, entity_key) DO UPDATE SET
                content_hash = EXCLUDED.content_hash,
                snapshot_id = EXCLUDED.snapshot_id,
                payload = EXCLUDED.payload,
                fetched_at = EXCLUDED.fetched_at,
                updated_at = NOW()
            WHERE raw.latest_payloads.content_hash <> EXCLUDED.content_hash
            "#,
        )
        .bind(kind.as_str())
        .bind(endpoint.logical_key())
        .bind(&hash)
        .bind(snapshot_id)
        .bind(payload)
        .bind(fetched_at)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            > 0;

        tx.commit().await?;

        tracing::debug!(
            endpoint = %path,
            snapshot_id,
            deduplicated,
            changed,
            "Stored snapshot."
        );
        Ok(StoredSnapshot { snapshot_id, content_hash: hash, deduplicated, changed })
    }

    async fn claim_unprocessed(&self, limit: usize) -> Result<Vec<Snapshot>, StorageError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let sql = format!(
            r#"
            UPDATE raw.snapshots
            SET status = 'processing', claimed_at = NOW()
            WHERE id IN (
                SELECT id FROM raw.snapshots
                WHERE status = 'new'
                ORDER BY fetched_at, id
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {SNAPSHOT_COLUMNS}
            "#
        );
        let rows: Vec<SnapshotRow> = sqlx::query_as(&sql)
            .bind(to_limit(limit))
            .fetch_all(self.pool())
            .await?;

        let mut snapshots = rows
            .into_iter()
            .map(Snapshot::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        snapshots.sort_by(|a, b| a.fetched_at.cmp(&b.fetched_at).then(a.id.cmp(&b.id)));
        Ok(snapshots)
    }

    async fn claim(&self, id: i64) -> Result<bool, StorageError> {
        let updated = sqlx::query(
            "UPDATE raw.snapshots SET status = 'processing', claimed_at = NOW() WHERE id = $1 AND status = 'new'",
        )
        .bind(id)
        .execute(self.pool())
        .await?
        .rows_affected();
        Ok(updated > 0)
    }

    async fn mark_processed(&self, id: i64, notes: Option<&str>) -> Result<(), StorageError> {
        self.finish(id, ProcessingStatus::Processed, notes).await
    }

    async fn mark_failed(&self, id: i64, notes: &str) -> Result<(), StorageError> {
        self.finish(id, ProcessingStatus::Failed, Some(notes)).await
    }

    async fn requeue(&self, id: i64) -> Result<(), StorageError> {
        let updated = sqlx::query(
            r#"
            UPDATE raw.snapshots
            SET status = 'new', notes = NULL, claimed_at = NULL, processed_at = NULL
            WHERE id = $1 AND status <> 'new'
            "#,
        )
        .bind(id)
        .execute(self.pool())
        .await?
        .rows_affected();

        if updated == 0 {
            return Err(self.transition_error(id, ProcessingStatus::New).await?);
        }
        Ok(())
    }

    async fn requeue_failed(&self) -> Result<u64, StorageError> {
        let updated = sqlx::query(
            r#"
            UPDATE raw.snapshots
            SET status = 'new', notes = NULL, claimed_at = NULL, processed_at = NULL
            WHERE status = 'failed'
            "#,
        )
        .execute(self.pool())
        .await?
        .rows_affected();
        Ok(updated)
    }

    async fn requeue_stale(&self, claimed_before: DateTime<Utc>) -> Result<u64, StorageError> {
        let updated = sqlx::query(
            r#"
            UPDATE raw.snapshots
            SET status = 'new', notes = NULL, claimed_at = NULL, processed_at = NULL
            WHERE status = 'processing' AND (claimed_at IS NULL OR claimed_at <= $1)
            "#,
        )
        .bind(claimed_before)
        .execute(self.pool())
        .await?
        .rows_affected();
        if updated > 0 {
            tracing::warn!(requeued = updated, claimed_before = %claimed_before, "Requeued stale claims.");
        }
        Ok(updated)
    }

    async fn get_unprocessed(&self, limit: usize) -> Result<Vec<Snapshot>, StorageError> {
        let sql = format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM raw.snapshots WHERE status = 'new' ORDER BY fetched_at, id LIMIT $1"
        );
        let rows: Vec<SnapshotRow> = sqlx::query_as(&sql)
            .bind(to_limit(limit))
            .fetch_all(self.pool())
            .await?;
        rows.into_iter().map(Snapshot::try_from).collect()
    }

    async fn status_counts(&self) -> Result<StatusCounts, StorageError> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM raw.snapshots GROUP BY status")
                .fetch_all(self.pool())
                .await?;

        let mut counts = StatusCounts::default();
        for (status, count) in rows {
            let status = status
                .parse()
                .map_err(|e: core_types::CoreError| StorageError::Query(e.to_string()))?;
            counts.add(status, count);
        }
        Ok(counts)
    }
}
