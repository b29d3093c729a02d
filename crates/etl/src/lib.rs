//! Batch projection of captured snapshots that are still `new`.

pub mod error;

pub use error::EtlError;

use api_client::is_empty_collection;
use chrono::{TimeDelta, Utc};
use core_types::{Endpoint, EtlResult, ItemError};
use database::{EMPTY_PAYLOAD_NOTE, EntityStore, RawStore, Snapshot, StorageError};
use projector::{ProjectionError, Projector};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

const DEFAULT_STALE_CLAIM_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// How a single snapshot is to be settled.
enum Outcome {
    Processed,
    Skipped(String),
    Failed(String),
}

pub struct EtlProcessor {
    raw: Arc<dyn RawStore>,
    projector: Projector,
    commit_group_size: usize,
    stale_claim_timeout: Duration,
}

impl EtlProcessor {
    pub fn new(raw: Arc<dyn RawStore>, entities: Arc<dyn EntityStore>, commit_group_size: usize) -> Self {
        Self {
            raw,
            projector: Projector::new(entities),
            commit_group_size: commit_group_size.max(1),
            stale_claim_timeout: DEFAULT_STALE_CLAIM_TIMEOUT,
        }
    }

    /// Claims left in `processing` for longer than `timeout` are requeued at the
    /// start of every batch.
    pub fn with_stale_claim_timeout(mut self, timeout: Duration) -> Self {
        self.stale_claim_timeout = timeout;
        self
    }

    /// Projects at most `batch_limit` of the oldest `new` snapshots.
    ///
    /// Snapshots are claimed in groups of `commit_group_size`, so each group's
    /// statuses are settled before the next is claimed. On cancellation the
    /// current group's remaining snapshots go back to `new`. A snapshot whose
    /// status cannot be written is reported as an error and requeued; it does
    /// not count towards `total_processed`.
    pub async fn process_unprocessed(
        &self,
        batch_limit: usize,
        cancel: &CancellationToken,
    ) -> Result<EtlResult, EtlError> {
        let started = Instant::now();
        let mut result = EtlResult::default();
        let mut remaining = batch_limit;

        self.recover_stale_claims().await?;

        'groups: while remaining > 0 && !cancel.is_cancelled() {
            let requested = remaining.min(self.commit_group_size);
            let group = self.raw.claim_unprocessed(requested).await?;
            if group.is_empty() {
                break;
            }
            remaining = remaining.saturating_sub(group.len());
            let exhausted = group.len() < requested;
            tracing::debug!(claimed = group.len(), remaining, "Claimed snapshot group.");

            let mut pending = group.into_iter();
            while let Some(snapshot) = pending.next() {
                if cancel.is_cancelled() {
                    self.release(std::iter::once(snapshot).chain(pending)).await;
                    break 'groups;
                }
                let id = snapshot.id;
                let Some(outcome) = self.process(&snapshot, cancel).await else {
                    self.release(std::iter::once(snapshot).chain(pending)).await;
                    break 'groups;
                };

                if let Err(e) = self.settle(id, &outcome).await {
                    tracing::warn!(snapshot_id = id, endpoint = %snapshot.endpoint, error = %e, "Snapshot could not be settled.");
                    self.release(std::iter::once(snapshot.clone())).await;
                    result.error_count += 1;
                    result.errors.push(ItemError::item(snapshot.kind.as_str(), id.to_string(), format!("settle: {e}")));
                    continue;
                }

                match outcome {
                    Outcome::Processed => result.success_count += 1,
                    Outcome::Skipped(note) => {
                        tracing::debug!(snapshot_id = id, endpoint = %snapshot.endpoint, note = %note, "Skipped snapshot.");
                        result.skipped_count += 1;
                    }
                    Outcome::Failed(message) => {
                        tracing::warn!(snapshot_id = id, endpoint = %snapshot.endpoint, error = %message, "Snapshot failed to project.");
                        result.error_count += 1;
                        result.errors.push(ItemError::item(snapshot.kind.as_str(), id.to_string(), message));
                    }
                }
                result.total_processed += 1;
            }

            if exhausted {
                break;
            }
        }

        if cancel.is_cancelled() {
            tracing::info!(processed = result.total_processed, "ETL batch cancelled.");
        }
        tracing::info!(
            total = result.total_processed,
            success = result.success_count,
            errors = result.error_count,
            skipped = result.skipped_count,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "ETL batch finished."
        );
        Ok(result)
    }

    /// Runs batches until no `new` snapshot is left.
    pub async fn drain(&self, batch_limit: usize, cancel: &CancellationToken) -> Result<EtlResult, EtlError> {
        let mut total = EtlResult::default();
        loop {
            let batch = self.process_unprocessed(batch_limit, cancel).await?;
            let done = batch.total_processed == 0;
            total.absorb(batch);
            if done || cancel.is_cancelled() {
                return Ok(total);
            }
        }
    }

    /// `None` when the projection was cancelled part way.
    async fn process(&self, snapshot: &Snapshot, cancel: &CancellationToken) -> Option<Outcome> {
        let endpoint = match Endpoint::parse(&snapshot.endpoint) {
            Ok(endpoint) => endpoint,
            Err(e) => return Some(Outcome::Skipped(format!("no projection: {e}"))),
        };
        if is_empty_collection(&snapshot.payload) {
            return Some(Outcome::Skipped(EMPTY_PAYLOAD_NOTE.to_string()));
        }

        match self.projector.apply(&endpoint, &snapshot.payload, cancel).await {
            Ok(applied) if applied.is_clean() => Some(Outcome::Processed),
            Ok(applied) => Some(Outcome::Failed(applied.failures.summary())),
            Err(ProjectionError::Cancelled) => None,
            Err(e) => Some(Outcome::Failed(e.to_string())),
        }
    }

    async fn settle(&self, id: i64, outcome: &Outcome) -> Result<(), StorageError> {
        match outcome {
            Outcome::Processed => self.raw.mark_processed(id, None).await,
            Outcome::Skipped(note) => self.raw.mark_processed(id, Some(note)).await,
            Outcome::Failed(message) => self.raw.mark_failed(id, message).await,
        }
    }

    /// Puts claimed but unsettled snapshots back to `new`. A snapshot that
    /// cannot be requeued stays `processing` until its claim goes stale.
    async fn release(&self, snapshots: impl Iterator<Item = Snapshot>) {
        for snapshot in snapshots {
            if let Err(e) = self.raw.requeue(snapshot.id).await {
                tracing::warn!(snapshot_id = snapshot.id, error = %e, "Failed to requeue snapshot.");
            }
        }
    }

    async fn recover_stale_claims(&self) -> Result<u64, EtlError> {
        let cutoff = TimeDelta::from_std(self.stale_claim_timeout)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age));
        let Some(cutoff) = cutoff else {
            return Ok(0);
        };
        let recovered = self.raw.requeue_stale(cutoff).await?;
        if recovered > 0 {
            tracing::info!(recovered, "Requeued stale snapshot claims.");
        }
        Ok(recovered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use core_types::ProcessingStatus;
    use database::test_support::MemoryStore;
    use rstest::rstest;
    use serde_json::{Value, json};

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 9, 8, 12, minute, 0).unwrap()
    }

    async fn capture(store: &MemoryStore, endpoint: Endpoint, body: Value, minute: u32) -> i64 {
        let bytes = serde_json::to_vec(&body).unwrap();
        store.store(&endpoint, &bytes, at(minute)).await.unwrap().snapshot_id
    }

    fn league() -> Endpoint {
        Endpoint::League { league_id: "L1".into() }
    }

    fn rosters() -> Endpoint {
        Endpoint::Rosters { league_id: "L1".into() }
    }

    fn setup(group: usize) -> (Arc<MemoryStore>, EtlProcessor) {
        let store = Arc::new(MemoryStore::new());
        let processor = EtlProcessor::new(store.clone(), store.clone(), group);
        (store, processor)
    }

    #[tokio::test]
    async fn each_snapshot_is_settled_on_its_own() {
        let (store, processor) = setup(25);
        let league = capture(&store, league(), json!({ "name": "Dynasty", "season": "2024" }), 0).await;
        let bad_users = capture(&store, Endpoint::Users { league_id: "L1".into() }, json!({ "oops": 1 }), 1).await;
        let roster_list = json!([{ "roster_id": 1, "owner_id": "u1" }, { "roster_id": 2, "owner_id": "u2" }]);
        let rosters = capture(&store, rosters(), roster_list, 2).await;
        let empty = capture(&store, Endpoint::TradedPicks { league_id: "L1".into() }, json!([]), 3).await;
        store.fail_on("roster:L1:2");

        let result = processor.process_unprocessed(100, &CancellationToken::new()).await.unwrap();

        assert_eq!(result.total_processed, 4);
        assert_eq!(result.success_count, 1);
        assert_eq!(result.error_count, 2);
        assert_eq!(result.skipped_count, 1);

        assert_eq!(store.snapshot(league).unwrap().status, ProcessingStatus::Processed);
        assert_eq!(store.snapshot(bad_users).unwrap().status, ProcessingStatus::Failed);
        let failed_rosters = store.snapshot(rosters).unwrap();
        assert_eq!(failed_rosters.status, ProcessingStatus::Failed);
        assert!(failed_rosters.notes.unwrap().contains("rosters[2]"));
        let skipped = store.snapshot(empty).unwrap();
        assert_eq!(skipped.status, ProcessingStatus::Processed);
        assert_eq!(skipped.notes.as_deref(), Some(EMPTY_PAYLOAD_NOTE));

        // The healthy roster still landed.
        assert_eq!(store.rosters("L1").len(), 1);
    }

    #[rstest]
    #[case(5, 2, 5)]
    #[case(3, 25, 3)]
    #[case(20, 4, 8)]
    #[tokio::test]
    async fn claims_stop_at_the_batch_limit(
        #[case] batch_limit: usize,
        #[case] group: usize,
        #[case] expected: usize,
    ) {
        let (store, processor) = setup(group);
        for week in 1..=8u32 {
            let endpoint = Endpoint::Matchups { league_id: "L1".into(), week };
            capture(&store, endpoint, json!([]), week).await;
        }

        let result = processor.process_unprocessed(batch_limit, &CancellationToken::new()).await.unwrap();

        assert_eq!(result.total_processed, expected);
        let counts = store.status_counts().await.unwrap();
        assert_eq!(counts.processed as usize, expected);
        assert_eq!(counts.new as usize, 8 - expected);
        assert_eq!(counts.processing, 0);
    }

    #[tokio::test]
    async fn oldest_snapshots_are_projected_first() {
        let (store, processor) = setup(1);
        // Captured out of dependency order: rosters reference the league.
        capture(&store, rosters(), json!([{ "roster_id": 1 }]), 5).await;
        capture(&store, league(), json!({ "name": "Dynasty" }), 0).await;

        let result = processor.process_unprocessed(10, &CancellationToken::new()).await.unwrap();
        assert_eq!(result.success_count, 2, "errors: {:?}", result.errors);
    }

    #[tokio::test]
    async fn cancelled_batches_leave_snapshots_new() {
        let (store, processor) = setup(25);
        capture(&store, league(), json!({ "name": "Dynasty" }), 0).await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = processor.process_unprocessed(10, &cancel).await.unwrap();

        assert_eq!(result.total_processed, 0);
        assert_eq!(store.status_counts().await.unwrap().new, 1);
    }

    #[tokio::test]
    async fn drain_empties_the_queue_and_requeued_failures_come_back() {
        let (store, processor) = setup(2);
        capture(&store, league(), json!({ "name": "Dynasty" }), 0).await;
        for minute in 1..=4 {
            let endpoint = Endpoint::Transactions { league_id: "L1".into(), week: minute };
            let body = json!([{ "transaction_id": format!("T{minute}"), "type": "trade" }]);
            capture(&store, endpoint, body, minute).await;
        }
        store.fail_on("transaction:T3");

        let first = processor.drain(2, &CancellationToken::new()).await.unwrap();
        assert_eq!(first.total_processed, 5);
        assert_eq!(first.error_count, 1);
        assert_eq!(store.status_counts().await.unwrap().new, 0);

        store.clear_failures();
        assert_eq!(store.requeue_failed().await.unwrap(), 1);
        let second = processor.drain(2, &CancellationToken::new()).await.unwrap();
        assert_eq!(second.success_count, 1);
        assert_eq!(store.transactions("L1").len(), 4);
    }

    async fn capture_weeks(store: &MemoryStore, weeks: u32) -> Vec<i64> {
        let mut ids = Vec::new();
        for week in 1..=weeks {
            let endpoint = Endpoint::Matchups { league_id: "L1".into(), week };
            ids.push(capture(store, endpoint, json!([]), week).await);
        }
        ids
    }

    #[tokio::test]
    async fn a_snapshot_that_cannot_be_settled_is_reported_and_requeued() {
        let (store, processor) = setup(25);
        let ids = capture_weeks(&store, 5).await;
        store.fail_on(format!("settle:{}", ids[1]));

        let result = processor.process_unprocessed(100, &CancellationToken::new()).await.unwrap();

        assert_eq!(result.total_processed, 4);
        assert_eq!(result.skipped_count, 4);
        assert_eq!(result.error_count, 1);
        assert_eq!(result.errors[0].item.as_deref(), Some(ids[1].to_string().as_str()));
        assert!(result.errors[0].message.starts_with("settle:"));
        let counts = store.status_counts().await.unwrap();
        assert_eq!((counts.processed, counts.new, counts.processing), (4, 1, 0));

        // Still failing: the drain gives up instead of spinning on the same snapshot.
        let stuck = processor.drain(100, &CancellationToken::new()).await.unwrap();
        assert_eq!(stuck.total_processed, 0);
        assert_eq!(stuck.error_count, 1);

        store.clear_failures();
        let retry = processor.drain(100, &CancellationToken::new()).await.unwrap();
        assert_eq!(retry.total_processed, 1);
        assert_eq!(store.status_counts().await.unwrap().processed, 5);
    }

    #[tokio::test]
    async fn stranded_claims_are_recovered_once_stale() {
        let (store, processor) = setup(25);
        let id = capture_weeks(&store, 1).await[0];
        store.fail_on(format!("settle:{id}"));
        store.fail_on(format!("requeue:{id}"));

        let result = processor.process_unprocessed(100, &CancellationToken::new()).await.unwrap();
        assert_eq!(result.error_count, 1);
        assert_eq!(store.snapshot(id).unwrap().status, ProcessingStatus::Processing);
        store.clear_failures();

        let fresh = processor.process_unprocessed(100, &CancellationToken::new()).await.unwrap();
        assert_eq!(fresh.total_processed, 0);
        assert_eq!(store.snapshot(id).unwrap().status, ProcessingStatus::Processing);

        let eager = EtlProcessor::new(store.clone(), store.clone(), 25).with_stale_claim_timeout(Duration::ZERO);
        let recovered = eager.process_unprocessed(100, &CancellationToken::new()).await.unwrap();
        assert_eq!(recovered.skipped_count, 1);
        assert_eq!(store.snapshot(id).unwrap().status, ProcessingStatus::Processed);
    }
}
