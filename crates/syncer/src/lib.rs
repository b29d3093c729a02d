//! The sync orchestrator.
//!
//! A sync run fetches upstream endpoints in dependency order, captures every
//! payload in the raw store, records one attempt per endpoint in the run
//! ledger and applies the payload to the normalized store straight away.
//! Only the league is a hard precondition; every later stage records its
//! failures on the run and lets the rest of the run continue.

pub mod error;

pub use error::SyncError;

use api_client::{FetchError, SleeperApi};
use core_types::{AttemptOutcome, Endpoint, EndpointAttempt, ItemError, LeagueRecord, PartialFailure, RunStatus, SyncResult};
use database::{EMPTY_PAYLOAD_NOTE, EntityStore, RawStore, RunLedger};
use projector::{Applied, ProjectionError, Projector};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// The bookkeeping of one open sync run.
struct Run {
    id: i64,
    league_id: Option<String>,
    started: Instant,
    records: usize,
    errors: PartialFailure,
}

impl Run {
    fn fail(&mut self, endpoint: &Endpoint, message: impl ToString) {
        self.errors.push(ItemError::stage(endpoint.kind().as_str(), message));
    }
}

/// What a fetch+store step left behind.
enum Capture {
    Stored { snapshot_id: i64, body: Vec<u8> },
    /// The endpoint returned `[]`, `{}` or `null`; recorded as skipped.
    Empty,
    Failed(String),
}

pub struct Orchestrator {
    api: Arc<dyn SleeperApi>,
    raw: Arc<dyn RawStore>,
    runs: Arc<dyn RunLedger>,
    projector: Projector,
}

impl Orchestrator {
    pub fn new(
        api: Arc<dyn SleeperApi>,
        raw: Arc<dyn RawStore>,
        runs: Arc<dyn RunLedger>,
        entities: Arc<dyn EntityStore>,
    ) -> Self {
        Self { api, raw, runs, projector: Projector::new(entities) }
    }

    /// Syncs everything a league depends on, in dependency order.
    ///
    /// League, users, players, rosters, then the current week from the NFL
    /// state and matchups followed by transactions for every week up to it,
    /// then traded picks and the league's draft picks.
    pub async fn full_sync(&self, league_id: &str, cancel: &CancellationToken) -> Result<SyncResult, SyncError> {
        let mut run = self.open("full", Some(league_id)).await?;
        tracing::info!(run_id = run.id, league_id, "Starting full sync.");
        let outcome = self.run_full(&mut run, league_id, cancel).await;
        self.finish(run, outcome).await
    }

    pub async fn sync_league(&self, league_id: &str, cancel: &CancellationToken) -> Result<SyncResult, SyncError> {
        let mut run = self.open("league", Some(league_id)).await?;
        let outcome = self.league(&mut run, league_id, cancel).await.map(|_| ());
        self.finish(run, outcome).await
    }

    pub async fn sync_users(&self, league_id: &str, cancel: &CancellationToken) -> Result<SyncResult, SyncError> {
        self.single(Endpoint::Users { league_id: league_id.to_string() }, cancel).await
    }

    pub async fn sync_players(&self, cancel: &CancellationToken) -> Result<SyncResult, SyncError> {
        self.single(Endpoint::Players, cancel).await
    }

    pub async fn sync_rosters(&self, league_id: &str, cancel: &CancellationToken) -> Result<SyncResult, SyncError> {
        self.single(Endpoint::Rosters { league_id: league_id.to_string() }, cancel).await
    }

    pub async fn sync_matchups(
        &self,
        league_id: &str,
        week: u32,
        cancel: &CancellationToken,
    ) -> Result<SyncResult, SyncError> {
        self.single(Endpoint::Matchups { league_id: league_id.to_string(), week }, cancel).await
    }

    pub async fn sync_transactions(
        &self,
        league_id: &str,
        week: u32,
        cancel: &CancellationToken,
    ) -> Result<SyncResult, SyncError> {
        self.single(Endpoint::Transactions { league_id: league_id.to_string(), week }, cancel).await
    }

    pub async fn sync_state(&self, cancel: &CancellationToken) -> Result<SyncResult, SyncError> {
        self.single(Endpoint::State, cancel).await
    }

    pub async fn sync_traded_picks(&self, league_id: &str, cancel: &CancellationToken) -> Result<SyncResult, SyncError> {
        self.single(Endpoint::TradedPicks { league_id: league_id.to_string() }, cancel).await
    }

    pub async fn sync_draft_picks(&self, draft_id: &str, cancel: &CancellationToken) -> Result<SyncResult, SyncError> {
        self.single(Endpoint::DraftPicks { draft_id: draft_id.to_string() }, cancel).await
    }

    async fn run_full(&self, run: &mut Run, league_id: &str, cancel: &CancellationToken) -> Result<(), SyncError> {
        let league = self.league(run, league_id, cancel).await?;

        self.stage(run, Endpoint::Users { league_id: league_id.to_string() }, cancel).await?;
        self.stage(run, Endpoint::Players, cancel).await?;
        self.stage(run, Endpoint::Rosters { league_id: league_id.to_string() }, cancel).await?;

        if let Some(current) = self.current_week(run, cancel).await? {
            for week in 1..=current {
                let league_id = league_id.to_string();
                self.stage(run, Endpoint::Matchups { league_id: league_id.clone(), week }, cancel).await?;
                self.stage(run, Endpoint::Transactions { league_id, week }, cancel).await?;
            }
        }

        self.stage(run, Endpoint::TradedPicks { league_id: league_id.to_string() }, cancel).await?;
        if let Some(draft_id) = league.draft_id {
            self.stage(run, Endpoint::DraftPicks { draft_id }, cancel).await?;
        }
        Ok(())
    }

    /// A one-endpoint run, as used by the partial `sync_*` calls.
    async fn single(&self, endpoint: Endpoint, cancel: &CancellationToken) -> Result<SyncResult, SyncError> {
        let mut run = self.open(endpoint.kind().as_str(), endpoint.league_id()).await?;
        let outcome = self.stage(&mut run, endpoint, cancel).await;
        self.finish(run, outcome).await
    }

    async fn open(&self, run_type: &str, league_id: Option<&str>) -> Result<Run, SyncError> {
        let id = self.runs.open_run(run_type, league_id).await?;
        Ok(Run {
            id,
            league_id: league_id.map(str::to_string),
            started: Instant::now(),
            records: 0,
            errors: PartialFailure::new(),
        })
    }

    async fn finish(&self, mut run: Run, outcome: Result<(), SyncError>) -> Result<SyncResult, SyncError> {
        let status = match &outcome {
            Ok(()) => RunStatus::from_error_count(run.errors.len()),
            Err(SyncError::Precondition { reason, .. }) => {
                run.errors.push(ItemError::stage("league", reason));
                RunStatus::Failed
            }
            Err(e) => {
                run.errors.push(ItemError::stage("run", e));
                RunStatus::Failed
            }
        };

        let closed = self.runs.close_run(run.id, status, run.errors.errors()).await;
        let duration = run.started.elapsed();

        if let Err(e) = outcome {
            if let Err(close_err) = closed {
                tracing::warn!(run_id = run.id, error = %close_err, "Failed to close sync run.");
            }
            tracing::error!(run_id = run.id, error = %e, elapsed_ms = millis(duration), "Sync run failed.");
            return Err(e);
        }
        let record = closed?;

        tracing::info!(
            run_id = run.id,
            status = %status,
            records = run.records,
            success = record.counts.success,
            errors = record.counts.error,
            skipped = record.counts.skipped,
            elapsed_ms = millis(duration),
            "Sync run finished."
        );
        Ok(SyncResult {
            run_id: run.id,
            league_id: run.league_id,
            status,
            success: run.errors.is_empty(),
            records_processed: run.records,
            errors: run.errors.into_errors(),
            duration,
        })
    }

    /// The league must land before anything that references it.
    async fn league(
        &self,
        run: &mut Run,
        league_id: &str,
        cancel: &CancellationToken,
    ) -> Result<LeagueRecord, SyncError> {
        let endpoint = Endpoint::League { league_id: league_id.to_string() };
        let precondition = |reason: String| SyncError::Precondition { league_id: league_id.to_string(), reason };

        match self.capture(run, &endpoint, cancel).await? {
            Capture::Failed(reason) => Err(precondition(reason)),
            Capture::Empty => Err(precondition("league not found".to_string())),
            Capture::Stored { snapshot_id, body } => match self.projector.apply_league(&endpoint, league_id, &body).await {
                Ok(record) => {
                    run.records += 1;
                    self.mark_applied(&endpoint, snapshot_id, None).await;
                    tracing::info!(run_id = run.id, league_id, name = %record.name, season = %record.season, "League synced.");
                    Ok(record)
                }
                Err(e) => Err(precondition(e.to_string())),
            },
        }
    }

    /// Syncs the NFL state and returns the current week, if it could be determined.
    async fn current_week(&self, run: &mut Run, cancel: &CancellationToken) -> Result<Option<u32>, SyncError> {
        let endpoint = Endpoint::State;
        match self.capture(run, &endpoint, cancel).await? {
            Capture::Failed(reason) => {
                run.fail(&endpoint, format!("current week unknown: {reason}"));
                Ok(None)
            }
            Capture::Empty => {
                run.fail(&endpoint, "current week unknown: empty state");
                Ok(None)
            }
            Capture::Stored { snapshot_id, body } => match self.projector.apply_state(&endpoint, &body).await {
                Ok(season) => {
                    run.records += 1;
                    self.mark_applied(&endpoint, snapshot_id, None).await;
                    let week = u32::try_from(season.week).unwrap_or(0);
                    tracing::info!(run_id = run.id, season = %season.season, week, "Resolved current week.");
                    Ok(Some(week))
                }
                Err(e) => {
                    run.fail(&endpoint, format!("current week unknown: {e}"));
                    Ok(None)
                }
            },
        }
    }

    /// Captures and applies one endpoint. Only cancellation and ledger failures escape.
    async fn stage(&self, run: &mut Run, endpoint: Endpoint, cancel: &CancellationToken) -> Result<(), SyncError> {
        let (snapshot_id, body) = match self.capture(run, &endpoint, cancel).await? {
            Capture::Stored { snapshot_id, body } => (snapshot_id, body),
            Capture::Empty => return Ok(()),
            Capture::Failed(reason) => {
                run.fail(&endpoint, reason);
                return Ok(());
            }
        };

        match self.projector.apply(&endpoint, &body, cancel).await {
            Ok(applied) => {
                self.settle(run, &endpoint, snapshot_id, applied).await;
                Ok(())
            }
            Err(ProjectionError::Cancelled) => Err(SyncError::Cancelled),
            Err(e) => {
                tracing::error!(run_id = run.id, endpoint = %endpoint, error = %e, "Failed to apply payload.");
                run.fail(&endpoint, e);
                Ok(())
            }
        }
    }

    async fn settle(&self, run: &mut Run, endpoint: &Endpoint, snapshot_id: i64, applied: Applied) {
        tracing::info!(
            run_id = run.id,
            endpoint = %endpoint,
            items = applied.items_seen,
            written = applied.written,
            failed = applied.failures.len(),
            "Stage applied."
        );
        run.records += applied.written;
        if applied.is_clean() {
            self.mark_applied(endpoint, snapshot_id, None).await;
        } else {
            // Left `new` so the ETL retries the failed items.
            run.errors.extend(applied.failures);
        }
    }

    /// Fetches one endpoint, stores the payload and records the attempt.
    async fn capture(&self, run: &mut Run, endpoint: &Endpoint, cancel: &CancellationToken) -> Result<Capture, SyncError> {
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        let started = Instant::now();
        let payload = match self.api.fetch(endpoint, cancel).await {
            Ok(payload) => payload,
            Err(FetchError::Cancelled) => return Err(SyncError::Cancelled),
            Err(e) => {
                tracing::error!(run_id = run.id, endpoint = %endpoint, error = %e, "Fetch failed.");
                let attempt = EndpointAttempt::failed(endpoint.clone(), millis(started.elapsed()), &e);
                self.runs.record_attempt(run.id, &attempt).await?;
                return Ok(Capture::Failed(e.to_string()));
            }
        };

        let stored = match self.raw.store(endpoint, &payload.body, payload.fetched_at).await {
            Ok(stored) => stored,
            Err(e) => {
                tracing::error!(run_id = run.id, endpoint = %endpoint, error = %e, "Failed to store payload.");
                let attempt = EndpointAttempt::failed(endpoint.clone(), payload.latency_ms(), format!("store: {e}"));
                self.runs.record_attempt(run.id, &attempt).await?;
                return Ok(Capture::Failed(format!("store: {e}")));
            }
        };

        let empty = payload.is_empty_collection();
        let attempt = EndpointAttempt {
            endpoint: endpoint.clone(),
            outcome: if empty { AttemptOutcome::Skipped } else { AttemptOutcome::Success },
            latency_ms: payload.latency_ms(),
            size_bytes: i64::try_from(payload.size()).unwrap_or(i64::MAX),
            error: None,
            snapshot_id: Some(stored.snapshot_id),
        };
        self.runs.record_attempt(run.id, &attempt).await?;

        if empty {
            tracing::info!(run_id = run.id, endpoint = %endpoint, "Endpoint returned no data, skipping.");
            self.mark_applied(endpoint, stored.snapshot_id, Some(EMPTY_PAYLOAD_NOTE)).await;
            return Ok(Capture::Empty);
        }

        tracing::debug!(
            run_id = run.id,
            endpoint = %endpoint,
            snapshot_id = stored.snapshot_id,
            bytes = payload.size(),
            deduplicated = stored.deduplicated,
            changed = stored.changed,
            "Captured payload."
        );
        Ok(Capture::Stored { snapshot_id: stored.snapshot_id, body: payload.body })
    }

    /// Marks a snapshot the run already applied as processed, so the ETL skips it.
    ///
    /// A snapshot that is no longer `new` was handled by an earlier run. A claim
    /// that cannot be settled is put back; failing that, the ETL recovers it once stale.
    async fn mark_applied(&self, endpoint: &Endpoint, snapshot_id: i64, notes: Option<&str>) {
        let result = match self.raw.claim(snapshot_id).await {
            Ok(true) => match self.raw.mark_processed(snapshot_id, notes).await {
                Ok(()) => Ok(()),
                Err(e) => {
                    if let Err(requeue) = self.raw.requeue(snapshot_id).await {
                        tracing::debug!(snapshot_id, error = %requeue, "Requeue after failed settle also failed.");
                    }
                    Err(e)
                }
            },
            Ok(false) => Ok(()),
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            tracing::warn!(endpoint = %endpoint, snapshot_id, error = %e, "Could not mark snapshot processed; the ETL will pick it up.");
        }
    }
}

fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}
