//! An in-memory implementation of every store trait.
//!
//! Mirrors the Postgres adapter's semantics (deduplication, status guards,
//! foreign keys, metadata merge) so pipeline behaviour can be tested without
//! a database. Individual writes can be made to fail with [`MemoryStore::fail_on`].

use crate::entities::{EntityStore, owners};
use crate::error::StorageError;
use crate::hashing::content_hash;
use crate::raw::{RawStore, Snapshot, StatusCounts, StoredSnapshot};
use crate::runs::{RunLedger, RunRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use core_types::{
    DraftPickRecord, Endpoint, EndpointAttempt, EndpointKind, ItemError, LeagueRecord,
    MatchupRecord, PlayerRecord, PlayerStatus, ProcessingStatus, RosterRecord, RunCounts, RunStatus,
    SeasonRecord, TradedPickRecord, TransactionRecord, UserRecord,
};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchLogEntry {
    pub endpoint: String,
    pub content_hash: String,
    pub snapshot_id: i64,
    pub fetched_at: DateTime<Utc>,
}

/// One span of a tracked value. `valid_to` is `None` for the current one.
#[derive(Debug, Clone, PartialEq)]
pub struct Span<T> {
    pub value: T,
    pub valid_from: DateTime<Utc>,
    pub valid_to: Option<DateTime<Utc>>,
}

/// Closes current spans whose value left `current` and opens one per new value.
fn advance<T: PartialEq + Clone>(spans: &mut Vec<Span<T>>, current: &[T], now: DateTime<Utc>) {
    for span in spans.iter_mut().filter(|s| s.valid_to.is_none()) {
        if !current.contains(&span.value) {
            span.valid_to = Some(now);
        }
    }
    for value in current {
        if !spans.iter().any(|s| s.valid_to.is_none() && s.value == *value) {
            spans.push(Span { value: value.clone(), valid_from: now, valid_to: None });
        }
    }
}

#[derive(Default)]
struct State {
    snapshots: Vec<Snapshot>,
    fetch_log: Vec<FetchLogEntry>,
    latest: HashMap<(EndpointKind, String), (String, i64)>,
    leagues: BTreeMap<String, LeagueRecord>,
    users: BTreeMap<String, UserRecord>,
    rosters: BTreeMap<(String, i32), RosterRecord>,
    players: BTreeMap<String, PlayerRecord>,
    matchups: BTreeMap<(String, i32, i32), MatchupRecord>,
    transactions: BTreeMap<String, TransactionRecord>,
    seasons: BTreeMap<String, SeasonRecord>,
    draft_picks: BTreeMap<(String, i32), DraftPickRecord>,
    traded_picks: BTreeMap<(String, String, i32, i32), TradedPickRecord>,
    roster_players: BTreeMap<(String, i32), Vec<Span<String>>>,
    roster_owners: BTreeMap<(String, i32), Vec<Span<(String, bool)>>>,
    player_status: BTreeMap<String, Vec<Span<PlayerStatus>>>,
    runs: Vec<RunRecord>,
    attempts: Vec<(i64, EndpointAttempt)>,
    failing: HashSet<String>,
}

impl State {
    fn check(&self, key: String) -> Result<(), StorageError> {
        if self.failing.contains(&key) {
            return Err(StorageError::Query(format!("injected failure for {key}")));
        }
        Ok(())
    }

    fn snapshot_mut(&mut self, id: i64) -> Result<&mut Snapshot, StorageError> {
        self.snapshots
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| StorageError::NotFound(format!("snapshot {id}")))
    }

    fn finish(&mut self, id: i64, to: ProcessingStatus, notes: Option<&str>) -> Result<(), StorageError> {
        self.check(format!("settle:{id}"))?;
        let snapshot = self.snapshot_mut(id)?;
        if snapshot.status != ProcessingStatus::Processing {
            return Err(StorageError::InvalidTransition { id, from: snapshot.status, to });
        }
        snapshot.status = to;
        snapshot.notes = notes.map(str::to_string);
        snapshot.claimed_at = None;
        snapshot.processed_at = Some(Utc::now());
        Ok(())
    }

    fn new_snapshots(&self) -> Vec<Snapshot> {
        let mut pending: Vec<Snapshot> = self
            .snapshots
            .iter()
            .filter(|s| s.status == ProcessingStatus::New)
            .cloned()
            .collect();
        pending.sort_by(|a, b| a.fetched_at.cmp(&b.fetched_at).then(a.id.cmp(&b.id)));
        pending
    }
}

/// Shallow merge: keys of `incoming` replace those of `existing`.
fn merge_metadata(existing: &Value, incoming: &Value) -> Value {
    match (existing, incoming) {
        (Value::Object(old), Value::Object(new)) => {
            let mut merged = old.clone();
            merged.extend(new.clone());
            Value::Object(merged)
        }
        _ => incoming.clone(),
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Makes the write identified by `key` fail, e.g. `roster:L1:3`,
    /// `user:u1`, `league:L1`, `store:/league/L1/users`, `settle:7`, `requeue:7`.
    pub fn fail_on(&self, key: impl Into<String>) {
        self.lock().failing.insert(key.into());
    }

    pub fn clear_failures(&self) {
        self.lock().failing.clear();
    }

    pub fn snapshots(&self) -> Vec<Snapshot> {
        self.lock().snapshots.clone()
    }

    pub fn snapshot(&self, id: i64) -> Option<Snapshot> {
        self.lock().snapshots.iter().find(|s| s.id == id).cloned()
    }

    pub fn fetch_log(&self) -> Vec<FetchLogEntry> {
        self.lock().fetch_log.clone()
    }

    /// Hash of the latest payload stored for a logical key.
    pub fn latest_hash(&self, kind: EndpointKind, key: &str) -> Option<String> {
        self.lock().latest.get(&(kind, key.to_string())).map(|(hash, _)| hash.clone())
    }

    pub fn latest_len(&self) -> usize {
        self.lock().latest.len()
    }

    pub fn league(&self, league_id: &str) -> Option<LeagueRecord> {
        self.lock().leagues.get(league_id).cloned()
    }

    pub fn user(&self, user_id: &str) -> Option<UserRecord> {
        self.lock().users.get(user_id).cloned()
    }

    pub fn users(&self) -> Vec<UserRecord> {
        self.lock().users.values().cloned().collect()
    }

    pub fn rosters(&self, league_id: &str) -> Vec<RosterRecord> {
        self.lock().rosters.values().filter(|r| r.league_id == league_id).cloned().collect()
    }

    pub fn players(&self) -> Vec<PlayerRecord> {
        self.lock().players.values().cloned().collect()
    }

    pub fn matchups(&self, league_id: &str, week: i32) -> Vec<MatchupRecord> {
        self.lock()
            .matchups
            .values()
            .filter(|m| m.league_id == league_id && m.week == week)
            .cloned()
            .collect()
    }

    pub fn transactions(&self, league_id: &str) -> Vec<TransactionRecord> {
        self.lock().transactions.values().filter(|t| t.league_id == league_id).cloned().collect()
    }

    pub fn season(&self, season: &str) -> Option<SeasonRecord> {
        self.lock().seasons.get(season).cloned()
    }

    pub fn draft_picks(&self, draft_id: &str) -> Vec<DraftPickRecord> {
        self.lock().draft_picks.values().filter(|p| p.draft_id == draft_id).cloned().collect()
    }

    pub fn traded_picks(&self, league_id: &str) -> Vec<TradedPickRecord> {
        self.lock().traded_picks.values().filter(|p| p.league_id == league_id).cloned().collect()
    }

    pub fn roster_player_history(&self, league_id: &str, roster_id: i32) -> Vec<Span<String>> {
        let key = (league_id.to_string(), roster_id);
        self.lock().roster_players.get(&key).cloned().unwrap_or_default()
    }

    pub fn roster_owner_history(&self, league_id: &str, roster_id: i32) -> Vec<Span<(String, bool)>> {
        let key = (league_id.to_string(), roster_id);
        self.lock().roster_owners.get(&key).cloned().unwrap_or_default()
    }

    pub fn player_status_history(&self, player_id: &str) -> Vec<Span<PlayerStatus>> {
        self.lock().player_status.get(player_id).cloned().unwrap_or_default()
    }

    pub fn runs(&self) -> Vec<RunRecord> {
        self.lock().runs.clone()
    }

    pub fn attempts(&self, run_id: i64) -> Vec<EndpointAttempt> {
        self.lock()
            .attempts
            .iter()
            .filter(|(id, _)| *id == run_id)
            .map(|(_, attempt)| attempt.clone())
            .collect()
    }
}

#[async_trait]
impl RawStore for MemoryStore {
    async fn store(
        &self,
        endpoint: &Endpoint,
        payload: &[u8],
        fetched_at: DateTime<Utc>,
    ) -> Result<StoredSnapshot, StorageError> {
        let mut state = self.lock();
        let path = endpoint.path();
        state.check(format!("store:{path}"))?;

        let hash = content_hash(payload);
        let existing = state
            .snapshots
            .iter()
            .find(|s| s.endpoint == path && s.content_hash == hash)
            .map(|s| s.id);

        let (snapshot_id, deduplicated) = match existing {
            Some(id) => (id, true),
            None => {
                let id = state.snapshots.len() as i64 + 1;
                state.snapshots.push(Snapshot {
                    id,
                    endpoint: path.clone(),
                    kind: endpoint.kind(),
                    content_hash: hash.clone(),
                    payload: payload.to_vec(),
                    size_bytes: payload.len() as i64,
                    fetched_at,
                    status: ProcessingStatus::New,
                    notes: None,
                    claimed_at: None,
                    processed_at: None,
                });
                (id, false)
            }
        };

        state.fetch_log.push(FetchLogEntry {
            endpoint: path,
            content_hash: hash.clone(),
            snapshot_id,
            fetched_at,
        });

        let key = (endpoint.kind(), endpoint.logical_key());
        let changed = state.latest.get(&key).is_none_or(|(current, _)| *current != hash);
        if changed {
            state.latest.insert(key, (hash.clone(), snapshot_id));
        }

        Ok(StoredSnapshot { snapshot_id, content_hash: hash, deduplicated, changed })
    }

    async fn claim_unprocessed(&self, limit: usize) -> Result<Vec<Snapshot>, StorageError> {
        let mut state = self.lock();
        let mut claimed = state.new_snapshots();
        claimed.truncate(limit);
        let now = Utc::now();
        for snapshot in &mut claimed {
            snapshot.status = ProcessingStatus::Processing;
            snapshot.claimed_at = Some(now);
            let stored = state.snapshot_mut(snapshot.id)?;
            stored.status = ProcessingStatus::Processing;
            stored.claimed_at = Some(now);
        }
        Ok(claimed)
    }

    async fn claim(&self, id: i64) -> Result<bool, StorageError> {
        let mut state = self.lock();
        let snapshot = state.snapshot_mut(id)?;
        if snapshot.status != ProcessingStatus::New {
            return Ok(false);
        }
        snapshot.status = ProcessingStatus::Processing;
        snapshot.claimed_at = Some(Utc::now());
        Ok(true)
    }

    async fn mark_processed(&self, id: i64, notes: Option<&str>) -> Result<(), StorageError> {
        self.lock().finish(id, ProcessingStatus::Processed, notes)
    }

    async fn mark_failed(&self, id: i64, notes: &str) -> Result<(), StorageError> {
        self.lock().finish(id, ProcessingStatus::Failed, Some(notes))
    }

    async fn requeue(&self, id: i64) -> Result<(), StorageError> {
        let mut state = self.lock();
        state.check(format!("requeue:{id}"))?;
        let snapshot = state.snapshot_mut(id)?;
        if snapshot.status == ProcessingStatus::New {
            return Err(StorageError::InvalidTransition {
                id,
                from: ProcessingStatus::New,
                to: ProcessingStatus::New,
            });
        }
        snapshot.status = ProcessingStatus::New;
        snapshot.notes = None;
        snapshot.claimed_at = None;
        snapshot.processed_at = None;
        Ok(())
    }

    async fn requeue_failed(&self) -> Result<u64, StorageError> {
        let mut state = self.lock();
        let mut moved = 0;
        for snapshot in state.snapshots.iter_mut().filter(|s| s.status == ProcessingStatus::Failed) {
            snapshot.status = ProcessingStatus::New;
            snapshot.notes = None;
            snapshot.claimed_at = None;
            snapshot.processed_at = None;
            moved += 1;
        }
        Ok(moved)
    }

    async fn requeue_stale(&self, claimed_before: DateTime<Utc>) -> Result<u64, StorageError> {
        let mut state = self.lock();
        let mut moved = 0;
        let stale = state.snapshots.iter_mut().filter(|s| {
            s.status == ProcessingStatus::Processing && s.claimed_at.is_none_or(|at| at <= claimed_before)
        });
        for snapshot in stale {
            snapshot.status = ProcessingStatus::New;
            snapshot.notes = None;
            snapshot.claimed_at = None;
            snapshot.processed_at = None;
            moved += 1;
        }
        Ok(moved)
    }

    async fn get_unprocessed(&self, limit: usize) -> Result<Vec<Snapshot>, StorageError> {
        let mut pending = self.lock().new_snapshots();
        pending.truncate(limit);
        Ok(pending)
    }

    async fn status_counts(&self) -> Result<StatusCounts, StorageError> {
        let mut counts = StatusCounts::default();
        for snapshot in &self.lock().snapshots {
            counts.add(snapshot.status, 1);
        }
        Ok(counts)
    }
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn upsert_league(&self, league: &LeagueRecord) -> Result<(), StorageError> {
        let mut state = self.lock();
        state.check(format!("league:{}", league.league_id))?;
        if let Some(previous) = &league.previous_league_id {
            if previous != &league.league_id && !state.leagues.contains_key(previous) {
                return Err(StorageError::Constraint(format!("unknown previous league {previous}")));
            }
        }
        let mut record = league.clone();
        if let Some(existing) = state.leagues.get(&league.league_id) {
            record.metadata = merge_metadata(&existing.metadata, &league.metadata);
        }
        state.leagues.insert(record.league_id.clone(), record);
        Ok(())
    }

    async fn league_exists(&self, league_id: &str) -> Result<bool, StorageError> {
        Ok(self.lock().leagues.contains_key(league_id))
    }

    async fn upsert_user(&self, user: &UserRecord) -> Result<(), StorageError> {
        let mut state = self.lock();
        state.check(format!("user:{}", user.user_id))?;
        let mut record = user.clone();
        if let Some(existing) = state.users.get(&user.user_id) {
            record.metadata = merge_metadata(&existing.metadata, &user.metadata);
        }
        state.users.insert(record.user_id.clone(), record);
        Ok(())
    }

    async fn ensure_user(&self, user_id: &str) -> Result<bool, StorageError> {
        let mut state = self.lock();
        if state.users.contains_key(user_id) {
            return Ok(false);
        }
        state.check(format!("user:{user_id}"))?;
        state.users.insert(user_id.to_string(), UserRecord::placeholder(user_id));
        Ok(true)
    }

    async fn upsert_roster(&self, roster: &RosterRecord) -> Result<(), StorageError> {
        let mut state = self.lock();
        state.check(format!("roster:{}:{}", roster.league_id, roster.roster_id))?;
        if !state.leagues.contains_key(&roster.league_id) {
            return Err(StorageError::Constraint(format!("unknown league {}", roster.league_id)));
        }
        if let Some(owner) = &roster.owner_id {
            if !state.users.contains_key(owner) {
                return Err(StorageError::Constraint(format!("unknown owner {owner}")));
            }
        }
        let owned_by = owners(roster);
        for (user_id, _) in &owned_by {
            state
                .users
                .entry(user_id.clone())
                .or_insert_with(|| UserRecord::placeholder(user_id.as_str()));
        }

        let key = (roster.league_id.clone(), roster.roster_id);
        let now = Utc::now();
        state.rosters.insert(key.clone(), roster.clone());
        advance(state.roster_players.entry(key.clone()).or_default(), &roster.players, now);
        advance(state.roster_owners.entry(key).or_default(), &owned_by, now);
        Ok(())
    }

    async fn upsert_players(&self, players: &[PlayerRecord]) -> Result<u64, StorageError> {
        let mut state = self.lock();
        for player in players {
            state.check(format!("player:{}", player.player_id))?;
        }
        let now = Utc::now();
        for player in players {
            state.players.insert(player.player_id.clone(), player.clone());
            if let Some(status) = player.tracked_status() {
                let spans = state.player_status.entry(player.player_id.clone()).or_default();
                advance(spans, &[status], now);
            }
        }
        Ok(players.len() as u64)
    }

    async fn upsert_matchup(&self, matchup: &MatchupRecord) -> Result<(), StorageError> {
        let mut state = self.lock();
        state.check(format!("matchup:{}:{}:{}", matchup.league_id, matchup.week, matchup.roster_id))?;
        if !state.rosters.contains_key(&(matchup.league_id.clone(), matchup.roster_id)) {
            return Err(StorageError::Constraint(format!(
                "unknown roster {} in league {}",
                matchup.roster_id, matchup.league_id
            )));
        }
        state.matchups.insert(
            (matchup.league_id.clone(), matchup.week, matchup.roster_id),
            matchup.clone(),
        );
        Ok(())
    }

    async fn upsert_transaction(&self, transaction: &TransactionRecord) -> Result<(), StorageError> {
        let mut state = self.lock();
        state.check(format!("transaction:{}", transaction.transaction_id))?;
        if !state.leagues.contains_key(&transaction.league_id) {
            return Err(StorageError::Constraint(format!("unknown league {}", transaction.league_id)));
        }
        if let Some(creator) = &transaction.creator {
            if !state.users.contains_key(creator) {
                return Err(StorageError::Constraint(format!("unknown creator {creator}")));
            }
        }
        state.transactions.insert(transaction.transaction_id.clone(), transaction.clone());
        Ok(())
    }

    async fn upsert_season(&self, season: &SeasonRecord) -> Result<(), StorageError> {
        let mut state = self.lock();
        state.check(format!("season:{}", season.season))?;
        state.seasons.insert(season.season.clone(), season.clone());
        Ok(())
    }

    async fn upsert_draft_pick(&self, pick: &DraftPickRecord) -> Result<(), StorageError> {
        let mut state = self.lock();
        state.check(format!("draft_pick:{}:{}", pick.draft_id, pick.pick_no))?;
        state.draft_picks.insert((pick.draft_id.clone(), pick.pick_no), pick.clone());
        Ok(())
    }

    async fn upsert_traded_pick(&self, pick: &TradedPickRecord) -> Result<(), StorageError> {
        let mut state = self.lock();
        state.check(format!(
            "traded_pick:{}:{}:{}:{}",
            pick.league_id, pick.season, pick.round, pick.roster_id
        ))?;
        if !state.leagues.contains_key(&pick.league_id) {
            return Err(StorageError::Constraint(format!("unknown league {}", pick.league_id)));
        }
        state.traded_picks.insert(
            (pick.league_id.clone(), pick.season.clone(), pick.round, pick.roster_id),
            pick.clone(),
        );
        Ok(())
    }
}

#[async_trait]
impl RunLedger for MemoryStore {
    async fn open_run(&self, run_type: &str, league_id: Option<&str>) -> Result<i64, StorageError> {
        let mut state = self.lock();
        let id = state.runs.len() as i64 + 1;
        state.runs.push(RunRecord {
            id,
            run_type: run_type.to_string(),
            league_id: league_id.map(str::to_string),
            status: RunStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
            counts: RunCounts::default(),
            errors: Vec::new(),
        });
        Ok(id)
    }

    async fn record_attempt(&self, run_id: i64, attempt: &EndpointAttempt) -> Result<(), StorageError> {
        let mut state = self.lock();
        if !state.runs.iter().any(|r| r.id == run_id) {
            return Err(StorageError::Constraint(format!("unknown sync run {run_id}")));
        }
        state.attempts.push((run_id, attempt.clone()));
        Ok(())
    }

    async fn close_run(
        &self,
        run_id: i64,
        status: RunStatus,
        errors: &[ItemError],
    ) -> Result<RunRecord, StorageError> {
        let mut state = self.lock();
        let counts = RunCounts::tally(
            state.attempts.iter().filter(|(id, _)| *id == run_id).map(|(_, attempt)| attempt),
        );
        let run = state
            .runs
            .iter_mut()
            .find(|r| r.id == run_id)
            .ok_or_else(|| StorageError::NotFound(format!("sync run {run_id}")))?;
        run.status = status;
        run.finished_at = Some(Utc::now());
        run.counts = counts;
        run.errors = errors.to_vec();
        Ok(run.clone())
    }

    async fn recent_runs(&self, limit: usize) -> Result<Vec<RunRecord>, StorageError> {
        Ok(self.lock().runs.iter().rev().take(limit).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 9, 8, 12, minute, 0).unwrap()
    }

    fn users() -> Endpoint {
        Endpoint::Users { league_id: "L1".to_string() }
    }

    #[tokio::test]
    async fn identical_payloads_are_stored_once_and_logged_twice() {
        let store = MemoryStore::new();
        let first = store.store(&users(), b"[1]", at(0)).await.unwrap();
        let second = store.store(&users(), b"[1]", at(5)).await.unwrap();

        assert!(!first.deduplicated && first.changed);
        assert!(second.deduplicated && !second.changed);
        assert_eq!(first.snapshot_id, second.snapshot_id);
        assert_eq!(store.snapshots().len(), 1);
        assert_eq!(store.fetch_log().len(), 2);
        assert_eq!(store.latest_len(), 1);
    }

    #[tokio::test]
    async fn a_changed_payload_replaces_the_latest_row() {
        let store = MemoryStore::new();
        store.store(&users(), b"[1]", at(0)).await.unwrap();
        let changed = store.store(&users(), b"[1,2]", at(1)).await.unwrap();

        assert!(changed.changed && !changed.deduplicated);
        assert_eq!(store.snapshots().len(), 2);
        assert_eq!(store.latest_hash(EndpointKind::Users, "L1"), Some(changed.content_hash));
    }

    #[tokio::test]
    async fn status_moves_forward_and_requeue_goes_back() {
        let store = MemoryStore::new();
        let id = store.store(&users(), b"[]", at(0)).await.unwrap().snapshot_id;

        assert!(matches!(
            store.mark_processed(id, None).await,
            Err(StorageError::InvalidTransition { from: ProcessingStatus::New, .. })
        ));

        let claimed = store.claim_unprocessed(10).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].status, ProcessingStatus::Processing);
        assert!(store.claim_unprocessed(10).await.unwrap().is_empty());

        store.mark_failed(id, "bad payload").await.unwrap();
        assert!(store.mark_processed(id, None).await.is_err());

        assert_eq!(store.requeue_failed().await.unwrap(), 1);
        assert_eq!(store.get_unprocessed(10).await.unwrap().len(), 1);
        assert!(matches!(store.requeue(id).await, Err(StorageError::InvalidTransition { .. })));
        assert!(matches!(store.requeue(99).await, Err(StorageError::NotFound(_))));
    }

    #[tokio::test]
    async fn only_claims_older_than_the_cutoff_are_requeued() {
        let store = MemoryStore::new();
        let id = store.store(&users(), b"[]", at(0)).await.unwrap().snapshot_id;
        assert!(store.claim(id).await.unwrap());
        let claimed_at = store.snapshot(id).unwrap().claimed_at.unwrap();

        let earlier = claimed_at - chrono::Duration::seconds(1);
        assert_eq!(store.requeue_stale(earlier).await.unwrap(), 0);
        assert_eq!(store.snapshot(id).unwrap().status, ProcessingStatus::Processing);

        assert_eq!(store.requeue_stale(claimed_at).await.unwrap(), 1);
        let requeued = store.snapshot(id).unwrap();
        assert_eq!(requeued.status, ProcessingStatus::New);
        assert_eq!(requeued.claimed_at, None);
    }

    #[tokio::test]
    async fn claims_are_oldest_first() {
        let store = MemoryStore::new();
        store.store(&Endpoint::State, b"{\"week\":2}", at(9)).await.unwrap();
        store.store(&users(), b"[]", at(1)).await.unwrap();

        let claimed = store.claim_unprocessed(1).await.unwrap();
        assert_eq!(claimed[0].endpoint, "/league/L1/users");
        let counts = store.status_counts().await.unwrap();
        assert_eq!((counts.new, counts.processing), (1, 1));
    }

    #[tokio::test]
    async fn league_metadata_is_merged_not_replaced() {
        let store = MemoryStore::new();
        let mut league = LeagueRecord {
            league_id: "L1".into(),
            name: "Dynasty".into(),
            season: "2024".into(),
            status: None,
            sport: "nfl".into(),
            season_type: None,
            total_rosters: 12,
            draft_id: None,
            previous_league_id: None,
            roster_positions: vec![],
            settings: json!({}),
            scoring_settings: json!({}),
            metadata: json!({ "a": 1, "b": 1 }),
        };
        store.upsert_league(&league).await.unwrap();
        league.metadata = json!({ "b": 2 });
        league.name = "Renamed".into();
        store.upsert_league(&league).await.unwrap();

        let stored = store.league("L1").unwrap();
        assert_eq!(stored.name, "Renamed");
        assert_eq!(stored.metadata, json!({ "a": 1, "b": 2 }));
    }

    fn roster_record(owner: &str, co_owners: &[&str], players: &[&str]) -> RosterRecord {
        RosterRecord {
            league_id: "L1".into(),
            roster_id: 1,
            owner_id: Some(owner.into()),
            co_owners: co_owners.iter().map(|s| s.to_string()).collect(),
            players: players.iter().map(|s| s.to_string()).collect(),
            starters: vec![],
            reserve: vec![],
            taxi: vec![],
            wins: 0,
            losses: 0,
            ties: 0,
            points_for: 0.0,
            points_against: 0.0,
            waiver_position: Some(3),
            waiver_budget_used: None,
            total_moves: None,
            settings: json!({}),
            metadata: json!({}),
        }
    }

    async fn seed_league(store: &MemoryStore) {
        let league = LeagueRecord {
            league_id: "L1".into(),
            name: "Dynasty".into(),
            season: "2024".into(),
            status: None,
            sport: "nfl".into(),
            season_type: None,
            total_rosters: 12,
            draft_id: None,
            previous_league_id: None,
            roster_positions: vec![],
            settings: json!({}),
            scoring_settings: json!({}),
            metadata: json!({}),
        };
        store.upsert_league(&league).await.unwrap();
        store.ensure_user("u1").await.unwrap();
        store.ensure_user("u2").await.unwrap();
    }

    #[tokio::test]
    async fn roster_membership_changes_close_and_open_spans() {
        let store = MemoryStore::new();
        seed_league(&store).await;

        store.upsert_roster(&roster_record("u1", &[], &["p1", "p2"])).await.unwrap();
        store.upsert_roster(&roster_record("u1", &[], &["p1", "p2"])).await.unwrap();
        assert_eq!(store.roster_player_history("L1", 1).len(), 2);

        store.upsert_roster(&roster_record("u1", &[], &["p2", "p3"])).await.unwrap();
        let history = store.roster_player_history("L1", 1);
        let current: Vec<&str> =
            history.iter().filter(|s| s.valid_to.is_none()).map(|s| s.value.as_str()).collect();
        assert_eq!(current, vec!["p2", "p3"]);
        let dropped = history.iter().find(|s| s.value == "p1").unwrap();
        assert!(dropped.valid_to.is_some());
    }

    #[tokio::test]
    async fn ownership_history_tracks_owner_changes_and_placeholders_co_owners() {
        let store = MemoryStore::new();
        seed_league(&store).await;

        store.upsert_roster(&roster_record("u1", &["u9"], &[])).await.unwrap();
        assert!(store.user("u9").is_some());

        store.upsert_roster(&roster_record("u2", &["u9"], &[])).await.unwrap();
        let history = store.roster_owner_history("L1", 1);
        let current: Vec<(String, bool)> =
            history.iter().filter(|s| s.valid_to.is_none()).map(|s| s.value.clone()).collect();
        assert_eq!(current, vec![("u9".to_string(), false), ("u2".to_string(), true)]);
        assert_eq!(history.len(), 3);
    }

    #[tokio::test]
    async fn player_status_spans_only_change_with_the_status() {
        let store = MemoryStore::new();
        let mut player = PlayerRecord {
            player_id: "4034".into(),
            first_name: None,
            last_name: None,
            full_name: None,
            position: Some("RB".into()),
            team: None,
            status: Some("Active".into()),
            age: None,
            years_exp: None,
            college: None,
            injury_status: None,
            injury_body_part: None,
            injury_notes: None,
            practice_participation: None,
            active: true,
            fantasy_positions: vec![],
            metadata: json!({}),
        };
        store.upsert_players(std::slice::from_ref(&player)).await.unwrap();
        player.position = Some("WR".into());
        store.upsert_players(std::slice::from_ref(&player)).await.unwrap();
        assert_eq!(store.player_status_history("4034").len(), 1);

        player.injury_status = Some("Out".into());
        player.injury_body_part = Some("Hamstring".into());
        store.upsert_players(std::slice::from_ref(&player)).await.unwrap();
        let history = store.player_status_history("4034");
        assert_eq!(history.len(), 2);
        assert!(history[0].valid_to.is_some());
        assert_eq!(history[1].value.injury_body_part.as_deref(), Some("Hamstring"));
        assert!(history[1].valid_to.is_none());
    }

    #[tokio::test]
    async fn run_counts_come_from_recorded_attempts() {
        let store = MemoryStore::new();
        let run = store.open_run("full", Some("L1")).await.unwrap();
        for outcome in [
            core_types::AttemptOutcome::Success,
            core_types::AttemptOutcome::Error,
            core_types::AttemptOutcome::Skipped,
        ] {
            let attempt = EndpointAttempt {
                endpoint: users(),
                outcome,
                latency_ms: 1,
                size_bytes: 2,
                error: None,
                snapshot_id: None,
            };
            store.record_attempt(run, &attempt).await.unwrap();
        }
        let closed = store
            .close_run(run, RunStatus::CompletedWithErrors, &[ItemError::stage("users", "boom")])
            .await
            .unwrap();
        assert_eq!(closed.counts, RunCounts { success: 1, error: 1, skipped: 1 });
        assert_eq!(closed.counts.total(), store.attempts(run).len() as i64);
        assert_eq!(closed.errors.len(), 1);
    }
}
