//! Applies captured payloads to the normalized store.
//!
//! Shared by the sync orchestrator (immediately after capture) and the ETL
//! processor (for snapshots left `new`). Collections are applied item by
//! item: a bad item is recorded in [`Applied::failures`] and the rest of the
//! payload still lands.

pub mod error;
pub mod mapping;

pub use error::ProjectionError;

use api_client::{DraftPick, League, Matchup, NflState, Player, Roster, TradedPick, Transaction, User, decode};
use core_types::{Endpoint, ItemError, LeagueRecord, PartialFailure, SeasonRecord};
use database::EntityStore;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// What one payload application wrote.
#[derive(Debug, Default)]
pub struct Applied {
    /// Entity rows written (placeholder users not included).
    pub written: usize,
    /// Items present in the payload.
    pub items_seen: usize,
    pub failures: PartialFailure,
}

impl Applied {
    fn single() -> Self {
        Self { written: 1, items_seen: 1, failures: PartialFailure::new() }
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Clone)]
pub struct Projector {
    store: Arc<dyn EntityStore>,
}

impl Projector {
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self { store }
    }

    /// Decodes `body` as the payload of `endpoint` and upserts the entities it describes.
    pub async fn apply(
        &self,
        endpoint: &Endpoint,
        body: &[u8],
        cancel: &CancellationToken,
    ) -> Result<Applied, ProjectionError> {
        match endpoint {
            Endpoint::League { league_id } => {
                self.apply_league(endpoint, league_id, body).await?;
                Ok(Applied::single())
            }
            Endpoint::Users { .. } => self.apply_users(endpoint, body, cancel).await,
            Endpoint::Rosters { league_id } => self.apply_rosters(endpoint, league_id, body, cancel).await,
            Endpoint::Matchups { league_id, week } => {
                self.apply_matchups(endpoint, league_id, *week, body, cancel).await
            }
            Endpoint::Transactions { league_id, week } => {
                self.apply_transactions(endpoint, league_id, *week, body, cancel).await
            }
            Endpoint::Players => self.apply_players(endpoint, body, cancel).await,
            Endpoint::State => {
                self.apply_state(endpoint, body).await?;
                Ok(Applied::single())
            }
            Endpoint::DraftPicks { draft_id } => self.apply_draft_picks(endpoint, draft_id, body, cancel).await,
            Endpoint::TradedPicks { league_id } => {
                self.apply_traded_picks(endpoint, league_id, body, cancel).await
            }
        }
    }

    /// Upserts the league and returns what was written.
    ///
    /// A `previous_league_id` is only kept when that league is already stored.
    pub async fn apply_league(
        &self,
        endpoint: &Endpoint,
        league_id: &str,
        body: &[u8],
    ) -> Result<LeagueRecord, ProjectionError> {
        let league: League = decode(endpoint, body)?;
        let mut record = mapping::league(league_id, league);

        if let Some(previous) = record.previous_league_id.take() {
            if self.store.league_exists(&previous).await? {
                record.previous_league_id = Some(previous);
            } else {
                tracing::debug!(league_id, previous_league_id = %previous, "Previous league not stored, dropping link.");
            }
        }

        self.store.upsert_league(&record).await?;
        Ok(record)
    }

    /// Upserts the NFL calendar and returns it; the current week drives the weekly loop.
    pub async fn apply_state(&self, endpoint: &Endpoint, body: &[u8]) -> Result<SeasonRecord, ProjectionError> {
        let state: NflState = decode(endpoint, body)?;
        let record = mapping::season(state).map_err(|e| api_client::ValidationError::new(endpoint, e))?;
        self.store.upsert_season(&record).await?;
        Ok(record)
    }

    async fn apply_users(
        &self,
        endpoint: &Endpoint,
        body: &[u8],
        cancel: &CancellationToken,
    ) -> Result<Applied, ProjectionError> {
        let items: Vec<Value> = decode(endpoint, body)?;
        let mut applied = Applied { items_seen: items.len(), ..Applied::default() };

        for (index, item) in items.into_iter().enumerate() {
            check(cancel)?;
            let label = item_label(&item, "user_id", index);
            let result = match decode_item::<User>(item).and_then(mapping::user) {
                Ok(record) => self.store.upsert_user(&record).await.map_err(|e| e.to_string()),
                Err(e) => Err(e),
            };
            record_item(&mut applied, endpoint, label, result);
        }
        Ok(applied)
    }

    async fn apply_rosters(
        &self,
        endpoint: &Endpoint,
        league_id: &str,
        body: &[u8],
        cancel: &CancellationToken,
    ) -> Result<Applied, ProjectionError> {
        let items: Vec<Value> = decode(endpoint, body)?;
        let mut applied = Applied { items_seen: items.len(), ..Applied::default() };

        for (index, item) in items.into_iter().enumerate() {
            check(cancel)?;
            let label = item_label(&item, "roster_id", index);
            let result = match decode_item::<Roster>(item).and_then(|r| mapping::roster(league_id, r)) {
                Ok(record) => {
                    let owner = record.owner_id.clone();
                    match self.ensure_user(owner.as_deref()).await {
                        Ok(()) => self.store.upsert_roster(&record).await.map_err(|e| e.to_string()),
                        Err(e) => Err(e),
                    }
                }
                Err(e) => Err(e),
            };
            record_item(&mut applied, endpoint, label, result);
        }
        Ok(applied)
    }

    async fn apply_matchups(
        &self,
        endpoint: &Endpoint,
        league_id: &str,
        week: u32,
        body: &[u8],
        cancel: &CancellationToken,
    ) -> Result<Applied, ProjectionError> {
        let items: Vec<Value> = decode(endpoint, body)?;
        let week = week_number(endpoint, week)?;
        let mut applied = Applied { items_seen: items.len(), ..Applied::default() };

        let mut entries = Vec::with_capacity(items.len());
        for (index, item) in items.into_iter().enumerate() {
            let label = item_label(&item, "roster_id", index);
            match decode_item::<Matchup>(item) {
                Ok(entry) => entries.push(entry),
                Err(e) => record_item(&mut applied, endpoint, label, Err(e)),
            }
        }

        let labels: Vec<String> = entries
            .iter()
            .enumerate()
            .map(|(index, e)| e.roster_id.map_or_else(|| format!("#{index}"), |id| id.to_string()))
            .collect();

        for (label, mapped) in labels.into_iter().zip(mapping::matchups(league_id, week, entries)) {
            check(cancel)?;
            let result = match mapped {
                Ok(record) => self.store.upsert_matchup(&record).await.map_err(|e| e.to_string()),
                Err(e) => Err(e),
            };
            record_item(&mut applied, endpoint, label, result);
        }
        Ok(applied)
    }

    async fn apply_transactions(
        &self,
        endpoint: &Endpoint,
        league_id: &str,
        week: u32,
        body: &[u8],
        cancel: &CancellationToken,
    ) -> Result<Applied, ProjectionError> {
        let items: Vec<Value> = decode(endpoint, body)?;
        let week = week_number(endpoint, week)?;
        let mut applied = Applied { items_seen: items.len(), ..Applied::default() };

        for (index, item) in items.into_iter().enumerate() {
            check(cancel)?;
            let label = item_label(&item, "transaction_id", index);
            let result = match decode_item::<Transaction>(item)
                .and_then(|t| mapping::transaction(league_id, week, t))
            {
                Ok(record) => {
                    let creator = record.creator.clone();
                    match self.ensure_user(creator.as_deref()).await {
                        Ok(()) => self.store.upsert_transaction(&record).await.map_err(|e| e.to_string()),
                        Err(e) => Err(e),
                    }
                }
                Err(e) => Err(e),
            };
            record_item(&mut applied, endpoint, label, result);
        }
        Ok(applied)
    }

    /// The catalogue is keyed by player id and written in one bulk upsert.
    async fn apply_players(
        &self,
        endpoint: &Endpoint,
        body: &[u8],
        cancel: &CancellationToken,
    ) -> Result<Applied, ProjectionError> {
        let items: BTreeMap<String, Value> = decode(endpoint, body)?;
        let mut applied = Applied { items_seen: items.len(), ..Applied::default() };

        let mut records = Vec::with_capacity(items.len());
        for (key, item) in items {
            match decode_item::<Player>(item).and_then(|p| mapping::player(&key, p)) {
                Ok(record) => records.push(record),
                Err(e) => record_item(&mut applied, endpoint, key, Err(e)),
            }
        }

        check(cancel)?;
        let written = self.store.upsert_players(&records).await?;
        applied.written = usize::try_from(written).unwrap_or(records.len());
        tracing::info!(players = records.len(), rejected = applied.failures.len(), "Upserted player catalogue.");
        Ok(applied)
    }

    async fn apply_draft_picks(
        &self,
        endpoint: &Endpoint,
        draft_id: &str,
        body: &[u8],
        cancel: &CancellationToken,
    ) -> Result<Applied, ProjectionError> {
        let items: Vec<Value> = decode(endpoint, body)?;
        let mut applied = Applied { items_seen: items.len(), ..Applied::default() };

        for (index, item) in items.into_iter().enumerate() {
            check(cancel)?;
            let label = item_label(&item, "pick_no", index);
            let result = match decode_item::<DraftPick>(item).and_then(|p| mapping::draft_pick(draft_id, p)) {
                Ok(record) => self.store.upsert_draft_pick(&record).await.map_err(|e| e.to_string()),
                Err(e) => Err(e),
            };
            record_item(&mut applied, endpoint, label, result);
        }
        Ok(applied)
    }

    async fn apply_traded_picks(
        &self,
        endpoint: &Endpoint,
        league_id: &str,
        body: &[u8],
        cancel: &CancellationToken,
    ) -> Result<Applied, ProjectionError> {
        let items: Vec<Value> = decode(endpoint, body)?;
        let mut applied = Applied { items_seen: items.len(), ..Applied::default() };

        for (index, item) in items.into_iter().enumerate() {
            check(cancel)?;
            let label = format!("#{index}");
            let result = match decode_item::<TradedPick>(item).and_then(|p| mapping::traded_pick(league_id, p)) {
                Ok(record) => self.store.upsert_traded_pick(&record).await.map_err(|e| e.to_string()),
                Err(e) => Err(e),
            };
            record_item(&mut applied, endpoint, label, result);
        }
        Ok(applied)
    }

    /// Creates a placeholder for a referenced user the league listing did not include.
    async fn ensure_user(&self, user_id: Option<&str>) -> Result<(), String> {
        let Some(user_id) = user_id else {
            return Ok(());
        };
        match self.store.ensure_user(user_id).await {
            Ok(true) => {
                tracing::debug!(user_id, "Created placeholder user.");
                Ok(())
            }
            Ok(false) => Ok(()),
            Err(e) => Err(format!("placeholder user {user_id}: {e}")),
        }
    }
}

fn check(cancel: &CancellationToken) -> Result<(), ProjectionError> {
    if cancel.is_cancelled() {
        return Err(ProjectionError::Cancelled);
    }
    Ok(())
}

fn decode_item<T: serde::de::DeserializeOwned>(item: Value) -> Result<T, String> {
    serde_json::from_value(item).map_err(|e| e.to_string())
}

fn week_number(endpoint: &Endpoint, week: u32) -> Result<i32, ProjectionError> {
    i32::try_from(week)
        .map_err(|_| api_client::ValidationError::new(endpoint, format!("week out of range: {week}")).into())
}

/// A readable handle for an item: its natural id when present, else its position.
fn item_label(item: &Value, id_field: &str, index: usize) -> String {
    match item.get(id_field) {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => format!("#{index}"),
    }
}

fn record_item(applied: &mut Applied, endpoint: &Endpoint, label: String, result: Result<(), String>) {
    match result {
        Ok(()) => applied.written += 1,
        Err(message) => {
            tracing::warn!(endpoint = %endpoint, item = %label, error = %message, "Item failed to apply.");
            applied.failures.push(ItemError::item(endpoint.kind().as_str(), label, message));
        }
    }
}

#[cfg(test)]
mod tests;
