//! Normalized records written to the queryable store.
//!
//! Every record is keyed by its natural external id (or a composite of
//! league/week ids where the upstream API has no single id). Writers upsert
//! these, so applying the same record twice leaves the store unchanged.

use crate::enums::MatchupOutcome;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeagueRecord {
    pub league_id: String,
    pub name: String,
    pub season: String,
    pub status: Option<String>,
    pub sport: String,
    pub season_type: Option<String>,
    pub total_rosters: i32,
    pub draft_id: Option<String>,
    /// Only set when the referenced league is already stored.
    pub previous_league_id: Option<String>,
    pub roster_positions: Vec<String>,
    pub settings: Value,
    pub scoring_settings: Value,
    pub metadata: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub user_id: String,
    pub username: Option<String>,
    pub display_name: Option<String>,
    pub avatar: Option<String>,
    pub is_bot: bool,
    pub metadata: Value,
}

impl UserRecord {
    /// A minimal row for a user referenced by a roster or transaction but not
    /// (yet) returned by the league's user listing.
    pub fn placeholder(user_id: impl Into<String>) -> Self {
        let user_id = user_id.into();
        Self {
            display_name: Some(format!("User {user_id}")),
            user_id,
            username: None,
            avatar: None,
            is_bot: false,
            metadata: Value::Object(Default::default()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RosterRecord {
    pub league_id: String,
    pub roster_id: i32,
    pub owner_id: Option<String>,
    pub co_owners: Vec<String>,
    pub players: Vec<String>,
    pub starters: Vec<String>,
    pub reserve: Vec<String>,
    pub taxi: Vec<String>,
    pub wins: i32,
    pub losses: i32,
    pub ties: i32,
    pub points_for: f64,
    pub points_against: f64,
    pub waiver_position: Option<i32>,
    pub waiver_budget_used: Option<i32>,
    pub total_moves: Option<i32>,
    pub settings: Value,
    pub metadata: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerRecord {
    pub player_id: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub full_name: Option<String>,
    pub position: Option<String>,
    pub team: Option<String>,
    pub status: Option<String>,
    pub age: Option<i32>,
    pub years_exp: Option<i32>,
    pub college: Option<String>,
    pub injury_status: Option<String>,
    pub injury_body_part: Option<String>,
    pub injury_notes: Option<String>,
    pub practice_participation: Option<String>,
    pub active: bool,
    pub fantasy_positions: Vec<String>,
    pub metadata: Value,
}

/// The availability fields whose changes are kept as history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerStatus {
    pub status: Option<String>,
    pub injury_status: Option<String>,
    pub injury_body_part: Option<String>,
    pub injury_notes: Option<String>,
    pub practice_participation: Option<String>,
}

impl PlayerRecord {
    /// `None` when the player carries neither a status nor an injury status.
    pub fn tracked_status(&self) -> Option<PlayerStatus> {
        if self.status.is_none() && self.injury_status.is_none() {
            return None;
        }
        Some(PlayerStatus {
            status: self.status.clone(),
            injury_status: self.injury_status.clone(),
            injury_body_part: self.injury_body_part.clone(),
            injury_notes: self.injury_notes.clone(),
            practice_participation: self.practice_participation.clone(),
        })
    }
}

/// One roster's side of a weekly matchup. Keyed by `(league_id, week, roster_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchupRecord {
    pub league_id: String,
    pub week: i32,
    pub roster_id: i32,
    pub matchup_id: Option<i32>,
    pub points: f64,
    pub opponent_roster_id: Option<i32>,
    pub outcome: Option<MatchupOutcome>,
    pub starters: Vec<String>,
    pub players_points: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub transaction_id: String,
    pub league_id: String,
    pub week: i32,
    pub kind: String,
    pub status: Option<String>,
    pub creator: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub status_updated_at: Option<DateTime<Utc>>,
    pub roster_ids: Vec<i32>,
    pub adds: Value,
    pub drops: Value,
    pub draft_picks: Value,
    pub waiver_budget: Value,
    pub settings: Value,
    pub metadata: Value,
}

/// The NFL calendar as reported by the state endpoint. Keyed by `season`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeasonRecord {
    pub season: String,
    pub season_type: Option<String>,
    pub week: i32,
    pub display_week: Option<i32>,
    pub previous_season: Option<String>,
    pub season_start_date: Option<String>,
    pub league_season: Option<String>,
}

/// A pick made in a draft. Keyed by `(draft_id, pick_no)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftPickRecord {
    pub draft_id: String,
    pub pick_no: i32,
    pub round: i32,
    pub draft_slot: Option<i32>,
    pub roster_id: Option<i32>,
    pub player_id: Option<String>,
    pub picked_by: Option<String>,
    pub is_keeper: bool,
    pub metadata: Value,
}

/// A future pick that changed hands. Keyed by `(league_id, season, round, roster_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradedPickRecord {
    pub league_id: String,
    pub season: String,
    pub round: i32,
    pub roster_id: i32,
    pub previous_owner_id: Option<i32>,
    pub owner_id: Option<i32>,
}

/// Converts the upstream millisecond epoch timestamps.
pub fn from_epoch_millis(millis: i64) -> Option<DateTime<Utc>> {
    if millis <= 0 {
        return None;
    }
    DateTime::from_timestamp_millis(millis)
}
