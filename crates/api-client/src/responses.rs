//! Lenient models of the Sleeper API payloads.
//!
//! Every field is optional or defaulted so that new, missing or retyped
//! fields upstream do not fail a whole payload.

use crate::lenient::{int_list, opt_bool, opt_f64, opt_i64, opt_string, string_list};
use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct League {
    #[serde(deserialize_with = "opt_string")]
    pub league_id: Option<String>,
    #[serde(deserialize_with = "opt_string")]
    pub name: Option<String>,
    #[serde(deserialize_with = "opt_string")]
    pub season: Option<String>,
    #[serde(deserialize_with = "opt_string")]
    pub status: Option<String>,
    #[serde(deserialize_with = "opt_string")]
    pub sport: Option<String>,
    #[serde(deserialize_with = "opt_string")]
    pub season_type: Option<String>,
    #[serde(deserialize_with = "opt_i64")]
    pub total_rosters: Option<i64>,
    #[serde(deserialize_with = "opt_string")]
    pub draft_id: Option<String>,
    #[serde(deserialize_with = "opt_string")]
    pub previous_league_id: Option<String>,
    #[serde(deserialize_with = "string_list")]
    pub roster_positions: Vec<String>,
    pub settings: Value,
    pub scoring_settings: Value,
    pub metadata: Value,
    /// Fields this model does not name (chat ids, bracket ids, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct User {
    #[serde(deserialize_with = "opt_string")]
    pub user_id: Option<String>,
    #[serde(deserialize_with = "opt_string")]
    pub username: Option<String>,
    #[serde(deserialize_with = "opt_string")]
    pub display_name: Option<String>,
    #[serde(deserialize_with = "opt_string")]
    pub avatar: Option<String>,
    #[serde(deserialize_with = "opt_bool")]
    pub is_bot: Option<bool>,
    pub metadata: Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Roster {
    #[serde(deserialize_with = "opt_i64")]
    pub roster_id: Option<i64>,
    #[serde(deserialize_with = "opt_string")]
    pub owner_id: Option<String>,
    #[serde(deserialize_with = "opt_string")]
    pub league_id: Option<String>,
    #[serde(deserialize_with = "string_list")]
    pub players: Vec<String>,
    #[serde(deserialize_with = "string_list")]
    pub starters: Vec<String>,
    #[serde(deserialize_with = "string_list")]
    pub reserve: Vec<String>,
    #[serde(deserialize_with = "string_list")]
    pub taxi: Vec<String>,
    #[serde(deserialize_with = "string_list")]
    pub co_owners: Vec<String>,
    #[serde(deserialize_with = "string_list")]
    pub keepers: Vec<String>,
    pub settings: RosterSettings,
    pub metadata: Value,
}

/// Record and scoring totals. Points are split into an integer part and a
/// hundredths part upstream.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RosterSettings {
    #[serde(deserialize_with = "opt_i64")]
    pub wins: Option<i64>,
    #[serde(deserialize_with = "opt_i64")]
    pub losses: Option<i64>,
    #[serde(deserialize_with = "opt_i64")]
    pub ties: Option<i64>,
    #[serde(deserialize_with = "opt_f64")]
    pub fpts: Option<f64>,
    #[serde(deserialize_with = "opt_f64")]
    pub fpts_decimal: Option<f64>,
    #[serde(deserialize_with = "opt_f64")]
    pub fpts_against: Option<f64>,
    #[serde(deserialize_with = "opt_f64")]
    pub fpts_against_decimal: Option<f64>,
    #[serde(deserialize_with = "opt_i64")]
    pub waiver_position: Option<i64>,
    #[serde(deserialize_with = "opt_i64")]
    pub waiver_budget_used: Option<i64>,
    #[serde(deserialize_with = "opt_i64")]
    pub total_moves: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RosterSettings {
    pub fn points_for(&self) -> f64 {
        self.fpts.unwrap_or(0.0) + self.fpts_decimal.unwrap_or(0.0) / 100.0
    }

    pub fn points_against(&self) -> f64 {
        self.fpts_against.unwrap_or(0.0) + self.fpts_against_decimal.unwrap_or(0.0) / 100.0
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Matchup {
    #[serde(deserialize_with = "opt_i64")]
    pub roster_id: Option<i64>,
    /// Rosters sharing a matchup id play each other; `None` during byes.
    #[serde(deserialize_with = "opt_i64")]
    pub matchup_id: Option<i64>,
    #[serde(deserialize_with = "opt_f64")]
    pub points: Option<f64>,
    #[serde(deserialize_with = "opt_f64")]
    pub custom_points: Option<f64>,
    #[serde(deserialize_with = "string_list")]
    pub starters: Vec<String>,
    #[serde(deserialize_with = "string_list")]
    pub players: Vec<String>,
    pub players_points: Value,
}

impl Matchup {
    /// Commissioner overrides win over computed points.
    pub fn effective_points(&self) -> f64 {
        self.custom_points.or(self.points).unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Transaction {
    #[serde(deserialize_with = "opt_string")]
    pub transaction_id: Option<String>,
    #[serde(rename = "type", deserialize_with = "opt_string")]
    pub kind: Option<String>,
    #[serde(deserialize_with = "opt_string")]
    pub status: Option<String>,
    #[serde(deserialize_with = "opt_i64")]
    pub status_updated: Option<i64>,
    #[serde(deserialize_with = "opt_i64")]
    pub created: Option<i64>,
    #[serde(deserialize_with = "opt_string")]
    pub creator: Option<String>,
    #[serde(deserialize_with = "opt_i64")]
    pub leg: Option<i64>,
    #[serde(deserialize_with = "int_list")]
    pub roster_ids: Vec<i64>,
    pub adds: Value,
    pub drops: Value,
    pub draft_picks: Value,
    pub waiver_budget: Value,
    pub settings: Value,
    pub metadata: Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Player {
    #[serde(deserialize_with = "opt_string")]
    pub player_id: Option<String>,
    #[serde(deserialize_with = "opt_string")]
    pub first_name: Option<String>,
    #[serde(deserialize_with = "opt_string")]
    pub last_name: Option<String>,
    #[serde(deserialize_with = "opt_string")]
    pub full_name: Option<String>,
    #[serde(deserialize_with = "opt_string")]
    pub position: Option<String>,
    #[serde(deserialize_with = "opt_string")]
    pub team: Option<String>,
    #[serde(deserialize_with = "opt_string")]
    pub status: Option<String>,
    #[serde(deserialize_with = "opt_i64")]
    pub age: Option<i64>,
    #[serde(deserialize_with = "opt_i64")]
    pub years_exp: Option<i64>,
    #[serde(deserialize_with = "opt_string")]
    pub college: Option<String>,
    #[serde(deserialize_with = "opt_string")]
    pub injury_status: Option<String>,
    #[serde(deserialize_with = "opt_string")]
    pub injury_body_part: Option<String>,
    #[serde(deserialize_with = "opt_string")]
    pub injury_notes: Option<String>,
    #[serde(deserialize_with = "opt_string")]
    pub practice_participation: Option<String>,
    #[serde(deserialize_with = "opt_bool")]
    pub active: Option<bool>,
    #[serde(deserialize_with = "string_list")]
    pub fantasy_positions: Vec<String>,
    /// Everything else (ids on other platforms, depth chart, news ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NflState {
    #[serde(deserialize_with = "opt_i64")]
    pub week: Option<i64>,
    #[serde(deserialize_with = "opt_i64")]
    pub display_week: Option<i64>,
    #[serde(deserialize_with = "opt_string")]
    pub season: Option<String>,
    #[serde(deserialize_with = "opt_string")]
    pub season_type: Option<String>,
    #[serde(deserialize_with = "opt_string")]
    pub previous_season: Option<String>,
    #[serde(deserialize_with = "opt_string")]
    pub season_start_date: Option<String>,
    #[serde(deserialize_with = "opt_string")]
    pub league_season: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DraftPick {
    #[serde(deserialize_with = "opt_string")]
    pub draft_id: Option<String>,
    #[serde(deserialize_with = "opt_i64")]
    pub pick_no: Option<i64>,
    #[serde(deserialize_with = "opt_i64")]
    pub round: Option<i64>,
    #[serde(deserialize_with = "opt_i64")]
    pub draft_slot: Option<i64>,
    #[serde(deserialize_with = "opt_i64")]
    pub roster_id: Option<i64>,
    #[serde(deserialize_with = "opt_string")]
    pub player_id: Option<String>,
    #[serde(deserialize_with = "opt_string")]
    pub picked_by: Option<String>,
    #[serde(deserialize_with = "opt_bool")]
    pub is_keeper: Option<bool>,
    pub metadata: Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TradedPick {
    #[serde(deserialize_with = "opt_string")]
    pub season: Option<String>,
    #[serde(deserialize_with = "opt_i64")]
    pub round: Option<i64>,
    #[serde(deserialize_with = "opt_i64")]
    pub roster_id: Option<i64>,
    #[serde(deserialize_with = "opt_i64")]
    pub previous_owner_id: Option<i64>,
    #[serde(deserialize_with = "opt_i64")]
    pub owner_id: Option<i64>,
}
