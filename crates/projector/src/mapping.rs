//! Pure conversions from lenient payload models to normalized records.

use api_client::{DraftPick, League, Matchup, NflState, Player, Roster, TradedPick, Transaction, User};
use core_types::{
    DraftPickRecord, LeagueRecord, MatchupOutcome, MatchupRecord, PlayerRecord, RosterRecord,
    SeasonRecord, TradedPickRecord, TransactionRecord, UserRecord, from_epoch_millis,
};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;

/// Why a single item could not be mapped.
pub type MapError = String;

fn int(value: Option<i64>, field: &str) -> Result<Option<i32>, MapError> {
    value
        .map(|v| i32::try_from(v).map_err(|_| format!("{field} out of range: {v}")))
        .transpose()
}

fn required_int(value: Option<i64>, field: &str) -> Result<i32, MapError> {
    int(value, field)?.ok_or_else(|| format!("missing {field}"))
}

/// Normalizes a free-form blob to a JSON object.
pub fn object(value: Value) -> Value {
    match value {
        Value::Null => Value::Object(Map::new()),
        Value::Object(_) => value,
        other => json!({ "value": other }),
    }
}

/// Same as [`object`] for list-shaped blobs.
pub fn list(value: Value) -> Value {
    match value {
        Value::Null => Value::Array(Vec::new()),
        other => other,
    }
}

/// `previous_league_id` is resolved by the caller, which knows what is stored.
pub fn league(fallback_id: &str, league: League) -> LeagueRecord {
    let league_id = league.league_id.unwrap_or_else(|| fallback_id.to_string());
    LeagueRecord {
        name: league.name.unwrap_or_else(|| league_id.clone()),
        season: league.season.unwrap_or_default(),
        status: league.status,
        sport: league.sport.unwrap_or_else(|| "nfl".to_string()),
        season_type: league.season_type,
        total_rosters: league.total_rosters.and_then(|n| i32::try_from(n).ok()).unwrap_or(0),
        draft_id: league.draft_id,
        previous_league_id: league.previous_league_id.filter(|prev| *prev != league_id),
        roster_positions: league.roster_positions,
        settings: object(league.settings),
        scoring_settings: object(league.scoring_settings),
        metadata: object(league.metadata),
        league_id,
    }
}

pub fn user(user: User) -> Result<UserRecord, MapError> {
    Ok(UserRecord {
        user_id: user.user_id.ok_or("missing user_id")?,
        username: user.username,
        display_name: user.display_name,
        avatar: user.avatar,
        is_bot: user.is_bot.unwrap_or(false),
        metadata: object(user.metadata),
    })
}

pub fn roster(league_id: &str, roster: Roster) -> Result<RosterRecord, MapError> {
    let settings = &roster.settings;
    Ok(RosterRecord {
        league_id: league_id.to_string(),
        roster_id: required_int(roster.roster_id, "roster_id")?,
        owner_id: roster.owner_id,
        co_owners: roster.co_owners,
        players: roster.players,
        starters: roster.starters,
        reserve: roster.reserve,
        taxi: roster.taxi,
        wins: int(settings.wins, "wins")?.unwrap_or(0),
        losses: int(settings.losses, "losses")?.unwrap_or(0),
        ties: int(settings.ties, "ties")?.unwrap_or(0),
        points_for: settings.points_for(),
        points_against: settings.points_against(),
        waiver_position: int(settings.waiver_position, "waiver_position")?,
        waiver_budget_used: int(settings.waiver_budget_used, "waiver_budget_used")?,
        total_moves: int(settings.total_moves, "total_moves")?,
        settings: Value::Object(settings.extra.clone()),
        metadata: object(roster.metadata),
    })
}

/// Maps one week of matchups, pairing rosters that share a matchup id.
///
/// Rosters without a partner (byes, odd groups) keep no opponent or outcome.
pub fn matchups(league_id: &str, week: i32, entries: Vec<Matchup>) -> Vec<Result<MatchupRecord, MapError>> {
    let mut groups: BTreeMap<i64, Vec<(i64, f64)>> = BTreeMap::new();
    for entry in &entries {
        if let (Some(matchup_id), Some(roster_id)) = (entry.matchup_id, entry.roster_id) {
            groups.entry(matchup_id).or_default().push((roster_id, entry.effective_points()));
        }
    }

    entries
        .into_iter()
        .map(|entry| -> Result<MatchupRecord, MapError> {
            let roster_id = required_int(entry.roster_id, "roster_id")?;
            let points = entry.effective_points();
            let opponent = entry
                .matchup_id
                .and_then(|id| groups.get(&id))
                .filter(|group| group.len() == 2)
                .and_then(|group| group.iter().find(|(id, _)| *id != i64::from(roster_id)).copied());

            let (opponent_roster_id, outcome) = match opponent {
                Some((id, opponent_points)) => (
                    int(Some(id), "opponent roster_id")?,
                    Some(MatchupOutcome::from_points(points, opponent_points)),
                ),
                None => (None, None),
            };

            Ok(MatchupRecord {
                league_id: league_id.to_string(),
                week,
                roster_id,
                matchup_id: int(entry.matchup_id, "matchup_id")?,
                points,
                opponent_roster_id,
                outcome,
                starters: entry.starters,
                players_points: object(entry.players_points),
            })
        })
        .collect()
}

pub fn transaction(league_id: &str, week: i32, t: Transaction) -> Result<TransactionRecord, MapError> {
    Ok(TransactionRecord {
        transaction_id: t.transaction_id.ok_or("missing transaction_id")?,
        league_id: league_id.to_string(),
        week,
        kind: t.kind.unwrap_or_else(|| "unknown".to_string()),
        status: t.status,
        creator: t.creator,
        created_at: t.created.and_then(from_epoch_millis),
        status_updated_at: t.status_updated.and_then(from_epoch_millis),
        roster_ids: t
            .roster_ids
            .into_iter()
            .map(|id| i32::try_from(id).map_err(|_| format!("roster id out of range: {id}")))
            .collect::<Result<_, _>>()?,
        adds: object(t.adds),
        drops: object(t.drops),
        draft_picks: list(t.draft_picks),
        waiver_budget: list(t.waiver_budget),
        settings: object(t.settings),
        metadata: object(t.metadata),
    })
}

pub fn player(key: &str, player: Player) -> Result<PlayerRecord, MapError> {
    Ok(PlayerRecord {
        player_id: player.player_id.unwrap_or_else(|| key.to_string()),
        first_name: player.first_name,
        last_name: player.last_name,
        full_name: player.full_name,
        position: player.position,
        team: player.team,
        status: player.status,
        age: int(player.age, "age")?,
        years_exp: int(player.years_exp, "years_exp")?,
        college: player.college,
        injury_status: player.injury_status,
        injury_body_part: player.injury_body_part,
        injury_notes: player.injury_notes,
        practice_participation: player.practice_participation,
        active: player.active.unwrap_or(false),
        fantasy_positions: player.fantasy_positions,
        metadata: Value::Object(player.extra),
    })
}

pub fn season(state: NflState) -> Result<SeasonRecord, MapError> {
    Ok(SeasonRecord {
        season: state.season.ok_or("missing season")?,
        season_type: state.season_type,
        week: int(state.week, "week")?.unwrap_or(0),
        display_week: int(state.display_week, "display_week")?,
        previous_season: state.previous_season,
        season_start_date: state.season_start_date,
        league_season: state.league_season,
    })
}

pub fn draft_pick(draft_id: &str, pick: DraftPick) -> Result<DraftPickRecord, MapError> {
    Ok(DraftPickRecord {
        draft_id: pick.draft_id.unwrap_or_else(|| draft_id.to_string()),
        pick_no: required_int(pick.pick_no, "pick_no")?,
        round: required_int(pick.round, "round")?,
        draft_slot: int(pick.draft_slot, "draft_slot")?,
        roster_id: int(pick.roster_id, "roster_id")?,
        player_id: pick.player_id,
        picked_by: pick.picked_by,
        is_keeper: pick.is_keeper.unwrap_or(false),
        metadata: object(pick.metadata),
    })
}

pub fn traded_pick(league_id: &str, pick: TradedPick) -> Result<TradedPickRecord, MapError> {
    Ok(TradedPickRecord {
        league_id: league_id.to_string(),
        season: pick.season.ok_or("missing season")?,
        round: required_int(pick.round, "round")?,
        roster_id: required_int(pick.roster_id, "roster_id")?,
        previous_owner_id: int(pick.previous_owner_id, "previous_owner_id")?,
        owner_id: int(pick.owner_id, "owner_id")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(roster_id: i64, matchup_id: Option<i64>, points: f64) -> Matchup {
        Matchup {
            roster_id: Some(roster_id),
            matchup_id,
            points: Some(points),
            ..Matchup::default()
        }
    }

    #[test]
    fn matchups_are_paired_by_matchup_id() {
        let records: Vec<MatchupRecord> = matchups(
            "L1",
            2,
            vec![
                entry(1, Some(1), 120.5),
                entry(2, Some(2), 99.0),
                entry(3, Some(1), 101.0),
                entry(4, Some(2), 99.0),
                entry(5, None, 80.0),
            ],
        )
        .into_iter()
        .map(Result::unwrap)
        .collect();

        assert_eq!(records[0].opponent_roster_id, Some(3));
        assert_eq!(records[0].outcome, Some(MatchupOutcome::Win));
        assert_eq!(records[2].outcome, Some(MatchupOutcome::Loss));
        assert_eq!(records[1].outcome, Some(MatchupOutcome::Tie));
        assert_eq!(records[4].opponent_roster_id, None);
        assert_eq!(records[4].outcome, None);
    }

    #[test]
    fn a_league_cannot_be_its_own_predecessor() {
        let record = league(
            "L1",
            League { previous_league_id: Some("L1".into()), ..League::default() },
        );
        assert_eq!(record.league_id, "L1");
        assert_eq!(record.name, "L1");
        assert!(record.previous_league_id.is_none());
        assert_eq!(record.metadata, json!({}));
    }

    #[test]
    fn items_without_natural_ids_are_rejected() {
        assert!(user(User::default()).is_err());
        assert!(roster("L1", Roster::default()).is_err());
        assert!(transaction("L1", 1, Transaction::default()).is_err());
        assert!(traded_pick("L1", TradedPick { season: Some("2025".into()), ..TradedPick::default() }).is_err());
    }

    #[test]
    fn transaction_timestamps_are_epoch_millis() {
        let record = transaction(
            "L1",
            3,
            Transaction {
                transaction_id: Some("T1".into()),
                created: Some(1_725_000_000_000),
                roster_ids: vec![1, 4],
                ..Transaction::default()
            },
        )
        .unwrap();
        assert_eq!(record.created_at.unwrap().timestamp(), 1_725_000_000);
        assert_eq!(record.roster_ids, vec![1, 4]);
        assert_eq!(record.kind, "unknown");
        assert_eq!(record.draft_picks, json!([]));
    }
}
