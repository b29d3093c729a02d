//! Idempotent upserts into the normalized `sleeper` schema.

use crate::error::StorageError;
use crate::repository::DbRepository;
use async_trait::async_trait;
use core_types::{
    DraftPickRecord, LeagueRecord, MatchupRecord, PlayerRecord, RosterRecord, SeasonRecord,
    TradedPickRecord, TransactionRecord, UserRecord,
};
use sqlx::{PgConnection, Postgres, QueryBuilder};

/// Players per multi-row insert, well under the Postgres bind parameter limit.
const PLAYER_CHUNK: usize = 1_000;

/// Writes normalized entities keyed by their natural ids.
///
/// Leagues and users overwrite scalars and shallow-merge `metadata`; every
/// other entity is fully overwritten. Roster membership, roster ownership and
/// player status additionally keep history: a change closes the current row
/// and opens a new one, an unchanged re-apply writes nothing.
#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn upsert_league(&self, league: &LeagueRecord) -> Result<(), StorageError>;

    async fn league_exists(&self, league_id: &str) -> Result<bool, StorageError>;

    async fn upsert_user(&self, user: &UserRecord) -> Result<(), StorageError>;

    /// Inserts a placeholder for an unknown user. Returns `true` if one was created.
    async fn ensure_user(&self, user_id: &str) -> Result<bool, StorageError>;

    /// Also ensures every co-owner is a known user before recording ownership.
    async fn upsert_roster(&self, roster: &RosterRecord) -> Result<(), StorageError>;

    /// Writes the whole player catalogue in one transaction. Returns rows written.
    async fn upsert_players(&self, players: &[PlayerRecord]) -> Result<u64, StorageError>;

    async fn upsert_matchup(&self, matchup: &MatchupRecord) -> Result<(), StorageError>;

    async fn upsert_transaction(&self, transaction: &TransactionRecord) -> Result<(), StorageError>;

    async fn upsert_season(&self, season: &SeasonRecord) -> Result<(), StorageError>;

    async fn upsert_draft_pick(&self, pick: &DraftPickRecord) -> Result<(), StorageError>;

    async fn upsert_traded_pick(&self, pick: &TradedPickRecord) -> Result<(), StorageError>;
}

#[async_trait]
impl EntityStore for DbRepository {
    async fn upsert_league(&self, league: &LeagueRecord) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO sleeper.leagues (
                league_id, name, season, status, sport, season_type, total_rosters, draft_id,
                previous_league_id, roster_positions, settings, scoring_settings, metadata
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (league_id) DO UPDATE SET
                name = EXCLUDED.name,
                season = EXCLUDED.season,
                status = EXCLUDED.status,
                sport = EXCLUDED.sport,
                season_type = EXCLUDED.season_type,
                total_rosters = EXCLUDED.total_rosters,
                draft_id = EXCLUDED.draft_id,
                previous_league_id = EXCLUDED.previous_league_id,
                roster_positions = EXCLUDED.roster_positions,
                settings = EXCLUDED.settings,
                scoring_settings = EXCLUDED.scoring_settings,
                metadata = sleeper.leagues.metadata || EXCLUDED.metadata,
                updated_at = NOW()
            "#,
        )
        .bind(&league.league_id)
        .bind(&league.name)
        .bind(&league.season)
        .bind(&league.status)
        .bind(&league.sport)
        .bind(&league.season_type)
        .bind(league.total_rosters)
        .bind(&league.draft_id)
        .bind(&league.previous_league_id)
        .bind(&league.roster_positions)
        .bind(&league.settings)
        .bind(&league.scoring_settings)
        .bind(&league.metadata)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn league_exists(&self, league_id: &str) -> Result<bool, StorageError> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM sleeper.leagues WHERE league_id = $1)")
                .bind(league_id)
                .fetch_one(self.pool())
                .await?;
        Ok(exists)
    }

    async fn upsert_user(&self, user: &UserRecord) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO sleeper.users (user_id, username, display_name, avatar, is_bot, metadata)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (user_id) DO UPDATE SET
                username = EXCLUDED.username,
                display_name = EXCLUDED.display_name,
                avatar = EXCLUDED.avatar,
                is_bot = EXCLUDED.is_bot,
                metadata = sleeper.users.metadata || EXCLUDED.metadata,
                updated_at = NOW()
            "#,
        )
        .bind(&user.user_id)
        .bind(&user.username)
        .bind(&user.display_name)
        .bind(&user.avatar)
        .bind(user.is_bot)
        .bind(&user.metadata)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn ensure_user(&self, user_id: &str) -> Result<bool, StorageError> {
        let placeholder = UserRecord::placeholder(user_id);
        let inserted = sqlx::query(
            r#"
            INSERT INTO sleeper.users (user_id, display_name, metadata)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id) DO NOTHING
            "#,
        )
        .bind(&placeholder.user_id)
        .bind(&placeholder.display_name)
        .bind(&placeholder.metadata)
        .execute(self.pool())
        .await?
        .rows_affected();
        Ok(inserted > 0)
    }

    async fn upsert_roster(&self, roster: &RosterRecord) -> Result<(), StorageError> {
        let mut tx = self.pool().begin().await?;
        sqlx::query(
            r#"
            INSERT INTO sleeper.rosters (
                league_id, roster_id, owner_id, co_owners, players, starters, reserve, taxi,
                wins, losses, ties, points_for, points_against, waiver_position,
                waiver_budget_used, total_moves, settings, metadata
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            ON CONFLICT (league_id, roster_id) DO UPDATE SET
                owner_id = EXCLUDED.owner_id,
                co_owners = EXCLUDED.co_owners,
                players = EXCLUDED.players,
                starters = EXCLUDED.starters,
                reserve = EXCLUDED.reserve,
                taxi = EXCLUDED.taxi,
                wins = EXCLUDED.wins,
                losses = EXCLUDED.losses,
                ties = EXCLUDED.ties,
                points_for = EXCLUDED.points_for,
                points_against = EXCLUDED.points_against,
                waiver_position = EXCLUDED.waiver_position,
                waiver_budget_used = EXCLUDED.waiver_budget_used,
                total_moves = EXCLUDED.total_moves,
                settings = EXCLUDED.settings,
                metadata = EXCLUDED.metadata,
                updated_at = NOW()
            "#,
        )
        .bind(&roster.league_id)
        .bind(roster.roster_id)
        .bind(&roster.owner_id)
        .bind(&roster.co_owners)
        .bind(&roster.players)
        .bind(&roster.starters)
        .bind(&roster.reserve)
        .bind(&roster.taxi)
        .bind(roster.wins)
        .bind(roster.losses)
        .bind(roster.ties)
        .bind(roster.points_for)
        .bind(roster.points_against)
        .bind(roster.waiver_position)
        .bind(roster.waiver_budget_used)
        .bind(roster.total_moves)
        .bind(&roster.settings)
        .bind(&roster.metadata)
        .execute(&mut *tx)
        .await?;

        record_roster_players(&mut *tx, roster).await?;
        record_roster_ownership(&mut *tx, roster).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn upsert_players(&self, players: &[PlayerRecord]) -> Result<u64, StorageError> {
        let mut tx = self.pool().begin().await?;
        let mut written = 0;

        for chunk in players.chunks(PLAYER_CHUNK) {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO sleeper.players (player_id, first_name, last_name, full_name, position, \
                 team, status, age, years_exp, college, injury_status, injury_body_part, injury_notes, \
                 practice_participation, active, fantasy_positions, metadata) ",
            );
            builder.push_values(chunk, |mut row, p| {
                row.push_bind(&p.player_id)
                    .push_bind(&p.first_name)
                    .push_bind(&p.last_name)
                    .push_bind(&p.full_name)
                    .push_bind(&p.position)
                    .push_bind(&p.team)
                    .push_bind(&p.status)
                    .push_bind(p.age)
                    .push_bind(p.years_exp)
                    .push_bind(&p.college)
                    .push_bind(&p.injury_status)
                    .push_bind(&p.injury_body_part)
                    .push_bind(&p.injury_notes)
                    .push_bind(&p.practice_participation)
                    .push_bind(p.active)
                    .push_bind(&p.fantasy_positions)
                    .push_bind(&p.metadata);
            });
            builder.push(
                r#"
                ON CONFLICT (player_id) DO UPDATE SET
                    first_name = EXCLUDED.first_name,
                    last_name = EXCLUDED.last_name,
                    full_name = EXCLUDED.full_name,
                    position = EXCLUDED.position,
                    team = EXCLUDED.team,
                    status = EXCLUDED.status,
                    age = EXCLUDED.age,
                    years_exp = EXCLUDED.years_exp,
                    college = EXCLUDED.college,
                    injury_status = EXCLUDED.injury_status,
                    injury_body_part = EXCLUDED.injury_body_part,
                    injury_notes = EXCLUDED.injury_notes,
                    practice_participation = EXCLUDED.practice_participation,
                    active = EXCLUDED.active,
                    fantasy_positions = EXCLUDED.fantasy_positions,
                    metadata = EXCLUDED.metadata,
                    updated_at = NOW()
                "#,
            );
            written += builder.build().execute(&mut *tx).await?.rows_affected();
            record_player_status(&mut *tx, chunk).await?;
        }

        tx.commit().await?;
        Ok(written)
    }

    async fn upsert_matchup(&self, matchup: &MatchupRecord) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO sleeper.matchups (
                league_id, week, roster_id, matchup_id, points, opponent_roster_id, outcome,
                starters, players_points
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (league_id, week, roster_id) DO UPDATE SET
                matchup_id = EXCLUDED.matchup_id,
                points = EXCLUDED.points,
                opponent_roster_id = EXCLUDED.opponent_roster_id,
                outcome = EXCLUDED.outcome,
                starters = EXCLUDED.starters,
                players_points = EXCLUDED.players_points,
                updated_at = NOW()
            "#,
        )
        .bind(&matchup.league_id)
        .bind(matchup.week)
        .bind(matchup.roster_id)
        .bind(matchup.matchup_id)
        .bind(matchup.points)
        .bind(matchup.opponent_roster_id)
        .bind(matchup.outcome.map(|o| o.as_str()))
        .bind(&matchup.starters)
        .bind(&matchup.players_points)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn upsert_transaction(&self, t: &TransactionRecord) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO sleeper.transactions (
                transaction_id, league_id, week, kind, status, creator, created_at,
                status_updated_at, roster_ids, adds, drops, draft_picks, waiver_budget,
                settings, metadata
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            ON CONFLICT (transaction_id) DO UPDATE SET
                league_id = EXCLUDED.league_id,
                week = EXCLUDED.week,
                kind = EXCLUDED.kind,
                status = EXCLUDED.status,
                creator = EXCLUDED.creator,
                created_at = EXCLUDED.created_at,
                status_updated_at = EXCLUDED.status_updated_at,
                roster_ids = EXCLUDED.roster_ids,
                adds = EXCLUDED.adds,
                drops = EXCLUDED.drops,
                draft_picks = EXCLUDED.draft_picks,
                waiver_budget = EXCLUDED.waiver_budget,
                settings = EXCLUDED.settings,
                metadata = EXCLUDED.metadata,
                updated_at = NOW()
            "#,
        )
        .bind(&t.transaction_id)
        .bind(&t.league_id)
        .bind(t.week)
        .bind(&t.kind)
        .bind(&t.status)
        .bind(&t.creator)
        .bind(t.created_at)
        .bind(t.status_updated_at)
        .bind(&t.roster_ids)
        .bind(&t.adds)
        .bind(&t.drops)
        .bind(&t.draft_picks)
        .bind(&t.waiver_budget)
        .bind(&t.settings)
        .bind(&t.metadata)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn upsert_season(&self, season: &SeasonRecord) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO sleeper.seasons (
                season, season_type, week, display_week, previous_season, season_start_date, league_season
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (season) DO UPDATE SET
                season_type = EXCLUDED.season_type,
                week = EXCLUDED.week,
                display_week = EXCLUDED.display_week,
                previous_season = EXCLUDED.previous_season,
                season_start_date = EXCLUDED.season_start_date,
                league_season = EXCLUDED.league_season,
                updated_at = NOW()
            "#,
        )
        .bind(&season.season)
        .bind(&season.season_type)
        .bind(season.week)
        .bind(season.display_week)
        .bind(&season.previous_season)
        .bind(&season.season_start_date)
        .bind(&season.league_season)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn upsert_draft_pick(&self, pick: &DraftPickRecord) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO sleeper.draft_picks (
                draft_id, pick_no, round, draft_slot, roster_id, player_id, picked_by, is_keeper, metadata
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (draft_id, pick_no) DO UPDATE SET
                round = EXCLUDED.round,
                draft_slot = EXCLUDED.draft_slot,
                roster_id = EXCLUDED.roster_id,
                player_id = EXCLUDED.player_id,
                picked_by = EXCLUDED.picked_by,
                is_keeper = EXCLUDED.is_keeper,
                metadata = EXCLUDED.metadata,
                updated_at = NOW()
            "#,
        )
        .bind(&pick.draft_id)
        .bind(pick.pick_no)
        .bind(pick.round)
        .bind(pick.draft_slot)
        .bind(pick.roster_id)
        .bind(&pick.player_id)
        .bind(&pick.picked_by)
        .bind(pick.is_keeper)
        .bind(&pick.metadata)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn upsert_traded_pick(&self, pick: &TradedPickRecord) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO sleeper.traded_picks (league_id, season, round, roster_id, previous_owner_id, owner_id)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (league_id, season, round, roster_id) DO UPDATE SET
                previous_owner_id = EXCLUDED.previous_owner_id,
                owner_id = EXCLUDED.owner_id,
                updated_at = NOW()
            "#,
        )
        .bind(&pick.league_id)
        .bind(&pick.season)
        .bind(pick.round)
        .bind(pick.roster_id)
        .bind(pick.previous_owner_id)
        .bind(pick.owner_id)
        .execute(self.pool())
        .await?;
        Ok(())
    }
}

/// `(user_id, is_primary)` pairs for a roster: the owner first, then co-owners.
pub(crate) fn owners(roster: &RosterRecord) -> Vec<(String, bool)> {
    let mut owners: Vec<(String, bool)> = Vec::new();
    if let Some(owner) = &roster.owner_id {
        owners.push((owner.clone(), true));
    }
    for co_owner in &roster.co_owners {
        if !owners.iter().any(|(id, _)| id == co_owner) {
            owners.push((co_owner.clone(), false));
        }
    }
    owners
}

async fn record_roster_players(conn: &mut PgConnection, roster: &RosterRecord) -> Result<(), StorageError> {
    sqlx::query(
        r#"
        UPDATE sleeper.roster_players SET valid_to = NOW()
        WHERE league_id = $1 AND roster_id = $2 AND valid_to IS NULL
          AND NOT (player_id = ANY($3::text[]))
        "#,
    )
    .bind(&roster.league_id)
    .bind(roster.roster_id)
    .bind(&roster.players)
    .execute(&mut *conn)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO sleeper.roster_players (league_id, roster_id, player_id)
        SELECT DISTINCT $1, $2, player_id FROM unnest($3::text[]) AS t(player_id)
        ON CONFLICT (league_id, roster_id, player_id) WHERE valid_to IS NULL DO NOTHING
        "#,
    )
    .bind(&roster.league_id)
    .bind(roster.roster_id)
    .bind(&roster.players)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn record_roster_ownership(conn: &mut PgConnection, roster: &RosterRecord) -> Result<(), StorageError> {
    let (user_ids, primary): (Vec<String>, Vec<bool>) = owners(roster).into_iter().unzip();

    for user_id in user_ids.iter().filter(|id| Some(*id) != roster.owner_id.as_ref()) {
        let placeholder = UserRecord::placeholder(user_id.as_str());
        sqlx::query(
            "INSERT INTO sleeper.users (user_id, display_name, metadata) VALUES ($1, $2, $3) \
             ON CONFLICT (user_id) DO NOTHING",
        )
        .bind(&placeholder.user_id)
        .bind(&placeholder.display_name)
        .bind(&placeholder.metadata)
        .execute(&mut *conn)
        .await?;
    }

    sqlx::query(
        r#"
        UPDATE sleeper.roster_ownership SET valid_to = NOW()
        WHERE league_id = $1 AND roster_id = $2 AND valid_to IS NULL
          AND (user_id, is_primary) NOT IN (
              SELECT user_id, is_primary FROM unnest($3::text[], $4::bool[]) AS t(user_id, is_primary)
          )
        "#,
    )
    .bind(&roster.league_id)
    .bind(roster.roster_id)
    .bind(&user_ids)
    .bind(&primary)
    .execute(&mut *conn)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO sleeper.roster_ownership (league_id, roster_id, user_id, is_primary)
        SELECT $1, $2, user_id, is_primary FROM unnest($3::text[], $4::bool[]) AS t(user_id, is_primary)
        ON CONFLICT (league_id, roster_id, user_id) WHERE valid_to IS NULL DO NOTHING
        "#,
    )
    .bind(&roster.league_id)
    .bind(roster.roster_id)
    .bind(&user_ids)
    .bind(&primary)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Closes the current status row of every player whose tracked fields changed
/// and opens a row for each player without a current one.
async fn record_player_status(conn: &mut PgConnection, players: &[PlayerRecord]) -> Result<(), StorageError> {
    let mut ids = Vec::new();
    let mut status = Vec::new();
    let mut injury_status = Vec::new();
    let mut body_part = Vec::new();
    let mut notes = Vec::new();
    let mut practice = Vec::new();
    for (player, tracked) in players.iter().filter_map(|p| p.tracked_status().map(|t| (p, t))) {
        ids.push(player.player_id.clone());
        status.push(tracked.status);
        injury_status.push(tracked.injury_status);
        body_part.push(tracked.injury_body_part);
        notes.push(tracked.injury_notes);
        practice.push(tracked.practice_participation);
    }
    if ids.is_empty() {
        return Ok(());
    }

    sqlx::query(
        r#"
        UPDATE sleeper.player_status_history h SET valid_to = NOW()
        FROM unnest($1::text[], $2::text[], $3::text[], $4::text[], $5::text[], $6::text[])
            AS s(player_id, status, injury_status, injury_body_part, injury_notes, practice_participation)
        WHERE h.player_id = s.player_id AND h.valid_to IS NULL
          AND (h.status, h.injury_status, h.injury_body_part, h.injury_notes, h.practice_participation)
              IS DISTINCT FROM
              (s.status, s.injury_status, s.injury_body_part, s.injury_notes, s.practice_participation)
        "#,
    )
    .bind(&ids)
    .bind(&status)
    .bind(&injury_status)
    .bind(&body_part)
    .bind(&notes)
    .bind(&practice)
    .execute(&mut *conn)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO sleeper.player_status_history (
            player_id, status, injury_status, injury_body_part, injury_notes, practice_participation
        )
        SELECT * FROM unnest($1::text[], $2::text[], $3::text[], $4::text[], $5::text[], $6::text[])
        ON CONFLICT (player_id) WHERE valid_to IS NULL DO NOTHING
        "#,
    )
    .bind(&ids)
    .bind(&status)
    .bind(&injury_status)
    .bind(&body_part)
    .bind(&notes)
    .bind(&practice)
    .execute(&mut *conn)
    .await?;
    Ok(())
}
