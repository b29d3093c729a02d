use super::*;
use database::test_support::MemoryStore;
use serde_json::json;

fn setup() -> (Arc<MemoryStore>, Projector) {
    let store = Arc::new(MemoryStore::new());
    let projector = Projector::new(store.clone());
    (store, projector)
}

fn bytes(value: Value) -> Vec<u8> {
    serde_json::to_vec(&value).unwrap()
}

async fn seed_league(projector: &Projector, league_id: &str) {
    let endpoint = Endpoint::League { league_id: league_id.to_string() };
    let body = bytes(json!({ "league_id": league_id, "name": "Dynasty", "season": "2024" }));
    projector.apply(&endpoint, &body, &CancellationToken::new()).await.unwrap();
}

fn rosters(count: i64) -> Value {
    Value::Array(
        (1..=count)
            .map(|id| json!({ "roster_id": id, "owner_id": format!("u{id}"), "players": ["4034"] }))
            .collect(),
    )
}

#[tokio::test]
async fn one_bad_roster_does_not_stop_the_others() {
    let (store, projector) = setup();
    seed_league(&projector, "L1").await;
    store.fail_on("roster:L1:3");

    let endpoint = Endpoint::Rosters { league_id: "L1".into() };
    let applied = projector
        .apply(&endpoint, &bytes(rosters(10)), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(applied.items_seen, 10);
    assert_eq!(applied.written, 9);
    assert_eq!(applied.failures.len(), 1);
    assert_eq!(applied.failures.errors()[0].item.as_deref(), Some("3"));
    assert_eq!(store.rosters("L1").len(), 9);
}

#[tokio::test]
async fn unknown_roster_owners_get_placeholder_users() {
    let (store, projector) = setup();
    seed_league(&projector, "L1").await;

    let endpoint = Endpoint::Rosters { league_id: "L1".into() };
    projector
        .apply(&endpoint, &bytes(rosters(2)), &CancellationToken::new())
        .await
        .unwrap();

    let placeholder = store.user("u2").unwrap();
    assert_eq!(placeholder.display_name.as_deref(), Some("User u2"));

    let users = Endpoint::Users { league_id: "L1".into() };
    let body = bytes(json!([{ "user_id": "u2", "display_name": "Sam", "metadata": { "team_name": "Sams" } }]));
    projector.apply(&users, &body, &CancellationToken::new()).await.unwrap();
    assert_eq!(store.user("u2").unwrap().display_name.as_deref(), Some("Sam"));
}

#[tokio::test]
async fn previous_league_is_kept_only_when_stored() {
    let (store, projector) = setup();
    let endpoint = Endpoint::League { league_id: "L2".into() };
    let body = bytes(json!({ "league_id": "L2", "previous_league_id": "L1" }));

    projector.apply(&endpoint, &body, &CancellationToken::new()).await.unwrap();
    assert!(store.league("L2").unwrap().previous_league_id.is_none());

    seed_league(&projector, "L1").await;
    projector.apply(&endpoint, &body, &CancellationToken::new()).await.unwrap();
    assert_eq!(store.league("L2").unwrap().previous_league_id.as_deref(), Some("L1"));
}

#[tokio::test]
async fn matchups_need_their_rosters() {
    let (store, projector) = setup();
    seed_league(&projector, "L1").await;
    let roster_endpoint = Endpoint::Rosters { league_id: "L1".into() };
    projector
        .apply(&roster_endpoint, &bytes(rosters(2)), &CancellationToken::new())
        .await
        .unwrap();

    let endpoint = Endpoint::Matchups { league_id: "L1".into(), week: 2 };
    let body = bytes(json!([
        { "roster_id": 1, "matchup_id": 1, "points": 110.2 },
        { "roster_id": 2, "matchup_id": 1, "points": 98.4 },
        { "roster_id": 7, "matchup_id": 4, "points": 50.0 },
        { "roster_id": { "nested": true } }
    ]));
    let applied = projector.apply(&endpoint, &body, &CancellationToken::new()).await.unwrap();

    assert_eq!(applied.written, 2);
    assert_eq!(applied.failures.len(), 2);
    let stored = store.matchups("L1", 2);
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[0].opponent_roster_id, Some(2));
}

#[tokio::test]
async fn transactions_create_their_creators() {
    let (store, projector) = setup();
    seed_league(&projector, "L1").await;

    let endpoint = Endpoint::Transactions { league_id: "L1".into(), week: 1 };
    let body = bytes(json!([
        { "transaction_id": "T1", "type": "waiver", "creator": "u9", "created": 1725000000000i64 },
        { "type": "trade" }
    ]));
    let applied = projector.apply(&endpoint, &body, &CancellationToken::new()).await.unwrap();

    assert_eq!(applied.written, 1);
    assert_eq!(applied.failures.len(), 1);
    assert!(store.user("u9").is_some());
    assert_eq!(store.transactions("L1")[0].kind, "waiver");
}

#[tokio::test]
async fn players_are_written_in_bulk_and_bad_entries_reported() {
    let (store, projector) = setup();
    let body = bytes(json!({
        "4034": { "player_id": "4034", "full_name": "Christian McCaffrey", "age": "28", "position": "RB" },
        "6794": { "first_name": "Justin", "years_exp": 4.0 },
        "9999": { "age": { "years": 30 } }
    }));
    let applied = projector
        .apply(&Endpoint::Players, &body, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(applied.items_seen, 3);
    assert_eq!(applied.written, 2);
    assert_eq!(applied.failures.errors()[0].item.as_deref(), Some("9999"));
    let players = store.players();
    assert_eq!(players[0].age, Some(28));
    assert_eq!(players[1].player_id, "6794");
}

#[tokio::test]
async fn roster_moves_and_injuries_are_kept_as_history() {
    let (store, projector) = setup();
    seed_league(&projector, "L1").await;
    let endpoint = Endpoint::Rosters { league_id: "L1".into() };
    let cancel = CancellationToken::new();

    let before = json!([{
        "roster_id": 1, "owner_id": "u1", "players": ["4034", "6794"],
        "settings": { "wins": 3, "waiver_position": 7, "waiver_budget_used": "12", "total_moves": 5 }
    }]);
    let after = json!([{ "roster_id": 1, "owner_id": "u1", "players": ["6794", "8146"] }]);
    projector.apply(&endpoint, &bytes(before), &cancel).await.unwrap();
    projector.apply(&endpoint, &bytes(after.clone()), &cancel).await.unwrap();
    projector.apply(&endpoint, &bytes(after), &cancel).await.unwrap();

    let history = store.roster_player_history("L1", 1);
    assert_eq!(history.len(), 3);
    let closed: Vec<&str> = history.iter().filter(|s| s.valid_to.is_some()).map(|s| s.value.as_str()).collect();
    assert_eq!(closed, vec!["4034"]);

    let injured = json!({
        "4034": { "status": "Active", "injury_status": "Questionable", "injury_body_part": "Ankle", "practice_participation": "Limited" }
    });
    projector.apply(&Endpoint::Players, &bytes(injured), &cancel).await.unwrap();
    let status = store.player_status_history("4034");
    assert_eq!(status.len(), 1);
    assert_eq!(status[0].value.injury_body_part.as_deref(), Some("Ankle"));
    assert_eq!(status[0].value.practice_participation.as_deref(), Some("Limited"));
}

#[tokio::test]
async fn roster_stats_come_from_settings() {
    let (store, projector) = setup();
    seed_league(&projector, "L1").await;
    let body = json!([{
        "roster_id": 1, "owner_id": "u1",
        "settings": { "waiver_position": 7, "waiver_budget_used": "12", "total_moves": 5, "division": 2 }
    }]);
    let endpoint = Endpoint::Rosters { league_id: "L1".into() };
    projector.apply(&endpoint, &bytes(body), &CancellationToken::new()).await.unwrap();

    let roster = &store.rosters("L1")[0];
    assert_eq!((roster.waiver_position, roster.waiver_budget_used, roster.total_moves), (Some(7), Some(12), Some(5)));
    assert_eq!(roster.settings, json!({ "division": 2 }));
}

#[tokio::test]
async fn state_returns_the_current_week() {
    let (store, projector) = setup();
    let body = bytes(json!({ "week": 2, "season": "2024", "season_type": "regular" }));
    let season = projector.apply_state(&Endpoint::State, &body).await.unwrap();

    assert_eq!(season.week, 2);
    assert!(store.season("2024").is_some());
}

#[tokio::test]
async fn malformed_collections_fail_as_a_whole() {
    let (_store, projector) = setup();
    let endpoint = Endpoint::Users { league_id: "L1".into() };
    let err = projector
        .apply(&endpoint, br#"{"not":"a list"}"#, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ProjectionError::Validation(_)));
}

#[tokio::test]
async fn cancellation_stops_between_items() {
    let (store, projector) = setup();
    seed_league(&projector, "L1").await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let endpoint = Endpoint::Rosters { league_id: "L1".into() };
    let err = projector.apply(&endpoint, &bytes(rosters(3)), &cancel).await.unwrap_err();
    assert!(matches!(err, ProjectionError::Cancelled));
    assert!(store.rosters("L1").is_empty());
}
