//! End-to-end sync runs against a local fixture provider and an on-disk
//! database, exercising the fetch -> normalize -> reconcile pipeline the
//! way the binary drives it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{RawQuery, State};
use axum::{routing::get, Json, Router};
use chrono::NaiveDate;
use serde_json::{json, Value};

use bestbet_sync::{
    cancel_channel, ApiClient, Coordinator, Reconciler, RetryPolicy, RunOptions, SportId,
    SyncError, SyncStore,
};

struct Fixture {
    responses: HashMap<&'static str, Value>,
    /// (path, raw query string) per request, in order.
    queries: Vec<(String, String)>,
}

type Shared = Arc<Mutex<Fixture>>;

const MLB_PATHS: &[&str] = &[
    "/getMLBTeams",
    "/getMLBPlayerList",
    "/getMLBScoresOnly",
    "/getMLBGamesForPlayer",
];

fn empty_envelope() -> Value {
    json!({"statusCode": 200, "body": null})
}

async fn handler(path: &'static str, state: Shared, query: Option<String>) -> Json<Value> {
    let mut fx = state.lock().unwrap();
    fx.queries.push((path.to_string(), query.unwrap_or_default()));
    Json(fx.responses.get(path).cloned().unwrap_or_else(empty_envelope))
}

async fn spawn_provider(fixture: Shared) -> String {
    let mut app = Router::new();
    for path in MLB_PATHS {
        app = app.route(
            path,
            get(move |State(state): State<Shared>, RawQuery(q): RawQuery| {
                handler(path, state, q)
            }),
        );
    }
    let app = app.with_state(fixture);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn game(id: &str, home_score: i64) -> Value {
    json!({
        "gameID": id,
        "gameDate": "20250824",
        "home": "BOS",
        "away": "NYM",
        "homeR": home_score,
        "awayR": 3,
        "gameStatus": "Completed",
    })
}

fn scores_envelope(games: &[Value]) -> Value {
    let body: serde_json::Map<String, Value> = games
        .iter()
        .map(|g| (g["gameID"].as_str().unwrap().to_string(), g.clone()))
        .collect();
    json!({"statusCode": 200, "body": body})
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_rate_limit_retries: 1,
        max_transient_retries: 1,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(2),
    }
}

/// Fresh client + store + coordinator, the way each binary invocation
/// builds them.
fn coordinator(base: &str, db_path: &str) -> (Coordinator, SyncStore) {
    let store = SyncStore::open(db_path).unwrap();
    let client = ApiClient::new(base, "test-host", "test-key", fast_retry()).unwrap();
    let (_tx, rx) = cancel_channel();
    (
        Coordinator::new(client, Reconciler::new(store.clone(), false), rx),
        store,
    )
}

#[tokio::test]
async fn changed_games_update_and_new_games_insert() {
    let fixture: Shared = Arc::new(Mutex::new(Fixture {
        responses: HashMap::from([(
            "/getMLBScoresOnly",
            scores_envelope(&[game("20250823_NYM@BOS", 5)]),
        )]),
        queries: Vec::new(),
    }));
    let base = spawn_provider(Arc::clone(&fixture)).await;

    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("stats.db");
    let db_path = db_path.to_str().unwrap();

    let (coord, _store) = coordinator(&base, db_path);
    let first = coord.run(SportId::Mlb, &RunOptions::default()).await.unwrap();
    assert_eq!(first.inserted, 1);

    // Next provider snapshot: the known game's score changed and two new
    // games appeared.
    fixture.lock().unwrap().responses.insert(
        "/getMLBScoresOnly",
        scores_envelope(&[
            game("20250823_NYM@BOS", 7),
            game("20250824_NYM@BOS", 2),
            game("20250824_LAD@SF", 4),
        ]),
    );

    // New process, same database file.
    let (coord, store) = coordinator(&base, db_path);
    let second = coord.run(SportId::Mlb, &RunOptions::default()).await.unwrap();
    assert_eq!(second.fetched, 3);
    assert_eq!(second.inserted, 2);
    assert_eq!(second.updated, 1);
    assert_eq!(second.unchanged, 0);
    assert_eq!(second.failed, 0);
    assert_eq!(store.count_rows("mlb_games").unwrap(), 3);

    // Same snapshot again: a full no-op.
    let (coord, store) = coordinator(&base, db_path);
    let third = coord.run(SportId::Mlb, &RunOptions::default()).await.unwrap();
    assert_eq!(third.inserted + third.updated, 0);
    assert_eq!(third.unchanged, 3);
    assert_eq!(store.count_rows("mlb_games").unwrap(), 3);
}

#[tokio::test]
async fn since_cursor_reaches_only_date_filtered_feeds() {
    let fixture: Shared = Arc::new(Mutex::new(Fixture {
        responses: HashMap::new(),
        queries: Vec::new(),
    }));
    let base = spawn_provider(Arc::clone(&fixture)).await;

    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("stats.db");
    let (coord, _store) = coordinator(&base, db_path.to_str().unwrap());

    let opts = RunOptions {
        since: NaiveDate::from_ymd_opt(2025, 8, 1),
        ..RunOptions::default()
    };
    coord.run(SportId::Mlb, &opts).await.unwrap();

    let queries = fixture.lock().unwrap().queries.clone();
    let scores_query = queries
        .iter()
        .find(|(p, _)| p == "/getMLBScoresOnly")
        .map(|(_, q)| q.clone())
        .unwrap();
    assert!(scores_query.contains("gameDate=20250801"), "{}", scores_query);

    let teams_query = queries
        .iter()
        .find(|(p, _)| p == "/getMLBTeams")
        .map(|(_, q)| q.clone())
        .unwrap();
    assert!(!teams_query.contains("gameDate"), "{}", teams_query);
}

#[tokio::test]
async fn dry_run_reports_but_never_writes() {
    let fixture: Shared = Arc::new(Mutex::new(Fixture {
        responses: HashMap::from([(
            "/getMLBScoresOnly",
            scores_envelope(&[game("20250824_NYM@BOS", 5)]),
        )]),
        queries: Vec::new(),
    }));
    let base = spawn_provider(Arc::clone(&fixture)).await;

    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("stats.db");
    let db_path = db_path.to_str().unwrap();

    let store = SyncStore::open(db_path).unwrap();
    let client = ApiClient::new(&base, "test-host", "test-key", fast_retry()).unwrap();
    let (_tx, rx) = cancel_channel();
    let coord = Coordinator::new(client, Reconciler::new(store.clone(), true), rx);

    let opts = RunOptions {
        dry_run: true,
        ..RunOptions::default()
    };
    let outcome = coord.run(SportId::Mlb, &opts).await.unwrap();
    assert!(outcome.dry_run);
    assert_eq!(outcome.inserted, 1);
    assert_eq!(store.count_rows("mlb_games").unwrap(), 0);
}

#[test]
fn unknown_sport_fails_before_any_network_use() {
    // Sport resolution happens before a client or coordinator exists, so a
    // bad identifier can never produce a request.
    let err = SportId::parse("nhl").unwrap_err();
    assert!(matches!(err, SyncError::UnknownSport(ref s) if s == "nhl"));
    assert!(bestbet_sync::registry::resolve_str("cricket").is_err());
}
