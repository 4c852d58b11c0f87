//! Run coordinator.
//!
//! Drives one sync run per sport: fetch each feed, normalize records as
//! responses stream in, and hand fixed-size batches to the reconciler.
//! Fetch and normalize/reconcile overlap through an in-process channel, so
//! a slow provider does not serialize the whole run. Fan-out feeds issue
//! one request per previously synced entity (per player, for box scores)
//! and keep streaming through the same channel.
//!
//! Abort policy: a feed that fails before the run has landed any records is
//! fatal and the run aborts. Once data has been written, a later feed
//! failure is folded into the outcome's failure list and the remaining
//! feeds still run; partial progress is never rolled back.

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::client::ApiClient;
use crate::error::{Result, SyncError};
use crate::models::{NormalizedRecord, RunOutcome, RunState, SportId};
use crate::normalize::normalize;
use crate::reconcile::Reconciler;
use crate::registry::{resolve, FanOutSpec, FeedSpec};

pub const DEFAULT_BATCH_SIZE: usize = 200;
/// Pause between fan-out requests, politeness toward the provider.
const FAN_OUT_DELAY_MS: u64 = 25;

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub dry_run: bool,
    /// Incremental cursor: feeds that support a date filter only fetch
    /// records on or after this date.
    pub since: Option<NaiveDate>,
    pub batch_size: usize,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            since: None,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

/// Cooperative cancellation handle. Flip the sender to `true` and the run
/// stops at the next batch boundary; in-flight batches complete.
pub fn cancel_channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

/// What the fetch side sends downstream.
enum FeedEvent {
    Rows {
        /// Fan-out entity these rows belong to, if any.
        entity: Option<String>,
        rows: Vec<Value>,
    },
    /// One fan-out entity's fetch failed after data had already flowed.
    EntityFailed { entity: String, reason: String },
}

pub struct Coordinator {
    client: ApiClient,
    reconciler: Reconciler,
    state: Arc<Mutex<RunState>>,
    cancel: watch::Receiver<bool>,
}

impl Coordinator {
    pub fn new(client: ApiClient, reconciler: Reconciler, cancel: watch::Receiver<bool>) -> Self {
        Self {
            client,
            reconciler,
            state: Arc::new(Mutex::new(RunState::Idle)),
            cancel,
        }
    }

    pub fn state(&self) -> RunState {
        *self.state.lock()
    }

    fn set_state(&self, state: RunState) {
        *self.state.lock() = state;
    }

    fn cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Execute one full run for `sport`. A completed run with per-record
    /// failures is still `Ok`; only a fatal early error is `Err`.
    pub async fn run(&self, sport: SportId, opts: &RunOptions) -> Result<RunOutcome> {
        let adapter = resolve(sport);
        let mut outcome = RunOutcome::start(sport, opts.dry_run);
        info!(%sport, dry_run = opts.dry_run, since = ?opts.since, "sync run starting");

        for feed in adapter.feeds {
            if self.cancelled() {
                info!(%sport, "run cancelled, finishing with partial counts");
                break;
            }
            self.set_state(RunState::Fetching);

            match self.run_feed(feed, opts, &mut outcome).await {
                Ok(false) => {}
                Ok(true) => {
                    info!(%sport, feed = feed.name, "run cancelled mid-feed");
                    break;
                }
                Err(e) if e.is_fatal() && outcome.fetched == 0 => {
                    self.set_state(RunState::Aborted);
                    error!(%sport, feed = feed.name, error = %e, "run aborted");
                    return Err(e);
                }
                Err(e) => {
                    warn!(%sport, feed = feed.name, error = %e, "feed failed, continuing run");
                    outcome.record_failure(feed.name, "<entire feed>".to_string(), e.to_string());
                }
            }
        }

        outcome.finalize();
        self.set_state(RunState::Completed);
        info!(
            %sport,
            fetched = outcome.fetched,
            inserted = outcome.inserted,
            updated = outcome.updated,
            unchanged = outcome.unchanged,
            failed = outcome.failed,
            "sync run completed"
        );
        Ok(outcome)
    }

    /// Returns `Ok(true)` when the run was cancelled mid-feed.
    async fn run_feed(
        &self,
        feed: &'static FeedSpec,
        opts: &RunOptions,
        outcome: &mut RunOutcome,
    ) -> Result<bool> {
        let (tx, mut rx) = mpsc::channel::<FeedEvent>(16);
        let client = self.client.clone();
        let since = opts_since(feed, opts);

        let fetch = match feed.fan_out.as_ref() {
            None => tokio::spawn(async move {
                let rows = client.fetch_records(feed, since, &[]).await?;
                tx.send(FeedEvent::Rows { entity: None, rows }).await.ok();
                Ok::<(), SyncError>(())
            }),
            Some(fan) => {
                let ids = self
                    .reconciler
                    .store()
                    .distinct_values(fan.source_table, fan.source_column)?;
                tokio::spawn(async move { fetch_fan_out(client, feed, fan, ids, since, tx).await })
            }
        };

        let mut pending: Vec<NormalizedRecord> = Vec::with_capacity(opts.batch_size);
        let mut cancelled = false;

        'events: while let Some(event) = rx.recv().await {
            let (entity, mut rows) = match event {
                FeedEvent::EntityFailed { entity, reason } => {
                    outcome.record_failure(feed.name, entity, reason);
                    continue;
                }
                FeedEvent::Rows { entity, rows } => (entity, rows),
            };

            self.set_state(RunState::Normalizing);
            if let (Some(fan), Some(id)) = (feed.fan_out.as_ref(), entity.as_deref()) {
                for raw in rows.iter_mut() {
                    stamp_entity(raw, fan.param, id);
                }
            }

            for raw in &rows {
                outcome.fetched += 1;
                match normalize(feed, raw) {
                    Ok(rec) => pending.push(rec),
                    Err(e) => {
                        outcome.record_failure(feed.name, raw_key_hint(feed, raw), e.to_string())
                    }
                }

                if pending.len() >= opts.batch_size {
                    self.set_state(RunState::Reconciling);
                    self.reconciler.reconcile_batch(feed, &pending, outcome);
                    pending.clear();
                    if self.cancelled() {
                        cancelled = true;
                        break 'events;
                    }
                }
            }
        }
        // Dropping the receiver tells a still-running fetch to stop.
        drop(rx);

        if !pending.is_empty() && !cancelled {
            self.set_state(RunState::Reconciling);
            self.reconciler.reconcile_batch(feed, &pending, outcome);
        }

        let fetch_result = fetch
            .await
            .map_err(|e| SyncError::Network(format!("fetch task failed: {}", e)))?;
        if cancelled {
            return Ok(true);
        }
        fetch_result?;
        Ok(false)
    }
}

/// One request per entity id, streamed into `tx` as results arrive.
///
/// A fatal error before anything has been fetched fails the feed (so a bad
/// key aborts instead of repeating per player); after that, one entity's
/// failure is reported downstream and the iteration continues.
async fn fetch_fan_out(
    client: ApiClient,
    feed: &'static FeedSpec,
    fan: &'static FanOutSpec,
    ids: Vec<String>,
    since: Option<NaiveDate>,
    tx: mpsc::Sender<FeedEvent>,
) -> Result<()> {
    let mut fetched_any = false;
    for id in ids {
        match client
            .fetch_records(feed, since, &[(fan.param.to_string(), id.clone())])
            .await
        {
            Ok(rows) => {
                fetched_any = fetched_any || !rows.is_empty();
                if tx
                    .send(FeedEvent::Rows {
                        entity: Some(id),
                        rows,
                    })
                    .await
                    .is_err()
                {
                    break;
                }
            }
            Err(e) if e.is_fatal() && !fetched_any => return Err(e),
            Err(e) => {
                warn!(feed = feed.name, entity = %id, error = %e, "entity fetch failed, continuing");
                let failed = FeedEvent::EntityFailed {
                    entity: format!("{}={}", fan.param, id),
                    reason: e.to_string(),
                };
                if tx.send(failed).await.is_err() {
                    break;
                }
            }
        }
        sleep(Duration::from_millis(FAN_OUT_DELAY_MS)).await;
    }
    Ok(())
}

/// Stamp the fan-out entity id into a record that does not carry it.
fn stamp_entity(raw: &mut Value, param: &str, id: &str) {
    if let Value::Object(map) = raw {
        map.entry(param)
            .or_insert_with(|| Value::String(id.to_string()));
    }
}

fn opts_since(feed: &FeedSpec, opts: &RunOptions) -> Option<NaiveDate> {
    feed.since_param.and(opts.since)
}

/// Best-effort key for a record that failed normalization, for the failure
/// list; the natural key may itself be the missing field.
fn raw_key_hint(feed: &FeedSpec, raw: &Value) -> String {
    for spec in feed.key {
        for source in spec.sources {
            if let Some(v) = raw.get(*source) {
                if let Some(s) = v.as_str() {
                    return format!("{}={}", spec.column, s);
                }
                if v.is_number() {
                    return format!("{}={}", spec.column, v);
                }
            }
        }
    }
    "<no key>".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::RetryPolicy;
    use crate::reconcile::SyncStore;
    use axum::http::StatusCode;
    use axum::{routing::get, Json, Router};
    use serde_json::json;

    async fn spawn_server(routes: Vec<(&'static str, StatusCode, Value)>) -> String {
        let mut app = Router::new();
        for (path, status, body) in routes {
            app = app.route(
                path,
                get(move || std::future::ready((status, Json(body.clone())))),
            );
        }
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_rate_limit_retries: 1,
            max_transient_retries: 1,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
        }
    }

    fn coordinator(base: &str, store: SyncStore) -> Coordinator {
        let client = ApiClient::new(base, "test-host", "test-key", fast_retry()).unwrap();
        let (_tx, rx) = cancel_channel();
        Coordinator::new(client, Reconciler::new(store, false), rx)
    }

    fn mlb_routes() -> Vec<(&'static str, StatusCode, Value)> {
        vec![
            (
                "/getMLBTeams",
                StatusCode::OK,
                json!({"statusCode": 200, "body": [
                    {"teamAbv": "BOS", "teamCity": "Boston", "teamName": "Red Sox", "wins": "71"},
                    {"teamAbv": "NYM", "teamCity": "New York", "teamName": "Mets", "wins": "69"},
                ]}),
            ),
            (
                "/getMLBPlayerList",
                StatusCode::OK,
                json!({"statusCode": 200, "body": [
                    {"playerID": "660271", "longName": "Shohei Ohtani", "team": "LAD", "pos": "DH"},
                ]}),
            ),
            (
                "/getMLBScoresOnly",
                StatusCode::OK,
                json!({"statusCode": 200, "body": {
                    "20250824_NYM@BOS": {
                        "gameID": "20250824_NYM@BOS", "gameDate": "20250824",
                        "home": "BOS", "away": "NYM", "homeR": "5", "awayR": "3",
                    },
                }}),
            ),
            (
                // Box score for the single synced player; records carry no
                // playerID of their own.
                "/getMLBGamesForPlayer",
                StatusCode::OK,
                json!({"statusCode": 200, "body": {
                    "20250824_NYM@BOS": {
                        "gameID": "20250824_NYM@BOS", "team": "LAD",
                        "Hitting": {"AB": "4", "H": "2", "HR": "1", "RBI": "2"},
                    },
                }}),
            ),
        ]
    }

    #[tokio::test]
    async fn full_run_lands_every_feed() {
        let base = spawn_server(mlb_routes()).await;
        let store = SyncStore::in_memory().unwrap();
        let coord = coordinator(&base, store.clone());

        let outcome = coord
            .run(SportId::Mlb, &RunOptions::default())
            .await
            .unwrap();

        assert_eq!(outcome.fetched, 5);
        assert_eq!(outcome.inserted, 5);
        assert_eq!(outcome.failed, 0);
        assert_eq!(coord.state(), RunState::Completed);
        assert_eq!(store.count_rows("mlb_teams").unwrap(), 2);
        assert_eq!(store.count_rows("mlb_players").unwrap(), 1);
        assert_eq!(store.count_rows("mlb_games").unwrap(), 1);
        assert_eq!(store.count_rows("mlb_player_game_stats").unwrap(), 1);
    }

    #[tokio::test]
    async fn rerun_is_idempotent() {
        let base = spawn_server(mlb_routes()).await;
        let store = SyncStore::in_memory().unwrap();
        let coord = coordinator(&base, store.clone());

        coord.run(SportId::Mlb, &RunOptions::default()).await.unwrap();
        let second = coord
            .run(SportId::Mlb, &RunOptions::default())
            .await
            .unwrap();

        assert_eq!(second.inserted, 0);
        assert_eq!(second.updated, 0);
        assert_eq!(second.unchanged, 5);
        assert_eq!(store.count_rows("mlb_teams").unwrap(), 2);
    }

    #[tokio::test]
    async fn fan_out_stamps_the_player_into_box_scores() {
        let base = spawn_server(mlb_routes()).await;
        let store = SyncStore::in_memory().unwrap();
        let coord = coordinator(&base, store.clone());

        coord.run(SportId::Mlb, &RunOptions::default()).await.unwrap();

        let (player_id, hits): (String, i64) = {
            let conn = store.conn_handle().lock();
            conn.query_row(
                "SELECT player_id, hits FROM mlb_player_game_stats",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap()
        };
        assert_eq!(player_id, "660271");
        assert_eq!(hits, 2);
    }

    #[tokio::test]
    async fn early_fatal_error_aborts_the_run() {
        // First feed rejects the key; nothing has landed yet.
        let base = spawn_server(vec![(
            "/getMLBTeams",
            StatusCode::UNAUTHORIZED,
            json!({"message": "bad key"}),
        )])
        .await;
        let store = SyncStore::in_memory().unwrap();
        let coord = coordinator(&base, store.clone());

        let err = coord.run(SportId::Mlb, &RunOptions::default()).await;
        assert!(err.is_err());
        assert_eq!(coord.state(), RunState::Aborted);
        assert_eq!(store.count_rows("mlb_teams").unwrap(), 0);
    }

    #[tokio::test]
    async fn later_feed_failure_is_folded_and_run_continues() {
        let mut routes = mlb_routes();
        routes[1] = (
            "/getMLBPlayerList",
            StatusCode::UNAUTHORIZED,
            json!({"message": "bad key"}),
        );
        let base = spawn_server(routes).await;
        let store = SyncStore::in_memory().unwrap();
        let coord = coordinator(&base, store.clone());

        let outcome = coord
            .run(SportId::Mlb, &RunOptions::default())
            .await
            .unwrap();

        assert_eq!(outcome.failed, 1);
        assert_eq!(outcome.failures[0].feed, "players");
        // The scores feed after the failure still ran; with no players
        // synced, the fan-out had nothing to iterate.
        assert_eq!(store.count_rows("mlb_games").unwrap(), 1);
        assert_eq!(store.count_rows("mlb_player_game_stats").unwrap(), 0);
        assert_eq!(coord.state(), RunState::Completed);
    }

    #[tokio::test]
    async fn fan_out_auth_failure_is_folded_after_data_landed() {
        let mut routes = mlb_routes();
        routes[3] = (
            "/getMLBGamesForPlayer",
            StatusCode::UNAUTHORIZED,
            json!({"message": "bad key"}),
        );
        let base = spawn_server(routes).await;
        let store = SyncStore::in_memory().unwrap();
        let coord = coordinator(&base, store.clone());

        let outcome = coord
            .run(SportId::Mlb, &RunOptions::default())
            .await
            .unwrap();

        // Earlier feeds landed, so the box-score failure is reported, not
        // fatal.
        assert_eq!(outcome.inserted, 4);
        assert_eq!(outcome.failed, 1);
        assert_eq!(outcome.failures[0].feed, "player_games");
        assert_eq!(coord.state(), RunState::Completed);
    }

    #[tokio::test]
    async fn pre_cancelled_run_completes_with_no_work() {
        let base = spawn_server(mlb_routes()).await;
        let store = SyncStore::in_memory().unwrap();
        let client = ApiClient::new(&base, "test-host", "test-key", fast_retry()).unwrap();
        let (tx, rx) = cancel_channel();
        let coord = Coordinator::new(client, Reconciler::new(store.clone(), false), rx);

        tx.send(true).unwrap();
        let outcome = coord
            .run(SportId::Mlb, &RunOptions::default())
            .await
            .unwrap();

        assert_eq!(outcome.fetched, 0);
        assert_eq!(coord.state(), RunState::Completed);
        assert_eq!(store.count_rows("mlb_teams").unwrap(), 0);
    }

    #[tokio::test]
    async fn bad_record_is_skipped_not_fatal() {
        let mut routes = mlb_routes();
        routes[0] = (
            "/getMLBTeams",
            StatusCode::OK,
            json!({"statusCode": 200, "body": [
                {"teamAbv": "BOS", "teamCity": "Boston", "teamName": "Red Sox"},
                {"teamCity": "Nowhere", "teamName": "Ghosts"},
            ]}),
        );
        let base = spawn_server(routes).await;
        let store = SyncStore::in_memory().unwrap();
        let coord = coordinator(&base, store.clone());

        let outcome = coord
            .run(SportId::Mlb, &RunOptions::default())
            .await
            .unwrap();

        assert_eq!(outcome.failed, 1);
        assert!(outcome.failures[0].reason.contains("team_abv"));
        assert_eq!(store.count_rows("mlb_teams").unwrap(), 1);
    }
}
