//! Reconciler / upsert engine.
//!
//! Looks up each normalized record by natural key and applies the minimal
//! write: insert when absent, update only when a payload field actually
//! differs, no write otherwise. The write itself is a single conditional
//! upsert (`INSERT .. ON CONFLICT .. DO UPDATE .. WHERE <differs>`), so two
//! concurrent runs cannot race an existence check against an insert; the
//! UNIQUE natural key in the schema is the backstop.
//!
//! Writes are grouped into fixed-size batch transactions. A failed batch is
//! rolled back and its records retried one at a time, so a single bad
//! record cannot sink its batchmates.

use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params_from_iter, Connection, OpenFlags};
use tracing::{debug, info, warn};

use crate::error::{Result, SyncError};
use crate::models::{FieldValue, NormalizedRecord, RunOutcome};
use crate::registry::FeedSpec;

/// One table per sport feed. Natural keys carry UNIQUE constraints so
/// concurrent runs can never produce duplicate rows; required payload
/// columns are NOT NULL. Rows are never deleted by this pipeline.
const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA temp_store = MEMORY;

CREATE TABLE IF NOT EXISTS mlb_teams (
    team_abv TEXT NOT NULL,
    team_city TEXT NOT NULL,
    team_name TEXT NOT NULL,
    conference TEXT,
    division TEXT,
    rs INTEGER,
    ra INTEGER,
    wins INTEGER,
    losses INTEGER,
    run_diff INTEGER,
    last_synced_at TEXT NOT NULL,
    UNIQUE(team_abv)
);

CREATE TABLE IF NOT EXISTS mlb_players (
    player_id TEXT NOT NULL,
    long_name TEXT NOT NULL,
    team_abv TEXT,
    pos TEXT,
    bat TEXT,
    throw TEXT,
    b_day TEXT,
    last_synced_at TEXT NOT NULL,
    UNIQUE(player_id)
);

CREATE TABLE IF NOT EXISTS mlb_games (
    game_id TEXT NOT NULL,
    game_date TEXT NOT NULL,
    home TEXT NOT NULL,
    away TEXT NOT NULL,
    home_score INTEGER,
    away_score INTEGER,
    game_status TEXT,
    last_synced_at TEXT NOT NULL,
    UNIQUE(game_id)
);

CREATE TABLE IF NOT EXISTS mlb_player_game_stats (
    player_id TEXT NOT NULL,
    game_id TEXT NOT NULL,
    team TEXT,
    at_bats INTEGER,
    hits INTEGER,
    home_runs INTEGER,
    rbi INTEGER,
    runs INTEGER,
    strikeouts INTEGER,
    avg REAL,
    earned_runs INTEGER,
    innings_pitched REAL,
    last_synced_at TEXT NOT NULL,
    UNIQUE(player_id, game_id)
);

CREATE TABLE IF NOT EXISTS wnba_teams (
    team_abv TEXT NOT NULL,
    name TEXT NOT NULL,
    team_city TEXT NOT NULL,
    conference TEXT,
    wins INTEGER,
    losses INTEGER,
    ppg REAL,
    oppg REAL,
    last_synced_at TEXT NOT NULL,
    UNIQUE(team_abv)
);

CREATE TABLE IF NOT EXISTS wnba_players (
    player_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    position TEXT,
    team_abv TEXT,
    player_pic TEXT,
    last_synced_at TEXT NOT NULL,
    UNIQUE(player_id)
);

CREATE TABLE IF NOT EXISTS wnba_games (
    game_id TEXT NOT NULL,
    game_date TEXT NOT NULL,
    home TEXT NOT NULL,
    away TEXT NOT NULL,
    home_score INTEGER,
    away_score INTEGER,
    game_status TEXT,
    last_synced_at TEXT NOT NULL,
    UNIQUE(game_id)
);

CREATE TABLE IF NOT EXISTS wnba_player_game_stats (
    player_id INTEGER NOT NULL,
    game_id TEXT NOT NULL,
    team_abv TEXT,
    minutes REAL,
    points INTEGER,
    rebounds INTEGER,
    assists INTEGER,
    steals INTEGER,
    blocks INTEGER,
    turnovers INTEGER,
    fantasy_points REAL,
    last_synced_at TEXT NOT NULL,
    UNIQUE(player_id, game_id)
);

CREATE TABLE IF NOT EXISTS nfl_teams (
    team_code TEXT NOT NULL,
    team_city TEXT NOT NULL,
    team_name TEXT NOT NULL,
    wins INTEGER,
    losses INTEGER,
    ties INTEGER,
    points_for INTEGER,
    points_against INTEGER,
    sacks REAL,
    total_tackles REAL,
    defensive_interceptions REAL,
    last_synced_at TEXT NOT NULL,
    UNIQUE(team_code)
);

CREATE TABLE IF NOT EXISTS nfl_players (
    player_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    position TEXT,
    team_code TEXT,
    height TEXT,
    last_synced_at TEXT NOT NULL,
    UNIQUE(player_id)
);

CREATE TABLE IF NOT EXISTS nfl_games (
    game_id TEXT NOT NULL,
    game_date TEXT NOT NULL,
    home TEXT NOT NULL,
    away TEXT NOT NULL,
    home_score INTEGER,
    away_score INTEGER,
    game_status TEXT,
    last_synced_at TEXT NOT NULL,
    UNIQUE(game_id)
);

CREATE TABLE IF NOT EXISTS nfl_player_game_stats (
    player_id INTEGER NOT NULL,
    game_id TEXT NOT NULL,
    team_abv TEXT,
    pass_yds INTEGER,
    pass_td INTEGER,
    rush_yds INTEGER,
    rush_td INTEGER,
    receptions INTEGER,
    rec_yds INTEGER,
    rec_td INTEGER,
    sacks REAL,
    fantasy_points REAL,
    last_synced_at TEXT NOT NULL,
    UNIQUE(player_id, game_id)
);
"#;

/// Handle to the sync database. Shared across tasks; each statement takes
/// the lock for its own duration only.
#[derive(Clone)]
pub struct SyncStore {
    conn: Arc<Mutex<Connection>>,
}

impl SyncStore {
    pub fn open(db_path: &str) -> Result<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(db_path, flags)?;
        conn.execute_batch(SCHEMA_SQL)?;
        info!(db_path, "sync database ready");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn count_rows(&self, table: &str) -> Result<i64> {
        let conn = self.conn.lock();
        let n = conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
            row.get(0)
        })?;
        Ok(n)
    }

    /// Direct connection handle, for callers issuing their own queries.
    pub fn conn_handle(&self) -> &Arc<Mutex<Connection>> {
        &self.conn
    }

    /// Distinct values of one column, rendered as strings. Feeds the
    /// fan-out iteration, where the value rides in a query parameter.
    pub fn distinct_values(&self, table: &str, column: &str) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT DISTINCT {} FROM {} ORDER BY {}",
            column, table, column
        ))?;
        let rows = stmt.query_map([], |row| row.get::<_, rusqlite::types::Value>(0))?;

        let mut values = Vec::new();
        for row in rows {
            match row? {
                rusqlite::types::Value::Text(s) => values.push(s),
                rusqlite::types::Value::Integer(i) => values.push(i.to_string()),
                rusqlite::types::Value::Real(f) => values.push(f.to_string()),
                rusqlite::types::Value::Null | rusqlite::types::Value::Blob(_) => {}
            }
        }
        Ok(values)
    }
}

/// How one record landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteAction {
    Inserted,
    Updated,
    Unchanged,
}

pub struct Reconciler {
    store: SyncStore,
    dry_run: bool,
}

impl Reconciler {
    pub fn new(store: SyncStore, dry_run: bool) -> Self {
        Self { store, dry_run }
    }

    pub fn store(&self) -> &SyncStore {
        &self.store
    }

    /// Reconcile one batch, folding results into `outcome`. The batch is
    /// one transaction; on transaction failure every record is retried
    /// individually before anything is marked failed.
    pub fn reconcile_batch(
        &self,
        feed: &FeedSpec,
        batch: &[NormalizedRecord],
        outcome: &mut RunOutcome,
    ) {
        if batch.is_empty() {
            return;
        }

        if self.dry_run {
            self.classify_batch(feed, batch, outcome);
            return;
        }

        match self.apply_batch(feed, batch) {
            Ok(actions) => {
                for action in actions {
                    tally(outcome, action);
                }
            }
            Err(e) => {
                warn!(
                    feed = feed.name,
                    error = %e,
                    len = batch.len(),
                    "batch transaction failed, retrying records individually"
                );
                for rec in batch {
                    match self.apply_single(feed, rec) {
                        Ok(action) => tally(outcome, action),
                        Err(e) => {
                            let reason = match e {
                                SyncError::Database(inner) => {
                                    SyncError::WriteConflict(inner.to_string()).to_string()
                                }
                                other => other.to_string(),
                            };
                            outcome.record_failure(feed.name, rec.describe_key(), reason);
                        }
                    }
                }
            }
        }
    }

    /// Whole-feed convenience used by tests; the coordinator batches itself.
    pub fn reconcile(
        &self,
        feed: &FeedSpec,
        records: &[NormalizedRecord],
        batch_size: usize,
        outcome: &mut RunOutcome,
    ) {
        for batch in records.chunks(batch_size.max(1)) {
            self.reconcile_batch(feed, batch, outcome);
        }
    }

    fn apply_batch(&self, feed: &FeedSpec, batch: &[NormalizedRecord]) -> Result<Vec<WriteAction>> {
        let now = Utc::now().to_rfc3339();
        let conn = self.store.conn.lock();
        conn.execute("BEGIN IMMEDIATE", [])?;

        let mut actions = Vec::with_capacity(batch.len());
        for rec in batch {
            match apply_one(&conn, feed, rec, &now) {
                Ok(action) => actions.push(action),
                Err(e) => {
                    conn.execute("ROLLBACK", []).ok();
                    return Err(e);
                }
            }
        }

        conn.execute("COMMIT", [])?;
        debug!(feed = feed.name, len = batch.len(), "batch committed");
        Ok(actions)
    }

    /// One record in its own transaction: the per-record atomic unit.
    fn apply_single(&self, feed: &FeedSpec, rec: &NormalizedRecord) -> Result<WriteAction> {
        let now = Utc::now().to_rfc3339();
        let conn = self.store.conn.lock();
        apply_one(&conn, feed, rec, &now)
    }

    /// Dry-run path: classify every record without issuing writes.
    fn classify_batch(
        &self,
        feed: &FeedSpec,
        batch: &[NormalizedRecord],
        outcome: &mut RunOutcome,
    ) {
        let conn = self.store.conn.lock();
        for rec in batch {
            match classify_one(&conn, feed, rec) {
                Ok(action) => tally(outcome, action),
                Err(e) => outcome.record_failure(feed.name, rec.describe_key(), e.to_string()),
            }
        }
    }
}

fn tally(outcome: &mut RunOutcome, action: WriteAction) {
    match action {
        WriteAction::Inserted => outcome.inserted += 1,
        WriteAction::Updated => outcome.updated += 1,
        WriteAction::Unchanged => outcome.unchanged += 1,
    }
}

/// The single conditional write. The preceding EXISTS probe only decides
/// whether a write counts as inserted or updated; correctness rests on the
/// upsert plus the UNIQUE constraint alone.
fn apply_one(
    conn: &Connection,
    feed: &FeedSpec,
    rec: &NormalizedRecord,
    now: &str,
) -> Result<WriteAction> {
    let existed: bool = {
        let mut stmt = conn.prepare_cached(&exists_sql(feed))?;
        stmt.query_row(params_from_iter(rec.key.iter().map(|(_, v)| v)), |row| {
            row.get::<_, i64>(0)
        })? == 1
    };

    let mut stmt = conn.prepare_cached(&upsert_sql(feed))?;
    let now_value = FieldValue::Text(now.to_string());
    let params = rec
        .key
        .iter()
        .map(|(_, v)| v)
        .chain(rec.payload.iter().map(|(_, v)| v))
        .chain(std::iter::once(&now_value));
    let changes = stmt.execute(params_from_iter(params))?;

    Ok(match (existed, changes) {
        (false, _) if changes > 0 => WriteAction::Inserted,
        (true, c) if c > 0 => WriteAction::Updated,
        _ => WriteAction::Unchanged,
    })
}

fn classify_one(conn: &Connection, feed: &FeedSpec, rec: &NormalizedRecord) -> Result<WriteAction> {
    let columns: Vec<&str> = rec.payload.iter().map(|(c, _)| *c).collect();
    let sql = format!(
        "SELECT {} FROM {} WHERE {}",
        if columns.is_empty() {
            "1".to_string()
        } else {
            columns.join(", ")
        },
        feed.table,
        key_predicate(feed),
    );

    let mut stmt = conn.prepare_cached(&sql)?;
    let mut rows = stmt.query(params_from_iter(rec.key.iter().map(|(_, v)| v)))?;
    let Some(row) = rows.next()? else {
        return Ok(WriteAction::Inserted);
    };

    if feed.insert_only {
        return Ok(WriteAction::Unchanged);
    }

    for (i, (_, wanted)) in rec.payload.iter().enumerate() {
        let stored: rusqlite::types::Value = row.get(i)?;
        if !values_match(&stored, wanted) {
            return Ok(WriteAction::Updated);
        }
    }
    Ok(WriteAction::Unchanged)
}

fn values_match(stored: &rusqlite::types::Value, wanted: &FieldValue) -> bool {
    use rusqlite::types::Value as Sql;
    match (stored, wanted) {
        (Sql::Null, FieldValue::Null) => true,
        (Sql::Integer(a), FieldValue::Integer(b)) => a == b,
        (Sql::Real(a), FieldValue::Real(b)) => a == b,
        (Sql::Text(a), FieldValue::Text(b)) => a == b,
        (Sql::Text(a), FieldValue::Date(b)) => *a == b.format("%Y-%m-%d").to_string(),
        _ => false,
    }
}

fn key_predicate(feed: &FeedSpec) -> String {
    feed.key
        .iter()
        .map(|spec| format!("{} = ?", spec.column))
        .collect::<Vec<_>>()
        .join(" AND ")
}

fn exists_sql(feed: &FeedSpec) -> String {
    format!(
        "SELECT EXISTS(SELECT 1 FROM {} WHERE {})",
        feed.table,
        key_predicate(feed)
    )
}

fn upsert_sql(feed: &FeedSpec) -> String {
    let key_cols: Vec<&str> = feed.key.iter().map(|s| s.column).collect();
    let payload_cols: Vec<&str> = feed.fields.iter().map(|s| s.column).collect();

    let mut all_cols: Vec<&str> = key_cols.clone();
    all_cols.extend(&payload_cols);
    all_cols.push("last_synced_at");
    let placeholders = vec!["?"; all_cols.len()].join(", ");

    let conflict = if feed.insert_only || payload_cols.is_empty() {
        format!("ON CONFLICT({}) DO NOTHING", key_cols.join(", "))
    } else {
        let sets = payload_cols
            .iter()
            .map(|c| format!("{c} = excluded.{c}"))
            .chain(std::iter::once(
                "last_synced_at = excluded.last_synced_at".to_string(),
            ))
            .collect::<Vec<_>>()
            .join(", ");
        // The WHERE clause is what makes an identical payload a no-op;
        // IS NOT is the null-safe inequality.
        let differs = payload_cols
            .iter()
            .map(|c| format!("{c} IS NOT excluded.{c}"))
            .collect::<Vec<_>>()
            .join(" OR ");
        format!(
            "ON CONFLICT({}) DO UPDATE SET {} WHERE {}",
            key_cols.join(", "),
            sets,
            differs
        )
    };

    format!(
        "INSERT INTO {} ({}) VALUES ({}) {}",
        feed.table,
        all_cols.join(", "),
        placeholders,
        conflict
    )
}
