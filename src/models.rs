//! Shared data types for the sync pipeline.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::{ToSqlOutput, Value};
use rusqlite::ToSql;
use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// The fixed set of sports this service synchronizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SportId {
    Mlb,
    Wnba,
    Nfl,
}

impl SportId {
    pub fn parse(s: &str) -> Result<Self, SyncError> {
        match s.to_ascii_lowercase().as_str() {
            "mlb" => Ok(SportId::Mlb),
            "wnba" => Ok(SportId::Wnba),
            "nfl" => Ok(SportId::Nfl),
            other => Err(SyncError::UnknownSport(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SportId::Mlb => "mlb",
            SportId::Wnba => "wnba",
            SportId::Nfl => "nfl",
        }
    }

    /// Prefix for the per-sport credential env vars (`MLB_API_KEY` etc).
    pub fn env_prefix(&self) -> &'static str {
        match self {
            SportId::Mlb => "MLB",
            SportId::Wnba => "WNBA",
            SportId::Nfl => "NFL",
        }
    }
}

impl std::fmt::Display for SportId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed field value after normalization. Dates are stored as ISO-8601
/// text in SQLite.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    Integer(i64),
    Real(f64),
    Date(NaiveDate),
    Null,
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }
}

impl ToSql for FieldValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            FieldValue::Text(s) => ToSqlOutput::Borrowed(s.as_str().into()),
            FieldValue::Integer(i) => ToSqlOutput::Owned(Value::Integer(*i)),
            FieldValue::Real(f) => ToSqlOutput::Owned(Value::Real(*f)),
            FieldValue::Date(d) => {
                ToSqlOutput::Owned(Value::Text(d.format("%Y-%m-%d").to_string()))
            }
            FieldValue::Null => ToSqlOutput::Owned(Value::Null),
        })
    }
}

/// A sport-agnostic record produced by the normalizer and consumed by the
/// reconciler. Column names come from the static feed spec; values are the
/// coerced payload. The natural key is stable across runs for the same
/// real-world entity.
#[derive(Debug, Clone)]
pub struct NormalizedRecord {
    pub key: Vec<(&'static str, FieldValue)>,
    pub payload: Vec<(&'static str, FieldValue)>,
}

impl NormalizedRecord {
    /// Human-readable key for logs and failure entries, e.g. `game_id=20250824_NYM@BOS`.
    pub fn describe_key(&self) -> String {
        self.key
            .iter()
            .map(|(col, v)| match v {
                FieldValue::Text(s) => format!("{}={}", col, s),
                FieldValue::Integer(i) => format!("{}={}", col, i),
                FieldValue::Real(f) => format!("{}={}", col, f),
                FieldValue::Date(d) => format!("{}={}", col, d),
                FieldValue::Null => format!("{}=NULL", col),
            })
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Coordinator state machine. `Fetching` and `Normalizing` overlap when the
/// pipeline is streaming; the state reflects the furthest stage reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Idle,
    Fetching,
    Normalizing,
    Reconciling,
    Completed,
    Aborted,
}

/// One failed record and why.
#[derive(Debug, Clone, Serialize)]
pub struct RecordFailure {
    pub feed: String,
    pub key: String,
    pub reason: String,
}

/// Per-run summary handed back to the caller. Not persisted.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub sport: SportId,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub fetched: usize,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub failed: usize,
    pub failures: Vec<RecordFailure>,
    pub dry_run: bool,
}

impl RunOutcome {
    pub fn start(sport: SportId, dry_run: bool) -> Self {
        Self {
            sport,
            started_at: Utc::now(),
            finished_at: None,
            fetched: 0,
            inserted: 0,
            updated: 0,
            unchanged: 0,
            failed: 0,
            failures: Vec::new(),
            dry_run,
        }
    }

    pub fn record_failure(&mut self, feed: &str, key: String, reason: String) {
        self.failed += 1;
        self.failures.push(RecordFailure {
            feed: feed.to_string(),
            key,
            reason,
        });
    }

    pub fn finalize(&mut self) {
        self.finished_at = Some(Utc::now());
    }
}
