//! Normalizer: maps one provider record into a `NormalizedRecord`.
//!
//! Pure functions over `serde_json::Value`; no I/O and no shared state, so
//! records can be normalized in any order or in parallel. Unknown fields
//! are ignored for forward compatibility.

use chrono::NaiveDate;
use serde_json::Value;

use crate::error::{Result, SyncError};
use crate::models::{FieldValue, NormalizedRecord};
use crate::registry::{FeedSpec, FieldKind, FieldSpec};

/// Date formats accepted for `FieldKind::Date` columns. Providers use
/// compact YYYYMMDD in game ids and ISO elsewhere.
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y%m%d", "%m/%d/%Y"];

/// Normalize one raw record against a feed's schema.
///
/// Natural-key fields must always coerce; a missing or malformed key field
/// is a `ShapeError` and the record is dropped by the caller. Optional
/// payload fields that are absent or blank become NULL.
pub fn normalize(feed: &FeedSpec, raw: &Value) -> Result<NormalizedRecord> {
    let mut key = Vec::with_capacity(feed.key.len());
    for spec in feed.key {
        let value = extract(raw, spec)?;
        if value.is_null() {
            return Err(SyncError::Shape {
                field: spec.column,
                reason: "missing natural-key field".to_string(),
            });
        }
        key.push((spec.column, value));
    }

    let mut payload = Vec::with_capacity(feed.fields.len());
    for spec in feed.fields {
        payload.push((spec.column, extract(raw, spec)?));
    }

    Ok(NormalizedRecord { key, payload })
}

fn extract(raw: &Value, spec: &FieldSpec) -> Result<FieldValue> {
    for source in spec.sources {
        if let Some(v) = lookup(raw, source) {
            if !v.is_null() {
                return coerce(v, spec);
            }
        }
    }
    if spec.required {
        return Err(SyncError::Shape {
            field: spec.column,
            reason: format!("required field missing (sources: {})", spec.sources.join(", ")),
        });
    }
    Ok(FieldValue::Null)
}

/// Walk a dotted path into nested objects.
fn lookup<'a>(raw: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = raw;
    for part in path.split('.') {
        current = current.get(part)?;
    }
    Some(current)
}

fn coerce(v: &Value, spec: &FieldSpec) -> Result<FieldValue> {
    let shape = |reason: String| SyncError::Shape {
        field: spec.column,
        reason,
    };

    match spec.kind {
        FieldKind::Text => match v {
            Value::String(s) => {
                let s = s.trim();
                if s.is_empty() {
                    blank(spec)
                } else {
                    Ok(FieldValue::Text(s.to_string()))
                }
            }
            Value::Number(n) => Ok(FieldValue::Text(n.to_string())),
            Value::Bool(b) => Ok(FieldValue::Text(b.to_string())),
            other => Err(shape(format!("expected text, got {}", kind_of(other)))),
        },
        FieldKind::Integer => match v {
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(FieldValue::Integer(i))
                } else if let Some(f) = n.as_f64() {
                    Ok(FieldValue::Integer(f as i64))
                } else {
                    Err(shape(format!("integer out of range: {}", n)))
                }
            }
            Value::String(s) => {
                let s = s.trim();
                if is_blank(s) {
                    return blank(spec);
                }
                // Providers serialize counts as strings, sometimes with a
                // fractional part ("3.0").
                s.parse::<i64>()
                    .map(FieldValue::Integer)
                    .or_else(|_| {
                        s.parse::<f64>()
                            .map(|f| FieldValue::Integer(f as i64))
                            .map_err(|_| shape(format!("cannot parse `{}` as integer", s)))
                    })
            }
            other => Err(shape(format!("expected integer, got {}", kind_of(other)))),
        },
        FieldKind::Real => match v {
            Value::Number(n) => n
                .as_f64()
                .map(FieldValue::Real)
                .ok_or_else(|| shape(format!("real out of range: {}", n))),
            Value::String(s) => {
                let s = s.trim();
                if is_blank(s) {
                    return blank(spec);
                }
                s.parse::<f64>()
                    .map(FieldValue::Real)
                    .map_err(|_| shape(format!("cannot parse `{}` as real", s)))
            }
            other => Err(shape(format!("expected real, got {}", kind_of(other)))),
        },
        FieldKind::Date => match v {
            Value::String(s) => {
                let s = s.trim();
                if is_blank(s) {
                    return blank(spec);
                }
                parse_date(s)
                    .map(FieldValue::Date)
                    .ok_or_else(|| shape(format!("cannot parse `{}` as date", s)))
            }
            other => Err(shape(format!("expected date, got {}", kind_of(other)))),
        },
    }
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
}

/// Blank / "null" strings are NULL for optional fields, a shape error for
/// required ones.
fn blank(spec: &FieldSpec) -> Result<FieldValue> {
    if spec.required {
        Err(SyncError::Shape {
            field: spec.column,
            reason: "required field is blank".to_string(),
        })
    } else {
        Ok(FieldValue::Null)
    }
}

fn is_blank(s: &str) -> bool {
    s.is_empty() || s.eq_ignore_ascii_case("null")
}

fn kind_of(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
