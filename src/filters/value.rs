//! Bind parameters and JSON value coercion.

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use uuid::Uuid;

use super::fields::FieldKind;
use super::FilterError;
use crate::models::vulnerability::{EaseOfResolution, Severity, VulnerabilityStatus, VulnerabilityType};

/// A value bound to a `$n` placeholder.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Text(String),
    Int(i64),
    Bool(bool),
    Timestamp(DateTime<Utc>),
    Json(Value),
    Uuid(Uuid),
    TextList(Vec<String>),
    IntList(Vec<i64>),
    BoolList(Vec<bool>),
    TimestampList(Vec<DateTime<Utc>>),
    /// Untyped NULL; statements cast the placeholder.
    Null,
}

/// Bind every [`SqlValue`] of `$params`, in order, to `$query`.
#[macro_export]
macro_rules! bind_params {
    ($query:expr, $params:expr) => {{
        let mut query = $query;
        for param in $params {
            query = match param {
                $crate::filters::value::SqlValue::Text(v) => query.bind(v.clone()),
                $crate::filters::value::SqlValue::Int(v) => query.bind(*v),
                $crate::filters::value::SqlValue::Bool(v) => query.bind(*v),
                $crate::filters::value::SqlValue::Timestamp(v) => query.bind(*v),
                $crate::filters::value::SqlValue::Json(v) => query.bind(v.clone()),
                $crate::filters::value::SqlValue::Uuid(v) => query.bind(*v),
                $crate::filters::value::SqlValue::TextList(v) => query.bind(v.clone()),
                $crate::filters::value::SqlValue::IntList(v) => query.bind(v.clone()),
                $crate::filters::value::SqlValue::BoolList(v) => query.bind(v.clone()),
                $crate::filters::value::SqlValue::TimestampList(v) => query.bind(v.clone()),
                $crate::filters::value::SqlValue::Null => query.bind(None::<String>),
            };
        }
        query
    }};
}

fn invalid(field: &str, reason: impl Into<String>) -> FilterError {
    FilterError::InvalidValue {
        field: field.to_string(),
        reason: reason.into(),
    }
}

/// Coerce a scalar JSON value into the domain of `kind`.
pub fn coerce(field: &str, kind: FieldKind, value: &Value) -> Result<SqlValue, FilterError> {
    match kind {
        FieldKind::Text => match value {
            Value::String(s) => Ok(SqlValue::Text(s.clone())),
            Value::Number(n) => Ok(SqlValue::Text(n.to_string())),
            Value::Bool(b) => Ok(SqlValue::Text(b.to_string())),
            _ => Err(invalid(field, "expected a string")),
        },
        FieldKind::Integer => match value {
            Value::Number(n) => n
                .as_i64()
                .map(SqlValue::Int)
                .ok_or_else(|| invalid(field, "expected an integer")),
            Value::String(s) => s
                .trim()
                .parse()
                .map(SqlValue::Int)
                .map_err(|_| invalid(field, "expected an integer")),
            _ => Err(invalid(field, "expected an integer")),
        },
        FieldKind::Boolean => parse_bool(value)
            .map(SqlValue::Bool)
            .ok_or_else(|| invalid(field, "expected a boolean")),
        FieldKind::Timestamp => value
            .as_str()
            .and_then(parse_timestamp)
            .map(SqlValue::Timestamp)
            .ok_or_else(|| invalid(field, "expected an RFC 3339 timestamp or a date")),
        FieldKind::Severity => label(value)
            .and_then(Severity::from_label)
            .map(|s| SqlValue::Text(s.db_label().to_string()))
            .ok_or_else(|| invalid(field, "unknown severity")),
        FieldKind::Status => label(value)
            .and_then(VulnerabilityStatus::from_label)
            .map(|s| SqlValue::Text(s.label().to_string()))
            .ok_or_else(|| invalid(field, "unknown status")),
        FieldKind::EaseOfResolution => label(value)
            .and_then(EaseOfResolution::from_label)
            .map(|e| SqlValue::Text(e.label().to_string()))
            .ok_or_else(|| invalid(field, "unknown ease of resolution")),
        FieldKind::VulnType => label(value)
            .and_then(|l| {
                VulnerabilityType::from_discriminator(l).or(match l {
                    "vulnerability" => Some(VulnerabilityType::Vulnerability),
                    "vulnerability_web" => Some(VulnerabilityType::VulnerabilityWeb),
                    _ => None,
                })
            })
            .map(|t| SqlValue::Text(t.db_label().to_string()))
            .ok_or_else(|| invalid(field, "unknown vulnerability type")),
    }
}

/// Coerce a JSON array into a homogeneous list value.
pub fn coerce_list(field: &str, kind: FieldKind, value: &Value) -> Result<SqlValue, FilterError> {
    let items = value
        .as_array()
        .ok_or_else(|| invalid(field, "expected a list"))?;
    let coerced = items
        .iter()
        .map(|item| coerce(field, kind, item))
        .collect::<Result<Vec<_>, _>>()?;

    let list = match kind {
        FieldKind::Integer => SqlValue::IntList(
            coerced
                .into_iter()
                .filter_map(|v| match v {
                    SqlValue::Int(n) => Some(n),
                    _ => None,
                })
                .collect(),
        ),
        FieldKind::Boolean => SqlValue::BoolList(
            coerced
                .into_iter()
                .filter_map(|v| match v {
                    SqlValue::Bool(b) => Some(b),
                    _ => None,
                })
                .collect(),
        ),
        FieldKind::Timestamp => SqlValue::TimestampList(
            coerced
                .into_iter()
                .filter_map(|v| match v {
                    SqlValue::Timestamp(t) => Some(t),
                    _ => None,
                })
                .collect(),
        ),
        _ => SqlValue::TextList(
            coerced
                .into_iter()
                .filter_map(|v| match v {
                    SqlValue::Text(s) => Some(s),
                    _ => None,
                })
                .collect(),
        ),
    };
    Ok(list)
}

/// Coerce a value used as a LIKE pattern.
pub fn pattern(field: &str, value: &Value) -> Result<SqlValue, FilterError> {
    value
        .as_str()
        .map(|s| SqlValue::Text(s.to_string()))
        .ok_or_else(|| invalid(field, "expected a string pattern"))
}

fn label(value: &Value) -> Option<&str> {
    value.as_str()
}

pub fn parse_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|n| n != 0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Some(true),
            "false" | "0" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}
