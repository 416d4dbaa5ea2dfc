//! Tolerant field decoders for snapshot payloads.
//!
//! Download services are loose about JSON types: sizes arrive as numbers or
//! numeric strings, flags as `0`/`1`, timestamps as epoch seconds or RFC 3339.
//! Every decoder here accepts `null` and falls back to the field's zero value
//! instead of failing the whole snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Decode an unsigned integer from a number, numeric string, or null.
///
/// Negative and fractional numbers are clamped/truncated; garbage becomes 0.
pub fn number<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(value_to_u64(&value))
}

/// Decode a float from a number, numeric string, or null.
pub fn float<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(value_to_f64(&value))
}

/// Decode a string from a string, number, or null.
pub fn string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => String::new(),
    })
}

/// Decode an optional string; empty strings become `None`.
pub fn opt_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let s = string(deserializer)?;
    Ok(if s.is_empty() { None } else { Some(s) })
}

/// Decode a boolean from a bool, `0`/`1`, `"true"`/`"false"`, or null.
pub fn flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Bool(b) => b,
        Value::Number(n) => n.as_f64().is_some_and(|v| v != 0.0),
        Value::String(s) => matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes"),
        _ => false,
    })
}

/// Decode a timestamp from epoch seconds (number or string) or RFC 3339.
pub fn timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Number(n) => n.as_i64().and_then(|secs| DateTime::from_timestamp(secs, 0)),
        Value::String(s) => {
            let trimmed = s.trim();
            if let Ok(secs) = trimmed.parse::<i64>() {
                DateTime::from_timestamp(secs, 0)
            } else {
                DateTime::parse_from_rfc3339(trimmed)
                    .ok()
                    .map(|dt| dt.with_timezone(&Utc))
            }
        }
        _ => None,
    })
}

pub(crate) fn value_to_u64(value: &Value) -> u64 {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().map(|f| if f > 0.0 { f as u64 } else { 0 }))
            .unwrap_or(0),
        Value::String(s) => {
            let trimmed = s.trim();
            trimmed
                .parse::<u64>()
                .ok()
                .or_else(|| {
                    trimmed
                        .parse::<f64>()
                        .ok()
                        .map(|f| if f > 0.0 { f as u64 } else { 0 })
                })
                .unwrap_or(0)
        }
        _ => 0,
    }
}

pub(crate) fn value_to_f64(value: &Value) -> f64 {
    let parsed = match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    };
    if parsed.is_finite() { parsed } else { 0.0 }
}
