use crate::models::TransformKind;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%m/%d/%Y",
    "%d.%m.%Y",
    "%d-%b-%Y",
    "%b %d, %Y",
    "%B %d, %Y",
];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%m/%d/%Y %H:%M",
    "%m/%d/%Y %H:%M:%S",
];

const CURRENCY_SYMBOLS: &[char] = &['$', '€', '£', '¥'];

pub fn parse_number(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|ch| !CURRENCY_SYMBOLS.contains(ch) && *ch != ',' && !ch.is_whitespace())
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|value| value.is_finite())
}

pub fn parse_boolean(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "y" | "t" | "1" => Some(true),
        "false" | "no" | "n" | "f" | "0" => Some(false),
        _ => None,
    }
}

/// Literals recognized as booleans during type inference (digits excluded).
pub fn is_boolean_literal(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "true" | "false" | "yes" | "no" | "y" | "n"
    )
}

/// Normalizes a calendar date or timestamp; date-only input stays date-only.
pub fn parse_date(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(parsed.with_timezone(&Utc).to_rfc3339());
    }
    for format in DATETIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(parsed.and_utc().to_rfc3339());
        }
    }
    for format in DATE_FORMATS {
        if let Ok(parsed) = NaiveDate::parse_from_str(trimmed, format) {
            return Some(parsed.format("%Y-%m-%d").to_string());
        }
    }
    None
}

pub fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(raw) => raw.trim().is_empty(),
        _ => false,
    }
}

/// Applies one transform. `Ok(None)` means the field is omitted from the row.
pub fn apply(kind: TransformKind, value: &Value) -> Result<Option<Value>, String> {
    if is_blank(value) {
        return Ok(None);
    }
    match kind {
        TransformKind::None => Ok(Some(value.clone())),
        TransformKind::Null => Ok(None),
        TransformKind::Lowercase => Ok(Some(map_string(value, |raw| raw.to_lowercase()))),
        TransformKind::Uppercase => Ok(Some(map_string(value, |raw| raw.to_uppercase()))),
        TransformKind::Trim => Ok(Some(map_string(value, |raw| raw.trim().to_string()))),
        TransformKind::Date => match value {
            Value::String(raw) => parse_date(raw)
                .map(|normalized| Some(Value::String(normalized)))
                .ok_or_else(|| format!("cannot parse '{}' as a date", raw)),
            Value::Number(number) => number
                .as_i64()
                .and_then(|seconds| DateTime::<Utc>::from_timestamp(seconds, 0))
                .map(|at| Some(Value::String(at.to_rfc3339())))
                .ok_or_else(|| format!("cannot interpret {} as a timestamp", number)),
            other => Err(format!("cannot convert {} to a date", other)),
        },
        TransformKind::Number => match value {
            Value::Number(_) => Ok(Some(value.clone())),
            Value::String(raw) => parse_number(raw)
                .map(|parsed| Some(serde_json::json!(parsed)))
                .ok_or_else(|| format!("cannot parse '{}' as a number", raw)),
            other => Err(format!("cannot convert {} to a number", other)),
        },
    }
}

// Case and trim transforms only touch strings; other values pass through.
fn map_string(value: &Value, f: impl Fn(&str) -> String) -> Value {
    match value {
        Value::String(raw) => Value::String(f(raw)),
        other => other.clone(),
    }
}
