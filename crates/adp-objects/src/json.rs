//! Lenient readers for `ConvertTo-Json` output.
//!
//! Windows PowerShell serialises enums as integers or strings depending on
//! the cmdlet, dates as `/Date(<ms>)/`, empty multi-valued properties as
//! `null` and single-element collections as scalars. These helpers accept all
//! of those shapes.

use adp_core::{AdError, AdResult};
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

lazy_static! {
    static ref MS_DATE_RE: Regex =
        Regex::new(r"^/Date\((-?\d+)(?:[+-]\d{4})?\)/$").expect("static date regex");
}

/// Decode a JSON document into a raw PowerShell object.
pub fn from_ps<T: DeserializeOwned>(json: &str) -> AdResult<T> {
    let trimmed = json.trim();
    if trimmed.is_empty() {
        return Err(AdError::parse("empty JSON output"));
    }
    Ok(serde_json::from_str(trimmed)?)
}

/// Decode a list; empty output is an empty list and a lone object a list
/// of one.
pub fn from_ps_array<T: DeserializeOwned>(json: &str) -> AdResult<Vec<T>> {
    let trimmed = json.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    if trimmed.starts_with('[') {
        Ok(serde_json::from_str(trimmed)?)
    } else {
        Ok(vec![serde_json::from_str(trimmed)?])
    }
}

/// A GUID that must be present.
pub fn require_guid(guid: &str, what: &str) -> AdResult<String> {
    let guid = guid.trim().trim_start_matches('{').trim_end_matches('}');
    if guid.is_empty() {
        return Err(AdError::invariant(format!("{} has an empty ObjectGUID", what)));
    }
    Ok(guid.to_string())
}

/// String form of any scalar; `null` and containers become empty.
pub fn value_to_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        // Objects such as `{ "Value": "..." }` wrap the scalar.
        Value::Object(map) => map.get("Value").map(value_to_string).unwrap_or_default(),
        _ => String::new(),
    }
}

pub fn de_string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(value_to_string(&Value::deserialize(d)?))
}

pub fn de_bool<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Bool(b) => b,
        Value::Number(n) => n.as_i64().unwrap_or(0) != 0,
        Value::String(s) => s.eq_ignore_ascii_case("true"),
        _ => false,
    })
}

pub fn de_opt_bool<'de, D: Deserializer<'de>>(d: D) -> Result<Option<bool>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Null => None,
        Value::Bool(b) => Some(b),
        Value::Number(n) => Some(n.as_i64().unwrap_or(0) != 0),
        Value::String(s) => Some(s.eq_ignore_ascii_case("true")),
        _ => None,
    })
}

pub fn de_opt_i64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

/// `null` → empty, scalar → one element, array → elements.
pub fn de_string_list<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Null => Vec::new(),
        Value::Array(items) => items
            .iter()
            .map(value_to_string)
            .filter(|s| !s.is_empty())
            .collect(),
        other => {
            let s = value_to_string(&other);
            if s.is_empty() {
                Vec::new()
            } else {
                vec![s]
            }
        }
    })
}

/// `/Date(<ms>)/` or an ISO timestamp → RFC 3339 UTC with second precision.
/// Empty input stays empty.
pub fn parse_ps_date(raw: &str) -> AdResult<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(String::new());
    }
    let parsed: DateTime<Utc> = if let Some(caps) = MS_DATE_RE.captures(raw) {
        let ms: i64 = caps[1]
            .parse()
            .map_err(|_| AdError::parse(format!("invalid date '{}'", raw)))?;
        Utc.timestamp_millis_opt(ms)
            .single()
            .ok_or_else(|| AdError::parse(format!("date out of range '{}'", raw)))?
    } else {
        DateTime::parse_from_rfc3339(raw)
            .map_err(|e| AdError::parse(format!("invalid date '{}': {}", raw, e)))?
            .with_timezone(&Utc)
    };
    Ok(parsed.to_rfc3339_opts(SecondsFormat::Secs, true))
}
