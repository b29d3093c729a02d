//! Deserializers that tolerate the upstream API's loose typing.
//!
//! Ids arrive as strings or numbers, counters as integers, floats or numeric
//! strings, and lists as `null`. Values of a clearly wrong shape (an object
//! where a number belongs) are still rejected.

use serde::de::{Deserializer, Error};
use serde::Deserialize;
use serde_json::Value;

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// A string that may have been sent as a number. Empty strings become `None`.
pub fn opt_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    match Option::<Value>::deserialize(d)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(Value::Bool(b)) => Ok(Some(b.to_string())),
        Some(other) => Err(D::Error::custom(format!("expected a string, found {}", kind(&other)))),
    }
}

fn number_from(value: &Value) -> Result<Option<f64>, String> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => Ok(n.as_f64()),
        Value::String(s) if s.trim().is_empty() => Ok(None),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|_| format!("expected a number, found string {s:?}")),
        other => Err(format!("expected a number, found {}", kind(other))),
    }
}

/// An integer that may arrive as a float or a numeric string. Fractions are truncated.
pub fn opt_i64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
    let value = Option::<Value>::deserialize(d)?.unwrap_or(Value::Null);
    if let Value::Number(n) = &value {
        if let Some(i) = n.as_i64() {
            return Ok(Some(i));
        }
    }
    number_from(&value).map(|n| n.map(|f| f as i64)).map_err(D::Error::custom)
}

pub fn opt_f64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
    let value = Option::<Value>::deserialize(d)?.unwrap_or(Value::Null);
    number_from(&value).map_err(D::Error::custom)
}

/// A flag that may be sent as `true`, `1` or `"true"`.
pub fn opt_bool<'de, D: Deserializer<'de>>(d: D) -> Result<Option<bool>, D::Error> {
    match Option::<Value>::deserialize(d)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(b)),
        Some(Value::Number(n)) => Ok(Some(n.as_f64().is_some_and(|f| f != 0.0))),
        Some(Value::String(s)) => match s.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(Some(true)),
            "false" | "0" | "no" | "" => Ok(Some(false)),
            _ => Err(D::Error::custom(format!("expected a boolean, found string {s:?}"))),
        },
        Some(other) => Err(D::Error::custom(format!("expected a boolean, found {}", kind(&other)))),
    }
}

/// A list of ids. `null` is an empty list and `null`/empty entries are dropped
/// (empty starter slots are sent that way).
pub fn string_list<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
    match Option::<Value>::deserialize(d)? {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::Null => None,
                Value::String(s) if s.is_empty() || s == "0" => None,
                Value::String(s) => Some(Ok(s)),
                Value::Number(n) => Some(Ok(n.to_string())),
                other => Some(Err(D::Error::custom(format!(
                    "expected a list of ids, found {} entry",
                    kind(&other)
                )))),
            })
            .collect(),
        Some(other) => Err(D::Error::custom(format!("expected a list, found {}", kind(&other)))),
    }
}

pub fn int_list<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<i64>, D::Error> {
    match Option::<Value>::deserialize(d)? {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .filter(|item| !item.is_null())
            .map(|item| match number_from(item) {
                Ok(Some(f)) => Ok(f as i64),
                Ok(None) => Err(D::Error::custom("empty entry in integer list")),
                Err(e) => Err(D::Error::custom(e)),
            })
            .collect(),
        Some(other) => Err(D::Error::custom(format!("expected a list, found {}", kind(&other)))),
    }
}
