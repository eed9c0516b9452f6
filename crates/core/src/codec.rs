//! Field codec set: one logical value <-> one physical slot.
//!
//! Two physical forms exist:
//! - flat record: every slot is a string, an absent slot is null
//! - JSON document: a `serde_json::Value` per key, null is explicit
//!
//! Arrays use the same `|`-joined string in both forms. Encoding an empty array
//! yields "no value", so empty and null arrays collapse after a round trip.

use serde_json::Value;

use crate::{DecodeError, FieldType, FieldValue};

pub const ARRAY_SEPARATOR: char = '|';

/// Canonical string form of a number (`42`, `0.5`, `-3`).
pub fn format_number(n: f64) -> String {
    n.to_string()
}

fn join_array(items: &[String]) -> Option<String> {
    if items.is_empty() {
        return None;
    }
    Some(items.join("|"))
}

fn split_array(raw: &str) -> Vec<String> {
    if raw.is_empty() {
        return Vec::new();
    }
    raw.split(ARRAY_SEPARATOR).map(str::to_string).collect()
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw {
        "1" | "true" => Some(true),
        "0" | "false" => Some(false),
        _ => None,
    }
}

/// Encode for a flat-record slot. `None` means the slot must not exist.
pub fn encode_flat(value: Option<&FieldValue>) -> Option<String> {
    match value? {
        FieldValue::Text(s) => Some(s.clone()),
        FieldValue::Number(n) => Some(format_number(*n)),
        FieldValue::Boolean(b) => Some(if *b { "1" } else { "0" }.to_string()),
        FieldValue::Array(items) => join_array(items),
    }
}

/// Decode a flat-record slot; an absent slot decodes to null.
pub fn decode_flat(field: &str, ty: FieldType, raw: Option<&str>) -> Result<Option<FieldValue>, DecodeError> {
    let Some(raw) = raw else { return Ok(None) };
    let value = match ty {
        FieldType::String | FieldType::Text => FieldValue::Text(raw.to_string()),
        FieldType::Number => {
            let n = raw.trim().parse::<f64>().map_err(|_| DecodeError::new(field, ty, format!("{:?}", raw)))?;
            FieldValue::Number(n)
        }
        FieldType::Boolean => {
            let b = parse_bool(raw).ok_or_else(|| DecodeError::new(field, ty, format!("{:?}", raw)))?;
            FieldValue::Boolean(b)
        }
        FieldType::Array => FieldValue::Array(split_array(raw)),
    };
    Ok(Some(value))
}

fn number_to_json(n: f64) -> Value {
    // Integral values inside the exactly-representable range are written as integers.
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        return Value::from(n as i64);
    }
    match serde_json::Number::from_f64(n) {
        Some(num) => Value::Number(num),
        // NaN and infinities have no JSON form; keep them as their string spelling.
        None => Value::String(format_number(n)),
    }
}

/// Encode for a JSON document key. Null is an explicit `Value::Null`.
pub fn encode_json(value: Option<&FieldValue>) -> Value {
    match value {
        None => Value::Null,
        Some(FieldValue::Text(s)) => Value::String(s.clone()),
        Some(FieldValue::Number(n)) => number_to_json(*n),
        Some(FieldValue::Boolean(b)) => Value::Bool(*b),
        Some(FieldValue::Array(items)) => join_array(items).map(Value::String).unwrap_or(Value::Null),
    }
}

/// Decode a JSON document key; a missing key or `null` decodes to null.
pub fn decode_json(field: &str, ty: FieldType, raw: Option<&Value>) -> Result<Option<FieldValue>, DecodeError> {
    let raw = match raw {
        None | Some(Value::Null) => return Ok(None),
        Some(v) => v,
    };
    let mismatch = || DecodeError::new(field, ty, raw);
    let value = match (ty, raw) {
        (FieldType::String | FieldType::Text, Value::String(s)) => FieldValue::Text(s.clone()),
        (FieldType::Number, Value::Number(n)) => FieldValue::Number(n.as_f64().ok_or_else(mismatch)?),
        (FieldType::Boolean, Value::Bool(b)) => FieldValue::Boolean(*b),
        (FieldType::Array, Value::Array(items)) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(item.as_str().ok_or_else(mismatch)?.to_string());
            }
            FieldValue::Array(out)
        }
        // Numbers, booleans and arrays may also arrive in their flat string form.
        (FieldType::Number | FieldType::Boolean | FieldType::Array, Value::String(s)) => {
            return decode_flat(field, ty, Some(s)).map_err(|_| mismatch());
        }
        _ => return Err(mismatch()),
    };
    Ok(Some(value))
}
