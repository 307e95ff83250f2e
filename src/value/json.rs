//! Conversions between [`Value`] and `serde_json::Value`, gated behind
//! the `serde` feature.
//!
//! The core has no JSON text boundary of its own (the embedder drives
//! `jq::run_filter` with an already-parsed [`Value`]), so these
//! conversions exist purely for embedders who do want to go from/to JSON
//! text, via `serde_json::from_str` + [`from_json`] and [`to_json`] +
//! `serde_json::to_string`.

use super::object::new_object;
use super::Value;
use serde_json::{Map, Number};

/// Converts a parsed `serde_json::Value` into this crate's `Value`.
/// `serde_json` integers that don't fit in `i64` (its `u64`/arbitrary
/// precision forms) fall back to `f64`, matching jq's single numeric
/// type.
pub fn from_json(json: serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Nil,
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else {
                Value::Float(n.as_f64().unwrap_or(0.0))
            }
        }
        serde_json::Value::String(s) => Value::str(s),
        serde_json::Value::Array(items) => Value::list(items.into_iter().map(from_json).collect()),
        serde_json::Value::Object(entries) => {
            new_object(entries.into_iter().map(|(k, v)| (k.into(), from_json(v))).collect())
        }
    }
}

/// Converts this crate's `Value` into a `serde_json::Value`. Values with
/// no JSON representation (closures, native functions, tables,
/// coroutines, cells, the transient yield marker) serialize as `null`,
/// the same fallback jq itself applies to foreign values it cannot emit.
pub fn to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Nil => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Int(i) => serde_json::Value::Number(Number::from(*i)),
        Value::Float(f) => Number::from_f64(*f).map(serde_json::Value::Number).unwrap_or(serde_json::Value::Null),
        Value::Str(s) => serde_json::Value::String(s.to_string()),
        Value::List(items) => serde_json::Value::Array(items.borrow().iter().map(to_json).collect()),
        Value::Object(obj) => {
            let mut map = Map::new();
            for (k, v) in obj.borrow().iter() {
                map.insert(k.to_string(), to_json(v));
            }
            serde_json::Value::Object(map)
        }
        Value::Table(_)
        | Value::Closure(_)
        | Value::NativeFn(_)
        | Value::Cell(_)
        | Value::Coroutine(_)
        | Value::YieldMarker(_) => serde_json::Value::Null,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trips_a_nested_document() {
        let text = r#"{"name":"ok","items":[1,2,3],"meta":{"active":true,"score":null}}"#;
        let parsed: serde_json::Value = serde_json::from_str(text).unwrap();
        let value = from_json(parsed);
        let back = to_json(&value);
        assert_eq!(back["name"], serde_json::json!("ok"));
        assert_eq!(back["items"], serde_json::json!([1, 2, 3]));
        assert_eq!(back["meta"]["active"], serde_json::json!(true));
        assert_eq!(back["meta"]["score"], serde_json::Value::Null);
    }

    #[test]
    fn large_unsigned_integers_fall_back_to_float() {
        let parsed: serde_json::Value = serde_json::from_str("18446744073709551615").unwrap();
        let value = from_json(parsed);
        assert!(matches!(value, Value::Float(_)));
    }
}
