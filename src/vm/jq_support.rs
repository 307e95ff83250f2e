//! Shared helpers for the jq value opcodes: arithmetic with jq's additive
//! semantics, comparisons, and value-to-string/number coercions.

use crate::value::Value;
use std::fmt::Write as _;

/// jq's `tostring`/JSON-encoding: strings pass through unchanged, every
/// other value becomes its compact JSON text.
pub fn jq_display(v: &Value) -> String {
    match v {
        Value::Str(s) => s.to_string(),
        other => json_encode(other),
    }
}

pub fn json_encode(v: &Value) -> String {
    let mut out = String::new();
    write_json(v, &mut out);
    out
}

fn write_json(v: &Value, out: &mut String) {
    match v {
        Value::Nil => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Int(i) => {
            let _ = write!(out, "{i}");
        }
        Value::Float(f) => {
            let _ = write!(out, "{f}");
        }
        Value::Str(s) => write_json_string(s, out),
        Value::List(l) => {
            out.push('[');
            for (i, item) in l.borrow().iter().enumerate() {
                if i > 0 {
                    out.push(',');
                    out.push(' ');
                }
                write_json(item, out);
            }
            out.push(']');
        }
        Value::Object(o) => {
            out.push('{');
            for (i, (k, val)) in o.borrow().iter().enumerate() {
                if i > 0 {
                    out.push(',');
                    out.push(' ');
                }
                write_json_string(k, out);
                out.push_str(": ");
                write_json(val, out);
            }
            out.push('}');
        }
        other => {
            let _ = write!(out, "\"{}\"", other.lua_tostring());
        }
    }
}

fn write_json_string(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c if (c as u32) < 0x20 => {
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

/// jq `tonumber`: numbers pass through, booleans coerce to `0`/`1`,
/// strings parse as JSON numbers then fall back to a bare float parse;
/// anything else is not a number.
pub fn jq_tonumber(v: &Value) -> Option<Value> {
    match v {
        Value::Int(_) | Value::Float(_) => Some(v.clone()),
        Value::Bool(b) => Some(Value::Int(if *b { 1 } else { 0 })),
        Value::Str(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return None;
            }
            if let Ok(i) = trimmed.parse::<i64>() {
                return Some(Value::Int(i));
            }
            trimmed.parse::<f64>().ok().map(Value::Float)
        }
        _ => None,
    }
}

/// Normalizes a jq array index: negative counts from the end. Returns
/// `None` when out of bounds.
pub fn normalize_index(len: usize, index: i64) -> Option<usize> {
    let idx = if index < 0 { index + len as i64 } else { index };
    if idx >= 0 && (idx as usize) < len {
        Some(idx as usize)
    } else {
        None
    }
}

/// jq `add`/`+` reduction over a homogeneous list: all-numeric sums
/// (integer if every element is integral), all-string concatenates,
/// all-array concatenates, all-object merges left-to-right. Anything
/// mixed yields `Nil`.
pub fn jq_add(items: &[Value]) -> Value {
    if items.is_empty() {
        return Value::Nil;
    }
    if items.iter().all(|v| matches!(v, Value::Int(_) | Value::Bool(_))) {
        let sum: i64 = items
            .iter()
            .map(|v| match v {
                Value::Int(i) => *i,
                Value::Bool(b) => *b as i64,
                _ => 0,
            })
            .sum();
        return Value::Int(sum);
    }
    if items.iter().all(|v| matches!(v, Value::Int(_) | Value::Float(_) | Value::Bool(_))) {
        let sum: f64 = items.iter().map(|v| v.as_f64().unwrap_or(0.0)).sum();
        return Value::Float(sum);
    }
    if items.iter().all(|v| matches!(v, Value::Str(_))) {
        let mut s = String::new();
        for v in items {
            s.push_str(v.as_str().unwrap_or(""));
        }
        return Value::str(s);
    }
    if items.iter().all(|v| matches!(v, Value::List(_))) {
        let mut out = Vec::new();
        for v in items {
            if let Value::List(l) = v {
                out.extend(l.borrow().iter().cloned());
            }
        }
        return Value::list(out);
    }
    Value::Nil
}

/// jq's total-order sort key as a comparator, reused by `Sort`/`Unique`/
/// `Min`/`Max`/`GroupBy` family opcodes; thin wrapper around
/// [`crate::vm::jq_cmp`] kept here so the dispatch modules share one
/// import path for both ordering and value coercion helpers.
pub use crate::vm::jq_cmp;
