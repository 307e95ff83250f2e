//! Lua's hybrid array+map table.
//!
//! A hybrid array+hash storage scheme: a `Vec` holds the contiguous
//! integer-keyed prefix, an `AHashMap` holds everything else, and keys
//! migrate between the two as the table grows.

use super::Value;
use crate::vm::{EngineError, EngineResult};
use ahash::AHashMap;
use smol_str::SmolStr;
use std::rc::Rc;

pub type TableRef = Rc<std::cell::RefCell<LuaTable>>;

pub fn new_table_ref() -> TableRef {
    Rc::new(std::cell::RefCell::new(LuaTable::new()))
}

/// Normalized map key. Integer-valued floats alias their integer key; a
/// `bool` key is always a map key, never the array part.
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum TableKey {
    Bool(bool),
    Int(i64),
    /// Non-integral float, hashed by bit pattern.
    Float(u64),
    Str(SmolStr),
    /// Identity of a reference-typed value (table/closure/coroutine/native fn/cell).
    Ref(usize),
}

pub fn to_table_key(v: &Value) -> EngineResult<TableKey> {
    match v {
        Value::Nil => Err(EngineError::structural("table index is nil")),
        Value::Bool(b) => Ok(TableKey::Bool(*b)),
        Value::Int(i) => Ok(TableKey::Int(*i)),
        Value::Float(f) => {
            if f.is_nan() {
                Err(EngineError::structural("table index is NaN"))
            } else if f.fract() == 0.0 && *f >= i64::MIN as f64 && *f <= i64::MAX as f64 {
                Ok(TableKey::Int(*f as i64))
            } else {
                Ok(TableKey::Float(f.to_bits()))
            }
        }
        Value::Str(s) => Ok(TableKey::Str(s.clone())),
        Value::Table(t) => Ok(TableKey::Ref(Rc::as_ptr(t) as usize)),
        Value::Closure(c) => Ok(TableKey::Ref(Rc::as_ptr(c) as usize)),
        Value::Coroutine(c) => Ok(TableKey::Ref(Rc::as_ptr(c) as usize)),
        Value::NativeFn(f) => Ok(TableKey::Ref(Rc::as_ptr(f) as *const () as usize)),
        Value::Cell(c) => Ok(TableKey::Ref(Rc::as_ptr(c) as usize)),
        Value::List(_) | Value::Object(_) | Value::YieldMarker(_) => {
            Err(EngineError::structural("unsupported table key type"))
        }
    }
}

#[derive(Default)]
pub struct LuaTable {
    /// 1-indexed from the caller's view; `array[0]` is Lua index 1.
    pub array: Vec<Value>,
    pub map: AHashMap<TableKey, Value>,
    pub metatable: Option<TableRef>,
}

impl LuaTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// `lua_len`: length of the array part ignoring trailing `Nil`.
    pub fn lua_len(&self) -> i64 {
        let mut len = self.array.len();
        while len > 0 && matches!(self.array[len - 1], Value::Nil) {
            len -= 1;
        }
        len as i64
    }

    pub fn get(&self, key: &Value) -> Value {
        if let Value::Int(i) = key {
            if *i >= 1 && (*i as usize) <= self.array.len() {
                return self.array[*i as usize - 1].clone();
            }
        }
        if let Value::Float(f) = key {
            if f.fract() == 0.0 {
                let i = *f as i64;
                if i >= 1 && (i as usize) <= self.array.len() {
                    return self.array[i as usize - 1].clone();
                }
            }
        }
        match to_table_key(key) {
            Ok(k) => self.map.get(&k).cloned().unwrap_or(Value::Nil),
            Err(_) => Value::Nil,
        }
    }

    /// Assigning `Nil` to the last slot shrinks the array; an integer key
    /// equal to `len(array)+1` extends the array.
    pub fn set(&mut self, key: Value, value: Value) -> EngineResult<()> {
        let int_key = match &key {
            Value::Int(i) => Some(*i),
            Value::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        };

        if let Some(i) = int_key {
            if i >= 1 && (i as usize) <= self.array.len() {
                let idx = i as usize - 1;
                self.array[idx] = value;
                if idx == self.array.len() - 1 {
                    while matches!(self.array.last(), Some(Value::Nil)) {
                        self.array.pop();
                    }
                }
                return Ok(());
            }
            if i as usize == self.array.len() + 1 && !matches!(value, Value::Nil) {
                self.array.push(value);
                // Absorb any contiguous keys that already live in the map.
                loop {
                    let next = self.array.len() as i64 + 1;
                    match self.map.remove(&TableKey::Int(next)) {
                        Some(v) => self.array.push(v),
                        None => break,
                    }
                }
                return Ok(());
            }
        }

        let k = to_table_key(&key)?;
        if matches!(value, Value::Nil) {
            self.map.remove(&k);
        } else {
            self.map.insert(k, value);
        }
        Ok(())
    }

    pub fn append(&mut self, value: Value) {
        self.array.push(value);
    }

    pub fn extend(&mut self, values: impl IntoIterator<Item = Value>) {
        for v in values {
            self.append(v);
        }
    }
}

#[cfg(test)]
mod table_tests {
    use super::*;

    #[test]
    fn len_ignores_trailing_nil() {
        let mut t = LuaTable::new();
        t.append(Value::Int(1));
        t.append(Value::Int(2));
        t.append(Value::Nil);
        assert_eq!(t.lua_len(), 2);
    }

    #[test]
    fn integer_key_past_the_end_extends_the_array() {
        let mut t = LuaTable::new();
        t.set(Value::Int(1), Value::str("a")).unwrap();
        t.set(Value::Int(2), Value::str("b")).unwrap();
        assert_eq!(t.lua_len(), 2);
        assert!(matches!(t.get(&Value::Int(1)), Value::Str(_)));
    }

    #[test]
    fn map_keys_are_absorbed_into_the_array_on_extension() {
        let mut t = LuaTable::new();
        t.set(Value::Int(1), Value::Int(10)).unwrap();
        // Write key 3 first (lands in the map, since the array is only length 1).
        t.set(Value::Int(3), Value::Int(30)).unwrap();
        assert_eq!(t.array.len(), 1);
        // Writing key 2 closes the gap and should pull key 3 back into the array.
        t.set(Value::Int(2), Value::Int(20)).unwrap();
        assert_eq!(t.lua_len(), 3);
        assert!(matches!(t.get(&Value::Int(3)), Value::Int(30)));
    }

    #[test]
    fn assigning_nil_to_the_last_array_slot_shrinks_it() {
        let mut t = LuaTable::new();
        t.set(Value::Int(1), Value::Int(1)).unwrap();
        t.set(Value::Int(2), Value::Int(2)).unwrap();
        t.set(Value::Int(2), Value::Nil).unwrap();
        assert_eq!(t.lua_len(), 1);
    }

    #[test]
    fn bool_keys_never_enter_the_array_part() {
        let mut t = LuaTable::new();
        t.set(Value::Bool(true), Value::str("yes")).unwrap();
        assert!(t.array.is_empty());
        assert!(matches!(t.get(&Value::Bool(true)), Value::Str(_)));
    }

    #[test]
    fn nil_key_is_rejected() {
        let mut t = LuaTable::new();
        assert!(t.set(Value::Nil, Value::Int(1)).is_err());
    }

    #[test]
    fn nan_key_is_rejected() {
        let mut t = LuaTable::new();
        assert!(t.set(Value::Float(f64::NAN), Value::Int(1)).is_err());
    }

    #[test]
    fn integral_float_key_aliases_its_integer_key() {
        let mut t = LuaTable::new();
        t.set(Value::Int(1), Value::str("via-int")).unwrap();
        assert!(matches!(t.get(&Value::Float(1.0)), Value::Str(_)));
    }
}
