//! Metatable dispatch: `__index`/`__newindex` for
//! field-read/write misses, arithmetic/comparison/concat/call fallbacks.

use super::{jq_cmp, EngineError, EngineResult, Vm};
use crate::value::{TableRef, Value};
use std::cmp::Ordering;

/// Values that fall inside jq's single total order (null, booleans,
/// numbers, strings, arrays, objects). Lua's reference types (`Table`,
/// `Closure`, `Coroutine`, `NativeFn`, `Cell`) sit outside it and keep
/// identity/metatable-based comparison instead.
fn is_ordinal(v: &Value) -> bool {
    matches!(
        v,
        Value::Nil | Value::Bool(_) | Value::Int(_) | Value::Float(_) | Value::Str(_) | Value::List(_) | Value::Object(_)
    )
}

pub fn lookup_metamethod(table: &TableRef, name: &str) -> Option<Value> {
    let meta = table.borrow().metatable.clone()?;
    let v = meta.borrow().get(&Value::str(name));
    if matches!(v, Value::Nil) { None } else { Some(v) }
}

impl Vm {
    /// `R[A] := T[K]` honoring `__index`.
    pub fn table_get(&mut self, table: &TableRef, key: &Value) -> EngineResult<Value> {
        let direct = table.borrow().get(key);
        if !matches!(direct, Value::Nil) {
            return Ok(direct);
        }
        match lookup_metamethod(table, "__index") {
            Some(Value::Table(meta_table)) => self.table_get(&meta_table, key),
            Some(callable @ (Value::Closure(_) | Value::NativeFn(_))) => {
                let results = self.call_callable(&callable, vec![Value::Table(table.clone()), key.clone()])?;
                Ok(results.into_iter().next().unwrap_or(Value::Nil))
            }
            _ => Ok(Value::Nil),
        }
    }

    /// `T[K] := V` honoring `__newindex`.
    pub fn table_set(&mut self, table: &TableRef, key: Value, value: Value) -> EngineResult<()> {
        let has_direct = !matches!(table.borrow().get(&key), Value::Nil);
        if has_direct {
            return table.borrow_mut().set(key, value);
        }
        match lookup_metamethod(table, "__newindex") {
            Some(Value::Table(meta_table)) => self.table_set(&meta_table, key, value),
            Some(callable @ (Value::Closure(_) | Value::NativeFn(_))) => {
                self.call_callable(&callable, vec![Value::Table(table.clone()), key, value])?;
                Ok(())
            }
            _ => table.borrow_mut().set(key, value),
        }
    }

    /// Arithmetic fallback through a table's metatable for ops like
    /// `__add`/`__sub`/.../`__concat`/`__unm`/`__len`.
    pub fn arith_metamethod(&mut self, name: &str, a: &Value, b: &Value) -> EngineResult<Option<Value>> {
        let handler = match a {
            Value::Table(t) => lookup_metamethod(t, name),
            _ => None,
        }
        .or_else(|| match b {
            Value::Table(t) => lookup_metamethod(t, name),
            _ => None,
        });
        match handler {
            Some(f) => {
                let results = self.call_callable(&f, vec![a.clone(), b.clone()])?;
                Ok(Some(results.into_iter().next().unwrap_or(Value::Nil)))
            }
            None => Ok(None),
        }
    }

    pub fn unary_metamethod(&mut self, name: &str, a: &Value) -> EngineResult<Option<Value>> {
        if let Value::Table(t) = a {
            if let Some(f) = lookup_metamethod(t, name) {
                let results = self.call_callable(&f, vec![a.clone(), a.clone()])?;
                return Ok(Some(results.into_iter().next().unwrap_or(Value::Nil)));
            }
        }
        Ok(None)
    }

    /// `Eq` opcode: jq's total-order equality for null/bool/number/string/
    /// array/object, raw equality plus a `__eq` fallback for Lua's
    /// reference types.
    pub fn values_eq(&mut self, a: &Value, b: &Value) -> EngineResult<bool> {
        if is_ordinal(a) && is_ordinal(b) {
            return Ok(jq_cmp(a, b) == Ordering::Equal);
        }
        if a.raw_eq(b) {
            return Ok(true);
        }
        if let (Value::Table(_), Value::Table(_)) = (a, b) {
            if let Some(v) = self.arith_metamethod("__eq", a, b)? {
                return Ok(v.is_truthy_lua());
            }
        }
        Ok(false)
    }

    pub fn values_lt(&mut self, a: &Value, b: &Value) -> EngineResult<bool> {
        if is_ordinal(a) && is_ordinal(b) {
            return Ok(jq_cmp(a, b) == Ordering::Less);
        }
        if let Some(v) = self.arith_metamethod("__lt", a, b)? {
            return Ok(v.is_truthy_lua());
        }
        Err(EngineError::arithmetic(format!(
            "attempt to compare {} with {}",
            a.type_name(),
            b.type_name()
        )))
    }

    pub fn values_le(&mut self, a: &Value, b: &Value) -> EngineResult<bool> {
        if is_ordinal(a) && is_ordinal(b) {
            return Ok(jq_cmp(a, b) != Ordering::Greater);
        }
        if let Some(v) = self.arith_metamethod("__le", a, b)? {
            return Ok(v.is_truthy_lua());
        }
        Err(EngineError::arithmetic(format!(
            "attempt to compare {} with {}",
            a.type_name(),
            b.type_name()
        )))
    }
}

#[cfg(test)]
mod metamethod_tests {
    use crate::jq::run_filter;
    use crate::lua::run_source;
    use crate::value::Value;

    #[test]
    fn jq_arrays_and_objects_compare_structurally_not_by_identity() {
        let result = run_filter("[1, 2] == [1, 2]", Value::Nil).unwrap();
        assert_eq!(result, vec![Value::Bool(true)]);
        let result = run_filter("{a: 1} == {a: 1}", Value::Nil).unwrap();
        assert_eq!(result, vec![Value::Bool(true)]);
        let result = run_filter("[1, 2] == [1, 3]", Value::Nil).unwrap();
        assert_eq!(result, vec![Value::Bool(false)]);
    }

    #[test]
    fn jq_ordering_spans_mixed_types_via_the_total_order() {
        let result = run_filter("null < false, true < 0, 0 < \"a\", \"a\" < [1], [1] < {}", Value::Nil).unwrap();
        assert_eq!(result, vec![Value::Bool(true); 5]);
    }

    #[test]
    fn lua_tables_still_compare_by_identity_not_structure() {
        let result = run_source("local a = {1, 2}; local b = {1, 2}; return a == b, a == a").unwrap();
        assert_eq!(result, vec![Value::Bool(false), Value::Bool(true)]);
    }
}
