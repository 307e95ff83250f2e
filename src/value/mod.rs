//! Tagged value representation shared by both front ends.
//!
//! A plain Rust sum type rather than a packed tagged union: the engine
//! favors exhaustiveness checking over bit-packing tricks.

mod closure;
mod coroutine;
#[cfg(feature = "serde")]
mod json;
mod object;
mod table;

pub use closure::{new_cell, Cell, CellRef, Closure, ClosureRef};
pub use coroutine::{Coroutine, CoroutineRef, CoroutineStatus};
#[cfg(feature = "serde")]
pub use json::{from_json, to_json};
pub use object::{new_object, new_object_ref, JsonObject, ObjectRef};
pub use table::{new_table_ref, LuaTable, TableKey, TableRef};

use crate::vm::{EngineError, EngineResult, Vm};
use smol_str::SmolStr;
use std::rc::Rc;

/// A native function registered by the embedder.
///
/// `fn(args: &[Value], vm: &mut Vm) -> Value | MultiReturn(list) | YieldMarker(list)`
pub type NativeFn = Rc<dyn Fn(&[Value], &mut Vm) -> EngineResult<NativeOutcome>>;

/// What a [`NativeFn`] hands back to its caller.
#[derive(Clone)]
pub enum NativeOutcome {
    Single(Value),
    Multi(Vec<Value>),
    Yield(Vec<Value>),
}

/// The dynamically typed value every register holds.
#[derive(Clone)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(SmolStr),
    List(Rc<std::cell::RefCell<Vec<Value>>>),
    Object(ObjectRef),
    Table(TableRef),
    Closure(ClosureRef),
    NativeFn(NativeFn),
    Cell(CellRef),
    Coroutine(CoroutineRef),
    /// Transient sentinel produced only by `coroutine.yield`; never stored
    /// in a user-visible location.
    YieldMarker(Vec<Value>),
}

impl Value {
    pub fn list(items: Vec<Value>) -> Value {
        Value::List(Rc::new(std::cell::RefCell::new(items)))
    }

    pub fn table(t: LuaTable) -> Value {
        Value::Table(Rc::new(std::cell::RefCell::new(t)))
    }

    pub fn str(s: impl Into<SmolStr>) -> Value {
        Value::Str(s.into())
    }

    /// Lua truthiness: only `Nil` and `Bool(false)` are false.
    pub fn is_truthy_lua(&self) -> bool {
        !matches!(self, Value::Nil | Value::Bool(false))
    }

    /// jq truthiness is the same as Lua's; the integer-zero-is-false
    /// special case only applies at specific loop-termination opcodes,
    /// not to the value itself, so it is not modeled here.
    pub fn is_truthy_jq(&self) -> bool {
        self.is_truthy_lua()
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "boolean",
            Value::Int(_) | Value::Float(_) => "number",
            Value::Str(_) => "string",
            Value::List(_) => "array",
            Value::Object(_) => "object",
            Value::Table(_) => "table",
            Value::Closure(_) | Value::NativeFn(_) => "function",
            Value::Cell(_) => "cell",
            Value::Coroutine(_) => "thread",
            Value::YieldMarker(_) => "yield-marker",
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Lua `tostring` coercion used by `Concat`.
    pub fn lua_tostring(&self) -> SmolStr {
        match self {
            Value::Nil => SmolStr::new_static("nil"),
            Value::Bool(true) => SmolStr::new_static("true"),
            Value::Bool(false) => SmolStr::new_static("false"),
            Value::Int(i) => {
                let mut buf = itoa::Buffer::new();
                SmolStr::new(buf.format(*i))
            }
            Value::Float(f) => SmolStr::new(format_lua_float(*f)),
            Value::Str(s) => s.clone(),
            Value::Table(_) => SmolStr::new_static("table"),
            Value::Closure(_) | Value::NativeFn(_) => SmolStr::new_static("function"),
            Value::Coroutine(_) => SmolStr::new_static("thread"),
            Value::List(_) => SmolStr::new_static("array"),
            Value::Object(_) => SmolStr::new_static("object"),
            Value::Cell(_) => SmolStr::new_static("cell"),
            Value::YieldMarker(_) => SmolStr::new_static("yield-marker"),
        }
    }

    /// Raw (non-metamethod) equality used by map keys and `Eq` before the
    /// VM tries a `__eq` metamethod fallback.
    pub fn raw_eq(&self, other: &Value) -> bool {
        use Value::*;
        match (self, other) {
            (Nil, Nil) => true,
            (Bool(a), Bool(b)) => a == b,
            (Int(a), Int(b)) => a == b,
            (Float(a), Float(b)) => a == b,
            (Int(a), Float(b)) | (Float(b), Int(a)) => (*a as f64) == *b,
            (Str(a), Str(b)) => a == b,
            (Table(a), Table(b)) => Rc::ptr_eq(a, b),
            (Closure(a), Closure(b)) => Rc::ptr_eq(a, b),
            (Coroutine(a), Coroutine(b)) => Rc::ptr_eq(a, b),
            (List(a), List(b)) => Rc::ptr_eq(a, b),
            (Object(a), Object(b)) => Rc::ptr_eq(a, b),
            (Cell(a), Cell(b)) => Rc::ptr_eq(a, b),
            (NativeFn(a), NativeFn(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    pub fn to_table_key(&self) -> EngineResult<TableKey> {
        table::to_table_key(self)
    }
}

pub fn format_lua_float(f: f64) -> String {
    if f.is_nan() {
        "nan".to_string()
    } else if f.is_infinite() {
        if f > 0.0 { "inf".to_string() } else { "-inf".to_string() }
    } else if f.fract() == 0.0 && f.abs() < 1e15 {
        format!("{:.1}", f)
    } else {
        format!("{}", f)
    }
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::List(l) => write!(f, "{:?}", l.borrow()),
            Value::Object(o) => write!(f, "{:?}", o.borrow()),
            Value::Table(_) => write!(f, "<table>"),
            Value::Closure(c) => write!(f, "<function {}>", c.debug_name),
            Value::NativeFn(_) => write!(f, "<native function>"),
            Value::Cell(c) => write!(f, "<cell {:?}>", c.borrow()),
            Value::Coroutine(co) => write!(f, "<thread {}>", co.borrow().id),
            Value::YieldMarker(v) => write!(f, "<yield {v:?}>"),
        }
    }
}

/// Structural equality, distinct from [`Value::raw_eq`]: lists and objects
/// compare by contents rather than by `Rc` identity, so test assertions and
/// other Rust-side comparisons see the same equality a `Vec`/`HashMap`
/// would. The genuinely reference-typed variants (`Table`, `Closure`,
/// `Coroutine`, `NativeFn`, `Cell`) still compare by identity — there is no
/// other sensible notion of equality for a Lua table or a native function.
impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        use Value::*;
        match (self, other) {
            (Nil, Nil) => true,
            (Bool(a), Bool(b)) => a == b,
            (Int(a), Int(b)) => a == b,
            (Float(a), Float(b)) => a == b,
            (Int(a), Float(b)) | (Float(b), Int(a)) => (*a as f64) == *b,
            (Str(a), Str(b)) => a == b,
            (List(a), List(b)) => *a.borrow() == *b.borrow(),
            (Object(a), Object(b)) => {
                let (ab, bb) = (a.borrow(), b.borrow());
                ab.len() == bb.len() && ab.iter().all(|(k, v)| bb.get(k.as_str()) == Some(v))
            }
            (Table(a), Table(b)) => Rc::ptr_eq(a, b),
            (Closure(a), Closure(b)) => Rc::ptr_eq(a, b),
            (NativeFn(a), NativeFn(b)) => Rc::ptr_eq(a, b),
            (Cell(a), Cell(b)) => Rc::ptr_eq(a, b),
            (Coroutine(a), Coroutine(b)) => Rc::ptr_eq(a, b),
            (YieldMarker(a), YieldMarker(b)) => a == b,
            _ => false,
        }
    }
}

pub fn nil_is_absent(v: &Value) -> bool {
    matches!(v, Value::Nil)
}

pub fn engine_type_error(op: &str, v: &Value) -> EngineError {
    EngineError::runtime(format!("attempt to {op} a {} value", v.type_name()))
}

#[cfg(test)]
mod value_tests {
    use super::*;

    #[test]
    fn only_nil_and_false_are_falsy() {
        assert!(!Value::Nil.is_truthy_lua());
        assert!(!Value::Bool(false).is_truthy_lua());
        assert!(Value::Bool(true).is_truthy_lua());
        assert!(Value::Int(0).is_truthy_lua());
        assert!(Value::str("").is_truthy_lua());
        assert!(Value::list(Vec::new()).is_truthy_lua());
    }

    #[test]
    fn jq_truthiness_matches_lua_truthiness() {
        for v in [Value::Nil, Value::Bool(false), Value::Bool(true), Value::Int(0), Value::str("")] {
            assert_eq!(v.is_truthy_lua(), v.is_truthy_jq());
        }
    }

    #[test]
    fn raw_eq_compares_ints_and_floats_numerically() {
        assert!(Value::Int(2).raw_eq(&Value::Float(2.0)));
        assert!(!Value::Int(2).raw_eq(&Value::Float(2.5)));
    }

    #[test]
    fn raw_eq_on_reference_types_is_identity_not_structural() {
        let a = Value::list(vec![Value::Int(1)]);
        let b = Value::list(vec![Value::Int(1)]);
        assert!(!a.raw_eq(&b));
        let c = a.clone();
        assert!(a.raw_eq(&c));
    }

    #[test]
    fn lua_tostring_formats_integers_and_floats() {
        assert_eq!(Value::Int(42).lua_tostring().as_str(), "42");
        assert_eq!(Value::Float(1.0).lua_tostring().as_str(), "1.0");
        assert_eq!(Value::Nil.lua_tostring().as_str(), "nil");
    }

    #[test]
    fn as_i64_accepts_integral_floats_only() {
        assert_eq!(Value::Float(3.0).as_i64(), Some(3));
        assert_eq!(Value::Float(3.5).as_i64(), None);
    }
}
