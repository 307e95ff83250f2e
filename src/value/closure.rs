//! Closures and upvalue cells.

use super::Value;
use smol_str::SmolStr;
use std::cell::RefCell;
use std::rc::Rc;

/// A heap-allocated, shared, mutable single-slot container used as a Lua
/// upvalue. Locals captured by nested closures are promoted to cells at
/// declaration; a cell lives as long as any closure
/// referencing it, which `Rc` gives us for free.
pub type Cell = RefCell<Value>;
pub type CellRef = Rc<Cell>;

pub fn new_cell(value: Value) -> CellRef {
    Rc::new(RefCell::new(value))
}

/// A bundle of a compiled function label and the cells it captures.
/// Produced by the `Closure`/`MakeClosure` opcode.
pub struct Closure {
    pub label: SmolStr,
    pub upvalues: Vec<CellRef>,
    pub debug_name: SmolStr,
    /// Number of declared positional parameters; used by `Arg`/`Vararg`
    /// lowering to know where the vararg tail begins.
    pub arity: usize,
    pub is_vararg: bool,
}

pub type ClosureRef = Rc<Closure>;

impl Closure {
    pub fn new(label: impl Into<SmolStr>, upvalues: Vec<CellRef>, debug_name: impl Into<SmolStr>, arity: usize, is_vararg: bool) -> ClosureRef {
        Rc::new(Closure {
            label: label.into(),
            upvalues,
            debug_name: debug_name.into(),
            arity,
            is_vararg,
        })
    }
}

#[cfg(test)]
mod closure_tests {
    use super::*;

    #[test]
    fn new_cell_wraps_the_given_value_and_is_independently_mutable() {
        let cell = new_cell(Value::Int(1));
        assert_eq!(*cell.borrow(), Value::Int(1));
        *cell.borrow_mut() = Value::Int(2);
        assert_eq!(*cell.borrow(), Value::Int(2));
    }

    #[test]
    fn two_closures_sharing_a_cloned_cell_see_each_others_writes() {
        let cell = new_cell(Value::Int(10));
        let other = cell.clone();
        *cell.borrow_mut() = Value::Int(20);
        assert_eq!(*other.borrow(), Value::Int(20));
    }

    #[test]
    fn closure_new_stores_its_fields_verbatim() {
        let upvalues = vec![new_cell(Value::Nil)];
        let closure = Closure::new("fn_1", upvalues, "greet", 2, true);
        assert_eq!(closure.label.as_str(), "fn_1");
        assert_eq!(closure.debug_name.as_str(), "greet");
        assert_eq!(closure.arity, 2);
        assert!(closure.is_vararg);
        assert_eq!(closure.upvalues.len(), 1);
    }
}
