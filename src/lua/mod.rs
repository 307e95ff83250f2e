//! Lua front end: lexer, parser, scope analyzer, compiler, wired into one
//! `run_source` convenience entry point.

pub mod ast;
mod compiler;
pub mod module;
mod parser;
pub mod scope;
mod token;

pub use ast::FunctionBody;
pub use scope::ScopeInfo;

use crate::bytecode::Instruction;
use crate::value::Value;
use crate::vm::{EngineFault, EngineResult, Vm};

/// Parses, analyzes and compiles `source` into a flat instruction stream,
/// ready for `Vm::new`.
pub fn compile_source(source: &str, chunk_name: &str) -> EngineResult<Vec<Instruction>> {
    let chunk = parser::parse(source)?;
    let scope_info = scope::analyze(&chunk);
    compiler::compile(&chunk, &scope_info, chunk_name)
}

/// Compiles and runs `source` in a fresh VM, returning its top-level
/// `return` values (or the empty list if the chunk falls off the end).
pub fn run_source(source: &str) -> Result<Vec<Value>, EngineFault> {
    run_source_with(source, |_vm| {})
}

/// Like [`run_source`], but lets the caller register globals/libraries on
/// the VM before execution via `setup`.
pub fn run_source_with(source: &str, setup: impl FnOnce(&mut Vm)) -> Result<Vec<Value>, EngineFault> {
    let instructions = compile_source(source, "<chunk>").map_err(|e| e.into_fault(&[]))?;
    let mut vm = Vm::new(instructions).map_err(|e| e.into_fault(&[]))?;
    setup(&mut vm);
    vm.run(false)?;
    Ok(vm.last_return.clone())
}

#[cfg(test)]
mod lua_mod_tests {
    use super::*;

    #[test]
    fn closures_capture_and_mutate_a_shared_upvalue() {
        let source = r#"
            local function make_counter()
                local n = 0
                local function inc()
                    n = n + 1
                    return n
                end
                return inc
            end
            local counter = make_counter()
            local a = counter()
            local b = counter()
            local c = counter()
            return a, b, c
        "#;
        let result = run_source(source).unwrap();
        assert_eq!(result, vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
    }

    #[test]
    fn two_closures_from_the_same_call_share_one_upvalue() {
        let source = r#"
            local function make_pair()
                local n = 0
                local function inc() n = n + 1 end
                local function get() return n end
                return inc, get
            end
            local inc, get = make_pair()
            inc()
            inc()
            return get()
        "#;
        let result = run_source(source).unwrap();
        assert_eq!(result, vec![Value::Int(2)]);
    }

    #[test]
    fn recursive_local_function_computes_factorial() {
        let source = r#"
            local function fact(n)
                if n <= 1 then return 1 end
                return n * fact(n - 1)
            end
            return fact(5)
        "#;
        let result = run_source(source).unwrap();
        assert_eq!(result, vec![Value::Int(120)]);
    }

    #[test]
    fn numeric_for_loop_counts_down_with_a_negative_step() {
        let source = r#"
            local sum = 0
            for i = 5, 1, -1 do
                sum = sum + i
            end
            return sum
        "#;
        let result = run_source(source).unwrap();
        assert_eq!(result, vec![Value::Int(15)]);
    }

    #[test]
    fn generic_for_loop_stops_when_the_iterator_returns_nil() {
        use crate::value::NativeOutcome;
        use std::rc::Rc;

        // A minimal stand-in for `ipairs`: `iter(t, i)` returns `i+1, t[i+1]`
        // until the array part runs out.
        let ipairs: crate::value::NativeFn = Rc::new(|args, _vm| {
            let Value::Table(t) = &args[0] else {
                return Err(crate::vm::EngineError::structural("ipairs expects a table"));
            };
            let i = args[1].as_i64().unwrap_or(0) + 1;
            let v = t.borrow().get(&Value::Int(i));
            if matches!(v, Value::Nil) {
                Ok(NativeOutcome::Single(Value::Nil))
            } else {
                Ok(NativeOutcome::Multi(vec![Value::Int(i), v]))
            }
        });

        let source = r#"
            local sum = 0
            for i, v in ipairs({10, 20, 30}) do
                sum = sum + v
            end
            return sum
        "#;
        let result = run_source_with(source, |vm| vm.register("ipairs", Value::NativeFn(ipairs))).unwrap();
        assert_eq!(result, vec![Value::Int(60)]);
    }

    #[test]
    fn table_constructors_and_field_access_round_trip() {
        let source = r#"
            local t = { x = 1, y = 2, [3] = "three" }
            t.x = t.x + t.y
            return t.x, t[3]
        "#;
        let result = run_source(source).unwrap();
        assert_eq!(result, vec![Value::Int(3), Value::str("three")]);
    }

    #[test]
    fn metatable_index_fallback_is_consulted_on_miss() {
        use crate::value::NativeOutcome;
        use std::rc::Rc;

        let set_metatable: crate::value::NativeFn = Rc::new(|args, _vm| {
            let (Value::Table(t), Value::Table(meta)) = (&args[0], &args[1]) else {
                return Err(crate::vm::EngineError::structural("setmetatable expects two tables"));
            };
            t.borrow_mut().metatable = Some(meta.clone());
            Ok(NativeOutcome::Single(args[0].clone()))
        });

        let source = r#"
            local base = { greet = function(self) return "hi " .. self.name end }
            local obj = setmetatable({ name = "lua" }, { __index = base })
            return obj:greet()
        "#;
        let result = run_source_with(source, |vm| vm.register("setmetatable", Value::NativeFn(set_metatable))).unwrap();
        assert_eq!(result, vec![Value::str("hi lua")]);
    }
}
