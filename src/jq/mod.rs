//! jq front end: lexer, parser, compiler, wired into
//! a `run_filter` convenience entry point mirroring
//! `crate::lua::run_source`'s shape, adapted for jq's input-stream model
//! (a filter consumes zero or more host-supplied JSON values rather than
//! returning a single chunk result).

pub mod ast;
mod compiler;
mod parser;
mod token;

pub use ast::JqNode;

use crate::bytecode::Instruction;
use crate::value::Value;
use crate::vm::{EngineFault, EngineResult, Vm};

/// Parses and compiles a jq filter source string into a flat instruction
/// stream, ready for `Vm::new`.
pub fn compile_source(source: &str) -> EngineResult<Vec<Instruction>> {
    let ast = parser::parse(source)?;
    compiler::compile(ast)
}

/// Compiles `filter` and runs it against a single JSON `input`, returning
/// every value the filter emits.
pub fn run_filter(filter: &str, input: Value) -> Result<Vec<Value>, EngineFault> {
    run_filter_with(filter, input, Vec::new(), |_vm| {})
}

/// Like [`run_filter`], but also seeds the `input`/`inputs` stream
/// (`extra_inputs`) and lets the caller register globals/libraries on the
/// VM before execution.
pub fn run_filter_with(
    filter: &str,
    input: Value,
    extra_inputs: Vec<Value>,
    setup: impl FnOnce(&mut Vm),
) -> Result<Vec<Value>, EngineFault> {
    let instructions = compile_source(filter).map_err(|e| e.into_fault(&[]))?;
    let mut vm = Vm::new(instructions).map_err(|e| e.into_fault(&[]))?;
    vm.set_reg(compiler::input_register(), input);
    vm.inputs.extend(extra_inputs);
    setup(&mut vm);
    vm.run(false)
}

#[cfg(test)]
mod jq_mod_tests {
    use super::*;
    use crate::value::{new_object, Value};

    #[test]
    fn identity_filter_passes_the_input_through() {
        let result = run_filter(".", Value::Int(42)).unwrap();
        assert_eq!(result, vec![Value::Int(42)]);
    }

    #[test]
    fn field_and_index_access_chain() {
        let input = new_object(vec![("items".into(), Value::list(vec![Value::Int(1), Value::Int(2), Value::Int(3)]))]);
        let result = run_filter(".items[1]", input).unwrap();
        assert_eq!(result, vec![Value::Int(2)]);
    }

    #[test]
    fn iterator_maps_over_every_element() {
        let input = Value::list(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        let result = run_filter(".[] | . * 2", input).unwrap();
        assert_eq!(result, vec![Value::Int(2), Value::Int(4), Value::Int(6)]);
    }

    #[test]
    fn variable_binding_with_as() {
        let input = new_object(vec![("a".into(), Value::Int(3)), ("b".into(), Value::Int(4))]);
        let result = run_filter(".a as $x | $x + .b", input).unwrap();
        assert_eq!(result, vec![Value::Int(7)]);
    }

    #[test]
    fn coalesce_falls_through_on_false_and_null() {
        let result = run_filter("false // 5", Value::Nil).unwrap();
        assert_eq!(result, vec![Value::Int(5)]);
        let result = run_filter("null // 5", Value::Nil).unwrap();
        assert_eq!(result, vec![Value::Int(5)]);
        let result = run_filter("0 // 5", Value::Nil).unwrap();
        assert_eq!(result, vec![Value::Int(0)]);
    }

    #[test]
    fn try_catch_recovers_from_an_arithmetic_error() {
        let result = run_filter("try (1 / 0) catch .", Value::Nil).unwrap();
        assert_eq!(result, vec![Value::str("attempt to perform 'n/0'")]);
    }
}
