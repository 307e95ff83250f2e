//! Comparison and logic opcodes.

use crate::bytecode::Arg;
use crate::value::Value;
use crate::vm::{jq_cmp, EngineResult, StepOutcome, Vm};

pub fn exec_eq(vm: &mut Vm, args: &[Arg]) -> EngineResult<StepOutcome> {
    let a = vm.resolve_struct(&args[1]);
    let b = vm.resolve_struct(&args[2]);
    let result = vm.values_eq(&a, &b)?;
    vm.set_reg(vm.reg_name(&args[0]), Value::Bool(result));
    Ok(StepOutcome::Continue)
}

pub fn exec_lt(vm: &mut Vm, args: &[Arg]) -> EngineResult<StepOutcome> {
    let a = vm.resolve_struct(&args[1]);
    let b = vm.resolve_struct(&args[2]);
    let result = vm.values_lt(&a, &b)?;
    vm.set_reg(vm.reg_name(&args[0]), Value::Bool(result));
    Ok(StepOutcome::Continue)
}

pub fn exec_gt(vm: &mut Vm, args: &[Arg]) -> EngineResult<StepOutcome> {
    let a = vm.resolve_struct(&args[1]);
    let b = vm.resolve_struct(&args[2]);
    let result = vm.values_lt(&b, &a)?;
    vm.set_reg(vm.reg_name(&args[0]), Value::Bool(result));
    Ok(StepOutcome::Continue)
}

/// `CmpImm dst,a,b`: three-way comparison, `-1/0/1`, using jq's total
/// order so it is meaningful across mixed types too.
pub fn exec_cmp_imm(vm: &mut Vm, args: &[Arg]) -> EngineResult<StepOutcome> {
    let a = vm.resolve_struct(&args[1]);
    let b = vm.resolve_struct(&args[2]);
    let ord = jq_cmp(&a, &b) as i64;
    vm.set_reg(vm.reg_name(&args[0]), Value::Int(ord));
    Ok(StepOutcome::Continue)
}

pub fn exec_and(vm: &mut Vm, args: &[Arg]) -> EngineResult<StepOutcome> {
    let a = vm.resolve_struct(&args[1]);
    let result = if a.is_truthy_lua() { vm.resolve_struct(&args[2]) } else { a };
    vm.set_reg(vm.reg_name(&args[0]), result);
    Ok(StepOutcome::Continue)
}

pub fn exec_or(vm: &mut Vm, args: &[Arg]) -> EngineResult<StepOutcome> {
    let a = vm.resolve_struct(&args[1]);
    let result = if a.is_truthy_lua() { a } else { vm.resolve_struct(&args[2]) };
    vm.set_reg(vm.reg_name(&args[0]), result);
    Ok(StepOutcome::Continue)
}

pub fn exec_not(vm: &mut Vm, args: &[Arg]) -> EngineResult<StepOutcome> {
    let a = vm.resolve_struct(&args[1]);
    vm.set_reg(vm.reg_name(&args[0]), Value::Bool(!a.is_truthy_lua()));
    Ok(StepOutcome::Continue)
}

/// `Coalesce dst,a,b` (jq `//`) → `a` if truthy (not `Nil`/`false`),
/// else `b`.
pub fn exec_coalesce(vm: &mut Vm, args: &[Arg]) -> EngineResult<StepOutcome> {
    let a = vm.resolve_struct(&args[1]);
    let result = if a.is_truthy_jq() { a } else { vm.resolve_struct(&args[2]) };
    vm.set_reg(vm.reg_name(&args[0]), result);
    Ok(StepOutcome::Continue)
}

#[cfg(test)]
mod compare_tests {
    use crate::jq::run_filter;
    use crate::lua::run_source;
    use crate::value::Value;

    #[test]
    fn jq_total_order_ranks_types_before_values() {
        // null < false < true < number < string < array < object
        assert_eq!(run_filter("null < false", Value::Nil).unwrap(), vec![Value::Bool(true)]);
        assert_eq!(run_filter("false < true", Value::Nil).unwrap(), vec![Value::Bool(true)]);
        assert_eq!(run_filter("true < 0", Value::Nil).unwrap(), vec![Value::Bool(true)]);
        assert_eq!(run_filter(r#"0 < "a""#, Value::Nil).unwrap(), vec![Value::Bool(true)]);
        assert_eq!(run_filter(r#""a" < [1]"#, Value::Nil).unwrap(), vec![Value::Bool(true)]);
        assert_eq!(run_filter("[1] < {}", Value::Nil).unwrap(), vec![Value::Bool(true)]);
    }

    #[test]
    fn lua_and_or_short_circuit_and_return_operand_values() {
        let result = run_source("return false and 1, false or 2, nil and 3").unwrap();
        assert_eq!(result, vec![Value::Bool(false), Value::Int(2), Value::Nil]);
    }

    #[test]
    fn lua_not_only_treats_nil_and_false_as_falsy() {
        let result = run_source("return not nil, not false, not 0, not \"\"").unwrap();
        assert_eq!(result, vec![Value::Bool(true), Value::Bool(true), Value::Bool(false), Value::Bool(false)]);
    }

    #[test]
    fn jq_coalesce_falls_through_on_false_and_null_but_not_zero() {
        assert_eq!(run_filter("false // 1", Value::Nil).unwrap(), vec![Value::Int(1)]);
        assert_eq!(run_filter("null // 1", Value::Nil).unwrap(), vec![Value::Int(1)]);
        assert_eq!(run_filter("0 // 1", Value::Nil).unwrap(), vec![Value::Int(0)]);
    }
}
