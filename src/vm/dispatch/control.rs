//! Control-flow opcodes.

use crate::bytecode::Arg;
use crate::vm::{EngineResult, StepOutcome, Vm};

pub fn exec_jmp(vm: &mut Vm, args: &[Arg]) -> EngineResult<StepOutcome> {
    let label = vm.reg_name(&args[0]);
    vm.pc = vm.labels.resolve(label)?;
    Ok(StepOutcome::Jump)
}

/// `Jz cond,label`: jumps when `cond` is falsy.
pub fn exec_jz(vm: &mut Vm, args: &[Arg]) -> EngineResult<StepOutcome> {
    let cond = vm.resolve_struct(&args[0]);
    if !cond.is_truthy_lua() {
        let label = vm.reg_name(&args[1]);
        vm.pc = vm.labels.resolve(label)?;
        return Ok(StepOutcome::Jump);
    }
    Ok(StepOutcome::Continue)
}

/// `Jnz cond,label`: jumps when `cond` is truthy.
pub fn exec_jnz(vm: &mut Vm, args: &[Arg]) -> EngineResult<StepOutcome> {
    let cond = vm.resolve_struct(&args[0]);
    if cond.is_truthy_lua() {
        let label = vm.reg_name(&args[1]);
        vm.pc = vm.labels.resolve(label)?;
        return Ok(StepOutcome::Jump);
    }
    Ok(StepOutcome::Continue)
}

/// `JmpRel delta`: relative jump, used by loop back-edges emitted without
/// a named label.
pub fn exec_jmp_rel(vm: &mut Vm, args: &[Arg]) -> EngineResult<StepOutcome> {
    let delta = vm.resolve_arith(&args[0]).as_i64().unwrap_or(0);
    let target = (vm.pc as i64) + delta;
    vm.pc = target.max(0) as usize;
    Ok(StepOutcome::Jump)
}

/// `Label name`: no-op at runtime, consulted only by the label pre-pass.
pub fn exec_label(_vm: &mut Vm, _args: &[Arg]) -> EngineResult<StepOutcome> {
    Ok(StepOutcome::Continue)
}

pub fn exec_halt(_vm: &mut Vm, _args: &[Arg]) -> EngineResult<StepOutcome> {
    Ok(StepOutcome::Halt)
}

/// Legacy debugging escape hatch retained from the toy VMs that predate
/// the register VM; prints to the VM's output sequence.
pub fn exec_print(vm: &mut Vm, args: &[Arg]) -> EngineResult<StepOutcome> {
    let value = vm.resolve_struct(&args[0]);
    vm.output.push(value);
    Ok(StepOutcome::Continue)
}

#[cfg(test)]
mod control_tests {
    use super::*;
    use crate::bytecode::{Instruction, OpCode};
    use crate::value::Value;
    use crate::vm::Vm;

    #[test]
    fn jz_jumps_only_when_falsy() {
        let instructions = vec![
            Instruction::new(OpCode::LoadImm, vec![Arg::sym("cond"), Arg::Bool(false)], None),
            Instruction::new(OpCode::Jz, vec![Arg::sym("cond"), Arg::sym("target")], None),
            Instruction::new(OpCode::LoadImm, vec![Arg::sym("hit"), Arg::Bool(true)], None),
            Instruction::label("target"),
            Instruction::new(OpCode::Halt, vec![], None),
        ];
        let mut vm = Vm::new(instructions).unwrap();
        vm.run(false).unwrap();
        assert!(matches!(vm.registers.get("hit"), None));
    }

    #[test]
    fn print_appends_to_output() {
        let instructions = vec![
            Instruction::new(OpCode::LoadImm, vec![Arg::sym("x"), Arg::Int(7)], None),
            Instruction::new(OpCode::Print, vec![Arg::sym("x")], None),
            Instruction::new(OpCode::Halt, vec![], None),
        ];
        let mut vm = Vm::new(instructions).unwrap();
        let out = vm.run(false).unwrap();
        assert_eq!(out, vec![Value::Int(7)]);
    }
}
