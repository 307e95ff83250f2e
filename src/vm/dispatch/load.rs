//! Load/move opcodes.

use crate::bytecode::Arg;
use crate::value::Value;
use crate::vm::{EngineResult, StepOutcome, Vm};

/// `LoadImm dst,int` / `LoadConst dst,literal`: both resolve the literal
/// through the same three-step rule as any operand, so they share a body.
pub fn exec_load(vm: &mut Vm, args: &[Arg]) -> EngineResult<StepOutcome> {
    let value = vm.resolve_struct(&args[1]);
    vm.set_reg(vm.reg_name(&args[0]), value);
    Ok(StepOutcome::Continue)
}

/// `Mov dst,src`: `R[dst] := R[src]`.
pub fn exec_mov(vm: &mut Vm, args: &[Arg]) -> EngineResult<StepOutcome> {
    let value = vm.resolve_struct(&args[1]);
    vm.set_reg(vm.reg_name(&args[0]), value);
    Ok(StepOutcome::Continue)
}

/// `Clr dst`: `R[dst] := Nil`.
pub fn exec_clr(vm: &mut Vm, args: &[Arg]) -> EngineResult<StepOutcome> {
    vm.set_reg(vm.reg_name(&args[0]), Value::Nil);
    Ok(StepOutcome::Continue)
}

#[cfg(test)]
mod load_tests {
    use crate::bytecode::{Instruction, OpCode};
    use crate::value::Value;
    use crate::vm::Vm;

    #[test]
    fn mov_copies_the_current_value_not_a_future_write() {
        let instructions = vec![
            Instruction::new(OpCode::LoadImm, vec![Arg::sym("x"), Arg::Int(1)], None),
            Instruction::new(OpCode::Mov, vec![Arg::sym("y"), Arg::sym("x")], None),
            Instruction::new(OpCode::LoadImm, vec![Arg::sym("x"), Arg::Int(2)], None),
            Instruction::new(OpCode::Print, vec![Arg::sym("y")], None),
            Instruction::new(OpCode::Halt, vec![], None),
        ];
        let mut vm = Vm::new(instructions).unwrap();
        let out = vm.run(false).unwrap();
        assert_eq!(out, vec![Value::Int(1)]);
    }

    #[test]
    fn clr_resets_a_register_to_nil() {
        let instructions = vec![
            Instruction::new(OpCode::LoadImm, vec![Arg::sym("x"), Arg::Int(9)], None),
            Instruction::new(OpCode::Clr, vec![Arg::sym("x")], None),
            Instruction::new(OpCode::Print, vec![Arg::sym("x")], None),
            Instruction::new(OpCode::Halt, vec![], None),
        ];
        let mut vm = Vm::new(instructions).unwrap();
        let out = vm.run(false).unwrap();
        assert_eq!(out, vec![Value::Nil]);
    }
}
