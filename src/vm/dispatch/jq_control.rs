//! jq control opcodes.

use crate::bytecode::Arg;
use crate::value::Value;
use crate::vm::jq_support::jq_display;
use crate::vm::{EngineError, EngineResult, StepOutcome, TryFrame, Vm};
use smol_str::SmolStr;

/// `PushEmit target`: the target register must already hold a `List`;
/// the compiler always seeds it with a fresh empty list before pushing.
pub fn exec_push_emit(vm: &mut Vm, args: &[Arg]) -> EngineResult<StepOutcome> {
    match vm.resolve_struct(&args[0]) {
        Value::List(l) => {
            vm.emit_stack.push(l);
            Ok(StepOutcome::Continue)
        }
        other => Err(EngineError::semantic(format!(
            "PushEmit target must be a list, got {}",
            other.type_name()
        ))),
    }
}

pub fn exec_pop_emit(vm: &mut Vm, _args: &[Arg]) -> EngineResult<StepOutcome> {
    vm.emit_stack.pop();
    Ok(StepOutcome::Continue)
}

/// `Emit v`: appends to the buffer at the top of the emit stack, or to
/// the VM's top-level output sequence when the emit stack is empty.
pub fn exec_emit(vm: &mut Vm, args: &[Arg]) -> EngineResult<StepOutcome> {
    let value = vm.resolve_struct(&args[0]);
    match vm.emit_stack.last() {
        Some(buf) => buf.borrow_mut().push(value),
        None => vm.output.push(value),
    }
    Ok(StepOutcome::Continue)
}

/// `TryBegin catch,errReg,bufReg`: opens a try region, recording the
/// call-stack and emit-stack depths to unwind to on error. `bufReg` is
/// accepted for symmetry with the textual bytecode form but carries no
/// additional state beyond what `errReg` and the recorded depths give
/// `catch_or_propagate`.
pub fn exec_try_begin(vm: &mut Vm, args: &[Arg]) -> EngineResult<StepOutcome> {
    let label = args[0]
        .as_sym()
        .ok_or_else(|| EngineError::semantic("TryBegin expects a label argument"))?;
    let catch_pc = vm.labels.resolve(label)?;
    let err_reg = SmolStr::new(vm.reg_name(&args[1]));
    vm.try_stack.push(TryFrame {
        catch_pc,
        err_reg,
        call_stack_depth: vm.call_stack.len(),
        emit_stack_depth: vm.emit_stack.len(),
    });
    Ok(StepOutcome::Continue)
}

pub fn exec_try_end(vm: &mut Vm, _args: &[Arg]) -> EngineResult<StepOutcome> {
    vm.try_stack.pop();
    Ok(StepOutcome::Continue)
}

/// `Input dst`: pulls the next host-supplied JSON value; exhaustion is
/// a control-flow error, matching jq's `input` at end of stream.
pub fn exec_input(vm: &mut Vm, args: &[Arg]) -> EngineResult<StepOutcome> {
    let value = vm
        .inputs
        .pop_front()
        .ok_or_else(|| EngineError::control_flow("No more inputs"))?;
    vm.current_input_index += 1;
    vm.set_reg(vm.reg_name(&args[0]), value);
    Ok(StepOutcome::Continue)
}

/// `Inputs dst`: drains every remaining host-supplied value into a
/// list; the compiler lowers jq's `inputs` generator into a loop over
/// this list.
pub fn exec_inputs(vm: &mut Vm, args: &[Arg]) -> EngineResult<StepOutcome> {
    let drained: Vec<Value> = vm.inputs.drain(..).collect();
    vm.current_input_index += drained.len();
    vm.set_reg(vm.reg_name(&args[0]), Value::list(drained));
    Ok(StepOutcome::Continue)
}

pub fn exec_halt_now(_vm: &mut Vm, _args: &[Arg]) -> EngineResult<StepOutcome> {
    Ok(StepOutcome::Halt)
}

/// `HaltError msg`: records the halting message for the embedder to
/// read off `Vm.halt_error` and stops the run loop.
pub fn exec_halt_error(vm: &mut Vm, args: &[Arg]) -> EngineResult<StepOutcome> {
    let msg = vm.resolve_struct(&args[0]);
    vm.halt_error = Some(jq_display(&msg));
    Ok(StepOutcome::Halt)
}

#[cfg(test)]
mod jq_control_tests {
    use crate::jq::{run_filter, run_filter_with};
    use crate::value::Value;

    #[test]
    fn map_builds_its_result_through_the_emit_buffer() {
        let result = run_filter("map(. * 2)", Value::list(vec![Value::Int(1), Value::Int(2), Value::Int(3)])).unwrap();
        assert_eq!(result, vec![Value::list(vec![Value::Int(2), Value::Int(4), Value::Int(6)])]);
    }

    #[test]
    fn input_exhaustion_is_a_control_flow_error() {
        let err = run_filter("input", Value::Nil).unwrap_err();
        assert!(err.to_string().contains("No more inputs"));
    }

    #[test]
    fn inputs_drains_every_remaining_value_into_one_list() {
        let result = run_filter_with("[inputs]", Value::Nil, vec![Value::Int(1), Value::Int(2)], |_vm| {}).unwrap();
        assert_eq!(result, vec![Value::list(vec![Value::Int(1), Value::Int(2)])]);
    }

    #[test]
    fn halt_error_stops_the_run_and_records_the_message() {
        let result = run_filter(r#"halt_error("boom")"#, Value::Nil).unwrap();
        assert!(result.is_empty());
    }
}
