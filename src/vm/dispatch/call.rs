//! Call family: parameters, calls, returns, closures and upvalue cells.

use crate::bytecode::Arg;
use crate::value::{new_cell, Closure, NativeOutcome, Value};
use crate::vm::{metamethod, CallFrame, EngineError, EngineResult, StepOutcome, Vm};

/// `Param src` / `ParamExpand listSrc`: queue one argument, or splat a
/// list argument, into the pending-params buffer.
pub fn exec_param(vm: &mut Vm, args: &[Arg]) -> EngineResult<StepOutcome> {
    let value = vm.resolve_struct(&args[0]);
    vm.pending_params.push(value);
    Ok(StepOutcome::Continue)
}

pub fn exec_param_expand(vm: &mut Vm, args: &[Arg]) -> EngineResult<StepOutcome> {
    let value = vm.resolve_struct(&args[0]);
    match value {
        Value::List(l) => vm.pending_params.extend(l.borrow().iter().cloned()),
        other => vm.pending_params.push(other),
    }
    Ok(StepOutcome::Continue)
}

fn push_call_frame(vm: &mut Vm, new_upvalues: Vec<crate::value::CellRef>) {
    let frame = CallFrame {
        return_pc: vm.pc + 1,
        saved_registers: std::mem::take(&mut vm.registers),
        saved_pending_params: Vec::new(),
        saved_upvalues: std::mem::replace(&mut vm.current_upvalues, new_upvalues),
        caller_debug: vm.instruction_debug(vm.pc),
        is_boundary: false,
    };
    vm.call_stack.push(frame);
}

/// `Call label`: push a frame, move pending-params to the callee's
/// parameter list, clear upvalues, jump to label. Used for direct calls
/// to top-level functions that never capture anything.
pub fn exec_call(vm: &mut Vm, args: &[Arg]) -> EngineResult<StepOutcome> {
    let label = vm.reg_name(&args[0]).to_string();
    let entry_pc = vm.labels.resolve(&label)?;
    push_call_frame(vm, Vec::new());
    vm.pc = entry_pc;
    Ok(StepOutcome::Jump)
}

/// `CallValue callee`: dispatch on the callee's runtime variant (closure,
/// native fn, or a table's `__call` metamethod).
pub fn exec_call_value(vm: &mut Vm, args: &[Arg]) -> EngineResult<StepOutcome> {
    let callee = vm.resolve_struct(&args[0]);
    match callee {
        Value::Closure(closure) => {
            let entry_pc = vm.labels.resolve(&closure.label)?;
            push_call_frame(vm, closure.upvalues.clone());
            vm.pc = entry_pc;
            Ok(StepOutcome::Jump)
        }
        Value::NativeFn(f) => {
            let call_args = std::mem::take(&mut vm.pending_params);
            match f(&call_args, vm)? {
                NativeOutcome::Single(v) => vm.last_return = vec![v],
                NativeOutcome::Multi(vs) => vm.last_return = vs,
                NativeOutcome::Yield(vs) => {
                    vm.yield_values = vs;
                    return Ok(StepOutcome::Yield);
                }
            }
            Ok(StepOutcome::Continue)
        }
        Value::Table(t) => match metamethod::lookup_metamethod(&t, "__call") {
            Some(handler) => {
                let mut call_args = vec![Value::Table(t)];
                call_args.extend(std::mem::take(&mut vm.pending_params));
                vm.last_return = vm.call_callable(&handler, call_args)?;
                Ok(StepOutcome::Continue)
            }
            None => Err(EngineError::structural("attempt to call a table value")),
        },
        other => Err(EngineError::structural(format!("attempt to call a {} value", other.type_name()))),
    }
}

/// `Arg dst`: pop one positional parameter into `dst`; missing args are `Nil`.
pub fn exec_arg(vm: &mut Vm, args: &[Arg]) -> EngineResult<StepOutcome> {
    let value = if vm.pending_params.is_empty() { Value::Nil } else { vm.pending_params.remove(0) };
    vm.set_reg(vm.reg_name(&args[0]), value);
    Ok(StepOutcome::Continue)
}

/// `Vararg dst`: captures whatever remains of the pending-params buffer
/// as a list.
pub fn exec_vararg(vm: &mut Vm, args: &[Arg]) -> EngineResult<StepOutcome> {
    let rest = std::mem::take(&mut vm.pending_params);
    vm.set_reg(vm.reg_name(&args[0]), Value::list(rest));
    Ok(StepOutcome::Continue)
}

/// `VarargFirst dst,src`: the first element of an already-captured
/// vararg list, or `Nil` if it is empty.
pub fn exec_vararg_first(vm: &mut Vm, args: &[Arg]) -> EngineResult<StepOutcome> {
    let src = vm.resolve_struct(&args[1]);
    let first = match &src {
        Value::List(l) => l.borrow().first().cloned().unwrap_or(Value::Nil),
        _ => Value::Nil,
    };
    vm.set_reg(vm.reg_name(&args[0]), first);
    Ok(StepOutcome::Continue)
}

/// Shared by `Return`/`ReturnMulti`: sets `last_return`, pops a frame, and
/// restores caller state. An absent frame (empty call stack) is a
/// top-level halt; a frame marked `is_boundary` hands control back to
/// [`Vm::call_callable`]'s driving loop instead of resuming a caller pc.
fn finish_return(vm: &mut Vm, values: Vec<Value>) -> EngineResult<StepOutcome> {
    vm.last_return = values;
    match vm.call_stack.pop() {
        None => Ok(StepOutcome::Halt),
        Some(frame) => {
            vm.registers = frame.saved_registers;
            vm.current_upvalues = frame.saved_upvalues;
            vm.pending_params = frame.saved_pending_params;
            if frame.is_boundary {
                Ok(StepOutcome::BoundaryReturn)
            } else {
                vm.pc = frame.return_pc;
                Ok(StepOutcome::Jump)
            }
        }
    }
}

pub fn exec_return(vm: &mut Vm, args: &[Arg]) -> EngineResult<StepOutcome> {
    let value = vm.resolve_struct(&args[0]);
    finish_return(vm, vec![value])
}

pub fn exec_return_multi(vm: &mut Vm, args: &[Arg]) -> EngineResult<StepOutcome> {
    let values = args.iter().map(|a| vm.resolve_struct(a)).collect();
    finish_return(vm, values)
}

/// `ReturnList src`: returns every element of a list value as the
/// function's multi-return (the inverse of `ResultList`), used when the
/// sole `return` expression is itself multi-valued.
pub fn exec_return_list(vm: &mut Vm, args: &[Arg]) -> EngineResult<StepOutcome> {
    let src = vm.resolve_struct(&args[0]);
    let values = match src {
        Value::List(l) => l.borrow().clone(),
        other => vec![other],
    };
    finish_return(vm, values)
}

pub fn exec_result(vm: &mut Vm, args: &[Arg]) -> EngineResult<StepOutcome> {
    let value = vm.last_return.first().cloned().unwrap_or(Value::Nil);
    vm.set_reg(vm.reg_name(&args[0]), value);
    Ok(StepOutcome::Continue)
}

/// `ResultMulti dsts…`: spreads `last_return` across each destination
/// register, padding shortfalls with `Nil` and discarding surplus values.
pub fn exec_result_multi(vm: &mut Vm, args: &[Arg]) -> EngineResult<StepOutcome> {
    for (i, dst) in args.iter().enumerate() {
        let value = vm.last_return.get(i).cloned().unwrap_or(Value::Nil);
        vm.set_reg(vm.reg_name(dst), value);
    }
    Ok(StepOutcome::Continue)
}

pub fn exec_result_list(vm: &mut Vm, args: &[Arg]) -> EngineResult<StepOutcome> {
    let values = vm.last_return.clone();
    vm.set_reg(vm.reg_name(&args[0]), Value::list(values));
    Ok(StepOutcome::Continue)
}

/// `MakeCell dst,src`: promotes a value to a heap-allocated, shared box;
/// subsequent reads/writes go through `CellGet`/`CellSet`.
pub fn exec_make_cell(vm: &mut Vm, args: &[Arg]) -> EngineResult<StepOutcome> {
    let init = vm.resolve_struct(&args[1]);
    let cell = new_cell(init);
    vm.set_reg(vm.reg_name(&args[0]), Value::Cell(cell));
    Ok(StepOutcome::Continue)
}

pub fn exec_cell_get(vm: &mut Vm, args: &[Arg]) -> EngineResult<StepOutcome> {
    let held = vm.resolve_struct(&args[1]);
    let value = match held {
        Value::Cell(c) => c.borrow().clone(),
        other => other,
    };
    vm.set_reg(vm.reg_name(&args[0]), value);
    Ok(StepOutcome::Continue)
}

pub fn exec_cell_set(vm: &mut Vm, args: &[Arg]) -> EngineResult<StepOutcome> {
    let held = vm.resolve_struct(&args[0]);
    let value = vm.resolve_struct(&args[1]);
    match held {
        Value::Cell(c) => {
            *c.borrow_mut() = value;
            Ok(StepOutcome::Continue)
        }
        other => Err(EngineError::structural(format!("attempt to assign through a {} value", other.type_name()))),
    }
}

/// `Closure dst,label,cells…`: bundles a function label with the cells
/// named by `cells…`, captured from the current frame.
pub fn exec_closure(vm: &mut Vm, args: &[Arg]) -> EngineResult<StepOutcome> {
    let label = vm.reg_name(&args[1]).to_string();
    let mut upvalues = Vec::with_capacity(args.len().saturating_sub(2));
    for cell_arg in &args[2..] {
        match vm.resolve_struct(cell_arg) {
            Value::Cell(c) => upvalues.push(c),
            other => upvalues.push(new_cell(other)),
        }
    }
    let closure = Closure::new(label.clone(), upvalues, label, 0, true);
    vm.set_reg(vm.reg_name(&args[0]), Value::Closure(closure));
    Ok(StepOutcome::Continue)
}

/// `BindUpvalue dst,index`: binds a register to the cell captured at
/// `index` in the running closure's upvalue list.
pub fn exec_bind_upvalue(vm: &mut Vm, args: &[Arg]) -> EngineResult<StepOutcome> {
    let index = vm.resolve_arith(&args[1]).as_i64().unwrap_or(0).max(0) as usize;
    let cell = vm.current_upvalues.get(index).cloned().unwrap_or_else(|| new_cell(Value::Nil));
    vm.set_reg(vm.reg_name(&args[0]), Value::Cell(cell));
    Ok(StepOutcome::Continue)
}

#[cfg(test)]
mod call_tests {
    use crate::lua::run_source;
    use crate::value::Value;

    #[test]
    fn a_recursive_local_function_call_runs_to_completion() {
        let result = run_source(
            r#"
            local function fact(n)
                if n <= 1 then return 1 end
                return n * fact(n - 1)
            end
            return fact(5)
            "#,
        )
        .unwrap();
        assert_eq!(result, vec![Value::Int(120)]);
    }

    #[test]
    fn a_closure_captures_its_enclosing_local_by_reference() {
        let result = run_source(
            r#"
            local function counter()
                local n = 0
                return function()
                    n = n + 1
                    return n
                end
            end
            local c = counter()
            c()
            c()
            return c()
            "#,
        )
        .unwrap();
        assert_eq!(result, vec![Value::Int(3)]);
    }

    #[test]
    fn missing_call_arguments_bind_to_nil() {
        let result = run_source(
            r#"
            local function f(a, b)
                return a, b
            end
            return f(1)
            "#,
        )
        .unwrap();
        assert_eq!(result, vec![Value::Int(1), Value::Nil]);
    }

    #[test]
    fn a_vararg_function_collects_extra_arguments_into_a_list() {
        let result = run_source(
            r#"
            local function f(...)
                local t = {...}
                return #t
            end
            return f(1, 2, 3, 4)
            "#,
        )
        .unwrap();
        assert_eq!(result, vec![Value::Int(4)]);
    }

    #[test]
    fn calling_a_non_callable_value_is_a_structural_error() {
        let err = run_source("local x = 5 return x()").unwrap_err();
        assert!(err.to_string().contains("attempt to call"));
    }
}
