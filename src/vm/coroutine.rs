//! The cooperative coroutine scheduler: a lazily-built inner VM stepper, a
//! resume-until-yield loop driven by the `YieldMarker` return path from the
//! `coroutine.yield` native fn, and a global-mirroring handshake around
//! every resume.

use crate::value::{ClosureRef, Coroutine, CoroutineRef, CoroutineStatus, NativeFn, NativeOutcome, Value};
use crate::vm::{CoroutineEvent, EngineError, EngineResult, StepOutcome, Vm};
use std::rc::Rc;

/// Owns the inner VM's register/call-stack state for one coroutine's
/// stepper; opaque outside this module.
pub struct InnerThread {
    vm: Vm,
}

/// `coroutine.create(f)`: allocates an id and emits `CoroutineCreated`.
pub fn create(vm: &mut Vm, closure: ClosureRef) -> CoroutineRef {
    let id = vm.allocate_coroutine_id();
    let parent_id = vm.current_coroutine.as_ref().map(|c| c.borrow().id);
    vm.events.push(CoroutineEvent::Created { id });
    Rc::new(std::cell::RefCell::new(Coroutine::new(id, parent_id, closure)))
}

/// `coroutine.resume(co, args...)`.
///
/// Returns `Ok(values)` for both a yield and a natural return (the caller
/// distinguishes them, if it needs to, via `co.status()` after the call);
/// `Err(message)` covers the dead/running refusals and any runtime error,
/// all of which the embedding surfaces as `(false, message)`.
pub fn resume(vm: &mut Vm, co: &CoroutineRef, args: Vec<Value>) -> EngineResult<Vec<Value>> {
    {
        let status = co.borrow().status;
        match status {
            CoroutineStatus::Dead => return Err(EngineError::control_flow("cannot resume dead coroutine")),
            CoroutineStatus::Running => return Err(EngineError::control_flow("coroutine is already running")),
            CoroutineStatus::Suspended => {}
        }
    }

    let id = co.borrow().id;
    let started = co.borrow().started;
    if !started {
        let closure = co.borrow().closure.clone();
        let mut inner = Vm::new_child(Rc::clone(&vm.instructions), Rc::clone(&vm.labels));
        let entry_pc = inner.labels.resolve(&closure.label)?;
        inner.pc = entry_pc;
        inner.current_upvalues = closure.upvalues.clone();
        inner.pending_params = args;
        co.borrow_mut().inner = Some(InnerThread { vm: inner });
        co.borrow_mut().started = true;
    } else {
        let mut co_mut = co.borrow_mut();
        let inner = co_mut.inner.as_mut().expect("resumed coroutine missing inner thread");
        // Resuming a suspended coroutine continues execution right after the
        // `coroutine.yield` call that suspended it; the resume arguments become
        // that call's result, exactly like any other native fn's return value.
        inner.vm.last_return = args;
    }

    co.borrow_mut().status = CoroutineStatus::Running;
    let previous = vm.current_coroutine.replace(Rc::clone(co));
    vm.sync_globals_into(&mut co.borrow_mut().inner.as_mut().unwrap().vm);
    vm.events.push(CoroutineEvent::Resumed { id });

    let outcome = drive(co);

    {
        let mut co_mut = co.borrow_mut();
        let inner_vm = &co_mut.inner.as_ref().unwrap().vm;
        let mut globals = Vec::new();
        for (k, v) in inner_vm.registers.iter() {
            if k.starts_with(crate::vm::GLOBAL_PREFIX) {
                globals.push((k.clone(), v.clone()));
            }
        }
        drop(co_mut);
        for (k, v) in globals {
            vm.registers.insert(k, v);
        }
    }
    vm.current_coroutine = previous;

    match outcome {
        DriveOutcome::Yielded(values) => {
            co.borrow_mut().status = CoroutineStatus::Suspended;
            co.borrow_mut().awaiting_resume = true;
            co.borrow_mut().last_yield = values.clone();
            vm.events.push(CoroutineEvent::Yielded { id });
            Ok(values)
        }
        DriveOutcome::Returned(values) => {
            co.borrow_mut().status = CoroutineStatus::Dead;
            vm.events.push(CoroutineEvent::Completed { id });
            Ok(values)
        }
        DriveOutcome::Errored(fault) => {
            co.borrow_mut().status = CoroutineStatus::Dead;
            co.borrow_mut().last_error = Some(fault.clone());
            vm.events.push(CoroutineEvent::Completed { id });
            Err(EngineError { kind: fault.kind, message: fault.message })
        }
    }
}

enum DriveOutcome {
    Yielded(Vec<Value>),
    Returned(Vec<Value>),
    Errored(crate::vm::EngineFault),
}

/// Steps the coroutine's inner VM until it yields, halts with an empty
/// call stack, or errors.
fn drive(co: &CoroutineRef) -> DriveOutcome {
    loop {
        let step_result = {
            let mut co_mut = co.borrow_mut();
            let inner = co_mut.inner.as_mut().unwrap();
            inner.vm.step()
        };
        match step_result {
            Ok(StepOutcome::Halt) => {
                let values = co.borrow().inner.as_ref().unwrap().vm.last_return.clone();
                return DriveOutcome::Returned(values);
            }
            Ok(StepOutcome::Yield) => {
                let values = co.borrow().inner.as_ref().unwrap().vm.yield_values.clone();
                return DriveOutcome::Yielded(values);
            }
            Ok(_) => continue,
            Err(e) => {
                let fault = {
                    let co_ref = co.borrow();
                    co_ref.inner.as_ref().unwrap().vm.wrap_error(e)
                };
                return DriveOutcome::Errored(fault);
            }
        }
    }
}

/// The `coroutine.yield` native fn: returns a [`NativeOutcome::Yield`],
/// which `CallValue`'s native-fn arm recognizes and turns into
/// [`StepOutcome::Yield`].
pub fn yield_builtin() -> NativeFn {
    Rc::new(|args: &[Value], _vm: &mut Vm| -> EngineResult<NativeOutcome> {
        Ok(NativeOutcome::Yield(args.to_vec()))
    })
}

/// `coroutine.create(f)` as a registerable native fn.
pub fn create_builtin() -> NativeFn {
    Rc::new(|args: &[Value], vm: &mut Vm| -> EngineResult<NativeOutcome> {
        match args.first() {
            Some(Value::Closure(c)) => {
                let co = create(vm, c.clone());
                Ok(NativeOutcome::Single(Value::Coroutine(co)))
            }
            _ => Err(EngineError::structural("coroutine.create expects a function")),
        }
    })
}

/// `coroutine.resume(co, ...)`, returning the Lua `(ok, ...)` convention.
pub fn resume_builtin() -> NativeFn {
    Rc::new(|args: &[Value], vm: &mut Vm| -> EngineResult<NativeOutcome> {
        let Some(Value::Coroutine(co)) = args.first() else {
            return Err(EngineError::structural("coroutine.resume expects a thread"));
        };
        let call_args = args[1..].to_vec();
        match resume(vm, co, call_args) {
            Ok(values) => {
                let mut out = vec![Value::Bool(true)];
                out.extend(values);
                Ok(NativeOutcome::Multi(out))
            }
            Err(e) => Ok(NativeOutcome::Multi(vec![Value::Bool(false), Value::str(e.message)])),
        }
    })
}

pub fn status_builtin() -> NativeFn {
    Rc::new(|args: &[Value], _vm: &mut Vm| -> EngineResult<NativeOutcome> {
        let Some(Value::Coroutine(co)) = args.first() else {
            return Err(EngineError::structural("coroutine.status expects a thread"));
        };
        let name = match co.borrow().status {
            CoroutineStatus::Suspended => "suspended",
            CoroutineStatus::Running => "running",
            CoroutineStatus::Dead => "dead",
        };
        Ok(NativeOutcome::Single(Value::str(name)))
    })
}

/// `coroutine.wrap(f)`: like `create`, but returns a callable that resumes
/// the coroutine directly and raises instead of returning an `ok` flag.
pub fn wrap_builtin() -> NativeFn {
    Rc::new(|args: &[Value], vm: &mut Vm| -> EngineResult<NativeOutcome> {
        match args.first() {
            Some(Value::Closure(c)) => {
                let co = create(vm, c.clone());
                let wrapped: NativeFn = Rc::new(move |call_args: &[Value], vm: &mut Vm| -> EngineResult<NativeOutcome> {
                    match resume(vm, &co, call_args.to_vec()) {
                        Ok(values) => Ok(NativeOutcome::Multi(values)),
                        Err(e) => Err(e),
                    }
                });
                Ok(NativeOutcome::Single(Value::NativeFn(wrapped)))
            }
            _ => Err(EngineError::structural("coroutine.wrap expects a function")),
        }
    })
}

#[cfg(test)]
mod coroutine_tests {
    use crate::lua::run_source_with;
    use crate::value::Value;

    fn install(vm: &mut crate::vm::Vm) {
        vm.register_library(
            "coroutine",
            &[
                ("create", create_builtin()),
                ("resume", resume_builtin()),
                ("yield", yield_builtin()),
                ("status", status_builtin()),
                ("wrap", wrap_builtin()),
            ],
        );
    }

    #[test]
    fn yield_and_resume_round_trip_values_both_ways() {
        let source = r#"
            local co = coroutine.create(function(x)
                local y = coroutine.yield(x + 1)
                return y + 100
            end)
            local ok1, a = coroutine.resume(co, 5)
            local ok2, b = coroutine.resume(co, 10)
            return a, b
        "#;
        let result = run_source_with(source, install).unwrap();
        assert_eq!(result, vec![Value::Int(6), Value::Int(110)]);
    }

    #[test]
    fn status_reflects_suspended_then_dead() {
        let source = r#"
            local co = coroutine.create(function()
                coroutine.yield()
            end)
            local before = coroutine.status(co)
            coroutine.resume(co)
            local mid = coroutine.status(co)
            coroutine.resume(co)
            local after = coroutine.status(co)
            return before, mid, after
        "#;
        let result = run_source_with(source, install).unwrap();
        assert_eq!(result, vec![Value::str("suspended"), Value::str("suspended"), Value::str("dead")]);
    }

    #[test]
    fn resuming_a_dead_coroutine_reports_failure() {
        let source = r#"
            local co = coroutine.create(function() return 1 end)
            coroutine.resume(co)
            local ok, err = coroutine.resume(co)
            return ok, err
        "#;
        let result = run_source_with(source, install).unwrap();
        assert_eq!(result[0], Value::Bool(false));
        assert!(matches!(&result[1], Value::Str(s) if s.contains("dead")));
    }

    #[test]
    fn wrap_resumes_directly_without_an_ok_flag() {
        let source = r#"
            local gen = coroutine.wrap(function()
                coroutine.yield(1)
                coroutine.yield(2)
            end)
            local a = gen()
            local b = gen()
            return a, b
        "#;
        let result = run_source_with(source, install).unwrap();
        assert_eq!(result, vec![Value::Int(1), Value::Int(2)]);
    }
}
