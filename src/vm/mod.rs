//! The register VM: instruction dispatch, value model
//! plumbing, call frames, closures/upvalues, multi-return, coroutine
//! suspension, structured error propagation with tracebacks.
//!
//! A `Vm` struct owns the registers, call stack, and coroutine registry,
//! exposes a `step()`/`run()` pair, and dispatches through handlers split
//! by opcode group. The register file is name-indexed rather than
//! slot-indexed, matching the symbolic-argument instruction format.

pub mod coroutine;
mod dispatch;
mod error;
mod frame;
pub(crate) mod jq_support;
mod metamethod;
mod ordering;
mod resolve;

pub use error::{EngineError, EngineFault, EngineResult, ErrorKind, TraceFrame};
pub use frame::{CallFrame, TryFrame};
pub use ordering::jq_cmp;
pub use resolve::MissingPolicy;

use crate::bytecode::{Instruction, InstructionDebug, LabelTable, OpCode};
use crate::value::{CellRef, CoroutineRef, NativeFn, Value};
use ahash::AHashMap;
use smol_str::SmolStr;
use std::collections::VecDeque;
use std::rc::Rc;

/// The verdict a single `step()` returns, driving both the run loop and
/// the coroutine scheduler/debugger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Continue,
    Jump,
    Halt,
    Yield,
    /// A `Return`/`ReturnMulti` popped a boundary frame pushed by
    /// [`Vm::call_callable`]; control returns to that synchronous driving
    /// loop rather than to a caller's pc.
    BoundaryReturn,
}

pub struct VmOptions {
    pub max_call_depth: usize,
}

impl Default for VmOptions {
    fn default() -> Self {
        VmOptions { max_call_depth: 4000 }
    }
}

/// Coroutine lifecycle events for tracing.
#[derive(Debug, Clone)]
pub enum CoroutineEvent {
    Created { id: u64 },
    Resumed { id: u64 },
    Yielded { id: u64 },
    Completed { id: u64 },
}

pub struct Vm {
    pub instructions: Rc<Vec<Instruction>>,
    pub labels: Rc<LabelTable>,
    pub registers: AHashMap<SmolStr, Value>,
    pub call_stack: Vec<CallFrame>,
    pub pending_params: Vec<Value>,
    pub last_return: Vec<Value>,
    /// Set by `CallValue`'s native-fn arm when a builtin (namely
    /// `coroutine.yield`) returns [`crate::value::NativeOutcome::Yield`];
    /// the coroutine scheduler reads it after `run`/`step` reports
    /// [`StepOutcome::Yield`].
    pub yield_values: Vec<Value>,
    pub emit_stack: Vec<Rc<std::cell::RefCell<Vec<Value>>>>,
    pub output: Vec<Value>,
    pub current_upvalues: Vec<CellRef>,
    pub pc: usize,
    pub options: VmOptions,

    /// Backs the legacy `ArrInit/Set/Get/Len/Copy` opcodes: a separate
    /// name-keyed vector store, distinct from Lua's hybrid `Table` and
    /// jq's `List`.
    pub arrays: AHashMap<SmolStr, Vec<Value>>,
    pub try_stack: Vec<TryFrame>,

    pub(crate) coroutines: AHashMap<u64, CoroutineRef>,
    pub(crate) next_coroutine_id: u64,
    pub(crate) current_coroutine: Option<CoroutineRef>,
    pub(crate) events: Vec<CoroutineEvent>,

    /// Host-supplied JSON input stream for jq's `input`/`inputs`.
    pub inputs: VecDeque<Value>,
    pub current_input_index: usize,

    halted: bool,
    pub halt_error: Option<String>,
    /// Reentrancy guard: set while a native
    /// builtin is synchronously driving the VM through `call_callable`;
    /// a yield crossing this boundary is rejected.
    in_native_call: u32,
}

pub const GLOBAL_PREFIX: &str = "G_";

impl Vm {
    pub fn new(instructions: Vec<Instruction>) -> EngineResult<Vm> {
        let labels = LabelTable::build(&instructions)?;
        Ok(Vm {
            instructions: Rc::new(instructions),
            labels: Rc::new(labels),
            registers: AHashMap::default(),
            call_stack: Vec::new(),
            pending_params: Vec::new(),
            last_return: Vec::new(),
            yield_values: Vec::new(),
            emit_stack: Vec::new(),
            output: Vec::new(),
            current_upvalues: Vec::new(),
            pc: 0,
            options: VmOptions::default(),
            arrays: AHashMap::default(),
            try_stack: Vec::new(),
            coroutines: AHashMap::default(),
            next_coroutine_id: 1,
            current_coroutine: None,
            events: Vec::new(),
            inputs: VecDeque::new(),
            current_input_index: 0,
            halted: false,
            halt_error: None,
            in_native_call: 0,
        })
    }

    /// Builds a VM sharing another VM's instruction stream and label table
    /// but with its own registers/call stack/pc — the coroutine scheduler's
    /// inner thread.
    pub(crate) fn new_child(instructions: Rc<Vec<Instruction>>, labels: Rc<LabelTable>) -> Vm {
        Vm {
            instructions,
            labels,
            registers: AHashMap::default(),
            call_stack: Vec::new(),
            pending_params: Vec::new(),
            last_return: Vec::new(),
            yield_values: Vec::new(),
            emit_stack: Vec::new(),
            output: Vec::new(),
            current_upvalues: Vec::new(),
            pc: 0,
            options: VmOptions::default(),
            arrays: AHashMap::default(),
            try_stack: Vec::new(),
            coroutines: AHashMap::default(),
            next_coroutine_id: 1,
            current_coroutine: None,
            events: Vec::new(),
            inputs: VecDeque::new(),
            current_input_index: 0,
            halted: false,
            halt_error: None,
            in_native_call: 0,
        }
    }

    /// Copies every `G_`-prefixed global from `self` into `other`, and back.
    pub(crate) fn sync_globals_into(&self, other: &mut Vm) {
        for (k, v) in self.registers.iter() {
            if k.starts_with(GLOBAL_PREFIX) {
                other.registers.insert(k.clone(), v.clone());
            }
        }
    }

    pub fn register(&mut self, name: &str, value: Value) {
        self.registers.insert(SmolStr::new(format!("{GLOBAL_PREFIX}{name}")), value);
    }

    /// Registers `namespace` as a global table (reusing one already there)
    /// with `entries` set as its fields, so Lua source can call
    /// `namespace.name(...)` exactly like any other table field, the same
    /// way `coroutine`/`string`-style library tables behave.
    pub fn register_library(&mut self, namespace: &str, entries: &[(&str, NativeFn)]) {
        let key = SmolStr::new(format!("{GLOBAL_PREFIX}{namespace}"));
        let table = match self.registers.get(&key) {
            Some(Value::Table(t)) => t.clone(),
            _ => crate::value::new_table_ref(),
        };
        for (name, f) in entries {
            table.borrow_mut().set(Value::str(*name), Value::NativeFn(f.clone())).ok();
        }
        self.registers.insert(key, Value::Table(table));
    }

    pub fn drain_events(&mut self) -> Vec<CoroutineEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn allocate_coroutine_id(&mut self) -> u64 {
        let id = self.next_coroutine_id;
        self.next_coroutine_id += 1;
        id
    }

    /// Advances exactly one instruction.
    pub fn step(&mut self) -> EngineResult<StepOutcome> {
        if self.pc >= self.instructions.len() {
            return Ok(StepOutcome::Halt);
        }
        let instructions = Rc::clone(&self.instructions);
        let inst = &instructions[self.pc];
        let result = dispatch::dispatch(self, inst.opcode, &inst.args);
        match result {
            Ok(StepOutcome::Jump) => Ok(StepOutcome::Jump),
            Ok(StepOutcome::BoundaryReturn) => Ok(StepOutcome::BoundaryReturn),
            Ok(StepOutcome::Halt) => {
                self.halted = true;
                Ok(StepOutcome::Halt)
            }
            Ok(StepOutcome::Yield) => {
                self.pc += 1;
                Ok(StepOutcome::Yield)
            }
            Ok(StepOutcome::Continue) => {
                self.pc += 1;
                Ok(StepOutcome::Continue)
            }
            Err(e) => self.catch_or_propagate(e),
        }
    }

    /// On error, unwind to the nearest enclosing `TryBegin` region if one
    /// is open: truncate the call stack and emit stack to their recorded
    /// depths, write the message into the try's error register, and jump
    /// to its catch label.
    /// With no open try region the error propagates to the caller.
    fn catch_or_propagate(&mut self, error: EngineError) -> EngineResult<StepOutcome> {
        let Some(try_frame) = self.try_stack.pop() else {
            return Err(error);
        };
        if self.call_stack.len() > try_frame.call_stack_depth {
            // The frame pushed right after `TryBegin` recorded the caller's
            // state as it was at the try region's entry; restore it before
            // dropping every frame nested inside the region.
            let boundary = self.call_stack[try_frame.call_stack_depth].clone_saved_state();
            self.registers = boundary.0;
            self.current_upvalues = boundary.1;
            self.pending_params = boundary.2;
        }
        self.call_stack.truncate(try_frame.call_stack_depth);
        self.emit_stack.truncate(try_frame.emit_stack_depth);
        self.set_reg(&try_frame.err_reg, Value::str(error.message));
        self.pc = try_frame.catch_pc;
        Ok(StepOutcome::Jump)
    }

    /// `run(stop_on_yield) → Output`.
    pub fn run(&mut self, stop_on_yield: bool) -> Result<Vec<Value>, EngineFault> {
        loop {
            if self.pc >= self.instructions.len() || self.halted {
                break;
            }
            match self.step() {
                Ok(StepOutcome::Halt) => break,
                Ok(StepOutcome::Yield) => {
                    if !stop_on_yield {
                        return Err(self.wrap_error(EngineError::control_flow(
                            "coroutine.yield called outside coroutine",
                        )));
                    }
                    break;
                }
                Ok(_) => continue,
                Err(e) => return Err(self.wrap_error(e)),
            }
        }
        Ok(self.output.clone())
    }

    /// Wraps a raw [`EngineError`] with a freshly captured traceback, the
    /// single point where this happens.
    pub fn wrap_error(&self, error: EngineError) -> EngineFault {
        EngineFault::new(error, self.capture_traceback())
    }

    pub fn capture_traceback(&self) -> Vec<TraceFrame> {
        let coroutine_id = self.current_coroutine.as_ref().map(|c| c.borrow().id);
        let mut frames = vec![self.frame_from_debug(self.instruction_debug(self.pc), self.pc, coroutine_id)];
        for frame in self.call_stack.iter().rev() {
            let pc = frame.return_pc.saturating_sub(1);
            frames.push(self.frame_from_debug(frame.caller_debug.clone(), pc, coroutine_id));
        }
        frames
    }

    fn instruction_debug(&self, pc: usize) -> Option<InstructionDebug> {
        self.instructions.get(pc).and_then(|i| i.debug.clone())
    }

    fn frame_from_debug(&self, debug: Option<InstructionDebug>, pc: usize, coroutine_id: Option<u64>) -> TraceFrame {
        match debug {
            Some(d) => TraceFrame {
                function_name: d.function_name,
                file: d.file,
                line: d.line,
                column: d.column,
                pc,
                coroutine_id,
            },
            None => TraceFrame {
                function_name: self.labels.function_name("<chunk>"),
                file: SmolStr::new_static("<unknown>"),
                line: 0,
                column: 0,
                pc,
                coroutine_id,
            },
        }
    }

    /// Runs `callee(args)` synchronously to its natural return, for native
    /// builtins that need to invoke a Lua closure. Yields crossing this boundary are rejected.
    pub fn call_callable(&mut self, callee: &Value, args: Vec<Value>) -> EngineResult<Vec<Value>> {
        self.in_native_call += 1;
        let result = self.do_call_callable(callee, args);
        self.in_native_call -= 1;
        result
    }

    fn do_call_callable(&mut self, callee: &Value, args: Vec<Value>) -> EngineResult<Vec<Value>> {
        match callee {
            Value::NativeFn(f) => match f(&args, self)? {
                crate::value::NativeOutcome::Single(v) => Ok(vec![v]),
                crate::value::NativeOutcome::Multi(vs) => Ok(vs),
                crate::value::NativeOutcome::Yield(_) => Err(EngineError::control_flow(
                    "cannot yield across a native helper call boundary",
                )),
            },
            Value::Closure(closure) => {
                let entry_pc = self.labels.resolve(&closure.label)?;
                let boundary_frame = CallFrame {
                    return_pc: self.pc,
                    saved_registers: std::mem::take(&mut self.registers),
                    saved_pending_params: std::mem::take(&mut self.pending_params),
                    saved_upvalues: std::mem::replace(&mut self.current_upvalues, closure.upvalues.clone()),
                    caller_debug: self.instruction_debug(self.pc),
                    is_boundary: true,
                };
                self.call_stack.push(boundary_frame);
                self.pending_params = args;
                self.pc = entry_pc;

                loop {
                    match self.step() {
                        Ok(StepOutcome::BoundaryReturn) | Ok(StepOutcome::Halt) => break,
                        Ok(StepOutcome::Yield) => {
                            return Err(EngineError::control_flow(
                                "cannot yield across a native helper call boundary",
                            ));
                        }
                        Ok(_) => continue,
                        Err(e) => return Err(e),
                    }
                }
                Ok(std::mem::take(&mut self.last_return))
            }
            Value::Table(t) => {
                let call_fn = metamethod::lookup_metamethod(t, "__call");
                match call_fn {
                    Some(f) => {
                        let mut full_args = vec![callee.clone()];
                        full_args.extend(args);
                        self.call_callable(&f, full_args)
                    }
                    None => Err(EngineError::structural("attempt to call a table value")),
                }
            }
            other => Err(EngineError::structural(format!(
                "attempt to call a {} value",
                other.type_name()
            ))),
        }
    }
}

#[cfg(test)]
mod vm_tests {
    use super::*;
    use crate::lua::run_source_with;
    use crate::value::NativeOutcome;

    #[test]
    fn register_library_builds_a_real_table_callable_by_field_access() {
        let double: NativeFn = Rc::new(|args: &[Value], _vm: &mut Vm| -> EngineResult<NativeOutcome> {
            let n = args[0].as_i64().unwrap_or(0);
            Ok(NativeOutcome::Single(Value::Int(n * 2)))
        });
        let source = "return mymath.double(21)";
        let result = run_source_with(source, |vm| {
            vm.register_library("mymath", &[("double", double.clone())]);
        })
        .unwrap();
        assert_eq!(result, vec![Value::Int(42)]);
    }

    #[test]
    fn register_library_called_twice_merges_into_one_table() {
        let a: NativeFn = Rc::new(|_args: &[Value], _vm: &mut Vm| Ok(NativeOutcome::Single(Value::Int(1))));
        let b: NativeFn = Rc::new(|_args: &[Value], _vm: &mut Vm| Ok(NativeOutcome::Single(Value::Int(2))));
        let source = "return ns.a(), ns.b()";
        let result = run_source_with(source, |vm| {
            vm.register_library("ns", &[("a", a.clone())]);
            vm.register_library("ns", &[("b", b.clone())]);
        })
        .unwrap();
        assert_eq!(result, vec![Value::Int(1), Value::Int(2)]);
    }

    #[test]
    fn plain_register_exposes_a_bare_global_value() {
        let source = "return greeting";
        let result = run_source_with(source, |vm| {
            vm.register("greeting", Value::str("hi"));
        })
        .unwrap();
        assert_eq!(result, vec![Value::str("hi")]);
    }
}
