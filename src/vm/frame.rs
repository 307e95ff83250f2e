//! Call frames: pushed by every function-call opcode,
//! popped by return.

use crate::bytecode::InstructionDebug;
use crate::value::{CellRef, Value};
use ahash::AHashMap;
use smol_str::SmolStr;

pub struct CallFrame {
    pub return_pc: usize,
    pub saved_registers: AHashMap<SmolStr, Value>,
    pub saved_pending_params: Vec<Value>,
    pub saved_upvalues: Vec<CellRef>,
    pub caller_debug: Option<InstructionDebug>,
    /// Set for frames pushed by [`crate::vm::Vm::call_callable`]: its
    /// `Return` does not resume a caller's pc, it hands control back to the
    /// synchronous driving loop.
    pub is_boundary: bool,
}

impl CallFrame {
    /// Clones the caller-side state this frame saved, without consuming the
    /// frame itself. Used by the try/catch unwinder to restore the register
    /// map as it was at the try region's entry (see `Vm::catch_or_propagate`).
    pub fn clone_saved_state(&self) -> (AHashMap<SmolStr, Value>, Vec<CellRef>, Vec<Value>) {
        (self.saved_registers.clone(), self.saved_upvalues.clone(), self.saved_pending_params.clone())
    }
}

/// Pushed by `TryBegin`, popped on `TryEnd` or on the error path. Records enough to unwind back to the try region's
/// entry point: the call-stack depth to truncate to, the emit-stack depth
/// to restore, the catch target, and which register receives the message.
pub struct TryFrame {
    pub catch_pc: usize,
    pub err_reg: SmolStr,
    pub call_stack_depth: usize,
    pub emit_stack_depth: usize,
}
