//! The `Coroutine` value and its status state machine.

use super::{ClosureRef, Value};
use crate::vm::EngineFault;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoroutineStatus {
    Suspended,
    Running,
    Dead,
}

pub type CoroutineRef = Rc<std::cell::RefCell<Coroutine>>;

/// Owns the inner VM's register/call-stack state for one cooperative thread
/// of execution. The inner VM itself is constructed
/// lazily on first resume and lives in `crate::vm::coroutine`.
pub struct Coroutine {
    pub id: u64,
    pub parent_id: Option<u64>,
    pub status: CoroutineStatus,
    pub started: bool,
    pub awaiting_resume: bool,
    pub closure: ClosureRef,
    pub last_yield: Vec<Value>,
    pub last_error: Option<EngineFault>,
    /// Registers + call stack of the coroutine's own stepper, opaque to
    /// everything outside `crate::vm::coroutine`.
    pub(crate) inner: Option<crate::vm::coroutine::InnerThread>,
}

impl Coroutine {
    pub fn new(id: u64, parent_id: Option<u64>, closure: ClosureRef) -> Coroutine {
        Coroutine {
            id,
            parent_id,
            status: CoroutineStatus::Suspended,
            started: false,
            awaiting_resume: false,
            closure,
            last_yield: Vec::new(),
            last_error: None,
            inner: None,
        }
    }
}

#[cfg(test)]
mod coroutine_tests {
    use super::*;
    use crate::value::closure::Closure;

    #[test]
    fn new_coroutine_starts_suspended_and_not_yet_started() {
        let closure = Closure::new("co_body", vec![], "co_body", 0, false);
        let co = Coroutine::new(1, Some(0), closure);
        assert_eq!(co.status, CoroutineStatus::Suspended);
        assert!(!co.started);
        assert!(!co.awaiting_resume);
        assert_eq!(co.parent_id, Some(0));
        assert!(co.last_yield.is_empty());
        assert!(co.last_error.is_none());
        assert!(co.inner.is_none());
    }

    #[test]
    fn status_variants_are_distinct_and_comparable() {
        assert_ne!(CoroutineStatus::Suspended, CoroutineStatus::Running);
        assert_ne!(CoroutineStatus::Running, CoroutineStatus::Dead);
        assert_eq!(CoroutineStatus::Dead, CoroutineStatus::Dead);
    }
}
