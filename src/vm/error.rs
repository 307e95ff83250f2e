//! Structured error propagation with tracebacks.
//!
//! Two-tier shape: a small `Copy` discriminant for cheap `Result`s, and a
//! rich fault carrying the message and captured frames.

use smol_str::SmolStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Lexical,
    Syntactic,
    Semantic,
    RuntimeArithmetic,
    RuntimeStructural,
    ControlFlow,
    Sandbox,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::Lexical => "lexical error",
            ErrorKind::Syntactic => "syntax error",
            ErrorKind::Semantic => "compile error",
            ErrorKind::RuntimeArithmetic => "arithmetic error",
            ErrorKind::RuntimeStructural => "structural error",
            ErrorKind::ControlFlow => "control-flow error",
            ErrorKind::Sandbox => "sandbox error",
        };
        write!(f, "{s}")
    }
}

/// One frame of a captured traceback: source location plus enclosing
/// function name.
#[derive(Debug, Clone)]
pub struct TraceFrame {
    pub function_name: SmolStr,
    pub file: SmolStr,
    pub line: u32,
    pub column: u32,
    pub pc: usize,
    pub coroutine_id: Option<u64>,
}

/// A lightweight error signal threaded through `EngineResult`; the message
/// and frames live in [`EngineFault`], constructed once at the single
/// dispatch point that catches it.
#[derive(Debug, Clone)]
pub struct EngineError {
    pub kind: ErrorKind,
    pub message: String,
}

pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    pub fn lexical(msg: impl Into<String>) -> EngineError {
        EngineError { kind: ErrorKind::Lexical, message: msg.into() }
    }
    pub fn syntactic(msg: impl Into<String>) -> EngineError {
        EngineError { kind: ErrorKind::Syntactic, message: msg.into() }
    }
    pub fn semantic(msg: impl Into<String>) -> EngineError {
        EngineError { kind: ErrorKind::Semantic, message: msg.into() }
    }
    pub fn arithmetic(msg: impl Into<String>) -> EngineError {
        EngineError { kind: ErrorKind::RuntimeArithmetic, message: msg.into() }
    }
    pub fn structural(msg: impl Into<String>) -> EngineError {
        EngineError { kind: ErrorKind::RuntimeStructural, message: msg.into() }
    }
    pub fn runtime(msg: impl Into<String>) -> EngineError {
        EngineError { kind: ErrorKind::RuntimeStructural, message: msg.into() }
    }
    pub fn control_flow(msg: impl Into<String>) -> EngineError {
        EngineError { kind: ErrorKind::ControlFlow, message: msg.into() }
    }
    pub fn sandbox(msg: impl Into<String>) -> EngineError {
        EngineError { kind: ErrorKind::Sandbox, message: msg.into() }
    }

    /// Promotes a cheap error to a full [`EngineFault`] with the given
    /// frames, for call sites (compile-time failures) that have no VM to
    /// capture a traceback from.
    pub fn into_fault(self, frames: &[TraceFrame]) -> EngineFault {
        EngineFault { kind: self.kind, message: self.message, frames: frames.to_vec() }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for EngineError {}

/// The rich, user-visible error: message plus traceback.
#[derive(Debug, Clone)]
pub struct EngineFault {
    pub kind: ErrorKind,
    pub message: String,
    pub frames: Vec<TraceFrame>,
}

impl EngineFault {
    pub fn new(error: EngineError, frames: Vec<TraceFrame>) -> EngineFault {
        EngineFault { kind: error.kind, message: error.message, frames }
    }

    /// `"file:line: message"` plus a `stack traceback:` block, matching
    /// Lua's formatting.
    pub fn format_lua(&self) -> String {
        let mut out = String::new();
        if let Some(top) = self.frames.first() {
            out.push_str(&format!("{}:{}: {}\n", top.file, top.line, self.message));
        } else {
            out.push_str(&self.message);
            out.push('\n');
        }
        out.push_str("stack traceback:\n");
        for frame in &self.frames {
            out.push_str(&format!("\t{}:{}: in function '{}'\n", frame.file, frame.line, frame.function_name));
        }
        out
    }

    /// jq prefixes input-index context.
    pub fn format_jq(&self, input_index: usize) -> String {
        format!("jq execution failed on input #{input_index}: {}", self.message)
    }
}

impl std::fmt::Display for EngineFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for EngineFault {}

#[cfg(test)]
mod error_tests {
    use super::*;

    fn frame(function_name: &str, file: &str, line: u32) -> TraceFrame {
        TraceFrame { function_name: function_name.into(), file: file.into(), line, column: 1, pc: 0, coroutine_id: None }
    }

    #[test]
    fn constructors_tag_the_expected_error_kind() {
        assert_eq!(EngineError::lexical("x").kind, ErrorKind::Lexical);
        assert_eq!(EngineError::syntactic("x").kind, ErrorKind::Syntactic);
        assert_eq!(EngineError::semantic("x").kind, ErrorKind::Semantic);
        assert_eq!(EngineError::arithmetic("x").kind, ErrorKind::RuntimeArithmetic);
        assert_eq!(EngineError::structural("x").kind, ErrorKind::RuntimeStructural);
        assert_eq!(EngineError::runtime("x").kind, ErrorKind::RuntimeStructural);
        assert_eq!(EngineError::control_flow("x").kind, ErrorKind::ControlFlow);
        assert_eq!(EngineError::sandbox("x").kind, ErrorKind::Sandbox);
    }

    #[test]
    fn into_fault_carries_the_message_kind_and_given_frames() {
        let err = EngineError::runtime("boom");
        let frames = vec![frame("main", "chunk.lua", 3)];
        let fault = err.into_fault(&frames);
        assert_eq!(fault.kind, ErrorKind::RuntimeStructural);
        assert_eq!(fault.message, "boom");
        assert_eq!(fault.frames.len(), 1);
    }

    #[test]
    fn format_lua_prefixes_the_top_frames_location_and_appends_a_traceback() {
        let fault = EngineFault::new(EngineError::runtime("bad value"), vec![frame("main", "chunk.lua", 3), frame("helper", "chunk.lua", 7)]);
        let text = fault.format_lua();
        assert!(text.starts_with("chunk.lua:3: bad value\n"));
        assert!(text.contains("stack traceback:"));
        assert!(text.contains("chunk.lua:7: in function 'helper'"));
    }

    #[test]
    fn format_lua_with_no_frames_omits_a_location_prefix() {
        let fault = EngineFault::new(EngineError::runtime("bad value"), vec![]);
        let text = fault.format_lua();
        assert!(text.starts_with("bad value\n"));
    }

    #[test]
    fn format_jq_prefixes_the_input_index() {
        let fault = EngineFault::new(EngineError::runtime("type error"), vec![]);
        assert_eq!(fault.format_jq(2), "jq execution failed on input #2: type error");
    }
}
