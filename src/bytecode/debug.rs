//! Per-instruction source location + enclosing function name.
//!
//! Stored as a parallel array (`instructions[i].debug`) the way the design
//! notes ask for, rather than scattered across AST/compiler structures.

use smol_str::SmolStr;

#[derive(Debug, Clone)]
pub struct InstructionDebug {
    pub file: SmolStr,
    pub line: u32,
    pub column: u32,
    pub function_name: SmolStr,
}

impl InstructionDebug {
    pub fn new(file: impl Into<SmolStr>, line: u32, column: u32, function_name: impl Into<SmolStr>) -> Self {
        InstructionDebug {
            file: file.into(),
            line,
            column,
            function_name: function_name.into(),
        }
    }
}

#[cfg(test)]
mod debug_tests {
    use super::*;

    #[test]
    fn new_stores_each_field_verbatim() {
        let d = InstructionDebug::new("chunk.lua", 10, 4, "main");
        assert_eq!(d.file.as_str(), "chunk.lua");
        assert_eq!(d.line, 10);
        assert_eq!(d.column, 4);
        assert_eq!(d.function_name.as_str(), "main");
    }
}
