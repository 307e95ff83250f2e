//! Label indexing: scans the instruction stream once, building a
//! `label → pc` map and a `label → function_name` map.

use super::{Instruction, OpCode};
use crate::vm::{EngineError, EngineResult};
use ahash::AHashMap;
use smol_str::SmolStr;

pub struct LabelTable {
    pub pc_of: AHashMap<SmolStr, usize>,
    pub function_name_of: AHashMap<SmolStr, SmolStr>,
}

impl LabelTable {
    /// Labels are resolved once during a pre-pass: every
    /// jump target must exist and be the sole definition of that label.
    pub fn build(instructions: &[Instruction]) -> EngineResult<LabelTable> {
        let mut pc_of = AHashMap::default();
        for (i, inst) in instructions.iter().enumerate() {
            if inst.opcode == OpCode::Label {
                let name = inst.args[0].as_sym().unwrap_or_default();
                if pc_of.insert(SmolStr::new(name), i).is_some() {
                    return Err(EngineError::syntactic(format!("duplicate label: {name}")));
                }
            }
        }

        let mut function_name_of = AHashMap::default();
        let mut pending_label: Option<SmolStr> = None;
        let mut current_name: Option<SmolStr> = None;
        for inst in instructions {
            if inst.opcode == OpCode::Label {
                pending_label = Some(SmolStr::new(inst.args[0].as_sym().unwrap_or_default()));
                continue;
            }
            if let Some(debug) = &inst.debug {
                current_name = Some(debug.function_name.clone());
                if let Some(label) = pending_label.take() {
                    function_name_of.insert(label, debug.function_name.clone());
                }
            }
        }
        if let (Some(label), Some(name)) = (pending_label, current_name) {
            function_name_of.insert(label, name);
        }
        function_name_of
            .entry(SmolStr::new_static("<chunk>"))
            .or_insert_with(|| SmolStr::new_static("<chunk>"));

        Ok(LabelTable { pc_of, function_name_of })
    }

    pub fn resolve(&self, label: &str) -> EngineResult<usize> {
        self.pc_of
            .get(label)
            .copied()
            .ok_or_else(|| EngineError::syntactic(format!("unknown label: {label}")))
    }

    pub fn function_name(&self, label: &str) -> SmolStr {
        self.function_name_of
            .get(label)
            .cloned()
            .unwrap_or_else(|| SmolStr::new_static("<chunk>"))
    }
}

#[cfg(test)]
mod labels_tests {
    use super::*;
    use crate::bytecode::{Arg, InstructionDebug};

    fn debug(function_name: &str) -> Option<InstructionDebug> {
        Some(InstructionDebug {
            file: SmolStr::new("<test>"),
            line: 1,
            column: 1,
            function_name: SmolStr::new(function_name),
        })
    }

    #[test]
    fn resolves_forward_and_backward_jumps() {
        let instructions = vec![
            Instruction::new(OpCode::Jmp, vec![Arg::sym("skip")], debug("<chunk>")),
            Instruction::label("loop_start"),
            Instruction::new(OpCode::Jmp, vec![Arg::sym("loop_start")], debug("<chunk>")),
            Instruction::label("skip"),
            Instruction::new(OpCode::Halt, vec![], debug("<chunk>")),
        ];
        let labels = LabelTable::build(&instructions).unwrap();
        assert_eq!(labels.resolve("loop_start").unwrap(), 1);
        assert_eq!(labels.resolve("skip").unwrap(), 3);
    }

    #[test]
    fn unknown_label_is_a_syntax_error() {
        let instructions = vec![Instruction::new(OpCode::Halt, vec![], None)];
        let labels = LabelTable::build(&instructions).unwrap();
        assert!(labels.resolve("nowhere").is_err());
    }

    #[test]
    fn duplicate_label_definitions_are_rejected() {
        let instructions = vec![
            Instruction::label("top"),
            Instruction::new(OpCode::Halt, vec![], None),
            Instruction::label("top"),
        ];
        assert!(LabelTable::build(&instructions).is_err());
    }

    #[test]
    fn function_name_follows_nearest_preceding_debug_info() {
        let instructions = vec![
            Instruction::new(OpCode::LoadImm, vec![Arg::sym("r1"), Arg::Int(0)], debug("myfunc")),
            Instruction::label("body"),
            Instruction::new(OpCode::Halt, vec![], debug("myfunc")),
        ];
        let labels = LabelTable::build(&instructions).unwrap();
        assert_eq!(labels.function_name("body").as_str(), "myfunc");
    }

    #[test]
    fn label_with_no_following_debug_info_falls_back_to_chunk() {
        let instructions = vec![Instruction::label("orphan")];
        let labels = LabelTable::build(&instructions).unwrap();
        assert_eq!(labels.function_name("orphan").as_str(), "<chunk>");
    }
}
