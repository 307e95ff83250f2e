//! Register-name resolution.
//!
//! A missing name resolves to `Int(0)` for arithmetic opcodes and to `Nil`
//! for value-semantics opcodes; implementations must pick one policy per
//! opcode. The existing split, carried here verbatim: arithmetic → 0,
//! structural → Nil.

use super::Vm;
use crate::bytecode::Arg;
use crate::value::Value;

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum MissingPolicy {
    ArithmeticZero,
    StructuralNil,
}

impl Vm {
    /// Resolve one instruction operand to a runtime value: JSON literal,
    /// `'...'`-quoted literal, or a register name looked up with the given
    /// missing-value policy.
    pub fn resolve(&self, arg: &Arg, policy: MissingPolicy) -> Value {
        match arg {
            Arg::Int(i) => Value::Int(*i),
            Arg::Float(f) => Value::Float(*f),
            Arg::Bool(b) => Value::Bool(*b),
            Arg::Nil => Value::Nil,
            Arg::Str(s) => Value::Str(s.clone()),
            Arg::Sym(name) => self
                .registers
                .get(name.as_str())
                .cloned()
                .unwrap_or(match policy {
                    MissingPolicy::ArithmeticZero => Value::Int(0),
                    MissingPolicy::StructuralNil => Value::Nil,
                }),
        }
    }

    pub fn resolve_arith(&self, arg: &Arg) -> Value {
        self.resolve(arg, MissingPolicy::ArithmeticZero)
    }

    pub fn resolve_struct(&self, arg: &Arg) -> Value {
        self.resolve(arg, MissingPolicy::StructuralNil)
    }

    pub fn reg_name<'a>(&self, arg: &'a Arg) -> &'a str {
        arg.as_sym().unwrap_or("")
    }

    pub fn set_reg(&mut self, name: &str, value: Value) {
        self.registers.insert(name.into(), value);
    }
}

#[cfg(test)]
mod resolve_tests {
    use super::*;
    use crate::vm::Vm;

    #[test]
    fn an_unset_register_resolves_per_the_calling_opcodes_policy() {
        let vm = Vm::new(Vec::new()).unwrap();
        assert_eq!(vm.resolve_arith(&Arg::sym("missing")), Value::Int(0));
        assert_eq!(vm.resolve_struct(&Arg::sym("missing")), Value::Nil);
    }

    #[test]
    fn literals_resolve_to_themselves_regardless_of_policy() {
        let vm = Vm::new(Vec::new()).unwrap();
        assert_eq!(vm.resolve_arith(&Arg::Int(7)), Value::Int(7));
        assert_eq!(vm.resolve_struct(&Arg::Bool(true)), Value::Bool(true));
    }
}
