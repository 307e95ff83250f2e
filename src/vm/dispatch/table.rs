//! Lua table opcodes, plus the legacy name-keyed array opcodes retained
//! for completeness.

use crate::bytecode::Arg;
use crate::value::{LuaTable, Value};
use crate::vm::{EngineError, EngineResult, StepOutcome, Vm};

pub fn exec_table_new(vm: &mut Vm, args: &[Arg]) -> EngineResult<StepOutcome> {
    vm.set_reg(vm.reg_name(&args[0]), Value::table(LuaTable::new()));
    Ok(StepOutcome::Continue)
}

/// `TableSet t,k,v`, honoring `__newindex` on a miss.
pub fn exec_table_set(vm: &mut Vm, args: &[Arg]) -> EngineResult<StepOutcome> {
    let t = vm.resolve_struct(&args[0]);
    let k = vm.resolve_struct(&args[1]);
    let v = vm.resolve_struct(&args[2]);
    match t {
        Value::Table(t) => {
            vm.table_set(&t, k, v)?;
            Ok(StepOutcome::Continue)
        }
        other => Err(EngineError::structural(format!("attempt to index a {} value", other.type_name()))),
    }
}

/// `TableGet dst,t,k`, honoring `__index` on a miss.
pub fn exec_table_get(vm: &mut Vm, args: &[Arg]) -> EngineResult<StepOutcome> {
    let t = vm.resolve_struct(&args[1]);
    let k = vm.resolve_struct(&args[2]);
    let value = match t {
        Value::Table(t) => vm.table_get(&t, &k)?,
        Value::Nil => return Err(EngineError::structural("attempt to index a nil value")),
        other => return Err(EngineError::structural(format!("attempt to index a {} value", other.type_name()))),
    };
    vm.set_reg(vm.reg_name(&args[0]), value);
    Ok(StepOutcome::Continue)
}

pub fn exec_table_append(vm: &mut Vm, args: &[Arg]) -> EngineResult<StepOutcome> {
    let t = vm.resolve_struct(&args[0]);
    let v = vm.resolve_struct(&args[1]);
    match t {
        Value::Table(t) => {
            t.borrow_mut().append(v);
            Ok(StepOutcome::Continue)
        }
        other => Err(EngineError::structural(format!("attempt to index a {} value", other.type_name()))),
    }
}

/// `TableExtend t,list`: a trailing call or `...` expands into the table
/// constructor via this opcode.
pub fn exec_table_extend(vm: &mut Vm, args: &[Arg]) -> EngineResult<StepOutcome> {
    let t = vm.resolve_struct(&args[0]);
    let list = vm.resolve_struct(&args[1]);
    match (t, list) {
        (Value::Table(t), Value::List(l)) => {
            t.borrow_mut().extend(l.borrow().iter().cloned());
            Ok(StepOutcome::Continue)
        }
        (Value::Table(_), _) => Ok(StepOutcome::Continue),
        (other, _) => Err(EngineError::structural(format!("attempt to index a {} value", other.type_name()))),
    }
}

/// `TableLen dst,src`: Lua `#`, honoring `__len`; strings count bytes,
/// tables use [`LuaTable::lua_len`].
pub fn exec_table_len(vm: &mut Vm, args: &[Arg]) -> EngineResult<StepOutcome> {
    let src = vm.resolve_struct(&args[1]);
    let len = match &src {
        Value::Str(s) => Value::Int(s.len() as i64),
        Value::Table(t) => match vm.unary_metamethod("__len", &src)? {
            Some(v) => v,
            None => Value::Int(t.borrow().lua_len()),
        },
        other => return Err(EngineError::structural(format!("attempt to get length of a {} value", other.type_name()))),
    };
    vm.set_reg(vm.reg_name(&args[0]), len);
    Ok(StepOutcome::Continue)
}

fn array_name(vm: &Vm, arg: &Arg) -> String {
    vm.reg_name(arg).to_string()
}

pub fn exec_arr_init(vm: &mut Vm, args: &[Arg]) -> EngineResult<StepOutcome> {
    let name = array_name(vm, &args[0]);
    vm.arrays.insert(name.into(), Vec::new());
    Ok(StepOutcome::Continue)
}

pub fn exec_arr_set(vm: &mut Vm, args: &[Arg]) -> EngineResult<StepOutcome> {
    let name = array_name(vm, &args[0]);
    let index = vm.resolve_arith(&args[1]).as_i64().unwrap_or(0).max(0) as usize;
    let value = vm.resolve_struct(&args[2]);
    let arr = vm.arrays.entry(name.into()).or_default();
    if index >= arr.len() {
        arr.resize(index + 1, Value::Nil);
    }
    arr[index] = value;
    Ok(StepOutcome::Continue)
}

pub fn exec_arr_get(vm: &mut Vm, args: &[Arg]) -> EngineResult<StepOutcome> {
    let name = array_name(vm, &args[1]);
    let index = vm.resolve_arith(&args[2]).as_i64().unwrap_or(0).max(0) as usize;
    let value = vm.arrays.get(name.as_str()).and_then(|a| a.get(index)).cloned().unwrap_or(Value::Nil);
    vm.set_reg(vm.reg_name(&args[0]), value);
    Ok(StepOutcome::Continue)
}

pub fn exec_arr_len(vm: &mut Vm, args: &[Arg]) -> EngineResult<StepOutcome> {
    let name = array_name(vm, &args[1]);
    let len = vm.arrays.get(name.as_str()).map(|a| a.len()).unwrap_or(0) as i64;
    vm.set_reg(vm.reg_name(&args[0]), Value::Int(len));
    Ok(StepOutcome::Continue)
}

pub fn exec_arr_copy(vm: &mut Vm, args: &[Arg]) -> EngineResult<StepOutcome> {
    let src = array_name(vm, &args[1]);
    let copy = vm.arrays.get(src.as_str()).cloned().unwrap_or_default();
    let dst = array_name(vm, &args[0]);
    vm.arrays.insert(dst.into(), copy);
    Ok(StepOutcome::Continue)
}

#[cfg(test)]
mod table_tests {
    use crate::bytecode::{Instruction, OpCode};
    use crate::lua::run_source;
    use crate::value::Value;
    use crate::vm::Vm;

    #[test]
    fn table_length_ignores_a_trailing_nil_hole() {
        let result = run_source("local t = {1, 2, 3}; t[3] = nil; return #t").unwrap();
        assert_eq!(result, vec![Value::Int(2)]);
    }

    #[test]
    fn indexing_a_nil_value_is_a_structural_error() {
        let err = run_source("local t = nil; return t.x").unwrap_err();
        assert!(err.to_string().contains("nil"));
    }

    #[test]
    fn legacy_array_opcodes_init_set_get_len_copy_round_trip() {
        use crate::bytecode::Arg;
        let instructions = vec![
            Instruction::new(OpCode::ArrInit, vec![Arg::sym("a")], None),
            Instruction::new(OpCode::LoadImm, vec![Arg::sym("idx"), Arg::Int(0)], None),
            Instruction::new(OpCode::LoadImm, vec![Arg::sym("val"), Arg::Int(42)], None),
            Instruction::new(OpCode::ArrSet, vec![Arg::sym("a"), Arg::sym("idx"), Arg::sym("val")], None),
            Instruction::new(OpCode::ArrCopy, vec![Arg::sym("b"), Arg::sym("a")], None),
            Instruction::new(OpCode::ArrGet, vec![Arg::sym("out"), Arg::sym("b"), Arg::sym("idx")], None),
            Instruction::new(OpCode::ArrLen, vec![Arg::sym("len"), Arg::sym("b")], None),
            Instruction::new(OpCode::Print, vec![Arg::sym("out")], None),
            Instruction::new(OpCode::Print, vec![Arg::sym("len")], None),
            Instruction::new(OpCode::Halt, vec![], None),
        ];
        let mut vm = Vm::new(instructions).unwrap();
        let out = vm.run(false).unwrap();
        assert_eq!(out, vec![Value::Int(42), Value::Int(1)]);
    }
}
