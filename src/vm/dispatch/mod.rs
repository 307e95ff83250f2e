//! Dispatch table: routes one opcode to its handler function, grouped
//! into submodules by opcode family (arithmetic, control, load, table,
//! upvalue, jq value/control).

mod arith;
mod call;
mod compare;
mod control;
mod jq_control;
mod jq_path;
mod jq_value;
mod load;
mod table;

use crate::bytecode::{Arg, OpCode};
use crate::vm::{EngineResult, StepOutcome, Vm};

pub fn dispatch(vm: &mut Vm, opcode: OpCode, args: &[Arg]) -> EngineResult<StepOutcome> {
    match opcode {
        OpCode::LoadImm | OpCode::LoadConst => load::exec_load(vm, args),
        OpCode::Mov => load::exec_mov(vm, args),
        OpCode::Clr => load::exec_clr(vm, args),

        OpCode::Add => arith::exec_add(vm, args),
        OpCode::Sub => arith::exec_sub(vm, args),
        OpCode::Mul => arith::exec_mul(vm, args),
        OpCode::Div => arith::exec_div(vm, args),
        OpCode::Mod => arith::exec_mod(vm, args),
        OpCode::Neg => arith::exec_neg(vm, args),
        OpCode::IDiv => arith::exec_idiv(vm, args),
        OpCode::Pow => arith::exec_pow(vm, args),
        OpCode::Concat => arith::exec_concat(vm, args),

        OpCode::Eq => compare::exec_eq(vm, args),
        OpCode::Lt => compare::exec_lt(vm, args),
        OpCode::Gt => compare::exec_gt(vm, args),
        OpCode::CmpImm => compare::exec_cmp_imm(vm, args),

        OpCode::And => compare::exec_and(vm, args),
        OpCode::Or => compare::exec_or(vm, args),
        OpCode::Not => compare::exec_not(vm, args),
        OpCode::Coalesce => compare::exec_coalesce(vm, args),

        OpCode::AndBit => arith::exec_and_bit(vm, args),
        OpCode::OrBit => arith::exec_or_bit(vm, args),
        OpCode::Xor => arith::exec_xor(vm, args),
        OpCode::NotBit => arith::exec_not_bit(vm, args),
        OpCode::Shl => arith::exec_shl(vm, args),
        OpCode::Shr => arith::exec_shr(vm, args),
        OpCode::Sar => arith::exec_sar(vm, args),

        OpCode::Jmp => control::exec_jmp(vm, args),
        OpCode::Jz => control::exec_jz(vm, args),
        OpCode::Jnz => control::exec_jnz(vm, args),
        OpCode::JmpRel => control::exec_jmp_rel(vm, args),
        OpCode::Label => control::exec_label(vm, args),

        OpCode::Param => call::exec_param(vm, args),
        OpCode::ParamExpand => call::exec_param_expand(vm, args),
        OpCode::Call => call::exec_call(vm, args),
        OpCode::CallValue => call::exec_call_value(vm, args),
        OpCode::Arg => call::exec_arg(vm, args),
        OpCode::Vararg => call::exec_vararg(vm, args),
        OpCode::VarargFirst => call::exec_vararg_first(vm, args),
        OpCode::Return => call::exec_return(vm, args),
        OpCode::ReturnMulti => call::exec_return_multi(vm, args),
        OpCode::ReturnList => call::exec_return_list(vm, args),
        OpCode::Result => call::exec_result(vm, args),
        OpCode::ResultMulti => call::exec_result_multi(vm, args),
        OpCode::ResultList => call::exec_result_list(vm, args),
        OpCode::MakeCell => call::exec_make_cell(vm, args),
        OpCode::CellGet => call::exec_cell_get(vm, args),
        OpCode::CellSet => call::exec_cell_set(vm, args),
        OpCode::Closure => call::exec_closure(vm, args),
        OpCode::BindUpvalue => call::exec_bind_upvalue(vm, args),

        OpCode::TableNew => table::exec_table_new(vm, args),
        OpCode::TableSet => table::exec_table_set(vm, args),
        OpCode::TableGet => table::exec_table_get(vm, args),
        OpCode::TableAppend => table::exec_table_append(vm, args),
        OpCode::TableExtend => table::exec_table_extend(vm, args),
        OpCode::TableLen => table::exec_table_len(vm, args),

        OpCode::ArrInit => table::exec_arr_init(vm, args),
        OpCode::ArrSet => table::exec_arr_set(vm, args),
        OpCode::ArrGet => table::exec_arr_get(vm, args),
        OpCode::ArrLen => table::exec_arr_len(vm, args),
        OpCode::ArrCopy => table::exec_arr_copy(vm, args),

        OpCode::NewList => jq_value::exec_new_list(vm, args),
        OpCode::NewObject => jq_value::exec_new_object(vm, args),
        OpCode::ObjGet => jq_value::exec_obj_get(vm, args),
        OpCode::ObjSet => jq_value::exec_obj_set(vm, args),
        OpCode::GetIndex => jq_value::exec_get_index(vm, args),
        OpCode::SetIndex => jq_value::exec_set_index(vm, args),
        OpCode::LenValue => jq_value::exec_len_value(vm, args),
        OpCode::Keys => jq_value::exec_keys(vm, args),
        OpCode::Has => jq_value::exec_has(vm, args),
        OpCode::Contains => jq_value::exec_contains(vm, args),
        OpCode::Flatten => jq_value::exec_flatten(vm, args),
        OpCode::Reverse => jq_value::exec_reverse(vm, args),
        OpCode::First => jq_value::exec_first(vm, args),
        OpCode::Last => jq_value::exec_last(vm, args),
        OpCode::Any => jq_value::exec_any(vm, args),
        OpCode::All => jq_value::exec_all(vm, args),
        OpCode::AggAdd => jq_value::exec_agg_add(vm, args),
        OpCode::Join => jq_value::exec_join(vm, args),
        OpCode::Sort => jq_value::exec_sort(vm, args),
        OpCode::SortBy => jq_value::exec_sort_by(vm, args),
        OpCode::Unique => jq_value::exec_unique(vm, args),
        OpCode::UniqueBy => jq_value::exec_unique_by(vm, args),
        OpCode::Min => jq_value::exec_min(vm, args),
        OpCode::MinBy => jq_value::exec_min_by(vm, args),
        OpCode::Max => jq_value::exec_max(vm, args),
        OpCode::MaxBy => jq_value::exec_max_by(vm, args),
        OpCode::GroupBy => jq_value::exec_group_by(vm, args),
        OpCode::Tostring => jq_value::exec_tostring(vm, args),
        OpCode::Tonumber => jq_value::exec_tonumber(vm, args),
        OpCode::Split => jq_value::exec_split(vm, args),
        OpCode::Gsub => jq_value::exec_gsub(vm, args),

        OpCode::PathsAll => jq_path::exec_paths_all(vm, args),
        OpCode::PathsMatch => jq_path::exec_paths_match(vm, args),
        OpCode::SetPaths => jq_path::exec_set_paths(vm, args),
        OpCode::DelPaths => jq_path::exec_del_paths(vm, args),
        OpCode::GetPathValue => jq_path::exec_get_path_value(vm, args),

        OpCode::PushEmit => jq_control::exec_push_emit(vm, args),
        OpCode::PopEmit => jq_control::exec_pop_emit(vm, args),
        OpCode::Emit => jq_control::exec_emit(vm, args),
        OpCode::TryBegin => jq_control::exec_try_begin(vm, args),
        OpCode::TryEnd => jq_control::exec_try_end(vm, args),
        OpCode::Input => jq_control::exec_input(vm, args),
        OpCode::Inputs => jq_control::exec_inputs(vm, args),
        OpCode::HaltNow => jq_control::exec_halt_now(vm, args),
        OpCode::HaltError => jq_control::exec_halt_error(vm, args),

        OpCode::Halt => control::exec_halt(vm, args),
        OpCode::Print => control::exec_print(vm, args),
    }
}

#[cfg(test)]
mod dispatch_tests {
    use crate::jq::run_filter;
    use crate::lua::run_source;
    use crate::value::{new_object, Value};

    #[test]
    fn a_lua_program_touching_arithmetic_tables_and_control_flow_runs_end_to_end() {
        let result = run_source(
            r#"
            local t = {1, 2, 3}
            local sum = 0
            for i = 1, #t do
                sum = sum + t[i]
            end
            return sum
            "#,
        )
        .unwrap();
        assert_eq!(result, vec![Value::Int(6)]);
    }

    #[test]
    fn a_jq_filter_touching_the_value_and_path_opcode_families_runs_end_to_end() {
        let inner = new_object(vec![("b".into(), Value::Int(7))]);
        let outer = new_object(vec![("a".into(), inner)]);
        let results = run_filter(".a.b", outer).unwrap();
        assert_eq!(results, vec![Value::Int(7)]);
    }
}
