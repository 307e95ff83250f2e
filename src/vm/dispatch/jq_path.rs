//! jq destructive path opcodes.
//!
//! A path is a `Value::List` of `Str` (object field) and `Int` (array
//! index) segments, auto-vivifying missing containers on write the way
//! jq's `setpath` does.

use crate::bytecode::Arg;
use crate::value::{new_object, Value};
use crate::vm::jq_support::normalize_index;
use crate::vm::{jq_cmp, EngineResult, StepOutcome, Vm};
use std::cmp::Ordering;

fn path_segments(path: &Value) -> Vec<Value> {
    match path {
        Value::List(l) => l.borrow().clone(),
        _ => Vec::new(),
    }
}

/// `GetPathValue dst,root,path`: walks `path`; any missing step along
/// the way yields `Nil`, matching jq's `getpath` on an unreachable path.
pub fn exec_get_path_value(vm: &mut Vm, args: &[Arg]) -> EngineResult<StepOutcome> {
    let root = vm.resolve_struct(&args[1]);
    let path = path_segments(&vm.resolve_struct(&args[2]));
    let mut current = root;
    for seg in &path {
        current = match (&current, seg) {
            (Value::Object(o), Value::Str(key)) => o.borrow().get(key).cloned().unwrap_or(Value::Nil),
            (Value::List(l), Value::Int(idx)) => {
                let items = l.borrow();
                normalize_index(items.len(), *idx).map(|i| items[i].clone()).unwrap_or(Value::Nil)
            }
            _ => Value::Nil,
        };
    }
    vm.set_reg(vm.reg_name(&args[0]), current);
    Ok(StepOutcome::Continue)
}

fn set_path_segments(container: &mut Value, path: &[Value], value: Value) {
    let Some(seg) = path.first() else {
        *container = value;
        return;
    };
    match seg {
        Value::Str(key) => {
            if !matches!(container, Value::Object(_)) {
                *container = new_object(Vec::new());
            }
            if let Value::Object(o) = container {
                let mut child = o.borrow().get(key).cloned().unwrap_or(Value::Nil);
                set_path_segments(&mut child, &path[1..], value);
                o.borrow_mut().set(key.clone(), child);
            }
        }
        Value::Int(idx) => {
            if !matches!(container, Value::List(_)) {
                *container = Value::list(Vec::new());
            }
            if let Value::List(l) = container {
                let pos = {
                    let items = l.borrow();
                    let len = items.len() as i64;
                    let p = if *idx < 0 { idx + len } else { *idx };
                    p.max(0) as usize
                };
                {
                    let mut items = l.borrow_mut();
                    while items.len() <= pos {
                        items.push(Value::Nil);
                    }
                }
                let mut child = l.borrow()[pos].clone();
                set_path_segments(&mut child, &path[1..], value);
                l.borrow_mut()[pos] = child;
            }
        }
        _ => {}
    }
}

/// `SetPaths root,path,value`: writes `value` at `path`, creating any
/// missing object/array containers along the way (jq `setpath`).
pub fn exec_set_paths(vm: &mut Vm, args: &[Arg]) -> EngineResult<StepOutcome> {
    let mut root = vm.resolve_struct(&args[0]);
    let path = path_segments(&vm.resolve_struct(&args[1]));
    let value = vm.resolve_struct(&args[2]);
    set_path_segments(&mut root, &path, value);
    vm.set_reg(vm.reg_name(&args[0]), root);
    Ok(StepOutcome::Continue)
}

fn del_path_segments(container: &mut Value, path: &[Value]) {
    if path.is_empty() {
        return;
    }
    if path.len() == 1 {
        match container {
            Value::Object(o) => {
                if let Value::Str(key) = &path[0] {
                    o.borrow_mut().remove(key);
                }
            }
            Value::List(l) => {
                if let Value::Int(idx) = &path[0] {
                    let len = l.borrow().len();
                    if let Some(pos) = normalize_index(len, *idx) {
                        l.borrow_mut().remove(pos);
                    }
                }
            }
            _ => {}
        }
        return;
    }
    match container {
        Value::Object(o) => {
            if let Value::Str(key) = &path[0] {
                let mut child = o.borrow().get(key).cloned().unwrap_or(Value::Nil);
                del_path_segments(&mut child, &path[1..]);
                o.borrow_mut().set(key.clone(), child);
            }
        }
        Value::List(l) => {
            if let Value::Int(idx) = &path[0] {
                let len = l.borrow().len();
                if let Some(pos) = normalize_index(len, *idx) {
                    let mut child = l.borrow()[pos].clone();
                    del_path_segments(&mut child, &path[1..]);
                    l.borrow_mut()[pos] = child;
                }
            }
        }
        _ => {}
    }
}

/// `DelPaths root,path`: removes the leaf named by `path`; a miss at
/// any step is a silent no-op (jq `del`).
pub fn exec_del_paths(vm: &mut Vm, args: &[Arg]) -> EngineResult<StepOutcome> {
    let mut root = vm.resolve_struct(&args[0]);
    let path = path_segments(&vm.resolve_struct(&args[1]));
    del_path_segments(&mut root, &path);
    vm.set_reg(vm.reg_name(&args[0]), root);
    Ok(StepOutcome::Continue)
}

fn collect_paths(value: &Value, prefix: &mut Vec<Value>, out: &mut Vec<Value>, matches: Option<&[Value]>) {
    match value {
        Value::Object(o) => {
            for (k, v) in o.borrow().iter() {
                prefix.push(Value::Str(k.clone()));
                record_path(v, prefix, out, matches);
                prefix.pop();
            }
        }
        Value::List(l) => {
            for (i, v) in l.borrow().iter().enumerate() {
                prefix.push(Value::Int(i as i64));
                record_path(v, prefix, out, matches);
                prefix.pop();
            }
        }
        _ => {}
    }
}

fn record_path(v: &Value, prefix: &mut Vec<Value>, out: &mut Vec<Value>, matches: Option<&[Value]>) {
    let keep = match matches {
        Some(values) => values.iter().any(|m| jq_cmp(v, m) == Ordering::Equal),
        None => true,
    };
    if keep {
        out.push(Value::list(prefix.clone()));
    }
    collect_paths(v, prefix, out, matches);
}

/// `PathsAll dst,src`: every reachable path under `src`, including
/// intermediate container paths (jq `paths`).
pub fn exec_paths_all(vm: &mut Vm, args: &[Arg]) -> EngineResult<StepOutcome> {
    let src = vm.resolve_struct(&args[1]);
    let mut out = Vec::new();
    collect_paths(&src, &mut Vec::new(), &mut out, None);
    vm.set_reg(vm.reg_name(&args[0]), Value::list(out));
    Ok(StepOutcome::Continue)
}

/// `PathsMatch dst,src,values`: `paths` filtered to nodes whose resolved
/// value equals (per jq's total order, `==`) one of the values in the
/// `values` list — the list is the fully materialized output of the
/// `paths(f)` predicate filter, collected via the emit-buffer discipline
/// before this opcode runs.
pub fn exec_paths_match(vm: &mut Vm, args: &[Arg]) -> EngineResult<StepOutcome> {
    let src = vm.resolve_struct(&args[1]);
    let values = vm.resolve_struct(&args[2]);
    let filter = match &values {
        Value::List(l) => Some(l.borrow().clone()),
        _ => None,
    };
    let mut out = Vec::new();
    collect_paths(&src, &mut Vec::new(), &mut out, filter.as_deref());
    vm.set_reg(vm.reg_name(&args[0]), Value::list(out));
    Ok(StepOutcome::Continue)
}

#[cfg(test)]
mod jq_path_tests {
    use crate::jq::run_filter;
    use crate::value::{new_object, Value};

    #[test]
    fn setpath_auto_vivifies_missing_containers() {
        let result = run_filter("setpath([\"a\", 0]; 1)", Value::Nil).unwrap();
        assert_eq!(result, vec![new_object(vec![("a".into(), Value::list(vec![Value::Int(1)]))])]);
    }

    #[test]
    fn del_removes_the_leaf_named_by_a_field_path() {
        let input = new_object(vec![("a".into(), Value::Int(1)), ("b".into(), Value::Int(2))]);
        let result = run_filter("del(.a)", input).unwrap();
        assert_eq!(result, vec![new_object(vec![("b".into(), Value::Int(2))])]);
    }

    #[test]
    fn getpath_on_an_unreachable_path_yields_null_not_an_error() {
        let input = new_object(vec![("a".into(), Value::Int(1))]);
        let result = run_filter("getpath([\"a\", \"b\", \"c\"])", input).unwrap();
        assert_eq!(result, vec![Value::Nil]);
    }

    #[test]
    fn paths_enumerates_every_reachable_path() {
        let input = new_object(vec![("a".into(), Value::list(vec![Value::Int(1)]))]);
        let result = run_filter("[paths]", input).unwrap();
        assert_eq!(
            result,
            vec![Value::list(vec![
                Value::list(vec![Value::str("a")]),
                Value::list(vec![Value::str("a"), Value::Int(0)]),
            ])]
        );
    }
}
