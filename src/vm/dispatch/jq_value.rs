//! jq value opcodes: field/index access, collection transforms
//! (map/sort/group/unique), string coercion and JSON stringification, all
//! expressed against this engine's tagged `Value`.

use crate::bytecode::Arg;
use crate::value::{new_object, new_object_ref, Value};
use crate::vm::jq_support::{jq_add, jq_cmp, jq_display, jq_tonumber, normalize_index};
use crate::vm::{EngineResult, StepOutcome, Vm};
use regex::Regex;

/// `NewList dst`: seeds `dst` with a fresh empty list. The compiler uses
/// this wherever it needs an empty-list literal that `Arg` has no variant
/// for directly (emit buffers, `[]` literals).
pub fn exec_new_list(vm: &mut Vm, args: &[Arg]) -> EngineResult<StepOutcome> {
    vm.set_reg(vm.reg_name(&args[0]), Value::list(Vec::new()));
    Ok(StepOutcome::Continue)
}

/// `NewObject dst`: seeds `dst` with a fresh empty object, for `{}` and
/// as the accumulator `ObjSet` repeatedly writes into.
pub fn exec_new_object(vm: &mut Vm, args: &[Arg]) -> EngineResult<StepOutcome> {
    vm.set_reg(vm.reg_name(&args[0]), new_object(Vec::new()));
    Ok(StepOutcome::Continue)
}

/// `ObjGet dst,src,key` (`.field`): missing field on a non-object, or a
/// missing key, both yield `Nil`; this opcode never raises.
pub fn exec_obj_get(vm: &mut Vm, args: &[Arg]) -> EngineResult<StepOutcome> {
    let src = vm.resolve_struct(&args[1]);
    let key = vm.resolve_struct(&args[2]);
    let key_str = key.as_str().unwrap_or_default();
    let value = match &src {
        Value::Object(o) => o.borrow().get(key_str).cloned().unwrap_or(Value::Nil),
        _ => Value::Nil,
    };
    vm.set_reg(vm.reg_name(&args[0]), value);
    Ok(StepOutcome::Continue)
}

/// `ObjSet obj,key,v`: if the named register does not already hold an
/// object, it is replaced with a fresh one.
pub fn exec_obj_set(vm: &mut Vm, args: &[Arg]) -> EngineResult<StepOutcome> {
    let existing = vm.resolve_struct(&args[0]);
    let key = vm.resolve_struct(&args[1]);
    let value = vm.resolve_struct(&args[2]);
    let key_str = key.as_str().unwrap_or_default().to_string();
    let obj = match existing {
        Value::Object(o) => o,
        _ => new_object_ref(Vec::new()),
    };
    obj.borrow_mut().set(key_str, value);
    vm.set_reg(vm.reg_name(&args[0]), Value::Object(obj));
    Ok(StepOutcome::Continue)
}

/// `GetIndex dst,src,key` (`.[n]`): numeric array indexing, negative
/// counts from the end; any miss or non-array yields `Nil`.
pub fn exec_get_index(vm: &mut Vm, args: &[Arg]) -> EngineResult<StepOutcome> {
    let src = vm.resolve_struct(&args[1]);
    let index = vm.resolve_struct(&args[2]).as_i64().unwrap_or(0);
    let value = match &src {
        Value::List(l) => {
            let items = l.borrow();
            normalize_index(items.len(), index).map(|i| items[i].clone()).unwrap_or(Value::Nil)
        }
        _ => Value::Nil,
    };
    vm.set_reg(vm.reg_name(&args[0]), value);
    Ok(StepOutcome::Continue)
}

/// `SetIndex t,k,v`: in-bounds or one-past-the-end writes on an array;
/// anything else is a silent no-op.
pub fn exec_set_index(vm: &mut Vm, args: &[Arg]) -> EngineResult<StepOutcome> {
    let container = vm.resolve_struct(&args[0]);
    let index = vm.resolve_struct(&args[1]).as_i64();
    let value = vm.resolve_struct(&args[2]);
    if let (Value::List(l), Some(index)) = (&container, index) {
        let mut items = l.borrow_mut();
        let len = items.len() as i64;
        let idx = if index < 0 { index + len } else { index };
        if idx >= 0 && idx < len {
            items[idx as usize] = value;
        } else if idx == len {
            items.push(value);
        }
    }
    Ok(StepOutcome::Continue)
}

/// `LenValue dst,src`: jq `length`.
pub fn exec_len_value(vm: &mut Vm, args: &[Arg]) -> EngineResult<StepOutcome> {
    let src = vm.resolve_struct(&args[1]);
    let len: i64 = match &src {
        Value::Nil => 0,
        Value::Str(s) => s.chars().count() as i64,
        Value::List(l) => l.borrow().len() as i64,
        Value::Object(o) => o.borrow().len() as i64,
        Value::Int(i) => i.abs(),
        Value::Float(f) => f.abs() as i64,
        _ => 0,
    };
    vm.set_reg(vm.reg_name(&args[0]), Value::Int(len));
    Ok(StepOutcome::Continue)
}

/// `Keys dst,src`: sorted object keys, or `0..len-1` for an array.
pub fn exec_keys(vm: &mut Vm, args: &[Arg]) -> EngineResult<StepOutcome> {
    let src = vm.resolve_struct(&args[1]);
    let keys = match &src {
        Value::Object(o) => {
            let mut ks: Vec<Value> = o.borrow().keys().into_iter().map(Value::Str).collect();
            ks.sort_by(|a, b| match (a, b) {
                (Value::Str(x), Value::Str(y)) => x.cmp(y),
                _ => std::cmp::Ordering::Equal,
            });
            ks
        }
        Value::List(l) => (0..l.borrow().len() as i64).map(Value::Int).collect(),
        _ => Vec::new(),
    };
    vm.set_reg(vm.reg_name(&args[0]), Value::list(keys));
    Ok(StepOutcome::Continue)
}

/// `Has dst,container,key`.
pub fn exec_has(vm: &mut Vm, args: &[Arg]) -> EngineResult<StepOutcome> {
    let container = vm.resolve_struct(&args[1]);
    let needle = vm.resolve_struct(&args[2]);
    let result = match (&container, &needle) {
        (Value::Object(o), Value::Str(k)) => o.borrow().contains_key(k),
        (Value::List(l), _) => needle.as_i64().map(|i| normalize_index(l.borrow().len(), i).is_some()).unwrap_or(false),
        _ => false,
    };
    vm.set_reg(vm.reg_name(&args[0]), Value::Bool(result));
    Ok(StepOutcome::Continue)
}

/// `Contains dst,a,b`: shallow containment, not jq's deep recursive variant.
pub fn exec_contains(vm: &mut Vm, args: &[Arg]) -> EngineResult<StepOutcome> {
    let a = vm.resolve_struct(&args[1]);
    let b = vm.resolve_struct(&args[2]);
    let result = match (&a, &b) {
        (Value::Str(hay), Value::Str(needle)) => hay.contains(needle.as_str()),
        (Value::List(l), _) => l.borrow().iter().any(|item| item.raw_eq(&b) || jq_cmp(item, &b) == std::cmp::Ordering::Equal),
        (Value::Object(o), Value::Str(k)) => o.borrow().contains_key(k),
        (Value::Object(a), Value::Object(b)) => {
            let ab = a.borrow();
            b.borrow().iter().all(|(k, v)| ab.get(k).map(|av| jq_cmp(av, v) == std::cmp::Ordering::Equal).unwrap_or(false))
        }
        _ => false,
    };
    vm.set_reg(vm.reg_name(&args[0]), Value::Bool(result));
    Ok(StepOutcome::Continue)
}

/// `Flatten dst,src`: one level of array flattening.
pub fn exec_flatten(vm: &mut Vm, args: &[Arg]) -> EngineResult<StepOutcome> {
    let src = vm.resolve_struct(&args[1]);
    let result = match &src {
        Value::List(l) => {
            let mut out = Vec::new();
            for item in l.borrow().iter() {
                match item {
                    Value::List(inner) => out.extend(inner.borrow().iter().cloned()),
                    other => out.push(other.clone()),
                }
            }
            Value::list(out)
        }
        Value::Nil => Value::list(Vec::new()),
        other => other.clone(),
    };
    vm.set_reg(vm.reg_name(&args[0]), result);
    Ok(StepOutcome::Continue)
}

pub fn exec_reverse(vm: &mut Vm, args: &[Arg]) -> EngineResult<StepOutcome> {
    let src = vm.resolve_struct(&args[1]);
    let result = match &src {
        Value::List(l) => {
            let mut items = l.borrow().clone();
            items.reverse();
            Value::list(items)
        }
        Value::Str(s) => Value::str(s.chars().rev().collect::<String>()),
        other => other.clone(),
    };
    vm.set_reg(vm.reg_name(&args[0]), result);
    Ok(StepOutcome::Continue)
}

pub fn exec_first(vm: &mut Vm, args: &[Arg]) -> EngineResult<StepOutcome> {
    let src = vm.resolve_struct(&args[1]);
    let result = match &src {
        Value::List(l) => l.borrow().first().cloned().unwrap_or(Value::Nil),
        Value::Str(s) => s.chars().next().map(|c| Value::str(c.to_string())).unwrap_or(Value::Nil),
        _ => Value::Nil,
    };
    vm.set_reg(vm.reg_name(&args[0]), result);
    Ok(StepOutcome::Continue)
}

pub fn exec_last(vm: &mut Vm, args: &[Arg]) -> EngineResult<StepOutcome> {
    let src = vm.resolve_struct(&args[1]);
    let result = match &src {
        Value::List(l) => l.borrow().last().cloned().unwrap_or(Value::Nil),
        Value::Str(s) => s.chars().next_back().map(|c| Value::str(c.to_string())).unwrap_or(Value::Nil),
        _ => Value::Nil,
    };
    vm.set_reg(vm.reg_name(&args[0]), result);
    Ok(StepOutcome::Continue)
}

pub fn exec_any(vm: &mut Vm, args: &[Arg]) -> EngineResult<StepOutcome> {
    let src = vm.resolve_struct(&args[1]);
    let result = match &src {
        Value::List(l) => l.borrow().iter().any(|v| v.is_truthy_jq()),
        other => other.is_truthy_jq(),
    };
    vm.set_reg(vm.reg_name(&args[0]), Value::Bool(result));
    Ok(StepOutcome::Continue)
}

pub fn exec_all(vm: &mut Vm, args: &[Arg]) -> EngineResult<StepOutcome> {
    let src = vm.resolve_struct(&args[1]);
    let result = match &src {
        Value::List(l) => l.borrow().iter().all(|v| v.is_truthy_jq()),
        other => other.is_truthy_jq(),
    };
    vm.set_reg(vm.reg_name(&args[0]), Value::Bool(result));
    Ok(StepOutcome::Continue)
}

/// `AggAdd dst,src`: jq `add`, restricted to homogeneous inputs.
pub fn exec_agg_add(vm: &mut Vm, args: &[Arg]) -> EngineResult<StepOutcome> {
    let src = vm.resolve_struct(&args[1]);
    let result = match &src {
        Value::List(l) => jq_add(&l.borrow()),
        _ => Value::Nil,
    };
    vm.set_reg(vm.reg_name(&args[0]), result);
    Ok(StepOutcome::Continue)
}

/// `Join dst,src,sep`: non-string elements stringify via `tostring`.
pub fn exec_join(vm: &mut Vm, args: &[Arg]) -> EngineResult<StepOutcome> {
    let src = vm.resolve_struct(&args[1]);
    let sep = vm.resolve_struct(&args[2]);
    let sep_str = jq_display(&sep);
    let result = match &src {
        Value::List(l) => {
            let parts: Vec<String> = l.borrow().iter().map(jq_display).collect();
            Value::str(parts.join(&sep_str))
        }
        _ => Value::str(""),
    };
    vm.set_reg(vm.reg_name(&args[0]), result);
    Ok(StepOutcome::Continue)
}

pub fn exec_sort(vm: &mut Vm, args: &[Arg]) -> EngineResult<StepOutcome> {
    let src = vm.resolve_struct(&args[1]);
    let result = match &src {
        Value::List(l) => {
            let mut items = l.borrow().clone();
            items.sort_by(jq_cmp);
            Value::list(items)
        }
        other => other.clone(),
    };
    vm.set_reg(vm.reg_name(&args[0]), result);
    Ok(StepOutcome::Continue)
}

/// `SortBy dst,values,keys`: `keys` is a register holding a parallel
/// per-element sort-key list, computed ahead of time by the compiler's
/// emit-buffer lowering of the `by` expression.
pub fn exec_sort_by(vm: &mut Vm, args: &[Arg]) -> EngineResult<StepOutcome> {
    let src = vm.resolve_struct(&args[1]);
    let keys = vm.resolve_struct(&args[2]);
    let result = match (&src, &keys) {
        (Value::List(values), Value::List(keys)) => {
            let mut pairs: Vec<(Value, Value)> = keys.borrow().iter().cloned().zip(values.borrow().iter().cloned()).collect();
            pairs.sort_by(|a, b| jq_cmp(&a.0, &b.0));
            Value::list(pairs.into_iter().map(|(_, v)| v).collect())
        }
        _ => src.clone(),
    };
    vm.set_reg(vm.reg_name(&args[0]), result);
    Ok(StepOutcome::Continue)
}

pub fn exec_unique(vm: &mut Vm, args: &[Arg]) -> EngineResult<StepOutcome> {
    let src = vm.resolve_struct(&args[1]);
    let result = match &src {
        Value::List(l) => {
            let mut items = l.borrow().clone();
            items.sort_by(jq_cmp);
            items.dedup_by(|a, b| jq_cmp(a, b) == std::cmp::Ordering::Equal);
            Value::list(items)
        }
        other => other.clone(),
    };
    vm.set_reg(vm.reg_name(&args[0]), result);
    Ok(StepOutcome::Continue)
}

pub fn exec_unique_by(vm: &mut Vm, args: &[Arg]) -> EngineResult<StepOutcome> {
    let src = vm.resolve_struct(&args[1]);
    let keys = vm.resolve_struct(&args[2]);
    let result = match (&src, &keys) {
        (Value::List(values), Value::List(keys)) => {
            let mut pairs: Vec<(Value, Value)> = keys.borrow().iter().cloned().zip(values.borrow().iter().cloned()).collect();
            pairs.sort_by(|a, b| jq_cmp(&a.0, &b.0));
            pairs.dedup_by(|a, b| jq_cmp(&a.0, &b.0) == std::cmp::Ordering::Equal);
            Value::list(pairs.into_iter().map(|(_, v)| v).collect())
        }
        _ => src.clone(),
    };
    vm.set_reg(vm.reg_name(&args[0]), result);
    Ok(StepOutcome::Continue)
}

pub fn exec_min(vm: &mut Vm, args: &[Arg]) -> EngineResult<StepOutcome> {
    let src = vm.resolve_struct(&args[1]);
    let result = match &src {
        Value::List(l) => l.borrow().iter().min_by(|a, b| jq_cmp(a, b)).cloned().unwrap_or(Value::Nil),
        _ => Value::Nil,
    };
    vm.set_reg(vm.reg_name(&args[0]), result);
    Ok(StepOutcome::Continue)
}

pub fn exec_max(vm: &mut Vm, args: &[Arg]) -> EngineResult<StepOutcome> {
    let src = vm.resolve_struct(&args[1]);
    let result = match &src {
        Value::List(l) => l.borrow().iter().max_by(|a, b| jq_cmp(a, b)).cloned().unwrap_or(Value::Nil),
        _ => Value::Nil,
    };
    vm.set_reg(vm.reg_name(&args[0]), result);
    Ok(StepOutcome::Continue)
}

pub fn exec_min_by(vm: &mut Vm, args: &[Arg]) -> EngineResult<StepOutcome> {
    let src = vm.resolve_struct(&args[1]);
    let keys = vm.resolve_struct(&args[2]);
    let result = match (&src, &keys) {
        (Value::List(values), Value::List(keys)) => {
            let values = values.borrow();
            let keys = keys.borrow();
            (0..values.len()).min_by(|&a, &b| jq_cmp(&keys[a], &keys[b])).map(|i| values[i].clone()).unwrap_or(Value::Nil)
        }
        _ => Value::Nil,
    };
    vm.set_reg(vm.reg_name(&args[0]), result);
    Ok(StepOutcome::Continue)
}

pub fn exec_max_by(vm: &mut Vm, args: &[Arg]) -> EngineResult<StepOutcome> {
    let src = vm.resolve_struct(&args[1]);
    let keys = vm.resolve_struct(&args[2]);
    let result = match (&src, &keys) {
        (Value::List(values), Value::List(keys)) => {
            let values = values.borrow();
            let keys = keys.borrow();
            (0..values.len()).max_by(|&a, &b| jq_cmp(&keys[a], &keys[b])).map(|i| values[i].clone()).unwrap_or(Value::Nil)
        }
        _ => Value::Nil,
    };
    vm.set_reg(vm.reg_name(&args[0]), result);
    Ok(StepOutcome::Continue)
}

/// `GroupBy dst,values,keys`: stable-sorts by key, then buckets
/// consecutive equal keys.
pub fn exec_group_by(vm: &mut Vm, args: &[Arg]) -> EngineResult<StepOutcome> {
    let src = vm.resolve_struct(&args[1]);
    let keys = vm.resolve_struct(&args[2]);
    let result = match (&src, &keys) {
        (Value::List(values), Value::List(keys)) => {
            let mut pairs: Vec<(Value, Value)> = keys.borrow().iter().cloned().zip(values.borrow().iter().cloned()).collect();
            pairs.sort_by(|a, b| jq_cmp(&a.0, &b.0));
            let mut groups: Vec<Value> = Vec::new();
            let mut bucket: Vec<Value> = Vec::new();
            let mut current_key: Option<Value> = None;
            for (k, v) in pairs {
                if let Some(ck) = &current_key {
                    if jq_cmp(ck, &k) != std::cmp::Ordering::Equal {
                        groups.push(Value::list(std::mem::take(&mut bucket)));
                    }
                }
                current_key = Some(k);
                bucket.push(v);
            }
            if !bucket.is_empty() {
                groups.push(Value::list(bucket));
            }
            Value::list(groups)
        }
        _ => Value::list(Vec::new()),
    };
    vm.set_reg(vm.reg_name(&args[0]), result);
    Ok(StepOutcome::Continue)
}

pub fn exec_tostring(vm: &mut Vm, args: &[Arg]) -> EngineResult<StepOutcome> {
    let src = vm.resolve_struct(&args[1]);
    vm.set_reg(vm.reg_name(&args[0]), Value::str(jq_display(&src)));
    Ok(StepOutcome::Continue)
}

pub fn exec_tonumber(vm: &mut Vm, args: &[Arg]) -> EngineResult<StepOutcome> {
    let src = vm.resolve_struct(&args[1]);
    let result = jq_tonumber(&src).unwrap_or(Value::Nil);
    vm.set_reg(vm.reg_name(&args[0]), result);
    Ok(StepOutcome::Continue)
}

/// `Split dst,src,sep`: literal separator split, not regex.
pub fn exec_split(vm: &mut Vm, args: &[Arg]) -> EngineResult<StepOutcome> {
    let src = vm.resolve_struct(&args[1]);
    let sep = vm.resolve_struct(&args[2]);
    let result = match (src.as_str(), sep.as_str()) {
        (Some(s), Some(sep)) if !sep.is_empty() => Value::list(s.split(sep).map(Value::str).collect()),
        (Some(s), Some(_)) => Value::list(s.chars().map(|c| Value::str(c.to_string())).collect()),
        _ => Value::list(Vec::new()),
    };
    vm.set_reg(vm.reg_name(&args[0]), result);
    Ok(StepOutcome::Continue)
}

/// `Gsub dst,src,pattern,replacement`: regex substitution; an invalid
/// pattern leaves the string unchanged.
pub fn exec_gsub(vm: &mut Vm, args: &[Arg]) -> EngineResult<StepOutcome> {
    let src = vm.resolve_struct(&args[1]);
    let pattern = vm.resolve_struct(&args[2]);
    let replacement = vm.resolve_struct(&args[3]);
    let result = match (src.as_str(), pattern.as_str(), replacement.as_str()) {
        (Some(s), Some(pat), Some(repl)) => match Regex::new(pat) {
            Ok(re) => Value::str(re.replace_all(s, repl).into_owned()),
            Err(_) => Value::str(s),
        },
        _ => src.clone(),
    };
    vm.set_reg(vm.reg_name(&args[0]), result);
    Ok(StepOutcome::Continue)
}

#[cfg(test)]
mod jq_value_tests {
    use crate::jq::run_filter;
    use crate::value::{new_object, Value};

    #[test]
    fn keys_are_sorted_for_objects_and_indices_for_arrays() {
        let input = new_object(vec![("b".into(), Value::Int(1)), ("a".into(), Value::Int(2))]);
        assert_eq!(run_filter("keys", input).unwrap(), vec![Value::list(vec![Value::str("a"), Value::str("b")])]);
        let input = Value::list(vec![Value::Int(9), Value::Int(9)]);
        assert_eq!(run_filter("keys", input).unwrap(), vec![Value::list(vec![Value::Int(0), Value::Int(1)])]);
    }

    #[test]
    fn group_by_buckets_consecutive_equal_keys_after_sorting() {
        let input = Value::list(vec![
            new_object(vec![("g".into(), Value::Int(2)), ("v".into(), Value::Int(1))]),
            new_object(vec![("g".into(), Value::Int(1)), ("v".into(), Value::Int(2))]),
            new_object(vec![("g".into(), Value::Int(1)), ("v".into(), Value::Int(3))]),
        ]);
        let result = run_filter("group_by(.g)", input).unwrap();
        assert_eq!(
            result,
            vec![Value::list(vec![
                Value::list(vec![
                    new_object(vec![("g".into(), Value::Int(1)), ("v".into(), Value::Int(2))]),
                    new_object(vec![("g".into(), Value::Int(1)), ("v".into(), Value::Int(3))]),
                ]),
                Value::list(vec![new_object(vec![("g".into(), Value::Int(2)), ("v".into(), Value::Int(1))])]),
            ])]
        );
    }

    #[test]
    fn unique_dedups_after_sorting_into_jq_total_order() {
        let input = Value::list(vec![Value::Int(3), Value::Int(1), Value::Int(3), Value::Int(2)]);
        let result = run_filter("unique", input).unwrap();
        assert_eq!(result, vec![Value::list(vec![Value::Int(1), Value::Int(2), Value::Int(3)])]);
    }

    #[test]
    fn split_on_literal_separator_and_gsub_with_regex() {
        let result = run_filter(r#""a,b,,c" | split(",")"#, Value::Nil).unwrap();
        assert_eq!(result, vec![Value::list(vec![Value::str("a"), Value::str("b"), Value::str(""), Value::str("c")])]);
        let result = run_filter(r#""a1b2c3" | gsub("[0-9]"; "")"#, Value::Nil).unwrap();
        assert_eq!(result, vec![Value::str("abc")]);
    }

    #[test]
    fn contains_checks_substring_and_object_subset() {
        assert_eq!(run_filter(r#""foobar" | contains("oob")"#, Value::Nil).unwrap(), vec![Value::Bool(true)]);
        let input = new_object(vec![("a".into(), Value::Int(1)), ("b".into(), Value::Int(2))]);
        assert_eq!(run_filter("contains({a: 1})", input).unwrap(), vec![Value::Bool(true)]);
    }
}
