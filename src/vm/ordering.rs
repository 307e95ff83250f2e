//! jq's total order across types, used by `sort`/`group_by`:
//! `null < false < true < number < string < array < object`.

use crate::value::Value;
use std::cmp::Ordering;

fn type_rank(v: &Value) -> u8 {
    match v {
        Value::Nil => 0,
        Value::Bool(false) => 1,
        Value::Bool(true) => 2,
        Value::Int(_) | Value::Float(_) => 3,
        Value::Str(_) => 4,
        Value::List(_) => 5,
        Value::Object(_) => 6,
        // Lua-only variants never participate in jq ordering; rank them
        // last so comparisons stay total rather than panicking.
        _ => 7,
    }
}

pub fn jq_cmp(a: &Value, b: &Value) -> Ordering {
    let (ra, rb) = (type_rank(a), type_rank(b));
    if ra != rb {
        return ra.cmp(&rb);
    }
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => x.cmp(y),
        (Value::Float(x), Value::Float(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
        (Value::Int(x), Value::Float(y)) => (*x as f64).partial_cmp(y).unwrap_or(Ordering::Equal),
        (Value::Float(x), Value::Int(y)) => x.partial_cmp(&(*y as f64)).unwrap_or(Ordering::Equal),
        (Value::Str(x), Value::Str(y)) => x.cmp(y),
        (Value::List(x), Value::List(y)) => {
            let (xb, yb) = (x.borrow(), y.borrow());
            for (xe, ye) in xb.iter().zip(yb.iter()) {
                let ord = jq_cmp(xe, ye);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            xb.len().cmp(&yb.len())
        }
        (Value::Object(x), Value::Object(y)) => {
            let (xb, yb) = (x.borrow(), y.borrow());
            let mut xk = xb.keys();
            let mut yk = yb.keys();
            xk.sort();
            yk.sort();
            let key_ord = xk.cmp(&yk);
            if key_ord != Ordering::Equal {
                return key_ord;
            }
            for k in &xk {
                let (xv, yv) = (xb.get(k).unwrap(), yb.get(k).unwrap());
                let ord = jq_cmp(xv, yv);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        }
        _ => Ordering::Equal,
    }
}

#[cfg(test)]
mod ordering_tests {
    use super::*;
    use crate::value::{new_object, Value};

    #[test]
    fn type_rank_orders_null_below_booleans_below_numbers() {
        assert_eq!(jq_cmp(&Value::Nil, &Value::Bool(false)), Ordering::Less);
        assert_eq!(jq_cmp(&Value::Bool(false), &Value::Bool(true)), Ordering::Less);
        assert_eq!(jq_cmp(&Value::Bool(true), &Value::Int(-1000)), Ordering::Less);
    }

    #[test]
    fn numbers_compare_across_int_and_float() {
        assert_eq!(jq_cmp(&Value::Int(3), &Value::Float(3.5)), Ordering::Less);
        assert_eq!(jq_cmp(&Value::Float(2.0), &Value::Int(2)), Ordering::Equal);
    }

    #[test]
    fn strings_sort_lexicographically() {
        assert_eq!(jq_cmp(&Value::str("abc"), &Value::str("abd")), Ordering::Less);
    }

    #[test]
    fn arrays_compare_elementwise_then_by_length() {
        let short = Value::list(vec![Value::Int(1)]);
        let long = Value::list(vec![Value::Int(1), Value::Int(0)]);
        assert_eq!(jq_cmp(&short, &long), Ordering::Less);

        let a = Value::list(vec![Value::Int(1), Value::Int(5)]);
        let b = Value::list(vec![Value::Int(2), Value::Int(0)]);
        assert_eq!(jq_cmp(&a, &b), Ordering::Less);
    }

    #[test]
    fn objects_compare_by_sorted_keys_before_values() {
        let a = new_object(vec![("b".into(), Value::Int(1)), ("a".into(), Value::Int(2))]);
        let b = new_object(vec![("a".into(), Value::Int(2)), ("c".into(), Value::Int(0))]);
        // `a`'s key set {a, b} sorts before {a, c} since "b" < "c".
        assert_eq!(jq_cmp(&a, &b), Ordering::Less);
    }

    #[test]
    fn arrays_outrank_strings_which_outrank_numbers() {
        assert_eq!(jq_cmp(&Value::str("z"), &Value::list(vec![])), Ordering::Less);
        assert_eq!(jq_cmp(&Value::Int(999), &Value::str("")), Ordering::Less);
    }
}
