//! Arithmetic and bitwise opcodes.
//!
//! Lua number semantics: integer ops stay integer, mixing with float
//! promotes the whole expression to float. `Div` truncates to integer when
//! both operands are integer, a deliberate divergence from reference Lua
//! 5.3+ which returns a float.

use crate::bytecode::Arg;
use crate::value::{engine_type_error, Value};
use crate::vm::{EngineError, EngineResult, StepOutcome, Vm};

#[derive(Clone, Copy)]
enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    IDiv,
    Pow,
}

fn metamethod_name(op: ArithOp) -> &'static str {
    match op {
        ArithOp::Add => "__add",
        ArithOp::Sub => "__sub",
        ArithOp::Mul => "__mul",
        ArithOp::Div => "__div",
        ArithOp::Mod => "__mod",
        ArithOp::IDiv => "__idiv",
        ArithOp::Pow => "__pow",
    }
}

fn apply(op: ArithOp, a: &Value, b: &Value) -> EngineResult<Option<Value>> {
    if let (Value::Int(x), Value::Int(y)) = (a, b) {
        return Ok(Some(match op {
            ArithOp::Add => Value::Int(x.wrapping_add(*y)),
            ArithOp::Sub => Value::Int(x.wrapping_sub(*y)),
            ArithOp::Mul => Value::Int(x.wrapping_mul(*y)),
            ArithOp::Div => {
                // Truncates toward zero when both operands are integer,
                // unlike reference Lua 5.3+'s float result.
                if *y == 0 {
                    return Err(EngineError::arithmetic("attempt to perform 'n/0'"));
                }
                Value::Int(x.wrapping_div(*y))
            }
            ArithOp::IDiv => {
                if *y == 0 {
                    return Err(EngineError::arithmetic("attempt to perform 'n//0'"));
                }
                let q = x / y;
                let r = x % y;
                Value::Int(if r != 0 && (r < 0) != (*y < 0) { q - 1 } else { q })
            }
            ArithOp::Mod => {
                if *y == 0 {
                    return Err(EngineError::arithmetic("attempt to perform 'n%%0'"));
                }
                Value::Int(((x % y) + y) % y)
            }
            ArithOp::Pow => Value::Float((*x as f64).powf(*y as f64)),
        }));
    }
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => Ok(Some(match op {
            ArithOp::Add => Value::Float(x + y),
            ArithOp::Sub => Value::Float(x - y),
            ArithOp::Mul => Value::Float(x * y),
            ArithOp::Div => Value::Float(x / y),
            ArithOp::IDiv => Value::Float((x / y).floor()),
            ArithOp::Mod => Value::Float(x - (x / y).floor() * y),
            ArithOp::Pow => Value::Float(x.powf(y)),
        })),
        _ => Ok(None),
    }
}

fn exec_binop(vm: &mut Vm, args: &[Arg], op: ArithOp) -> EngineResult<StepOutcome> {
    let a = vm.resolve_arith(&args[1]);
    let b = vm.resolve_arith(&args[2]);
    let result = match apply(op, &a, &b)? {
        Some(v) => v,
        None => match vm.arith_metamethod(metamethod_name(op), &a, &b)? {
            Some(v) => v,
            None => return Err(engine_type_error("perform arithmetic on", if a.as_f64().is_none() { &a } else { &b })),
        },
    };
    vm.set_reg(vm.reg_name(&args[0]), result);
    Ok(StepOutcome::Continue)
}

pub fn exec_add(vm: &mut Vm, args: &[Arg]) -> EngineResult<StepOutcome> {
    exec_binop(vm, args, ArithOp::Add)
}
pub fn exec_sub(vm: &mut Vm, args: &[Arg]) -> EngineResult<StepOutcome> {
    exec_binop(vm, args, ArithOp::Sub)
}
pub fn exec_mul(vm: &mut Vm, args: &[Arg]) -> EngineResult<StepOutcome> {
    exec_binop(vm, args, ArithOp::Mul)
}
pub fn exec_div(vm: &mut Vm, args: &[Arg]) -> EngineResult<StepOutcome> {
    exec_binop(vm, args, ArithOp::Div)
}
pub fn exec_idiv(vm: &mut Vm, args: &[Arg]) -> EngineResult<StepOutcome> {
    exec_binop(vm, args, ArithOp::IDiv)
}
pub fn exec_mod(vm: &mut Vm, args: &[Arg]) -> EngineResult<StepOutcome> {
    exec_binop(vm, args, ArithOp::Mod)
}
pub fn exec_pow(vm: &mut Vm, args: &[Arg]) -> EngineResult<StepOutcome> {
    exec_binop(vm, args, ArithOp::Pow)
}

/// `Neg dst,src`: unary minus, falling back to `__unm`.
pub fn exec_neg(vm: &mut Vm, args: &[Arg]) -> EngineResult<StepOutcome> {
    let a = vm.resolve_arith(&args[1]);
    let result = match &a {
        Value::Int(i) => Value::Int(i.wrapping_neg()),
        Value::Float(f) => Value::Float(-f),
        _ => match vm.unary_metamethod("__unm", &a)? {
            Some(v) => v,
            None => return Err(engine_type_error("perform arithmetic on", &a)),
        },
    };
    vm.set_reg(vm.reg_name(&args[0]), result);
    Ok(StepOutcome::Continue)
}

/// `Concat dst,a,b`: string join with Lua `tostring` coercion, falling
/// back to `__concat`.
pub fn exec_concat(vm: &mut Vm, args: &[Arg]) -> EngineResult<StepOutcome> {
    let a = vm.resolve_struct(&args[1]);
    let b = vm.resolve_struct(&args[2]);
    let concatable = |v: &Value| matches!(v, Value::Str(_) | Value::Int(_) | Value::Float(_));
    let result = if concatable(&a) && concatable(&b) {
        Value::str(format!("{}{}", a.lua_tostring(), b.lua_tostring()))
    } else {
        match vm.arith_metamethod("__concat", &a, &b)? {
            Some(v) => v,
            None => return Err(engine_type_error("concatenate", if concatable(&a) { &b } else { &a })),
        }
    };
    vm.set_reg(vm.reg_name(&args[0]), result);
    Ok(StepOutcome::Continue)
}

fn as_bits(v: &Value) -> EngineResult<i64> {
    v.as_i64().ok_or_else(|| EngineError::arithmetic(format!("attempt to perform bitwise operation on a {} value", v.type_name())))
}

fn exec_bitop(vm: &mut Vm, args: &[Arg], f: impl Fn(i64, i64) -> i64) -> EngineResult<StepOutcome> {
    let a = as_bits(&vm.resolve_arith(&args[1]))?;
    let b = as_bits(&vm.resolve_arith(&args[2]))?;
    vm.set_reg(vm.reg_name(&args[0]), Value::Int(f(a, b)));
    Ok(StepOutcome::Continue)
}

pub fn exec_and_bit(vm: &mut Vm, args: &[Arg]) -> EngineResult<StepOutcome> {
    exec_bitop(vm, args, |a, b| a & b)
}
pub fn exec_or_bit(vm: &mut Vm, args: &[Arg]) -> EngineResult<StepOutcome> {
    exec_bitop(vm, args, |a, b| a | b)
}
pub fn exec_xor(vm: &mut Vm, args: &[Arg]) -> EngineResult<StepOutcome> {
    exec_bitop(vm, args, |a, b| a ^ b)
}
pub fn exec_shl(vm: &mut Vm, args: &[Arg]) -> EngineResult<StepOutcome> {
    exec_bitop(vm, args, |a, b| {
        if b < 0 || b >= 64 { 0 } else { ((a as u64) << b) as i64 }
    })
}

/// `Shr`: a 32-bit masked logical shift, not a 64-bit one — kept as a
/// documented divergence rather than "fixed".
pub fn exec_shr(vm: &mut Vm, args: &[Arg]) -> EngineResult<StepOutcome> {
    exec_bitop(vm, args, |a, b| {
        let low = a as u32;
        if b < 0 || b >= 32 { 0 } else { (low >> b) as i64 }
    })
}

pub fn exec_sar(vm: &mut Vm, args: &[Arg]) -> EngineResult<StepOutcome> {
    exec_bitop(vm, args, |a, b| {
        if b < 0 || b >= 64 { if a < 0 { -1 } else { 0 } } else { a >> b }
    })
}

pub fn exec_not_bit(vm: &mut Vm, args: &[Arg]) -> EngineResult<StepOutcome> {
    let a = as_bits(&vm.resolve_arith(&args[1]))?;
    vm.set_reg(vm.reg_name(&args[0]), Value::Int(!a));
    Ok(StepOutcome::Continue)
}

#[cfg(test)]
mod arith_tests {
    use crate::lua::run_source;
    use crate::value::Value;

    #[test]
    fn integer_division_by_zero_is_an_error_not_a_panic() {
        let err = run_source("return 1 // 0").unwrap_err();
        assert!(err.to_string().contains("n//0"));
    }

    #[test]
    fn mixing_int_and_float_promotes_the_whole_expression() {
        let result = run_source("return 1 + 2.5").unwrap();
        assert_eq!(result, vec![Value::Float(3.5)]);
    }

    #[test]
    fn integer_division_truncates_toward_zero() {
        let result = run_source("return 7 // 2, -7 // 2").unwrap();
        assert_eq!(result, vec![Value::Int(3), Value::Int(-4)]);
    }

    #[test]
    fn modulo_follows_the_sign_of_the_divisor() {
        let result = run_source("return -1 % 4").unwrap();
        assert_eq!(result, vec![Value::Int(3)]);
    }

    #[test]
    fn concat_coerces_numbers_to_strings() {
        let result = run_source(r#"return "n=" .. 5"#).unwrap();
        assert_eq!(result, vec![Value::str("n=5")]);
    }

    #[test]
    fn bitwise_and_shift_operate_on_integers() {
        let result = run_source("return 6 & 3, 1 << 4, ~0").unwrap();
        assert_eq!(result, vec![Value::Int(2), Value::Int(16), Value::Int(-1)]);
    }
}
