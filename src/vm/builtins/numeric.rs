//! Integer and Float

use std::cmp::Ordering;

use super::{define, int_arg, CallArgs};
use crate::runtime::class::builtin;
use crate::runtime::value::numeric::{arith, compare, format_float, negate, num_eq, ArithOp, NumericError};
use crate::runtime::value::Value;
use crate::vm::errors::{NativeResult, Raise};
use crate::vm::executor::Vm;

pub(super) fn install(vm: &mut Vm) {
    for class in [builtin::INTEGER, builtin::FLOAT] {
        define(vm, class, "+", add);
        define(vm, class, "-", sub);
        define(vm, class, "*", mul);
        define(vm, class, "/", div);
        define(vm, class, "%", modulo);
        define(vm, class, "**", pow);
        define(vm, class, "-@", neg);
        define(vm, class, "==", eq);
        define(vm, class, "<", lt);
        define(vm, class, "<=", le);
        define(vm, class, ">", gt);
        define(vm, class, ">=", ge);
        define(vm, class, "<=>", cmp);
        define(vm, class, "to_s", to_s);
        define(vm, class, "inspect", to_s);
        define(vm, class, "to_i", to_i);
        define(vm, class, "to_f", to_f);
        define(vm, class, "abs", abs);
        define(vm, class, "zero?", zero_p);
    }
    let i = builtin::INTEGER;
    define(vm, i, "even?", even_p);
    define(vm, i, "odd?", odd_p);
    define(vm, i, "succ", succ);
    define(vm, i, "next", succ);
    define(vm, i, "pred", pred);
    define(vm, i, "chr", chr);
    define(vm, i, "&", bit_and);
    define(vm, i, "|", bit_or);
    define(vm, i, "^", bit_xor);
    define(vm, i, "<<", shl);
    define(vm, i, ">>", shr);

    let f = builtin::FLOAT;
    define(vm, f, "nan?", nan_p);
    define(vm, f, "infinite?", infinite_p);
    define(vm, f, "floor", floor);
    define(vm, f, "ceil", ceil);
    define(vm, f, "round", round);
}

fn binary(
    vm: &mut Vm,
    call: &CallArgs,
    op: ArithOp,
) -> NativeResult {
    call.expect(1, 1)?;
    match arith(op, call.recv, call.arg(0)) {
        Ok(v) => Ok(v),
        Err(NumericError::ZeroDivision) => Err(Raise::zero_division()),
        Err(NumericError::NotNumeric) => Err(Raise::type_error(format!(
            "{} can't be coerced into {}",
            vm.class_name(vm.class_of(call.arg(0))),
            vm.class_name(vm.class_of(call.recv))
        ))),
    }
}

fn add(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    binary(vm, call, ArithOp::Add)
}

fn sub(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    binary(vm, call, ArithOp::Sub)
}

fn mul(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    binary(vm, call, ArithOp::Mul)
}

fn div(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    binary(vm, call, ArithOp::Div)
}

fn modulo(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    binary(vm, call, ArithOp::Mod)
}

fn pow(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    binary(vm, call, ArithOp::Pow)
}

fn neg(
    _vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    negate(call.recv).map_err(|_| Raise::type_error("not a number"))
}

fn eq(
    _vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    call.expect(1, 1)?;
    Ok(Value::from(num_eq(call.recv, call.arg(0)).unwrap_or(false)))
}

fn ordering(
    vm: &Vm,
    call: &CallArgs,
) -> Result<Option<Ordering>, Raise> {
    call.expect(1, 1)?;
    let other = call.arg(0);
    if !other.is_numeric() {
        return Err(Raise::argument(format!(
            "comparison of {} with {} failed",
            vm.class_name(vm.class_of(call.recv)),
            vm.inspect(other)
        )));
    }
    Ok(compare(call.recv, other))
}

fn lt(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    Ok(Value::from(ordering(vm, call)?.is_some_and(|o| o.is_lt())))
}

fn le(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    Ok(Value::from(ordering(vm, call)?.is_some_and(|o| o.is_le())))
}

fn gt(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    Ok(Value::from(ordering(vm, call)?.is_some_and(|o| o.is_gt())))
}

fn ge(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    Ok(Value::from(ordering(vm, call)?.is_some_and(|o| o.is_ge())))
}

fn cmp(
    _vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    call.expect(1, 1)?;
    Ok(match compare(call.recv, call.arg(0)) {
        Some(Ordering::Less) => Value::Integer(-1),
        Some(Ordering::Equal) => Value::Integer(0),
        Some(Ordering::Greater) => Value::Integer(1),
        None => Value::Nil,
    })
}

fn to_s(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    let s = match call.recv {
        Value::Integer(i) => i.to_string(),
        Value::Float(f) => format_float(f),
        other => vm.inspect(other),
    };
    vm.new_string(s)
}

/// Float to Integer; NaN and infinities have no Integer value
fn float_to_int(f: f64) -> NativeResult {
    if f.is_nan() {
        return Err(Raise::new(builtin::FLOAT_DOMAIN_ERROR, "NaN"));
    }
    if f.is_infinite() {
        let msg = if f > 0.0 { "Infinity" } else { "-Infinity" };
        return Err(Raise::new(builtin::FLOAT_DOMAIN_ERROR, msg));
    }
    if f >= i64::MAX as f64 || f < i64::MIN as f64 {
        return Err(Raise::new(builtin::RANGE_ERROR, format!("float {} out of range of Integer", format_float(f))));
    }
    Ok(Value::Integer(f as i64))
}

fn to_i(
    _vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    match call.recv {
        Value::Float(f) => float_to_int(f.trunc()),
        v => Ok(v),
    }
}

fn to_f(
    _vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    Ok(Value::Float(call.recv.as_f64().unwrap_or(0.0)))
}

fn abs(
    _vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    Ok(match call.recv {
        Value::Integer(i) => match i.checked_abs() {
            Some(a) => Value::Integer(a),
            None => Value::Float((i as f64).abs()),
        },
        Value::Float(f) => Value::Float(f.abs()),
        v => v,
    })
}

fn zero_p(
    _vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    Ok(Value::from(call.recv.as_f64() == Some(0.0)))
}

fn even_p(
    _vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    Ok(Value::from(call.recv.as_int().is_some_and(|i| i % 2 == 0)))
}

fn odd_p(
    _vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    Ok(Value::from(call.recv.as_int().is_some_and(|i| i % 2 != 0)))
}

fn succ(
    _vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    arith(ArithOp::Add, call.recv, Value::Integer(1)).map_err(|_| Raise::type_error("not a number"))
}

fn pred(
    _vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    arith(ArithOp::Sub, call.recv, Value::Integer(1)).map_err(|_| Raise::type_error("not a number"))
}

fn chr(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    let i = call.recv.as_int().unwrap_or(-1);
    let Ok(byte) = u8::try_from(i) else {
        return Err(Raise::new(builtin::RANGE_ERROR, format!("{} out of char range", i)));
    };
    vm.new_string(vec![byte])
}

fn int_pair(
    vm: &Vm,
    call: &CallArgs,
) -> Result<(i64, i64), Raise> {
    call.expect(1, 1)?;
    Ok((call.recv.as_int().unwrap_or(0), int_arg(vm, call.arg(0))?))
}

fn bit_and(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    let (a, b) = int_pair(vm, call)?;
    Ok(Value::Integer(a & b))
}

fn bit_or(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    let (a, b) = int_pair(vm, call)?;
    Ok(Value::Integer(a | b))
}

fn bit_xor(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    let (a, b) = int_pair(vm, call)?;
    Ok(Value::Integer(a ^ b))
}

fn shift(
    a: i64,
    by: i64,
) -> i64 {
    match by {
        0 => a,
        b if b >= 64 => 0,
        b if b > 0 => a.wrapping_shl(b as u32),
        b if b <= -64 => {
            if a < 0 {
                -1
            } else {
                0
            }
        }
        b => a >> (-b) as u32,
    }
}

fn shl(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    let (a, b) = int_pair(vm, call)?;
    Ok(Value::Integer(shift(a, b)))
}

fn shr(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    let (a, b) = int_pair(vm, call)?;
    Ok(Value::Integer(shift(a, b.saturating_neg())))
}

fn nan_p(
    _vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    Ok(Value::from(matches!(call.recv, Value::Float(f) if f.is_nan())))
}

fn infinite_p(
    _vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    Ok(match call.recv {
        Value::Float(f) if f == f64::INFINITY => Value::Integer(1),
        Value::Float(f) if f == f64::NEG_INFINITY => Value::Integer(-1),
        _ => Value::Nil,
    })
}

fn floor(
    _vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    float_to_int(call.recv.as_f64().unwrap_or(0.0).floor())
}

fn ceil(
    _vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    float_to_int(call.recv.as_f64().unwrap_or(0.0).ceil())
}

fn round(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    call.expect(0, 1)?;
    let f = call.recv.as_f64().unwrap_or(0.0);
    if call.is_empty() {
        return float_to_int(f.round());
    }
    let digits = int_arg(vm, call.arg(0))?.clamp(-15, 15) as i32;
    let scale = 10f64.powi(digits);
    Ok(Value::Float((f * scale).round() / scale))
}
