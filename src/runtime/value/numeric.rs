//! Numeric tower
//!
//! Integer op Integer stays Integer unless the result leaves the i64 range, in
//! which case it is recomputed in Float. Integer op Float promotes to Float.
//! Integer division and modulo round toward negative infinity; Float follows
//! IEEE 754.

use std::cmp::Ordering;

use super::Value;

/// Binary arithmetic operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
}

impl ArithOp {
    /// Ruby operator spelling
    pub fn as_str(&self) -> &'static str {
        match self {
            ArithOp::Add => "+",
            ArithOp::Sub => "-",
            ArithOp::Mul => "*",
            ArithOp::Div => "/",
            ArithOp::Mod => "%",
            ArithOp::Pow => "**",
        }
    }
}

/// Failure of a numeric operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumericError {
    /// Integer division or modulo by zero
    ZeroDivision,
    /// One of the operands is not a number
    NotNumeric,
}

/// Apply `op` to two numeric values
pub fn arith(
    op: ArithOp,
    lhs: Value,
    rhs: Value,
) -> Result<Value, NumericError> {
    match (lhs, rhs) {
        (Value::Integer(a), Value::Integer(b)) => int_arith(op, a, b),
        (Value::Integer(_) | Value::Float(_), Value::Integer(_) | Value::Float(_)) => {
            let (Some(a), Some(b)) = (lhs.as_f64(), rhs.as_f64()) else {
                return Err(NumericError::NotNumeric);
            };
            Ok(Value::Float(float_arith(op, a, b)))
        }
        _ => Err(NumericError::NotNumeric),
    }
}

fn int_arith(
    op: ArithOp,
    a: i64,
    b: i64,
) -> Result<Value, NumericError> {
    let exact = match op {
        ArithOp::Add => a.checked_add(b),
        ArithOp::Sub => a.checked_sub(b),
        ArithOp::Mul => a.checked_mul(b),
        ArithOp::Div => {
            if b == 0 {
                return Err(NumericError::ZeroDivision);
            }
            floor_div(a, b)
        }
        ArithOp::Mod => {
            if b == 0 {
                return Err(NumericError::ZeroDivision);
            }
            Some(floor_mod(a, b))
        }
        ArithOp::Pow => {
            if b < 0 {
                return Ok(Value::Float((a as f64).powf(b as f64)));
            }
            u32::try_from(b).ok().and_then(|e| a.checked_pow(e))
        }
    };
    Ok(match exact {
        Some(v) => Value::Integer(v),
        None => Value::Float(float_arith(op, a as f64, b as f64)),
    })
}

fn float_arith(
    op: ArithOp,
    a: f64,
    b: f64,
) -> f64 {
    match op {
        ArithOp::Add => a + b,
        ArithOp::Sub => a - b,
        ArithOp::Mul => a * b,
        ArithOp::Div => a / b,
        ArithOp::Mod => {
            if b == 0.0 {
                f64::NAN
            } else {
                let r = a % b;
                if r != 0.0 && (r < 0.0) != (b < 0.0) {
                    r + b
                } else {
                    r
                }
            }
        }
        ArithOp::Pow => a.powf(b),
    }
}

/// Integer division rounding toward negative infinity; `None` on overflow
pub fn floor_div(
    a: i64,
    b: i64,
) -> Option<i64> {
    let q = a.checked_div(b)?;
    if a % b != 0 && ((a < 0) != (b < 0)) {
        Some(q - 1)
    } else {
        Some(q)
    }
}

/// Integer modulo with the sign of the divisor
pub fn floor_mod(
    a: i64,
    b: i64,
) -> i64 {
    let r = a.checked_rem(b).unwrap_or(0);
    if r != 0 && ((r < 0) != (b < 0)) {
        r + b
    } else {
        r
    }
}

/// Unary minus with overflow promotion
pub fn negate(v: Value) -> Result<Value, NumericError> {
    match v {
        Value::Integer(i) => Ok(match i.checked_neg() {
            Some(n) => Value::Integer(n),
            None => Value::Float(-(i as f64)),
        }),
        Value::Float(f) => Ok(Value::Float(-f)),
        _ => Err(NumericError::NotNumeric),
    }
}

/// Numeric ordering; `None` for NaN or non-numeric operands
pub fn compare(
    lhs: Value,
    rhs: Value,
) -> Option<Ordering> {
    match (lhs, rhs) {
        (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(&b)),
        _ => {
            let a = lhs.as_f64()?;
            let b = rhs.as_f64()?;
            a.partial_cmp(&b)
        }
    }
}

/// Numeric equality across Integer and Float (`1 == 1.0`)
pub fn num_eq(
    lhs: Value,
    rhs: Value,
) -> Option<bool> {
    match (lhs, rhs) {
        (Value::Integer(a), Value::Integer(b)) => Some(a == b),
        _ => Some(lhs.as_f64()? == rhs.as_f64()?),
    }
}

/// Format a float the way Ruby prints it
pub fn format_float(f: f64) -> String {
    if f.is_nan() {
        return "NaN".to_string();
    }
    if f.is_infinite() {
        return if f > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    let abs = f.abs();
    if abs != 0.0 && !(1e-4..1e16).contains(&abs) {
        // 1.0e+20 style
        let s = format!("{:e}", f);
        let (mantissa, exp) = s.split_once('e').unwrap_or((s.as_str(), "0"));
        let mantissa = if mantissa.contains('.') {
            mantissa.to_string()
        } else {
            format!("{}.0", mantissa)
        };
        let exp: i32 = exp.parse().unwrap_or(0);
        return format!("{}e{}{:02}", mantissa, if exp < 0 { '-' } else { '+' }, exp.abs());
    }
    let s = format!("{}", f);
    if s.contains('.') {
        s
    } else {
        format!("{}.0", s)
    }
}
