//! Value 单元测试
//!
//! Tags, truthiness and the numeric tower.

use crate::runtime::value::numeric::{
    arith, compare, floor_div, floor_mod, format_float, negate, num_eq, ArithOp, NumericError,
};
use crate::runtime::value::{Handle, Value, ValueType};
use std::cmp::Ordering;

#[cfg(test)]
mod value_tests {
    use super::*;

    #[test]
    fn test_truthiness() {
        assert!(!Value::Nil.is_truthy());
        assert!(!Value::False.is_truthy());
        assert!(Value::True.is_truthy());
        assert!(Value::Integer(0).is_truthy());
        assert!(Value::Float(0.0).is_truthy());
    }

    #[test]
    fn test_immediates_are_not_refs() {
        for v in [
            Value::Nil,
            Value::True,
            Value::Integer(7),
            Value::Float(1.5),
        ] {
            assert!(!v.is_ref());
            assert_eq!(v.handle(), None);
        }
        let h = Handle::new(3, 1);
        assert_eq!(Value::Array(h).handle(), Some(h));
        assert_eq!(Value::String(h).value_type(), ValueType::String);
    }

    #[test]
    fn test_identical_nan() {
        let nan = Value::Float(f64::NAN);
        assert!(nan.identical(&nan));
        assert_ne!(nan, nan);
    }
}

#[cfg(test)]
mod numeric_tests {
    use super::*;

    #[test]
    fn test_integer_overflow_promotes_to_float() {
        let v = arith(ArithOp::Add, Value::Integer(i64::MAX), Value::Integer(1)).unwrap();
        assert_eq!(v, Value::Float(9.223372036854776e18));
        assert_eq!(format_float(9.223372036854776e18), "9.223372036854776e+18");

        let v = arith(ArithOp::Sub, Value::Integer(i64::MIN), Value::Integer(1)).unwrap();
        assert!(matches!(v, Value::Float(_)));

        let v = arith(ArithOp::Mul, Value::Integer(i64::MAX), Value::Integer(2)).unwrap();
        assert_eq!(v, Value::Float(i64::MAX as f64 * 2.0));
    }

    #[test]
    fn test_boundary_stays_integer() {
        let v = arith(ArithOp::Add, Value::Integer(i64::MAX - 1), Value::Integer(1)).unwrap();
        assert_eq!(v, Value::Integer(i64::MAX));
    }

    #[test]
    fn test_integer_division_by_zero() {
        assert_eq!(
            arith(ArithOp::Div, Value::Integer(1), Value::Integer(0)),
            Err(NumericError::ZeroDivision)
        );
        assert_eq!(
            arith(ArithOp::Mod, Value::Integer(1), Value::Integer(0)),
            Err(NumericError::ZeroDivision)
        );
    }

    #[test]
    fn test_float_division_by_zero() {
        let v = arith(ArithOp::Div, Value::Float(1.0), Value::Float(0.0)).unwrap();
        assert_eq!(v, Value::Float(f64::INFINITY));
        let v = arith(ArithOp::Div, Value::Integer(-1), Value::Float(0.0)).unwrap();
        assert_eq!(v, Value::Float(f64::NEG_INFINITY));
        let Value::Float(nan) = arith(ArithOp::Div, Value::Float(0.0), Value::Float(0.0)).unwrap()
        else {
            panic!("expected float");
        };
        assert!(nan.is_nan());
    }

    #[test]
    fn test_mixed_promotes_to_float() {
        let v = arith(ArithOp::Add, Value::Integer(1), Value::Float(0.5)).unwrap();
        assert_eq!(v, Value::Float(1.5));
        let v = arith(ArithOp::Mul, Value::Float(2.0), Value::Integer(3)).unwrap();
        assert_eq!(v, Value::Float(6.0));
    }

    #[test]
    fn test_floor_semantics() {
        assert_eq!(floor_div(7, 2), Some(3));
        assert_eq!(floor_div(-7, 2), Some(-4));
        assert_eq!(floor_div(7, -2), Some(-4));
        assert_eq!(floor_div(i64::MIN, -1), None);
        assert_eq!(floor_mod(-7, 2), 1);
        assert_eq!(floor_mod(7, -2), -1);
        assert_eq!(floor_mod(i64::MIN, -1), 0);
        let v = arith(ArithOp::Div, Value::Integer(i64::MIN), Value::Integer(-1)).unwrap();
        assert_eq!(v, Value::Float(9.223372036854776e18));
    }

    #[test]
    fn test_pow() {
        assert_eq!(
            arith(ArithOp::Pow, Value::Integer(2), Value::Integer(10)),
            Ok(Value::Integer(1024))
        );
        assert_eq!(
            arith(ArithOp::Pow, Value::Integer(2), Value::Integer(-1)),
            Ok(Value::Float(0.5))
        );
        assert!(matches!(
            arith(ArithOp::Pow, Value::Integer(10), Value::Integer(30)),
            Ok(Value::Float(_))
        ));
    }

    #[test]
    fn test_not_numeric() {
        assert_eq!(
            arith(ArithOp::Add, Value::Integer(1), Value::Nil),
            Err(NumericError::NotNumeric)
        );
        assert_eq!(negate(Value::True), Err(NumericError::NotNumeric));
    }

    #[test]
    fn test_negate_min() {
        assert_eq!(negate(Value::Integer(5)), Ok(Value::Integer(-5)));
        assert_eq!(
            negate(Value::Integer(i64::MIN)),
            Ok(Value::Float(9.223372036854776e18))
        );
    }

    #[test]
    fn test_compare_and_eq() {
        assert_eq!(
            compare(Value::Integer(1), Value::Float(1.5)),
            Some(Ordering::Less)
        );
        assert_eq!(compare(Value::Float(f64::NAN), Value::Integer(1)), None);
        assert_eq!(num_eq(Value::Integer(1), Value::Float(1.0)), Some(true));
        assert_eq!(num_eq(Value::Integer(1), Value::Nil), None);
    }

    #[test]
    fn test_format_float() {
        assert_eq!(format_float(3.0), "3.0");
        assert_eq!(format_float(1.5), "1.5");
        assert_eq!(format_float(-0.25), "-0.25");
        assert_eq!(format_float(1e20), "1.0e+20");
        assert_eq!(format_float(1.5e-7), "1.5e-07");
        assert_eq!(format_float(f64::INFINITY), "Infinity");
        assert_eq!(format_float(f64::NAN), "NaN");
    }
}
