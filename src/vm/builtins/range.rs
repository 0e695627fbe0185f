//! Range and Proc

use super::{define, define_class_method, CallArgs};
use crate::runtime::class::builtin;
use crate::runtime::heap::{HeapBody, RRange};
use crate::runtime::value::numeric::compare;
use crate::runtime::value::Value;
use crate::vm::errors::{NativeResult, Raise};
use crate::vm::executor::Vm;

pub(super) fn install(vm: &mut Vm) {
    let r = builtin::RANGE;
    define_class_method(vm, r, "new", new);
    define(vm, r, "first", first);
    define(vm, r, "begin", first);
    define(vm, r, "last", last);
    define(vm, r, "end", last);
    define(vm, r, "exclude_end?", exclude_end_p);
    define(vm, r, "include?", include_p);
    define(vm, r, "===", include_p);
    define(vm, r, "size", size);

    let p = builtin::PROC;
    define(vm, p, "arity", arity);
    define(vm, p, "lambda?", lambda_p);
}

fn bounds(
    vm: &Vm,
    v: Value,
) -> Result<(Value, Value, bool), Raise> {
    vm.heap
        .range(v)
        .map(|r| (r.first, r.last, r.exclusive))
        .ok_or_else(|| Raise::type_error("not a range"))
}

fn new(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    call.expect(2, 3)?;
    let (first, last) = (call.arg(0), call.arg(1));
    if compare(first, last).is_none() && !(first.is_numeric() && last.is_nil()) {
        return Err(Raise::argument("bad value for range"));
    }
    let first = vm.dup_value(first);
    let last = vm.dup_value(last);
    Ok(vm.heap.alloc(HeapBody::Range(RRange {
        first,
        last,
        exclusive: call.arg(2).is_truthy(),
    }))?)
}

fn first(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    let (first, _, _) = bounds(vm, call.recv)?;
    Ok(vm.dup_value(first))
}

fn last(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    let (_, last, _) = bounds(vm, call.recv)?;
    Ok(vm.dup_value(last))
}

fn exclude_end_p(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    let (_, _, exclusive) = bounds(vm, call.recv)?;
    Ok(Value::from(exclusive))
}

fn include_p(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    call.expect(1, 1)?;
    let (first, last, exclusive) = bounds(vm, call.recv)?;
    let v = call.arg(0);
    let above = compare(first, v).is_some_and(|o| o.is_le());
    let below = match last {
        Value::Nil => v.is_numeric(),
        last => compare(v, last).is_some_and(|o| if exclusive { o.is_lt() } else { o.is_le() }),
    };
    Ok(Value::from(above && below))
}

fn size(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    let (first, last, exclusive) = bounds(vm, call.recv)?;
    match (first, last) {
        (Value::Integer(a), Value::Integer(b)) => {
            let n = b.saturating_sub(a) + if exclusive { 0 } else { 1 };
            Ok(Value::Integer(n.max(0)))
        }
        (Value::Integer(_), Value::Nil) => Ok(Value::Float(f64::INFINITY)),
        _ => Ok(Value::Nil),
    }
}

fn arity(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    let Some(body) = vm.heap.proc_body(call.recv) else {
        return Ok(Value::Integer(0));
    };
    let required = body.irep.argc as i64;
    let optional = body.irep.optc as i64;
    Ok(Value::Integer(if optional > 0 || (!body.lambda && required > 1) {
        -(required + 1)
    } else {
        required
    }))
}

fn lambda_p(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    Ok(Value::from(
        vm.heap.proc_body(call.recv).is_some_and(|p| p.lambda),
    ))
}
