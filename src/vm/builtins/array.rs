//! Array

use std::cmp::Ordering;

use super::{define, define_class_method, index_arg, int_arg, CallArgs};
use crate::runtime::class::builtin;
use crate::runtime::heap::VALUE_SLOT_BYTES;
use crate::runtime::value::numeric::compare;
use crate::runtime::value::{Handle, Value};
use crate::vm::errors::{NativeResult, Raise};
use crate::vm::executor::Vm;

pub(super) fn install(vm: &mut Vm) {
    let a = builtin::ARRAY;
    define_class_method(vm, a, "new", new);
    define(vm, a, "[]", aref);
    define(vm, a, "[]=", aset);
    define(vm, a, "<<", push);
    define(vm, a, "push", push);
    define(vm, a, "pop", pop);
    define(vm, a, "shift", shift);
    define(vm, a, "unshift", unshift);
    define(vm, a, "insert", insert);
    define(vm, a, "delete_at", delete_at);
    define(vm, a, "clear", clear);
    define(vm, a, "length", length);
    define(vm, a, "size", length);
    define(vm, a, "empty?", empty_p);
    define(vm, a, "first", first);
    define(vm, a, "last", last);
    define(vm, a, "include?", include_p);
    define(vm, a, "index", index);
    define(vm, a, "join", join);
    define(vm, a, "reverse", reverse);
    define(vm, a, "+", plus);
    define(vm, a, "concat", concat);
    define(vm, a, "dup", dup);
    define(vm, a, "compact", compact);
    define(vm, a, "uniq", uniq);
    define(vm, a, "sort", sort);
    define(vm, a, "min", min);
    define(vm, a, "max", max);
    define(vm, a, "sum", sum);
    define(vm, a, "to_a", dup);
}

fn handle_of(call: &CallArgs) -> Result<Handle, Raise> {
    match call.recv {
        Value::Array(h) => Ok(h),
        _ => Err(Raise::type_error("not an array")),
    }
}

/// Borrowed items of the receiver
fn items(
    vm: &Vm,
    v: Value,
) -> Vec<Value> {
    vm.heap.array(v).map(|a| a.items.clone()).unwrap_or_default()
}

/// New array holding owned copies of `values`
fn new_array(
    vm: &mut Vm,
    values: Vec<Value>,
) -> NativeResult {
    for v in &values {
        vm.heap.incref(*v);
    }
    Ok(vm.heap.alloc_array(values)?)
}

fn new(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    call.expect(0, 2)?;
    let n = match call.arg(0) {
        Value::Nil => 0,
        v => int_arg(vm, v)?,
    };
    let n = usize::try_from(n).map_err(|_| Raise::argument("negative array size"))?;
    vm.heap.check_room(n.checked_mul(VALUE_SLOT_BYTES))?;
    new_array(vm, vec![call.arg(1); n])
}

fn aref(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    call.expect(1, 2)?;
    let all = items(vm, call.recv);
    let len = all.len();
    match (call.arg(0), call.arg(1)) {
        (r @ Value::Range(_), Value::Nil) => {
            let Some(range) = vm.heap.range(r) else {
                return Ok(Value::Nil);
            };
            let (first, last, exclusive) = (range.first, range.last, range.exclusive);
            let Some(start) = index_arg(vm, first, len)? else {
                return Ok(Value::Nil);
            };
            if start > len {
                return Ok(Value::Nil);
            }
            let end = match last {
                Value::Nil => len,
                v => {
                    let e = int_arg(vm, v)?;
                    let e = if e < 0 { len as i64 + e } else { e };
                    let e = if exclusive { e } else { e.saturating_add(1) };
                    e.clamp(start as i64, len as i64) as usize
                }
            };
            new_array(vm, all[start..end].to_vec())
        }
        (i, Value::Nil) => match index_arg(vm, i, len)? {
            Some(idx) if idx < len => Ok(vm.dup_value(all[idx])),
            _ => Ok(Value::Nil),
        },
        (i, n) => {
            let Some(start) = index_arg(vm, i, len)? else {
                return Ok(Value::Nil);
            };
            let n = int_arg(vm, n)?;
            if start > len || n < 0 {
                return Ok(Value::Nil);
            }
            let end = start.saturating_add(n as usize).min(len);
            new_array(vm, all[start..end].to_vec())
        }
    }
}

fn aset(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    call.expect(2, 2)?;
    let h = handle_of(call)?;
    let len = items(vm, call.recv).len();
    let Some(idx) = index_arg(vm, call.arg(0), len)? else {
        return Err(Raise::new(
            builtin::INDEX_ERROR,
            format!("index {} too small for array", vm.inspect(call.arg(0))),
        ));
    };
    let v = vm.dup_value(call.arg(1));
    vm.heap.array_set(h, idx, v)?;
    Ok(vm.dup_value(call.arg(1)))
}

fn push(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    let h = handle_of(call)?;
    for v in &call.args {
        let v = vm.dup_value(*v);
        vm.heap.array_push(h, v)?;
    }
    Ok(vm.dup_value(call.recv))
}

fn pop(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    let h = handle_of(call)?;
    let len = items(vm, call.recv).len();
    if len == 0 {
        return Ok(Value::Nil);
    }
    Ok(vm.heap.array_remove(h, len - 1).unwrap_or(Value::Nil))
}

fn shift(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    let h = handle_of(call)?;
    Ok(vm.heap.array_remove(h, 0).unwrap_or(Value::Nil))
}

fn unshift(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    let h = handle_of(call)?;
    for (i, v) in call.args.iter().enumerate() {
        let v = vm.dup_value(*v);
        vm.heap.array_insert(h, i, v)?;
    }
    Ok(vm.dup_value(call.recv))
}

fn insert(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    call.expect(2, 2)?;
    let h = handle_of(call)?;
    let len = items(vm, call.recv).len();
    let Some(idx) = index_arg(vm, call.arg(0), len + 1)? else {
        return Err(Raise::new(builtin::INDEX_ERROR, "index out of array"));
    };
    let v = vm.dup_value(call.arg(1));
    vm.heap.array_insert(h, idx, v)?;
    Ok(vm.dup_value(call.recv))
}

fn delete_at(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    call.expect(1, 1)?;
    let h = handle_of(call)?;
    let len = items(vm, call.recv).len();
    match index_arg(vm, call.arg(0), len)? {
        Some(idx) => Ok(vm.heap.array_remove(h, idx).unwrap_or(Value::Nil)),
        None => Ok(Value::Nil),
    }
}

fn clear(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    let h = handle_of(call)?;
    vm.heap.array_clear(h);
    Ok(vm.dup_value(call.recv))
}

fn length(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    Ok(Value::Integer(
        vm.heap.array(call.recv).map_or(0, |a| a.items.len()) as i64,
    ))
}

fn empty_p(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    Ok(Value::from(
        vm.heap.array(call.recv).is_none_or(|a| a.items.is_empty()),
    ))
}

fn first(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    call.expect(0, 1)?;
    let all = items(vm, call.recv);
    if call.is_empty() {
        return Ok(all.first().map(|v| vm.dup_value(*v)).unwrap_or(Value::Nil));
    }
    let n = int_arg(vm, call.arg(0))?.max(0) as usize;
    new_array(vm, all.into_iter().take(n).collect())
}

fn last(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    call.expect(0, 1)?;
    let all = items(vm, call.recv);
    if call.is_empty() {
        return Ok(all.last().map(|v| vm.dup_value(*v)).unwrap_or(Value::Nil));
    }
    let n = (int_arg(vm, call.arg(0))?.max(0) as usize).min(all.len());
    new_array(vm, all[all.len() - n..].to_vec())
}

fn include_p(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    call.expect(1, 1)?;
    let needle = call.arg(0);
    Ok(Value::from(
        items(vm, call.recv).iter().any(|v| vm.ruby_eq(*v, needle)),
    ))
}

fn index(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    call.expect(1, 1)?;
    let needle = call.arg(0);
    Ok(items(vm, call.recv)
        .iter()
        .position(|v| vm.ruby_eq(*v, needle))
        .map(|i| Value::Integer(i as i64))
        .unwrap_or(Value::Nil))
}

fn join(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    call.expect(0, 1)?;
    let sep = match call.arg(0) {
        Value::Nil => String::new(),
        v => vm.to_s(v),
    };
    let parts: Vec<String> = items(vm, call.recv).iter().map(|v| vm.to_s(*v)).collect();
    vm.new_string(parts.join(&sep))
}

fn reverse(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    let mut all = items(vm, call.recv);
    all.reverse();
    new_array(vm, all)
}

fn plus(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    call.expect(1, 1)?;
    if !matches!(call.arg(0), Value::Array(_)) {
        return Err(Raise::type_error(format!(
            "no implicit conversion of {} into Array",
            vm.class_name(vm.class_of(call.arg(0)))
        )));
    }
    let mut all = items(vm, call.recv);
    all.extend(items(vm, call.arg(0)));
    new_array(vm, all)
}

fn concat(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    let h = handle_of(call)?;
    for other in &call.args {
        for v in items(vm, *other) {
            let v = vm.dup_value(v);
            vm.heap.array_push(h, v)?;
        }
    }
    Ok(vm.dup_value(call.recv))
}

fn dup(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    let all = items(vm, call.recv);
    new_array(vm, all)
}

fn compact(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    let all: Vec<Value> = items(vm, call.recv).into_iter().filter(|v| !v.is_nil()).collect();
    new_array(vm, all)
}

fn uniq(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    let mut out: Vec<Value> = Vec::new();
    for v in items(vm, call.recv) {
        if !out.iter().any(|u| vm.ruby_eq(*u, v)) {
            out.push(v);
        }
    }
    new_array(vm, out)
}

/// Ordering of two builtin values, None when not comparable
fn order(
    vm: &Vm,
    a: Value,
    b: Value,
) -> Option<Ordering> {
    if a.is_numeric() && b.is_numeric() {
        return compare(a, b);
    }
    match (vm.heap.string(a), vm.heap.string(b)) {
        (Some(x), Some(y)) => Some(x.bytes.cmp(&y.bytes)),
        _ => None,
    }
}

fn sorted(
    vm: &Vm,
    v: Value,
) -> Result<Vec<Value>, Raise> {
    let mut all = items(vm, v);
    let mut failed = None;
    all.sort_by(|a, b| {
        order(vm, *a, *b).unwrap_or_else(|| {
            failed.get_or_insert((*a, *b));
            Ordering::Equal
        })
    });
    if let Some((a, b)) = failed {
        return Err(Raise::argument(format!(
            "comparison of {} with {} failed",
            vm.class_name(vm.class_of(a)),
            vm.inspect(b)
        )));
    }
    Ok(all)
}

fn sort(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    let all = sorted(vm, call.recv)?;
    new_array(vm, all)
}

fn min(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    let all = sorted(vm, call.recv)?;
    Ok(all.first().map(|v| vm.dup_value(*v)).unwrap_or(Value::Nil))
}

fn max(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    let all = sorted(vm, call.recv)?;
    Ok(all.last().map(|v| vm.dup_value(*v)).unwrap_or(Value::Nil))
}

fn sum(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    let mut acc = Value::Integer(0);
    for v in items(vm, call.recv) {
        acc = crate::runtime::value::numeric::arith(
            crate::runtime::value::numeric::ArithOp::Add,
            acc,
            v,
        )
        .map_err(|_| {
            Raise::type_error(format!(
                "{} can't be coerced into Integer",
                vm.class_name(vm.class_of(v))
            ))
        })?;
    }
    Ok(acc)
}
