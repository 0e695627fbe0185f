//! Hash

use super::{define, define_class_method, CallArgs};
use crate::runtime::class::builtin;
use crate::runtime::heap::{HeapBody, RHash};
use crate::runtime::value::{Handle, Value};
use crate::vm::errors::{NativeResult, Raise};
use crate::vm::executor::Vm;

pub(super) fn install(vm: &mut Vm) {
    let h = builtin::HASH;
    define_class_method(vm, h, "new", new);
    define(vm, h, "[]", aref);
    define(vm, h, "[]=", aset);
    define(vm, h, "store", aset);
    define(vm, h, "fetch", fetch);
    define(vm, h, "key?", key_p);
    define(vm, h, "has_key?", key_p);
    define(vm, h, "include?", key_p);
    define(vm, h, "delete", delete);
    define(vm, h, "keys", keys);
    define(vm, h, "values", values);
    define(vm, h, "length", length);
    define(vm, h, "size", length);
    define(vm, h, "empty?", empty_p);
    define(vm, h, "merge", merge);
    define(vm, h, "to_a", to_a);
}

fn handle_of(call: &CallArgs) -> Result<Handle, Raise> {
    match call.recv {
        Value::Hash(h) => Ok(h),
        _ => Err(Raise::type_error("not a hash")),
    }
}

fn entries(
    vm: &Vm,
    v: Value,
) -> Vec<(Value, Value)> {
    vm.heap.hash(v).map(|h| h.entries.clone()).unwrap_or_default()
}

fn new(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    call.expect(0, 0)?;
    Ok(vm.heap.alloc(HeapBody::Hash(RHash::default()))?)
}

fn aref(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    call.expect(1, 1)?;
    let h = handle_of(call)?;
    let v = vm.heap.hash_get(h, call.arg(0)).unwrap_or(Value::Nil);
    Ok(vm.dup_value(v))
}

fn aset(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    call.expect(2, 2)?;
    let h = handle_of(call)?;
    // string keys are stored as private copies
    let key = match call.arg(0) {
        k @ Value::String(_) => {
            let bytes = vm.heap.string(k).map(|s| s.bytes.clone()).unwrap_or_default();
            vm.heap.alloc_string(bytes)?
        }
        k => vm.dup_value(k),
    };
    let val = vm.dup_value(call.arg(1));
    vm.heap.hash_set(h, key, val)?;
    Ok(vm.dup_value(call.arg(1)))
}

fn fetch(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    call.expect(1, 2)?;
    let h = handle_of(call)?;
    match vm.heap.hash_get(h, call.arg(0)) {
        Some(v) => Ok(vm.dup_value(v)),
        None if call.len() == 2 => Ok(vm.dup_value(call.arg(1))),
        None => Err(Raise::new(
            builtin::KEY_ERROR,
            format!("key not found: {}", vm.inspect(call.arg(0))),
        )),
    }
}

fn key_p(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    call.expect(1, 1)?;
    let h = handle_of(call)?;
    Ok(Value::from(vm.heap.hash_get(h, call.arg(0)).is_some()))
}

fn delete(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    call.expect(1, 1)?;
    let h = handle_of(call)?;
    Ok(vm.heap.hash_delete(h, call.arg(0)).unwrap_or(Value::Nil))
}

fn collect(
    vm: &mut Vm,
    values: Vec<Value>,
) -> NativeResult {
    for v in &values {
        vm.heap.incref(*v);
    }
    Ok(vm.heap.alloc_array(values)?)
}

fn keys(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    let keys = entries(vm, call.recv).into_iter().map(|(k, _)| k).collect();
    collect(vm, keys)
}

fn values(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    let values = entries(vm, call.recv).into_iter().map(|(_, v)| v).collect();
    collect(vm, values)
}

fn length(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    Ok(Value::Integer(entries(vm, call.recv).len() as i64))
}

fn empty_p(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    Ok(Value::from(entries(vm, call.recv).is_empty()))
}

fn merge(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    call.expect(1, 1)?;
    let merged = vm.heap.alloc(HeapBody::Hash(RHash::default()))?;
    let Value::Hash(target) = merged else {
        return Ok(merged);
    };
    for (k, v) in entries(vm, call.recv)
        .into_iter()
        .chain(entries(vm, call.arg(0)))
    {
        vm.heap.incref(k);
        vm.heap.incref(v);
        if let Err(e) = vm.heap.hash_set(target, k, v) {
            vm.heap.decref(merged);
            return Err(e.into());
        }
    }
    Ok(merged)
}

fn to_a(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    let mut pairs = Vec::new();
    for (k, v) in entries(vm, call.recv) {
        vm.heap.incref(k);
        vm.heap.incref(v);
        match vm.heap.alloc_array(vec![k, v]) {
            Ok(pair) => pairs.push(pair),
            Err(e) => {
                for p in pairs {
                    vm.heap.decref(p);
                }
                return Err(e.into());
            }
        }
    }
    Ok(vm.heap.alloc_array(pairs)?)
}
