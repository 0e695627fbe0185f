//! Exception

use super::{define, CallArgs};
use crate::runtime::class::builtin;
use crate::runtime::value::Value;
use crate::vm::errors::NativeResult;
use crate::vm::executor::Vm;

pub(super) fn install(vm: &mut Vm) {
    let e = builtin::EXCEPTION;
    define(vm, e, "initialize", initialize);
    define(vm, e, "message", message);
    define(vm, e, "to_s", message);
    define(vm, e, "inspect", inspect);
    define(vm, e, "==", eq);
}

/// `Exception.new(msg = nil)`
fn initialize(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    call.expect(0, 1)?;
    let msg = match call.arg(0) {
        Value::Nil => Value::Nil,
        v @ Value::String(_) => vm.dup_value(v),
        v => {
            let text = vm.to_s(v);
            vm.new_string(text)?
        }
    };
    let name = vm.sym.message_iv;
    vm.heap.ivar_set(call.recv, name, msg)?;
    Ok(Value::Nil)
}

fn message(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    let text = vm.exception_message(call.recv);
    vm.new_string(text)
}

fn inspect(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    let text = vm.inspect(call.recv);
    vm.new_string(text)
}

fn eq(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    call.expect(1, 1)?;
    let other = call.arg(0);
    let same = call.recv.identical(&other)
        || (vm.is_exception(other)
            && vm.class_of(call.recv) == vm.class_of(other)
            && vm.exception_message(call.recv) == vm.exception_message(other));
    Ok(Value::from(same))
}
