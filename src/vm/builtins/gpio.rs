//! GPIO
//!
//! Thin Ruby face of the `"gpio"` peripheral driver. An instance only records
//! the driver name and pin; every call goes through the registry.

use super::{define, define_class_method, define_const, int_arg, CallArgs};
use crate::peripheral::{PeripheralError, PinMode};
use crate::runtime::class::builtin;
use crate::runtime::heap::{DataPayload, HeapBody, RData};
use crate::runtime::value::Value;
use crate::vm::errors::{NativeResult, Raise};
use crate::vm::executor::Vm;

const DRIVER: &str = "gpio";

pub(super) fn install(vm: &mut Vm) {
    let g = builtin::GPIO;
    define_const(vm, g, "IN", Value::Integer(PinMode::Input.code()));
    define_const(vm, g, "OUT", Value::Integer(PinMode::Output.code()));
    define_const(vm, g, "PULL_UP", Value::Integer(PinMode::InputPullUp.code()));
    define_const(vm, g, "LOW", Value::Integer(0));
    define_const(vm, g, "HIGH", Value::Integer(1));

    define_class_method(vm, g, "new", new);
    define(vm, g, "read", read);
    define(vm, g, "write", write);
    define(vm, g, "high?", high_p);
    define(vm, g, "low?", low_p);
    define(vm, g, "status", status);
    define(vm, g, "pin", pin);
}

fn device_error(e: PeripheralError) -> Raise {
    Raise::runtime(e.to_string())
}

/// Driver name and channel of a bound instance
fn binding(
    vm: &Vm,
    v: Value,
) -> Result<(String, u32), Raise> {
    match vm.heap.data(v) {
        Some(RData {
            payload: DataPayload::Peripheral { driver, channel },
            ..
        }) => Ok((driver.clone(), *channel)),
        _ => Err(Raise::type_error("not a peripheral binding")),
    }
}

/// `GPIO.new(pin, mode = GPIO::IN)`
fn new(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    call.expect(1, 2)?;
    let pin = int_arg(vm, call.arg(0))?;
    let channel = u32::try_from(pin).map_err(|_| Raise::argument(format!("invalid pin {}", pin)))?;
    let mode = match call.arg(1) {
        Value::Nil => PinMode::Input.code(),
        v => int_arg(vm, v)?,
    };
    if PinMode::from_code(mode).is_none() {
        return Err(Raise::argument(format!("invalid pin mode {}", mode)));
    }
    vm.peripherals
        .get_mut(DRIVER)
        .and_then(|d| d.init(channel, &[mode]))
        .map_err(device_error)?;
    Ok(vm.heap.alloc(HeapBody::Data(RData {
        class: builtin::GPIO,
        payload: DataPayload::Peripheral {
            driver: DRIVER.to_string(),
            channel,
        },
    }))?)
}

fn read(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    let (driver, channel) = binding(vm, call.recv)?;
    let level = vm
        .peripherals
        .get_mut(&driver)
        .and_then(|d| d.read(channel))
        .map_err(device_error)?;
    Ok(Value::Integer(level))
}

fn write(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    call.expect(1, 1)?;
    let (driver, channel) = binding(vm, call.recv)?;
    let level = match call.arg(0) {
        Value::True => 1,
        Value::False | Value::Nil => 0,
        v => int_arg(vm, v)?,
    };
    vm.peripherals
        .get_mut(&driver)
        .and_then(|d| d.write(channel, level))
        .map_err(device_error)?;
    Ok(Value::Integer(level))
}

fn high_p(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    let level = read(vm, call)?;
    Ok(Value::from(level.as_int().is_some_and(|l| l != 0)))
}

fn low_p(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    let level = read(vm, call)?;
    Ok(Value::from(level.as_int() == Some(0)))
}

fn status(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    let (driver, channel) = binding(vm, call.recv)?;
    let word = vm
        .peripherals
        .get(&driver)
        .and_then(|d| d.status(channel))
        .map_err(device_error)?;
    Ok(Value::Integer(word))
}

fn pin(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    let (_, channel) = binding(vm, call.recv)?;
    Ok(Value::Integer(channel as i64))
}
