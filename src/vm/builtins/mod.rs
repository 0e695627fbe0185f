//! Core library
//!
//! Native methods are plain functions over the runtime and a borrowed view of
//! the call. They never run Ruby code; methods that take a block and call it
//! repeatedly live in the prelude so that they stay preemptible. A native that
//! needs to block sets a pending switch on the VM and returns.

mod array;
mod exception;
mod format;
mod gpio;
mod hash;
mod kernel;
mod numeric;
mod range;
mod string;
mod task;

use smallvec::SmallVec;

use crate::runtime::class::{ClassId, Method};
use crate::runtime::value::Value;
use crate::vm::errors::{NativeResult, Raise};
use crate::vm::executor::Vm;

/// Native method signature; the returned value is owned by the caller
pub type NativeFn = fn(&mut Vm, &CallArgs) -> NativeResult;

/// Borrowed view of a native call
#[derive(Debug, Clone)]
pub struct CallArgs {
    pub recv: Value,
    pub args: SmallVec<[Value; 8]>,
    /// Block argument or nil
    pub block: Value,
}

impl CallArgs {
    #[inline]
    pub fn len(&self) -> usize {
        self.args.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    /// Argument `i`, nil when absent
    #[inline]
    pub fn arg(
        &self,
        i: usize,
    ) -> Value {
        self.args.get(i).copied().unwrap_or(Value::Nil)
    }

    /// Check the argument count is within `min..=max`
    pub fn expect(
        &self,
        min: usize,
        max: usize,
    ) -> Result<(), Raise> {
        if self.args.len() < min || self.args.len() > max {
            return Err(Raise::arity(self.args.len(), min, max));
        }
        Ok(())
    }
}

/// Install every native method and constant
pub(crate) fn install(vm: &mut Vm) {
    kernel::install(vm);
    numeric::install(vm);
    string::install(vm);
    array::install(vm);
    hash::install(vm);
    range::install(vm);
    exception::install(vm);
    task::install(vm);
    gpio::install(vm);
}

pub(crate) fn define(
    vm: &mut Vm,
    class: ClassId,
    name: &str,
    f: NativeFn,
) {
    let mid = vm.symbols.intern(name);
    vm.classes.define_method(class, mid, Method::Native(f));
}

pub(crate) fn define_class_method(
    vm: &mut Vm,
    class: ClassId,
    name: &str,
    f: NativeFn,
) {
    let mid = vm.symbols.intern(name);
    vm.classes.define_singleton_method(class, mid, Method::Native(f));
}

pub(crate) fn define_const(
    vm: &mut Vm,
    class: ClassId,
    name: &str,
    v: Value,
) {
    let id = vm.symbols.intern(name);
    vm.constants.insert((class, id), v);
}

/// Integer argument
pub(crate) fn int_arg(
    vm: &Vm,
    v: Value,
) -> Result<i64, Raise> {
    match v {
        Value::Integer(i) => Ok(i),
        Value::Float(f) if f.is_finite() => Ok(f as i64),
        other => Err(Raise::type_error(format!(
            "no implicit conversion of {} into Integer",
            vm.class_name(vm.class_of(other))
        ))),
    }
}

/// Index argument; negative values count from `len`
pub(crate) fn index_arg(
    vm: &Vm,
    v: Value,
    len: usize,
) -> Result<Option<usize>, Raise> {
    let i = int_arg(vm, v)?;
    let idx = if i < 0 { len as i64 + i } else { i };
    Ok((idx >= 0).then_some(idx as usize))
}

impl Vm {
    /// Owned new string
    pub(crate) fn new_string(
        &mut self,
        s: impl Into<Vec<u8>>,
    ) -> NativeResult {
        Ok(self.heap.alloc_string(s)?)
    }

    /// Owned copy of `v`
    #[inline]
    pub(crate) fn dup_value(
        &mut self,
        v: Value,
    ) -> Value {
        self.heap.incref(v);
        v
    }

    /// Ruby `==` without calling user code
    pub(crate) fn ruby_eq(
        &self,
        a: Value,
        b: Value,
    ) -> bool {
        self.heap.values_eq(a, b)
    }
}

#[cfg(test)]
mod tests;
