//! Task and Mutex
//!
//! Blocking calls (`join`, `lock`) set a pending wait and return; the call is
//! re-executed when the task is woken, so the second attempt sees the new
//! state and completes.

use super::{define, define_class_method, int_arg, CallArgs};
use crate::runtime::class::builtin;
use crate::runtime::heap::{DataPayload, HeapBody, MutexState, RData};
use crate::runtime::scheduler::{TaskHandle, TaskOptions, TaskState, WaitReason};
use crate::runtime::value::Value;
use crate::vm::errors::{NativeResult, Raise, VmError};
use crate::vm::executor::{Switch, Vm};

pub(super) fn install(vm: &mut Vm) {
    let t = builtin::TASK;
    define_class_method(vm, t, "new", task_new);
    define_class_method(vm, t, "pass", pass);
    define_class_method(vm, t, "current", current);
    define_class_method(vm, t, "suspend", class_suspend);
    define_class_method(vm, t, "resume", class_resume);
    define_class_method(vm, t, "terminate", class_terminate);
    define_class_method(vm, t, "priority=", class_set_priority);
    define(vm, t, "suspend", suspend);
    define(vm, t, "resume", resume);
    define(vm, t, "terminate", terminate);
    define(vm, t, "status", status);
    define(vm, t, "join", join);
    define(vm, t, "value", join);
    define(vm, t, "name", name);
    define(vm, t, "priority", priority);
    define(vm, t, "priority=", set_priority);

    let m = builtin::MUTEX;
    define_class_method(vm, m, "new", mutex_new);
    define(vm, m, "lock", lock);
    define(vm, m, "unlock", unlock);
    define(vm, m, "try_lock", try_lock);
    define(vm, m, "locked?", locked_p);
    define(vm, m, "owned?", owned_p);
}

fn vm_error(e: VmError) -> Raise {
    match e {
        VmError::Alloc(_) => Raise::OutOfMemory,
        e => Raise::runtime(e.to_string()),
    }
}

fn current_handle(vm: &Vm) -> Result<TaskHandle, Raise> {
    vm.current
        .ok_or_else(|| Raise::runtime("not running inside a task"))
}

/// Receiver task, or the argument / current task for class methods
fn target(
    vm: &Vm,
    v: Value,
) -> Result<TaskHandle, Raise> {
    match v {
        Value::Task(h) => Ok(h),
        Value::Nil | Value::Class(_) => current_handle(vm),
        _ => Err(Raise::type_error("task expected")),
    }
}

fn priority_arg(
    vm: &Vm,
    v: Value,
) -> Result<u8, Raise> {
    let p = int_arg(vm, v)?;
    u8::try_from(p).map_err(|_| Raise::argument(format!("invalid priority {}", p)))
}

/// `Task.new(priority = default, name = nil) { ... }`
fn task_new(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    call.expect(0, 2)?;
    let Some(body) = vm.heap.proc_body(call.block) else {
        return Err(Raise::argument("must be called with a block"));
    };
    let irep = body.irep.clone();
    let priority = match call.arg(0) {
        Value::Nil => vm.config.default_priority,
        v => priority_arg(vm, v)?,
    };
    let name = match call.arg(1) {
        Value::Nil => None,
        v => Some(vm.to_s(v)),
    };
    let options = TaskOptions {
        name,
        ..TaskOptions::with_priority(priority)
    };
    let handle = vm.create_task_with(&irep, options).map_err(vm_error)?;
    Ok(Value::Task(handle))
}

fn pass(
    vm: &mut Vm,
    _call: &CallArgs,
) -> NativeResult {
    vm.pending = Some(Switch::Yield);
    Ok(Value::Nil)
}

fn current(
    vm: &mut Vm,
    _call: &CallArgs,
) -> NativeResult {
    Ok(vm.current.map(Value::Task).unwrap_or(Value::Nil))
}

fn do_suspend(
    vm: &mut Vm,
    handle: TaskHandle,
) -> NativeResult {
    vm.suspend_task(handle).map_err(vm_error)?;
    Ok(Value::Task(handle))
}

fn do_resume(
    vm: &mut Vm,
    handle: TaskHandle,
) -> NativeResult {
    // resuming a task that is not suspended is a no-op
    if vm.task_state(handle) == Some(TaskState::Suspended) {
        vm.resume_task(handle).map_err(vm_error)?;
    }
    Ok(Value::Task(handle))
}

fn do_terminate(
    vm: &mut Vm,
    handle: TaskHandle,
) -> NativeResult {
    vm.terminate_task(handle).map_err(vm_error)?;
    Ok(Value::Task(handle))
}

fn class_suspend(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    call.expect(0, 1)?;
    let h = target(vm, call.arg(0))?;
    do_suspend(vm, h)
}

fn class_resume(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    call.expect(1, 1)?;
    let h = target(vm, call.arg(0))?;
    do_resume(vm, h)
}

fn class_terminate(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    call.expect(0, 1)?;
    let h = target(vm, call.arg(0))?;
    do_terminate(vm, h)
}

/// `Task.priority = n` changes the running task
fn class_set_priority(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    call.expect(1, 1)?;
    let h = current_handle(vm)?;
    let p = priority_arg(vm, call.arg(0))?;
    vm.set_task_priority(h, p).map_err(vm_error)?;
    Ok(call.arg(0))
}

fn suspend(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    let h = target(vm, call.recv)?;
    do_suspend(vm, h)
}

fn resume(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    let h = target(vm, call.recv)?;
    do_resume(vm, h)
}

fn terminate(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    let h = target(vm, call.recv)?;
    do_terminate(vm, h)
}

fn status(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    let h = target(vm, call.recv)?;
    let state = vm.task_state(h).unwrap_or(TaskState::Dormant);
    Ok(Value::Symbol(vm.symbols.intern(state.symbol_name())))
}

/// Wait for the task to finish; returns its last value
fn join(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    let h = target(vm, call.recv)?;
    if Some(h) == vm.current {
        return Err(Raise::runtime("deadlock; a task cannot join itself"));
    }
    match vm.task_state(h) {
        None | Some(TaskState::Dormant) => {
            let result = vm.task_result(h);
            Ok(vm.dup_value(result))
        }
        Some(_) => {
            vm.pending = Some(Switch::Wait(WaitReason::Join(h)));
            Ok(Value::Nil)
        }
    }
}

fn name(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    let h = target(vm, call.recv)?;
    let name = vm.task_name(h).unwrap_or_default().to_string();
    vm.new_string(name)
}

fn priority(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    let h = target(vm, call.recv)?;
    let p = vm.task_priority(h).unwrap_or(vm.config.default_priority);
    Ok(Value::Integer(p as i64))
}

fn set_priority(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    call.expect(1, 1)?;
    let h = target(vm, call.recv)?;
    let p = priority_arg(vm, call.arg(0))?;
    vm.set_task_priority(h, p).map_err(vm_error)?;
    Ok(call.arg(0))
}

// ----------------------------------------------------------------------
// Mutex
// ----------------------------------------------------------------------

fn mutex_new(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    call.expect(0, 0)?;
    Ok(vm.heap.alloc(HeapBody::Data(RData {
        class: builtin::MUTEX,
        payload: DataPayload::Mutex(MutexState::default()),
    }))?)
}

fn mutex_state(
    vm: &mut Vm,
    v: Value,
) -> Result<&mut MutexState, Raise> {
    match vm.heap.data_mut(v) {
        Some(RData {
            payload: DataPayload::Mutex(m),
            ..
        }) => Ok(m),
        _ => Err(Raise::type_error("not a mutex")),
    }
}

fn lock(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    let me = current_handle(vm)?;
    let Some(handle) = call.recv.handle() else {
        return Err(Raise::type_error("not a mutex"));
    };
    let m = mutex_state(vm, call.recv)?;
    match m.owner {
        None => {
            m.owner = Some(me);
            m.waiters.retain(|w| *w != me);
            Ok(vm.dup_value(call.recv))
        }
        Some(owner) if owner == me => Err(Raise::runtime("deadlock; recursive locking")),
        Some(_) => {
            if !m.waiters.contains(&me) {
                m.waiters.push_back(me);
            }
            vm.pending = Some(Switch::Wait(WaitReason::Mutex(handle)));
            Ok(Value::Nil)
        }
    }
}

fn unlock(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    let me = current_handle(vm)?;
    let Some(handle) = call.recv.handle() else {
        return Err(Raise::type_error("not a mutex"));
    };
    let m = mutex_state(vm, call.recv)?;
    if m.owner != Some(me) {
        return Err(Raise::runtime(
            "attempt to unlock a mutex which is not locked by this task",
        ));
    }
    m.owner = None;
    let next = m.waiters.pop_front();
    if let Some(next) = next {
        // the woken task retries `lock`
        if vm.scheduler.get(next).and_then(|t| t.wait) == Some(WaitReason::Mutex(handle)) {
            vm.scheduler.make_ready(next);
        }
    }
    Ok(vm.dup_value(call.recv))
}

fn try_lock(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    let me = current_handle(vm)?;
    let m = mutex_state(vm, call.recv)?;
    if m.owner.is_some() {
        return Ok(Value::False);
    }
    m.owner = Some(me);
    Ok(Value::True)
}

fn locked_p(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    let m = mutex_state(vm, call.recv)?;
    Ok(Value::from(m.owner.is_some()))
}

fn owned_p(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    let me = vm.current;
    let m = mutex_state(vm, call.recv)?;
    Ok(Value::from(me.is_some() && m.owner == me))
}
