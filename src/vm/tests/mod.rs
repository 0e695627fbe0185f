//! VM 模块测试
//!
//! Programs are compiled with the bundled front-end and run on a VM with
//! simulated ticks and a capturing console.


use crate::runtime::scheduler::TaskHandle;
use crate::util::config::RuntimeConfig;
use crate::vm::console::{CaptureBuffer, Console};
use crate::vm::executor::Vm;

/// A VM whose console output is captured
pub(crate) fn boot_with(config: RuntimeConfig) -> (Vm, CaptureBuffer) {
    let mut vm = Vm::new(config).expect("boots");
    let (console, out) = Console::capture();
    vm.set_console(console);
    (vm, out)
}

pub(crate) fn boot() -> (Vm, CaptureBuffer) {
    boot_with(RuntimeConfig::simulated(100))
}

/// Spawn `source` as a task at `priority`
pub(crate) fn spawn(
    vm: &mut Vm,
    source: &str,
    priority: u8,
) -> TaskHandle {
    let unit = vm.compile(source).expect("compiles");
    vm.create_task(&unit.irep, priority).expect("task")
}

/// Run `source` to completion and return the VM and its task
pub(crate) fn run(source: &str) -> (Vm, TaskHandle, CaptureBuffer) {
    let (mut vm, out) = boot();
    let task = spawn(&mut vm, source, 128);
    vm.run_until_idle().expect("runs");
    (vm, task, out)
}

/// `inspect` of the program's value; panics if it raised
pub(crate) fn eval(source: &str) -> String {
    let (vm, task, _) = run(source);
    if let Some(err) = vm.task_error(task) {
        panic!("raised {}", vm.describe_exception(err));
    }
    vm.inspect(vm.task_result(task))
}

/// `ClassName: message` of the exception the program raised
pub(crate) fn eval_error(source: &str) -> String {
    let (vm, task, _) = run(source);
    let err = vm.task_error(task).expect("should raise");
    vm.describe_exception(err)
}

/// Console output of the program
pub(crate) fn output(source: &str) -> String {
    let (vm, task, out) = run(source);
    if let Some(err) = vm.task_error(task) {
        panic!("raised {}", vm.describe_exception(err));
    }
    out.contents()
}
