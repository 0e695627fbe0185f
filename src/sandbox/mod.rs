//! 沙箱求值
//!
//! An eval boundary for hosts and the REPL. Source is compiled into a unit
//! that runs in a dedicated permanent task; the host polls the task's state
//! and reads its result or error.
//!
//! ```text
//! compile(src) -> execute() -> [scheduler runs] -> state() == SUSPENDED
//!                                                -> result() / error()
//! ```
//!
//! Recompiling releases the previous unit. Methods and procs defined by it
//! keep its irep alive; the VM retains that storage until nothing refers to
//! it any more. Symbols interned by a unit are never freed.

use tracing::{debug, info};

use crate::frontend::{CompileError, Compiler, RubyCompiler};
use crate::runtime::scheduler::{TaskHandle, TaskOptions, TaskState};
use crate::runtime::value::Value;
use crate::vm::errors::{VmError, VmResult};
use crate::vm::{LoadedIrep, Vm};

/// Name of the sandbox task
pub const SANDBOX_TASK: &str = "sandbox";

/// A permanent task that runs one compiled unit at a time
#[derive(Debug)]
pub struct Sandbox {
    task: TaskHandle,
    unit: Option<LoadedIrep>,
    /// Unit compiled but not yet handed to the task
    staged: bool,
    diagnostic: Option<VmError>,
}

impl Sandbox {
    /// Create the sandbox task at the configured default priority
    pub fn new(vm: &mut Vm) -> VmResult<Self> {
        let priority = vm.config().default_priority;
        Self::with_priority(vm, priority)
    }

    pub fn with_priority(
        vm: &mut Vm,
        priority: u8,
    ) -> VmResult<Self> {
        // The task needs code to exist; an empty unit finishes immediately.
        let idle = vm.compile("")?;
        let options = TaskOptions {
            name: Some(SANDBOX_TASK.to_string()),
            priority,
            permanent: true,
            start_suspended: true,
        };
        let task = match vm.create_task_with(&idle.irep, options) {
            Ok(task) => task,
            Err(e) => {
                vm.release_irep(idle);
                return Err(e);
            }
        };
        info!(task = %task, priority, "sandbox ready");
        Ok(Self {
            task,
            unit: Some(idle),
            staged: false,
            diagnostic: None,
        })
    }

    /// Handle of the sandbox task
    pub fn task(&self) -> TaskHandle {
        self.task
    }

    /// Compile `source`, replacing the previous unit
    ///
    /// Returns `false` and keeps the diagnostic when the source does not
    /// compile or load; the previous unit stays in place in that case.
    pub fn compile(
        &mut self,
        vm: &mut Vm,
        source: &str,
    ) -> bool {
        self.diagnostic = None;
        let loaded = RubyCompiler::new()
            .compile(source)
            .map_err(VmError::from)
            .and_then(|raw| vm.load_raw(&raw));
        match loaded {
            Ok(unit) => {
                if let Some(old) = self.unit.replace(unit) {
                    vm.release_irep(old);
                }
                self.staged = true;
                debug!(task = %self.task, "sandbox unit compiled");
                true
            }
            Err(e) => {
                debug!(task = %self.task, "sandbox compile failed: {}", e);
                self.diagnostic = Some(e);
                false
            }
        }
    }

    /// Make the task Ready to run the last compiled unit
    ///
    /// Returns `false` when nothing has been compiled or the task is still
    /// busy with an earlier run.
    pub fn execute(
        &mut self,
        vm: &mut Vm,
    ) -> bool {
        let Some(unit) = &self.unit else {
            return false;
        };
        if !self.staged && self.diagnostic.is_some() {
            return false;
        }
        match vm.restart_task(self.task, &unit.irep) {
            Ok(()) => {
                self.staged = false;
                debug!(task = %self.task, "sandbox executing");
                true
            }
            Err(e) => {
                debug!(task = %self.task, "sandbox cannot execute: {}", e);
                false
            }
        }
    }

    /// Compile, execute and run the scheduler until everything is idle
    pub fn eval(
        &mut self,
        vm: &mut Vm,
        source: &str,
    ) -> VmResult<bool> {
        if !self.compile(vm, source) || !self.execute(vm) {
            return Ok(false);
        }
        vm.run_until_idle()?;
        Ok(self.error(vm).is_none())
    }

    pub fn state(
        &self,
        vm: &Vm,
    ) -> TaskState {
        vm.task_state(self.task).unwrap_or(TaskState::Dormant)
    }

    /// True once the last run has finished
    pub fn is_idle(
        &self,
        vm: &Vm,
    ) -> bool {
        matches!(self.state(vm), TaskState::Suspended | TaskState::Dormant)
    }

    /// Value of the last top-level expression (borrowed)
    pub fn result(
        &self,
        vm: &Vm,
    ) -> Value {
        vm.task_result(self.task)
    }

    /// Exception that ended the last run (borrowed)
    pub fn error(
        &self,
        vm: &Vm,
    ) -> Option<Value> {
        vm.task_error(self.task)
    }

    /// `ClassName: message` of the last run's exception
    pub fn error_message(
        &self,
        vm: &Vm,
    ) -> Option<String> {
        self.error(vm).map(|e| vm.describe_exception(e))
    }

    /// Why the last `compile` failed
    pub fn diagnostic(&self) -> Option<&VmError> {
        self.diagnostic.as_ref()
    }

    /// The compile error of the last `compile`, when it was one
    pub fn compile_error(&self) -> Option<&CompileError> {
        match &self.diagnostic {
            Some(VmError::Compile(e)) => Some(e),
            _ => None,
        }
    }

    /// Stop the task and give the current unit back to the VM
    pub fn close(
        mut self,
        vm: &mut Vm,
    ) -> VmResult<()> {
        vm.terminate_task(self.task)?;
        if let Some(unit) = self.unit.take() {
            vm.release_irep(unit);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests;
