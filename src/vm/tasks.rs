//! Task lifecycle and the scheduling loop
//!
//! Dormant -> Ready -> Running -> {Waiting, Suspended} -> Ready -> Dormant.
//! A permanent task goes back to Suspended when it finishes so it can be
//! restarted with new code.

use std::rc::Rc;
use std::time::Duration;
use tracing::{debug, info};

use crate::runtime::memory::AllocKind;
use crate::runtime::scheduler::{TaskHandle, TaskOptions, TaskState, TaskStats, Tcb, WaitReason};
use crate::runtime::value::Value;
use crate::util::config::TickMode;
use crate::vm::errors::{VmError, VmResult};
use crate::vm::executor::{Exit, Switch, Vm};
use crate::vm::irep::Irep;

/// How a task's quantum ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskExit {
    /// Ran to completion
    Finished,
    /// Ended by an unhandled exception
    Raised,
    /// Timeslice used up or a sleeper became due
    Preempted,
    /// `Task.pass`
    Yielded,
    /// Sleeping, joining or waiting for a mutex
    Blocked,
    Suspended,
    Terminated,
}

/// Result of one scheduling step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Ran { task: TaskHandle, exit: TaskExit },
    /// Nothing ready; the earliest pending wake-up tick
    Idle { next_wakeup: Option<u64> },
}

/// Bytes charged for a control block besides its registers
const TCB_BASE_BYTES: usize = 64;

impl Vm {
    /// Create a Ready task running `irep` at `priority`
    pub fn create_task(
        &mut self,
        irep: &Rc<Irep>,
        priority: u8,
    ) -> VmResult<TaskHandle> {
        self.create_task_with(irep, TaskOptions::with_priority(priority))
    }

    pub fn create_task_with(
        &mut self,
        irep: &Rc<Irep>,
        options: TaskOptions,
    ) -> VmResult<TaskHandle> {
        let max_regs = self.config.max_regs;
        let block = self
            .heap
            .arena_mut()
            .alloc(TCB_BASE_BYTES + max_regs * 16, AllocKind::Raw)?;
        let name = options
            .name
            .clone()
            .unwrap_or_else(|| format!("task-{}", self.scheduler.stats().tasks_created));
        let mut tcb = Box::new(Tcb::new(name, options.priority, options.permanent, max_regs));
        tcb.block = Some(block);
        self.start_frame(&mut tcb, irep);
        tcb.state = if options.start_suspended {
            TaskState::Suspended
        } else {
            TaskState::Ready
        };

        match self.scheduler.insert(tcb) {
            Ok((handle, evicted)) => {
                if let Some(old) = evicted {
                    self.release_tcb(old);
                }
                debug!(task = %handle, priority = options.priority, "task created");
                Ok(handle)
            }
            Err(mut tcb) => {
                self.clear_core(&mut tcb);
                self.release_tcb(tcb);
                Err(VmError::TaskTableFull(self.scheduler.capacity()))
            }
        }
    }

    /// Free everything a control block still owns
    fn release_tcb(
        &mut self,
        mut tcb: Box<Tcb>,
    ) {
        self.clear_core(&mut tcb);
        let result = std::mem::take(&mut tcb.result);
        self.heap.decref(result);
        if let Some(err) = tcb.error.take() {
            self.heap.decref(err);
        }
        if let Some(block) = tcb.block.take() {
            if let Err(e) = self.heap.arena_mut().free(block) {
                tracing::error!("releasing task storage failed: {}", e);
            }
        }
    }

    /// Reload a Dormant or Suspended task with new code and make it Ready
    pub fn restart_task(
        &mut self,
        handle: TaskHandle,
        irep: &Rc<Irep>,
    ) -> VmResult<()> {
        let mut tcb = self.take_idle(handle)?;
        if !matches!(tcb.state, TaskState::Dormant | TaskState::Suspended) {
            let state = tcb.state;
            self.scheduler.put_back(handle, tcb);
            return Err(VmError::InvalidState(format!("cannot restart a {} task", state)));
        }
        let result = std::mem::take(&mut tcb.result);
        self.heap.decref(result);
        if let Some(err) = tcb.error.take() {
            self.heap.decref(err);
        }
        self.start_frame(&mut tcb, irep);
        tcb.state = TaskState::Ready;
        tcb.wait = None;
        self.scheduler.put_back(handle, tcb);
        Ok(())
    }

    /// Take a task that is not the running one
    fn take_idle(
        &mut self,
        handle: TaskHandle,
    ) -> VmResult<Box<Tcb>> {
        if self.scheduler.is_running(handle) {
            return Err(VmError::InvalidState(format!("{} is running", handle)));
        }
        self.scheduler.unqueue(handle);
        self.scheduler
            .take(handle)
            .ok_or(VmError::InvalidTask(handle))
    }

    /// Suspended -> Ready
    pub fn resume_task(
        &mut self,
        handle: TaskHandle,
    ) -> VmResult<()> {
        match self.scheduler.state(handle) {
            Some(TaskState::Suspended) => {
                self.scheduler.make_ready(handle);
                debug!(task = %handle, "task resumed");
                Ok(())
            }
            Some(state) => Err(VmError::InvalidState(format!(
                "cannot resume a {} task",
                state
            ))),
            None => Err(VmError::InvalidTask(handle)),
        }
    }

    /// Change a task's priority; a queued task is requeued at its new level
    pub fn set_task_priority(
        &mut self,
        handle: TaskHandle,
        priority: u8,
    ) -> VmResult<()> {
        if Some(handle) == self.current {
            self.priority_change = Some(priority);
            return Ok(());
        }
        let Some(tcb) = self.scheduler.get_mut(handle) else {
            return Err(VmError::InvalidTask(handle));
        };
        tcb.priority = priority;
        if tcb.is_ready() && self.scheduler.unqueue(handle) {
            self.scheduler.make_ready(handle);
        }
        Ok(())
    }

    /// Ready or Waiting -> Suspended
    pub fn suspend_task(
        &mut self,
        handle: TaskHandle,
    ) -> VmResult<()> {
        if Some(handle) == self.current {
            self.pending = Some(Switch::Suspend);
            return Ok(());
        }
        let Some(tcb) = self.scheduler.get_mut(handle) else {
            return Err(VmError::InvalidTask(handle));
        };
        match tcb.state {
            TaskState::Ready | TaskState::Waiting => {
                tcb.state = TaskState::Suspended;
                tcb.wait = None;
                self.scheduler.unqueue(handle);
                debug!(task = %handle, "task suspended");
                Ok(())
            }
            TaskState::Suspended => Ok(()),
            state => Err(VmError::InvalidState(format!(
                "cannot suspend a {} task",
                state
            ))),
        }
    }

    /// End a task immediately; `ensure` clauses do not run
    pub fn terminate_task(
        &mut self,
        handle: TaskHandle,
    ) -> VmResult<()> {
        if Some(handle) == self.current {
            self.pending = Some(Switch::Terminate);
            return Ok(());
        }
        let mut tcb = self.take_idle(handle)?;
        if tcb.is_finished() {
            self.scheduler.put_back(handle, tcb);
            return Ok(());
        }
        self.finish_task(handle, &mut tcb);
        self.scheduler.put_back(handle, tcb);
        debug!(task = %handle, "task terminated");
        Ok(())
    }

    /// Bookkeeping when a task stops running for good
    fn finish_task(
        &mut self,
        handle: TaskHandle,
        tcb: &mut Tcb,
    ) {
        self.clear_core(tcb);
        tcb.wait = None;
        tcb.state = if tcb.permanent {
            TaskState::Suspended
        } else {
            TaskState::Dormant
        };
        self.scheduler.stats_mut().tasks_completed += 1;
        self.scheduler
            .wake_where(|w| *w == WaitReason::Join(handle));
        self.sweep_retained();
    }

    /// Dispatch the most urgent Ready task for one quantum
    pub fn run_one_task(&mut self) -> VmResult<RunOutcome> {
        let next_wakeup = self.scheduler.wake_due(self.tick.now());
        self.tick.set_next_wakeup(next_wakeup);
        let Some(handle) = self.scheduler.next_ready() else {
            return Ok(RunOutcome::Idle { next_wakeup });
        };
        let Some(mut tcb) = self.scheduler.take(handle) else {
            return Err(VmError::InvalidTask(handle));
        };
        tcb.state = TaskState::Running;
        tcb.stats.quanta += 1;
        self.scheduler.stats_mut().context_switches += 1;
        self.tick.reset_slice(self.config.timeslice_tick_count);
        self.current = Some(handle);
        self.running = Some((tcb.name.clone(), tcb.priority));
        self.pending = None;
        self.priority_change = None;

        let exit = self.execute(&mut tcb);
        self.current = None;
        self.running = None;

        let exit = match exit {
            Exit::Finished => {
                debug!(task = %handle, "task finished");
                self.finish_task(handle, &mut tcb);
                TaskExit::Finished
            }
            Exit::Raised => {
                self.finish_task(handle, &mut tcb);
                TaskExit::Raised
            }
            Exit::Preempted => {
                self.scheduler.stats_mut().preemptions += 1;
                tcb.state = TaskState::Ready;
                TaskExit::Preempted
            }
            Exit::Switch(Switch::Yield) => {
                tcb.state = TaskState::Ready;
                TaskExit::Yielded
            }
            Exit::Switch(Switch::Sleep(ticks)) => {
                tcb.state = TaskState::Waiting;
                tcb.wait = Some(WaitReason::Sleep {
                    until: self.tick.now().saturating_add(ticks.max(1)),
                });
                TaskExit::Blocked
            }
            Exit::Switch(Switch::Wait(reason)) => {
                tcb.state = TaskState::Waiting;
                tcb.wait = Some(reason);
                TaskExit::Blocked
            }
            Exit::Switch(Switch::Suspend) => {
                tcb.state = TaskState::Suspended;
                TaskExit::Suspended
            }
            Exit::Switch(Switch::Terminate) => {
                self.finish_task(handle, &mut tcb);
                TaskExit::Terminated
            }
        };
        if let Some(priority) = self.priority_change.take() {
            tcb.priority = priority;
        }
        self.scheduler.put_back(handle, tcb);
        Ok(RunOutcome::Ran { task: handle, exit })
    }

    /// Run until no task is Ready or Waiting
    pub fn run_until_idle(&mut self) -> VmResult<()> {
        loop {
            match self.run_one_task()? {
                RunOutcome::Ran { .. } => {}
                RunOutcome::Idle { next_wakeup: None } => break,
                RunOutcome::Idle {
                    next_wakeup: Some(at),
                } => self.idle_until(at),
            }
        }
        info!(stats = ?self.scheduler.stats(), "scheduler idle");
        Ok(())
    }

    /// Run until the tick counter reaches `limit` or nothing is left to run
    pub fn run_until_tick(
        &mut self,
        limit: u64,
    ) -> VmResult<()> {
        while self.tick.now() < limit {
            match self.run_one_task()? {
                RunOutcome::Ran { .. } => {}
                RunOutcome::Idle { next_wakeup: None } => break,
                RunOutcome::Idle {
                    next_wakeup: Some(at),
                } => self.idle_until(at.min(limit)),
            }
        }
        Ok(())
    }

    /// Nothing is ready: let time pass
    fn idle_until(
        &mut self,
        at: u64,
    ) {
        match self.config.tick_mode {
            TickMode::Simulated { .. } => self.tick.advance_to(at),
            TickMode::External => {
                std::thread::sleep(Duration::from_millis(self.config.tick_unit_ms))
            }
        }
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    pub fn task_state(
        &self,
        handle: TaskHandle,
    ) -> Option<TaskState> {
        self.scheduler.state(handle)
    }

    /// Value of the last completed run (borrowed)
    pub fn task_result(
        &self,
        handle: TaskHandle,
    ) -> Value {
        self.scheduler
            .get(handle)
            .map(|t| t.result)
            .unwrap_or(Value::Nil)
    }

    /// Exception that ended the last run (borrowed)
    pub fn task_error(
        &self,
        handle: TaskHandle,
    ) -> Option<Value> {
        self.scheduler.get(handle).and_then(|t| t.error)
    }

    pub fn task_stats(
        &self,
        handle: TaskHandle,
    ) -> Option<TaskStats> {
        self.scheduler.get(handle).map(|t| t.stats)
    }

    pub fn task_name(
        &self,
        handle: TaskHandle,
    ) -> Option<&str> {
        match &self.running {
            Some((name, _)) if Some(handle) == self.current => Some(name.as_str()),
            _ => self.scheduler.get(handle).map(|t| t.name.as_str()),
        }
    }

    /// Priority, including a change the running task has asked for
    pub fn task_priority(
        &self,
        handle: TaskHandle,
    ) -> Option<u8> {
        if Some(handle) == self.current {
            return self
                .priority_change
                .or(self.running.as_ref().map(|(_, p)| *p));
        }
        self.scheduler.get(handle).map(|t| t.priority)
    }

    pub fn scheduler_stats(&self) -> crate::runtime::scheduler::SchedulerStats {
        self.scheduler.stats()
    }

    /// Task currently executing bytecode
    pub fn current_task(&self) -> Option<TaskHandle> {
        self.current
    }
}
