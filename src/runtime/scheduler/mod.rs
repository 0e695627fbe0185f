//! Task scheduler
//!
//! Fixed-size task table plus a priority ready queue. The scheduler only
//! does bookkeeping: which task is in which state and which one runs next.
//! Running bytecode and releasing task-owned values is the VM's job.
//!
//! While a task runs its control block is taken out of its slot and handed to
//! the interpreter; the slot keeps a `running` mark until it is put back.

pub mod queue;
pub mod task;
pub mod tick;

pub use queue::ReadyQueue;
pub use task::{TaskHandle, TaskOptions, TaskState, TaskStats, Tcb, WaitReason};
pub use tick::{TickSource, TickTimer};

use tracing::debug;

/// Scheduler counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Tasks created since boot.
    pub tasks_created: u64,
    /// Tasks that reached Dormant.
    pub tasks_completed: u64,
    /// Dispatches.
    pub context_switches: u64,
    /// Quanta ended by the tick.
    pub preemptions: u64,
}

#[derive(Debug, Default)]
struct TaskSlot {
    generation: u32,
    tcb: Option<Box<Tcb>>,
    running: bool,
}

impl TaskSlot {
    /// Free, or holding a finished task whose slot may be reused.
    fn is_reusable(&self) -> bool {
        !self.running && self.tcb.as_ref().is_none_or(|t| t.is_finished())
    }
}

/// Task table and ready queue.
#[derive(Debug)]
pub struct Scheduler {
    slots: Vec<TaskSlot>,
    ready: ReadyQueue,
    stats: SchedulerStats,
}

impl Scheduler {
    /// Create a table of `max_tasks` slots.
    pub fn new(max_tasks: usize) -> Self {
        let max_tasks = max_tasks.clamp(1, u16::MAX as usize);
        Self {
            slots: (0..max_tasks).map(|_| TaskSlot::default()).collect(),
            ready: ReadyQueue::new(),
            stats: SchedulerStats::default(),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats
    }

    pub(crate) fn stats_mut(&mut self) -> &mut SchedulerStats {
        &mut self.stats
    }

    /// Place a control block in a slot.
    ///
    /// Empty slots are used first, then slots of finished tasks. The evicted
    /// finished task (if any) is returned so the caller can release it.
    pub fn insert(
        &mut self,
        tcb: Box<Tcb>,
    ) -> Result<(TaskHandle, Option<Box<Tcb>>), Box<Tcb>> {
        let index = self
            .slots
            .iter()
            .position(|s| s.tcb.is_none() && !s.running)
            .or_else(|| self.slots.iter().position(|s| s.is_reusable()));
        let Some(index) = index else {
            return Err(tcb);
        };
        let slot = &mut self.slots[index];
        let evicted = slot.tcb.take();
        slot.generation = slot.generation.wrapping_add(1);
        let handle = TaskHandle::new(index as u16, slot.generation);
        let ready = tcb.is_ready();
        let priority = tcb.priority;
        slot.tcb = Some(tcb);
        if ready {
            self.ready.push_back(priority, handle);
        }
        self.stats.tasks_created += 1;
        debug!(task = %handle, "task slot assigned");
        Ok((handle, evicted))
    }

    fn slot(
        &self,
        handle: TaskHandle,
    ) -> Option<&TaskSlot> {
        self.slots
            .get(handle.slot())
            .filter(|s| s.generation == handle.generation())
    }

    fn slot_mut(
        &mut self,
        handle: TaskHandle,
    ) -> Option<&mut TaskSlot> {
        self.slots
            .get_mut(handle.slot())
            .filter(|s| s.generation == handle.generation())
    }

    /// True when `handle` names the current occupant of its slot.
    pub fn is_valid(
        &self,
        handle: TaskHandle,
    ) -> bool {
        self.slot(handle)
            .is_some_and(|s| s.running || s.tcb.is_some())
    }

    pub fn is_running(
        &self,
        handle: TaskHandle,
    ) -> bool {
        self.slot(handle).is_some_and(|s| s.running)
    }

    /// State of a task; Running while it is taken out.
    pub fn state(
        &self,
        handle: TaskHandle,
    ) -> Option<TaskState> {
        let slot = self.slot(handle)?;
        if slot.running {
            return Some(TaskState::Running);
        }
        slot.tcb.as_ref().map(|t| t.state)
    }

    pub fn get(
        &self,
        handle: TaskHandle,
    ) -> Option<&Tcb> {
        self.slot(handle)?.tcb.as_deref()
    }

    pub fn get_mut(
        &mut self,
        handle: TaskHandle,
    ) -> Option<&mut Tcb> {
        self.slot_mut(handle)?.tcb.as_deref_mut()
    }

    /// Take a control block out for execution.
    pub fn take(
        &mut self,
        handle: TaskHandle,
    ) -> Option<Box<Tcb>> {
        let slot = self.slot_mut(handle)?;
        let tcb = slot.tcb.take()?;
        slot.running = true;
        Some(tcb)
    }

    /// Return a control block after execution, queueing it when Ready.
    pub fn put_back(
        &mut self,
        handle: TaskHandle,
        tcb: Box<Tcb>,
    ) {
        let ready = tcb.is_ready();
        let priority = tcb.priority;
        match self.slot_mut(handle) {
            Some(slot) => {
                slot.running = false;
                slot.tcb = Some(tcb);
            }
            None => return,
        }
        if ready {
            self.ready.push_back(priority, handle);
        }
    }

    /// Move a task to Ready and queue it.
    pub fn make_ready(
        &mut self,
        handle: TaskHandle,
    ) -> bool {
        let Some(slot) = self.slot_mut(handle) else {
            return false;
        };
        if slot.running {
            return false;
        }
        let Some(tcb) = slot.tcb.as_deref_mut() else {
            return false;
        };
        tcb.state = TaskState::Ready;
        tcb.wait = None;
        let priority = tcb.priority;
        if !self.ready.contains(handle) {
            self.ready.push_back(priority, handle);
        }
        true
    }

    /// Take a task off the ready queue without changing its state.
    pub fn unqueue(
        &mut self,
        handle: TaskHandle,
    ) -> bool {
        self.ready.remove(handle)
    }

    /// Next task to dispatch.
    pub fn next_ready(&mut self) -> Option<TaskHandle> {
        while let Some(handle) = self.ready.pop_front() {
            if self.get(handle).is_some_and(|t| t.is_ready()) {
                return Some(handle);
            }
        }
        None
    }

    pub fn ready_len(&self) -> usize {
        self.ready.len()
    }

    /// Wake every task whose wait satisfies `pred`; returns how many woke.
    pub fn wake_where(
        &mut self,
        mut pred: impl FnMut(&WaitReason) -> bool,
    ) -> usize {
        let woken: Vec<TaskHandle> = self
            .handles()
            .filter(|h| {
                self.get(*h).is_some_and(|t| {
                    t.state == TaskState::Waiting && t.wait.as_ref().is_some_and(&mut pred)
                })
            })
            .collect();
        for h in &woken {
            self.make_ready(*h);
        }
        woken.len()
    }

    /// Wake sleepers due at `now`; returns the next pending wake-up tick.
    pub fn wake_due(
        &mut self,
        now: u64,
    ) -> Option<u64> {
        self.wake_where(|w| matches!(w, WaitReason::Sleep { until } if *until <= now));
        self.slots
            .iter()
            .filter_map(|s| s.tcb.as_ref())
            .filter(|t| t.state == TaskState::Waiting)
            .filter_map(|t| match t.wait {
                Some(WaitReason::Sleep { until }) => Some(until),
                _ => None,
            })
            .min()
    }

    /// Handles of every occupied slot.
    pub fn handles(&self) -> impl Iterator<Item = TaskHandle> + '_ {
        self.slots.iter().enumerate().filter_map(|(i, s)| {
            (s.running || s.tcb.is_some()).then(|| TaskHandle::new(i as u16, s.generation))
        })
    }

    /// Number of tasks not Dormant.
    pub fn live_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.running || s.tcb.as_ref().is_some_and(|t| !t.is_finished()))
            .count()
    }
}

#[cfg(test)]
mod tests;
