//! Task definitions for the scheduler.
//!
//! A task is a Ruby thread of execution with its own [`VmCore`]. Its control
//! block lives in a fixed slot of the task table.

use std::fmt;

use crate::runtime::memory::Block;
use crate::runtime::value::{Handle, Value};
use crate::vm::frames::VmCore;

/// Handle to a task table slot.
///
/// The generation makes a handle to a reused slot detectable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskHandle {
    slot: u16,
    generation: u32,
}

impl TaskHandle {
    pub fn new(
        slot: u16,
        generation: u32,
    ) -> Self {
        Self { slot, generation }
    }

    /// Slot index.
    #[inline]
    pub fn slot(&self) -> usize {
        self.slot as usize
    }

    #[inline]
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for TaskHandle {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "Task({}#{})", self.slot, self.generation)
    }
}

/// Task state.
///
/// ```text
/// Dormant -> Ready -> Running -> {Waiting, Suspended} -> Ready
///                        |
///                        +-> Dormant (or Suspended when permanent)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    /// Not started or finished.
    Dormant,
    /// Runnable, queued by priority.
    Ready,
    /// Currently executing.
    Running,
    /// Blocked on sleep, join or a mutex.
    Waiting,
    /// Stopped until explicitly resumed.
    Suspended,
}

impl TaskState {
    /// Name of the state as seen from Ruby (`:READY`, ...).
    pub fn symbol_name(&self) -> &'static str {
        match self {
            TaskState::Dormant => "DORMANT",
            TaskState::Ready => "READY",
            TaskState::Running => "RUNNING",
            TaskState::Waiting => "WAITING",
            TaskState::Suspended => "SUSPENDED",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}", self.symbol_name())
    }
}

/// Why a task is Waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitReason {
    /// Until the tick counter reaches `until`.
    Sleep { until: u64 },
    /// Until the task finishes.
    Join(TaskHandle),
    /// Until the mutex is unlocked.
    Mutex(Handle),
}

/// Per-task counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskStats {
    /// Instructions executed.
    pub instructions: u64,
    /// Times the task was dispatched.
    pub quanta: u64,
}

/// Options for a new task.
#[derive(Debug, Clone)]
pub struct TaskOptions {
    pub name: Option<String>,
    /// Lower values run first.
    pub priority: u8,
    /// Permanent tasks return to Suspended instead of Dormant.
    pub permanent: bool,
    /// Create in Suspended state instead of Ready.
    pub start_suspended: bool,
}

impl TaskOptions {
    pub fn with_priority(priority: u8) -> Self {
        Self {
            name: None,
            priority,
            permanent: false,
            start_suspended: false,
        }
    }
}

/// Task control block.
#[derive(Debug)]
pub struct Tcb {
    pub name: String,
    pub state: TaskState,
    pub priority: u8,
    pub permanent: bool,
    pub wait: Option<WaitReason>,
    pub core: VmCore,
    /// Value of the last top-level expression (owned).
    pub result: Value,
    /// Unhandled exception that ended the last run (owned).
    pub error: Option<Value>,
    pub stats: TaskStats,
    /// Arena block charged for the control block and register file.
    pub block: Option<Block>,
}

impl Tcb {
    pub fn new(
        name: String,
        priority: u8,
        permanent: bool,
        max_regs: usize,
    ) -> Self {
        Self {
            name,
            state: TaskState::Dormant,
            priority,
            permanent,
            wait: None,
            core: VmCore::new(max_regs),
            result: Value::Nil,
            error: None,
            stats: TaskStats::default(),
            block: None,
        }
    }

    /// True when the task can be dispatched.
    #[inline]
    pub fn is_ready(&self) -> bool {
        self.state == TaskState::Ready
    }

    /// True when the task has finished and is not permanent.
    #[inline]
    pub fn is_finished(&self) -> bool {
        self.state == TaskState::Dormant
    }
}
