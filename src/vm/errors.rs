//! VM errors
//!
//! Two layers: [`VmError`] is what the host API returns (irep loading, task
//! table management). [`Raise`] is a Ruby exception in flight inside a task;
//! it never leaves the task that raised it.

use thiserror::Error;

use crate::frontend::CompileError;
use crate::runtime::class::{builtin, ClassId};
use crate::runtime::memory::AllocError;
use crate::runtime::scheduler::TaskHandle;
use crate::runtime::value::Value;

/// VM result
pub type VmResult<T> = Result<T, VmError>;

/// Host-facing VM errors
#[derive(Debug, Error)]
pub enum VmError {
    #[error("irep format error: {0}")]
    IrepFormat(String),

    #[error("irep version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u16, found: u16 },

    #[error("task table full ({0} slots)")]
    TaskTableFull(usize),

    #[error("invalid task handle {0}")]
    InvalidTask(TaskHandle),

    #[error("invalid task state: {0}")]
    InvalidState(String),

    #[error(transparent)]
    Alloc(#[from] AllocError),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error("boot failed: {0}")]
    Boot(String),
}

/// A Ruby exception being raised
#[derive(Debug)]
pub enum Raise {
    /// Exception to be instantiated from a class and message
    Error { class: ClassId, message: String },
    /// An existing exception object (owns one reference)
    Object(Value),
    /// Arena exhausted; raised with the pinned `NoMemoryError` instance
    OutOfMemory,
}

impl Raise {
    pub fn new(
        class: ClassId,
        message: impl Into<String>,
    ) -> Self {
        Raise::Error {
            class,
            message: message.into(),
        }
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::new(builtin::RUNTIME_ERROR, message)
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(builtin::TYPE_ERROR, message)
    }

    pub fn argument(message: impl Into<String>) -> Self {
        Self::new(builtin::ARGUMENT_ERROR, message)
    }

    /// `wrong number of arguments` error
    pub fn arity(
        given: usize,
        min: usize,
        max: usize,
    ) -> Self {
        let expected = if min == max {
            min.to_string()
        } else if max == usize::MAX {
            format!("{}+", min)
        } else {
            format!("{}..{}", min, max)
        };
        Self::argument(format!(
            "wrong number of arguments (given {}, expected {})",
            given, expected
        ))
    }

    pub fn zero_division() -> Self {
        Self::new(builtin::ZERO_DIVISION_ERROR, "divided by 0")
    }

    pub fn local_jump(message: impl Into<String>) -> Self {
        Self::new(builtin::LOCAL_JUMP_ERROR, message)
    }

    pub fn stack_overflow() -> Self {
        Self::new(builtin::SYSTEM_STACK_ERROR, "stack level too deep")
    }
}

impl From<AllocError> for Raise {
    fn from(_: AllocError) -> Self {
        Raise::OutOfMemory
    }
}

/// Native method result
pub type NativeResult = Result<Value, Raise>;
