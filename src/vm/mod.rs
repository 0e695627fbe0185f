//! Virtual Machine and bytecode execution
//!
//! Register-based interpreter over loaded ireps, method dispatch, exceptions,
//! the task loop and the native core library.

pub mod builtins;
pub mod console;
mod dispatch;
pub mod errors;
mod exception;
mod executor;
pub mod frames;
pub mod irep;
pub mod opcode;
mod tasks;

pub use builtins::{CallArgs, NativeFn};
pub use console::{CaptureBuffer, Console};
pub use errors::{NativeResult, Raise, VmError, VmResult};
pub use executor::{LoadedIrep, Vm};
pub use irep::{Irep, Literal, RawIrep, IREP_MAGIC, IREP_VERSION};
pub use opcode::Opcode;
pub use tasks::{RunOutcome, TaskExit};

#[cfg(test)]
mod tests;
