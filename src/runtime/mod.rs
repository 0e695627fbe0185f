//! Runtime system
//!
//! Arena allocator, value representation, the reference-counted heap, the
//! class and symbol tables, and the task scheduler. Bytecode execution lives
//! in [`crate::vm`].

pub mod class;
pub mod heap;
pub mod memory;
pub mod scheduler;
pub mod symbol;
pub mod value;
