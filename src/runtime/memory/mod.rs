//! Memory management
//!
//! All VM storage is charged to one fixed [`Arena`] created when the runtime
//! boots. Object bodies are owned by the heap slab (see `runtime::heap`); each
//! of them holds an arena [`Block`] sized to its footprint, so arena exhaustion
//! is exactly the condition that raises `NoMemoryError` in Ruby code.
//!
//! Two kinds of allocation exist:
//! - [`AllocKind::Value`] for reference-counted objects
//! - [`AllocKind::Raw`] for task control blocks and ireps, which live outside
//!   the refcount protocol and are released explicitly

mod allocator;

pub use allocator::{
    size_class, AllocError, AllocKind, Arena, Block, MemoryStats, Watermark, BLOCK_HEADER_SIZE,
    MIN_BLOCK_SIZE,
};

/// Default arena size (256 KiB)
pub const DEFAULT_ARENA_SIZE: usize = 256 * 1024;

impl Default for Arena {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_ARENA_SIZE)
    }
}

#[cfg(test)]
mod tests;
