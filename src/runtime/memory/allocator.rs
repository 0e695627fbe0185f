//! Fixed-arena allocator for the tinyrb runtime
//!
//! The arena is one byte pool sized once at startup. Blocks are carved out of an
//! address-ordered free list, rounded up to a small set of size classes, and
//! coalesced with their neighbours when released.
//!
//! # Block layout
//! ```text
//! +----------+------+-------+-------+------------------+
//! | size u32 | kind | flags | magic |  payload ...     |
//! +----------+------+-------+-------+------------------+
//!  <------------- 8 byte header ----->
//! ```
//!
//! The header lives inside the pool, so a free of something that is not a live
//! block is reported as [`AllocError::InvalidFree`] instead of corrupting the list.

use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{trace, warn};

/// Size of the in-pool block header
pub const BLOCK_HEADER_SIZE: usize = 8;

/// Smallest block the arena hands out (header included)
pub const MIN_BLOCK_SIZE: usize = 16;

/// Blocks up to this size are rounded to powers of two
const SMALL_CLASS_LIMIT: usize = 1024;

/// Larger blocks are rounded to multiples of this granule
const LARGE_GRANULE: usize = 1024;

const BLOCK_MAGIC: u16 = 0x7262;
const FLAG_ALLOCATED: u8 = 0x01;

/// Memory allocation error
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllocError {
    /// Not enough contiguous memory to satisfy the allocation
    #[error("out of memory: requested {requested} bytes, {free} bytes free (largest block {largest})")]
    OutOfMemory {
        requested: usize,
        free: usize,
        largest: usize,
    },
    /// The block is not a live allocation of this arena
    #[error("invalid free of block at offset {0}")]
    InvalidFree(usize),
}

/// What an allocation is used for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AllocKind {
    /// Storage of reference-counted VM objects
    Value,
    /// Runtime bookkeeping outside the refcount protocol (TCBs, ireps)
    Raw,
}

impl AllocKind {
    #[inline]
    fn as_u8(self) -> u8 {
        match self {
            AllocKind::Value => 1,
            AllocKind::Raw => 2,
        }
    }

    #[inline]
    fn from_u8(val: u8) -> Option<Self> {
        match val {
            1 => Some(AllocKind::Value),
            2 => Some(AllocKind::Raw),
            _ => None,
        }
    }

    #[inline]
    fn index(self) -> usize {
        match self {
            AllocKind::Value => 0,
            AllocKind::Raw => 1,
        }
    }
}

/// A live block inside the arena
///
/// Blocks are plain coordinates; ownership is tracked by whoever holds them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Block {
    offset: u32,
    size: u32,
}

impl Block {
    /// Offset of the block header inside the pool
    #[inline]
    pub fn offset(&self) -> usize {
        self.offset as usize
    }

    /// Total block size, header included
    #[inline]
    pub fn size(&self) -> usize {
        self.size as usize
    }

    /// Usable payload bytes
    #[inline]
    pub fn payload_size(&self) -> usize {
        self.size() - BLOCK_HEADER_SIZE
    }
}

/// Snapshot of the free list used to compare arena states
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Watermark {
    pub used: usize,
    pub free_blocks: Vec<(usize, usize)>,
}

/// Arena statistics
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MemoryStats {
    /// Pool size in bytes
    pub total: usize,
    /// Bytes held by live blocks
    pub used: usize,
    /// Bytes on the free list
    pub free: usize,
    /// Number of free blocks
    pub free_blocks: usize,
    /// Largest single free block
    pub largest_free: usize,
    /// 1 - largest_free / free; 0.0 when the free space is one block
    pub fragmentation: f64,
    /// High watermark of `used`
    pub peak_used: usize,
    /// Low watermark of `free`
    pub min_free: usize,
    /// Successful allocations since creation
    pub allocations: u64,
    /// Frees since creation
    pub frees: u64,
    /// Allocations refused with OutOfMemory
    pub failures: u64,
    /// Live bytes charged to VM values
    pub value_bytes: usize,
    /// Live bytes charged to raw bookkeeping
    pub raw_bytes: usize,
}

/// Round a payload request up to its block size class
///
/// Saturates at `usize::MAX` for requests no arena can hold.
pub fn size_class(request: usize) -> usize {
    let total = request.saturating_add(BLOCK_HEADER_SIZE);
    if total <= SMALL_CLASS_LIMIT {
        total.next_power_of_two().max(MIN_BLOCK_SIZE)
    } else {
        total.div_ceil(LARGE_GRANULE).saturating_mul(LARGE_GRANULE)
    }
}

/// Fixed-size free-list arena
#[derive(Debug)]
pub struct Arena {
    /// Backing pool
    pool: Box<[u8]>,
    /// offset -> size, address ordered
    free: BTreeMap<usize, usize>,
    used: usize,
    peak_used: usize,
    min_free: usize,
    allocations: u64,
    frees: u64,
    failures: u64,
    by_kind: [usize; 2],
}

impl Arena {
    /// Create an arena over a pool of `capacity` bytes
    ///
    /// The capacity is truncated to a multiple of the minimum block size.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = (capacity / MIN_BLOCK_SIZE) * MIN_BLOCK_SIZE;
        let mut free = BTreeMap::new();
        if capacity > 0 {
            free.insert(0, capacity);
        }
        Self {
            pool: vec![0u8; capacity].into_boxed_slice(),
            free,
            used: 0,
            peak_used: 0,
            min_free: capacity,
            allocations: 0,
            frees: 0,
            failures: 0,
            by_kind: [0; 2],
        }
    }

    /// Pool size in bytes
    pub fn capacity(&self) -> usize {
        self.pool.len()
    }

    /// Bytes held by live blocks
    pub fn used(&self) -> usize {
        self.used
    }

    /// Bytes available on the free list
    pub fn available(&self) -> usize {
        self.capacity() - self.used
    }

    /// Allocate a block with at least `size` payload bytes
    pub fn alloc(
        &mut self,
        size: usize,
        kind: AllocKind,
    ) -> Result<Block, AllocError> {
        let need = size_class(size);
        let found = self
            .free
            .iter()
            .find(|(_, len)| **len >= need)
            .map(|(&off, &len)| (off, len));

        let Some((offset, len)) = found else {
            self.failures += 1;
            let err = AllocError::OutOfMemory {
                requested: size,
                free: self.available(),
                largest: self.largest_free(),
            };
            warn!("arena allocation failed: {}", err);
            return Err(err);
        };

        self.free.remove(&offset);
        let mut block_size = need;
        if len - need >= MIN_BLOCK_SIZE {
            self.free.insert(offset + need, len - need);
        } else {
            block_size = len;
        }

        self.write_header(offset, block_size, kind, FLAG_ALLOCATED);
        self.used += block_size;
        self.by_kind[kind.index()] += block_size;
        self.allocations += 1;
        self.peak_used = self.peak_used.max(self.used);
        self.min_free = self.min_free.min(self.available());
        trace!(offset, size = block_size, ?kind, "arena alloc");

        Ok(Block {
            offset: offset as u32,
            size: block_size as u32,
        })
    }

    /// Release a block back to the free list, merging with free neighbours
    pub fn free(
        &mut self,
        block: Block,
    ) -> Result<(), AllocError> {
        let kind = self.validate(block)?;
        let offset = block.offset();
        let size = block.size();

        self.write_header(offset, size, kind, 0);
        self.used -= size;
        self.by_kind[kind.index()] -= size;
        self.frees += 1;
        self.insert_free(offset, size);
        trace!(offset, size, ?kind, "arena free");
        Ok(())
    }

    /// Resize a block, moving it when it cannot grow in place
    pub fn realloc(
        &mut self,
        block: Block,
        new_size: usize,
    ) -> Result<Block, AllocError> {
        let kind = self.validate(block)?;
        let need = size_class(new_size);
        let offset = block.offset();
        let size = block.size();

        if need <= size {
            if size - need >= MIN_BLOCK_SIZE {
                self.write_header(offset, need, kind, FLAG_ALLOCATED);
                self.used -= size - need;
                self.by_kind[kind.index()] -= size - need;
                self.insert_free(offset + need, size - need);
                return Ok(Block {
                    offset: offset as u32,
                    size: need as u32,
                });
            }
            return Ok(block);
        }

        // grow in place when the next block is free and large enough
        let next = offset + size;
        if let Some(&next_len) = self.free.get(&next) {
            if size + next_len >= need {
                self.free.remove(&next);
                let mut grown = need;
                let rest = size + next_len - need;
                if rest >= MIN_BLOCK_SIZE {
                    self.free.insert(offset + need, rest);
                } else {
                    grown = size + next_len;
                }
                self.write_header(offset, grown, kind, FLAG_ALLOCATED);
                self.used += grown - size;
                self.by_kind[kind.index()] += grown - size;
                self.peak_used = self.peak_used.max(self.used);
                self.min_free = self.min_free.min(self.available());
                return Ok(Block {
                    offset: offset as u32,
                    size: grown as u32,
                });
            }
        }

        let moved = self.alloc(new_size, kind)?;
        let payload = block.payload_size().min(moved.payload_size());
        self.pool.copy_within(
            offset + BLOCK_HEADER_SIZE..offset + BLOCK_HEADER_SIZE + payload,
            moved.offset() + BLOCK_HEADER_SIZE,
        );
        self.free(block)?;
        Ok(moved)
    }

    /// Payload bytes of a live block
    pub fn payload(
        &self,
        block: Block,
    ) -> &[u8] {
        let start = block.offset() + BLOCK_HEADER_SIZE;
        &self.pool[start..block.offset() + block.size()]
    }

    /// Mutable payload bytes of a live block
    pub fn payload_mut(
        &mut self,
        block: Block,
    ) -> &mut [u8] {
        let start = block.offset() + BLOCK_HEADER_SIZE;
        let end = block.offset() + block.size();
        &mut self.pool[start..end]
    }

    /// Largest contiguous free block
    pub fn largest_free(&self) -> usize {
        self.free.values().copied().max().unwrap_or(0)
    }

    /// Snapshot the free list
    pub fn watermark(&self) -> Watermark {
        Watermark {
            used: self.used,
            free_blocks: self.free.iter().map(|(&o, &s)| (o, s)).collect(),
        }
    }

    /// Collect statistics
    pub fn stats(&self) -> MemoryStats {
        let free = self.available();
        let largest = self.largest_free();
        let fragmentation = if free == 0 {
            0.0
        } else {
            1.0 - largest as f64 / free as f64
        };
        MemoryStats {
            total: self.capacity(),
            used: self.used,
            free,
            free_blocks: self.free.len(),
            largest_free: largest,
            fragmentation,
            peak_used: self.peak_used,
            min_free: self.min_free,
            allocations: self.allocations,
            frees: self.frees,
            failures: self.failures,
            value_bytes: self.by_kind[AllocKind::Value.index()],
            raw_bytes: self.by_kind[AllocKind::Raw.index()],
        }
    }

    fn insert_free(
        &mut self,
        mut offset: usize,
        mut size: usize,
    ) {
        if let Some((&prev, &prev_len)) = self.free.range(..offset).next_back() {
            if prev + prev_len == offset {
                self.free.remove(&prev);
                offset = prev;
                size += prev_len;
            }
        }
        if let Some(next_len) = self.free.remove(&(offset + size)) {
            size += next_len;
        }
        self.free.insert(offset, size);
    }

    fn validate(
        &self,
        block: Block,
    ) -> Result<AllocKind, AllocError> {
        let offset = block.offset();
        if offset + BLOCK_HEADER_SIZE > self.pool.len() || block.size() < MIN_BLOCK_SIZE {
            return Err(AllocError::InvalidFree(offset));
        }
        let header = &self.pool[offset..offset + BLOCK_HEADER_SIZE];
        let size = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
        let magic = u16::from_le_bytes([header[6], header[7]]);
        let kind = AllocKind::from_u8(header[4]);
        match kind {
            Some(kind)
                if magic == BLOCK_MAGIC
                    && header[5] & FLAG_ALLOCATED != 0
                    && size == block.size() =>
            {
                Ok(kind)
            }
            _ => Err(AllocError::InvalidFree(offset)),
        }
    }

    fn write_header(
        &mut self,
        offset: usize,
        size: usize,
        kind: AllocKind,
        flags: u8,
    ) {
        let header = &mut self.pool[offset..offset + BLOCK_HEADER_SIZE];
        header[0..4].copy_from_slice(&(size as u32).to_le_bytes());
        header[4] = kind.as_u8();
        header[5] = flags;
        header[6..8].copy_from_slice(&BLOCK_MAGIC.to_le_bytes());
    }
}
