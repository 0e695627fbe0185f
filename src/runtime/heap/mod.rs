//! Object heap with explicit reference counting
//!
//! Objects live in a slab of generation-checked slots. Each slot holds the
//! object's reference count, the arena block charged for its footprint and its
//! body. The protocol is:
//!
//! - a freshly allocated object starts with count 1, owned by the caller
//! - every copy of a reference into a new slot is paired with [`Heap::incref`]
//! - every overwrite or scope exit of a slot is paired with [`Heap::decref`]
//! - container mutators take ownership of the values passed in
//!
//! Destruction runs on an explicit breadth-first worklist: children are released
//! in storage order, level by level, without host recursion. Reference cycles
//! are never collected; they stay allocated until the runtime is dropped.

mod objects;

pub use objects::{
    DataPayload, HeapBody, MutexState, ObjectKind, RArray, RData, RHash, RObject, RProc, RRange,
    RString, OBJECT_HEADER_BYTES, VALUE_SLOT_BYTES,
};

use std::collections::VecDeque;
use tracing::{error, trace};

use crate::runtime::memory::{size_class, AllocError, AllocKind, Arena, Block, MemoryStats};
use crate::runtime::symbol::SymbolId;
use crate::runtime::value::numeric::num_eq;
use crate::runtime::value::{Handle, Value};

/// Maximum nesting compared by structural equality
const EQ_DEPTH_LIMIT: usize = 64;

#[derive(Debug)]
struct Entry {
    refcount: u32,
    block: Block,
    body: HeapBody,
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    entry: Option<Entry>,
}

/// Heap counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
    /// Objects currently alive
    pub live: usize,
    /// Objects created since boot
    pub created: u64,
    /// Objects destroyed since boot
    pub destroyed: u64,
}

type DestroyObserver = Box<dyn FnMut(Handle, ObjectKind)>;

/// Reference-counted object heap
pub struct Heap {
    arena: Arena,
    slots: Vec<Slot>,
    free_slots: Vec<u32>,
    stats: HeapStats,
    observer: Option<DestroyObserver>,
}

impl std::fmt::Debug for Heap {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Heap")
            .field("arena", &self.arena.stats())
            .field("slots", &self.slots.len())
            .field("stats", &self.stats)
            .finish()
    }
}

impl Heap {
    /// Create a heap over a fresh arena of `arena_size` bytes
    pub fn new(arena_size: usize) -> Self {
        Self {
            arena: Arena::with_capacity(arena_size),
            slots: Vec::new(),
            free_slots: Vec::new(),
            stats: HeapStats::default(),
            observer: None,
        }
    }

    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    pub fn arena_mut(&mut self) -> &mut Arena {
        &mut self.arena
    }

    pub fn memory_stats(&self) -> MemoryStats {
        self.arena.stats()
    }

    pub fn stats(&self) -> HeapStats {
        self.stats
    }

    /// Observe every destruction (used by tests to count destructor runs)
    pub fn set_destroy_observer(
        &mut self,
        observer: impl FnMut(Handle, ObjectKind) + 'static,
    ) {
        self.observer = Some(Box::new(observer));
    }

    /// Allocate an object with reference count 1
    ///
    /// The body's children are owned by the new object; when the allocation
    /// fails they are released before the error is returned.
    pub fn alloc(
        &mut self,
        body: HeapBody,
    ) -> Result<Value, AllocError> {
        let block = match self.arena.alloc(body.footprint(), AllocKind::Value) {
            Ok(block) => block,
            Err(err) => {
                let mut children = Vec::new();
                body.for_each_child(|c| children.push(c));
                for child in children {
                    self.decref(child);
                }
                return Err(err);
            }
        };

        let index = match self.free_slots.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot::default());
                (self.slots.len() - 1) as u32
            }
        };
        let slot = &mut self.slots[index as usize];
        let handle = Handle::new(index, slot.generation);
        let value = body.tag(handle);
        trace!(%handle, kind = ?body.kind(), "heap alloc");
        slot.entry = Some(Entry {
            refcount: 1,
            block,
            body,
        });
        self.stats.live += 1;
        self.stats.created += 1;
        Ok(value)
    }

    /// Allocate a string object
    pub fn alloc_string(
        &mut self,
        bytes: impl Into<Vec<u8>>,
    ) -> Result<Value, AllocError> {
        self.alloc(HeapBody::String(RString {
            bytes: bytes.into(),
        }))
    }

    /// Allocate an array taking ownership of `items`
    pub fn alloc_array(
        &mut self,
        items: Vec<Value>,
    ) -> Result<Value, AllocError> {
        self.alloc(HeapBody::Array(RArray { items }))
    }

    fn entry(
        &self,
        h: Handle,
    ) -> Option<&Entry> {
        let slot = self.slots.get(h.index())?;
        if slot.generation != h.generation() {
            return None;
        }
        slot.entry.as_ref()
    }

    fn entry_mut(
        &mut self,
        h: Handle,
    ) -> Option<&mut Entry> {
        let slot = self.slots.get_mut(h.index())?;
        if slot.generation != h.generation() {
            return None;
        }
        slot.entry.as_mut()
    }

    /// True when `v` is an immediate or refers to a live object
    pub fn is_live(
        &self,
        v: Value,
    ) -> bool {
        match v.handle() {
            Some(h) => self.entry(h).is_some(),
            None => true,
        }
    }

    /// Current reference count of the object behind `v`
    pub fn refcount(
        &self,
        v: Value,
    ) -> Option<u32> {
        v.handle().and_then(|h| self.entry(h)).map(|e| e.refcount)
    }

    pub fn get(
        &self,
        h: Handle,
    ) -> Option<&HeapBody> {
        self.entry(h).map(|e| &e.body)
    }

    pub fn get_mut(
        &mut self,
        h: Handle,
    ) -> Option<&mut HeapBody> {
        self.entry_mut(h).map(|e| &mut e.body)
    }

    /// Increment the count of a reference value; no-op for immediates
    #[inline]
    pub fn incref(
        &mut self,
        v: Value,
    ) {
        let Some(h) = v.handle() else { return };
        match self.entry_mut(h) {
            Some(entry) => entry.refcount += 1,
            None => {
                error!(%h, "incref of a dead object");
            }
        }
    }

    /// Decrement the count of a reference value, destroying it at zero
    pub fn decref(
        &mut self,
        v: Value,
    ) {
        let Some(h) = v.handle() else { return };
        let mut worklist = VecDeque::new();
        worklist.push_back(h);

        while let Some(h) = worklist.pop_front() {
            let Some(entry) = self.entry_mut(h) else {
                error!(%h, "decref of a dead object");
                continue;
            };
            if entry.refcount > 1 {
                entry.refcount -= 1;
                continue;
            }

            let slot = &mut self.slots[h.index()];
            let Some(entry) = slot.entry.take() else {
                continue;
            };
            slot.generation = slot.generation.wrapping_add(1);
            self.free_slots.push(h.index() as u32);

            entry.body.for_each_child(|child| {
                if let Some(ch) = child.handle() {
                    worklist.push_back(ch);
                }
            });
            if let Err(err) = self.arena.free(entry.block) {
                error!(%h, "releasing object storage failed: {}", err);
            }
            self.stats.live -= 1;
            self.stats.destroyed += 1;
            let kind = entry.body.kind();
            trace!(%h, ?kind, "heap destroy");
            if let Some(observer) = self.observer.as_mut() {
                observer(h, kind);
            }
        }
    }

    /// Replace the value in `slot`, taking ownership of `new` and releasing the old one
    #[inline]
    pub fn replace(
        &mut self,
        slot: &mut Value,
        new: Value,
    ) {
        let old = std::mem::replace(slot, new);
        self.decref(old);
    }

    /// Fail with `OutOfMemory` unless an object with `payload` bytes of
    /// elements could fit in the arena right now
    ///
    /// Callers check before building a large host-side buffer. `None` stands
    /// for a size that overflowed.
    pub fn check_room(
        &self,
        payload: Option<usize>,
    ) -> Result<(), AllocError> {
        let need = payload.and_then(|p| p.checked_add(OBJECT_HEADER_BYTES));
        let largest = self.arena.largest_free();
        match need {
            Some(n) if size_class(n) <= largest => Ok(()),
            _ => Err(AllocError::OutOfMemory {
                requested: need.unwrap_or(usize::MAX),
                free: self.arena.available(),
                largest,
            }),
        }
    }

    /// Grow the arena block of `h` so its payload holds at least `needed` bytes
    ///
    /// Capacity at least doubles on every growth. `None` is a size that
    /// overflowed and always fails.
    fn reserve(
        &mut self,
        h: Handle,
        needed: Option<usize>,
    ) -> Result<(), AllocError> {
        let Some(entry) = self.entry(h) else {
            return Ok(());
        };
        let block = entry.block;
        let Some(needed) = needed else {
            return Err(AllocError::OutOfMemory {
                requested: usize::MAX,
                free: self.arena.available(),
                largest: self.arena.largest_free(),
            });
        };
        if needed <= block.payload_size() {
            return Ok(());
        }
        let target = needed.max(block.payload_size().saturating_mul(2));
        let grown = self.arena.realloc(block, target)?;
        if let Some(entry) = self.entry_mut(h) {
            entry.block = grown;
        }
        Ok(())
    }

    /// Capacity in elements (bytes for strings) the current block can hold
    pub fn capacity(
        &self,
        h: Handle,
    ) -> usize {
        let Some(entry) = self.entry(h) else { return 0 };
        let room = entry.block.payload_size().saturating_sub(OBJECT_HEADER_BYTES);
        match &entry.body {
            HeapBody::String(_) => room,
            HeapBody::Array(_) => room / VALUE_SLOT_BYTES,
            HeapBody::Hash(_) => room / (2 * VALUE_SLOT_BYTES),
            _ => 0,
        }
    }

    // ------------------------------------------------------------------
    // String
    // ------------------------------------------------------------------

    pub fn string(
        &self,
        v: Value,
    ) -> Option<&RString> {
        match v {
            Value::String(h) => match self.get(h)? {
                HeapBody::String(s) => Some(s),
                _ => None,
            },
            _ => None,
        }
    }

    /// Append bytes to a string
    pub fn string_append(
        &mut self,
        h: Handle,
        bytes: &[u8],
    ) -> Result<(), AllocError> {
        let len = match self.get(h) {
            Some(HeapBody::String(s)) => s.bytes.len(),
            _ => return Ok(()),
        };
        self.reserve(h, payload_bytes(len.saturating_add(bytes.len()), 1))?;
        if let Some(HeapBody::String(s)) = self.get_mut(h) {
            s.bytes.extend_from_slice(bytes);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Array
    // ------------------------------------------------------------------

    pub fn array(
        &self,
        v: Value,
    ) -> Option<&RArray> {
        match v {
            Value::Array(h) => match self.get(h)? {
                HeapBody::Array(a) => Some(a),
                _ => None,
            },
            _ => None,
        }
    }

    fn array_len(
        &self,
        h: Handle,
    ) -> Option<usize> {
        match self.get(h)? {
            HeapBody::Array(a) => Some(a.items.len()),
            _ => None,
        }
    }

    /// Append `v` (owned) to the array
    pub fn array_push(
        &mut self,
        h: Handle,
        v: Value,
    ) -> Result<(), AllocError> {
        let Some(len) = self.array_len(h) else {
            self.decref(v);
            return Ok(());
        };
        if let Err(err) = self.reserve(h, payload_bytes(len + 1, VALUE_SLOT_BYTES)) {
            self.decref(v);
            return Err(err);
        }
        if let Some(HeapBody::Array(a)) = self.get_mut(h) {
            a.items.push(v);
        }
        Ok(())
    }

    /// Store `v` (owned) at `index`, padding with nil past the end
    pub fn array_set(
        &mut self,
        h: Handle,
        index: usize,
        v: Value,
    ) -> Result<(), AllocError> {
        let Some(len) = self.array_len(h) else {
            self.decref(v);
            return Ok(());
        };
        let needed = index
            .checked_add(1)
            .and_then(|n| payload_bytes(len.max(n), VALUE_SLOT_BYTES));
        if let Err(err) = self.reserve(h, needed) {
            self.decref(v);
            return Err(err);
        }
        let old = match self.get_mut(h) {
            Some(HeapBody::Array(a)) => {
                if index >= a.items.len() {
                    a.items.resize(index + 1, Value::Nil);
                }
                std::mem::replace(&mut a.items[index], v)
            }
            _ => Value::Nil,
        };
        self.decref(old);
        Ok(())
    }

    /// Insert `v` (owned) at `index`
    pub fn array_insert(
        &mut self,
        h: Handle,
        index: usize,
        v: Value,
    ) -> Result<(), AllocError> {
        let Some(len) = self.array_len(h) else {
            self.decref(v);
            return Ok(());
        };
        if index > len {
            return self.array_set(h, index, v);
        }
        if let Err(err) = self.reserve(h, payload_bytes(len + 1, VALUE_SLOT_BYTES)) {
            self.decref(v);
            return Err(err);
        }
        if let Some(HeapBody::Array(a)) = self.get_mut(h) {
            a.items.insert(index, v);
        }
        Ok(())
    }

    /// Remove the element at `index`; ownership passes to the caller
    pub fn array_remove(
        &mut self,
        h: Handle,
        index: usize,
    ) -> Option<Value> {
        match self.get_mut(h)? {
            HeapBody::Array(a) if index < a.items.len() => Some(a.items.remove(index)),
            _ => None,
        }
    }

    /// Remove every element, releasing them
    pub fn array_clear(
        &mut self,
        h: Handle,
    ) {
        let items = match self.get_mut(h) {
            Some(HeapBody::Array(a)) => std::mem::take(&mut a.items),
            _ => return,
        };
        for item in items {
            self.decref(item);
        }
    }

    // ------------------------------------------------------------------
    // Hash
    // ------------------------------------------------------------------

    pub fn hash(
        &self,
        v: Value,
    ) -> Option<&RHash> {
        match v {
            Value::Hash(h) => match self.get(h)? {
                HeapBody::Hash(hash) => Some(hash),
                _ => None,
            },
            _ => None,
        }
    }

    fn hash_position(
        &self,
        h: Handle,
        key: Value,
    ) -> Option<usize> {
        match self.get(h)? {
            HeapBody::Hash(hash) => hash
                .entries
                .iter()
                .position(|(k, _)| self.values_eq(*k, key)),
            _ => None,
        }
    }

    /// Value stored under `key` (borrowed)
    pub fn hash_get(
        &self,
        h: Handle,
        key: Value,
    ) -> Option<Value> {
        let pos = self.hash_position(h, key)?;
        match self.get(h)? {
            HeapBody::Hash(hash) => Some(hash.entries[pos].1),
            _ => None,
        }
    }

    /// Store `value` under `key`; both are owned by the call
    pub fn hash_set(
        &mut self,
        h: Handle,
        key: Value,
        value: Value,
    ) -> Result<(), AllocError> {
        if let Some(pos) = self.hash_position(h, key) {
            let old = match self.get_mut(h) {
                Some(HeapBody::Hash(hash)) => std::mem::replace(&mut hash.entries[pos].1, value),
                _ => value,
            };
            self.decref(old);
            self.decref(key);
            return Ok(());
        }
        let len = match self.get(h) {
            Some(HeapBody::Hash(hash)) => hash.entries.len(),
            _ => {
                self.decref(key);
                self.decref(value);
                return Ok(());
            }
        };
        if let Err(err) = self.reserve(h, payload_bytes(len + 1, 2 * VALUE_SLOT_BYTES)) {
            self.decref(key);
            self.decref(value);
            return Err(err);
        }
        if let Some(HeapBody::Hash(hash)) = self.get_mut(h) {
            hash.entries.push((key, value));
        }
        Ok(())
    }

    /// Remove `key`; ownership of the stored value passes to the caller
    pub fn hash_delete(
        &mut self,
        h: Handle,
        key: Value,
    ) -> Option<Value> {
        let pos = self.hash_position(h, key)?;
        let (k, v) = match self.get_mut(h)? {
            HeapBody::Hash(hash) => hash.entries.remove(pos),
            _ => return None,
        };
        self.decref(k);
        Some(v)
    }

    // ------------------------------------------------------------------
    // Objects
    // ------------------------------------------------------------------

    pub fn object(
        &self,
        v: Value,
    ) -> Option<&RObject> {
        match v {
            Value::Object(h) => match self.get(h)? {
                HeapBody::Object(o) => Some(o),
                _ => None,
            },
            _ => None,
        }
    }

    /// Instance variable (borrowed); nil when unset
    pub fn ivar_get(
        &self,
        obj: Value,
        name: SymbolId,
    ) -> Value {
        self.object(obj)
            .and_then(|o| o.ivar(name))
            .unwrap_or(Value::Nil)
    }

    /// Set an instance variable, taking ownership of `v`
    ///
    /// Returns false (and releases `v`) when `obj` cannot hold ivars.
    pub fn ivar_set(
        &mut self,
        obj: Value,
        name: SymbolId,
        v: Value,
    ) -> Result<bool, AllocError> {
        let Value::Object(h) = obj else {
            self.decref(v);
            return Ok(false);
        };
        let (existing, count) = match self.get(h) {
            Some(HeapBody::Object(o)) => (o.ivars.iter().position(|(k, _)| *k == name), o.ivars.len()),
            _ => {
                self.decref(v);
                return Ok(false);
            }
        };
        match existing {
            Some(pos) => {
                let old = match self.get_mut(h) {
                    Some(HeapBody::Object(o)) => std::mem::replace(&mut o.ivars[pos].1, v),
                    _ => v,
                };
                self.decref(old);
            }
            None => {
                let needed = payload_bytes(count + 1, VALUE_SLOT_BYTES + 8).and_then(|n| n.checked_add(8));
                if let Err(err) = self.reserve(h, needed) {
                    self.decref(v);
                    return Err(err);
                }
                if let Some(HeapBody::Object(o)) = self.get_mut(h) {
                    o.ivars.push((name, v));
                }
            }
        }
        Ok(true)
    }

    pub fn proc_body(
        &self,
        v: Value,
    ) -> Option<&RProc> {
        match v {
            Value::Proc(h) => match self.get(h)? {
                HeapBody::Proc(p) => Some(p),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn range(
        &self,
        v: Value,
    ) -> Option<&RRange> {
        match v {
            Value::Range(h) => match self.get(h)? {
                HeapBody::Range(r) => Some(r),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn data(
        &self,
        v: Value,
    ) -> Option<&RData> {
        match v {
            Value::Data(h) => match self.get(h)? {
                HeapBody::Data(d) => Some(d),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn data_mut(
        &mut self,
        v: Value,
    ) -> Option<&mut RData> {
        match v {
            Value::Data(h) => match self.get_mut(h)? {
                HeapBody::Data(d) => Some(d),
                _ => None,
            },
            _ => None,
        }
    }

    // ------------------------------------------------------------------
    // Equality
    // ------------------------------------------------------------------

    /// Ruby `==` for builtin types: numeric across Integer/Float, structural
    /// for String/Array/Hash/Range, identity otherwise
    pub fn values_eq(
        &self,
        a: Value,
        b: Value,
    ) -> bool {
        self.values_eq_depth(a, b, 0)
    }

    fn values_eq_depth(
        &self,
        a: Value,
        b: Value,
        depth: usize,
    ) -> bool {
        if depth > EQ_DEPTH_LIMIT {
            return false;
        }
        if a.is_numeric() && b.is_numeric() {
            return num_eq(a, b).unwrap_or(false);
        }
        match (a, b) {
            (Value::String(x), Value::String(y)) => {
                x == y
                    || matches!((self.get(x), self.get(y)),
                        (Some(HeapBody::String(s)), Some(HeapBody::String(t))) if s.bytes == t.bytes)
            }
            (Value::Array(x), Value::Array(y)) => {
                if x == y {
                    return true;
                }
                match (self.get(x), self.get(y)) {
                    (Some(HeapBody::Array(s)), Some(HeapBody::Array(t))) => {
                        s.items.len() == t.items.len()
                            && s
                                .items
                                .iter()
                                .zip(&t.items)
                                .all(|(p, q)| self.values_eq_depth(*p, *q, depth + 1))
                    }
                    _ => false,
                }
            }
            (Value::Hash(x), Value::Hash(y)) => {
                if x == y {
                    return true;
                }
                match (self.get(x), self.get(y)) {
                    (Some(HeapBody::Hash(s)), Some(HeapBody::Hash(t))) => {
                        s.entries.len() == t.entries.len()
                            && s.entries.iter().all(|(k, v)| {
                                t.entries.iter().any(|(k2, v2)| {
                                    self.values_eq_depth(*k, *k2, depth + 1)
                                        && self.values_eq_depth(*v, *v2, depth + 1)
                                })
                            })
                    }
                    _ => false,
                }
            }
            (Value::Range(x), Value::Range(y)) => match (self.get(x), self.get(y)) {
                (Some(HeapBody::Range(s)), Some(HeapBody::Range(t))) => {
                    s.exclusive == t.exclusive
                        && self.values_eq_depth(s.first, t.first, depth + 1)
                        && self.values_eq_depth(s.last, t.last, depth + 1)
                }
                _ => false,
            },
            _ => a.identical(&b),
        }
    }
}

/// Block payload for `count` elements of `width` bytes; `None` on overflow
fn payload_bytes(
    count: usize,
    width: usize,
) -> Option<usize> {
    count.checked_mul(width)?.checked_add(OBJECT_HEADER_BYTES)
}

#[cfg(test)]
mod tests;
