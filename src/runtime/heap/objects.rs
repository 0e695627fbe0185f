//! Heap object bodies
//!
//! Every Value stored inside a body is a counted child reference: the body owns
//! one count on it and releases that count when the body is destroyed.

use std::collections::VecDeque;
use std::rc::Rc;

use crate::runtime::class::ClassId;
use crate::runtime::scheduler::TaskHandle;
use crate::runtime::symbol::SymbolId;
use crate::runtime::value::Value;
use crate::vm::frames::EnvRef;
use crate::vm::irep::Irep;

/// Bytes charged for every object besides its elements
pub const OBJECT_HEADER_BYTES: usize = 16;
/// Bytes charged per stored Value
pub const VALUE_SLOT_BYTES: usize = 16;

/// Kind of a heap object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    String,
    Array,
    Hash,
    Object,
    Proc,
    Range,
    Data,
}

/// String body
#[derive(Debug, Clone, Default)]
pub struct RString {
    pub bytes: Vec<u8>,
}

impl RString {
    pub fn as_str_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.bytes)
    }
}

/// Array body
#[derive(Debug, Clone, Default)]
pub struct RArray {
    pub items: Vec<Value>,
}

/// Insertion-ordered hash body, searched linearly by Ruby equality
#[derive(Debug, Clone, Default)]
pub struct RHash {
    pub entries: Vec<(Value, Value)>,
}

/// Instance of a user or builtin class
#[derive(Debug, Clone)]
pub struct RObject {
    pub class: ClassId,
    pub ivars: Vec<(SymbolId, Value)>,
}

impl RObject {
    pub fn ivar(
        &self,
        name: SymbolId,
    ) -> Option<Value> {
        self.ivars.iter().find(|(k, _)| *k == name).map(|(_, v)| *v)
    }
}

/// Block or method closure
#[derive(Debug, Clone)]
pub struct RProc {
    pub irep: Rc<Irep>,
    /// `self` captured at creation
    pub self_val: Value,
    /// Register window of the defining frame
    pub env: Option<EnvRef>,
    pub target_class: ClassId,
    /// Frame serial a `return` inside the block leaves
    pub home: Option<u64>,
    /// Frame serial a `break` inside the block returns to
    pub creator: Option<u64>,
    pub lambda: bool,
}

/// Range body
#[derive(Debug, Clone)]
pub struct RRange {
    pub first: Value,
    pub last: Value,
    pub exclusive: bool,
}

/// Mutex state
#[derive(Debug, Clone, Default)]
pub struct MutexState {
    pub owner: Option<TaskHandle>,
    pub waiters: VecDeque<TaskHandle>,
}

/// Native payload of a `Data` object
#[derive(Debug, Clone)]
pub enum DataPayload {
    Mutex(MutexState),
    /// Binding to a registered peripheral driver
    Peripheral { driver: String, channel: u32 },
}

/// Native-backed object
#[derive(Debug, Clone)]
pub struct RData {
    pub class: ClassId,
    pub payload: DataPayload,
}

/// Body of a heap object
#[derive(Debug, Clone)]
pub enum HeapBody {
    String(RString),
    Array(RArray),
    Hash(RHash),
    Object(RObject),
    Proc(RProc),
    Range(RRange),
    Data(RData),
}

impl HeapBody {
    pub fn kind(&self) -> ObjectKind {
        match self {
            HeapBody::String(_) => ObjectKind::String,
            HeapBody::Array(_) => ObjectKind::Array,
            HeapBody::Hash(_) => ObjectKind::Hash,
            HeapBody::Object(_) => ObjectKind::Object,
            HeapBody::Proc(_) => ObjectKind::Proc,
            HeapBody::Range(_) => ObjectKind::Range,
            HeapBody::Data(_) => ObjectKind::Data,
        }
    }

    /// Arena bytes the body needs in its current shape
    pub fn footprint(&self) -> usize {
        OBJECT_HEADER_BYTES
            + match self {
                HeapBody::String(s) => s.bytes.len(),
                HeapBody::Array(a) => a.items.len() * VALUE_SLOT_BYTES,
                HeapBody::Hash(h) => h.entries.len() * 2 * VALUE_SLOT_BYTES,
                HeapBody::Object(o) => 8 + o.ivars.len() * (VALUE_SLOT_BYTES + 8),
                HeapBody::Proc(_) => 48,
                HeapBody::Range(_) => 2 * VALUE_SLOT_BYTES + 8,
                HeapBody::Data(_) => 16,
            }
    }

    /// Visit child references in storage order
    pub fn for_each_child(
        &self,
        mut f: impl FnMut(Value),
    ) {
        match self {
            HeapBody::String(_) | HeapBody::Data(_) => {}
            HeapBody::Array(a) => a.items.iter().copied().for_each(f),
            HeapBody::Hash(h) => {
                for (k, v) in &h.entries {
                    f(*k);
                    f(*v);
                }
            }
            HeapBody::Object(o) => o.ivars.iter().for_each(|(_, v)| f(*v)),
            HeapBody::Proc(p) => f(p.self_val),
            HeapBody::Range(r) => {
                f(r.first);
                f(r.last);
            }
        }
    }

    /// Wrap a handle in the Value tag matching this body
    pub fn tag(
        &self,
        handle: crate::runtime::value::Handle,
    ) -> Value {
        match self {
            HeapBody::String(_) => Value::String(handle),
            HeapBody::Array(_) => Value::Array(handle),
            HeapBody::Hash(_) => Value::Hash(handle),
            HeapBody::Object(_) => Value::Object(handle),
            HeapBody::Proc(_) => Value::Proc(handle),
            HeapBody::Range(_) => Value::Range(handle),
            HeapBody::Data(_) => Value::Data(handle),
        }
    }
}
