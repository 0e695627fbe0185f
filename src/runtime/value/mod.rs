//! Core value representation
//!
//! [`Value`] is a fixed-size tagged enum. Immediates (nil, booleans, Integer,
//! Float, Symbol, Class, Task) carry their payload inline; reference types carry
//! a generation-checked [`Handle`] into the heap slab and participate in
//! reference counting.
//!
//! Copying a `Value` is a bit copy. Whoever stores a copy of a reference value
//! into a new slot must pair it with `Heap::incref`.

pub mod numeric;

use std::fmt;

use crate::runtime::class::ClassId;
use crate::runtime::scheduler::TaskHandle;
use crate::runtime::symbol::SymbolId;

/// Handle to an object stored in the heap slab
///
/// The generation makes a handle to a destroyed (and possibly reused) slot
/// detectable instead of aliasing the new occupant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    index: u32,
    generation: u32,
}

impl Handle {
    /// Create a new handle from raw parts
    pub fn new(
        index: u32,
        generation: u32,
    ) -> Self {
        Self { index, generation }
    }

    /// Slot index
    #[inline]
    pub fn index(&self) -> usize {
        self.index as usize
    }

    /// Slot generation
    #[inline]
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for Handle {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "handle@{}#{}", self.index, self.generation)
    }
}

/// VM value
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Value {
    #[default]
    Nil,
    False,
    True,
    Integer(i64),
    Float(f64),
    Symbol(SymbolId),
    Class(ClassId),
    Task(TaskHandle),
    String(Handle),
    Array(Handle),
    Hash(Handle),
    Object(Handle),
    Proc(Handle),
    Range(Handle),
    /// Native-backed objects (Mutex, peripheral bindings)
    Data(Handle),
}

/// Value type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    Nil,
    False,
    True,
    Integer,
    Float,
    Symbol,
    Class,
    Task,
    String,
    Array,
    Hash,
    Object,
    Proc,
    Range,
    Data,
}

impl fmt::Display for ValueType {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let name = match self {
            ValueType::Nil => "nil",
            ValueType::False => "false",
            ValueType::True => "true",
            ValueType::Integer => "Integer",
            ValueType::Float => "Float",
            ValueType::Symbol => "Symbol",
            ValueType::Class => "Class",
            ValueType::Task => "Task",
            ValueType::String => "String",
            ValueType::Array => "Array",
            ValueType::Hash => "Hash",
            ValueType::Object => "Object",
            ValueType::Proc => "Proc",
            ValueType::Range => "Range",
            ValueType::Data => "Data",
        };
        write!(f, "{}", name)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        if b {
            Value::True
        } else {
            Value::False
        }
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl Value {
    /// Type tag of this value
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Nil => ValueType::Nil,
            Value::False => ValueType::False,
            Value::True => ValueType::True,
            Value::Integer(_) => ValueType::Integer,
            Value::Float(_) => ValueType::Float,
            Value::Symbol(_) => ValueType::Symbol,
            Value::Class(_) => ValueType::Class,
            Value::Task(_) => ValueType::Task,
            Value::String(_) => ValueType::String,
            Value::Array(_) => ValueType::Array,
            Value::Hash(_) => ValueType::Hash,
            Value::Object(_) => ValueType::Object,
            Value::Proc(_) => ValueType::Proc,
            Value::Range(_) => ValueType::Range,
            Value::Data(_) => ValueType::Data,
        }
    }

    /// Heap handle if this is a reference value
    #[inline]
    pub fn handle(&self) -> Option<Handle> {
        match *self {
            Value::String(h)
            | Value::Array(h)
            | Value::Hash(h)
            | Value::Object(h)
            | Value::Proc(h)
            | Value::Range(h)
            | Value::Data(h) => Some(h),
            _ => None,
        }
    }

    /// True for values that participate in reference counting
    #[inline]
    pub fn is_ref(&self) -> bool {
        self.handle().is_some()
    }

    /// Ruby truthiness: everything except nil and false
    #[inline]
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::False)
    }

    #[inline]
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    #[inline]
    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Integer(_) | Value::Float(_))
    }

    /// Integer payload
    pub fn as_int(&self) -> Option<i64> {
        match *self {
            Value::Integer(i) => Some(i),
            _ => None,
        }
    }

    /// Numeric payload widened to f64
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::Integer(i) => Some(i as f64),
            Value::Float(f) => Some(f),
            _ => None,
        }
    }

    /// Symbol payload
    pub fn as_symbol(&self) -> Option<SymbolId> {
        match *self {
            Value::Symbol(s) => Some(s),
            _ => None,
        }
    }

    /// Class payload
    pub fn as_class(&self) -> Option<ClassId> {
        match *self {
            Value::Class(c) => Some(c),
            _ => None,
        }
    }

    /// Identity comparison (Ruby `equal?`)
    ///
    /// Floats compare by bits so that NaN is identical to itself.
    pub fn identical(
        &self,
        other: &Value,
    ) -> bool {
        match (self, other) {
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            _ => self == other,
        }
    }
}

#[cfg(test)]
mod tests;
