//! Classes and method lookup
//!
//! Classes are permanent: once defined they live as long as the runtime. A
//! class carries an instance method table, a singleton (class method) table
//! and a superclass link. Builtin classes occupy fixed ids so the interpreter
//! can name them without a lookup.

use hashbrown::HashMap;
use std::rc::Rc;

use crate::runtime::symbol::{SymbolId, SymbolTable};
use crate::vm::builtins::NativeFn;
use crate::vm::irep::Irep;

/// Class identifier (index into the class table)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClassId(pub u32);

/// Builtin class ids, in boot order
pub mod builtin {
    use super::ClassId;

    pub const OBJECT: ClassId = ClassId(0);
    pub const CLASS: ClassId = ClassId(1);
    pub const NIL: ClassId = ClassId(2);
    pub const TRUE: ClassId = ClassId(3);
    pub const FALSE: ClassId = ClassId(4);
    pub const NUMERIC: ClassId = ClassId(5);
    pub const INTEGER: ClassId = ClassId(6);
    pub const FLOAT: ClassId = ClassId(7);
    pub const SYMBOL: ClassId = ClassId(8);
    pub const STRING: ClassId = ClassId(9);
    pub const ARRAY: ClassId = ClassId(10);
    pub const HASH: ClassId = ClassId(11);
    pub const RANGE: ClassId = ClassId(12);
    pub const PROC: ClassId = ClassId(13);
    pub const TASK: ClassId = ClassId(14);
    pub const MUTEX: ClassId = ClassId(15);
    pub const EXCEPTION: ClassId = ClassId(16);
    pub const STANDARD_ERROR: ClassId = ClassId(17);
    pub const RUNTIME_ERROR: ClassId = ClassId(18);
    pub const TYPE_ERROR: ClassId = ClassId(19);
    pub const ARGUMENT_ERROR: ClassId = ClassId(20);
    pub const NAME_ERROR: ClassId = ClassId(21);
    pub const NO_METHOD_ERROR: ClassId = ClassId(22);
    pub const ZERO_DIVISION_ERROR: ClassId = ClassId(23);
    pub const INDEX_ERROR: ClassId = ClassId(24);
    pub const KEY_ERROR: ClassId = ClassId(25);
    pub const RANGE_ERROR: ClassId = ClassId(26);
    pub const FLOAT_DOMAIN_ERROR: ClassId = ClassId(27);
    pub const LOCAL_JUMP_ERROR: ClassId = ClassId(28);
    pub const NO_MEMORY_ERROR: ClassId = ClassId(29);
    pub const SYSTEM_STACK_ERROR: ClassId = ClassId(30);
    pub const GPIO: ClassId = ClassId(31);

    /// (name, superclass) for every builtin, indexed by id
    pub(crate) const TABLE: &[(&str, Option<ClassId>)] = &[
        ("Object", None),
        ("Class", Some(OBJECT)),
        ("NilClass", Some(OBJECT)),
        ("TrueClass", Some(OBJECT)),
        ("FalseClass", Some(OBJECT)),
        ("Numeric", Some(OBJECT)),
        ("Integer", Some(NUMERIC)),
        ("Float", Some(NUMERIC)),
        ("Symbol", Some(OBJECT)),
        ("String", Some(OBJECT)),
        ("Array", Some(OBJECT)),
        ("Hash", Some(OBJECT)),
        ("Range", Some(OBJECT)),
        ("Proc", Some(OBJECT)),
        ("Task", Some(OBJECT)),
        ("Mutex", Some(OBJECT)),
        ("Exception", Some(OBJECT)),
        ("StandardError", Some(EXCEPTION)),
        ("RuntimeError", Some(STANDARD_ERROR)),
        ("TypeError", Some(STANDARD_ERROR)),
        ("ArgumentError", Some(STANDARD_ERROR)),
        ("NameError", Some(STANDARD_ERROR)),
        ("NoMethodError", Some(NAME_ERROR)),
        ("ZeroDivisionError", Some(STANDARD_ERROR)),
        ("IndexError", Some(STANDARD_ERROR)),
        ("KeyError", Some(INDEX_ERROR)),
        ("RangeError", Some(STANDARD_ERROR)),
        ("FloatDomainError", Some(RANGE_ERROR)),
        ("LocalJumpError", Some(STANDARD_ERROR)),
        ("NoMemoryError", Some(EXCEPTION)),
        ("SystemStackError", Some(EXCEPTION)),
        ("GPIO", Some(OBJECT)),
    ];
}

/// A callable method body
#[derive(Debug, Clone)]
pub enum Method {
    /// Rust function
    Native(NativeFn),
    /// Compiled Ruby method
    Ruby(Rc<Irep>),
    /// `attr_reader` accessor for the ivar
    AttrReader(SymbolId),
    /// `attr_writer` accessor for the ivar
    AttrWriter(SymbolId),
}

/// Class record
#[derive(Debug)]
pub struct RClass {
    pub name: SymbolId,
    pub superclass: Option<ClassId>,
    methods: HashMap<SymbolId, Method>,
    singleton_methods: HashMap<SymbolId, Method>,
}

/// Where a method search starts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupTarget {
    /// Instance methods of the class chain
    Instance(ClassId),
    /// Class methods of the class chain, then instance methods of `Class`
    Singleton(ClassId),
}

/// Outcome of a method search
#[derive(Debug, Clone)]
pub enum Resolution {
    Found { owner: ClassId, method: Method },
    /// Not found, but the receiver defines `method_missing`
    Missing { owner: ClassId, method: Method },
    NotFound,
}

/// Two-phase method resolution
pub trait MethodResolver {
    /// Direct lookup by symbol through the class chain
    fn find_direct(
        &self,
        target: LookupTarget,
        mid: SymbolId,
    ) -> Option<(ClassId, Method)>;

    /// Fallback capability check when the direct lookup fails
    fn fallback(
        &self,
        target: LookupTarget,
        mid: SymbolId,
    ) -> Option<(ClassId, Method)> {
        let _ = (target, mid);
        None
    }

    fn resolve(
        &self,
        target: LookupTarget,
        mid: SymbolId,
    ) -> Resolution {
        if let Some((owner, method)) = self.find_direct(target, mid) {
            return Resolution::Found { owner, method };
        }
        match self.fallback(target, mid) {
            Some((owner, method)) => Resolution::Missing { owner, method },
            None => Resolution::NotFound,
        }
    }
}

/// Permanent class table
#[derive(Debug)]
pub struct ClassTable {
    classes: Vec<RClass>,
    method_missing: SymbolId,
}

impl ClassTable {
    /// Create the table with every builtin class at its fixed id
    pub fn with_builtins(symbols: &mut SymbolTable) -> Self {
        let mut table = Self {
            classes: Vec::with_capacity(builtin::TABLE.len() + 16),
            method_missing: symbols.intern("method_missing"),
        };
        for (name, superclass) in builtin::TABLE {
            let name = symbols.intern(name);
            table.define(name, *superclass);
        }
        table
    }

    /// Define a new class
    pub fn define(
        &mut self,
        name: SymbolId,
        superclass: Option<ClassId>,
    ) -> ClassId {
        let id = ClassId(self.classes.len() as u32);
        self.classes.push(RClass {
            name,
            superclass,
            methods: HashMap::new(),
            singleton_methods: HashMap::new(),
        });
        id
    }

    pub fn get(
        &self,
        id: ClassId,
    ) -> Option<&RClass> {
        self.classes.get(id.0 as usize)
    }

    /// Class name symbol
    pub fn name(
        &self,
        id: ClassId,
    ) -> Option<SymbolId> {
        self.get(id).map(|c| c.name)
    }

    pub fn superclass(
        &self,
        id: ClassId,
    ) -> Option<ClassId> {
        self.get(id).and_then(|c| c.superclass)
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn define_method(
        &mut self,
        class: ClassId,
        mid: SymbolId,
        method: Method,
    ) {
        if let Some(c) = self.classes.get_mut(class.0 as usize) {
            c.methods.insert(mid, method);
        }
    }

    pub fn define_singleton_method(
        &mut self,
        class: ClassId,
        mid: SymbolId,
        method: Method,
    ) {
        if let Some(c) = self.classes.get_mut(class.0 as usize) {
            c.singleton_methods.insert(mid, method);
        }
    }

    /// True when `class` is `ancestor` or inherits from it
    pub fn is_subclass(
        &self,
        class: ClassId,
        ancestor: ClassId,
    ) -> bool {
        let mut cur = Some(class);
        while let Some(c) = cur {
            if c == ancestor {
                return true;
            }
            cur = self.superclass(c);
        }
        false
    }

    /// Search instance methods starting at `class`
    pub fn find_instance_method(
        &self,
        class: ClassId,
        mid: SymbolId,
    ) -> Option<(ClassId, Method)> {
        let mut cur = Some(class);
        while let Some(c) = cur {
            let rclass = self.get(c)?;
            if let Some(m) = rclass.methods.get(&mid) {
                return Some((c, m.clone()));
            }
            cur = rclass.superclass;
        }
        None
    }

    /// Search class methods of `class` and its ancestors only
    pub fn find_class_method(
        &self,
        class: ClassId,
        mid: SymbolId,
    ) -> Option<(ClassId, Method)> {
        let mut cur = Some(class);
        while let Some(c) = cur {
            let rclass = self.get(c)?;
            if let Some(m) = rclass.singleton_methods.get(&mid) {
                return Some((c, m.clone()));
            }
            cur = rclass.superclass;
        }
        None
    }

    fn find_singleton_method(
        &self,
        class: ClassId,
        mid: SymbolId,
    ) -> Option<(ClassId, Method)> {
        self.find_class_method(class, mid)
            .or_else(|| self.find_instance_method(builtin::CLASS, mid))
    }
}

impl MethodResolver for ClassTable {
    fn find_direct(
        &self,
        target: LookupTarget,
        mid: SymbolId,
    ) -> Option<(ClassId, Method)> {
        match target {
            LookupTarget::Instance(c) => self.find_instance_method(c, mid),
            LookupTarget::Singleton(c) => self.find_singleton_method(c, mid),
        }
    }

    fn fallback(
        &self,
        target: LookupTarget,
        _mid: SymbolId,
    ) -> Option<(ClassId, Method)> {
        self.find_direct(target, self.method_missing)
    }
}

#[cfg(test)]
mod tests;
