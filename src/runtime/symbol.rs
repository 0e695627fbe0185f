//! Symbol table
//!
//! Symbols are interned once and never freed: code compiled by a sandbox may
//! outlive the unit that introduced its names.

use indexmap::IndexSet;
use std::fmt;

/// Interned symbol identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SymbolId(pub u32);

impl fmt::Display for SymbolId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "sym#{}", self.0)
    }
}

/// Insertion-ordered symbol table
#[derive(Debug, Default)]
pub struct SymbolTable {
    names: IndexSet<Box<str>>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern `name`, returning the existing id when already present
    pub fn intern(
        &mut self,
        name: &str,
    ) -> SymbolId {
        if let Some(idx) = self.names.get_index_of(name) {
            return SymbolId(idx as u32);
        }
        let (idx, _) = self.names.insert_full(name.into());
        SymbolId(idx as u32)
    }

    /// Look up a name without interning it
    pub fn lookup(
        &self,
        name: &str,
    ) -> Option<SymbolId> {
        self.names.get_index_of(name).map(|i| SymbolId(i as u32))
    }

    /// Name of an interned symbol
    pub fn name(
        &self,
        id: SymbolId,
    ) -> &str {
        self.names
            .get_index(id.0 as usize)
            .map(|s| &**s)
            .unwrap_or("<unknown>")
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
