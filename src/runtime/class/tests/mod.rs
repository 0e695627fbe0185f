//! Class 单元测试
//!
//! Builtin hierarchy and method resolution.

use crate::runtime::class::{builtin, ClassTable, LookupTarget, Method, MethodResolver, Resolution};
use crate::runtime::symbol::SymbolTable;

fn fixture() -> (SymbolTable, ClassTable) {
    let mut symbols = SymbolTable::new();
    let classes = ClassTable::with_builtins(&mut symbols);
    (symbols, classes)
}

#[cfg(test)]
mod resolution_tests {
    use super::*;

    #[test]
    fn test_builtins_at_fixed_ids() {
        let (symbols, classes) = fixture();
        assert_eq!(classes.len(), builtin::TABLE.len());
        let name = classes.name(builtin::ZERO_DIVISION_ERROR).unwrap();
        assert_eq!(symbols.name(name), "ZeroDivisionError");
        assert!(classes.is_subclass(builtin::NO_METHOD_ERROR, builtin::STANDARD_ERROR));
        assert!(classes.is_subclass(builtin::INTEGER, builtin::NUMERIC));
        assert!(!classes.is_subclass(builtin::NO_MEMORY_ERROR, builtin::STANDARD_ERROR));
    }

    #[test]
    fn test_lookup_walks_superclass_chain() {
        let (mut symbols, mut classes) = fixture();
        let greet = symbols.intern("greet");
        let name = symbols.intern("Child");
        let child = classes.define(name, Some(builtin::OBJECT));
        classes.define_method(builtin::OBJECT, greet, Method::AttrReader(greet));

        match classes.resolve(LookupTarget::Instance(child), greet) {
            Resolution::Found { owner, .. } => assert_eq!(owner, builtin::OBJECT),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_method_missing_fallback() {
        let (mut symbols, mut classes) = fixture();
        let missing = symbols.intern("method_missing");
        let unknown = symbols.intern("unknown");
        let name = symbols.intern("Ghost");
        let ghost = classes.define(name, Some(builtin::OBJECT));

        assert!(matches!(
            classes.resolve(LookupTarget::Instance(ghost), unknown),
            Resolution::NotFound
        ));
        classes.define_method(ghost, missing, Method::AttrReader(missing));
        assert!(matches!(
            classes.resolve(LookupTarget::Instance(ghost), unknown),
            Resolution::Missing { owner, .. } if owner == ghost
        ));
    }

    #[test]
    fn test_singleton_lookup_falls_back_to_class_methods() {
        let (mut symbols, mut classes) = fixture();
        let create = symbols.intern("create");
        let name = symbols.intern("Widget");
        let widget = classes.define(name, Some(builtin::OBJECT));
        classes.define_singleton_method(builtin::OBJECT, create, Method::AttrReader(create));
        assert!(classes.find_direct(LookupTarget::Singleton(widget), create).is_some());
        assert!(classes.find_direct(LookupTarget::Instance(widget), create).is_none());
    }
}
