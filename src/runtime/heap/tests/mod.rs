//! Heap 单元测试
//!
//! Reference counting protocol, destruction order and container growth.

use crate::runtime::heap::{Heap, HeapBody, ObjectKind, RHash, RObject};
use crate::runtime::class::builtin;
use crate::runtime::symbol::SymbolId;
use crate::runtime::value::Value;
use proptest::prelude::*;
use std::cell::RefCell;
use std::rc::Rc;

fn observed_heap(size: usize) -> (Heap, Rc<RefCell<Vec<ObjectKind>>>) {
    let mut heap = Heap::new(size);
    let log = Rc::new(RefCell::new(Vec::new()));
    let sink = log.clone();
    heap.set_destroy_observer(move |_, kind| sink.borrow_mut().push(kind));
    (heap, log)
}

#[cfg(test)]
mod refcount_tests {
    use super::*;

    #[test]
    fn test_new_object_has_count_one() {
        let mut heap = Heap::new(4096);
        let s = heap.alloc_string("hello").unwrap();
        assert_eq!(heap.refcount(s), Some(1));
        heap.incref(s);
        assert_eq!(heap.refcount(s), Some(2));
        heap.decref(s);
        heap.decref(s);
        assert!(!heap.is_live(s));
        assert_eq!(heap.stats().live, 0);
        assert_eq!(heap.arena().used(), 0);
    }

    #[test]
    fn test_immediates_ignore_refcounting() {
        let mut heap = Heap::new(1024);
        heap.incref(Value::Integer(3));
        heap.decref(Value::Nil);
        assert_eq!(heap.refcount(Value::Integer(3)), None);
        assert!(heap.is_live(Value::True));
    }

    #[test]
    fn test_array_of_strings_destroys_each_once() {
        let (mut heap, log) = observed_heap(8192);
        let strings: Vec<Value> = ["a", "b", "c"]
            .iter()
            .map(|s| heap.alloc_string(*s).unwrap())
            .collect();

        // array and hash each hold one extra reference to every string
        let array = heap.alloc_array(Vec::new()).unwrap();
        let hash = heap
            .alloc(HeapBody::Hash(RHash::default()))
            .unwrap();
        let Value::Array(ah) = array else { panic!() };
        let Value::Hash(hh) = hash else { panic!() };
        for (i, s) in strings.iter().enumerate() {
            heap.incref(*s);
            heap.array_push(ah, *s).unwrap();
            heap.incref(*s);
            heap.hash_set(hh, Value::Integer(i as i64), *s).unwrap();
        }
        for s in &strings {
            assert_eq!(heap.refcount(*s), Some(3));
        }

        // drop the local references
        for s in &strings {
            heap.decref(*s);
        }
        heap.decref(array);
        assert!(log.borrow().iter().all(|k| *k == ObjectKind::Array));
        for s in &strings {
            assert_eq!(heap.refcount(*s), Some(1));
        }

        heap.decref(hash);
        let kinds = log.borrow();
        assert_eq!(kinds.len(), 5);
        assert_eq!(
            kinds.iter().filter(|k| **k == ObjectKind::String).count(),
            3
        );
        assert_eq!(heap.stats().live, 0);
        assert_eq!(heap.arena().used(), 0);
    }

    #[test]
    fn test_breadth_first_destruction_order() {
        let (mut heap, log) = observed_heap(8192);
        let leaf = heap.alloc_string("leaf").unwrap();
        let inner = heap.alloc_array(vec![leaf]).unwrap();
        let sibling = heap.alloc_string("sibling").unwrap();
        let outer = heap.alloc_array(vec![inner, sibling]).unwrap();

        heap.decref(outer);
        assert_eq!(
            *log.borrow(),
            vec![
                ObjectKind::Array,
                ObjectKind::Array,
                ObjectKind::String,
                ObjectKind::String
            ]
        );
        assert!(!heap.is_live(leaf));
    }

    #[test]
    fn test_stale_handle_is_detected() {
        let mut heap = Heap::new(4096);
        let first = heap.alloc_string("x").unwrap();
        heap.decref(first);
        let second = heap.alloc_string("y").unwrap();
        // slot reused with a new generation
        assert_eq!(first.handle().unwrap().index(), second.handle().unwrap().index());
        assert!(!heap.is_live(first));
        assert!(heap.string(first).is_none());
        assert_eq!(heap.string(second).unwrap().bytes, b"y");
    }

    #[test]
    fn test_cycle_leaks_until_heap_dropped() {
        let (mut heap, log) = observed_heap(4096);
        let a = heap.alloc_array(Vec::new()).unwrap();
        let Value::Array(h) = a else { panic!() };
        heap.incref(a);
        heap.array_push(h, a).unwrap();
        heap.decref(a);
        // the array still references itself
        assert!(heap.is_live(a));
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn test_failed_alloc_releases_children() {
        let mut heap = Heap::new(256);
        let s = heap.alloc_string("kept").unwrap();
        heap.incref(s);
        let big: Vec<Value> = std::iter::once(s)
            .chain(std::iter::repeat(Value::Nil).take(100))
            .collect();
        assert!(heap.alloc_array(big).is_err());
        assert_eq!(heap.refcount(s), Some(1));
    }

    #[test]
    fn test_ivars_replace_releases_old_value() {
        let mut heap = Heap::new(4096);
        let obj = heap
            .alloc(HeapBody::Object(RObject {
                class: builtin::OBJECT,
                ivars: Vec::new(),
            }))
            .unwrap();
        let name = SymbolId(7);
        let first = heap.alloc_string("one").unwrap();
        assert!(heap.ivar_set(obj, name, first).unwrap());
        let second = heap.alloc_string("two").unwrap();
        heap.ivar_set(obj, name, second).unwrap();
        assert!(!heap.is_live(first));
        assert_eq!(heap.ivar_get(obj, name), second);
        assert_eq!(heap.ivar_get(obj, SymbolId(8)), Value::Nil);
        heap.decref(obj);
        assert!(!heap.is_live(second));
    }
}

#[cfg(test)]
mod container_tests {
    use super::*;

    #[test]
    fn test_array_growth_is_geometric() {
        let mut heap = Heap::new(16 * 1024);
        let a = heap.alloc_array(Vec::new()).unwrap();
        let h = a.handle().unwrap();
        let mut capacities = Vec::new();
        for i in 0..40 {
            heap.array_push(h, Value::Integer(i)).unwrap();
            let cap = heap.capacity(h);
            assert!(heap.array(a).unwrap().items.len() <= cap);
            if capacities.last() != Some(&cap) {
                capacities.push(cap);
            }
        }
        assert!(capacities.len() < 8);
    }

    #[test]
    fn test_hash_keys_compare_by_value() {
        let mut heap = Heap::new(8192);
        let hash = heap.alloc(HeapBody::Hash(RHash::default())).unwrap();
        let h = hash.handle().unwrap();
        let k1 = heap.alloc_string("key").unwrap();
        heap.hash_set(h, k1, Value::Integer(1)).unwrap();
        let k2 = heap.alloc_string("key").unwrap();
        heap.hash_set(h, k2, Value::Integer(2)).unwrap();

        // the duplicate key was released, the first one kept
        assert!(!heap.is_live(k2));
        assert_eq!(heap.hash(hash).unwrap().entries.len(), 1);
        assert_eq!(heap.hash_get(h, Value::Float(1.0)), None);

        let needle = heap.alloc_string("key").unwrap();
        assert_eq!(heap.hash_get(h, needle), Some(Value::Integer(2)));
        assert_eq!(heap.hash_delete(h, needle), Some(Value::Integer(2)));
        heap.decref(needle);
        heap.decref(hash);
        assert_eq!(heap.stats().live, 0);
    }

    #[test]
    fn test_array_set_pads_with_nil() {
        let mut heap = Heap::new(4096);
        let a = heap.alloc_array(Vec::new()).unwrap();
        let h = a.handle().unwrap();
        heap.array_set(h, 3, Value::Integer(9)).unwrap();
        assert_eq!(
            heap.array(a).unwrap().items,
            vec![Value::Nil, Value::Nil, Value::Nil, Value::Integer(9)]
        );
    }

    #[test]
    fn test_structural_equality() {
        let mut heap = Heap::new(8192);
        let s1 = heap.alloc_string("x").unwrap();
        let s2 = heap.alloc_string("x").unwrap();
        let a = heap.alloc_array(vec![Value::Integer(1), s1]).unwrap();
        let b = heap.alloc_array(vec![Value::Float(1.0), s2]).unwrap();
        assert!(heap.values_eq(a, b));
        assert!(!heap.values_eq(a, Value::Nil));
    }
}

#[cfg(test)]
mod refcount_proptests {
    use super::*;

    proptest! {
        #[test]
        fn shared_strings_balance(ops in proptest::collection::vec((0usize..4, 0usize..8), 1..60)) {
            let (mut heap, log) = observed_heap(64 * 1024);
            let strings: Vec<Value> = (0..8)
                .map(|i| heap.alloc_string(format!("s{}", i)).unwrap())
                .collect();
            let containers: Vec<Value> = (0..4)
                .map(|_| heap.alloc_array(Vec::new()).unwrap())
                .collect();

            let mut expected = vec![1u32; strings.len()];
            for (c, s) in ops {
                heap.incref(strings[s]);
                heap.array_push(containers[c].handle().unwrap(), strings[s]).unwrap();
                expected[s] += 1;
            }
            for (s, count) in strings.iter().zip(&expected) {
                prop_assert_eq!(heap.refcount(*s), Some(*count));
            }

            for s in &strings {
                heap.decref(*s);
            }
            for c in &containers {
                heap.decref(*c);
            }
            prop_assert_eq!(log.borrow().len(), strings.len() + containers.len());
            prop_assert_eq!(heap.stats().live, 0);
            prop_assert_eq!(heap.arena().used(), 0);
        }
    }
}
