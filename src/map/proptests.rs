//! Property-based tests for the concurrent map using proptest
//!
//! Single-threaded sequences of operations are replayed against
//! `std::collections::HashMap` as a model.

use crate::map::ConcurrentMap;
use proptest::prelude::*;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone)]
enum Op {
    Set(u8, u16),
    Remove(u8),
    GetOrSet(u8, u16),
    SetIfNotExist(u8, u16),
    BatchRemove(Vec<u8>),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (any::<u8>(), any::<u16>()).prop_map(|(k, v)| Op::Set(k, v)),
        2 => any::<u8>().prop_map(Op::Remove),
        2 => (any::<u8>(), any::<u16>()).prop_map(|(k, v)| Op::GetOrSet(k, v)),
        2 => (any::<u8>(), any::<u16>()).prop_map(|(k, v)| Op::SetIfNotExist(k, v)),
        1 => prop::collection::vec(any::<u8>(), 0..8).prop_map(Op::BatchRemove),
    ]
}

proptest! {
    #[test]
    fn test_matches_hashmap_model(ops in prop::collection::vec(op_strategy(), 0..200)) {
        let map = ConcurrentMap::new();
        let mut model: HashMap<u8, u16> = HashMap::new();

        for op in ops {
            match op {
                Op::Set(k, v) => {
                    map.set(k, v);
                    model.insert(k, v);
                }
                Op::Remove(k) => {
                    prop_assert_eq!(map.remove(&k), model.remove(&k));
                }
                Op::GetOrSet(k, v) => {
                    let expected = *model.entry(k).or_insert(v);
                    prop_assert_eq!(map.get_or_set(k, v), expected);
                }
                Op::SetIfNotExist(k, v) => {
                    let absent = !model.contains_key(&k);
                    if absent {
                        model.insert(k, v);
                    }
                    prop_assert_eq!(map.set_if_not_exist(k, v), absent);
                }
                Op::BatchRemove(keys) => {
                    for k in &keys {
                        model.remove(k);
                    }
                    map.batch_remove(keys);
                }
            }

            prop_assert_eq!(map.len(), model.len());
            prop_assert_eq!(map.is_empty(), model.is_empty());
        }

        prop_assert_eq!(map.to_map(), model);
    }

    #[test]
    fn test_get_or_set_keeps_first_value(key in any::<i64>(), first in any::<i64>(), second in any::<i64>()) {
        let map = ConcurrentMap::new();
        prop_assert_eq!(map.get_or_set(key, first), first);
        prop_assert_eq!(map.get_or_set(key, second), first);
        prop_assert_eq!(map.get_or_set_func(key, || second), first);
        prop_assert_eq!(map.get_or_set_func_lock(key, || second), first);
        prop_assert_eq!(map.get(&key), Some(first));
    }

    #[test]
    fn test_set_if_not_exist_true_once_until_removed(key in any::<u32>(), values in prop::collection::vec(any::<u32>(), 1..10)) {
        let map = ConcurrentMap::new();
        let first = values[0];

        prop_assert!(map.set_if_not_exist(key, first));
        for &value in &values[1..] {
            prop_assert!(!map.set_if_not_exist(key, value));
            prop_assert!(!map.set_if_not_exist_func(key, || value));
            prop_assert!(!map.set_if_not_exist_func_lock(key, || value));
        }
        prop_assert_eq!(map.get(&key), Some(first));

        prop_assert_eq!(map.remove(&key), Some(first));
        prop_assert!(map.set_if_not_exist_func(key, || first));
    }

    #[test]
    fn test_from_arrays_truncates(
        keys in prop::collection::hash_set(any::<u16>(), 0..50),
        values in prop::collection::vec(any::<u16>(), 0..50),
    ) {
        let keys: Vec<u16> = keys.into_iter().collect();
        let map = ConcurrentMap::from_arrays(keys.clone(), values.clone());

        prop_assert_eq!(map.len(), keys.len().min(values.len()));
        for (key, value) in keys.iter().zip(values.iter()) {
            prop_assert_eq!(map.get(key), Some(*value));
        }
    }

    #[test]
    fn test_flip_with_distinct_values(entries in prop::collection::hash_map(any::<u16>(), any::<u16>(), 0..50)) {
        let distinct: HashSet<u16> = entries.values().copied().collect();
        prop_assume!(distinct.len() == entries.len());

        let map = ConcurrentMap::from_map(entries.clone());
        map.flip();

        let expected: HashMap<u16, u16> = entries.into_iter().map(|(k, v)| (v, k)).collect();
        prop_assert_eq!(map.to_map(), expected);
    }

    #[test]
    fn test_flip_collisions_keep_one_key_per_value(entries in prop::collection::hash_map(any::<u8>(), 0u8..4, 0..30)) {
        let map = ConcurrentMap::from_map(entries.clone());
        map.flip();

        let distinct: HashSet<u8> = entries.values().copied().collect();
        prop_assert_eq!(map.len(), distinct.len());
        for (value, key) in map.to_map() {
            prop_assert_eq!(entries.get(&key), Some(&value));
        }
    }

    #[test]
    fn test_merge_is_union_with_argument_priority(
        left in prop::collection::hash_map(any::<u8>(), any::<u32>(), 0..40),
        right in prop::collection::hash_map(any::<u8>(), any::<u32>(), 0..40),
    ) {
        let receiver = ConcurrentMap::from_map(left.clone());
        let argument = ConcurrentMap::from_map(right.clone());
        receiver.merge(&argument);

        let mut expected = left;
        expected.extend(right.clone());
        prop_assert_eq!(receiver.to_map(), expected);
        prop_assert_eq!(argument.to_map(), right);
    }

    #[test]
    fn test_clone_is_independent(
        entries in prop::collection::hash_map(any::<u8>(), any::<u8>(), 1..40),
        extra in any::<u8>(),
    ) {
        let original = ConcurrentMap::from_map(entries.clone());
        let cloned = original.clone();

        original.clear();
        prop_assert_eq!(cloned.to_map(), entries.clone());

        cloned.set(extra, extra);
        prop_assert!(original.is_empty());
    }

    #[test]
    fn test_snapshots_do_not_track_mutation(entries in prop::collection::hash_map(any::<u8>(), any::<u8>(), 0..40)) {
        let map = ConcurrentMap::from_map(entries.clone());
        let keys = map.keys();
        let values = map.values();
        let snapshot = map.to_map();

        map.clear();
        map.set(0, 0);

        prop_assert_eq!(keys.len(), entries.len());
        prop_assert_eq!(values.len(), entries.len());
        prop_assert_eq!(snapshot, entries);
    }
}
