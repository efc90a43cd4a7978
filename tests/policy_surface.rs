//! Eviction-policy surface, write-through, and notification accounting.

use cortado::error::CommitError;
use cortado::listener::RemovalCause;
use cortado::writer::FnWriter;
use cortado::CacheBuilder;
use proptest::prelude::*;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

// ---------------------------------------------------------------------------
// Spec'd admission scenarios
// ---------------------------------------------------------------------------

#[test]
fn admission_keeps_the_reused_key() {
    // Capacity 3: insert A, B, C, read A twice, insert D. A's reuse must
    // keep it resident; exactly one entry is evicted for size.
    let log: Arc<Mutex<Vec<(String, RemovalCause)>>> = Arc::new(Mutex::new(Vec::new()));
    let log2 = Arc::clone(&log);

    let cache: cortado::Cache<String, u64> = CacheBuilder::new(3)
        .record_stats()
        .removal_listener(move |k: &String, _v, cause| {
            log2.lock().unwrap().push((k.clone(), cause));
        })
        .build();

    cache.put("A".to_string(), 1);
    cache.put("B".to_string(), 2);
    cache.put("C".to_string(), 3);
    cache.get_if_present(&"A".to_string());
    cache.get_if_present(&"A".to_string());
    cache.put("D".to_string(), 4);
    cache.clean_up();

    assert!(cache.contains_key(&"A".to_string()), "reused key must survive");
    assert!(cache.contains_key(&"D".to_string()), "newest key sits in the window");
    assert_eq!(cache.entry_count(), 3);
    assert_eq!(cache.stats().evictions, 1);

    let events = log.lock().unwrap();
    assert_eq!(events.len(), 1);
    let (evicted, cause) = &events[0];
    assert!(evicted == "B" || evicted == "C");
    assert_eq!(*cause, RemovalCause::Size);
}

#[test]
fn weighted_replacement_adjusts_the_total() {
    // Capacity 10, weight = collection length.
    let cache: cortado::Cache<String, Vec<i32>> = CacheBuilder::new(10)
        .weigher(|_k: &String, v: &Vec<i32>| v.len() as u64)
        .build();

    cache.put("a".to_string(), vec![1, 2, 3]);
    cache.put("b".to_string(), vec![1]);
    cache.put("a".to_string(), vec![-1, -2, -3, -4]);
    cache.clean_up();

    assert_eq!(cache.weighted_size(), 5);
    assert_eq!(cache.entry_count(), 2);
}

#[test]
fn zero_capacity_keeps_only_weightless_entries() {
    let log: Arc<Mutex<Vec<(String, RemovalCause)>>> = Arc::new(Mutex::new(Vec::new()));
    let log2 = Arc::clone(&log);

    let cache: cortado::Cache<String, u64> = CacheBuilder::new(0)
        .weigher(|k: &String, _v: &u64| if k == "pinned" { 0 } else { 1 })
        .removal_listener(move |k: &String, _v, cause| {
            log2.lock().unwrap().push((k.clone(), cause));
        })
        .build();

    cache.put("pinned".to_string(), 1);
    cache.put("heavy".to_string(), 2);
    cache.clean_up();

    assert!(
        cache.contains_key(&"pinned".to_string()),
        "a zero-weight entry is never evicted for size"
    );
    assert!(!cache.contains_key(&"heavy".to_string()));
    let events = log.lock().unwrap();
    assert_eq!(events.as_slice(), &[("heavy".to_string(), RemovalCause::Size)]);
}

// ---------------------------------------------------------------------------
// Policy view
// ---------------------------------------------------------------------------

#[test]
fn coldest_and_hottest_are_mirrored_orderings() {
    let cache: cortado::Cache<u64, u64> = CacheBuilder::new(100).build();
    cache.put(1, 1);
    cache.put(2, 2);
    cache.put(3, 3);
    cache.get_if_present(&1); // promote 1 out of probation

    let coldest: Vec<u64> = cache.policy().coldest(10).into_iter().map(|(k, _)| k).collect();
    let hottest: Vec<u64> = cache.policy().hottest(10).into_iter().map(|(k, _)| k).collect();

    assert_eq!(coldest, vec![2, 1, 3]);
    let mut reversed = coldest.clone();
    reversed.reverse();
    assert_eq!(hottest, reversed);
}

#[test]
fn coldest_returns_at_most_n() {
    let cache: cortado::Cache<u64, u64> = CacheBuilder::new(100).build();
    for i in 0..20 {
        cache.put(i, i);
    }
    assert_eq!(cache.policy().coldest(5).len(), 5);
    assert_eq!(cache.policy().hottest(50).len(), 20);
}

#[test]
fn set_maximum_shrinks_and_grows() {
    let log: Arc<Mutex<Vec<RemovalCause>>> = Arc::new(Mutex::new(Vec::new()));
    let log2 = Arc::clone(&log);

    let cache: cortado::Cache<u64, u64> = CacheBuilder::new(100)
        .removal_listener(move |_k: &u64, _v, cause| log2.lock().unwrap().push(cause))
        .build();

    for i in 0..50 {
        cache.put(i, i);
    }
    cache.clean_up();
    assert_eq!(cache.policy().maximum(), 100);

    cache.policy().set_maximum(10);
    assert_eq!(cache.policy().maximum(), 10);
    assert!(cache.weighted_size() <= 10);
    assert!(cache.entry_count() <= 10);
    assert!(log.lock().unwrap().iter().all(|c| *c == RemovalCause::Size));
    assert_eq!(log.lock().unwrap().len(), 40);

    // Growing re-opens admission.
    cache.policy().set_maximum(1_000);
    for i in 100..200 {
        cache.put(i, i);
    }
    cache.clean_up();
    assert!(cache.entry_count() > 10);
    assert!(cache.weighted_size() <= 1_000);
}

// ---------------------------------------------------------------------------
// Write-through
// ---------------------------------------------------------------------------

#[test]
fn a_rejected_write_aborts_the_put() {
    let cache: cortado::Cache<String, String> = CacheBuilder::new(10)
        .cache_writer(FnWriter {
            write: |_k: &String, _v: &String| Err(CommitError::message("sink down")),
            delete: |_k: &String| Ok(()),
        })
        .build();

    assert!(cache.try_put("k".to_string(), "v".to_string()).is_err());
    assert_eq!(cache.entry_count(), 0, "a failed put must leave the cache unchanged");
}

#[test]
fn a_rejected_delete_aborts_the_invalidate() {
    let cache: cortado::Cache<String, String> = CacheBuilder::new(10)
        .cache_writer(FnWriter {
            write: |_k: &String, _v: &String| Ok(()),
            delete: |_k: &String| Err(CommitError::message("sink down")),
        })
        .build();

    cache.put("k".to_string(), "v".to_string());
    assert!(cache.try_invalidate(&"k".to_string()).is_err());
    assert!(
        cache.contains_key(&"k".to_string()),
        "a failed delete must keep the entry"
    );
}

#[test]
fn accepted_writes_reach_the_sink_in_order() {
    let journal: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let j1 = Arc::clone(&journal);
    let j2 = Arc::clone(&journal);

    let cache: cortado::Cache<String, String> = CacheBuilder::new(10)
        .cache_writer(FnWriter {
            write: move |k: &String, v: &String| {
                j1.lock().unwrap().push(format!("write {k}={v}"));
                Ok(())
            },
            delete: move |k: &String| {
                j2.lock().unwrap().push(format!("delete {k}"));
                Ok(())
            },
        })
        .build();

    cache.put("k".to_string(), "v1".to_string());
    cache.put("k".to_string(), "v2".to_string());
    cache.invalidate(&"k".to_string());

    assert_eq!(
        journal.lock().unwrap().as_slice(),
        &[
            "write k=v1".to_string(),
            "write k=v2".to_string(),
            "delete k".to_string()
        ]
    );
}

// ---------------------------------------------------------------------------
// Notification totality
// ---------------------------------------------------------------------------

#[test]
fn exactly_one_notification_per_departed_key() {
    let counts: Arc<Mutex<HashMap<u64, usize>>> = Arc::new(Mutex::new(HashMap::new()));
    let counts2 = Arc::clone(&counts);

    let cache: cortado::Cache<u64, u64> = CacheBuilder::new(5)
        .record_stats()
        .removal_listener(move |k: &u64, _v, _cause| {
            *counts2.lock().unwrap().entry(*k).or_insert(0) += 1;
        })
        .build();

    for i in 0..20 {
        cache.put(i, i);
    }
    cache.clean_up();

    let counts = counts.lock().unwrap();
    assert!(
        counts.values().all(|&n| n == 1),
        "no key may be notified twice: {counts:?}"
    );
    let departed = counts.len();
    assert_eq!(
        departed + cache.entry_count(),
        20,
        "every key is either present or notified exactly once"
    );
    assert_eq!(cache.stats().evictions as usize, departed);
}

// ---------------------------------------------------------------------------
// Randomized capacity invariant
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn random_op_sequences_respect_capacity(
        ops in proptest::collection::vec((0u8..4, 0u64..32), 1..300)
    ) {
        let cache: cortado::Cache<u64, u64> = CacheBuilder::new(8).build();
        for (op, key) in ops {
            match op {
                0 | 1 => {
                    cache.put(key, key);
                }
                2 => {
                    let _ = cache.get_if_present(&key);
                }
                _ => {
                    cache.invalidate(&key);
                }
            }
        }
        cache.clean_up();
        prop_assert!(cache.weighted_size() <= 8);
        prop_assert!(cache.entry_count() as u64 <= 8);
    }
}
