use cortado::listener::RemovalCause;
use cortado::CacheBuilder;
use std::sync::{Arc, Mutex};

fn make_cache(cap: u64) -> cortado::Cache<String, String> {
    CacheBuilder::new(cap).build()
}

// ---------------------------------------------------------------------------
// Fundamental API correctness
// ---------------------------------------------------------------------------

#[test]
fn get_if_present_returns_none_on_miss() {
    let cache = make_cache(10);
    assert_eq!(cache.get_if_present(&"missing".to_string()), None);
}

#[test]
fn put_and_get() {
    let cache = make_cache(10);
    cache.put("hello".to_string(), "world".to_string());
    assert_eq!(
        cache.get_if_present(&"hello".to_string()),
        Some(Arc::new("world".to_string()))
    );
}

#[test]
fn put_returns_the_shared_handle() {
    let cache = make_cache(10);
    let handle = cache.put("k".to_string(), "v".to_string());
    assert_eq!(*handle, "v");
}

#[test]
fn put_replaces_the_value() {
    let cache = make_cache(10);
    cache.put("k".to_string(), "v1".to_string());
    cache.put("k".to_string(), "v2".to_string());
    assert_eq!(
        cache.get_if_present(&"k".to_string()),
        Some(Arc::new("v2".to_string()))
    );
    assert_eq!(cache.entry_count(), 1, "replace must not create a second entry");
}

#[test]
fn replace_notifies_with_cause_replaced() {
    let log: Arc<Mutex<Vec<(String, RemovalCause)>>> = Arc::new(Mutex::new(Vec::new()));
    let log2 = Arc::clone(&log);
    let cache: cortado::Cache<String, String> = CacheBuilder::new(10)
        .removal_listener(move |key: &String, _val, cause| {
            log2.lock().unwrap().push((key.clone(), cause));
        })
        .build();

    cache.put("k".to_string(), "v1".to_string());
    cache.put("k".to_string(), "v2".to_string());

    let events = log.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0], ("k".to_string(), RemovalCause::Replaced));
}

#[test]
fn invalidate_removes_and_returns_the_entry() {
    let cache = make_cache(10);
    cache.put("key".to_string(), "val".to_string());
    assert_eq!(
        cache.invalidate(&"key".to_string()),
        Some(Arc::new("val".to_string()))
    );
    assert_eq!(cache.get_if_present(&"key".to_string()), None);
    assert_eq!(cache.invalidate(&"key".to_string()), None, "invalidate is idempotent");
}

#[test]
fn invalidate_all_empties_the_cache() {
    let cache = make_cache(100);
    for i in 0..50 {
        cache.put(i.to_string(), i.to_string());
    }
    cache.invalidate_all();
    assert!(cache.is_empty());
    assert_eq!(cache.weighted_size(), 0);
    cache.invalidate_all(); // idempotent
    assert!(cache.is_empty());
}

#[test]
fn contains_key_does_not_touch_recency() {
    let cache = make_cache(10);
    cache.put("k".to_string(), "v".to_string());
    assert!(cache.contains_key(&"k".to_string()));
    assert!(!cache.contains_key(&"other".to_string()));
}

#[test]
fn entries_snapshots_live_mappings() {
    let cache = make_cache(10);
    cache.put("a".to_string(), "1".to_string());
    cache.put("b".to_string(), "2".to_string());
    let mut entries = cache.entries();
    entries.sort_by(|x, y| x.0.cmp(&y.0));
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].0, "a");
    assert_eq!(*entries[0].1, "1");
}

#[test]
fn put_all_inserts_every_pair() {
    let cache = make_cache(10);
    cache.put_all((0..5).map(|i| (i.to_string(), i.to_string())));
    assert_eq!(cache.entry_count(), 5);
}

#[test]
fn stats_track_hits_and_misses() {
    let cache: cortado::Cache<String, String> = CacheBuilder::new(10).record_stats().build();
    cache.put("k".to_string(), "v".to_string());
    cache.get_if_present(&"k".to_string()); // hit
    cache.get_if_present(&"k".to_string()); // hit
    cache.get_if_present(&"nope".to_string()); // miss

    let stats = cache.stats();
    assert_eq!(stats.hits, 2);
    assert_eq!(stats.misses, 1);
    assert!((stats.hit_rate() - 2.0 / 3.0).abs() < 1e-9);
}

#[test]
fn cache_is_clone_and_shared() {
    let c1 = make_cache(10);
    let c2 = c1.clone();
    c1.put("shared".to_string(), "yes".to_string());
    assert!(
        c2.get_if_present(&"shared".to_string()).is_some(),
        "cloned handle must see the same entries"
    );
}

// ---------------------------------------------------------------------------
// Map-style operations
// ---------------------------------------------------------------------------

#[test]
fn put_if_absent_declines_when_present() {
    let cache = make_cache(10);
    assert!(cache.put_if_absent("k".to_string(), "v1".to_string()).is_none());
    let existing = cache.put_if_absent("k".to_string(), "v2".to_string());
    assert_eq!(existing, Some(Arc::new("v1".to_string())));
    assert_eq!(
        cache.get_if_present(&"k".to_string()),
        Some(Arc::new("v1".to_string()))
    );
}

#[test]
fn replace_requires_presence() {
    let cache = make_cache(10);
    assert!(cache.replace(&"k".to_string(), "v".to_string()).is_none());
    assert_eq!(cache.get_if_present(&"k".to_string()), None);

    cache.put("k".to_string(), "v1".to_string());
    let old = cache.replace(&"k".to_string(), "v2".to_string());
    assert_eq!(old, Some(Arc::new("v1".to_string())));
    assert_eq!(
        cache.get_if_present(&"k".to_string()),
        Some(Arc::new("v2".to_string()))
    );
}

#[test]
fn replace_if_checks_the_current_value() {
    let cache = make_cache(10);
    cache.put("k".to_string(), "v1".to_string());
    assert!(!cache.replace_if(&"k".to_string(), &"wrong".to_string(), "v2".to_string()));
    assert!(cache.replace_if(&"k".to_string(), &"v1".to_string(), "v2".to_string()));
    assert_eq!(
        cache.get_if_present(&"k".to_string()),
        Some(Arc::new("v2".to_string()))
    );
}

#[test]
fn invalidate_if_equals_checks_the_current_value() {
    let cache = make_cache(10);
    cache.put("k".to_string(), "v".to_string());
    assert!(!cache.invalidate_if_equals(&"k".to_string(), &"other".to_string()));
    assert!(cache.invalidate_if_equals(&"k".to_string(), &"v".to_string()));
    assert_eq!(cache.get_if_present(&"k".to_string()), None);
}

#[test]
fn compute_inserts_updates_and_removes() {
    let cache: cortado::Cache<String, u64> = CacheBuilder::new(10).build();

    // Absent → insert.
    let v = cache.compute("counter".to_string(), |current| {
        assert!(current.is_none());
        Some(1)
    });
    assert_eq!(v, Some(Arc::new(1)));

    // Present → transform.
    let v = cache.compute("counter".to_string(), |current| {
        current.map(|c| **c + 1)
    });
    assert_eq!(v, Some(Arc::new(2)));

    // Return None → remove.
    let v = cache.compute("counter".to_string(), |_| None);
    assert_eq!(v, None);
    assert_eq!(cache.get_if_present(&"counter".to_string()), None);
}

// ---------------------------------------------------------------------------
// Capacity enforcement
// ---------------------------------------------------------------------------

#[test]
fn capacity_is_respected_under_load() {
    let cap = 50u64;
    let cache = make_cache(cap);
    for i in 0..250u64 {
        cache.put(i.to_string(), i.to_string());
    }
    cache.clean_up();
    assert!(
        cache.entry_count() as u64 <= cap,
        "entry_count {} exceeds capacity {}",
        cache.entry_count(),
        cap
    );
    assert!(cache.weighted_size() <= cap);
}

// ---------------------------------------------------------------------------
// W-TinyLFU admission semantics
// ---------------------------------------------------------------------------

#[test]
fn hot_items_survive_scan_pollution() {
    let cache: cortado::Cache<u64, u64> = CacheBuilder::new(100).build();

    // Warm up 20 hot keys.
    for i in 0..20u64 {
        cache.put(i, i);
    }
    // Build frequency for them.
    for _ in 0..6 {
        for i in 0..20u64 {
            cache.get_if_present(&i);
        }
    }

    // Scan: 400 cold one-hit-wonder insertions.
    for i in 10_000..10_400u64 {
        cache.put(i, i);
    }

    let survivors: usize = (0..20).filter(|i| cache.get_if_present(i).is_some()).count();
    assert!(
        survivors >= 12,
        "only {survivors}/20 hot items survived — the admission filter should do better"
    );
}

#[test]
fn high_frequency_key_survives_eviction_pressure() {
    let cache: cortado::Cache<u64, u64> = CacheBuilder::new(10).build();

    for i in 0..10u64 {
        cache.put(i, i);
    }
    for _ in 0..10 {
        cache.get_if_present(&0u64);
    }
    for i in 100..120u64 {
        cache.put(i, i);
    }

    assert!(
        cache.get_if_present(&0u64).is_some(),
        "key 0 with high frequency should survive"
    );
    cache.clean_up();
    assert!(cache.entry_count() as u64 <= 10);
}

// ---------------------------------------------------------------------------
// Weigher
// ---------------------------------------------------------------------------

#[test]
fn weigher_bounds_total_weight() {
    // Capacity = 100 units. Each value weighs len + 1.
    let cache: cortado::Cache<u64, Vec<u8>> = CacheBuilder::new(100)
        .weigher(|_k: &u64, v: &Vec<u8>| v.len() as u64 + 1)
        .build();

    // 20 items of weight 11 → 220 > 100, so eviction must kick in.
    for i in 0..20u64 {
        cache.put(i, vec![0u8; 10]);
    }
    cache.clean_up();
    assert!(cache.weighted_size() <= 100);
    assert!(
        cache.entry_count() <= 10,
        "too many entries for the weight budget: {}",
        cache.entry_count()
    );
}

// ---------------------------------------------------------------------------
// Weak values
// ---------------------------------------------------------------------------

#[test]
fn weak_values_die_with_their_last_handle() {
    let log: Arc<Mutex<Vec<RemovalCause>>> = Arc::new(Mutex::new(Vec::new()));
    let log2 = Arc::clone(&log);
    let cache: cortado::Cache<u64, String> = CacheBuilder::new(10)
        .weak_values()
        .removal_listener(move |_k: &u64, _v, cause| log2.lock().unwrap().push(cause))
        .build();

    let handle = cache.put(1, "alive".to_string());
    assert!(cache.get_if_present(&1).is_some(), "held value must be retrievable");

    drop(handle);
    // All strong references are gone now; the read observes the corpse.
    assert!(cache.get_if_present(&1).is_none());
    assert!(log.lock().unwrap().contains(&RemovalCause::Collected));
}

#[test]
fn clean_up_sweeps_collected_values() {
    let cache: cortado::Cache<u64, String> =
        CacheBuilder::new(10).weak_values().build();
    let handle = cache.put(1, "v".to_string());
    let keeper = cache.put(2, "kept".to_string());

    drop(handle);
    cache.clean_up();
    assert_eq!(cache.entry_count(), 1, "collected entry should be swept");
    assert!(cache.get_if_present(&2).is_some());
    drop(keeper);
}

// ---------------------------------------------------------------------------
// Concurrency
// ---------------------------------------------------------------------------

#[test]
fn concurrent_put_and_get() {
    let cache: Arc<cortado::Cache<String, String>> =
        Arc::new(CacheBuilder::new(1_000).build());
    let mut handles = Vec::new();

    for t in 0..8 {
        let c = Arc::clone(&cache);
        handles.push(std::thread::spawn(move || {
            for j in 0..200 {
                let key = format!("t{}-k{}", t, j);
                c.put(key.clone(), key.clone());
                let _ = c.get_if_present(&key);
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    cache.clean_up();
    assert!(
        cache.entry_count() <= 1_000,
        "entry_count {} exceeds capacity",
        cache.entry_count()
    );
    assert!(cache.weighted_size() <= 1_000);
}

#[test]
fn concurrent_mixed_workload_respects_invariants() {
    const THREADS: u64 = 8;
    const OPS: u64 = 5_000;
    const KEYS: u64 = 10_000;
    const CAP: u64 = 1_000;

    let cache: Arc<cortado::Cache<u64, u64>> =
        Arc::new(CacheBuilder::new(CAP).record_stats().build());
    let mut handles = Vec::new();

    for t in 0..THREADS {
        let c = Arc::clone(&cache);
        handles.push(std::thread::spawn(move || {
            let mut x = t.wrapping_mul(0x9E37_79B9) + 1;
            for _ in 0..OPS {
                // xorshift-style mixing for a deterministic pseudo-random walk
                x ^= x << 13;
                x ^= x >> 7;
                x ^= x << 17;
                let key = x % KEYS;
                match x % 10 {
                    0..=5 => {
                        let _ = c.get_if_present(&key);
                    }
                    6..=8 => {
                        c.put(key, key);
                    }
                    _ => {
                        c.invalidate(&key);
                    }
                }
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    cache.clean_up();
    assert!(cache.weighted_size() <= CAP);
    assert!(cache.entry_count() as u64 <= CAP);
    let stats = cache.stats();
    assert_eq!(stats.request_count(), stats.hits + stats.misses);
}
