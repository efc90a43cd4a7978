//! Hit-rate comparison on a scan-polluted workload.
//!
//! Every round reads a skewed hot set, then sweeps a burst of keys that
//! never repeat — the pattern frequency-based admission exists for. A
//! recency-only policy forgets the hot set on every sweep; an admission
//! filter should hold it. The same trace is replayed online (a miss
//! inserts the key) against this crate, Moka, and QuickCache, and this
//! crate's result is cross-checked against its own statistics counters.
//!
//! Run with:
//!     cargo run --example hit_rate --release

use std::time::{Duration, Instant};

use cortado::CacheBuilder;
use moka::sync::Cache as Moka;
use quick_cache::sync::Cache as QuickCache;

/// Bound of every cache under test.
const CAPACITY: usize = 4 * 1024;
/// Popular keys; comfortably fits the caches.
const HOT_KEYS: u64 = 1_024;
/// Scan keys are drawn from here and never deliberately repeat.
const SCAN_SPACE: u64 = 1 << 20;
/// Trace shape: per round, a burst of hot reads then a scan sweep.
const ROUNDS: usize = 400;
const HOT_PER_ROUND: usize = 1_024;
const SCANS_PER_ROUND: usize = 512;

/// SplitMix64 — tiny, seedable, plenty for shaping a workload.
fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Builds the trace. Hot ranks are sampled with a quadratic skew (rank ∝
/// u², so low ranks dominate); scan keys walk a cursor through a space
/// far larger than the caches.
fn build_trace(seed: u64) -> Vec<u64> {
    let mut state = seed;
    let mut trace = Vec::with_capacity(ROUNDS * (HOT_PER_ROUND + SCANS_PER_ROUND));
    let mut scan_cursor = 0u64;
    for _ in 0..ROUNDS {
        for _ in 0..HOT_PER_ROUND {
            let u = (splitmix64(&mut state) >> 40) as f64 / (1u64 << 24) as f64;
            let rank = (u * u * HOT_KEYS as f64) as u64;
            trace.push(rank.min(HOT_KEYS - 1));
        }
        for _ in 0..SCANS_PER_ROUND {
            scan_cursor += 1;
            trace.push(HOT_KEYS + (scan_cursor % SCAN_SPACE));
        }
    }
    trace
}

/// Replays the trace in online mode: each miss inserts the key.
fn replay(
    trace: &[u64],
    get: impl Fn(&u64) -> bool,
    put: impl Fn(u64),
) -> (usize, Duration) {
    let start = Instant::now();
    let mut hits = 0usize;
    for &key in trace {
        if get(&key) {
            hits += 1;
        } else {
            put(key);
        }
    }
    (hits, start.elapsed())
}

fn report(name: &str, hits: usize, total: usize, elapsed: Duration) {
    println!(
        "{:<12} {:>10} {:>9.2}% {:>8} ms",
        name,
        hits,
        hits as f64 / total as f64 * 100.0,
        elapsed.as_millis()
    );
}

fn main() {
    let trace = build_trace(0x5EED_CAFE);
    let total = trace.len();

    println!(
        "capacity {CAPACITY}, {total} accesses: {HOT_KEYS} hot keys + {} scan bursts of {SCANS_PER_ROUND}",
        ROUNDS
    );
    println!();
    println!("{:<12} {:>10} {:>10} {:>11}", "cache", "hits", "hit rate", "time");

    let cortado: cortado::Cache<u64, u64> =
        CacheBuilder::new(CAPACITY as u64).record_stats().build();
    let (hits, elapsed) = replay(
        &trace,
        |k| cortado.get_if_present(k).is_some(),
        |k| {
            cortado.put(k, k);
        },
    );
    report("cortado", hits, total, elapsed);

    let moka: Moka<u64, u64> = Moka::new(CAPACITY as u64);
    let (hits, elapsed) = replay(&trace, |k| moka.get(k).is_some(), |k| moka.insert(k, k));
    report("moka", hits, total, elapsed);

    let qc: QuickCache<u64, u64> = QuickCache::new(CAPACITY);
    let (hits, elapsed) = replay(&trace, |k| qc.get(k).is_some(), |k| qc.insert(k, k));
    report("quick_cache", hits, total, elapsed);

    // The replay counted hits by hand; the cache counted them itself.
    let stats = cortado.stats();
    println!();
    println!(
        "cortado's own counters: {:.2}% over {} requests, {} evictions",
        stats.hit_rate() * 100.0,
        stats.request_count(),
        stats.evictions
    );
}
