//! Hierarchical timer wheel for expiration scheduling.
//!
//! Five levels of geometrically coarser buckets cover deadlines from about
//! a second out to "months away, don't care yet":
//!
//! | Level | Buckets | Bucket span        |
//! |-------|---------|--------------------|
//! | 0     | 64      | 2^30 ns ≈ 1.07 s   |
//! | 1     | 64      | 2^36 ns ≈ 68.7 s   |
//! | 2     | 32      | 2^42 ns ≈ 73.1 min |
//! | 3     | 4       | 2^48 ns ≈ 3.27 d   |
//! | 4     | 1       | catch-all          |
//!
//! Buckets hold `(key, deadline)` pairs. `schedule` files an entry in the
//! finest level whose range still covers its delay; `advance` walks every
//! bucket whose tick has passed, collecting entries whose deadline is due
//! and cascading the rest down to finer levels.
//!
//! The per-key `deadlines` map is the source of truth. Rescheduling or
//! cancelling just updates the map; the superseded wheel slot is detected
//! and discarded lazily when its bucket is next processed. The wheel never
//! scans for a key, so both operations are O(1).

use std::hash::Hash;

use ahash::AHashMap;

/// Per-level bucket span in nanoseconds (powers of two covering ~1 s,
/// ~1 min, ~1 h, ~1 d). Level 4 is the unbounded catch-all.
const SPANS: [u64; 5] = [1 << 30, 1 << 36, 1 << 42, 1 << 48, (1 << 48) * 4];

/// Per-level bucket counts. Powers of two so tick → bucket is a mask.
const BUCKETS: [usize; 5] = [64, 64, 32, 4, 1];

/// A hierarchical timer wheel over monotonic nanosecond deadlines.
///
/// All times are nanoseconds since the cache's ticker epoch; the caller
/// must feed `schedule` and `advance` from the same clock.
pub(crate) struct TimerWheel<K> {
    /// `levels[level][bucket]` → entries filed for that tick.
    levels: [Vec<Vec<(K, u64)>>; 5],
    /// The wheel's current time: the `now` of the last `advance`.
    nanos: u64,
    /// Canonical deadline per key; stale wheel slots are skipped on drain.
    deadlines: AHashMap<K, u64>,
}

impl<K: Hash + Eq + Clone> TimerWheel<K> {
    /// Creates a wheel anchored at `start_nanos`.
    pub(crate) fn new(start_nanos: u64) -> Self {
        TimerWheel {
            levels: std::array::from_fn(|level| vec![Vec::new(); BUCKETS[level]]),
            nanos: start_nanos,
            deadlines: AHashMap::new(),
        }
    }

    /// Schedules (or reschedules) `key` to expire at `deadline`.
    pub(crate) fn schedule(&mut self, key: K, deadline: u64) {
        self.deadlines.insert(key.clone(), deadline);
        self.file(key, deadline);
    }

    /// Drops the scheduled expiration for `key`, if any.
    pub(crate) fn cancel(&mut self, key: &K) {
        self.deadlines.remove(key);
    }

    /// Advances the wheel to `now` and returns every key whose deadline
    /// has passed. Not-yet-due entries found in processed buckets cascade
    /// to finer levels.
    pub(crate) fn advance(&mut self, now: u64) -> Vec<K> {
        let mut expired = Vec::new();

        for level in 0..5 {
            let span = SPANS[level];
            let previous_tick = self.nanos / span;
            let current_tick = now / span;
            if current_tick <= previous_tick {
                // This level hasn't ticked; coarser levels haven't either.
                break;
            }

            // Walk at most one full revolution, starting at the previous
            // tick's own bucket: a deadline can land in the bucket the
            // wheel is currently sitting in.
            let steps = (current_tick - previous_tick + 1).min(BUCKETS[level] as u64);
            for step in 0..steps {
                let bucket = ((previous_tick + step) as usize) & (BUCKETS[level] - 1);
                let entries = std::mem::take(&mut self.levels[level][bucket]);

                for (key, deadline) in entries {
                    // Only act on slots that still match the canonical
                    // deadline; everything else was rescheduled or
                    // cancelled after being filed here.
                    if self.deadlines.get(&key) != Some(&deadline) {
                        continue;
                    }
                    if deadline <= now {
                        self.deadlines.remove(&key);
                        expired.push(key);
                    } else {
                        self.file(key, deadline);
                    }
                }
            }
        }

        self.nanos = now;
        expired
    }

    /// Number of keys with a pending deadline.
    pub(crate) fn len(&self) -> usize {
        self.deadlines.len()
    }

    /// Files `(key, deadline)` into the finest level that can hold it.
    fn file(&mut self, key: K, deadline: u64) {
        let delay = deadline.saturating_sub(self.nanos);
        for level in 0..4 {
            let range = SPANS[level].saturating_mul(BUCKETS[level] as u64);
            if delay < range {
                let bucket = ((deadline / SPANS[level]) as usize) & (BUCKETS[level] - 1);
                self.levels[level][bucket].push((key, deadline));
                return;
            }
        }
        self.levels[4][0].push((key, deadline));
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
