use std::hash::Hash;

use ahash::{AHashMap, RandomState};

use super::sketch::{Doorkeeper, FrequencySketch};
use super::{Policy, Victim};
use crate::error::InvariantError;

// ---------------------------------------------------------------------------
// Sentinel layout
//
// The first six arena slots are permanent HEAD/TAIL sentinels, one pair per
// queue. Real entries start at slot 6. A queue's head side is its LRU end:
// entries enter at the tail and eviction scans start at `head.next`.
// ---------------------------------------------------------------------------
const WINDOW_HEAD: usize = 0;
const WINDOW_TAIL: usize = 1;
const PROBATION_HEAD: usize = 2;
const PROBATION_TAIL: usize = 3;
const PROTECTED_HEAD: usize = 4;
const PROTECTED_TAIL: usize = 5;
const SENTINELS: usize = 6;
const NIL: usize = usize::MAX;

/// Candidates whose estimated frequency is at or below this floor lose the
/// admission contest outright, regardless of the victim's frequency. Keeps
/// one-hit wonders from churning the main region.
const ADMIT_FREQUENCY_FLOOR: u8 = 5;

/// Odd mixing constant for the admission tie-break coin.
const COIN_MIX: u64 = 0x9E37_79B9_7F4A_7C15;

/// Which queue an entry currently belongs to.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Region {
    Window,
    Probation,
    Protected,
}

/// A node in the entry arena. The three queues thread through `prev`/`next`
/// by arena index, so one allocation serves every list membership.
struct Node<K> {
    /// `None` only for sentinel slots and recycled nodes.
    key: Option<K>,
    /// Precomputed key hash, kept so admission contests and read-buffer
    /// reorders never rehash.
    key_hash: u64,
    weight: u64,
    /// Identity stamp of the store incarnation this node tracks.
    stamp: u64,
    prev: usize,
    next: usize,
    region: Region,
}

// ---------------------------------------------------------------------------
// W-TinyLFU policy
// ---------------------------------------------------------------------------

/// The W-TinyLFU replacement policy: a small recency window in front of a
/// frequency-filtered main region.
///
/// Capacity is split into three segments:
///
/// | Segment       | Target share          | Role |
/// |---------------|-----------------------|------|
/// | **Window**    | ⌈1 %⌉ of capacity     | absorbs bursts of new keys |
/// | **Probation** | main − protected      | cold half of main; victims come from its LRU end |
/// | **Protected** | ⌈80 %⌉ of main        | entries that proved reuse |
///
/// New entries always enter the window. Window overflow spills the LRU
/// entry into probation, where it must win an admission contest against
/// probation's LRU victim whenever main is over budget: higher estimated
/// frequency wins, a candidate at or below the frequency floor loses, and
/// an exact standoff is settled by a hash-derived coin flip. A probation
/// hit promotes to protected; protected overflow demotes back to
/// probation's tail.
pub(crate) struct WTinyLfuPolicy<K> {
    sketch: FrequencySketch,
    doorkeeper: Doorkeeper,
    /// Hasher shared with the cache layer so read-buffer hashes and policy
    /// hashes agree.
    build_hasher: RandomState,

    /// Arena of sentinels plus entries, linked by index.
    nodes: Vec<Node<K>>,
    /// key → arena slot.
    index: AHashMap<K, usize>,
    /// key hash → arena slot, for read-buffer replays. On the vanishingly
    /// rare 64-bit collision the newer entry wins; a misapplied recency
    /// hint is harmless.
    by_hash: AHashMap<u64, usize>,
    /// Recycled arena slots.
    free: Vec<usize>,

    window_weight: u64,
    probation_weight: u64,
    protected_weight: u64,

    max_total: u64,
    max_window: u64,
    max_protected: u64,
}

/// Region weight targets for a total budget: window = ⌈1 %⌉ (min 1),
/// protected = ⌈80 %⌉ of the remainder. A zero budget zeroes both, so any
/// positive-weight entry is immediately over the line.
fn region_targets(max_total: u64) -> (u64, u64) {
    if max_total == 0 {
        return (0, 0);
    }
    let window = max_total.div_ceil(100).max(1);
    let main = max_total - window;
    let protected = (main * 4).div_ceil(5);
    (window, protected)
}

/// Sizes the frequency structures from the weight budget, capped so a huge
/// maximum costs accuracy rather than gigabytes of counter table.
fn sketch_capacity(max_total: u64) -> usize {
    max_total.min(1 << 24) as usize
}

impl<K: Hash + Eq + Clone + Send> WTinyLfuPolicy<K> {
    /// Creates a policy bounded by `max_total` with a fresh random hasher.
    #[cfg(test)]
    pub(crate) fn new(max_total: u64) -> Self {
        Self::with_hasher(max_total, RandomState::new())
    }

    /// Creates a policy with a caller-supplied hasher, so the cache layer
    /// can hash keys for the read buffer without holding the policy lock.
    pub(crate) fn with_hasher(max_total: u64, build_hasher: RandomState) -> Self {
        let (max_window, max_protected) = region_targets(max_total);
        let counters = sketch_capacity(max_total);

        let mut nodes: Vec<Node<K>> = Vec::with_capacity(SENTINELS);
        for region in [
            Region::Window,
            Region::Window,
            Region::Probation,
            Region::Probation,
            Region::Protected,
            Region::Protected,
        ] {
            nodes.push(Node {
                key: None,
                key_hash: 0,
                weight: 0,
                stamp: 0,
                prev: NIL,
                next: NIL,
                region,
            });
        }
        for (head, tail) in [
            (WINDOW_HEAD, WINDOW_TAIL),
            (PROBATION_HEAD, PROBATION_TAIL),
            (PROTECTED_HEAD, PROTECTED_TAIL),
        ] {
            nodes[head].next = tail;
            nodes[tail].prev = head;
        }

        WTinyLfuPolicy {
            sketch: FrequencySketch::new(counters),
            doorkeeper: Doorkeeper::new(counters),
            build_hasher,
            nodes,
            index: AHashMap::new(),
            by_hash: AHashMap::new(),
            free: Vec::new(),
            window_weight: 0,
            probation_weight: 0,
            protected_weight: 0,
            max_total,
            max_window,
            max_protected,
        }
    }

    #[inline]
    fn hash_key(&self, key: &K) -> u64 {
        self.build_hasher.hash_one(key)
    }

    #[inline]
    fn total_weight(&self) -> u64 {
        self.window_weight + self.probation_weight + self.protected_weight
    }

    // -----------------------------------------------------------------------
    // Linked-list plumbing (arena indices; only valid under the policy lock)
    // -----------------------------------------------------------------------

    /// Appends `idx` at the MRU end of the queue ending in sentinel `tail`.
    #[inline]
    fn append_tail(&mut self, tail: usize, idx: usize) {
        let last = self.nodes[tail].prev;
        self.nodes[idx].prev = last;
        self.nodes[idx].next = tail;
        self.nodes[last].next = idx;
        self.nodes[tail].prev = idx;
    }

    /// Detaches `idx` from its queue.
    #[inline]
    fn unlink(&mut self, idx: usize) {
        let (prev, next) = (self.nodes[idx].prev, self.nodes[idx].next);
        self.nodes[prev].next = next;
        self.nodes[next].prev = prev;
        self.nodes[idx].prev = NIL;
        self.nodes[idx].next = NIL;
    }

    /// Moves `idx` to the MRU end of the queue it is already in.
    #[inline]
    fn move_to_tail(&mut self, tail: usize, idx: usize) {
        self.unlink(idx);
        self.append_tail(tail, idx);
    }

    fn region_weight_mut(&mut self, region: Region) -> &mut u64 {
        match region {
            Region::Window => &mut self.window_weight,
            Region::Probation => &mut self.probation_weight,
            Region::Protected => &mut self.protected_weight,
        }
    }

    // -----------------------------------------------------------------------
    // Node lifecycle
    // -----------------------------------------------------------------------

    fn alloc(&mut self, key: K, key_hash: u64, weight: u64, stamp: u64) -> usize {
        let node = Node {
            key: Some(key),
            key_hash,
            weight,
            stamp,
            prev: NIL,
            next: NIL,
            region: Region::Window,
        };
        if let Some(idx) = self.free.pop() {
            self.nodes[idx] = node;
            idx
        } else {
            self.nodes.push(node);
            self.nodes.len() - 1
        }
    }

    /// Removes an **already unlinked** node from the maps and recycles its
    /// slot, producing the eviction record.
    fn retire(&mut self, idx: usize) -> Option<Victim<K>> {
        let key = self.nodes[idx].key.take()?;
        let weight = self.nodes[idx].weight;
        let stamp = self.nodes[idx].stamp;
        self.index.remove(&key);
        if self.by_hash.get(&self.nodes[idx].key_hash) == Some(&idx) {
            self.by_hash.remove(&self.nodes[idx].key_hash);
        }
        self.free.push(idx);
        Some(Victim { key, weight, stamp })
    }

    /// Unlinks a still-queued node, fixes its region weight, and retires it.
    fn seize(&mut self, idx: usize) -> Option<Victim<K>> {
        let w = self.nodes[idx].weight;
        *self.region_weight_mut(self.nodes[idx].region) -= w;
        self.unlink(idx);
        self.retire(idx)
    }

    // -----------------------------------------------------------------------
    // Frequency bookkeeping
    // -----------------------------------------------------------------------

    /// Feeds one sighting of `h` through the doorkeeper into the sketch.
    #[inline]
    fn note_frequency(&mut self, h: u64) {
        if self.doorkeeper.insert(h) && self.sketch.increment(h) {
            // The sketch aged; stale "seen before" bits must not keep
            // gating increments against halved counters.
            self.doorkeeper.clear();
        }
    }

    #[inline]
    fn frequency_of(&self, idx: usize) -> u8 {
        self.sketch.frequency(self.nodes[idx].key_hash)
    }

    /// The admission contest. `true` admits the candidate (evicting the
    /// victim); `false` rejects the candidate.
    fn admit(&self, candidate: usize, victim: usize) -> bool {
        let candidate_freq = self.frequency_of(candidate);
        let victim_freq = self.frequency_of(victim);
        if candidate_freq > victim_freq {
            return true;
        }
        if candidate_freq <= ADMIT_FREQUENCY_FLOOR {
            return false;
        }
        // Standoff between two warm keys: a coin derived from both hashes.
        // Deterministic within this process (the hasher is fixed at
        // construction), not across runs.
        let coin = self.nodes[candidate]
            .key_hash
            .wrapping_mul(COIN_MIX)
            .wrapping_add(self.nodes[victim].key_hash);
        (coin >> 63) == 0
    }

    // -----------------------------------------------------------------------
    // Promotion / demotion
    // -----------------------------------------------------------------------

    /// Moves a probation entry to protected, demoting protected's LRU
    /// entries back to probation while protected is over target.
    fn promote(&mut self, idx: usize) {
        debug_assert_eq!(self.nodes[idx].region, Region::Probation);
        let w = self.nodes[idx].weight;
        self.unlink(idx);
        self.probation_weight -= w;
        self.nodes[idx].region = Region::Protected;
        self.append_tail(PROTECTED_TAIL, idx);
        self.protected_weight += w;
        self.demote_protected_overflow();
    }

    fn demote_protected_overflow(&mut self) {
        while self.protected_weight > self.max_protected {
            let lru = self.nodes[PROTECTED_HEAD].next;
            if lru == PROTECTED_TAIL {
                break;
            }
            let w = self.nodes[lru].weight;
            self.unlink(lru);
            self.protected_weight -= w;
            self.nodes[lru].region = Region::Probation;
            self.append_tail(PROBATION_TAIL, lru);
            self.probation_weight += w;
        }
    }

    /// Refreshes recency for the node at `idx` after a read hit.
    fn touch(&mut self, idx: usize) {
        match self.nodes[idx].region {
            Region::Window => self.move_to_tail(WINDOW_TAIL, idx),
            Region::Probation => self.promote(idx),
            Region::Protected => self.move_to_tail(PROTECTED_TAIL, idx),
        }
    }

    // -----------------------------------------------------------------------
    // Eviction
    // -----------------------------------------------------------------------

    /// Restores all capacity bounds after an insert or update. Returns the
    /// entries that must be removed from the store.
    fn evict(&mut self) -> Vec<Victim<K>> {
        let mut victims = Vec::new();
        let spilled = self.spill_window();
        self.shrink_main(&spilled, &mut victims);
        victims
    }

    /// Moves window-overflow entries to probation's tail, oldest first,
    /// and returns the arena slots it moved. Only these just-spilled
    /// entries are admission candidates this cycle; anything already
    /// resident in probation is not.
    fn spill_window(&mut self) -> Vec<usize> {
        let mut spilled = Vec::new();
        while self.window_weight > self.max_window {
            let lru = self.nodes[WINDOW_HEAD].next;
            if lru == WINDOW_TAIL {
                break;
            }
            let w = self.nodes[lru].weight;
            self.unlink(lru);
            self.window_weight -= w;
            self.nodes[lru].region = Region::Probation;
            self.append_tail(PROBATION_TAIL, lru);
            self.probation_weight += w;
            spilled.push(lru);
        }
        spilled
    }

    /// Evicts until the total weight fits the budget.
    ///
    /// Admission contests only involve entries `spill_window` just moved:
    /// each contests the victim at probation's LRU end. With no fresh
    /// candidate the overflow is resolved by straight LRU eviction from
    /// probation's head, no admission test. Once probation has nothing
    /// evictable left, protected's LRU pays before the window's.
    /// Zero-weight entries cannot reduce the total and are skipped.
    fn shrink_main(&mut self, spilled: &[usize], victims: &mut Vec<Victim<K>>) {
        // Most recent spill first, the same order a tail-backward walk
        // would meet them.
        let mut pool = spilled.iter().rev().copied();
        let mut candidate = pool.next();

        while self.total_weight() > self.max_total {
            // Drop candidates that were already seized as victims or that
            // carry no weight.
            while let Some(idx) = candidate {
                let node = &self.nodes[idx];
                if node.key.is_some() && node.region == Region::Probation && node.weight > 0 {
                    break;
                }
                candidate = pool.next();
            }

            let mut victim = self.nodes[PROBATION_HEAD].next;
            while victim != PROBATION_TAIL && self.nodes[victim].weight == 0 {
                victim = self.nodes[victim].next;
            }

            if victim == PROBATION_TAIL {
                // Probation has nothing evictable. A protected resident
                // holds the staler claim than a just-admitted window
                // entry, so protected's LRU pays first.
                if let Some(v) = self.seize_lru(PROTECTED_HEAD, PROTECTED_TAIL) {
                    victims.push(v);
                    continue;
                }
                if let Some(v) = self.seize_lru(WINDOW_HEAD, WINDOW_TAIL) {
                    victims.push(v);
                    continue;
                }
                break; // only zero-weight entries remain
            }

            match candidate {
                Some(cand) if cand != victim => {
                    if self.admit(cand, victim) {
                        if let Some(v) = self.seize(victim) {
                            victims.push(v);
                        }
                    } else if let Some(v) = self.seize(cand) {
                        victims.push(v);
                    }
                    candidate = pool.next();
                }
                _ => {
                    // No just-spilled candidate left (or it is itself the
                    // LRU entry): straight LRU eviction.
                    let was_candidate = candidate == Some(victim);
                    if let Some(v) = self.seize(victim) {
                        victims.push(v);
                    }
                    if was_candidate {
                        candidate = pool.next();
                    }
                }
            }
        }
    }

    /// Seizes the first positive-weight entry from a queue's LRU end.
    fn seize_lru(&mut self, head: usize, tail: usize) -> Option<Victim<K>> {
        let mut idx = self.nodes[head].next;
        while idx != tail {
            if self.nodes[idx].weight > 0 {
                return self.seize(idx);
            }
            idx = self.nodes[idx].next;
        }
        None
    }

    // -----------------------------------------------------------------------
    // Snapshots
    // -----------------------------------------------------------------------

    fn collect_forward(&self, head: usize, tail: usize, out: &mut Vec<K>, n: usize) {
        let mut idx = self.nodes[head].next;
        while idx != tail && out.len() < n {
            if let Some(key) = &self.nodes[idx].key {
                out.push(key.clone());
            }
            idx = self.nodes[idx].next;
        }
    }

    fn collect_backward(&self, tail: usize, head: usize, out: &mut Vec<K>, n: usize) {
        let mut idx = self.nodes[tail].prev;
        while idx != head && out.len() < n {
            if let Some(key) = &self.nodes[idx].key {
                out.push(key.clone());
            }
            idx = self.nodes[idx].prev;
        }
    }
}

// ---------------------------------------------------------------------------
// Policy trait implementation
// ---------------------------------------------------------------------------

impl<K: Hash + Eq + Clone + Send> Policy<K> for WTinyLfuPolicy<K> {
    fn on_access(&mut self, key: &K) {
        let h = self.hash_key(key);
        self.note_frequency(h);
        if let Some(&idx) = self.index.get(key) {
            self.touch(idx);
        }
    }

    fn on_access_hash(&mut self, h: u64) {
        self.note_frequency(h);
        if let Some(&idx) = self.by_hash.get(&h) {
            self.touch(idx);
        }
    }

    fn on_insert(&mut self, key: K, weight: u64, stamp: u64) -> Vec<Victim<K>> {
        let h = self.hash_key(&key);

        if let Some(&idx) = self.index.get(&key) {
            // Value replacement: adopt the new weight and stamp, refresh
            // recency within the current region.
            let old_weight = self.nodes[idx].weight;
            self.nodes[idx].weight = weight;
            self.nodes[idx].stamp = stamp;
            let region = self.nodes[idx].region;
            *self.region_weight_mut(region) += weight;
            *self.region_weight_mut(region) -= old_weight;
            let tail = match region {
                Region::Window => WINDOW_TAIL,
                Region::Probation => PROBATION_TAIL,
                Region::Protected => PROTECTED_TAIL,
            };
            self.move_to_tail(tail, idx);
            return self.evict();
        }

        let idx = self.alloc(key.clone(), h, weight, stamp);
        self.index.insert(key, idx);
        self.by_hash.insert(h, idx);
        self.append_tail(WINDOW_TAIL, idx);
        self.window_weight += weight;
        self.evict()
    }

    fn on_update(&mut self, key: &K, new_weight: u64, stamp: u64) -> Vec<Victim<K>> {
        // A missing node means an eviction decision raced with the rewrite
        // and lost its conditional store removal; re-admitting here keeps
        // the store and the policy in agreement.
        self.on_insert(key.clone(), new_weight, stamp)
    }

    fn on_remove(&mut self, key: &K) {
        if let Some(&idx) = self.index.get(key) {
            self.seize(idx);
        }
    }

    fn contains(&self, key: &K) -> bool {
        self.index.contains_key(key)
    }

    fn current_weight(&self) -> u64 {
        self.total_weight()
    }

    fn max_weight(&self) -> u64 {
        self.max_total
    }

    fn set_max_weight(&mut self, max: u64) -> Vec<Victim<K>> {
        let grew = max > self.max_total;
        self.max_total = max;
        let (window, protected) = region_targets(max);
        self.max_window = window;
        self.max_protected = protected;
        if grew {
            // Resize the frequency structures for the larger key universe.
            // Estimates restart cold, which only delays admission briefly.
            let counters = sketch_capacity(max);
            self.sketch = FrequencySketch::new(counters);
            self.doorkeeper = Doorkeeper::new(counters);
        }
        self.demote_protected_overflow();
        self.evict()
    }

    fn coldest(&self, n: usize) -> Vec<K> {
        let mut out = Vec::with_capacity(n.min(self.index.len()));
        self.collect_forward(PROBATION_HEAD, PROBATION_TAIL, &mut out, n);
        self.collect_forward(PROTECTED_HEAD, PROTECTED_TAIL, &mut out, n);
        self.collect_forward(WINDOW_HEAD, WINDOW_TAIL, &mut out, n);
        out
    }

    fn hottest(&self, n: usize) -> Vec<K> {
        let mut out = Vec::with_capacity(n.min(self.index.len()));
        self.collect_backward(WINDOW_TAIL, WINDOW_HEAD, &mut out, n);
        self.collect_backward(PROTECTED_TAIL, PROTECTED_HEAD, &mut out, n);
        self.collect_backward(PROBATION_TAIL, PROBATION_HEAD, &mut out, n);
        out
    }

    fn check_invariants(&self) -> Result<(), InvariantError> {
        let mut seen = 0usize;
        for (head, tail, expect_region, expect_weight) in [
            (WINDOW_HEAD, WINDOW_TAIL, Region::Window, self.window_weight),
            (
                PROBATION_HEAD,
                PROBATION_TAIL,
                Region::Probation,
                self.probation_weight,
            ),
            (
                PROTECTED_HEAD,
                PROTECTED_TAIL,
                Region::Protected,
                self.protected_weight,
            ),
        ] {
            let mut sum = 0u64;
            let mut idx = self.nodes[head].next;
            while idx != tail {
                let node = &self.nodes[idx];
                if node.key.is_none() {
                    return Err(InvariantError::new("sentinel or dead node in a queue"));
                }
                if node.region != expect_region {
                    return Err(InvariantError::new(format!(
                        "node tagged {:?} linked into the {:?} queue",
                        node.region, expect_region
                    )));
                }
                sum += node.weight;
                seen += 1;
                idx = node.next;
            }
            if sum != expect_weight {
                return Err(InvariantError::new(format!(
                    "{:?} weight counter {} != linked sum {}",
                    expect_region, expect_weight, sum
                )));
            }
        }
        if seen != self.index.len() {
            return Err(InvariantError::new(format!(
                "{} linked nodes but {} indexed keys",
                seen,
                self.index.len()
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
