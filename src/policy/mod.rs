#[cfg(test)]
pub(crate) mod lru;
pub(crate) mod sketch;
pub(crate) mod tinylfu;

use std::hash::Hash;

use crate::error::InvariantError;

/// An entry the policy decided to evict.
///
/// Carries the weight that was released and the identity stamp of the
/// incarnation the decision was made against, so the store removal can be
/// conditional and a concurrent re-insert survives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Victim<K> {
    pub(crate) key: K,
    pub(crate) weight: u64,
    pub(crate) stamp: u64,
}

/// Core eviction/admission strategy.
///
/// All methods are called single-threadedly by the maintenance path, which
/// wraps the policy in a `Mutex`; implementors only need `Send`.
pub(crate) trait Policy<K: Hash + Eq>: Send {
    /// A read hit on `key`: refresh frequency and recency.
    fn on_access(&mut self, key: &K);

    /// A read hit reported by hash only (the read buffer records hashes,
    /// not keys). Unknown hashes still feed the frequency sketch.
    fn on_access_hash(&mut self, h: u64);

    /// A new entry was inserted (or an existing one replaced). Returns the
    /// entries that must be removed from the store to stay within
    /// capacity.
    fn on_insert(&mut self, key: K, weight: u64, stamp: u64) -> Vec<Victim<K>>;

    /// An existing entry's value changed, possibly with a new weight.
    /// Returns eviction victims as for `on_insert`.
    fn on_update(&mut self, key: &K, new_weight: u64, stamp: u64) -> Vec<Victim<K>>;

    /// The entry left the store (explicit removal, expiration, collection).
    fn on_remove(&mut self, key: &K);

    /// `true` while the policy tracks `key`.
    fn contains(&self, key: &K) -> bool;

    /// Total tracked weight.
    fn current_weight(&self) -> u64;

    /// Maximum total weight.
    fn max_weight(&self) -> u64;

    /// Re-bounds the policy. Returns the victims evicted to fit the new
    /// maximum.
    fn set_max_weight(&mut self, max: u64) -> Vec<Victim<K>>;

    /// Up to `n` keys in eviction order, likeliest victim first.
    fn coldest(&self, n: usize) -> Vec<K>;

    /// Up to `n` keys in retention order, most protected first.
    fn hottest(&self, n: usize) -> Vec<K>;

    /// Verifies internal bookkeeping (list membership, weight sums).
    fn check_invariants(&self) -> Result<(), InvariantError>;
}
