use std::hash::Hash;
use std::sync::Arc;

use ahash::{AHashMap, RandomState};
use parking_lot::RwLock;

use crate::value::ValueHolder;

// ---------------------------------------------------------------------------
// CacheEntry
// ---------------------------------------------------------------------------

/// A single entry in the store.
///
/// `stamp` is the entry's identity: maintenance decisions (eviction,
/// expiration) recorded against one incarnation of a key never remove a
/// newer incarnation, because the removal is conditional on the stamp
/// still matching.
pub(crate) struct CacheEntry<V> {
    pub(crate) value: ValueHolder<V>,
    pub(crate) weight: u64,
    /// Ticker nanos at insertion or replacement.
    pub(crate) written_at: u64,
    /// Identity stamp, unique per write.
    pub(crate) stamp: u64,
    /// Absolute expire-after-access deadline, bumped on every read.
    pub(crate) access_deadline: Option<u64>,
    /// Absolute expire-after-write deadline, set only on write.
    pub(crate) write_deadline: Option<u64>,
}

impl<V> CacheEntry<V> {
    /// The earliest of the two expiration deadlines, if any.
    #[inline]
    pub(crate) fn deadline(&self) -> Option<u64> {
        match (self.access_deadline, self.write_deadline) {
            (Some(a), Some(w)) => Some(a.min(w)),
            (Some(a), None) => Some(a),
            (None, Some(w)) => Some(w),
            (None, None) => None,
        }
    }

    #[inline]
    pub(crate) fn is_expired(&self, now: u64) -> bool {
        matches!(self.deadline(), Some(d) if now >= d)
    }

    /// Present, unexpired, and (for weak values) not yet collected.
    #[inline]
    pub(crate) fn is_live(&self, now: u64) -> bool {
        !self.is_expired(now) && !self.value.is_collected()
    }
}

/// A read-path snapshot of one entry, taken under the shard's shared lock.
pub(crate) struct EntryView<V> {
    /// `None` when a weakly held value has been reclaimed.
    pub(crate) value: Option<Arc<V>>,
    pub(crate) weight: u64,
    pub(crate) written_at: u64,
    pub(crate) stamp: u64,
    pub(crate) write_deadline: Option<u64>,
    /// Effective expiration deadline (min of the two), if any.
    pub(crate) deadline: Option<u64>,
}

/// Outcome of a put-if-absent attempt.
pub(crate) enum TryInsertOutcome<V> {
    /// The new entry went in. Carries the dead entry it displaced (expired
    /// or collected), if any, so the caller can notify.
    Inserted(Option<CacheEntry<V>>),
    /// A live mapping already exists; nothing changed.
    Present(Arc<V>),
}

// ---------------------------------------------------------------------------
// Shard
// ---------------------------------------------------------------------------

/// Cache-line padding to prevent false sharing between shards.
#[repr(align(64))]
struct Shard<K, V> {
    map: RwLock<AHashMap<K, CacheEntry<V>>>,
}

// ---------------------------------------------------------------------------
// ShardedStore
// ---------------------------------------------------------------------------

/// A thread-safe entry store backed by `N` independently-locked shards.
///
/// Reads take a shared lock, writes an exclusive lock, both per-shard, so
/// mutations are linearizable per key and reads never observe a torn
/// entry.
pub(crate) struct ShardedStore<K, V> {
    shards: Box<[Shard<K, V>]>,
    /// Always `shards.len() - 1`; shards.len() is a power of two.
    shard_mask: usize,
    /// Hasher used only to compute shard indices.
    build_hasher: RandomState,
}

impl<K: Hash + Eq + Clone, V> ShardedStore<K, V> {
    pub(crate) fn new(num_shards: usize, build_hasher: RandomState) -> Self {
        assert!(num_shards.is_power_of_two());
        let shards = (0..num_shards)
            .map(|_| Shard {
                map: RwLock::new(AHashMap::new()),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();

        ShardedStore {
            shards,
            shard_mask: num_shards - 1,
            build_hasher,
        }
    }

    #[inline]
    fn shard(&self, key: &K) -> &Shard<K, V> {
        let h = self.build_hasher.hash_one(key);
        // High bits have the better avalanche from ahash.
        &self.shards[((h >> 32) as usize) & self.shard_mask]
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Returns a snapshot of the entry for `key`, or `None` if absent.
    ///
    /// The caller is responsible for interpreting the deadline and the
    /// collected-value state.
    pub(crate) fn view(&self, key: &K) -> Option<EntryView<V>> {
        self.shard(key).map.read().get(key).map(|e| EntryView {
            value: e.value.get(),
            weight: e.weight,
            written_at: e.written_at,
            stamp: e.stamp,
            write_deadline: e.write_deadline,
            deadline: e.deadline(),
        })
    }

    pub(crate) fn contains(&self, key: &K, now: u64) -> bool {
        self.shard(key)
            .map
            .read()
            .get(key)
            .is_some_and(|e| e.is_live(now))
    }

    /// Total number of entries across all shards, including entries whose
    /// removal is still pending maintenance.
    pub(crate) fn len(&self) -> usize {
        self.shards.iter().map(|s| s.map.read().len()).sum()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.shards.iter().all(|s| s.map.read().is_empty())
    }

    /// Snapshot of every key. Weakly consistent: taken shard by shard.
    pub(crate) fn keys(&self) -> Vec<K> {
        let mut out = Vec::new();
        for shard in self.shards.iter() {
            out.extend(shard.map.read().keys().cloned());
        }
        out
    }

    /// Snapshot of every live `(key, value)` pair.
    pub(crate) fn entries(&self, now: u64) -> Vec<(K, Arc<V>)> {
        let mut out = Vec::new();
        for shard in self.shards.iter() {
            for (k, e) in shard.map.read().iter() {
                if !e.is_expired(now) {
                    if let Some(v) = e.value.get() {
                        out.push((k.clone(), v));
                    }
                }
            }
        }
        out
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Inserts `entry`, returning the previous entry if any.
    pub(crate) fn insert(&self, key: K, entry: CacheEntry<V>) -> Option<CacheEntry<V>> {
        self.shard(&key).map.write().insert(key, entry)
    }

    /// Inserts `entry` only if no live mapping exists.
    pub(crate) fn try_insert(
        &self,
        key: K,
        entry: CacheEntry<V>,
        now: u64,
    ) -> TryInsertOutcome<V> {
        let shard = self.shard(&key);
        let mut map = shard.map.write();
        if let Some(existing) = map.get(&key) {
            if existing.is_live(now) {
                if let Some(v) = existing.value.get() {
                    return TryInsertOutcome::Present(v);
                }
            }
            // Expired or collected: displace and report the corpse.
            let old = map.insert(key, entry);
            return TryInsertOutcome::Inserted(old);
        }
        map.insert(key, entry);
        TryInsertOutcome::Inserted(None)
    }

    /// Replaces the value for `key` only if a live mapping exists.
    /// Returns the previous entry on success.
    pub(crate) fn replace(
        &self,
        key: &K,
        entry: CacheEntry<V>,
        now: u64,
    ) -> Option<CacheEntry<V>> {
        let shard = self.shard(key);
        let mut map = shard.map.write();
        match map.get(key) {
            Some(existing) if existing.is_live(now) => map.insert(key.clone(), entry),
            _ => None,
        }
    }

    /// Replaces the value for `key` only if its identity stamp still
    /// matches `stamp`. Used by refresh so a reload never clobbers a
    /// newer write. Returns the previous entry on success.
    pub(crate) fn replace_if_stamp(
        &self,
        key: &K,
        stamp: u64,
        entry: CacheEntry<V>,
    ) -> Option<CacheEntry<V>> {
        let shard = self.shard(key);
        let mut map = shard.map.write();
        match map.get(key) {
            Some(existing) if existing.stamp == stamp => map.insert(key.clone(), entry),
            _ => None,
        }
    }

    /// Replaces the value for `key` only if the current value equals
    /// `expected`. Returns the previous entry on success.
    pub(crate) fn replace_if(
        &self,
        key: &K,
        expected: &V,
        entry: CacheEntry<V>,
        now: u64,
    ) -> Option<CacheEntry<V>>
    where
        V: PartialEq,
    {
        let shard = self.shard(key);
        let mut map = shard.map.write();
        match map.get(key) {
            Some(existing) if existing.is_live(now) && existing.value.value_eq(expected) => {
                map.insert(key.clone(), entry)
            }
            _ => None,
        }
    }

    /// Removes the entry for `key` unconditionally.
    pub(crate) fn remove(&self, key: &K) -> Option<CacheEntry<V>> {
        self.shard(key).map.write().remove(key)
    }

    /// Removes the entry for `key` only if the current value equals
    /// `expected`.
    pub(crate) fn remove_if_value(
        &self,
        key: &K,
        expected: &V,
        now: u64,
    ) -> Option<CacheEntry<V>>
    where
        V: PartialEq,
    {
        let shard = self.shard(key);
        let mut map = shard.map.write();
        match map.get(key) {
            Some(existing) if existing.is_live(now) && existing.value.value_eq(expected) => {
                map.remove(key)
            }
            _ => None,
        }
    }

    /// Removes the entry for `key` only if its identity stamp matches the
    /// one the maintenance decision was made against.
    pub(crate) fn remove_if_stamp(&self, key: &K, stamp: u64) -> Option<CacheEntry<V>> {
        let shard = self.shard(key);
        let mut map = shard.map.write();
        match map.get(key) {
            Some(existing) if existing.stamp == stamp => map.remove(key),
            _ => None,
        }
    }

    /// Removes the entry for `key` only if it has expired by `now`.
    pub(crate) fn remove_if_expired(&self, key: &K, now: u64) -> Option<CacheEntry<V>> {
        let shard = self.shard(key);
        let mut map = shard.map.write();
        match map.get(key) {
            Some(existing) if existing.is_expired(now) => map.remove(key),
            _ => None,
        }
    }

    /// Removes the entry for `key` only if its weak value was reclaimed.
    pub(crate) fn remove_if_collected(&self, key: &K) -> Option<CacheEntry<V>> {
        let shard = self.shard(key);
        let mut map = shard.map.write();
        match map.get(key) {
            Some(existing) if existing.value.is_collected() => map.remove(key),
            _ => None,
        }
    }

    /// Bumps the expire-after-access deadline of an existing entry.
    ///
    /// No-op if the key is gone; the write deadline is left untouched.
    pub(crate) fn update_access_deadline(&self, key: &K, deadline: u64) {
        if let Some(entry) = self.shard(key).map.write().get_mut(key) {
            entry.access_deadline = Some(deadline);
        }
    }

    /// Runs `f` on the slot for `key` under the shard's exclusive lock.
    ///
    /// This is the per-key linearization point for compute-style
    /// transformations; `f` must not touch the cache.
    pub(crate) fn compute_slot<F, R>(&self, key: &K, f: F) -> R
    where
        F: FnOnce(&mut AHashMap<K, CacheEntry<V>>) -> R,
    {
        let shard = self.shard(key);
        let mut map = shard.map.write();
        f(&mut map)
    }

    /// Removes every entry whose weak value has been reclaimed and returns
    /// the keys. Used by `clean_up` when weak values are enabled.
    pub(crate) fn sweep_collected(&self) -> Vec<K> {
        let mut collected = Vec::new();
        for shard in self.shards.iter() {
            let mut map = shard.map.write();
            map.retain(|k, e| {
                if e.value.is_collected() {
                    collected.push(k.clone());
                    false
                } else {
                    true
                }
            });
        }
        collected
    }

    /// Removes all entries from every shard.
    pub(crate) fn clear(&self) {
        for shard in self.shards.iter() {
            shard.map.write().clear();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
