use std::hash::Hash;

use ahash::{AHashMap, RandomState};

use super::{Policy, Victim};
use crate::error::InvariantError;

/// Sentinel indices in the node arena. The head side is the LRU end.
const HEAD: usize = 0;
const TAIL: usize = 1;
const NIL: usize = usize::MAX;

struct LruNode<K> {
    /// `None` only for the sentinels and recycled slots.
    key: Option<K>,
    key_hash: u64,
    weight: u64,
    stamp: u64,
    prev: usize,
    next: usize,
}

/// Plain LRU over an index-arena doubly-linked list.
///
/// No admission filter: every insert is accepted and the LRU entry pays for
/// it. Kept as the baseline the W-TinyLFU policy is measured against.
pub(crate) struct LruPolicy<K> {
    /// Slot 0 = HEAD sentinel, 1 = TAIL sentinel, 2+ = entries.
    nodes: Vec<LruNode<K>>,
    index: AHashMap<K, usize>,
    by_hash: AHashMap<u64, usize>,
    free: Vec<usize>,
    build_hasher: RandomState,
    total_weight: u64,
    max_total: u64,
}

impl<K: Hash + Eq + Clone + Send> LruPolicy<K> {
    pub(crate) fn new(max_total: u64) -> Self {
        let mut nodes: Vec<LruNode<K>> = Vec::with_capacity(16);
        nodes.push(LruNode {
            key: None,
            key_hash: 0,
            weight: 0,
            stamp: 0,
            prev: NIL,
            next: TAIL,
        });
        nodes.push(LruNode {
            key: None,
            key_hash: 0,
            weight: 0,
            stamp: 0,
            prev: HEAD,
            next: NIL,
        });

        LruPolicy {
            nodes,
            index: AHashMap::new(),
            by_hash: AHashMap::new(),
            free: Vec::new(),
            build_hasher: RandomState::new(),
            total_weight: 0,
            max_total,
        }
    }

    /// Appends `idx` at the MRU (tail) end.
    fn append_tail(&mut self, idx: usize) {
        let last = self.nodes[TAIL].prev;
        self.nodes[idx].prev = last;
        self.nodes[idx].next = TAIL;
        self.nodes[last].next = idx;
        self.nodes[TAIL].prev = idx;
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = (self.nodes[idx].prev, self.nodes[idx].next);
        self.nodes[prev].next = next;
        self.nodes[next].prev = prev;
        self.nodes[idx].prev = NIL;
        self.nodes[idx].next = NIL;
    }

    fn alloc(&mut self, key: K, key_hash: u64, weight: u64, stamp: u64) -> usize {
        let node = LruNode {
            key: Some(key),
            key_hash,
            weight,
            stamp,
            prev: NIL,
            next: NIL,
        };
        if let Some(idx) = self.free.pop() {
            self.nodes[idx] = node;
            idx
        } else {
            self.nodes.push(node);
            self.nodes.len() - 1
        }
    }

    fn seize(&mut self, idx: usize) -> Option<Victim<K>> {
        self.unlink(idx);
        let key = self.nodes[idx].key.take()?;
        let weight = self.nodes[idx].weight;
        let stamp = self.nodes[idx].stamp;
        self.total_weight -= weight;
        self.index.remove(&key);
        if self.by_hash.get(&self.nodes[idx].key_hash) == Some(&idx) {
            self.by_hash.remove(&self.nodes[idx].key_hash);
        }
        self.free.push(idx);
        Some(Victim { key, weight, stamp })
    }

    /// Evicts from the LRU end (skipping zero-weight entries) until the
    /// total fits.
    fn evict(&mut self) -> Vec<Victim<K>> {
        let mut victims = Vec::new();
        while self.total_weight > self.max_total {
            let mut idx = self.nodes[HEAD].next;
            while idx != TAIL && self.nodes[idx].weight == 0 {
                idx = self.nodes[idx].next;
            }
            if idx == TAIL {
                break;
            }
            if let Some(v) = self.seize(idx) {
                victims.push(v);
            }
        }
        victims
    }

    fn touch(&mut self, idx: usize) {
        self.unlink(idx);
        self.append_tail(idx);
    }
}

impl<K: Hash + Eq + Clone + Send> Policy<K> for LruPolicy<K> {
    fn on_access(&mut self, key: &K) {
        if let Some(&idx) = self.index.get(key) {
            self.touch(idx);
        }
    }

    fn on_access_hash(&mut self, h: u64) {
        if let Some(&idx) = self.by_hash.get(&h) {
            self.touch(idx);
        }
    }

    fn on_insert(&mut self, key: K, weight: u64, stamp: u64) -> Vec<Victim<K>> {
        if let Some(&idx) = self.index.get(&key) {
            let old = self.nodes[idx].weight;
            self.nodes[idx].weight = weight;
            self.nodes[idx].stamp = stamp;
            self.total_weight += weight;
            self.total_weight -= old;
            self.touch(idx);
        } else {
            let h = self.build_hasher.hash_one(&key);
            let idx = self.alloc(key.clone(), h, weight, stamp);
            self.index.insert(key, idx);
            self.by_hash.insert(h, idx);
            self.append_tail(idx);
            self.total_weight += weight;
        }
        self.evict()
    }

    fn on_update(&mut self, key: &K, new_weight: u64, stamp: u64) -> Vec<Victim<K>> {
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
        self.total_weight
    }

    fn max_weight(&self) -> u64 {
        self.max_total
    }

    fn set_max_weight(&mut self, max: u64) -> Vec<Victim<K>> {
        self.max_total = max;
        self.evict()
    }

    fn coldest(&self, n: usize) -> Vec<K> {
        let mut out = Vec::with_capacity(n.min(self.index.len()));
        let mut idx = self.nodes[HEAD].next;
        while idx != TAIL && out.len() < n {
            if let Some(key) = &self.nodes[idx].key {
                out.push(key.clone());
            }
            idx = self.nodes[idx].next;
        }
        out
    }

    fn hottest(&self, n: usize) -> Vec<K> {
        let mut out = Vec::with_capacity(n.min(self.index.len()));
        let mut idx = self.nodes[TAIL].prev;
        while idx != HEAD && out.len() < n {
            if let Some(key) = &self.nodes[idx].key {
                out.push(key.clone());
            }
            idx = self.nodes[idx].prev;
        }
        out
    }

    fn check_invariants(&self) -> Result<(), InvariantError> {
        let mut sum = 0u64;
        let mut seen = 0usize;
        let mut idx = self.nodes[HEAD].next;
        while idx != TAIL {
            let node = &self.nodes[idx];
            if node.key.is_none() {
                return Err(InvariantError::new("dead node linked into the LRU list"));
            }
            sum += node.weight;
            seen += 1;
            idx = node.next;
        }
        if sum != self.total_weight {
            return Err(InvariantError::new(format!(
                "weight counter {} != linked sum {}",
                self.total_weight, sum
            )));
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

#[cfg(test)]
mod tests {
    use super::*;

    fn insert(p: &mut LruPolicy<&'static str>, key: &'static str, weight: u64) -> Vec<&'static str> {
        p.on_insert(key, weight, 0).into_iter().map(|v| v.key).collect()
    }

    #[test]
    fn evicts_the_lru_entry_when_full() {
        let mut p: LruPolicy<&str> = LruPolicy::new(2);
        assert!(insert(&mut p, "a", 1).is_empty());
        assert!(insert(&mut p, "b", 1).is_empty());
        assert_eq!(insert(&mut p, "c", 1), vec!["a"]);
        p.check_invariants().unwrap();
    }

    #[test]
    fn access_moves_to_the_mru_end() {
        let mut p: LruPolicy<&str> = LruPolicy::new(2);
        insert(&mut p, "a", 1);
        insert(&mut p, "b", 1);
        p.on_access(&"a");
        assert_eq!(insert(&mut p, "c", 1), vec!["b"]);
    }

    #[test]
    fn remove_releases_weight() {
        let mut p: LruPolicy<&str> = LruPolicy::new(3);
        insert(&mut p, "a", 1);
        insert(&mut p, "b", 1);
        p.on_remove(&"a");
        assert_eq!(p.current_weight(), 1);
        assert!(insert(&mut p, "c", 1).is_empty());
        assert!(insert(&mut p, "d", 1).is_empty());
    }

    #[test]
    fn coldest_and_hottest_are_mirrors() {
        let mut p: LruPolicy<&str> = LruPolicy::new(10);
        insert(&mut p, "a", 1);
        insert(&mut p, "b", 1);
        insert(&mut p, "c", 1);
        assert_eq!(p.coldest(10), vec!["a", "b", "c"]);
        assert_eq!(p.hottest(10), vec!["c", "b", "a"]);
    }

    #[test]
    fn zero_weight_entries_survive_pressure() {
        let mut p: LruPolicy<&str> = LruPolicy::new(1);
        insert(&mut p, "free", 0);
        insert(&mut p, "a", 1);
        insert(&mut p, "b", 1);
        assert!(p.contains(&"free"));
        assert!(p.current_weight() <= 1);
    }
}
