//! Removal listener — a callback invoked whenever a mapping leaves the cache.
//!
//! Exactly one notification is delivered per transition from "present" to
//! "absent" (or to a replaced value), carrying the cause of the removal.
//!
//! # Example
//! ```
//! use cortado::CacheBuilder;
//! use cortado::listener::RemovalCause;
//! use std::sync::{Arc, Mutex};
//!
//! let log: Arc<Mutex<Vec<(u64, RemovalCause)>>> = Arc::new(Mutex::new(Vec::new()));
//! let log2 = Arc::clone(&log);
//!
//! let cache: cortado::Cache<u64, u64> = CacheBuilder::new(2)
//!     .removal_listener(move |key: &u64, _val, cause| {
//!         log2.lock().unwrap().push((*key, cause));
//!     })
//!     .build();
//!
//! cache.put(1, 10);
//! cache.put(2, 20);
//! cache.put(3, 30); // size eviction
//! cache.invalidate(&1); // explicit removal (may already be evicted)
//! ```

use std::sync::Arc;

// ---------------------------------------------------------------------------
// RemovalCause
// ---------------------------------------------------------------------------

/// The reason a key→value mapping ceased to exist.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RemovalCause {
    /// Removed by [`Cache::invalidate`], [`Cache::invalidate_all`], or a
    /// removing [`Cache::compute`].
    ///
    /// [`Cache::invalidate`]: crate::Cache::invalidate
    /// [`Cache::invalidate_all`]: crate::Cache::invalidate_all
    /// [`Cache::compute`]: crate::Cache::compute
    Explicit,
    /// The value was replaced by a newer one for the same key.
    Replaced,
    /// A weakly held value lost its last strong reference and was reclaimed.
    Collected,
    /// The entry's expire-after-write or expire-after-access deadline passed.
    Expired,
    /// The entry was chosen as an eviction victim to respect the maximum
    /// weight.
    Size,
}

impl RemovalCause {
    /// Returns `true` when the removal was not requested by the user
    /// (collected, expired, or evicted for size).
    pub fn was_evicted(&self) -> bool {
        matches!(
            self,
            RemovalCause::Collected | RemovalCause::Expired | RemovalCause::Size
        )
    }
}

// ---------------------------------------------------------------------------
// RemovalListener trait
// ---------------------------------------------------------------------------

/// A callback invoked each time a mapping is removed or replaced.
///
/// The callback receives the key, the removed value — `None` only when a
/// weakly held value was already reclaimed — and the [`RemovalCause`].
///
/// Listener panics are caught, logged, and swallowed: a faulty listener
/// never stalls maintenance. **Do not call cache methods from inside the
/// listener**; it may run on the maintenance path while internal locks are
/// held.
pub trait RemovalListener<K, V>: Send + Sync + 'static {
    fn on_removal(&self, key: &K, value: Option<Arc<V>>, cause: RemovalCause);
}

/// A [`RemovalListener`] backed by a closure.
///
/// Created via [`CacheBuilder::removal_listener`](crate::CacheBuilder::removal_listener).
pub struct FnListener<F>(pub F);

impl<K, V, F> RemovalListener<K, V> for FnListener<F>
where
    F: Fn(&K, Option<Arc<V>>, RemovalCause) + Send + Sync + 'static,
{
    fn on_removal(&self, key: &K, value: Option<Arc<V>>, cause: RemovalCause) {
        (self.0)(key, value, cause)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eviction_causes_are_flagged() {
        assert!(RemovalCause::Size.was_evicted());
        assert!(RemovalCause::Expired.was_evicted());
        assert!(RemovalCause::Collected.was_evicted());
        assert!(!RemovalCause::Explicit.was_evicted());
        assert!(!RemovalCause::Replaced.was_evicted());
    }
}
