//! Value loader — computes or retrieves values for a loading cache.
//!
//! Most implementations only need [`load`](CacheLoader::load). `load_all`
//! exists for backends where one bulk fetch beats N point lookups, and
//! `reload` lets refresh-after-write reuse the stale value (for example to
//! send a conditional request).

use crate::error::LoadError;

/// Computes or retrieves values, based on a key.
///
/// Called by [`Cache::get`], [`Cache::get_all`], and the
/// refresh-after-write machinery.
///
/// [`Cache::get`]: crate::Cache::get
/// [`Cache::get_all`]: crate::Cache::get_all
pub trait CacheLoader<K, V>: Send + Sync + 'static {
    /// Computes or retrieves the value for `key`.
    ///
    /// On error the mapping is unchanged, the failure is counted, and the
    /// error is returned to every caller waiting on this key.
    fn load(&self, key: &K) -> Result<V, LoadError>;

    /// Computes or retrieves the values for `keys`.
    ///
    /// May return entries for keys that were not requested; all returned
    /// entries are cached. The default implementation loads each key
    /// individually.
    fn load_all(&self, keys: &[K]) -> Result<Vec<(K, V)>, LoadError>
    where
        K: Clone,
    {
        keys.iter()
            .map(|k| self.load(k).map(|v| (k.clone(), v)))
            .collect()
    }

    /// Computes a replacement value for an already-cached key.
    ///
    /// Called by refresh-after-write. Errors are logged and swallowed; the
    /// old mapping is kept.
    fn reload(&self, key: &K, _old_value: &V) -> Result<V, LoadError> {
        self.load(key)
    }
}

/// A [`CacheLoader`] backed by a closure.
///
/// # Example
/// ```
/// use cortado::loader::{CacheLoader, FnLoader};
///
/// let loader = FnLoader(|key: &u64| Ok(key + 1));
/// assert_eq!(loader.load(&5).unwrap(), 6);
/// ```
pub struct FnLoader<F>(pub F);

impl<K, V, F> CacheLoader<K, V> for FnLoader<F>
where
    F: Fn(&K) -> Result<V, LoadError> + Send + Sync + 'static,
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    #[inline]
    fn load(&self, key: &K) -> Result<V, LoadError> {
        (self.0)(key)
    }
}
