//! Write-through sink.
//!
//! When a [`CacheWriter`] is configured, every `put` and every explicit
//! removal is first offered to the sink, and only committed to the cache if
//! the sink accepts it. A sink failure aborts the operation: the cache
//! holds exactly what it held before the call, and the error is surfaced to
//! the caller through [`Cache::try_put`] / [`Cache::try_invalidate`].
//!
//! The sink is **not** consulted for evictions, expirations, or collected
//! values — those remove cache entries, not system-of-record state.
//!
//! [`Cache::try_put`]: crate::Cache::try_put
//! [`Cache::try_invalidate`]: crate::Cache::try_invalidate

use crate::error::CommitError;

/// A synchronous write-through sink.
///
/// Implementations are called on the thread performing the cache operation,
/// before the cache is mutated. They must not call back into the cache.
pub trait CacheWriter<K, V>: Send + Sync + 'static {
    /// Persists `value` for `key`. Returning an error aborts the `put`.
    fn write(&self, key: &K, value: &V) -> Result<(), CommitError>;

    /// Deletes `key`. Returning an error aborts the removal.
    fn delete(&self, key: &K) -> Result<(), CommitError>;
}

/// A [`CacheWriter`] backed by a pair of closures.
pub struct FnWriter<W, D> {
    pub write: W,
    pub delete: D,
}

impl<K, V, W, D> CacheWriter<K, V> for FnWriter<W, D>
where
    W: Fn(&K, &V) -> Result<(), CommitError> + Send + Sync + 'static,
    D: Fn(&K) -> Result<(), CommitError> + Send + Sync + 'static,
{
    #[inline]
    fn write(&self, key: &K, value: &V) -> Result<(), CommitError> {
        (self.write)(key, value)
    }

    #[inline]
    fn delete(&self, key: &K) -> Result<(), CommitError> {
        (self.delete)(key)
    }
}
