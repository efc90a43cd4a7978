use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::Cache;
use crate::clock::{SystemTicker, Ticker};
use crate::error::{ConfigError, LoadError};
use crate::executor::{CallerRunsExecutor, Executor};
use crate::expiry::ExpirationPolicy;
use crate::listener::{FnListener, RemovalCause, RemovalListener};
use crate::loader::{CacheLoader, FnLoader};
use crate::weigher::{FnWeigher, UnitWeigher, Weigher};
use crate::writer::CacheWriter;

/// Builder for configuring and constructing a [`Cache`].
///
/// # Example
/// ```
/// use cortado::CacheBuilder;
/// use std::time::Duration;
///
/// let cache: cortado::Cache<String, String> = CacheBuilder::new(1_000)
///     .expire_after_write(Duration::from_secs(60))
///     .record_stats()
///     .build();
/// ```
pub struct CacheBuilder<K, V> {
    pub(crate) max_weight: u64,
    pub(crate) num_shards: usize,
    pub(crate) weigher: Box<dyn Weigher<K, V>>,
    pub(crate) expiration: ExpirationPolicy,
    pub(crate) weak_values: bool,
    pub(crate) listener: Option<Box<dyn RemovalListener<K, V>>>,
    pub(crate) writer: Option<Box<dyn CacheWriter<K, V>>>,
    pub(crate) loader: Option<Arc<dyn CacheLoader<K, V>>>,
    pub(crate) executor: Arc<dyn Executor>,
    pub(crate) ticker: Arc<dyn Ticker>,
    pub(crate) record_stats: bool,
}

impl<K: 'static, V: 'static> CacheBuilder<K, V> {
    /// Starts a builder for a cache bounded by `max_weight` total weight
    /// (entry count, with the default weigher).
    ///
    /// A maximum of 0 is legal: the cache stays observable but evicts every
    /// positive-weight entry immediately.
    pub fn new(max_weight: u64) -> Self {
        CacheBuilder {
            max_weight,
            num_shards: 64,
            weigher: Box::new(UnitWeigher),
            expiration: ExpirationPolicy::default(),
            weak_values: false,
            listener: None,
            writer: None,
            loader: None,
            executor: Arc::new(CallerRunsExecutor),
            ticker: Arc::new(SystemTicker::new()),
            record_stats: false,
        }
    }

    /// Sets the number of store shards (power of two; default 64).
    pub fn num_shards(mut self, n: usize) -> Self {
        self.num_shards = n;
        self
    }

    /// Entries expire `ttl` after they were written or replaced.
    pub fn expire_after_write(mut self, ttl: Duration) -> Self {
        self.expiration.after_write = Some(ttl);
        self
    }

    /// Entries expire `tti` after their last read or write.
    pub fn expire_after_access(mut self, tti: Duration) -> Self {
        self.expiration.after_access = Some(tti);
        self
    }

    /// Reads of an entry older than `age` trigger an asynchronous reload
    /// through the configured loader while still returning the current
    /// value. Requires [`loader`](CacheBuilder::loader).
    pub fn refresh_after_write(mut self, age: Duration) -> Self {
        self.expiration.refresh_after_write = Some(age);
        self
    }

    /// Holds values weakly: an entry stays cached only while some `Arc`
    /// returned by the cache is alive. Reclaimed values are removed with
    /// cause [`RemovalCause::Collected`].
    pub fn weak_values(mut self) -> Self {
        self.weak_values = true;
        self
    }

    /// Registers a removal listener closure.
    ///
    /// The closure receives the key, the removed value (`None` when a weak
    /// value was already reclaimed), and the [`RemovalCause`]. Do not call
    /// cache methods from inside it.
    pub fn removal_listener<F>(mut self, f: F) -> Self
    where
        F: Fn(&K, Option<Arc<V>>, RemovalCause) + Send + Sync + 'static,
    {
        self.listener = Some(Box::new(FnListener(f)));
        self
    }

    /// Registers a removal listener via the [`RemovalListener`] trait.
    pub fn removal_listener_impl<L: RemovalListener<K, V>>(mut self, l: L) -> Self {
        self.listener = Some(Box::new(l));
        self
    }

    /// Sets a custom entry weigher via closure. Weights may be 0;
    /// zero-weight entries are never evicted for size.
    ///
    /// # Example
    /// ```
    /// use cortado::CacheBuilder;
    ///
    /// let cache: cortado::Cache<String, Vec<u8>> = CacheBuilder::new(4096)
    ///     .weigher(|_k: &String, v: &Vec<u8>| v.len() as u64 + 1)
    ///     .build();
    /// ```
    pub fn weigher<F>(mut self, f: F) -> Self
    where
        F: Fn(&K, &V) -> u64 + Send + Sync + 'static,
    {
        self.weigher = Box::new(FnWeigher(f));
        self
    }

    /// Sets a weigher using any type that implements the [`Weigher`] trait.
    pub fn weigher_impl<W: Weigher<K, V>>(mut self, w: W) -> Self {
        self.weigher = Box::new(w);
        self
    }

    /// Installs a write-through sink consulted before every `put` and
    /// explicit removal.
    pub fn cache_writer<W: CacheWriter<K, V>>(mut self, w: W) -> Self {
        self.writer = Some(Box::new(w));
        self
    }

    /// Installs the loader used by [`Cache::get`], [`Cache::get_all`], and
    /// refresh-after-write.
    ///
    /// [`Cache::get`]: crate::Cache::get
    /// [`Cache::get_all`]: crate::Cache::get_all
    pub fn loader_impl<L: CacheLoader<K, V>>(mut self, l: L) -> Self {
        self.loader = Some(Arc::new(l));
        self
    }

    /// Installs a loader closure; see [`loader_impl`](CacheBuilder::loader_impl).
    pub fn loader<F>(self, f: F) -> Self
    where
        F: Fn(&K) -> Result<V, LoadError> + Send + Sync + 'static,
        K: Send + Sync,
        V: Send + Sync,
    {
        self.loader_impl(FnLoader(f))
    }

    /// Sets the executor that runs deferred maintenance, refreshes, and
    /// listener batches. Defaults to running jobs on the calling thread.
    pub fn executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = executor;
        self
    }

    /// Sets the monotonic time source. Defaults to the system clock;
    /// tests inject a [`ManualTicker`](crate::clock::ManualTicker).
    pub fn ticker(mut self, ticker: Arc<dyn Ticker>) -> Self {
        self.ticker = ticker;
        self
    }

    /// Enables the statistics counters exposed by [`Cache::stats`].
    ///
    /// [`Cache::stats`]: crate::Cache::stats
    pub fn record_stats(mut self) -> Self {
        self.record_stats = true;
        self
    }
}

impl<K, V> CacheBuilder<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Validates the configuration and builds the cache.
    pub fn try_build(self) -> Result<Cache<K, V>, ConfigError> {
        if self.num_shards == 0 || !self.num_shards.is_power_of_two() {
            return Err(ConfigError::new("num_shards must be a power of two"));
        }
        for (name, duration) in [
            ("expire_after_write", self.expiration.after_write),
            ("expire_after_access", self.expiration.after_access),
            ("refresh_after_write", self.expiration.refresh_after_write),
        ] {
            if duration.is_some_and(|d| d.is_zero()) {
                return Err(ConfigError::new(format!("{name} must be non-zero")));
            }
        }
        if self.expiration.refresh_after_write.is_some() && self.loader.is_none() {
            return Err(ConfigError::new(
                "refresh_after_write requires a loader",
            ));
        }
        Ok(Cache::from_builder(self))
    }

    /// Builds the cache, panicking on an invalid configuration.
    pub fn build(self) -> Cache<K, V> {
        match self.try_build() {
            Ok(cache) => cache,
            Err(e) => panic!("{e}"),
        }
    }
}
