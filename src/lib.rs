//! A bounded, concurrent, in-memory key→value cache.
//!
//! The engine combines a frequency-aware admission filter (TinyLFU), a
//! three-region replacement policy (W-TinyLFU), and buffered maintenance:
//! reads and writes are recorded into lock-free buffers and drained
//! asynchronously under a single maintenance lock, so the hot read path
//! never blocks. Expiration (after-write and after-access), refresh,
//! loading with per-key coalescing, weak values, write-through, removal
//! listeners, and statistics ride on the same machinery.
//!
//! ```
//! use cortado::CacheBuilder;
//!
//! let cache: cortado::Cache<u64, String> = CacheBuilder::new(10_000)
//!     .record_stats()
//!     .build();
//!
//! cache.put(1, "one".to_string());
//! assert_eq!(cache.get_if_present(&1).as_deref(), Some(&"one".to_string()));
//! assert!(cache.stats().hit_rate() > 0.0);
//! ```

mod buffer;
mod builder;
mod cache;
mod expiry;
mod metrics;
mod policy;
mod store;
mod value;

pub mod clock;
pub mod error;
pub mod executor;
pub mod listener;
pub mod loader;
pub mod weigher;
pub mod writer;

pub use builder::CacheBuilder;
pub use cache::{Cache, PolicyView};
pub use error::{CommitError, ConfigError, LoadError};
pub use listener::RemovalCause;
pub use metrics::stats::CacheStats;
