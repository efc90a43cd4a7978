//! Error types for the cortado library.
//!
//! ## Key Components
//!
//! - [`ConfigError`]: Returned by [`CacheBuilder::try_build`] when a
//!   configuration parameter is invalid (zero shard count, zero durations,
//!   refresh without a loader).
//! - [`CommitError`]: Returned by `try_put` / `try_invalidate` when the
//!   configured write-through sink rejects the operation. The cache is
//!   left unchanged.
//! - [`LoadError`]: Returned by the loading operations. Cheap to clone so a
//!   single failure can be handed to every caller waiting on the same key.
//! - [`InvariantError`]: Produced by debug-only bookkeeping checks on the
//!   eviction policy.
//!
//! [`CacheBuilder::try_build`]: crate::CacheBuilder::try_build

use std::fmt;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// ConfigError
// ---------------------------------------------------------------------------

/// Error returned when cache configuration parameters are invalid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError(String);

impl ConfigError {
    /// Creates a new `ConfigError` with the given description.
    #[inline]
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }

    /// Returns the error description.
    #[inline]
    pub fn message(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for ConfigError {}

// ---------------------------------------------------------------------------
// InvariantError
// ---------------------------------------------------------------------------

/// Error returned when internal bookkeeping invariants are violated.
///
/// Carries a human-readable description of which invariant failed. A cache
/// that observes one of these marks itself broken and fails loudly from
/// then on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvariantError(String);

impl InvariantError {
    /// Creates a new `InvariantError` with the given description.
    #[inline]
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }

    /// Returns the error description.
    #[inline]
    pub fn message(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InvariantError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for InvariantError {}

// ---------------------------------------------------------------------------
// CommitError
// ---------------------------------------------------------------------------

/// Error returned when a write-through sink rejects a mutation.
///
/// The mutation is aborted: the cache holds whatever it held before the
/// call.
#[derive(Debug, Clone)]
pub struct CommitError {
    source: Arc<dyn std::error::Error + Send + Sync>,
}

impl CommitError {
    /// Wraps the sink's error.
    pub fn new<E>(source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        CommitError {
            source: Arc::new(source),
        }
    }

    /// Wraps a plain message.
    pub fn message(msg: impl Into<String>) -> Self {
        CommitError {
            source: Arc::new(ConfigError::new(msg)),
        }
    }
}

impl fmt::Display for CommitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "write-through sink rejected the operation: {}", self.source)
    }
}

impl std::error::Error for CommitError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}

// ---------------------------------------------------------------------------
// LoadError
// ---------------------------------------------------------------------------

/// Error returned when a value could not be loaded.
///
/// Clonable (`Arc`-backed) so that every caller coalesced onto the same
/// in-flight load observes the same failure.
#[derive(Debug, Clone)]
pub struct LoadError {
    kind: LoadErrorKind,
}

#[derive(Debug, Clone)]
enum LoadErrorKind {
    /// The loader returned an error.
    Failed(Arc<dyn std::error::Error + Send + Sync>),
    /// The loader panicked. The panic is re-raised on the loading thread;
    /// waiting threads observe this error instead.
    Panicked,
    /// A loading operation was invoked on a cache built without a loader.
    NoLoader,
}

impl LoadError {
    /// Wraps a loader's error.
    pub fn new<E>(source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        LoadError {
            kind: LoadErrorKind::Failed(Arc::new(source)),
        }
    }

    /// Wraps a plain message.
    pub fn message(msg: impl Into<String>) -> Self {
        LoadError {
            kind: LoadErrorKind::Failed(Arc::new(ConfigError::new(msg))),
        }
    }

    pub(crate) fn panicked() -> Self {
        LoadError {
            kind: LoadErrorKind::Panicked,
        }
    }

    pub(crate) fn no_loader() -> Self {
        LoadError {
            kind: LoadErrorKind::NoLoader,
        }
    }

    /// Returns `true` if the underlying loader panicked.
    pub fn is_panic(&self) -> bool {
        matches!(self.kind, LoadErrorKind::Panicked)
    }
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            LoadErrorKind::Failed(e) => write!(f, "load failed: {e}"),
            LoadErrorKind::Panicked => f.write_str("load failed: the loader panicked"),
            LoadErrorKind::NoLoader => {
                f.write_str("no loader was configured for this cache")
            }
        }
    }
}

impl std::error::Error for LoadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            LoadErrorKind::Failed(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
