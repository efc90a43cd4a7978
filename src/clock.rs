//! Time source abstraction.
//!
//! The cache never reads the wall clock directly. Every deadline and every
//! expiration check goes through a [`Ticker`], a cheap monotonic nanosecond
//! counter. Production caches use [`SystemTicker`]; tests inject a
//! [`ManualTicker`] and advance it explicitly, so expiration behavior can be
//! verified without sleeping.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// A monotonic nanosecond clock.
///
/// Implementations must be cheap (called on every cache operation) and must
/// never fault or go backwards.
pub trait Ticker: Send + Sync + 'static {
    /// Nanoseconds elapsed since an arbitrary, fixed epoch.
    fn now(&self) -> u64;
}

/// The default ticker: monotonic time since the cache was constructed.
pub struct SystemTicker {
    epoch: Instant,
}

impl SystemTicker {
    pub fn new() -> Self {
        SystemTicker {
            epoch: Instant::now(),
        }
    }
}

impl Default for SystemTicker {
    fn default() -> Self {
        Self::new()
    }
}

impl Ticker for SystemTicker {
    #[inline]
    fn now(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }
}

/// A ticker driven by the caller. Starts at zero and only moves when
/// [`advance`](ManualTicker::advance) is called.
///
/// # Example
/// ```
/// use cortado::clock::{ManualTicker, Ticker};
/// use std::time::Duration;
///
/// let ticker = ManualTicker::new();
/// assert_eq!(ticker.now(), 0);
/// ticker.advance(Duration::from_secs(61));
/// assert_eq!(ticker.now(), 61_000_000_000);
/// ```
pub struct ManualTicker {
    nanos: AtomicU64,
}

impl ManualTicker {
    pub fn new() -> Self {
        ManualTicker {
            nanos: AtomicU64::new(0),
        }
    }

    /// Moves the clock forward by `d`.
    pub fn advance(&self, d: Duration) {
        self.nanos.fetch_add(d.as_nanos() as u64, Ordering::SeqCst);
    }
}

impl Default for ManualTicker {
    fn default() -> Self {
        Self::new()
    }
}

impl Ticker for ManualTicker {
    #[inline]
    fn now(&self) -> u64 {
        self.nanos.load(Ordering::SeqCst)
    }
}
