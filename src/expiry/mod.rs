pub(crate) mod timer_wheel;

use std::time::Duration;

/// The three independently combinable expiration policies.
///
/// `after_write` starts a countdown at insertion and replacement;
/// `after_access` additionally restarts it on every read. When both are
/// set an entry expires at whichever deadline comes first.
/// `refresh_after_write` does not expire anything: a read past the refresh
/// point keeps serving the current value while a reload is triggered in
/// the background.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct ExpirationPolicy {
    pub(crate) after_write: Option<Duration>,
    pub(crate) after_access: Option<Duration>,
    pub(crate) refresh_after_write: Option<Duration>,
}

impl ExpirationPolicy {
    /// `true` when neither deadline-based policy is enabled (refresh alone
    /// needs no timer wheel).
    #[inline]
    pub(crate) fn expires(&self) -> bool {
        self.after_write.is_some() || self.after_access.is_some()
    }

    /// Absolute deadlines `(access, write)` for an entry written at `now`.
    #[inline]
    pub(crate) fn deadlines_at_write(&self, now: u64) -> (Option<u64>, Option<u64>) {
        (
            self.after_access.map(|d| now + d.as_nanos() as u64),
            self.after_write.map(|d| now + d.as_nanos() as u64),
        )
    }

    /// Absolute refresh point for an entry written at `written_at`.
    #[inline]
    pub(crate) fn refresh_at(&self, written_at: u64) -> Option<u64> {
        self.refresh_after_write
            .map(|d| written_at + d.as_nanos() as u64)
    }
}
