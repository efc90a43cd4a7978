//! Striped lossy read buffer.
//!
//! Cache hits are recorded by offering the key hash to this buffer — one
//! CAS plus one atomic store, no mutex. The maintenance pass drains the
//! buffer and replays the hashes into the policy, which updates both the
//! frequency sketch and the recency queues.
//!
//! ## Design
//!
//! The buffer holds a power-of-two number of independent ring stripes,
//! sized from the machine's available parallelism. Each calling thread is
//! permanently assigned one stripe via a thread-local index so threads
//! rarely collide on the same stripe's reservation counter.
//!
//! Losses are tolerated by design: the read buffer is a hint, not a
//! ledger. A full stripe drops the record and tells the caller to schedule
//! a drain; a reservation race drops the record outright.
//!
//! ## Known race
//!
//! A producer reserves a slot with a CAS and publishes the hash with a
//! separate store. A concurrent drain may read a reserved slot before the
//! hash lands, observing 0 (the "empty" sentinel); such slots are skipped
//! and the record is lost. The race is bounded to at most one slot per
//! stripe per drain.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Capacity of each stripe's ring. Power of two.
const STRIPE_CAPACITY: usize = 16;

/// Global counter used to assign a stable stripe to each thread.
static STRIPE_COUNTER: AtomicUsize = AtomicUsize::new(0);

thread_local! {
    /// The stripe ticket for the current thread. Assigned once on first use;
    /// reduced modulo the stripe count at offer time.
    static THREAD_TICKET: usize = STRIPE_COUNTER.fetch_add(1, Ordering::Relaxed);
}

/// Outcome of an [`offer`](StripedReadBuffer::offer).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum OfferResult {
    /// The record was accepted.
    Added,
    /// The stripe is saturated; the record was dropped. The caller should
    /// schedule a maintenance drain.
    Full,
    /// Another thread won the slot reservation; the record was dropped.
    /// No retry is required.
    Failed,
}

// ---------------------------------------------------------------------------
// Stripe
// ---------------------------------------------------------------------------

/// One fixed-capacity ring stripe.
///
/// Padded to a cache line so neighbouring stripes don't false-share.
#[repr(align(64))]
struct Stripe {
    /// Hash slots. 0 is the sentinel for "not yet published".
    slots: [AtomicU64; STRIPE_CAPACITY],
    /// Number of reservations made. May exceed `STRIPE_CAPACITY` while the
    /// stripe waits for a drain.
    reserved: AtomicUsize,
}

impl Stripe {
    fn new() -> Self {
        Stripe {
            slots: std::array::from_fn(|_| AtomicU64::new(0)),
            reserved: AtomicUsize::new(0),
        }
    }

    /// Attempts to record `h` with a single reservation CAS.
    #[inline]
    fn offer(&self, h: u64) -> OfferResult {
        let i = self.reserved.load(Ordering::Relaxed);
        if i >= STRIPE_CAPACITY {
            return OfferResult::Full;
        }
        match self
            .reserved
            .compare_exchange(i, i + 1, Ordering::Relaxed, Ordering::Relaxed)
        {
            Ok(_) => {
                // Release pairs with the Acquire swap in `drain`.
                self.slots[i].store(h, Ordering::Release);
                OfferResult::Added
            }
            Err(_) => OfferResult::Failed,
        }
    }

    /// Drains all published hashes into `out` and resets the stripe.
    ///
    /// Must be called by one thread at a time (the maintenance pass).
    fn drain(&self, out: &mut Vec<u64>) {
        let n = self.reserved.swap(0, Ordering::AcqRel).min(STRIPE_CAPACITY);
        for slot in &self.slots[..n] {
            // swap(0) clears the slot so a reservation whose store lands
            // after this point is picked up by the next drain instead.
            let h = slot.swap(0, Ordering::AcqRel);
            if h != 0 {
                out.push(h);
            }
        }
    }

    #[inline]
    fn is_full(&self) -> bool {
        self.reserved.load(Ordering::Relaxed) >= STRIPE_CAPACITY
    }
}

// ---------------------------------------------------------------------------
// StripedReadBuffer
// ---------------------------------------------------------------------------

/// A lock-free, lossy, striped buffer of recently-read key hashes.
pub(crate) struct StripedReadBuffer {
    stripes: Box<[Stripe]>,
    /// Always `stripes.len() - 1`; the stripe count is a power of two.
    mask: usize,
}

impl StripedReadBuffer {
    /// Creates a buffer with `4 × next_power_of_two(parallelism)` stripes.
    pub(crate) fn new() -> Self {
        let parallelism = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self::with_stripes(4 * parallelism.next_power_of_two())
    }

    fn with_stripes(count: usize) -> Self {
        let count = count.next_power_of_two();
        StripedReadBuffer {
            stripes: (0..count).map(|_| Stripe::new()).collect(),
            mask: count - 1,
        }
    }

    /// Offers a key hash to the calling thread's stripe.
    ///
    /// Hot-path call site: one CAS and one store, no mutex.
    #[inline]
    pub(crate) fn offer(&self, h: u64) -> OfferResult {
        let ticket = THREAD_TICKET.with(|t| *t);
        self.stripes[ticket & self.mask].offer(h)
    }

    /// Returns `true` if any stripe has reached capacity, signalling that a
    /// drain should happen soon.
    #[inline]
    pub(crate) fn should_drain(&self) -> bool {
        self.stripes.iter().any(Stripe::is_full)
    }

    /// Drains every stripe into `out`, in stripe order.
    ///
    /// Must be called by a single thread at a time.
    pub(crate) fn drain(&self, out: &mut Vec<u64>) {
        for stripe in self.stripes.iter() {
            stripe.drain(out);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
