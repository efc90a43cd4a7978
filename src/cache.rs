use std::collections::HashMap;
use std::hash::Hash;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use ahash::{AHashMap, AHashSet, RandomState};
use parking_lot::{Condvar, Mutex};
use tracing::warn;

use crate::buffer::read::{OfferResult, StripedReadBuffer};
use crate::buffer::write::{WriteBuffer, WriteOp};
use crate::builder::CacheBuilder;
use crate::clock::Ticker;
use crate::error::{CommitError, LoadError};
use crate::executor::Executor;
use crate::expiry::timer_wheel::TimerWheel;
use crate::expiry::ExpirationPolicy;
use crate::listener::{RemovalCause, RemovalListener};
use crate::loader::CacheLoader;
use crate::metrics::stats::{CacheStats, StatsCounter};
use crate::policy::tinylfu::WTinyLfuPolicy;
use crate::policy::{Policy, Victim};
use crate::store::sharded::{CacheEntry, EntryView, ShardedStore, TryInsertOutcome};
use crate::value::ValueHolder;
use crate::weigher::Weigher;
use crate::writer::CacheWriter;

// ---------------------------------------------------------------------------
// Internal plumbing types
// ---------------------------------------------------------------------------

/// A removal event awaiting listener delivery.
struct Notification<K, V> {
    key: K,
    value: Option<Arc<V>>,
    cause: RemovalCause,
}

/// Rendezvous point for callers coalesced onto one in-flight load.
struct Waiter<V> {
    result: Mutex<Option<Result<Arc<V>, LoadError>>>,
    done: Condvar,
}

impl<V> Waiter<V> {
    fn new() -> Self {
        Waiter {
            result: Mutex::new(None),
            done: Condvar::new(),
        }
    }
}

/// Picks the removal cause for a displaced entry: a dead entry reports why
/// it died, a live one reports `live_cause`.
fn cause_of_removal<V>(entry: &CacheEntry<V>, now: u64, live_cause: RemovalCause) -> RemovalCause {
    if entry.is_expired(now) {
        RemovalCause::Expired
    } else if entry.value.is_collected() {
        RemovalCause::Collected
    } else {
        live_cause
    }
}

// ---------------------------------------------------------------------------
// Cache interior
// ---------------------------------------------------------------------------

/// Shared interior of a [`Cache`].
pub(crate) struct Inner<K, V> {
    store: ShardedStore<K, V>,
    policy: Mutex<WTinyLfuPolicy<K>>,
    build_hasher: RandomState,
    weigher: Box<dyn Weigher<K, V>>,
    expiration: ExpirationPolicy,
    timer: Mutex<TimerWheel<K>>,
    listener: Option<Box<dyn RemovalListener<K, V>>>,
    writer: Option<Box<dyn CacheWriter<K, V>>>,
    loader: Option<Arc<dyn CacheLoader<K, V>>>,
    executor: Arc<dyn Executor>,
    ticker: Arc<dyn Ticker>,
    weak_values: bool,
    read_buffer: StripedReadBuffer,
    write_buffer: WriteBuffer<K>,
    /// The single non-reentrant maintenance lock. Held only for the length
    /// of a drain cycle and never across user callbacks.
    maintenance_lock: Mutex<()>,
    /// Collapses redundant drain schedulings into one executor job.
    drain_scheduled: AtomicBool,
    /// Identity stamps for store entries; one per write.
    stamp_seq: AtomicU64,
    /// One in-flight load per key; later callers wait here.
    pending_loads: Mutex<AHashMap<K, Arc<Waiter<V>>>>,
    /// Keys with a refresh in flight.
    refreshing: Mutex<AHashSet<K>>,
    stats: StatsCounter,
    /// Set when bookkeeping invariants are found violated; every public
    /// operation fails loudly afterwards.
    broken: AtomicBool,
}

impl<K, V> Inner<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    #[inline]
    fn now(&self) -> u64 {
        self.ticker.now()
    }

    #[inline]
    fn next_stamp(&self) -> u64 {
        self.stamp_seq.fetch_add(1, Ordering::Relaxed)
    }

    #[inline]
    fn ensure_usable(&self) {
        if self.broken.load(Ordering::Acquire) {
            panic!("cache is in a broken state after an internal invariant violation");
        }
    }

    /// Weighs an entry, falling back to 1 if the user weigher panics.
    fn weigh(&self, key: &K, value: &V) -> u64 {
        match panic::catch_unwind(AssertUnwindSafe(|| self.weigher.weigh(key, value))) {
            Ok(w) => w,
            Err(_) => {
                warn!("weigher panicked; defaulting to weight 1");
                1
            }
        }
    }

    /// Builds a store entry for `value` written at `now`.
    fn make_entry(&self, value: Arc<V>, weight: u64, now: u64, stamp: u64) -> CacheEntry<V> {
        let (access_deadline, write_deadline) = self.expiration.deadlines_at_write(now);
        CacheEntry {
            value: ValueHolder::new(value, self.weak_values),
            weight,
            written_at: now,
            stamp,
            access_deadline,
            write_deadline,
        }
    }

    /// Delivers one notification, swallowing listener panics.
    fn notify(&self, key: &K, value: Option<Arc<V>>, cause: RemovalCause) {
        if let Some(listener) = &self.listener {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                listener.on_removal(key, value, cause);
            }));
            if outcome.is_err() {
                warn!(?cause, "removal listener panicked; continuing");
            }
        }
    }

    // -----------------------------------------------------------------------
    // Maintenance coordinator
    // -----------------------------------------------------------------------

    /// Schedules a drain on the executor, collapsing duplicate requests.
    fn schedule_drain(this: &Arc<Self>) {
        if this
            .drain_scheduled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
        {
            let inner = Arc::clone(this);
            this.executor.execute(Box::new(move || {
                inner.drain_scheduled.store(false, Ordering::Release);
                Self::maintain(&inner);
            }));
        }
    }

    /// One opportunistic drain: returns immediately if another thread holds
    /// the maintenance lock (that holder absorbs the pending work).
    fn maintain(this: &Arc<Self>) {
        let notifications = {
            let Some(guard) = this.maintenance_lock.try_lock() else {
                return;
            };
            let notifications = this.run_drain_cycle();
            drop(guard);
            notifications
        };
        Self::dispatch(this, notifications);
        if !this.write_buffer.is_empty() {
            Self::schedule_drain(this);
        }
    }

    /// A guaranteed drain: blocks for the maintenance lock, then also
    /// sweeps collected weak values.
    fn force_maintain(this: &Arc<Self>) {
        let notifications = {
            let guard = this.maintenance_lock.lock();
            let mut notifications = this.run_drain_cycle();
            if this.weak_values {
                for key in this.store.sweep_collected() {
                    {
                        let mut policy = this.policy.lock();
                        policy.on_remove(&key);
                    }
                    this.timer.lock().cancel(&key);
                    this.stats.record_eviction(0);
                    notifications.push(Notification {
                        key,
                        value: None,
                        cause: RemovalCause::Collected,
                    });
                }
            }
            drop(guard);
            notifications
        };
        Self::dispatch(this, notifications);
        if !this.write_buffer.is_empty() {
            Self::schedule_drain(this);
        }
    }

    /// The drain cycle: replay reads, apply writes, evict to capacity,
    /// expire due entries. Caller holds the maintenance lock.
    fn run_drain_cycle(&self) -> Vec<Notification<K, V>> {
        let now = self.now();
        let mut notifications = Vec::new();

        let mut hashes: Vec<u64> = Vec::new();
        self.read_buffer.drain(&mut hashes);
        let mut ops: Vec<WriteOp<K>> = Vec::new();
        self.write_buffer.drain(&mut ops);

        let timer_expired: Vec<K> = if self.expiration.expires() {
            let mut timer = self.timer.lock();
            if timer.len() > 0 {
                timer.advance(now)
            } else {
                Vec::new()
            }
        } else {
            Vec::new()
        };

        if hashes.is_empty() && ops.is_empty() && timer_expired.is_empty() {
            return notifications;
        }

        let mut victims: Vec<Victim<K>> = Vec::new();
        {
            let mut policy = self.policy.lock();

            for h in hashes {
                policy.on_access_hash(h);
            }

            {
                let mut timer = self.timer.lock();
                for op in ops {
                    self.apply_op(&mut policy, &mut timer, op, &mut victims);
                }
            }

            // Entries the wheel says are due. The removal is conditional on
            // the deadline still being past, so a rewrite that happened
            // after the wheel fired survives untouched.
            for key in timer_expired {
                if let Some(entry) = self.store.remove_if_expired(&key, now) {
                    policy.on_remove(&key);
                    self.stats.record_eviction(entry.weight);
                    notifications.push(Notification {
                        value: entry.value.get(),
                        key,
                        cause: RemovalCause::Expired,
                    });
                }
            }

            #[cfg(debug_assertions)]
            if let Err(e) = policy.check_invariants() {
                self.broken.store(true, Ordering::Release);
                warn!(error = %e, "cache bookkeeping is inconsistent; marking the cache broken");
            }
        }

        notifications.extend(self.commit_victims(victims));
        notifications
    }

    /// Applies one deferred write to the policy and the timer wheel.
    fn apply_op(
        &self,
        policy: &mut WTinyLfuPolicy<K>,
        timer: &mut TimerWheel<K>,
        op: WriteOp<K>,
        victims: &mut Vec<Victim<K>>,
    ) {
        match op {
            WriteOp::Add {
                key,
                weight,
                stamp,
                deadline,
            } => {
                if let Some(d) = deadline {
                    timer.schedule(key.clone(), d);
                }
                victims.extend(policy.on_insert(key, weight, stamp));
            }
            WriteOp::Update {
                key,
                new_weight,
                stamp,
                deadline,
            } => {
                if let Some(d) = deadline {
                    timer.schedule(key.clone(), d);
                }
                victims.extend(policy.on_update(&key, new_weight, stamp));
            }
            WriteOp::Remove { key } => {
                timer.cancel(&key);
                policy.on_remove(&key);
            }
            WriteOp::Reschedule { key, deadline } => {
                timer.schedule(key, deadline);
            }
        }
    }

    /// Commits the policy's eviction decisions to the store, conditional on
    /// the identity stamp, and gathers the notifications.
    fn commit_victims(&self, victims: Vec<Victim<K>>) -> Vec<Notification<K, V>> {
        let mut notifications = Vec::new();
        for Victim { key, weight, stamp } in victims {
            if let Some(entry) = self.store.remove_if_stamp(&key, stamp) {
                self.stats.record_eviction(weight);
                notifications.push(Notification {
                    value: entry.value.get(),
                    key,
                    cause: RemovalCause::Size,
                });
            }
        }
        notifications
    }

    /// Hands a batch of notifications to the executor as one ordered job.
    fn dispatch(this: &Arc<Self>, notifications: Vec<Notification<K, V>>) {
        if notifications.is_empty() || this.listener.is_none() {
            return;
        }
        let inner = Arc::clone(this);
        this.executor.execute(Box::new(move || {
            for n in notifications {
                inner.notify(&n.key, n.value, n.cause);
            }
        }));
    }

    /// Enqueues a write op, assisting with a synchronous drain when the
    /// buffer is full (write ops must never be dropped).
    fn push_write(this: &Arc<Self>, op: WriteOp<K>) {
        match this.write_buffer.push(op) {
            Ok(()) => Self::schedule_drain(this),
            Err(op) => {
                let notifications = {
                    let guard = this.maintenance_lock.lock();
                    let mut notifications = this.run_drain_cycle();
                    let mut victims = Vec::new();
                    {
                        let mut policy = this.policy.lock();
                        let mut timer = this.timer.lock();
                        this.apply_op(&mut policy, &mut timer, op, &mut victims);
                    }
                    notifications.extend(this.commit_victims(victims));
                    drop(guard);
                    notifications
                };
                Self::dispatch(this, notifications);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Write commit paths (shared by put, loads, and refresh)
    // -----------------------------------------------------------------------

    /// Stores `value` for `key` unconditionally, returning the shared
    /// handle. Fires a `Replaced` (or dead-cause) notification when a
    /// previous entry was displaced.
    fn insert_value(this: &Arc<Self>, key: K, value: V) -> Arc<V> {
        let now = this.now();
        let stamp = this.next_stamp();
        let weight = this.weigh(&key, &value);
        let arc = Arc::new(value);
        let entry = this.make_entry(Arc::clone(&arc), weight, now, stamp);
        let deadline = entry.deadline();

        match this.store.insert(key.clone(), entry) {
            Some(old) => {
                let cause = cause_of_removal(&old, now, RemovalCause::Replaced);
                if cause.was_evicted() {
                    this.stats.record_eviction(old.weight);
                }
                this.notify(&key, old.value.get(), cause);
                Self::push_write(
                    this,
                    WriteOp::Update {
                        key,
                        new_weight: weight,
                        stamp,
                        deadline,
                    },
                );
            }
            None => {
                Self::push_write(
                    this,
                    WriteOp::Add {
                        key,
                        weight,
                        stamp,
                        deadline,
                    },
                );
            }
        }
        arc
    }

    /// Lands a refresh result: replaces the value only if the entry is
    /// still the incarnation the refresh was started against, otherwise
    /// drops it silently (the key was rewritten or invalidated meanwhile).
    fn apply_refresh(this: &Arc<Self>, key: K, value: V, expected_stamp: u64) {
        let now = this.now();
        let stamp = this.next_stamp();
        let weight = this.weigh(&key, &value);
        let entry = this.make_entry(Arc::new(value), weight, now, stamp);
        let deadline = entry.deadline();

        if let Some(old) = this.store.replace_if_stamp(&key, expected_stamp, entry) {
            this.notify(&key, old.value.get(), RemovalCause::Replaced);
            Self::push_write(
                this,
                WriteOp::Update {
                    key,
                    new_weight: weight,
                    stamp,
                    deadline,
                },
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Cache handle
// ---------------------------------------------------------------------------

/// A bounded concurrent in-memory cache with W-TinyLFU admission.
///
/// Handles are cheap to clone and share one interior.
///
/// # Example
/// ```
/// let cache: cortado::Cache<String, String> = cortado::CacheBuilder::new(100).build();
/// cache.put("hello".to_string(), "world".to_string());
/// assert_eq!(
///     cache.get_if_present(&"hello".to_string()),
///     Some(std::sync::Arc::new("world".to_string()))
/// );
/// ```
pub struct Cache<K, V> {
    inner: Arc<Inner<K, V>>,
}

impl<K, V> std::fmt::Debug for Cache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache").finish_non_exhaustive()
    }
}

impl<K, V> Clone for Cache<K, V> {
    fn clone(&self) -> Self {
        Cache {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> Cache<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    pub(crate) fn from_builder(b: CacheBuilder<K, V>) -> Self {
        let hasher = RandomState::new();
        let policy = WTinyLfuPolicy::with_hasher(b.max_weight, hasher.clone());
        Cache {
            inner: Arc::new(Inner {
                store: ShardedStore::new(b.num_shards, hasher.clone()),
                policy: Mutex::new(policy),
                build_hasher: hasher,
                weigher: b.weigher,
                expiration: b.expiration,
                timer: Mutex::new(TimerWheel::new(b.ticker.now())),
                listener: b.listener,
                writer: b.writer,
                loader: b.loader,
                executor: b.executor,
                ticker: b.ticker,
                weak_values: b.weak_values,
                read_buffer: StripedReadBuffer::new(),
                write_buffer: WriteBuffer::new(),
                maintenance_lock: Mutex::new(()),
                drain_scheduled: AtomicBool::new(false),
                stamp_seq: AtomicU64::new(1),
                pending_loads: Mutex::new(AHashMap::new()),
                refreshing: Mutex::new(AHashSet::new()),
                stats: StatsCounter::new(b.record_stats),
                broken: AtomicBool::new(false),
            }),
        }
    }

    /// Returns a [`CacheBuilder`] for constructing a new cache.
    pub fn builder(max_weight: u64) -> CacheBuilder<K, V> {
        CacheBuilder::new(max_weight)
    }

    // -----------------------------------------------------------------------
    // Hot path: reads
    // -----------------------------------------------------------------------

    /// Returns the value for `key` if a live entry exists, without loading.
    pub fn get_if_present(&self, key: &K) -> Option<Arc<V>> {
        self.inner.ensure_usable();
        let now = self.inner.now();

        let Some(view) = self.inner.store.view(key) else {
            self.inner.stats.record_miss();
            return None;
        };

        let Some(value) = view.value.clone() else {
            // The weakly held value is gone: treat as absent and retire the
            // corpse.
            if self.inner.store.remove_if_collected(key).is_some() {
                self.inner.stats.record_eviction(view.weight);
                self.inner.notify(key, None, RemovalCause::Collected);
                Inner::push_write(&self.inner, WriteOp::Remove { key: key.clone() });
            }
            self.inner.stats.record_miss();
            return None;
        };

        if let Some(deadline) = view.deadline {
            if now >= deadline {
                // Lazy expiration on the read path; the timer wheel would
                // catch it eventually, but readers must not observe it.
                if let Some(entry) = self.inner.store.remove_if_expired(key, now) {
                    self.inner.stats.record_eviction(entry.weight);
                    self.inner.notify(key, entry.value.get(), RemovalCause::Expired);
                    Inner::push_write(&self.inner, WriteOp::Remove { key: key.clone() });
                }
                self.inner.stats.record_miss();
                return None;
            }
        }

        self.inner.stats.record_hit();

        // Record the read; never block on maintenance.
        let h = self.inner.build_hasher.hash_one(key);
        match self.inner.read_buffer.offer(h) {
            OfferResult::Full => Inner::schedule_drain(&self.inner),
            OfferResult::Added => {
                if self.inner.read_buffer.should_drain() {
                    Inner::schedule_drain(&self.inner);
                }
            }
            OfferResult::Failed => {}
        }

        // Expire-after-access: push the deadline out and relocate the
        // entry in the timer wheel asynchronously.
        if let Some(tta) = self.inner.expiration.after_access {
            let new_access = now + tta.as_nanos() as u64;
            self.inner.store.update_access_deadline(key, new_access);
            let wheel_deadline = match view.write_deadline {
                Some(w) => new_access.min(w),
                None => new_access,
            };
            Inner::push_write(
                &self.inner,
                WriteOp::Reschedule {
                    key: key.clone(),
                    deadline: wheel_deadline,
                },
            );
        }

        self.maybe_refresh(key, &value, &view, now);

        Some(value)
    }

    /// `true` if a live entry exists for `key`. Does not count as an
    /// access.
    pub fn contains_key(&self, key: &K) -> bool {
        self.inner.store.contains(key, self.inner.now())
    }

    // -----------------------------------------------------------------------
    // Hot path: writes
    // -----------------------------------------------------------------------

    /// Inserts `value` for `key`, replacing any previous value. Returns the
    /// shared handle to the inserted value (with weak values enabled, the
    /// returned `Arc` is what keeps the entry alive).
    ///
    /// # Panics
    /// Panics if a configured write-through sink rejects the operation; use
    /// [`try_put`](Cache::try_put) to handle that case.
    pub fn put(&self, key: K, value: V) -> Arc<V> {
        match self.try_put(key, value) {
            Ok(arc) => arc,
            Err(e) => panic!("{e}"),
        }
    }

    /// Inserts `value` for `key` after offering it to the write-through
    /// sink. A sink failure aborts the insert and leaves the cache
    /// unchanged.
    pub fn try_put(&self, key: K, value: V) -> Result<Arc<V>, CommitError> {
        self.inner.ensure_usable();
        if let Some(writer) = &self.inner.writer {
            writer.write(&key, &value)?;
        }
        Ok(Inner::insert_value(&self.inner, key, value))
    }

    /// Inserts every entry of `entries` in iteration order.
    pub fn put_all<I>(&self, entries: I)
    where
        I: IntoIterator<Item = (K, V)>,
    {
        for (key, value) in entries {
            self.put(key, value);
        }
    }

    /// Inserts `value` only if no live mapping exists. Returns the present
    /// value when the insert was declined.
    pub fn put_if_absent(&self, key: K, value: V) -> Option<Arc<V>> {
        self.inner.ensure_usable();
        let now = self.inner.now();
        let stamp = self.inner.next_stamp();
        let weight = self.inner.weigh(&key, &value);
        let entry = self
            .inner
            .make_entry(Arc::new(value), weight, now, stamp);
        let deadline = entry.deadline();

        match self.inner.store.try_insert(key.clone(), entry, now) {
            TryInsertOutcome::Present(existing) => Some(existing),
            TryInsertOutcome::Inserted(displaced) => {
                match displaced {
                    Some(old) => {
                        let cause = cause_of_removal(&old, now, RemovalCause::Replaced);
                        if cause.was_evicted() {
                            self.inner.stats.record_eviction(old.weight);
                        }
                        self.inner.notify(&key, old.value.get(), cause);
                        Inner::push_write(
                            &self.inner,
                            WriteOp::Update {
                                key,
                                new_weight: weight,
                                stamp,
                                deadline,
                            },
                        );
                    }
                    None => {
                        Inner::push_write(
                            &self.inner,
                            WriteOp::Add {
                                key,
                                weight,
                                stamp,
                                deadline,
                            },
                        );
                    }
                }
                None
            }
        }
    }

    /// Replaces the value for `key` only if a live mapping exists. Returns
    /// the previous value on success.
    pub fn replace(&self, key: &K, value: V) -> Option<Arc<V>> {
        self.inner.ensure_usable();
        let now = self.inner.now();
        let stamp = self.inner.next_stamp();
        let weight = self.inner.weigh(key, &value);
        let entry = self.inner.make_entry(Arc::new(value), weight, now, stamp);
        let deadline = entry.deadline();

        let old = self.inner.store.replace(key, entry, now)?;
        let old_value = old.value.get();
        self.inner
            .notify(key, old_value.clone(), RemovalCause::Replaced);
        Inner::push_write(
            &self.inner,
            WriteOp::Update {
                key: key.clone(),
                new_weight: weight,
                stamp,
                deadline,
            },
        );
        old_value
    }

    /// Replaces the value for `key` only if the current value equals
    /// `expected`. Returns `true` on success.
    pub fn replace_if(&self, key: &K, expected: &V, value: V) -> bool
    where
        V: PartialEq,
    {
        self.inner.ensure_usable();
        let now = self.inner.now();
        let stamp = self.inner.next_stamp();
        let weight = self.inner.weigh(key, &value);
        let entry = self.inner.make_entry(Arc::new(value), weight, now, stamp);
        let deadline = entry.deadline();

        match self.inner.store.replace_if(key, expected, entry, now) {
            Some(old) => {
                self.inner.notify(key, old.value.get(), RemovalCause::Replaced);
                Inner::push_write(
                    &self.inner,
                    WriteOp::Update {
                        key: key.clone(),
                        new_weight: weight,
                        stamp,
                        deadline,
                    },
                );
                true
            }
            None => false,
        }
    }

    /// Applies an atomic per-key transformation. `f` sees the current live
    /// value (if any) and returns the new value, or `None` to remove the
    /// mapping. Returns the value present after the call.
    ///
    /// `f` runs under the key's shard lock: keep it short and do not touch
    /// the cache from inside it. The write-through sink is not consulted.
    pub fn compute<F>(&self, key: K, f: F) -> Option<Arc<V>>
    where
        F: FnOnce(Option<&Arc<V>>) -> Option<V>,
    {
        self.inner.ensure_usable();
        let now = self.inner.now();
        let stamp = self.inner.next_stamp();
        let inner = &self.inner;

        struct Commit<K, V> {
            result: Option<Arc<V>>,
            removed: Option<(Option<Arc<V>>, RemovalCause, u64)>,
            op: Option<WriteOp<K>>,
        }

        let commit = inner.store.compute_slot(&key, |map| {
            let current: Option<Arc<V>> = map
                .get(&key)
                .and_then(|e| if e.is_live(now) { e.value.get() } else { None });

            match f(current.as_ref()) {
                Some(new_value) => {
                    let weight = inner.weigh(&key, &new_value);
                    let arc = Arc::new(new_value);
                    let entry = inner.make_entry(Arc::clone(&arc), weight, now, stamp);
                    let deadline = entry.deadline();
                    let old = map.insert(key.clone(), entry);
                    let removed = old.map(|o| {
                        let cause = cause_of_removal(&o, now, RemovalCause::Replaced);
                        (o.value.get(), cause, o.weight)
                    });
                    let op = if removed.is_some() {
                        WriteOp::Update {
                            key: key.clone(),
                            new_weight: weight,
                            stamp,
                            deadline,
                        }
                    } else {
                        WriteOp::Add {
                            key: key.clone(),
                            weight,
                            stamp,
                            deadline,
                        }
                    };
                    Commit {
                        result: Some(arc),
                        removed,
                        op: Some(op),
                    }
                }
                None => match map.remove(&key) {
                    Some(old) => {
                        let cause = cause_of_removal(&old, now, RemovalCause::Explicit);
                        Commit {
                            result: None,
                            removed: Some((old.value.get(), cause, old.weight)),
                            op: Some(WriteOp::Remove { key: key.clone() }),
                        }
                    }
                    None => Commit {
                        result: None,
                        removed: None,
                        op: None,
                    },
                },
            }
        });

        if let Some((old_value, cause, old_weight)) = commit.removed {
            if cause.was_evicted() {
                self.inner.stats.record_eviction(old_weight);
            }
            self.inner.notify(&key, old_value, cause);
        }
        if let Some(op) = commit.op {
            Inner::push_write(&self.inner, op);
        }
        commit.result
    }

    // -----------------------------------------------------------------------
    // Removal
    // -----------------------------------------------------------------------

    /// Removes the entry for `key`, returning its value if a live mapping
    /// was removed.
    ///
    /// # Panics
    /// Panics if a configured write-through sink rejects the delete; use
    /// [`try_invalidate`](Cache::try_invalidate) to handle that case.
    pub fn invalidate(&self, key: &K) -> Option<Arc<V>> {
        match self.try_invalidate(key) {
            Ok(value) => value,
            Err(e) => panic!("{e}"),
        }
    }

    /// Removes the entry for `key` after offering the delete to the
    /// write-through sink. A sink failure aborts the removal.
    pub fn try_invalidate(&self, key: &K) -> Result<Option<Arc<V>>, CommitError> {
        self.inner.ensure_usable();
        if let Some(writer) = &self.inner.writer {
            writer.delete(key)?;
        }
        let now = self.inner.now();
        match self.inner.store.remove(key) {
            Some(entry) => {
                let value = entry.value.get();
                let cause = cause_of_removal(&entry, now, RemovalCause::Explicit);
                if cause.was_evicted() {
                    self.inner.stats.record_eviction(entry.weight);
                }
                self.inner.notify(key, value.clone(), cause);
                Inner::push_write(&self.inner, WriteOp::Remove { key: key.clone() });
                if cause == RemovalCause::Explicit {
                    Ok(value)
                } else {
                    // The mapping was already dead; the caller removed
                    // nothing observable.
                    Ok(None)
                }
            }
            None => Ok(None),
        }
    }

    /// Removes the entry for `key` only if the current value equals
    /// `expected`. Returns `true` on success. The write-through sink is
    /// not consulted.
    pub fn invalidate_if_equals(&self, key: &K, expected: &V) -> bool
    where
        V: PartialEq,
    {
        self.inner.ensure_usable();
        let now = self.inner.now();
        match self.inner.store.remove_if_value(key, expected, now) {
            Some(entry) => {
                self.inner
                    .notify(key, entry.value.get(), RemovalCause::Explicit);
                Inner::push_write(&self.inner, WriteOp::Remove { key: key.clone() });
                true
            }
            None => false,
        }
    }

    /// Removes every entry. Weakly consistent under concurrent writes:
    /// entries inserted while the sweep runs may survive.
    ///
    /// With a write-through sink configured, keys whose delete is rejected
    /// are logged and left in place.
    pub fn invalidate_all(&self) {
        self.inner.ensure_usable();
        if self.inner.writer.is_none() && self.inner.listener.is_none() {
            self.inner.store.clear();
        } else {
            for key in self.inner.store.keys() {
                if let Some(writer) = &self.inner.writer {
                    if let Err(e) = writer.delete(&key) {
                        warn!(error = %e, "write-through delete failed; keeping the entry");
                        continue;
                    }
                }
                if let Some(entry) = self.inner.store.remove(&key) {
                    self.inner
                        .notify(&key, entry.value.get(), RemovalCause::Explicit);
                }
            }
        }

        // Reset the policy state wholesale rather than replaying removals.
        let guard = self.inner.maintenance_lock.lock();
        let mut ops = Vec::new();
        self.inner.write_buffer.drain(&mut ops);
        drop(ops);
        let mut hashes = Vec::new();
        self.inner.read_buffer.drain(&mut hashes);
        drop(hashes);
        let max = self.inner.policy.lock().max_weight();
        *self.inner.policy.lock() =
            WTinyLfuPolicy::with_hasher(max, self.inner.build_hasher.clone());
        *self.inner.timer.lock() = TimerWheel::new(self.inner.now());
        drop(guard);
    }

    // -----------------------------------------------------------------------
    // Loading
    // -----------------------------------------------------------------------

    /// Returns the value for `key`, loading it through the configured
    /// loader on a miss. Concurrent callers for the same key share one
    /// load.
    pub fn get(&self, key: &K) -> Result<Arc<V>, LoadError> {
        let Some(loader) = self.inner.loader.clone() else {
            return Err(LoadError::no_loader());
        };
        self.load_or_wait(key.clone(), move |k| loader.load(k))
    }

    /// Returns the value for `key`, computing it with `init` on a miss.
    /// Concurrent callers for the same key share one computation.
    ///
    /// # Panics
    /// Panics if `init` (or the coalesced computation another thread is
    /// running) panics.
    pub fn get_with<F>(&self, key: K, init: F) -> Arc<V>
    where
        F: FnOnce(&K) -> V,
    {
        match self.load_or_wait(key, |k| Ok(init(k))) {
            Ok(value) => value,
            Err(e) => panic!("{e}"),
        }
    }

    /// Fallible form of [`get_with`](Cache::get_with): a failed computation
    /// caches nothing and every coalesced caller observes the error.
    pub fn try_get_with<F>(&self, key: K, init: F) -> Result<Arc<V>, LoadError>
    where
        F: FnOnce(&K) -> Result<V, LoadError>,
    {
        self.load_or_wait(key, init)
    }

    /// Returns the values for `keys`, bulk-loading the misses through the
    /// configured loader. Extra entries the loader returns are cached but
    /// not included in the result.
    pub fn get_all<I>(&self, keys: I) -> Result<HashMap<K, Arc<V>>, LoadError>
    where
        I: IntoIterator<Item = K>,
    {
        let Some(loader) = self.inner.loader.clone() else {
            return Err(LoadError::no_loader());
        };

        let mut found = HashMap::new();
        let mut missing: Vec<K> = Vec::new();
        let mut requested: AHashSet<K> = AHashSet::new();
        for key in keys {
            if !requested.insert(key.clone()) {
                continue;
            }
            match self.get_if_present(&key) {
                Some(value) => {
                    found.insert(key, value);
                }
                None => missing.push(key),
            }
        }

        if !missing.is_empty() {
            let started = Instant::now();
            match loader.load_all(&missing) {
                Ok(loaded) => {
                    self.inner.stats.record_load_success(started.elapsed());
                    for (key, value) in loaded {
                        let arc = Inner::insert_value(&self.inner, key.clone(), value);
                        if requested.contains(&key) {
                            found.insert(key, arc);
                        }
                    }
                }
                Err(e) => {
                    self.inner.stats.record_load_failure(started.elapsed());
                    return Err(e);
                }
            }
        }
        Ok(found)
    }

    /// The coalescing core: at most one load runs per key; every other
    /// caller parks on the waiter and shares the outcome.
    fn load_or_wait<F>(&self, key: K, load: F) -> Result<Arc<V>, LoadError>
    where
        F: FnOnce(&K) -> Result<V, LoadError>,
    {
        self.inner.ensure_usable();
        if let Some(value) = self.get_if_present(&key) {
            return Ok(value);
        }

        enum Role<V> {
            Loader,
            Waiter(Arc<Waiter<V>>),
        }

        let role = {
            let mut pending = self.inner.pending_loads.lock();
            match pending.get(&key) {
                Some(waiter) => Role::Waiter(Arc::clone(waiter)),
                None => {
                    let waiter = Arc::new(Waiter::new());
                    pending.insert(key.clone(), Arc::clone(&waiter));
                    Role::Loader
                }
            }
        };

        match role {
            Role::Waiter(waiter) => {
                let mut slot = waiter.result.lock();
                loop {
                    if let Some(result) = &*slot {
                        return result.clone();
                    }
                    waiter.done.wait(&mut slot);
                }
            }
            Role::Loader => {
                // Someone may have finished a load between the lookup and
                // our registration; don't load twice.
                let now = self.inner.now();
                if let Some(view) = self.inner.store.view(&key) {
                    if !matches!(view.deadline, Some(d) if now >= d) {
                        if let Some(value) = view.value {
                            self.finish_load(&key, Ok(Arc::clone(&value)));
                            return Ok(value);
                        }
                    }
                }

                let started = Instant::now();
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| load(&key)));
                let result = match outcome {
                    Ok(Ok(value)) => {
                        self.inner.stats.record_load_success(started.elapsed());
                        Ok(Inner::insert_value(&self.inner, key.clone(), value))
                    }
                    Ok(Err(e)) => {
                        self.inner.stats.record_load_failure(started.elapsed());
                        Err(e)
                    }
                    Err(payload) => {
                        self.inner.stats.record_load_failure(started.elapsed());
                        self.finish_load(&key, Err(LoadError::panicked()));
                        panic::resume_unwind(payload);
                    }
                };
                self.finish_load(&key, result.clone());
                result
            }
        }
    }

    /// Publishes a load outcome and wakes every coalesced caller.
    fn finish_load(&self, key: &K, result: Result<Arc<V>, LoadError>) {
        if let Some(waiter) = self.inner.pending_loads.lock().remove(key) {
            *waiter.result.lock() = Some(result);
            waiter.done.notify_all();
        }
    }

    /// Triggers an asynchronous reload when the entry has aged past the
    /// refresh point. At most one refresh per key is in flight; readers
    /// keep getting the current value until the reload lands.
    fn maybe_refresh(&self, key: &K, value: &Arc<V>, view: &EntryView<V>, now: u64) {
        let Some(refresh_at) = self.inner.expiration.refresh_at(view.written_at) else {
            return;
        };
        if now < refresh_at {
            return;
        }
        let Some(loader) = self.inner.loader.clone() else {
            return;
        };
        if !self.inner.refreshing.lock().insert(key.clone()) {
            return;
        }

        let inner = Arc::clone(&self.inner);
        let key = key.clone();
        let old_value = Arc::clone(value);
        let expected_stamp = view.stamp;
        self.inner.executor.execute(Box::new(move || {
            let started = Instant::now();
            let outcome =
                panic::catch_unwind(AssertUnwindSafe(|| loader.reload(&key, &old_value)));
            match outcome {
                Ok(Ok(new_value)) => {
                    inner.stats.record_load_success(started.elapsed());
                    Inner::apply_refresh(&inner, key.clone(), new_value, expected_stamp);
                }
                Ok(Err(e)) => {
                    inner.stats.record_load_failure(started.elapsed());
                    warn!(error = %e, "refresh reload failed; keeping the stale value");
                }
                Err(_) => {
                    inner.stats.record_load_failure(started.elapsed());
                    warn!("refresh reload panicked; keeping the stale value");
                }
            }
            inner.refreshing.lock().remove(&key);
        }));
    }

    // -----------------------------------------------------------------------
    // Maintenance & introspection
    // -----------------------------------------------------------------------

    /// Runs a full drain cycle synchronously: applies buffered reads and
    /// writes, evicts to capacity, processes due expirations, and (with
    /// weak values) sweeps collected entries.
    pub fn clean_up(&self) {
        self.inner.ensure_usable();
        Inner::force_maintain(&self.inner);
    }

    /// A point-in-time snapshot of the statistics counters.
    pub fn stats(&self) -> CacheStats {
        self.inner.stats.snapshot()
    }

    /// Estimated number of entries, including entries whose removal has
    /// not drained yet.
    pub fn entry_count(&self) -> usize {
        self.inner.store.len()
    }

    /// Total weight currently tracked by the eviction policy.
    pub fn weighted_size(&self) -> u64 {
        self.inner.policy.lock().current_weight()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.store.is_empty()
    }

    /// Snapshot of every live `(key, value)` pair. Weakly consistent.
    pub fn entries(&self) -> Vec<(K, Arc<V>)> {
        self.inner.store.entries(self.inner.now())
    }

    /// Access to the eviction policy's inspection and tuning surface.
    pub fn policy(&self) -> PolicyView<'_, K, V> {
        PolicyView { cache: self }
    }
}

// ---------------------------------------------------------------------------
// PolicyView
// ---------------------------------------------------------------------------

/// Inspection and tuning surface for a cache's eviction policy, obtained
/// from [`Cache::policy`].
pub struct PolicyView<'a, K, V> {
    cache: &'a Cache<K, V>,
}

impl<K, V> PolicyView<'_, K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// The maximum total weight.
    pub fn maximum(&self) -> u64 {
        self.cache.inner.policy.lock().max_weight()
    }

    /// Re-bounds the cache, evicting (with cause `Size`) until the new
    /// maximum is respected.
    pub fn set_maximum(&self, max: u64) {
        let inner = &self.cache.inner;
        inner.ensure_usable();
        let notifications = {
            let guard = inner.maintenance_lock.lock();
            let victims = inner.policy.lock().set_max_weight(max);
            let notifications = inner.commit_victims(victims);
            drop(guard);
            notifications
        };
        Inner::dispatch(inner, notifications);
    }

    /// Up to `n` entries in eviction order, likeliest victim first.
    pub fn coldest(&self, n: usize) -> Vec<(K, Arc<V>)> {
        self.cache.clean_up();
        let keys = self.cache.inner.policy.lock().coldest(n);
        self.materialize(keys)
    }

    /// Up to `n` entries in retention order, most protected first.
    pub fn hottest(&self, n: usize) -> Vec<(K, Arc<V>)> {
        self.cache.clean_up();
        let keys = self.cache.inner.policy.lock().hottest(n);
        self.materialize(keys)
    }

    fn materialize(&self, keys: Vec<K>) -> Vec<(K, Arc<V>)> {
        keys.into_iter()
            .filter_map(|k| {
                self.cache
                    .inner
                    .store
                    .view(&k)
                    .and_then(|view| view.value)
                    .map(|v| (k, v))
            })
            .collect()
    }
}
