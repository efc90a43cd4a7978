//! Bounded MPSC write buffer backed by a lock-free `ArrayQueue`.
//!
//! Structural consequences of writes (queue placement, weight accounting,
//! expiration scheduling) are deferred through this buffer so the hot write
//! path never takes the policy lock. A maintenance pass drains the queue
//! and applies all pending operations under a single lock acquisition.
//!
//! Unlike the read buffer, this queue is lossless: write operations drive
//! capacity accounting and must never be dropped. When the queue is full,
//! `push` hands the operation back as `Err(op)` and the producer assists by
//! running a drain inline.

use crossbeam_queue::ArrayQueue;

/// Bounded capacity of the write queue.
const WRITE_BUFFER_CAPACITY: usize = 128;

/// Operations deferred for policy maintenance.
///
/// `stamp` is the identity of the entry incarnation the operation refers
/// to (its `written_at` nanos); eviction decisions carry it back so the
/// store removal can be made conditional.
pub(crate) enum WriteOp<K> {
    Add {
        key: K,
        weight: u64,
        stamp: u64,
        /// Effective expiration deadline, if the entry has one.
        deadline: Option<u64>,
    },
    Update {
        key: K,
        new_weight: u64,
        stamp: u64,
        deadline: Option<u64>,
    },
    Remove {
        key: K,
    },
    /// An entry with expire-after-access was read; relocate it in the
    /// timer wheel. Does not change weight or queue position.
    Reschedule {
        key: K,
        deadline: u64,
    },
}

/// Bounded MPSC write buffer.
///
/// Multiple producer threads may call [`push`] concurrently. A single
/// consumer (the maintenance pass) drains the queue via [`drain`].
///
/// [`push`]: WriteBuffer::push
/// [`drain`]: WriteBuffer::drain
pub(crate) struct WriteBuffer<K> {
    queue: ArrayQueue<WriteOp<K>>,
}

impl<K: Send> WriteBuffer<K> {
    pub(crate) fn new() -> Self {
        WriteBuffer {
            queue: ArrayQueue::new(WRITE_BUFFER_CAPACITY),
        }
    }

    /// Enqueues `op`.
    ///
    /// Returns `Err(op)` when the queue is full. The caller **must not
    /// drop** a returned `Err`; it applies the op inline instead.
    #[inline]
    pub(crate) fn push(&self, op: WriteOp<K>) -> Result<(), WriteOp<K>> {
        self.queue.push(op)
    }

    /// Returns `true` when operations are waiting to be applied.
    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Drains all pending operations into `out`.
    ///
    /// Called exclusively from the maintenance pass.
    pub(crate) fn drain(&self, out: &mut Vec<WriteOp<K>>) {
        while let Some(op) = self.queue.pop() {
            out.push(op);
        }
    }
}
