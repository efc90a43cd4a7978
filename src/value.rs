//! Value holder — strong or weak ownership of a cached value.
//!
//! With the default strong holder the cache keeps the value alive. With
//! weak values (`CacheBuilder::weak_values`) the cache holds only a
//! `std::sync::Weak`; the value stays cached for as long as some `Arc`
//! handed out by `put`/`get` is still alive. Once the last strong
//! reference drops, the holder presents as absent and the entry is removed
//! with cause `Collected` the next time it is touched or swept.

use std::sync::{Arc, Weak};

/// Ownership wrapper around a cached value.
pub(crate) enum ValueHolder<V> {
    Strong(Arc<V>),
    Weak(Weak<V>),
}

impl<V> ValueHolder<V> {
    /// Wraps `value` with the strength selected at build time.
    pub(crate) fn new(value: Arc<V>, weak: bool) -> Self {
        if weak {
            ValueHolder::Weak(Arc::downgrade(&value))
        } else {
            ValueHolder::Strong(value)
        }
    }

    /// Returns a strong handle to the value, or `None` if a weak value has
    /// been reclaimed.
    #[inline]
    pub(crate) fn get(&self) -> Option<Arc<V>> {
        match self {
            ValueHolder::Strong(v) => Some(Arc::clone(v)),
            ValueHolder::Weak(w) => w.upgrade(),
        }
    }

    /// Returns `true` if a weak value has been reclaimed.
    #[inline]
    pub(crate) fn is_collected(&self) -> bool {
        match self {
            ValueHolder::Strong(_) => false,
            ValueHolder::Weak(w) => w.strong_count() == 0,
        }
    }

    /// Compares the held value against `other`. A collected holder equals
    /// nothing.
    pub(crate) fn value_eq(&self, other: &V) -> bool
    where
        V: PartialEq,
    {
        match self.get() {
            Some(v) => *v == *other,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strong_holder_keeps_the_value_alive() {
        let holder = ValueHolder::new(Arc::new(7u64), false);
        assert!(!holder.is_collected());
        assert_eq!(*holder.get().unwrap(), 7);
    }

    #[test]
    fn weak_holder_dies_with_the_last_arc() {
        let value = Arc::new(String::from("v"));
        let holder = ValueHolder::new(Arc::clone(&value), true);
        assert!(holder.get().is_some());
        drop(value);
        assert!(holder.is_collected());
        assert!(holder.get().is_none());
    }

    #[test]
    fn value_eq_ignores_collected_holders() {
        let value = Arc::new(3u64);
        let holder = ValueHolder::new(Arc::clone(&value), true);
        assert!(holder.value_eq(&3));
        drop(value);
        assert!(!holder.value_eq(&3));
    }
}
