//! Atomically replaceable shared state.
//!
//! A [`Snapshot`] holds an `Arc<T>` that readers clone out and use for as
//! long as they like. Writers build a complete new value and swap it in, so
//! a reader never sees a half-applied update and a request that loaded a
//! snapshot keeps a consistent view even if the value is replaced mid-flight.

use std::sync::{Arc, RwLock};

/// Shared value replaced as a whole.
#[derive(Debug)]
pub struct Snapshot<T> {
    inner: RwLock<Arc<T>>,
}

impl<T> Snapshot<T> {
    /// Create a snapshot holding `value`.
    pub fn new(value: T) -> Self {
        Self {
            inner: RwLock::new(Arc::new(value)),
        }
    }

    /// Current value.
    ///
    /// The lock is held only long enough to clone the `Arc`.
    pub fn load(&self) -> Arc<T> {
        // A poisoned lock still holds a complete value, since writers only swap Arcs.
        let guard = self.inner.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    /// Replace the value, returning the previous one.
    pub fn store(&self, value: T) -> Arc<T> {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        std::mem::replace(&mut *guard, Arc::new(value))
    }

    /// Build a replacement from the current value and swap it in.
    ///
    /// The write lock is held while `f` runs, so concurrent updates are
    /// applied one after another and none is lost.
    pub fn update<F>(&self, f: F) -> Arc<T>
    where
        F: FnOnce(&T) -> T,
    {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let next = Arc::new(f(&guard));
        *guard = Arc::clone(&next);
        next
    }
}

impl<T: Default> Default for Snapshot<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}
