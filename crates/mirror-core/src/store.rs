//! Single-writer snapshot store.
//!
//! Holds the current state behind an `Arc` and publishes a new snapshot to subscribers
//! after each mutation. Readers only ever see whole snapshots: a mutation computes the
//! next state from the previous one and swaps it in atomically.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

type Callback<T> = Arc<dyn Fn(&Arc<T>) + Send + Sync>;

/// Subscription handle that unsubscribes automatically when dropped.
///
/// Follows the disposer pattern: hold this value to keep receiving snapshots,
/// drop it (or let it go out of scope) to unsubscribe.
pub struct Subscription<T> {
    store: Weak<Store<T>>,
    id: usize,
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(store) = self.store.upgrade() {
            store.unsubscribe(self.id);
        }
    }
}

/// Observable state container.
///
/// Wrap in `Arc` to enable subscriptions.
pub struct Store<T> {
    current: RwLock<Arc<T>>,
    /// Serializes writers so snapshots are published in mutation order
    writer: Mutex<()>,
    callbacks: RwLock<Vec<(usize, Callback<T>)>>,
    next_id: AtomicUsize,
}

impl<T: Default> Default for Store<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> Store<T> {
    pub fn new(initial: T) -> Self {
        Self {
            current: RwLock::new(Arc::new(initial)),
            writer: Mutex::new(()),
            callbacks: RwLock::new(Vec::new()),
            next_id: AtomicUsize::new(0),
        }
    }

    /// The current snapshot.
    pub fn snapshot(&self) -> Arc<T> {
        Arc::clone(&self.current.read().unwrap_or_else(|e| e.into_inner()))
    }

    /// Subscribe to snapshots. Returns `Subscription` that unsubscribes on drop.
    ///
    /// Requires `self` to be wrapped in `Arc`. Callbacks run on the writer's thread while
    /// the write is being published and must not mutate the store themselves.
    pub fn subscribe(
        self: &Arc<Self>,
        callback: impl Fn(&Arc<T>) + Send + Sync + 'static,
    ) -> Subscription<T> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.callbacks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(callback)));
        Subscription {
            store: Arc::downgrade(self),
            id,
        }
    }

    fn unsubscribe(&self, id: usize) {
        // try_write: Drop may run during unwinding while emit holds a read lock
        if let Ok(mut guard) = self.callbacks.try_write() {
            guard.retain(|(i, _)| *i != id);
        }
    }

    /// Replace the state with `f(current)` and publish it.
    ///
    /// Returning `None` from `f` leaves the state untouched and publishes nothing.
    /// Returns whether a snapshot was published.
    pub fn update(&self, f: impl FnOnce(&T) -> Option<T>) -> bool {
        let _writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());

        let previous = self.snapshot();
        let Some(next) = f(&previous) else {
            return false;
        };
        let next = Arc::new(next);
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = Arc::clone(&next);

        self.emit(&next);
        true
    }

    fn emit(&self, snapshot: &Arc<T>) {
        // Clone the callback list so a callback may subscribe without deadlocking.
        let callbacks: Vec<_> = self
            .callbacks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();

        for callback in callbacks {
            callback(snapshot);
        }
    }
}

impl<T: Clone> Store<T> {
    /// Clone the current state, mutate the clone, publish it.
    pub fn modify(&self, f: impl FnOnce(&mut T)) {
        self.update(|current| {
            let mut next = current.clone();
            f(&mut next);
            Some(next)
        });
    }
}
