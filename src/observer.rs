//! Multicast observer list
//!
//! Engine events fan out to zero or more registered observers. The list
//! snapshots itself before notifying, so an observer may register or
//! unregister (itself included) from inside a callback without deadlocking
//! or invalidating the iteration.

use std::sync::{Arc, RwLock};

/// Snapshot-on-notify list of shared observers
pub struct ObserverList<T: ?Sized> {
    observers: RwLock<Vec<Arc<T>>>,
}

impl<T: ?Sized> Default for ObserverList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> ObserverList<T> {
    pub fn new() -> Self {
        Self { observers: RwLock::new(Vec::new()) }
    }

    /// Add an observer; registering the same `Arc` twice is a no-op
    pub fn register(&self, observer: Arc<T>) {
        let mut observers = self.observers.write().unwrap();
        if !observers.iter().any(|o| Arc::ptr_eq(o, &observer)) {
            observers.push(observer);
        }
    }

    /// Remove an observer by pointer identity
    pub fn unregister(&self, observer: &Arc<T>) {
        self.observers
            .write()
            .unwrap()
            .retain(|o| !Arc::ptr_eq(o, observer));
    }

    /// Invoke `f` on a snapshot of the current observers
    pub fn notify<F>(&self, f: F)
    where
        F: Fn(&T),
    {
        let snapshot: Vec<Arc<T>> = self.observers.read().unwrap().clone();
        for observer in snapshot {
            f(&observer);
        }
    }

    pub fn len(&self) -> usize {
        self.observers.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    trait Counter: Send + Sync {
        fn bump(&self);
    }

    struct CountingObserver(AtomicUsize);

    impl Counter for CountingObserver {
        fn bump(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_notify_reaches_all_observers() {
        let list: ObserverList<dyn Counter> = ObserverList::new();
        let a = Arc::new(CountingObserver(AtomicUsize::new(0)));
        let b = Arc::new(CountingObserver(AtomicUsize::new(0)));

        list.register(a.clone());
        list.register(b.clone());
        list.notify(|o| o.bump());

        assert_eq!(a.0.load(Ordering::SeqCst), 1);
        assert_eq!(b.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_double_register_is_noop() {
        let list: ObserverList<dyn Counter> = ObserverList::new();
        let a = Arc::new(CountingObserver(AtomicUsize::new(0)));

        list.register(a.clone());
        list.register(a.clone());
        assert_eq!(list.len(), 1);

        list.notify(|o| o.bump());
        assert_eq!(a.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unregister() {
        let list: ObserverList<dyn Counter> = ObserverList::new();
        let a = Arc::new(CountingObserver(AtomicUsize::new(0)));
        let arc: Arc<dyn Counter> = a.clone();

        list.register(arc.clone());
        list.unregister(&arc);
        assert!(list.is_empty());

        list.notify(|o| o.bump());
        assert_eq!(a.0.load(Ordering::SeqCst), 0);
    }
}
