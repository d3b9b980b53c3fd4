//! Change-notification list with RAII subscriptions.
//!
//! Observers are plain closures.  [`ChangeObservers::subscribe`] hands back a
//! [`ChangeSubscription`]; the observer stays registered for as long as that
//! handle lives.  Dropping the handle (or calling
//! [`ChangeSubscription::unsubscribe`]) removes it, so a settings page that is
//! closed stops receiving events without any explicit bookkeeping.
//!
//! Notification snapshots the observer list and invokes each observer with no
//! lock held.  An observer may therefore call back into the registry, or
//! subscribe and unsubscribe, without deadlocking.

use std::sync::{Arc, Mutex, PoisonError, Weak};

use tracing::trace;

type Observer = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct ObserverList {
    next_id: u64,
    entries: Vec<(u64, Observer)>,
}

/// An ordered list of change observers.
#[derive(Default)]
pub struct ChangeObservers {
    list: Arc<Mutex<ObserverList>>,
}

impl ChangeObservers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `observer` and returns the handle that keeps it registered.
    pub fn subscribe<F>(&self, observer: F) -> ChangeSubscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        let mut list = self.list.lock().unwrap_or_else(PoisonError::into_inner);
        let id = list.next_id;
        list.next_id += 1;
        list.entries.push((id, Arc::new(observer)));
        trace!(observer_id = id, "change observer subscribed");
        ChangeSubscription {
            id,
            list: Arc::downgrade(&self.list),
        }
    }

    /// Invokes every registered observer, in subscription order.
    pub fn notify(&self) {
        let snapshot: Vec<Observer> = self
            .list
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect();
        for observer in snapshot {
            observer();
        }
    }

    /// Number of registered observers.
    pub fn len(&self) -> usize {
        self.list
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Keeps an observer registered until dropped.
#[must_use = "dropping the subscription unregisters the observer immediately"]
pub struct ChangeSubscription {
    id: u64,
    list: Weak<Mutex<ObserverList>>,
}

impl ChangeSubscription {
    /// Unregisters the observer now.
    pub fn unsubscribe(self) {}

    /// Leaves the observer registered for the lifetime of the list.
    pub fn detach(mut self) {
        self.list = Weak::new();
    }
}

impl Drop for ChangeSubscription {
    fn drop(&mut self) {
        if let Some(list) = self.list.upgrade() {
            let mut list = list.lock().unwrap_or_else(PoisonError::into_inner);
            list.entries.retain(|(id, _)| *id != self.id);
            trace!(observer_id = self.id, "change observer unsubscribed");
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> (Arc<AtomicUsize>, impl Fn() + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        (count, move || {
            c.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_notify_invokes_every_subscriber() {
        // Arrange
        let observers = ChangeObservers::new();
        let (a, fa) = counter();
        let (b, fb) = counter();
        let _sa = observers.subscribe(fa);
        let _sb = observers.subscribe(fb);

        // Act
        observers.notify();
        observers.notify();

        // Assert
        assert_eq!(a.load(Ordering::SeqCst), 2);
        assert_eq!(b.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_dropping_subscription_stops_notifications() {
        let observers = ChangeObservers::new();
        let (count, f) = counter();
        let sub = observers.subscribe(f);

        drop(sub);
        observers.notify();

        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(observers.is_empty());
    }

    #[test]
    fn test_unsubscribe_removes_only_that_observer() {
        let observers = ChangeObservers::new();
        let (a, fa) = counter();
        let (b, fb) = counter();
        let sa = observers.subscribe(fa);
        let _sb = observers.subscribe(fb);

        sa.unsubscribe();
        observers.notify();

        assert_eq!(a.load(Ordering::SeqCst), 0);
        assert_eq!(b.load(Ordering::SeqCst), 1);
        assert_eq!(observers.len(), 1);
    }

    #[test]
    fn test_detached_subscription_outlives_its_handle() {
        let observers = ChangeObservers::new();
        let (count, f) = counter();

        observers.subscribe(f).detach();
        observers.notify();

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_subscription_dropped_after_list_is_harmless() {
        let observers = ChangeObservers::new();
        let (_count, f) = counter();
        let sub = observers.subscribe(f);

        drop(observers);
        drop(sub);
    }

    #[test]
    fn test_observer_may_subscribe_during_notification() {
        // Arrange
        let observers = Arc::new(ChangeObservers::new());
        let late = Arc::new(Mutex::new(Vec::new()));
        let obs = Arc::clone(&observers);
        let held = Arc::clone(&late);
        let _sub = observers.subscribe(move || {
            let sub = obs.subscribe(|| {});
            held.lock().unwrap().push(sub);
        });

        // Act
        observers.notify();

        // Assert
        assert_eq!(observers.len(), 2);
    }
}
