//! Subscriber fan-out
//!
//! Each listener is called inside its own failure boundary: an `Err` or a
//! panic from one listener is logged and delivery continues with the rest.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tracing::{error, warn};

/// Callback registered with a [`SubscriberList`]
pub type Listener<T> = Arc<dyn Fn(&T) -> anyhow::Result<()> + Send + Sync>;

/// Set of listeners for one event type
pub struct SubscriberList<T> {
    /// Event name used in log messages
    name: &'static str,
    next_id: AtomicU64,
    listeners: Mutex<Vec<(u64, Listener<T>)>>,
}

trait Unsubscribe: Send + Sync {
    fn remove(&self, id: u64);
}

impl<T: 'static> Unsubscribe for SubscriberList<T> {
    fn remove(&self, id: u64) {
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.retain(|(existing, _)| *existing != id);
        }
    }
}

/// Handle returned by a subscribe call
///
/// The listener stays registered until [`Subscription::unsubscribe`] is
/// called; dropping the handle does not remove it.
#[must_use = "keep the subscription to be able to unsubscribe"]
pub struct Subscription {
    id: u64,
    list: Weak<dyn Unsubscribe>,
}

impl Subscription {
    /// Remove the listener. Safe to call after the session has gone away.
    pub fn unsubscribe(self) {
        if let Some(list) = self.list.upgrade() {
            list.remove(self.id);
        }
    }
}

impl<T: 'static> SubscriberList<T> {
    /// Empty list; `name` labels its log messages
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            next_id: AtomicU64::new(1),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Register a listener
    pub fn add<F>(self: &Arc<Self>, listener: F) -> Subscription
    where
        F: Fn(&T) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.add_listener(Arc::new(listener))
    }

    /// Register an already shared listener
    pub fn add_listener(self: &Arc<Self>, listener: Listener<T>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        match self.listeners.lock() {
            Ok(mut listeners) => listeners.push((id, listener)),
            Err(_) => error!("{} subscriber list poisoned; listener not added", self.name),
        }
        self.subscription(id)
    }

    /// Register a listener and hand it the current value first
    ///
    /// `current` is read and delivered while the list is locked, so a
    /// concurrent [`notify`](Self::notify) reaches the listener after the
    /// initial value, never before. The listener must not subscribe to or
    /// unsubscribe from this list during that first call.
    pub fn add_with_current(
        self: &Arc<Self>,
        listener: Listener<T>,
        current: impl FnOnce() -> T,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        match self.listeners.lock() {
            Ok(mut listeners) => {
                self.deliver(&listener, &current());
                listeners.push((id, listener));
            }
            Err(_) => error!("{} subscriber list poisoned; listener not added", self.name),
        }
        self.subscription(id)
    }

    fn subscription(self: &Arc<Self>, id: u64) -> Subscription {
        let list: Arc<dyn Unsubscribe> = self.clone();
        Subscription {
            id,
            list: Arc::downgrade(&list),
        }
    }

    /// Number of registered listeners
    pub fn len(&self) -> usize {
        self.listeners.lock().map(|l| l.len()).unwrap_or(0)
    }

    /// True when no listener is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `value` to every listener. Returns how many succeeded.
    pub fn notify(&self, value: &T) -> usize {
        // Snapshot so listeners may (un)subscribe while being called
        let listeners: Vec<Listener<T>> = match self.listeners.lock() {
            Ok(listeners) => listeners.iter().map(|(_, l)| l.clone()).collect(),
            Err(_) => return 0,
        };

        listeners
            .iter()
            .filter(|listener| self.deliver(listener, value))
            .count()
    }

    /// Deliver to a single listener inside a failure boundary
    pub fn deliver(&self, listener: &Listener<T>, value: &T) -> bool {
        match catch_unwind(AssertUnwindSafe(|| listener(value))) {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!("{} subscriber failed: {:#}", self.name, e);
                false
            }
            Err(_) => {
                error!("{} subscriber panicked", self.name);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_failing_listener_does_not_block_others() {
        let list = Arc::new(SubscriberList::<u32>::new("test"));
        let hits = Arc::new(AtomicUsize::new(0));

        let _a = list.add(|_| anyhow::bail!("boom"));
        let _b = list.add(|_| panic!("listener panic"));
        let counter = hits.clone();
        let _c = list.add(move |v| {
            counter.fetch_add(*v as usize, Ordering::SeqCst);
            Ok(())
        });

        assert_eq!(list.notify(&3), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_unsubscribe() {
        let list = Arc::new(SubscriberList::<u32>::new("test"));
        let sub = list.add(|_| Ok(()));
        let _keep = list.add(|_| Ok(()));
        assert_eq!(list.len(), 2);

        sub.unsubscribe();
        assert_eq!(list.len(), 1);
        assert_eq!(list.notify(&1), 1);
    }

    #[test]
    fn test_initial_value_precedes_concurrent_notify() {
        let list = Arc::new(SubscriberList::<bool>::new("test"));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (started_tx, started_rx) = std::sync::mpsc::channel();

        let notifier = list.clone();
        let record = seen.clone();
        let mut handle = None;
        let _sub = list.add_with_current(
            Arc::new(move |v: &bool| -> anyhow::Result<()> {
                record.lock().unwrap().push(*v);
                Ok(())
            }),
            || {
                // The value flips while the subscriber is still reading it
                handle = Some(std::thread::spawn(move || {
                    started_tx.send(()).unwrap();
                    notifier.notify(&true);
                }));
                started_rx.recv().unwrap();
                std::thread::sleep(std::time::Duration::from_millis(20));
                false
            },
        );
        handle.unwrap().join().unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![false, true]);
    }

    #[test]
    fn test_unsubscribe_after_list_dropped() {
        let list = Arc::new(SubscriberList::<u32>::new("test"));
        let sub = list.add(|_| Ok(()));
        drop(list);
        sub.unsubscribe();
    }
}
