use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, ReentrantMutex};
use tracing::warn;

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Registry<T> {
    next_id: AtomicU64,
    entries: Mutex<Vec<(u64, Listener<T>)>>,
}

/// A set of callbacks that receive every published value.
///
/// Listeners run on the publishing thread, outside the registry lock, so they
/// may subscribe or unsubscribe from inside the callback. A listener that
/// panics is logged and skipped; the rest still get the value.
///
/// Publishing and subscribing are serialized by a reentrant gate: a value is
/// computed and delivered to every listener before the next one is computed,
/// so the last value each listener sees is the latest one published.
pub struct ListenerSet<T> {
    inner: Arc<Registry<T>>,
    gate: ReentrantMutex<()>,
}

impl<T: 'static> ListenerSet<T> {
    pub fn new() -> Self {
        let registry = Registry { next_id: AtomicU64::new(1), entries: Mutex::new(Vec::new()) };
        Self {
            inner: Arc::new(registry),
            gate: ReentrantMutex::new(()),
        }
    }

    /// Register `listener`, then call it with the value `current` reads.
    /// The read happens after registration, so no publish can slip between.
    pub fn subscribe<F>(&self, current: impl FnOnce() -> T, listener: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let _gate = self.gate.lock();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let listener: Listener<T> = Arc::new(listener);
        self.inner.entries.lock().push((id, listener.clone()));
        invoke(&listener, &current());

        let registry: Weak<Registry<T>> = Arc::downgrade(&self.inner);
        Subscription {
            cancel: Some(Box::new(move || {
                if let Some(reg) = registry.upgrade() {
                    reg.entries.lock().retain(|(lid, _)| *lid != id);
                }
            })),
        }
    }

    /// Run `update` and deliver what it returns, if anything, as one step.
    /// `update` is where the owner mutates the state the value describes.
    pub fn publish(&self, update: impl FnOnce() -> Option<T>) {
        let _gate = self.gate.lock();
        if let Some(value) = update() {
            self.deliver(&value);
        }
    }

    /// Deliver `value` to every registered listener, in registration order.
    pub fn broadcast(&self, value: &T) {
        let _gate = self.gate.lock();
        self.deliver(value);
    }

    fn deliver(&self, value: &T) {
        let snapshot: Vec<Listener<T>> =
            self.inner.entries.lock().iter().map(|(_, l)| l.clone()).collect();
        for listener in &snapshot {
            invoke(listener, value);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: 'static> Default for ListenerSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn invoke<T>(listener: &Listener<T>, value: &T) {
    if catch_unwind(AssertUnwindSafe(|| listener(value))).is_err() {
        warn!("listener panicked; continuing broadcast");
    }
}

/// Handle returned by `subscribe`. Dropping it (or calling `unsubscribe`)
/// removes the listener.
#[must_use = "dropping a Subscription unsubscribes the listener"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        self.cancel_now();
    }

    fn cancel_now(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel_now();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("active", &self.cancel.is_some()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn subscribe_calls_listener_with_current_value() {
        let set = ListenerSet::<u32>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        let _sub = set.subscribe(|| 7, move |v| s.lock().push(*v));
        assert_eq!(*seen.lock(), vec![7]);

        set.broadcast(&8);
        assert_eq!(*seen.lock(), vec![7, 8]);
    }

    #[test]
    fn panicking_listener_does_not_stop_others() {
        let set = ListenerSet::<u32>::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let _bad = set.subscribe(|| 0, |v| {
            if *v > 0 {
                panic!("boom");
            }
        });
        let h = hits.clone();
        let _good = set.subscribe(|| 0, move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        set.broadcast(&1);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn drop_unsubscribes() {
        let set = ListenerSet::<u32>::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let sub = set.subscribe(|| 0, move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(set.len(), 1);
        sub.unsubscribe();
        assert!(set.is_empty());

        set.broadcast(&1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn publish_skips_delivery_when_nothing_changed() {
        let set = ListenerSet::<u32>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        let _sub = set.subscribe(|| 1, move |v| s.lock().push(*v));

        set.publish(|| None);
        set.publish(|| Some(2));
        assert_eq!(*seen.lock(), vec![1, 2]);
    }

    #[test]
    fn listener_may_publish_from_inside_a_callback() {
        let set = Arc::new(ListenerSet::<u32>::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let inner = Arc::downgrade(&set);
        let s = seen.clone();
        let _sub = set.subscribe(
            || 0,
            move |v| {
                s.lock().push(*v);
                if *v == 1 {
                    if let Some(set) = inner.upgrade() {
                        set.broadcast(&2);
                    }
                }
            },
        );

        set.broadcast(&1);
        assert_eq!(*seen.lock(), vec![0, 1, 2]);
    }
}
