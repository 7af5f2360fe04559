//! Ordered listener sets with immediate removal and panic isolation.
//!
//! Emission works on a snapshot of the registered entries, but every entry
//! carries an `active` flag that is checked right before its callback runs.
//! Removing a listener, even from inside another listener during the same
//! emission, therefore takes effect immediately.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::error;

type Durable<T> = Box<dyn Fn(&T) + Send + Sync>;
type Filter<T> = Box<dyn Fn(&T) -> bool + Send + Sync>;
type OnceCallback<T> = Box<dyn FnOnce(&T) + Send>;

enum Handler<T> {
    Durable(Durable<T>),
    Once {
        filter: Filter<T>,
        callback: Mutex<Option<OnceCallback<T>>>,
    },
}

struct Entry<T> {
    id: u64,
    active: Arc<AtomicBool>,
    handler: Handler<T>,
}

type Entries<T> = Mutex<Vec<Arc<Entry<T>>>>;

/// An ordered set of callbacks over values of type `T`.
pub struct ListenerSet<T> {
    entries: Arc<Entries<T>>,
    next_id: AtomicU64,
    label: &'static str,
}

impl<T: 'static> ListenerSet<T> {
    /// Create an empty set; `label` names it in panic diagnostics.
    pub fn new(label: &'static str) -> Self {
        Self {
            entries: Arc::new(Mutex::new(Vec::new())),
            next_id: AtomicU64::new(0),
            label,
        }
    }

    /// Register a durable listener, called for every value until removed.
    pub fn add(&self, listener: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        self.insert(Handler::Durable(Box::new(listener)))
    }

    /// Register a one-shot listener: `callback` runs on the first value
    /// accepted by `filter`, then the listener removes itself.
    pub fn add_once(
        &self,
        filter: impl Fn(&T) -> bool + Send + Sync + 'static,
        callback: impl FnOnce(&T) + Send + 'static,
    ) -> Subscription {
        self.insert(Handler::Once {
            filter: Box::new(filter),
            callback: Mutex::new(Some(Box::new(callback))),
        })
    }

    fn insert(&self, handler: Handler<T>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let active = Arc::new(AtomicBool::new(true));
        self.entries.lock().push(Arc::new(Entry {
            id,
            active: Arc::clone(&active),
            handler,
        }));

        let weak: Weak<Entries<T>> = Arc::downgrade(&self.entries);
        Subscription::new(active, move || {
            if let Some(entries) = weak.upgrade() {
                entries.lock().retain(|e| e.id != id);
            }
        })
    }

    /// Deliver `value` to every active listener in registration order.
    ///
    /// A panicking listener is logged and skipped; later listeners still run.
    pub fn emit(&self, value: &T) {
        let snapshot: Vec<Arc<Entry<T>>> = self.entries.lock().clone();
        for entry in snapshot {
            if !entry.active.load(Ordering::Acquire) {
                continue;
            }
            match &entry.handler {
                Handler::Durable(listener) => self.guarded(|| listener(value)),
                Handler::Once { filter, callback } => {
                    let mut matched = false;
                    self.guarded(|| matched = filter(value));
                    if !matched || !entry.active.swap(false, Ordering::AcqRel) {
                        continue;
                    }
                    self.entries.lock().retain(|e| e.id != entry.id);
                    let callback = callback.lock().take();
                    if let Some(callback) = callback {
                        self.guarded(|| callback(value));
                    }
                }
            }
        }
    }

    /// Number of registered listeners.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether no listener is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn guarded(&self, f: impl FnOnce()) {
        if catch_unwind(AssertUnwindSafe(f)).is_err() {
            error!(listeners = self.label, "listener panicked; continuing delivery");
        }
    }
}

/// Handle to a registered listener.
///
/// Dropping a `Subscription` leaves the listener registered; call
/// [`remove`](Self::remove), or convert it with [`guard`](Self::guard) to
/// remove on drop.
pub struct Subscription {
    active: Arc<AtomicBool>,
    detach: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Subscription {
    fn new(active: Arc<AtomicBool>, detach: impl FnOnce() + Send + 'static) -> Self {
        Self {
            active,
            detach: Mutex::new(Some(Box::new(detach))),
        }
    }

    /// Remove the listener. It will not be called again, including later in
    /// an emission that is currently running. Idempotent.
    pub fn remove(&self) {
        self.active.store(false, Ordering::Release);
        let detach = self.detach.lock().take();
        if let Some(detach) = detach {
            detach();
        }
    }

    /// Whether the listener may still be called. One-shot listeners turn
    /// inactive once they fire.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Remove the listener when the returned guard drops.
    pub fn guard(self) -> SubscriptionGuard {
        SubscriptionGuard(self)
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

/// Removes its listener on drop.
#[derive(Debug)]
pub struct SubscriptionGuard(Subscription);

impl SubscriptionGuard {
    /// Whether the listener may still be called.
    pub fn is_active(&self) -> bool {
        self.0.is_active()
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.0.remove();
    }
}
