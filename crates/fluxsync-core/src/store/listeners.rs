// ── Listener registrations ──
//
// Ordered list of handlers, each optionally filtered to one key and
// optionally owned by a named writer whose own writes it skips. Handlers
// are snapshotted before dispatch so they can re-enter the store or
// unsubscribe while a notification is in flight.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

/// Handle that removes exactly one registration.
///
/// Cloneable; [`unsubscribe`](Self::unsubscribe) is idempotent and safe to
/// call from inside the handler it removes.
#[derive(Clone)]
pub struct Subscription {
    remove: Arc<Mutex<Option<Box<dyn FnOnce() + Send>>>>,
}

impl Subscription {
    pub(crate) fn new(remove: impl FnOnce() + Send + 'static) -> Self {
        Self {
            remove: Arc::new(Mutex::new(Some(Box::new(remove)))),
        }
    }

    /// Combine several subscriptions into one handle.
    pub fn all(subscriptions: Vec<Subscription>) -> Self {
        Self::new(move || {
            for subscription in subscriptions {
                subscription.unsubscribe();
            }
        })
    }

    pub fn unsubscribe(&self) {
        let remove = self
            .remove
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(remove) = remove {
            remove();
        }
    }

    pub fn is_active(&self) -> bool {
        self.remove
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

// ── ListenerSet ──────────────────────────────────────────────────────

struct Registration<K, H: ?Sized> {
    id: u64,
    key: Option<K>,
    origin: Option<Arc<str>>,
    active: Arc<AtomicBool>,
    handler: Arc<H>,
}

/// A handler plus the flag that says whether it is still registered.
pub(crate) struct Armed<H: ?Sized> {
    active: Arc<AtomicBool>,
    handler: Arc<H>,
}

impl<H: ?Sized> Armed<H> {
    /// The handler, unless it was unsubscribed after the snapshot was taken.
    pub(crate) fn get(&self) -> Option<&H> {
        self.active
            .load(Ordering::Acquire)
            .then_some(&*self.handler)
    }
}

pub(crate) struct ListenerSet<K, H: ?Sized> {
    next_id: AtomicU64,
    registrations: Mutex<Vec<Registration<K, H>>>,
}

impl<K, H> ListenerSet<K, H>
where
    K: PartialEq + Send + Sync + 'static,
    H: ?Sized + Send + Sync + 'static,
{
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicU64::new(0),
            registrations: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn add(
        self: &Arc<Self>,
        key: Option<K>,
        origin: Option<Arc<str>>,
        handler: Arc<H>,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let active = Arc::new(AtomicBool::new(true));

        self.lock().push(Registration {
            id,
            key,
            origin,
            active: Arc::clone(&active),
            handler,
        });

        let set: Weak<Self> = Arc::downgrade(self);
        Subscription::new(move || {
            active.store(false, Ordering::Release);
            if let Some(set) = set.upgrade() {
                set.lock().retain(|r| r.id != id);
            }
        })
    }

    /// Handlers matching `key` (unfiltered ones plus those filtered to
    /// it), in registration order, minus those owned by `writer`.
    pub(crate) fn matching(&self, key: &K, writer: Option<&str>) -> Vec<Armed<H>> {
        self.lock()
            .iter()
            .filter(|r| r.key.as_ref().is_none_or(|filter| filter == key))
            .filter(|r| match (r.origin.as_deref(), writer) {
                (Some(origin), Some(writer)) => origin != writer,
                _ => true,
            })
            .map(|r| Armed {
                active: Arc::clone(&r.active),
                handler: Arc::clone(&r.handler),
            })
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Registration<K, H>>> {
        self.registrations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    type Handler = dyn Fn(&str) + Send + Sync;

    #[test]
    fn key_filtered_and_global_matching() {
        let set: Arc<ListenerSet<u32, Handler>> = ListenerSet::new();
        let _global = set.add(None, None, Arc::new(|_: &str| {}));
        let _filtered = set.add(Some(7), None, Arc::new(|_: &str| {}));

        assert_eq!(set.matching(&7, None).len(), 2);
        assert_eq!(set.matching(&8, None).len(), 1);
    }

    #[test]
    fn writer_skips_its_own_handlers() {
        let set: Arc<ListenerSet<u32, Handler>> = ListenerSet::new();
        let _editor = set.add(None, Some(Arc::from("editor")), Arc::new(|_: &str| {}));
        let _viewer = set.add(None, Some(Arc::from("viewer")), Arc::new(|_: &str| {}));
        let _anyone = set.add(None, None, Arc::new(|_: &str| {}));

        assert_eq!(set.matching(&1, Some("editor")).len(), 2);
        assert_eq!(set.matching(&1, Some("other")).len(), 3);
        assert_eq!(set.matching(&1, None).len(), 3);
    }

    #[test]
    fn unsubscribe_disarms_existing_snapshots() {
        let set: Arc<ListenerSet<u32, Handler>> = ListenerSet::new();
        let sub = set.add(None, None, Arc::new(|_: &str| {}));

        let snapshot = set.matching(&1, None);
        sub.unsubscribe();
        sub.unsubscribe();

        assert!(snapshot[0].get().is_none());
        assert!(!sub.is_active());
        assert_eq!(set.len(), 0);
    }

    #[test]
    fn combined_subscription_removes_all() {
        let set: Arc<ListenerSet<u32, Handler>> = ListenerSet::new();
        let a = set.add(None, None, Arc::new(|_: &str| {}));
        let b = set.add(Some(2), None, Arc::new(|_: &str| {}));

        let both = Subscription::all(vec![a.clone(), b]);
        both.unsubscribe();

        assert!(!a.is_active());
        assert_eq!(set.len(), 0);
    }
}
