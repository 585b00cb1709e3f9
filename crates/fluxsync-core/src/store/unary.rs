// ── Generic keyed store ──
//
// Concurrent map of key -> value with synchronous change notification.
// Set-listeners receive the new value; delete-listeners receive the key.
// Listeners run on the mutating thread, in registration order, before
// the mutation call returns. A failing or panicking listener is reported
// to the store's sink and the remaining listeners still run.

use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::watch;

use super::Keyed;
use super::listeners::{ListenerSet, Subscription};
use crate::error::{HandlerError, HandlerResult, ListenerError, run_handler};
use crate::report::{SharedSink, default_sink};
use crate::stream::EntityStream;

type SetHandler<V> = dyn Fn(&V) -> Result<(), HandlerError> + Send + Sync;
type DeleteHandler<K> = dyn Fn(&K) -> Result<(), HandlerError> + Send + Sync;
type Equality<V> = dyn Fn(&V, &V) -> bool + Send + Sync;

/// Options for [`UnaryStore::set_with`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetOptions {
    /// Invoke set-listeners for this write.
    pub notify: bool,
}

impl Default for SetOptions {
    fn default() -> Self {
        Self { notify: true }
    }
}

/// Construction options for a [`UnaryStore`].
pub struct StoreOptions<V> {
    sink: SharedSink,
    equal: Option<Arc<Equality<V>>>,
}

impl<V> StoreOptions<V> {
    pub fn new() -> Self {
        Self {
            sink: default_sink(),
            equal: None,
        }
    }

    /// Where listener failures go.
    #[must_use]
    pub fn sink(mut self, sink: SharedSink) -> Self {
        self.sink = sink;
        self
    }

    /// Treat a write as a no-op when `equal(existing, new)` holds: the
    /// existing value is kept and no listener runs.
    ///
    /// `equal` runs under the entry's lock and must not touch the store.
    #[must_use]
    pub fn equality<F>(mut self, equal: F) -> Self
    where
        F: Fn(&V, &V) -> bool + Send + Sync + 'static,
    {
        self.equal = Some(Arc::new(equal));
        self
    }
}

impl<V> Default for StoreOptions<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> fmt::Debug for StoreOptions<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreOptions")
            .field("equality", &self.equal.is_some())
            .finish_non_exhaustive()
    }
}

/// Keyed in-memory store for one entity type.
///
/// Cheaply cloneable; clones share the same entries and listeners.
pub struct UnaryStore<K, V> {
    inner: Arc<StoreInner<K, V>>,
}

struct StoreInner<K, V> {
    entries: DashMap<K, Arc<V>>,
    on_set: Arc<ListenerSet<K, SetHandler<V>>>,
    on_delete: Arc<ListenerSet<K, DeleteHandler<K>>>,
    sink: SharedSink,
    equal: Option<Arc<Equality<V>>>,
    /// Full snapshot for pull-style consumers, rebuilt only while watched.
    snapshot: watch::Sender<Arc<Vec<Arc<V>>>>,
}

/// Outcome of one write.
enum Written<V> {
    /// The equality check matched; nothing changed.
    Unchanged,
    Replaced(Option<Arc<V>>),
}

impl<K, V> Clone for UnaryStore<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> UnaryStore<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::with_options(StoreOptions::new())
    }

    pub fn with_options(options: StoreOptions<V>) -> Self {
        let (snapshot, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            inner: Arc::new(StoreInner {
                entries: DashMap::new(),
                on_set: ListenerSet::new(),
                on_delete: ListenerSet::new(),
                sink: options.sink,
                equal: options.equal,
                snapshot,
            }),
        }
    }

    pub fn with_sink(sink: SharedSink) -> Self {
        Self::with_options(StoreOptions::new().sink(sink))
    }

    /// A store that skips writes whose value `equal`s the stored one.
    pub fn with_equality<F>(equal: F) -> Self
    where
        F: Fn(&V, &V) -> bool + Send + Sync + 'static,
    {
        Self::with_options(StoreOptions::new().equality(equal))
    }

    /// A named writer over this store. Its writes skip the listeners it
    /// registered itself; everyone else is notified as usual.
    pub fn scope(&self, name: impl Into<Arc<str>>) -> ScopedStore<K, V> {
        ScopedStore {
            store: self.clone(),
            scope: name.into(),
        }
    }

    // ── Writes ───────────────────────────────────────────────────────

    /// Insert or replace the value for `key` and notify set-listeners.
    pub fn set(&self, key: K, value: V) -> Rollback {
        self.set_with(key, value, SetOptions::default())
    }

    pub fn set_with(&self, key: K, value: V, opts: SetOptions) -> Rollback {
        self.set_from(key, value, opts, None)
    }

    /// Compute a new value from the current one. Returning `None` from
    /// `f` leaves the entry untouched and notifies nobody.
    ///
    /// `f` runs without any store lock held, so concurrent writers to the
    /// same key are last-write-wins.
    pub fn update<F>(&self, key: K, f: F) -> Option<Rollback>
    where
        F: FnOnce(Option<&V>) -> Option<V>,
    {
        self.update_from(key, f, None)
    }

    pub fn delete(&self, key: &K) -> Option<Rollback> {
        self.delete_from(key, None)
    }

    /// Delete every entry matching `pred`. Returns the removed keys.
    pub fn delete_where<P>(&self, pred: P) -> Vec<K>
    where
        P: Fn(&K, &V) -> bool,
    {
        let doomed: Vec<K> = self
            .inner
            .entries
            .iter()
            .filter(|r| pred(r.key(), r.value()))
            .map(|r| r.key().clone())
            .collect();

        doomed
            .into_iter()
            .filter(|key| self.delete(key).is_some())
            .collect()
    }

    /// Remove all entries, notifying delete-listeners once per key.
    pub fn clear(&self) {
        for key in self.keys() {
            self.delete(&key);
        }
    }

    // ── Reads ────────────────────────────────────────────────────────

    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        self.inner.entries.get(key).map(|r| Arc::clone(r.value()))
    }

    /// Values for `keys` in the given order; absent keys are skipped.
    pub fn get_many(&self, keys: &[K]) -> Vec<Arc<V>> {
        keys.iter().filter_map(|key| self.get(key)).collect()
    }

    pub fn get_where<P>(&self, pred: P) -> Vec<Arc<V>>
    where
        P: Fn(&V) -> bool,
    {
        self.inner
            .entries
            .iter()
            .filter(|r| pred(r.value()))
            .map(|r| Arc::clone(r.value()))
            .collect()
    }

    pub fn list(&self) -> Vec<Arc<V>> {
        self.inner
            .entries
            .iter()
            .map(|r| Arc::clone(r.value()))
            .collect()
    }

    pub fn keys(&self) -> Vec<K> {
        self.inner.entries.iter().map(|r| r.key().clone()).collect()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.inner.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    // ── Listeners ────────────────────────────────────────────────────

    /// Call `handler` with the new value after every set, or only after
    /// sets of `key` when one is given.
    ///
    /// `handler` may return `()` or a `Result`; errors are reported to the
    /// store's sink as `store:on_set`.
    pub fn on_set<F, R>(&self, handler: F, key: Option<K>) -> Subscription
    where
        F: Fn(&V) -> R + Send + Sync + 'static,
        R: HandlerResult,
    {
        self.add_set_listener(handler, key, None)
    }

    /// Call `handler` with the deleted key after every delete, or only
    /// after deletes of `key` when one is given.
    pub fn on_delete<F, R>(&self, handler: F, key: Option<K>) -> Subscription
    where
        F: Fn(&K) -> R + Send + Sync + 'static,
        R: HandlerResult,
    {
        self.add_delete_listener(handler, key, None)
    }

    /// Whole-store snapshots for async consumers.
    pub fn subscribe(&self) -> EntityStream<V> {
        let receiver = self.inner.snapshot.subscribe();
        self.rebuild_snapshot();
        EntityStream::new(receiver)
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn add_set_listener<F, R>(
        &self,
        handler: F,
        key: Option<K>,
        origin: Option<Arc<str>>,
    ) -> Subscription
    where
        F: Fn(&V) -> R + Send + Sync + 'static,
        R: HandlerResult,
    {
        let handler: Arc<SetHandler<V>> = Arc::new(move |value: &V| handler(value).into_result());
        self.inner.on_set.add(key, origin, handler)
    }

    fn add_delete_listener<F, R>(
        &self,
        handler: F,
        key: Option<K>,
        origin: Option<Arc<str>>,
    ) -> Subscription
    where
        F: Fn(&K) -> R + Send + Sync + 'static,
        R: HandlerResult,
    {
        let handler: Arc<DeleteHandler<K>> = Arc::new(move |key: &K| handler(key).into_result());
        self.inner.on_delete.add(key, origin, handler)
    }

    fn set_from(&self, key: K, value: V, opts: SetOptions, origin: Option<Arc<str>>) -> Rollback {
        match self.write(key.clone(), Arc::new(value), opts.notify, origin.as_deref()) {
            Written::Unchanged => Rollback::noop(),
            Written::Replaced(previous) => self.rollback_to(key, previous, origin),
        }
    }

    fn update_from<F>(&self, key: K, f: F, origin: Option<Arc<str>>) -> Option<Rollback>
    where
        F: FnOnce(Option<&V>) -> Option<V>,
    {
        let current = self.get(&key);
        let next = f(current.as_deref())?;
        Some(self.set_from(key, next, SetOptions::default(), origin))
    }

    fn delete_from(&self, key: &K, origin: Option<Arc<str>>) -> Option<Rollback> {
        let (key, previous) = self.inner.entries.remove(key)?;
        self.refresh_snapshot();
        self.notify_delete(&key, origin.as_deref());
        Some(self.rollback_to(key, Some(previous), origin))
    }

    fn write(&self, key: K, value: Arc<V>, notify: bool, origin: Option<&str>) -> Written<V> {
        let previous = match self.inner.entries.entry(key.clone()) {
            Entry::Occupied(mut entry) => {
                let unchanged = self
                    .inner
                    .equal
                    .as_ref()
                    .is_some_and(|equal| equal(&**entry.get(), &*value));
                if unchanged {
                    return Written::Unchanged;
                }
                Some(entry.insert(Arc::clone(&value)))
            }
            Entry::Vacant(entry) => {
                entry.insert(Arc::clone(&value));
                None
            }
        };
        self.refresh_snapshot();
        if notify {
            self.notify_set(&key, &value, origin);
        }
        Written::Replaced(previous)
    }

    fn notify_set(&self, key: &K, value: &V, origin: Option<&str>) {
        for armed in self.inner.on_set.matching(key, origin) {
            if let Some(handler) = armed.get() {
                let outcome = run_handler(|| handler(value).map_err(ListenerError::Handler));
                if let Err(err) = outcome {
                    self.inner.sink.report("store:on_set", &err);
                }
            }
        }
    }

    fn notify_delete(&self, key: &K, origin: Option<&str>) {
        for armed in self.inner.on_delete.matching(key, origin) {
            if let Some(handler) = armed.get() {
                let outcome = run_handler(|| handler(key).map_err(ListenerError::Handler));
                if let Err(err) = outcome {
                    self.inner.sink.report("store:on_delete", &err);
                }
            }
        }
    }

    fn rollback_to(
        &self,
        key: K,
        previous: Option<Arc<V>>,
        origin: Option<Arc<str>>,
    ) -> Rollback {
        let store = self.clone();
        Rollback::new(move || match previous {
            Some(value) => {
                store.write(key, value, true, origin.as_deref());
            }
            None => {
                store.delete_from(&key, origin);
            }
        })
    }

    fn refresh_snapshot(&self) {
        if self.inner.snapshot.receiver_count() > 0 {
            self.rebuild_snapshot();
        }
    }

    fn rebuild_snapshot(&self) {
        let values = self.list();
        self.inner.snapshot.send_replace(Arc::new(values));
    }
}

impl<K, V> UnaryStore<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Keyed<Key = K> + Send + Sync + 'static,
{
    /// Insert a record under its own key.
    pub fn set_keyed(&self, value: V) -> Rollback {
        self.set(value.key(), value)
    }

    /// Insert several records; each notifies individually.
    pub fn set_many<I>(&self, values: I)
    where
        I: IntoIterator<Item = V>,
    {
        for value in values {
            self.set_keyed(value);
        }
    }
}

impl<K, V> Default for UnaryStore<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> fmt::Debug for UnaryStore<K, V>
where
    K: Eq + Hash,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnaryStore")
            .field("entries", &self.inner.entries.len())
            .field("equality", &self.inner.equal.is_some())
            .finish_non_exhaustive()
    }
}

// ── ScopedStore ──────────────────────────────────────────────────────

/// A named writer over a shared [`UnaryStore`].
///
/// Listeners registered through a scope are skipped for that scope's own
/// writes, so a component can mirror edits from elsewhere without hearing
/// its own echo.
pub struct ScopedStore<K, V> {
    store: UnaryStore<K, V>,
    scope: Arc<str>,
}

impl<K, V> Clone for ScopedStore<K, V> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            scope: Arc::clone(&self.scope),
        }
    }
}

impl<K, V> ScopedStore<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    pub fn name(&self) -> &str {
        &self.scope
    }

    /// The shared store behind this scope.
    pub fn store(&self) -> &UnaryStore<K, V> {
        &self.store
    }

    pub fn set(&self, key: K, value: V) -> Rollback {
        self.set_with(key, value, SetOptions::default())
    }

    pub fn set_with(&self, key: K, value: V, opts: SetOptions) -> Rollback {
        self.store.set_from(key, value, opts, Some(self.origin()))
    }

    pub fn update<F>(&self, key: K, f: F) -> Option<Rollback>
    where
        F: FnOnce(Option<&V>) -> Option<V>,
    {
        self.store.update_from(key, f, Some(self.origin()))
    }

    pub fn delete(&self, key: &K) -> Option<Rollback> {
        self.store.delete_from(key, Some(self.origin()))
    }

    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        self.store.get(key)
    }

    pub fn list(&self) -> Vec<Arc<V>> {
        self.store.list()
    }

    pub fn on_set<F, R>(&self, handler: F, key: Option<K>) -> Subscription
    where
        F: Fn(&V) -> R + Send + Sync + 'static,
        R: HandlerResult,
    {
        self.store.add_set_listener(handler, key, Some(self.origin()))
    }

    pub fn on_delete<F, R>(&self, handler: F, key: Option<K>) -> Subscription
    where
        F: Fn(&K) -> R + Send + Sync + 'static,
        R: HandlerResult,
    {
        self.store.add_delete_listener(handler, key, Some(self.origin()))
    }

    fn origin(&self) -> Arc<str> {
        Arc::clone(&self.scope)
    }
}

impl<K, V> fmt::Debug for ScopedStore<K, V>
where
    K: Eq + Hash,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedStore")
            .field("scope", &self.scope)
            .field("store", &self.store)
            .finish()
    }
}

// ── Rollback ─────────────────────────────────────────────────────────

/// Undoes one write: restores the previous value or removes the entry
/// if there was none. Dropping it without calling
/// [`rollback`](Self::rollback) keeps the write.
pub struct Rollback {
    undo: Box<dyn FnOnce() + Send>,
}

impl Rollback {
    fn new(undo: impl FnOnce() + Send + 'static) -> Self {
        Self {
            undo: Box::new(undo),
        }
    }

    fn noop() -> Self {
        Self::new(|| {})
    }

    pub fn rollback(self) {
        (self.undo)();
    }
}

impl fmt::Debug for Rollback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rollback").finish_non_exhaustive()
    }
}
