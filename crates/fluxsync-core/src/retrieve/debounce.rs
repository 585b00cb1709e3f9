// State machine: Idle -> Accumulating -> Flushing -> Idle.
//
// The first call of a window creates the pending batch and spawns the
// flush task; later calls only merge into it. The window is fixed: it
// is not extended by later calls. Sealing the batch is taking it out of
// the mutex, so calls after that start a new window.
//
// Keys are taken as given. A retriever keyed by `ParamValue` can run
// loose caller input through the normalizer first with
// `retrieve_normalized`, so "42" and 42 land on the same key.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use indexmap::IndexSet;
use tokio::sync::oneshot;
use tracing::{debug, trace};

use super::{Fetcher, Retrieved};
use crate::config::{DEFAULT_DEBOUNCE, SyncConfig};
use crate::error::RetrieveError;
use crate::params::{ParamValue, Params, TypeTag, VariantMap, normalize};
use crate::report::{SharedSink, default_sink};
use crate::store::Keyed;

/// Settings for one [`DebouncedRetriever`].
#[derive(Clone)]
pub struct RetrieverOptions {
    /// Used in log fields and error-sink contexts.
    pub name: String,
    pub debounce: Duration,
    pub sink: SharedSink,
}

impl RetrieverOptions {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            debounce: DEFAULT_DEBOUNCE,
            sink: default_sink(),
        }
    }

    pub fn from_config(name: impl Into<String>, config: &SyncConfig) -> Self {
        Self::new(name).debounce(config.debounce)
    }

    pub fn debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn sink(mut self, sink: SharedSink) -> Self {
        self.sink = sink;
        self
    }
}

impl Default for RetrieverOptions {
    fn default() -> Self {
        Self::new("retriever")
    }
}

impl fmt::Debug for RetrieverOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetrieverOptions")
            .field("name", &self.name)
            .field("debounce", &self.debounce)
            .finish_non_exhaustive()
    }
}

type Reply<V> = oneshot::Sender<Result<Retrieved<V>, RetrieveError>>;

struct Waiter<K, V> {
    keys: Vec<K>,
    single: bool,
    reply: Reply<V>,
}

struct PendingBatch<K, V> {
    /// Union of every waiter's keys, first-seen order.
    keys: IndexSet<K>,
    waiters: Vec<Waiter<K, V>>,
}

struct RetrieverInner<K, V> {
    fetcher: Box<dyn Fetcher<K, V>>,
    key_of: Box<dyn Fn(&V) -> K + Send + Sync>,
    options: RetrieverOptions,
    pending: Mutex<Option<PendingBatch<K, V>>>,
}

/// Coalesces concurrent `retrieve` calls into one bulk fetch per window.
///
/// Cheaply cloneable; clones share the pending batch.
pub struct DebouncedRetriever<K, V> {
    inner: Arc<RetrieverInner<K, V>>,
}

impl<K, V> Clone for DebouncedRetriever<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> DebouncedRetriever<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Retriever for records that carry their own key.
    pub fn new(fetcher: impl Fetcher<K, V>, options: RetrieverOptions) -> Self
    where
        V: Keyed<Key = K>,
    {
        Self::with_key_fn(fetcher, V::key, options)
    }

    /// Retriever that indexes fetched values with `key_of`.
    pub fn with_key_fn(
        fetcher: impl Fetcher<K, V>,
        key_of: impl Fn(&V) -> K + Send + Sync + 'static,
        options: RetrieverOptions,
    ) -> Self {
        Self {
            inner: Arc::new(RetrieverInner {
                fetcher: Box::new(fetcher),
                key_of: Box::new(key_of),
                options,
                pending: Mutex::new(None),
            }),
        }
    }

    pub fn options(&self) -> &RetrieverOptions {
        &self.inner.options
    }

    /// Whether a window is currently accumulating.
    pub fn is_pending(&self) -> bool {
        lock(&self.inner.pending).is_some()
    }

    /// Retrieve one key or many, batched with every other call in the
    /// same window.
    ///
    /// Must be called within a tokio runtime. Dropping the returned
    /// future does not cancel the shared fetch.
    pub async fn retrieve(
        &self,
        params: impl Into<Params<K>>,
    ) -> Result<Retrieved<V>, RetrieveError> {
        let (single, keys) = params.into().into_parts();
        if keys.is_empty() {
            return Ok(Retrieved::Many(Vec::new()));
        }

        let (reply, response) = oneshot::channel();
        let opens_window = {
            let mut pending = lock(&self.inner.pending);
            let opens_window = pending.is_none();
            let batch = pending.get_or_insert_with(|| PendingBatch {
                keys: IndexSet::new(),
                waiters: Vec::new(),
            });
            batch.keys.extend(keys.iter().cloned());
            batch.waiters.push(Waiter {
                keys,
                single,
                reply,
            });
            opens_window
        };

        if opens_window {
            trace!(retriever = %self.inner.options.name, "debounce window opened");
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move {
                tokio::time::sleep(inner.options.debounce).await;
                inner.flush().await;
            });
        }

        response.await.map_err(|_| RetrieveError::Abandoned)?
    }

    pub async fn retrieve_one(&self, key: K) -> Result<Option<V>, RetrieveError> {
        self.retrieve(Params::Single(key))
            .await
            .map(Retrieved::into_single)
    }

    pub async fn retrieve_many(&self, keys: Vec<K>) -> Result<Vec<V>, RetrieveError> {
        self.retrieve(keys).await.map(Retrieved::into_many)
    }
}

impl<V> DebouncedRetriever<ParamValue, V>
where
    V: Clone + Send + Sync + 'static,
{
    /// [`retrieve`](Self::retrieve) after normalizing `args`: when the
    /// first value is a numeric string, every value is read as a number.
    /// The caller's cardinality is kept.
    pub async fn retrieve_normalized(
        &self,
        args: impl Into<Params<ParamValue>>,
    ) -> Result<Retrieved<V>, RetrieveError> {
        let numeric = VariantMap::new().with(TypeTag::Number, ());
        let params = normalize(args, &numeric).into_params();
        self.retrieve(params).await
    }
}

impl<K, V> RetrieverInner<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    async fn flush(&self) {
        let Some(batch) = lock(&self.pending).take() else {
            return;
        };

        let keys: Vec<K> = batch.keys.into_iter().collect();
        debug!(
            retriever = %self.options.name,
            keys = keys.len(),
            waiters = batch.waiters.len(),
            "flushing batch"
        );

        match self.fetcher.fetch(keys).await {
            Ok(values) => {
                let by_key: HashMap<K, V> = values
                    .into_iter()
                    .map(|value| ((self.key_of)(&value), value))
                    .collect();

                for waiter in batch.waiters {
                    let result = if waiter.single {
                        Retrieved::Single(waiter.keys.first().and_then(|k| by_key.get(k)).cloned())
                    } else {
                        Retrieved::Many(
                            waiter
                                .keys
                                .iter()
                                .filter_map(|k| by_key.get(k).cloned())
                                .collect(),
                        )
                    };
                    // The caller may have stopped waiting.
                    let _ = waiter.reply.send(Ok(result));
                }
            }
            Err(e) => {
                let context = format!("retriever:{}", self.options.name);
                self.options.sink.report(&context, &e);
                for waiter in batch.waiters {
                    let _ = waiter.reply.send(Err(RetrieveError::Fetch(e.clone())));
                }
            }
        }
    }
}

impl<K, V> fmt::Debug for DebouncedRetriever<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DebouncedRetriever")
            .field("options", &self.inner.options)
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
