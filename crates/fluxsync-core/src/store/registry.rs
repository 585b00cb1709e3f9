// ── Store registry ──
//
// Typed stores looked up by resource name. Built once at startup and
// passed to whatever needs stores, instead of module-level globals.

use std::any::Any;
use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;

use super::UnaryStore;
use crate::error::CoreError;
use crate::report::SharedSink;

/// Name -> store map. Cheaply cloneable.
#[derive(Clone, Default)]
pub struct StoreRegistry {
    stores: Arc<DashMap<String, Arc<dyn Any + Send + Sync>>>,
    sink: Option<SharedSink>,
}

impl StoreRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores created by this registry report listener failures to `sink`.
    pub fn with_sink(sink: SharedSink) -> Self {
        Self {
            stores: Arc::default(),
            sink: Some(sink),
        }
    }

    /// Get the store registered under `name`, creating it on first use.
    ///
    /// Fails if `name` was first registered with other key/value types.
    pub fn store<K, V>(&self, name: &str) -> Result<UnaryStore<K, V>, CoreError>
    where
        K: Eq + Hash + Clone + Send + Sync + 'static,
        V: Send + Sync + 'static,
    {
        let entry = self
            .stores
            .entry(name.to_owned())
            .or_insert_with(|| -> Arc<dyn Any + Send + Sync> {
                Arc::new(match &self.sink {
                    Some(sink) => UnaryStore::<K, V>::with_sink(Arc::clone(sink)),
                    None => UnaryStore::<K, V>::new(),
                })
            });

        entry
            .value()
            .downcast_ref::<UnaryStore<K, V>>()
            .cloned()
            .ok_or_else(|| CoreError::StoreTypeMismatch {
                name: name.to_owned(),
            })
    }

    /// Look up an existing store without creating one.
    pub fn get<K, V>(&self, name: &str) -> Option<UnaryStore<K, V>>
    where
        K: Eq + Hash + Clone + Send + Sync + 'static,
        V: Send + Sync + 'static,
    {
        self.stores
            .get(name)?
            .value()
            .downcast_ref::<UnaryStore<K, V>>()
            .cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.stores.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.stores.iter().map(|r| r.key().clone()).collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for StoreRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreRegistry")
            .field("stores", &self.names())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[test]
    fn same_name_returns_shared_store() {
        let registry = StoreRegistry::new();
        let a = registry.store::<u32, String>("labels").unwrap();
        let b = registry.store::<u32, String>("labels").unwrap();

        a.set(1, "alpha".into());
        assert_eq!(b.get(&1).unwrap().as_str(), "alpha");
        assert_eq!(registry.names(), vec!["labels"]);
    }

    #[test]
    fn type_mismatch_is_an_error() {
        let registry = StoreRegistry::new();
        registry.store::<u32, String>("labels").unwrap();

        let err = registry.store::<String, String>("labels").unwrap_err();
        assert!(matches!(err, CoreError::StoreTypeMismatch { ref name } if name == "labels"));
        assert!(registry.get::<String, String>("labels").is_none());
    }

    #[test]
    fn stores_report_to_the_registry_sink() {
        let reports = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&reports);
        let registry = StoreRegistry::with_sink(Arc::new(
            move |context: &str, _: &(dyn std::error::Error + 'static)| {
                log.lock().unwrap().push(context.to_owned());
            },
        ));
        let labels = registry.store::<u32, String>("labels").unwrap();
        labels.on_set(|_: &String| Err::<(), _>("rejected"), None);

        labels.set(1, "alpha".into());
        assert_eq!(*reports.lock().unwrap(), vec!["store:on_set"]);
    }

    #[test]
    fn get_does_not_create() {
        let registry = StoreRegistry::new();
        assert!(registry.get::<u32, u32>("ranges").is_none());
        assert!(!registry.contains("ranges"));
    }
}
