// End-to-end: pushed frames keep a registry store current, and a
// debounced retriever fills it on demand.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use fluxsync_core::{
    ChannelBinding, DebouncedRetriever, FetchError, Frame, Keyed, MemoryTransport, Provider,
    RetrieverOptions, StoreRegistry, SyncConfig, UnaryStore,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Label {
    key: u32,
    name: String,
}

impl Keyed for Label {
    type Key = u32;

    fn key(&self) -> u32 {
        self.key
    }
}

fn label(key: u32, name: &str) -> Label {
    Label {
        key,
        name: name.into(),
    }
}

fn label_bindings() -> Vec<ChannelBinding<u32, Label>> {
    vec![
        ChannelBinding::json("label_set", |store: &UnaryStore<u32, Label>, l: Label| {
            store.set_keyed(l);
        }),
        ChannelBinding::json("label_delete", |store: &UnaryStore<u32, Label>, key: u32| {
            store.delete(&key);
        }),
    ]
}

#[tokio::test]
async fn test_pushed_frames_update_store_and_notify() {
    let registry = StoreRegistry::new();
    let labels = registry.store::<u32, Label>("labels").unwrap();
    let memory = MemoryTransport::new();
    let provider = Provider::new(SyncConfig::default());
    provider.register(&labels, label_bindings());

    let (tx, mut changes) = mpsc::unbounded_channel();
    let set_tx = tx.clone();
    labels.on_set(
        move |l| {
            let _ = set_tx.send(format!("set:{}", l.name));
        },
        None,
    );
    labels.on_delete(
        move |k| {
            let _ = tx.send(format!("delete:{k}"));
        },
        Some(1),
    );

    provider
        .set_transport(Some(Arc::new(memory.clone())))
        .await
        .unwrap();
    assert_eq!(
        memory.opened(),
        vec![vec!["label_delete".to_owned(), "label_set".to_owned()]]
    );

    memory.publish(Frame::json("label_set", &label(1, "alpha")).unwrap());
    assert_eq!(changes.recv().await.unwrap(), "set:alpha");
    assert_eq!(labels.get(&1).unwrap().name, "alpha");

    // A frame that fails its schema is skipped; the next one still lands.
    memory.publish(Frame::new("label_set", r#"{"key":"nope"}"#));
    memory.publish(Frame::json("label_delete", &1_u32).unwrap());
    assert_eq!(changes.recv().await.unwrap(), "delete:1");
    assert!(labels.get(&1).is_none());
}

#[tokio::test]
async fn test_unregistering_bindings_shrinks_stream_on_next_update() {
    let labels: UnaryStore<u32, Label> = UnaryStore::new();
    let memory = MemoryTransport::new();
    let provider = Provider::new(SyncConfig::default());
    let bindings = provider.register(&labels, label_bindings());

    provider
        .set_transport(Some(Arc::new(memory.clone())))
        .await
        .unwrap();
    bindings.unsubscribe();
    assert_eq!(provider.streamer().listener_count(), 0);

    // Lazy: still live until the next reconcile.
    assert_eq!(provider.streamer().live_channels().len(), 2);
    provider.streamer().reconcile().await.unwrap();
    assert!(provider.streamer().live_channels().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_retriever_fills_store_once_per_window() {
    let labels: UnaryStore<u32, Label> = UnaryStore::new();
    let calls = Arc::new(Mutex::new(Vec::new()));

    let log = Arc::clone(&calls);
    let sink_store = labels.clone();
    let retriever = DebouncedRetriever::new(
        move |keys: Vec<u32>| {
            log.lock().unwrap().push(keys.clone());
            let store = sink_store.clone();
            async move {
                let found: Vec<Label> = keys
                    .into_iter()
                    .map(|k| label(k, &format!("label-{k}")))
                    .collect();
                store.set_many(found.clone());
                Ok::<_, FetchError>(found)
            }
        },
        RetrieverOptions::new("labels").debounce(Duration::from_millis(20)),
    );

    let (one, many) = tokio::join!(
        retriever.retrieve_one(2),
        retriever.retrieve_many(vec![1, 2, 3]),
    );

    assert_eq!(one.unwrap().unwrap().name, "label-2");
    assert_eq!(many.unwrap().len(), 3);
    assert_eq!(*calls.lock().unwrap(), vec![vec![2, 1, 3]]);
    assert_eq!(labels.len(), 3);
}
