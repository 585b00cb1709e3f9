// ── Listeners, schemas and channel bindings ──

use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;

use fluxsync_api::Frame;
use serde::de::DeserializeOwned;

use crate::error::{HandlerResult, ListenerError, ValidationError};
use crate::store::UnaryStore;

// ── Schema ───────────────────────────────────────────────────────────

/// Decodes and validates a frame payload.
pub trait Schema: Send + Sync + 'static {
    type Output: Send + 'static;

    fn validate(&self, payload: &[u8]) -> Result<Self::Output, ValidationError>;
}

/// Payload is JSON that deserializes into `T`.
pub struct JsonSchema<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonSchema<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonSchema<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for JsonSchema<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JsonSchema<{}>", std::any::type_name::<T>())
    }
}

impl<T> Schema for JsonSchema<T>
where
    T: DeserializeOwned + Send + 'static,
{
    type Output = T;

    fn validate(&self, payload: &[u8]) -> Result<T, ValidationError> {
        Ok(serde_json::from_slice(payload)?)
    }
}

// ── Listener ─────────────────────────────────────────────────────────

pub(crate) type Deliver = Box<dyn Fn(&Frame) -> Result<(), ListenerError> + Send + Sync>;
pub(crate) type OnOpen = Box<dyn FnOnce() + Send>;

/// A handler for one channel, typed by its schema.
pub struct Listener {
    pub(crate) channel: String,
    pub(crate) deliver: Deliver,
    pub(crate) on_open: Option<OnOpen>,
}

impl Listener {
    /// Run `handler` with every frame on `channel` that passes `schema`.
    ///
    /// The handler returns `()` or a `Result`; errors, like payloads that
    /// fail the schema, go to the error sink.
    pub fn new<S, F, R>(channel: impl Into<String>, schema: S, handler: F) -> Self
    where
        S: Schema,
        F: Fn(S::Output) -> R + Send + Sync + 'static,
        R: HandlerResult,
    {
        Self {
            channel: channel.into(),
            deliver: Box::new(move |frame: &Frame| {
                let decoded = schema.validate(&frame.payload)?;
                handler(decoded).into_result().map_err(ListenerError::Handler)
            }),
            on_open: None,
        }
    }

    /// Listener whose payload is JSON decoded into `T`.
    pub fn json<T, F, R>(channel: impl Into<String>, handler: F) -> Self
    where
        T: DeserializeOwned + Send + 'static,
        F: Fn(T) -> R + Send + Sync + 'static,
        R: HandlerResult,
    {
        Self::new(channel, JsonSchema::<T>::new(), handler)
    }

    /// Called once, when a live stream covering this channel is confirmed.
    pub fn on_open(mut self, on_open: impl FnOnce() + Send + 'static) -> Self {
        self.on_open = Some(Box::new(on_open));
        self
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("channel", &self.channel)
            .field("on_open", &self.on_open.is_some())
            .finish_non_exhaustive()
    }
}

// ── ChannelBinding ───────────────────────────────────────────────────

type Bind<K, V> = Box<dyn FnOnce(UnaryStore<K, V>) -> Listener + Send>;

/// A channel whose frames update one store.
///
/// Declared once per resource type; turned into a [`Listener`] by binding
/// it to the store it writes.
pub struct ChannelBinding<K, V> {
    channel: String,
    bind: Bind<K, V>,
}

impl<K, V> ChannelBinding<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    pub fn new<S, F, R>(channel: impl Into<String>, schema: S, on_change: F) -> Self
    where
        S: Schema,
        F: Fn(&UnaryStore<K, V>, S::Output) -> R + Send + Sync + 'static,
        R: HandlerResult,
    {
        let channel = channel.into();
        let listener_channel = channel.clone();
        Self {
            channel,
            bind: Box::new(move |store: UnaryStore<K, V>| {
                Listener::new(listener_channel, schema, move |decoded| {
                    on_change(&store, decoded)
                })
            }),
        }
    }

    /// Binding whose payload is JSON decoded into `T`.
    pub fn json<T, F, R>(channel: impl Into<String>, on_change: F) -> Self
    where
        T: DeserializeOwned + Send + 'static,
        F: Fn(&UnaryStore<K, V>, T) -> R + Send + Sync + 'static,
        R: HandlerResult,
    {
        Self::new(channel, JsonSchema::<T>::new(), on_change)
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn bind(self, store: UnaryStore<K, V>) -> Listener {
        (self.bind)(store)
    }
}

impl<K, V> fmt::Debug for ChannelBinding<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelBinding")
            .field("channel", &self.channel)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::{Arc, Mutex};

    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Deserialize)]
    struct Label {
        key: u32,
        name: String,
    }

    #[test]
    fn json_schema_rejects_bad_payload() {
        let schema = JsonSchema::<Label>::new();
        assert!(schema.validate(br#"{"key":1,"name":"a"}"#).is_ok());

        let err = schema.validate(br#"{"key":"one"}"#).unwrap_err();
        assert!(err.to_string().starts_with("Payload failed validation"));
    }

    #[test]
    fn listener_delivers_decoded_payload() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        let listener = Listener::json("labels", move |l: Label| log.lock().unwrap().push(l.name));

        (listener.deliver)(&Frame::new("labels", r#"{"key":1,"name":"a"}"#)).unwrap();
        assert!(matches!(
            (listener.deliver)(&Frame::new("labels", "nope")),
            Err(ListenerError::Validation(_))
        ));
        assert_eq!(*seen.lock().unwrap(), vec!["a"]);
    }

    #[test]
    fn handler_errors_surface_as_listener_errors() {
        let listener = Listener::json("labels", |l: Label| {
            if l.key == 0 {
                return Err(format!("label {} has no key", l.name));
            }
            Ok(())
        });

        (listener.deliver)(&Frame::new("labels", r#"{"key":1,"name":"a"}"#)).unwrap();
        let err = (listener.deliver)(&Frame::new("labels", r#"{"key":0,"name":"b"}"#)).unwrap_err();
        assert_eq!(err.to_string(), "Listener failed: label b has no key");
    }

    #[test]
    fn binding_writes_into_its_store() {
        let store: UnaryStore<u32, String> = UnaryStore::new();
        let binding = ChannelBinding::json("labels", |store: &UnaryStore<u32, String>, l: Label| {
            store.set(l.key, l.name);
        });
        assert_eq!(binding.channel(), "labels");

        let listener = binding.bind(store.clone());
        (listener.deliver)(&Frame::new("labels", r#"{"key":3,"name":"c"}"#)).unwrap();
        assert_eq!(store.get(&3).unwrap().as_str(), "c");
    }
}
