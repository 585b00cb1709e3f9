// fluxsync-core: keyed caches kept in sync by a push stream, with
// debounced bulk retrieval in front of the server.

pub mod config;
pub mod error;
pub mod params;
pub mod provider;
pub mod report;
pub mod retrieve;
pub mod store;
pub mod stream;
pub mod streamer;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::{ReconnectConfig, SyncConfig};
pub use error::{
    CoreError, FetchError, HandlerError, HandlerResult, ListenerError, RetrieveError,
    ValidationError,
};
pub use params::{
    NormalizeOptions, Normalized, ParamValue, Params, TypeTag, VariantMap, normalize,
    normalize_with,
};
pub use provider::{ConnectionState, ListenerRegistry, Provider};
pub use report::{ErrorSink, SharedSink, TracingSink};
pub use retrieve::{DebouncedRetriever, Fetcher, Retrieved, RetrieverOptions};
pub use store::{
    Keyed, Rollback, ScopedStore, SetOptions, StoreOptions, StoreRegistry, Subscription,
    UnaryStore,
};
pub use stream::EntityStream;
pub use streamer::{ChannelBinding, JsonSchema, Listener, Schema, StreamStatus, Streamer};

// Transport types consumers need to wire a provider.
pub use fluxsync_api::{Frame, FrameStream, MemoryTransport, Transport};
