//! Transport boundary for the fluxsync cache.
//!
//! Everything that touches the network lives here so `fluxsync-core` can
//! stay transport-agnostic:
//!
//! - **[`Transport`]**: opens a multiplexed [`FrameStream`] scoped to a set
//!   of channel names. Implemented by [`WebSocketTransport`] (JSON frames over
//!   `tokio-tungstenite`) and [`MemoryTransport`] (in-process, for embedding
//!   and tests).
//! - **[`Frame`]**: one named message with an opaque payload.
//! - **[`HttpRetrieveClient`]**: bulk `retrieve(keys)` over HTTP, the usual
//!   fetcher behind a debounced retriever.

pub mod error;
pub mod frame;
pub mod http;
pub mod memory;
pub mod transport;
pub mod websocket;

pub use error::Error;
pub use frame::Frame;
pub use http::HttpRetrieveClient;
pub use memory::MemoryTransport;
pub use transport::{FrameStream, Transport};
pub use websocket::WebSocketTransport;
