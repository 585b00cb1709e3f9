//! WebSocket frame transport.
//!
//! Opens one socket per channel set, sends a `subscribe` control message
//! listing the channels, then yields every `{ "channel", "payload" }` text
//! message as a [`Frame`]. Reconnection is the caller's job: when the
//! socket drops, the stream ends, after an [`Error::WebSocketClosed`] item
//! if the server closed with an abnormal code.
//!
//! # Example
//!
//! ```rust,ignore
//! use fluxsync_api::{Transport, WebSocketTransport};
//! use futures_util::StreamExt;
//! use url::Url;
//!
//! let transport = WebSocketTransport::new(Url::parse("wss://cache.local/stream")?);
//! let mut frames = transport.open_stream(vec!["sy_label_set".into()]).await?;
//!
//! while let Some(Ok(frame)) = frames.next().await {
//!     println!("{}: {} bytes", frame.channel, frame.payload.len());
//! }
//! ```

use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{self, ClientRequestBuilder};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::Error;
use crate::frame::{ControlMessage, Frame, WireFrame};
use crate::transport::{FrameStream, Transport};

// ── WebSocketTransport ───────────────────────────────────────────────

/// [`Transport`] over a WebSocket endpoint speaking JSON frames.
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    url: Url,
    headers: Vec<(String, String)>,
}

impl WebSocketTransport {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            headers: Vec::new(),
        }
    }

    /// Add a header to the upgrade request (e.g. a session cookie).
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl Transport for WebSocketTransport {
    fn open_stream(&self, channels: Vec<String>) -> BoxFuture<'static, Result<FrameStream, Error>> {
        let url = self.url.clone();
        let headers = self.headers.clone();
        Box::pin(async move { connect(&url, &headers, channels).await })
    }
}

// ── Single connection lifecycle ──────────────────────────────────────

/// Establish a connection, subscribe, and hand back the read side.
async fn connect(
    url: &Url,
    headers: &[(String, String)],
    channels: Vec<String>,
) -> Result<FrameStream, Error> {
    tracing::info!(url = %url, channels = channels.len(), "Connecting to frame stream");

    let uri: tungstenite::http::Uri = url
        .as_str()
        .parse()
        .map_err(|e: tungstenite::http::uri::InvalidUri| Error::WebSocketConnect(e.to_string()))?;

    let mut request = ClientRequestBuilder::new(uri);
    for (name, value) in headers {
        request = request.with_header(name.clone(), value.clone());
    }

    let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(|e| Error::WebSocketConnect(e.to_string()))?;

    let (mut write, mut read) = ws_stream.split();

    let subscribe = serde_json::to_string(&ControlMessage::Subscribe {
        channels: &channels,
    })?;
    write
        .send(tungstenite::Message::text(subscribe))
        .await
        .map_err(|e| Error::WebSocketConnect(e.to_string()))?;

    tracing::info!("Frame stream subscribed");

    let frames = async_stream::stream! {
        // Keep the write half alive for as long as frames are read.
        let _write = write;

        while let Some(message) = read.next().await {
            match message {
                Ok(tungstenite::Message::Text(text)) => {
                    if let Some(frame) = parse_frame(&text) {
                        yield Ok(frame);
                    }
                }
                Ok(tungstenite::Message::Ping(_)) => {
                    // tungstenite handles pong replies automatically
                    tracing::trace!("WebSocket ping");
                }
                Ok(tungstenite::Message::Close(frame)) => {
                    if let Some(ref cf) = frame {
                        tracing::info!(
                            code = %cf.code,
                            reason = %cf.reason,
                            "WebSocket close frame received"
                        );
                    } else {
                        tracing::info!("WebSocket close frame received (no payload)");
                    }
                    if let Some(err) = close_error(frame.as_ref()) {
                        yield Err(err);
                    }
                    break;
                }
                Err(e) => {
                    yield Err(Error::WebSocketConnect(e.to_string()));
                    break;
                }
                Ok(_) => {
                    // Binary, Pong, Frame -- ignore
                }
            }
        }

        tracing::debug!("Frame stream ended");
    };

    Ok(FrameStream::new(frames, CancellationToken::new()))
}

/// An error for close frames other than a normal or going-away close.
fn close_error(frame: Option<&CloseFrame>) -> Option<Error> {
    let frame = frame?;
    match frame.code {
        CloseCode::Normal | CloseCode::Away => None,
        code => Some(Error::WebSocketClosed {
            code: u16::from(code),
            reason: frame.reason.to_string(),
        }),
    }
}

// ── Message parsing ──────────────────────────────────────────────────

/// Parse one text message into a [`Frame`].
///
/// Malformed envelopes are logged and skipped; payload validation is the
/// listener's concern, not the transport's.
fn parse_frame(text: &str) -> Option<Frame> {
    let wire: WireFrame = match serde_json::from_str(text) {
        Ok(w) => w,
        Err(e) => {
            tracing::debug!(error = %e, "Failed to parse frame envelope");
            return None;
        }
    };

    match Frame::try_from(wire) {
        Ok(frame) => Some(frame),
        Err(e) => {
            tracing::debug!(error = %e, "Failed to re-encode frame payload");
            None
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────
