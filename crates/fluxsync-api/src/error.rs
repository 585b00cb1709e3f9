use thiserror::Error;

/// Top-level error type for the `fluxsync-api` crate.
///
/// Covers every failure mode of the transport boundary: HTTP bulk
/// retrieval, WebSocket stream setup, and frame encoding.
/// `fluxsync-core` maps these into its own diagnostics.
#[derive(Debug, Error)]
pub enum Error {
    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Request timed out.
    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// Non-success HTTP status from the retrieve endpoint.
    #[error("Server responded with HTTP {status}: {body}")]
    Status { status: u16, body: String },

    // ── Stream ──────────────────────────────────────────────────────
    /// WebSocket connection failed.
    #[error("WebSocket connection failed: {0}")]
    WebSocketConnect(String),

    /// WebSocket closed unexpectedly.
    #[error("WebSocket closed (code {code}): {reason}")]
    WebSocketClosed { code: u16, reason: String },

    /// The in-process transport refused to open a stream.
    #[error("Stream open rejected: {0}")]
    OpenRejected(String),

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },

    /// Frame or request body could not be encoded.
    #[error("Encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}

impl Error {
    /// Whether retrying the same operation later could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::Timeout { .. }
            | Self::WebSocketConnect(_)
            | Self::WebSocketClosed { .. }
            | Self::OpenRejected(_) => true,
            Self::Status { status, .. } => *status >= 500,
            Self::InvalidUrl(_) | Self::Deserialization { .. } | Self::Encode(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_are_transient() {
        let err = Error::Status {
            status: 503,
            body: "unavailable".into(),
        };
        assert!(err.is_transient());

        let err = Error::Status {
            status: 404,
            body: "missing".into(),
        };
        assert!(!err.is_transient());
    }

    #[test]
    fn decode_errors_are_permanent() {
        let err = Error::Deserialization {
            message: "expected array".into(),
            body: "{}".into(),
        };
        assert!(!err.is_transient());
    }
}
