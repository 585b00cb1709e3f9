// ── Core error types ──
//
// `CoreError` is what consumers of the cache see. Transport failures are
// translated through `From<fluxsync_api::Error>`; fetch and validation
// failures have their own cloneable types because one failure is fanned
// out to many waiters.

use std::sync::Arc;

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot open stream: {reason}")]
    ConnectionFailed { reason: String },

    #[error("Stream disconnected")]
    Disconnected,

    #[error("Stream open timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Gave up reconnecting after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    // ── Data errors ──────────────────────────────────────────────────
    #[error("Store {name:?} is already registered with different key or value types")]
    StoreTypeMismatch { name: String },

    #[error("Cannot classify parameters: {reason}")]
    UnclassifiedParams { reason: String },

    // ── API errors (wrapped, not exposed raw) ────────────────────────
    #[error("API error: {message}")]
    Api {
        message: String,
        /// HTTP status code (if applicable).
        status: Option<u16>,
    },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl CoreError {
    /// Whether a later attempt at the same operation could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::ConnectionFailed { .. } | Self::Disconnected | Self::Timeout { .. } => true,
            Self::Api { status, .. } => status.is_some_and(|s| s >= 500),
            Self::RetriesExhausted { .. }
            | Self::StoreTypeMismatch { .. }
            | Self::UnclassifiedParams { .. }
            | Self::Config { .. } => false,
        }
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<fluxsync_api::Error> for CoreError {
    fn from(err: fluxsync_api::Error) -> Self {
        use fluxsync_api::Error as Api;

        match err {
            Api::Transport(ref e) if e.is_connect() => CoreError::ConnectionFailed {
                reason: err.to_string(),
            },
            Api::Timeout { timeout_secs } => CoreError::Timeout { timeout_secs },
            Api::WebSocketConnect(reason) | Api::OpenRejected(reason) => {
                CoreError::ConnectionFailed { reason }
            }
            Api::WebSocketClosed { .. } => CoreError::Disconnected,
            Api::Status { status, body } => CoreError::Api {
                message: body,
                status: Some(status),
            },
            Api::InvalidUrl(e) => CoreError::Config {
                message: format!("invalid URL: {e}"),
            },
            other => CoreError::Api {
                message: other.to_string(),
                status: None,
            },
        }
    }
}

// ── Fetch errors ─────────────────────────────────────────────────────

/// Failure of a wrapped bulk fetch.
///
/// Cloneable so the same failure can reject every waiter of a batch.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct FetchError {
    message: String,
    #[source]
    source: Option<Arc<dyn std::error::Error + Send + Sync + 'static>>,
}

impl FetchError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Wrap an underlying error, keeping its display text as the message.
    pub fn from_source<E>(source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            message: source.to_string(),
            source: Some(Arc::new(source)),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<fluxsync_api::Error> for FetchError {
    fn from(err: fluxsync_api::Error) -> Self {
        Self::from_source(err)
    }
}

/// Why a single `retrieve` call did not produce a value.
#[derive(Debug, Clone, Error)]
pub enum RetrieveError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// The flush task went away without answering.
    #[error("Retrieval batch was abandoned before it resolved")]
    Abandoned,
}

// ── Validation errors ────────────────────────────────────────────────

/// An inbound payload did not match its listener's schema.
#[derive(Debug, Clone, Error)]
#[error("Payload failed validation: {message}")]
pub struct ValidationError {
    pub message: String,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for ValidationError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(err.to_string())
    }
}

// ── Listener errors ──────────────────────────────────────────────────

/// Error a listener handler may return.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// What a listener handler returns: `()` for infallible handlers, or a
/// `Result` whose error is reported to the error sink.
pub trait HandlerResult {
    fn into_result(self) -> Result<(), HandlerError>;
}

impl HandlerResult for () {
    fn into_result(self) -> Result<(), HandlerError> {
        Ok(())
    }
}

impl<E> HandlerResult for Result<(), E>
where
    E: Into<HandlerError>,
{
    fn into_result(self) -> Result<(), HandlerError> {
        self.map_err(Into::into)
    }
}

/// Why one listener did not handle one notification.
///
/// Reported to the error sink; never stops delivery to other listeners.
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Listener failed: {0}")]
    Handler(#[source] HandlerError),

    #[error("Listener panicked: {message}")]
    Panicked { message: String },
}

impl ListenerError {
    pub(crate) fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_owned())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_owned());
        Self::Panicked { message }
    }
}

/// Run one handler, turning both its error and a panic into a
/// [`ListenerError`].
pub(crate) fn run_handler<F>(handler: F) -> Result<(), ListenerError>
where
    F: FnOnce() -> Result<(), ListenerError>,
{
    std::panic::catch_unwind(std::panic::AssertUnwindSafe(handler))
        .unwrap_or_else(|payload| Err(ListenerError::from_panic(payload.as_ref())))
}
