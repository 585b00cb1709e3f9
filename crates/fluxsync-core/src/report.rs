// ── Error reporting ──
//
// Failures that happen off the caller's path (a listener's payload not
// decoding, a batch fetch failing, a stream refusing to open) are handed
// to an `ErrorSink` instead of being swallowed.

use std::error::Error;
use std::sync::Arc;

/// Receives errors that have no caller to return to.
pub trait ErrorSink: Send + Sync + 'static {
    /// `context` names where the failure happened, e.g. `"listener:sy_label_set"`.
    fn report(&self, context: &str, error: &(dyn Error + 'static));
}

/// Shared handle to a sink.
pub type SharedSink = Arc<dyn ErrorSink>;

/// Default sink: one `warn!` event per error.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl ErrorSink for TracingSink {
    fn report(&self, context: &str, error: &(dyn Error + 'static)) {
        tracing::warn!(context, error = %error, "fluxsync error");
    }
}

impl<F> ErrorSink for F
where
    F: Fn(&str, &(dyn Error + 'static)) + Send + Sync + 'static,
{
    fn report(&self, context: &str, error: &(dyn Error + 'static)) {
        self(context, error);
    }
}

pub(crate) fn default_sink() -> SharedSink {
    Arc::new(TracingSink)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::error::FetchError;

    #[test]
    fn closures_are_sinks() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let captured = Arc::clone(&seen);
        let sink: SharedSink = Arc::new(move |context: &str, error: &(dyn Error + 'static)| {
            captured
                .lock()
                .unwrap()
                .push(format!("{context}: {error}"));
        });

        sink.report("retriever:labels", &FetchError::new("boom"));
        assert_eq!(*seen.lock().unwrap(), vec!["retriever:labels: boom"]);
    }
}
