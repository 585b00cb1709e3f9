// ── Runtime configuration ──
//
// Plain structs consumed by the provider and retrievers. Loading from
// files and the environment lives in `fluxsync-config`.

use std::time::Duration;

/// Default debounce window for batch retrieval.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(20);

/// Runtime settings for one cache instance.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// How long a retriever accumulates calls before fetching.
    pub debounce: Duration,

    /// Stream reconnection policy used by [`Provider`](crate::Provider).
    pub reconnect: ReconnectConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
            reconnect: ReconnectConfig::default(),
        }
    }
}

// ── ReconnectConfig ──────────────────────────────────────────────────

/// Exponential backoff configuration for stream reconnection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt. Default: 1s.
    pub initial_delay: Duration,

    /// Upper bound on backoff delay. Default: 30s.
    pub max_delay: Duration,

    /// Maximum reconnection attempts before giving up.
    /// `None` means retry forever.
    pub max_retries: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_retries: None,
        }
    }
}

impl ReconnectConfig {
    /// Delay before reconnect attempt number `attempt` (zero-based).
    ///
    /// Doubles from `initial_delay`, capped at `max_delay`, then spread by
    /// a deterministic +/-25% jitter seeded from the attempt number.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let base = self.initial_delay.as_secs_f64() * 2.0_f64.powi(exponent);
        let capped = base.min(self.max_delay.as_secs_f64());

        let jitter_factor = 1.0 + 0.25 * (f64::from(attempt) * 7.3).sin();
        let with_jitter = (capped * jitter_factor).max(0.0);

        Duration::from_secs_f64(with_jitter)
    }

    /// Whether `attempt` failed attempts exhaust the retry budget.
    pub fn exhausted(&self, attempt: u32) -> bool {
        self.max_retries.is_some_and(|max| attempt >= max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.debounce, Duration::from_millis(20));
        assert_eq!(config.reconnect.initial_delay, Duration::from_secs(1));
        assert_eq!(config.reconnect.max_delay, Duration::from_secs(30));
        assert!(config.reconnect.max_retries.is_none());
    }

    #[test]
    fn backoff_grows_and_is_capped() {
        let config = ReconnectConfig::default();

        let first = config.backoff(0);
        assert_eq!(first, Duration::from_secs(1));

        let third = config.backoff(2);
        assert!(third > Duration::from_secs(2), "got {third:?}");

        // 1.25 * max is the jitter ceiling.
        let late = config.backoff(20);
        assert!(late <= Duration::from_secs_f64(37.5), "got {late:?}");
    }

    #[test]
    fn retry_budget() {
        let config = ReconnectConfig {
            max_retries: Some(2),
            ..ReconnectConfig::default()
        };
        assert!(!config.exhausted(1));
        assert!(config.exhausted(2));
        assert!(!ReconnectConfig::default().exhausted(u32::MAX));
    }
}
