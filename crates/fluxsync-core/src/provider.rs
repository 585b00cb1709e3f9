// ── Provider ──
//
// Lifecycle owner for one streamer: binds it to whatever transport is
// active, reconnects with backoff when the stream drops, and hands out
// a listener registry to the rest of the application.

use std::hash::Hash;
use std::sync::Arc;

use fluxsync_api::Transport;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::error::CoreError;
use crate::report::{SharedSink, default_sink};
use crate::store::{Subscription, UnaryStore};
use crate::streamer::{ChannelBinding, Listener, StreamStatus, Streamer};

// ── ConnectionState ──────────────────────────────────────────────

/// Connection state observable by consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Retrying after a failed open or a dropped stream; `attempt`
    /// counts the failed opens so far.
    Reconnecting { attempt: u32 },
    Failed,
}

// ── ListenerRegistry ─────────────────────────────────────────────

/// The `add_listener` capability of a provider, safe to hand to any
/// component that needs to react to pushed frames.
#[derive(Clone, Debug)]
pub struct ListenerRegistry {
    streamer: Streamer,
}

impl ListenerRegistry {
    pub fn add_listener(&self, listener: Listener) -> Subscription {
        self.streamer.add_listener(listener)
    }
}

// ── Provider ─────────────────────────────────────────────────────

/// Binds a [`Streamer`] to the active transport.
///
/// Cheaply cloneable via `Arc<ProviderInner>`. Listeners may be added at
/// any time, with or without a transport; they survive reconnects.
#[derive(Clone)]
pub struct Provider {
    inner: Arc<ProviderInner>,
}

struct ProviderInner {
    config: SyncConfig,
    streamer: Streamer,
    sink: SharedSink,
    connection_state: watch::Sender<ConnectionState>,
}

impl Provider {
    pub fn new(config: SyncConfig) -> Self {
        Self::with_sink(config, default_sink())
    }

    pub fn with_sink(config: SyncConfig, sink: SharedSink) -> Self {
        let (connection_state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(ProviderInner {
                config,
                streamer: Streamer::with_sink(Arc::clone(&sink)),
                sink,
                connection_state,
            }),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    pub fn streamer(&self) -> &Streamer {
        &self.inner.streamer
    }

    pub fn registry(&self) -> ListenerRegistry {
        ListenerRegistry {
            streamer: self.inner.streamer.clone(),
        }
    }

    pub fn add_listener(&self, listener: Listener) -> Subscription {
        self.inner.streamer.add_listener(listener)
    }

    /// Install every binding of one store. The returned subscription
    /// removes all of them.
    pub fn register<K, V, I>(&self, store: &UnaryStore<K, V>, bindings: I) -> Subscription
    where
        K: Eq + Hash + Clone + Send + Sync + 'static,
        V: Send + Sync + 'static,
        I: IntoIterator<Item = ChannelBinding<K, V>>,
    {
        let subscriptions = bindings
            .into_iter()
            .map(|binding| self.add_listener(binding.bind(store.clone())))
            .collect();
        Subscription::all(subscriptions)
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.connection_state.borrow().clone()
    }

    /// Subscribe to connection state changes.
    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection_state.subscribe()
    }

    // ── Activation ───────────────────────────────────────────────

    /// Bind to `transport` with a single open attempt, or close the live
    /// stream when `None`.
    pub async fn set_transport(
        &self,
        transport: Option<Arc<dyn Transport>>,
    ) -> Result<(), CoreError> {
        let Some(transport) = transport else {
            self.inner.streamer.close().await;
            self.set_state(ConnectionState::Disconnected);
            debug!("transport detached");
            return Ok(());
        };

        self.set_state(ConnectionState::Connecting);
        match self.inner.streamer.update_streamer(transport).await {
            Ok(()) => {
                self.set_state(ConnectionState::Connected);
                Ok(())
            }
            Err(e) => {
                self.set_state(ConnectionState::Disconnected);
                Err(e)
            }
        }
    }

    /// Bind to `transport`, retrying failed opens with exponential backoff.
    pub async fn connect(&self, transport: Arc<dyn Transport>) -> Result<(), CoreError> {
        self.connect_with_backoff(transport, false).await
    }

    /// Drive activation from a watch of the active transport until
    /// `cancel` fires or the sender is dropped.
    ///
    /// Reconnects when the transport changes or the live stream ends.
    pub async fn run(
        &self,
        mut transports: watch::Receiver<Option<Arc<dyn Transport>>>,
        cancel: CancellationToken,
    ) {
        let mut status = self.inner.streamer.watch_status();
        let mut reconnecting = false;

        loop {
            let current = transports.borrow_and_update().clone();

            let connected = match current {
                None => {
                    // Detaching cannot fail.
                    let _ = self.set_transport(None).await;
                    false
                }
                Some(transport) => {
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => break,
                        changed = transports.changed() => {
                            if changed.is_err() {
                                break;
                            }
                            reconnecting = false;
                            continue;
                        }
                        result = self.connect_with_backoff(transport, reconnecting) => match result {
                            Ok(()) => true,
                            Err(e) => {
                                self.inner.sink.report("provider:connect", &e);
                                false
                            }
                        },
                    }
                }
            };

            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                changed = transports.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    reconnecting = false;
                }
                () = wait_for_end(&mut status), if connected => {
                    info!("stream ended, reconnecting");
                    reconnecting = true;
                }
            }
        }

        self.inner.streamer.close().await;
        self.set_state(ConnectionState::Disconnected);
        debug!("provider loop exiting");
    }

    // ── Private helpers ──────────────────────────────────────────

    async fn connect_with_backoff(
        &self,
        transport: Arc<dyn Transport>,
        reconnecting: bool,
    ) -> Result<(), CoreError> {
        let reconnect = &self.inner.config.reconnect;
        let mut attempt: u32 = 0;

        loop {
            self.set_state(if attempt == 0 && !reconnecting {
                ConnectionState::Connecting
            } else {
                ConnectionState::Reconnecting { attempt }
            });

            let err = match self
                .inner
                .streamer
                .update_streamer(Arc::clone(&transport))
                .await
            {
                Ok(()) => {
                    self.set_state(ConnectionState::Connected);
                    return Ok(());
                }
                Err(e) => e,
            };

            warn!(error = %err, attempt, "stream open failed");

            if !err.is_transient() {
                self.set_state(ConnectionState::Failed);
                return Err(err);
            }
            if reconnect.exhausted(attempt) {
                self.set_state(ConnectionState::Failed);
                return Err(CoreError::RetriesExhausted {
                    attempts: attempt + 1,
                });
            }

            let delay = reconnect.backoff(attempt);
            info!(
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                attempt,
                "waiting before reconnect"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    fn set_state(&self, state: ConnectionState) {
        self.inner.connection_state.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state;
            true
        });
    }
}

impl std::fmt::Debug for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider")
            .field("state", &self.state())
            .field("streamer", &self.inner.streamer)
            .finish_non_exhaustive()
    }
}

/// Resolves once the stream is marked ended; never if the streamer is gone.
async fn wait_for_end(status: &mut watch::Receiver<StreamStatus>) {
    if status
        .wait_for(|s| *s == StreamStatus::Ended)
        .await
        .is_err()
    {
        std::future::pending::<()>().await;
    }
}
