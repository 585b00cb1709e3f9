// ── In-process transport ──
//
// Broadcast-backed `Transport` for embedding the cache next to its data
// source and for exercising stream lifecycles without a server. Every
// opened stream sees frames published after it was opened, filtered to
// its own channel set.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures_util::future::BoxFuture;
use futures_util::stream::StreamExt;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_util::sync::CancellationToken;

use crate::error::Error;
use crate::frame::Frame;
use crate::transport::{FrameStream, Transport};

const FRAME_CHANNEL_CAPACITY: usize = 1024;

/// In-process [`Transport`] backed by a `broadcast` channel.
///
/// Cheaply cloneable; clones publish into the same channel.
#[derive(Clone)]
pub struct MemoryTransport {
    inner: Arc<MemoryInner>,
}

struct MemoryInner {
    frames: broadcast::Sender<Frame>,
    /// Channel set of every `open_stream` call, in order.
    opened: Mutex<Vec<Vec<String>>>,
    /// Cancellation tokens of every stream handed out.
    connections: Mutex<Vec<CancellationToken>>,
    /// Number of upcoming opens that should fail.
    failures: AtomicUsize,
}

impl MemoryTransport {
    pub fn new() -> Self {
        let (frames, _) = broadcast::channel(FRAME_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(MemoryInner {
                frames,
                opened: Mutex::new(Vec::new()),
                connections: Mutex::new(Vec::new()),
                failures: AtomicUsize::new(0),
            }),
        }
    }

    /// Publish a frame to every open stream subscribed to its channel.
    /// Returns the number of streams that received it.
    pub fn publish(&self, frame: Frame) -> usize {
        self.inner.frames.send(frame).unwrap_or(0)
    }

    /// Make the next `count` calls to `open_stream` fail.
    pub fn fail_next_opens(&self, count: usize) {
        self.inner.failures.store(count, Ordering::SeqCst);
    }

    /// End every stream opened so far, as if the server hung up.
    pub fn disconnect_all(&self) {
        let mut connections = self
            .inner
            .connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for token in connections.drain(..) {
            token.cancel();
        }
    }

    /// Channel sets requested so far, one entry per `open_stream` call.
    pub fn opened(&self) -> Vec<Vec<String>> {
        self.inner
            .opened
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn open_count(&self) -> usize {
        self.inner
            .opened
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn take_failure(&self) -> bool {
        self.inner
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for MemoryTransport {
    fn open_stream(&self, channels: Vec<String>) -> BoxFuture<'static, Result<FrameStream, Error>> {
        self.inner
            .opened
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(channels.clone());

        if self.take_failure() {
            tracing::debug!(?channels, "memory transport rejecting open");
            return Box::pin(async { Err(Error::OpenRejected("injected failure".into())) });
        }

        // Subscribe before returning so nothing published afterwards is missed.
        let receiver = self.inner.frames.subscribe();
        let wanted: HashSet<String> = channels.into_iter().collect();
        let frames = BroadcastStream::new(receiver).filter_map(move |item| {
            let keep = match item {
                Ok(frame) if wanted.contains(&frame.channel) => Some(Ok(frame)),
                Ok(_) => None,
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "memory stream lagged, frames dropped");
                    None
                }
            };
            futures_util::future::ready(keep)
        });

        let cancel = CancellationToken::new();
        self.inner
            .connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(cancel.clone());

        let stream = FrameStream::new(frames, cancel);
        Box::pin(async move { Ok(stream) })
    }
}
