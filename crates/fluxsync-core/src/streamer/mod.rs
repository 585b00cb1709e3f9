// ── Streamer ──
//
// Owns one logical subscription to the multiplexed push stream. Listener
// registrations are plain data; the live stream is reconciled to cover
// exactly the channels that currently have listeners. Reconnect policy
// lives in the provider, the streamer never retries on its own.

mod listener;

use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use fluxsync_api::{Frame, FrameStream, Transport};
use futures_util::StreamExt;
use indexmap::IndexMap;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::{CoreError, run_handler};
use crate::report::{SharedSink, default_sink};
use crate::store::Subscription;

pub use listener::{ChannelBinding, JsonSchema, Listener, Schema};

use listener::{Deliver, OnOpen};

/// Whether the streamer currently has a live stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum StreamStatus {
    /// No stream open: never opened, closed, or no channels required.
    Idle,
    Live,
    /// The stream ended or failed to open; a reconcile is needed.
    Ended,
}

struct Entry {
    id: u64,
    deliver: Deliver,
    on_open: Mutex<Option<OnOpen>>,
    active: AtomicBool,
}

struct LiveTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct LiveState {
    channels: BTreeSet<String>,
    transport: Option<Arc<dyn Transport>>,
    task: Option<LiveTask>,
}

struct StreamerInner {
    listeners: Mutex<IndexMap<String, Vec<Arc<Entry>>>>,
    next_id: AtomicU64,
    /// Serializes reconciliation; held across the stream handshake.
    live: tokio::sync::Mutex<LiveState>,
    /// Channels of the live stream, readable without awaiting.
    live_channels: Mutex<BTreeSet<String>>,
    /// Transport used by reconciles that `add_listener` schedules.
    transport: Mutex<Option<Arc<dyn Transport>>>,
    /// Bumped per open/close so a stale read loop cannot flip the status.
    generation: AtomicU64,
    status: watch::Sender<StreamStatus>,
    sink: SharedSink,
}

/// Channel listener registry bound to one push stream.
///
/// Cheaply cloneable; clones share registrations and the live stream.
#[derive(Clone)]
pub struct Streamer {
    inner: Arc<StreamerInner>,
}

impl Streamer {
    pub fn new() -> Self {
        Self::with_sink(default_sink())
    }

    pub fn with_sink(sink: SharedSink) -> Self {
        let (status, _) = watch::channel(StreamStatus::Idle);
        Self {
            inner: Arc::new(StreamerInner {
                listeners: Mutex::new(IndexMap::new()),
                next_id: AtomicU64::new(0),
                live: tokio::sync::Mutex::new(LiveState::default()),
                live_channels: Mutex::new(BTreeSet::new()),
                transport: Mutex::new(None),
                generation: AtomicU64::new(0),
                status,
                sink,
            }),
        }
    }

    // ── Registrations ────────────────────────────────────────────────

    /// Register a listener. The returned subscription is usable at once.
    ///
    /// When the channel is new, or nothing is live, a reconcile against
    /// the last transport is scheduled on the current runtime.
    pub fn add_listener(&self, listener: Listener) -> Subscription {
        let Listener {
            channel,
            deliver,
            on_open,
        } = listener;

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let entry = Arc::new(Entry {
            id,
            deliver,
            on_open: Mutex::new(on_open),
            active: AtomicBool::new(true),
        });

        let first_for_channel = {
            let mut listeners = lock(&self.inner.listeners);
            let entries = listeners.entry(channel.clone()).or_default();
            entries.push(Arc::clone(&entry));
            entries.len() == 1
        };
        debug!(channel = %channel, id, first_for_channel, "listener added");

        if lock(&self.inner.live_channels).contains(&channel) {
            run_on_open(&entry);
        }
        if first_for_channel || self.status() != StreamStatus::Live {
            self.schedule_reconcile();
        }

        let inner = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            entry.active.store(false, Ordering::Release);
            if let Some(inner) = inner.upgrade() {
                inner.remove_listener(&channel, entry.id);
            }
        })
    }

    /// Channels that currently have at least one listener.
    pub fn required_channels(&self) -> BTreeSet<String> {
        lock(&self.inner.listeners)
            .iter()
            .filter(|(_, entries)| !entries.is_empty())
            .map(|(channel, _)| channel.clone())
            .collect()
    }

    /// Channels covered by the live stream (empty when not live).
    pub fn live_channels(&self) -> BTreeSet<String> {
        lock(&self.inner.live_channels).clone()
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.inner.listeners).values().map(Vec::len).sum()
    }

    pub fn status(&self) -> StreamStatus {
        *self.inner.status.borrow()
    }

    pub fn watch_status(&self) -> watch::Receiver<StreamStatus> {
        self.inner.status.subscribe()
    }

    // ── Stream lifecycle ─────────────────────────────────────────────

    /// Make the live stream match the registered channel set.
    ///
    /// Reopens when the set changed, the previous stream ended, or the
    /// transport is a different one. A no-op otherwise. Open failures are
    /// reported to the sink and returned; nothing is retried here.
    pub async fn update_streamer(&self, transport: Arc<dyn Transport>) -> Result<(), CoreError> {
        *lock(&self.inner.transport) = Some(Arc::clone(&transport));

        let mut live = self.inner.live.lock().await;
        let required = self.required_channels();

        let same_transport = live
            .transport
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, &transport));
        // The read loop marks the status before it exits, so the task may
        // still be finishing after the stream is already gone.
        let running = self.status() == StreamStatus::Live
            && live
                .task
                .as_ref()
                .is_some_and(|task| !task.handle.is_finished());
        let unchanged = same_transport && live.channels == required;

        if unchanged && (running || required.is_empty()) {
            trace!("stream already up to date");
            return Ok(());
        }

        self.inner.teardown(&mut live);
        live.transport = Some(Arc::clone(&transport));

        if required.is_empty() {
            debug!("no channels required, stream stays closed");
            self.inner.status.send_replace(StreamStatus::Idle);
            return Ok(());
        }

        let channels: Vec<String> = required.iter().cloned().collect();
        debug!(?channels, "opening stream");

        let stream = match transport.open_stream(channels).await {
            Ok(stream) => stream,
            Err(e) => {
                let err = CoreError::from(e);
                self.inner.sink.report("streamer:open", &err);
                self.inner.status.send_replace(StreamStatus::Ended);
                return Err(err);
            }
        };

        let generation = self.inner.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(read_loop(
            Arc::downgrade(&self.inner),
            stream,
            cancel.clone(),
            generation,
        ));

        live.task = Some(LiveTask { cancel, handle });
        live.channels.clone_from(&required);
        *lock(&self.inner.live_channels) = required.clone();
        self.inner.status.send_replace(StreamStatus::Live);
        drop(live);

        self.inner.fire_on_open(&required);
        Ok(())
    }

    /// Reconcile against the last transport given to
    /// [`update_streamer`](Self::update_streamer), if any.
    pub async fn reconcile(&self) -> Result<(), CoreError> {
        let transport = lock(&self.inner.transport).clone();
        match transport {
            Some(transport) => self.update_streamer(transport).await,
            None => Ok(()),
        }
    }

    /// Close the live stream and forget the transport. Registrations are
    /// kept. Idempotent.
    pub async fn close(&self) {
        *lock(&self.inner.transport) = None;

        let mut live = self.inner.live.lock().await;
        self.inner.teardown(&mut live);
        live.transport = None;
        self.inner.status.send_replace(StreamStatus::Idle);
    }

    fn schedule_reconcile(&self) {
        if lock(&self.inner.transport).is_none() {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!("no runtime, reconcile deferred to next update_streamer");
            return;
        };
        let streamer = self.clone();
        runtime.spawn(async move {
            // Failures are already reported by update_streamer.
            let _ = streamer.reconcile().await;
        });
    }
}

impl Default for Streamer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Streamer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Streamer")
            .field("status", &self.status())
            .field("channels", &self.live_channels())
            .field("listeners", &self.listener_count())
            .finish()
    }
}

// ── Inner helpers ────────────────────────────────────────────────────

impl StreamerInner {
    fn remove_listener(&self, channel: &str, id: u64) {
        let mut listeners = lock(&self.listeners);
        if let Some(entries) = listeners.get_mut(channel) {
            entries.retain(|e| e.id != id);
            if entries.is_empty() {
                listeners.shift_remove(channel);
                debug!(channel, "last listener removed");
            }
        }
    }

    fn teardown(&self, live: &mut LiveState) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        if let Some(task) = live.task.take() {
            task.cancel.cancel();
            debug!(channels = ?live.channels, "stream closed");
        }
        live.channels.clear();
        lock(&self.live_channels).clear();
    }

    fn dispatch(&self, frame: &Frame) {
        let entries = match lock(&self.listeners).get(&frame.channel) {
            Some(entries) => entries.clone(),
            None => {
                trace!(channel = %frame.channel, "frame for channel without listeners");
                return;
            }
        };

        for entry in entries {
            if !entry.active.load(Ordering::Acquire) {
                continue;
            }
            if let Err(e) = run_handler(|| (entry.deliver)(frame)) {
                let context = format!("listener:{}", frame.channel);
                self.sink.report(&context, &e);
            }
        }
    }

    fn fire_on_open(&self, channels: &BTreeSet<String>) {
        let entries: Vec<Arc<Entry>> = {
            let listeners = lock(&self.listeners);
            channels
                .iter()
                .filter_map(|channel| listeners.get(channel))
                .flatten()
                .cloned()
                .collect()
        };
        for entry in &entries {
            run_on_open(entry);
        }
    }

    fn mark_ended(&self, generation: u64) {
        if self.generation.load(Ordering::Acquire) == generation {
            lock(&self.live_channels).clear();
            self.status.send_replace(StreamStatus::Ended);
        }
    }
}

impl Drop for StreamerInner {
    fn drop(&mut self) {
        if let Some(task) = self.live.get_mut().task.take() {
            task.cancel.cancel();
        }
    }
}

fn run_on_open(entry: &Entry) {
    let on_open = lock(&entry.on_open).take();
    if let Some(on_open) = on_open {
        on_open();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Read loop ────────────────────────────────────────────────────────

/// Marks the stream ended however the read task exits, unless a newer
/// stream has replaced it.
struct EndGuard {
    inner: Weak<StreamerInner>,
    generation: u64,
}

impl Drop for EndGuard {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.mark_ended(self.generation);
        }
    }
}

async fn read_loop(
    inner: Weak<StreamerInner>,
    mut stream: FrameStream,
    cancel: CancellationToken,
    generation: u64,
) {
    let _guard = EndGuard {
        inner: inner.clone(),
        generation,
    };

    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            next = stream.next() => next,
        };

        let Some(inner) = inner.upgrade() else { break };
        match next {
            Some(Ok(frame)) => inner.dispatch(&frame),
            Some(Err(e)) => {
                let err = CoreError::from(e);
                inner.sink.report("streamer:read", &err);
                break;
            }
            None => {
                debug!(generation, "stream ended");
                break;
            }
        }
    }
}
