//! `fluxsync watch`: print frames pushed on the given channels.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use fluxsync_api::WebSocketTransport;
use fluxsync_core::{ConnectionState, Listener, Provider, Subscription, Transport};

use crate::cli::{GlobalOpts, WatchArgs};
use crate::error::CliError;

#[derive(Debug, Serialize)]
struct WatchedFrame {
    channel: String,
    payload: Value,
}

pub async fn handle(args: &WatchArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let cfg = super::load_config(global)?;
    let profile = super::effective_profile(global, &cfg)?;
    let url = profile.stream_url()?;
    let sync = fluxsync_config::profile_to_sync_config(&profile, &cfg.defaults);

    let transport = profile
        .headers
        .iter()
        .fold(WebSocketTransport::new(url.clone()), |t, (name, value)| {
            t.with_header(name, value)
        });
    let transport: Arc<dyn Transport> = Arc::new(transport);

    let provider = Provider::new(sync);
    let (frames_tx, mut frames) = mpsc::unbounded_channel();
    let subscription = Subscription::all(
        args.channels
            .iter()
            .map(|channel| {
                let tx = frames_tx.clone();
                let name = channel.clone();
                let opened = channel.clone();
                let listener = Listener::json(channel.clone(), move |payload: Value| {
                    let _ = tx.send(WatchedFrame {
                        channel: name.clone(),
                        payload,
                    });
                })
                .on_open(move || info!(channel = %opened, "channel live"));
                provider.add_listener(listener)
            })
            .collect(),
    );
    drop(frames_tx);

    // The sender stays alive for the whole watch so `run` keeps going.
    let (_active, transports) = watch::channel(Some(transport));
    let cancel = CancellationToken::new();
    let runner = {
        let provider = provider.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { provider.run(transports, cancel).await })
    };

    let mut states = provider.connection_state();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut seen = 0usize;

    let outcome = loop {
        tokio::select! {
            _ = &mut ctrl_c => break Ok(()),
            frame = frames.recv() => {
                let Some(frame) = frame else { break Ok(()) };
                if let Err(e) = super::print_json(&frame, global.output) {
                    break Err(e);
                }
                seen += 1;
                if args.count.is_some_and(|limit| seen >= limit) {
                    break Ok(());
                }
            }
            changed = states.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                let state = states.borrow_and_update().clone();
                debug!(?state, "connection state changed");
                if state == ConnectionState::Failed {
                    break Err(CliError::StreamFailed { url: url.to_string() });
                }
            }
        }
    };

    cancel.cancel();
    let _ = runner.await;
    subscription.unsubscribe();
    provider.streamer().close().await;
    outcome
}
