// ── Multiplexed stream transport ──
//
// A `Transport` opens one stream per channel set. Reconnect policy is
// NOT handled here: callers reopen when the stream ends or the channel
// set changes.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::future::BoxFuture;
use futures_util::stream::{BoxStream, Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::error::Error;
use crate::frame::Frame;

/// Something that can open a multiplexed frame stream.
pub trait Transport: Send + Sync + 'static {
    /// Open a stream delivering frames for exactly `channels`.
    ///
    /// Resolves once the subscription handshake is complete, so frames
    /// published after this returns are delivered.
    fn open_stream(&self, channels: Vec<String>) -> BoxFuture<'static, Result<FrameStream, Error>>;
}

/// A live, closable stream of frames.
///
/// Ends (yields `None`) when the remote side closes, when
/// [`close`](Self::close) is called, or when the handle is dropped.
pub struct FrameStream {
    frames: BoxStream<'static, Result<Frame, Error>>,
    cancel: CancellationToken,
}

impl FrameStream {
    /// Wrap a frame stream. Cancelling `cancel` terminates it.
    pub fn new<S>(frames: S, cancel: CancellationToken) -> Self
    where
        S: Stream<Item = Result<Frame, Error>> + Send + 'static,
    {
        let frames = frames.take_until(cancel.clone().cancelled_owned()).boxed();
        Self { frames, cancel }
    }

    /// Close the stream. Idempotent.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Stream for FrameStream {
    type Item = Result<Frame, Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.frames.poll_next_unpin(cx)
    }
}

impl Drop for FrameStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for FrameStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameStream")
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn close_terminates_pending_stream() {
        let cancel = CancellationToken::new();
        let mut stream = FrameStream::new(futures_util::stream::pending(), cancel);

        stream.close();
        assert!(stream.is_closed());
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn yields_inner_frames_until_exhausted() {
        let frames = futures_util::stream::iter(vec![
            Ok(Frame::new("a", "1")),
            Ok(Frame::new("b", "2")),
        ]);
        let mut stream = FrameStream::new(frames, CancellationToken::new());

        assert_eq!(stream.next().await.unwrap().unwrap().channel, "a");
        assert_eq!(stream.next().await.unwrap().unwrap().channel, "b");
        assert!(stream.next().await.is_none());
    }
}
