//! The returned audio stream and the input union.
//!
//! [`AudioStream`] is the outermost stage handed back to the caller: the
//! final stage's byte stream plus the mirrored source lifecycle events and
//! the teardown handle for the whole chain. Dropping it releases every
//! stage, which is how a consumer cancels — there is no separate
//! cancellation API.

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;

use super::events::SourceEvent;
use super::teardown::Teardown;
use crate::WavepipeError;

/// The source fed into the arbitrary-stream pipeline.
pub enum StreamInput {
    /// A URL the transcoder dials itself.
    Url(String),
    /// An already-open byte reader, piped into the transcoder.
    Reader(Box<dyn AsyncRead + Send + Unpin>),
    /// An in-memory payload, adapted into a one-shot readable.
    Buffer(Bytes),
}

impl fmt::Debug for StreamInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamInput::Url(url) => f.debug_tuple("Url").field(url).finish(),
            StreamInput::Reader(_) => f.debug_tuple("Reader").finish(),
            StreamInput::Buffer(bytes) => f.debug_tuple("Buffer").field(&bytes.len()).finish(),
        }
    }
}

impl From<&str> for StreamInput {
    fn from(url: &str) -> Self {
        StreamInput::Url(url.to_string())
    }
}

impl From<String> for StreamInput {
    fn from(url: String) -> Self {
        StreamInput::Url(url)
    }
}

impl From<Bytes> for StreamInput {
    fn from(bytes: Bytes) -> Self {
        StreamInput::Buffer(bytes)
    }
}

impl From<Vec<u8>> for StreamInput {
    fn from(bytes: Vec<u8>) -> Self {
        StreamInput::Buffer(Bytes::from(bytes))
    }
}

/// The playable stream returned by the pipeline entry points.
///
/// Yields transcoded PCM chunks, or Opus packets when the pipeline was built
/// with `opus_encoded`. Source lifecycle events are mirrored onto
/// [`next_event`](AudioStream::next_event) in emission order. The stream
/// ends after any unrecoverable upstream error; the error itself arrives as
/// an `Err` item first.
pub struct AudioStream {
    data: mpsc::Receiver<Result<Bytes, WavepipeError>>,
    events: mpsc::UnboundedReceiver<SourceEvent>,
    teardown: Arc<Teardown>,
}

impl AudioStream {
    pub(crate) fn new(
        data: mpsc::Receiver<Result<Bytes, WavepipeError>>,
        events: mpsc::UnboundedReceiver<SourceEvent>,
        teardown: Arc<Teardown>,
    ) -> Self {
        Self {
            data,
            events,
            teardown,
        }
    }

    /// Next mirrored lifecycle event, `None` once the source is done
    /// raising them.
    pub async fn next_event(&mut self) -> Option<SourceEvent> {
        self.events.recv().await
    }

    /// Non-blocking variant of [`next_event`](AudioStream::next_event).
    pub fn try_next_event(&mut self) -> Option<SourceEvent> {
        self.events.try_recv().ok()
    }

    /// Releases every stage of the chain now instead of at drop time.
    pub fn destroy(&self) {
        self.teardown.release_all();
    }
}

impl Stream for AudioStream {
    type Item = Result<Bytes, WavepipeError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().data.poll_recv(cx)
    }
}

impl Drop for AudioStream {
    fn drop(&mut self) {
        self.teardown.release_all();
    }
}
