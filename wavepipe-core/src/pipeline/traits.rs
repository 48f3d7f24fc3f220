//! Collaborator abstractions for the pipeline.
//!
//! The pipeline never downloads media itself; it consumes a [`SourceOpener`],
//! which hands back the opened byte stream together with the channel its
//! lifecycle events arrive on. The default opener is
//! [`HttpSource`](super::http_source::HttpSource); tests and embedders can
//! plug in their own.

use bytes::Bytes;
use futures::stream::BoxStream;
use thiserror::Error;
use tokio::sync::mpsc;

use super::events::SourceEvent;
use crate::config::DownloadOptions;

/// An opened remote source: ordered data chunks plus the lifecycle events
/// the opener raises while producing them.
///
/// Dropping `data` cancels the transfer; openers must tolerate that at any
/// point.
pub struct SourceStream {
    /// Ordered chunks of the remote payload.
    pub data: BoxStream<'static, Result<Bytes, SourceError>>,
    /// Lifecycle events, in emission order.
    pub events: mpsc::UnboundedReceiver<SourceEvent>,
}

/// Opens a remote media source for the pipeline.
///
/// Implementations own everything network-shaped: connection handling,
/// redirects, and whatever retry policy they choose. The pipeline only
/// relays what they report.
#[async_trait::async_trait]
pub trait SourceOpener: Send + Sync {
    /// Opens `url` and returns the live source stream.
    ///
    /// # Errors
    ///
    /// - `SourceError::InvalidUrl` - `url` does not parse
    /// - `SourceError::Request` - the transfer could not be started
    /// - `SourceError::BadStatus` - the remote refused the request
    async fn open(&self, url: &str, options: &DownloadOptions)
    -> Result<SourceStream, SourceError>;

    /// Version string of the underlying download implementation, for
    /// diagnostic display only.
    fn version(&self) -> &'static str;
}

/// Errors raised by a remote-source opener.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The URL does not parse.
    #[error("Invalid source url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The transfer could not be started.
    #[error("Request failed: {reason}")]
    Request { reason: String },

    /// The remote refused the request.
    #[error("Remote responded with status {status}")]
    BadStatus { status: u16 },

    /// The transfer died mid-stream and could not be resumed.
    #[error("Connection lost after {downloaded} bytes: {reason}")]
    ConnectionLost { downloaded: u64, reason: String },
}
