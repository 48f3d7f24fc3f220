//! Source lifecycle events and the relay that mirrors them downstream.
//!
//! A source stage reports its lifecycle through a closed set of named
//! signals. Consumers only ever hold the outermost returned stream, so the
//! relay re-emits every event from the source stage onto that stream's event
//! channel, preserving emission order. The set is closed: producers, the
//! relay, and tests all share [`LIFECYCLE_EVENTS`].

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use super::teardown::Teardown;

/// Wire names of the lifecycle events, in declaration order of
/// [`SourceEvent`]. Single shared table so producers and tests agree on the
/// closed set.
pub const LIFECYCLE_EVENTS: [&str; 9] = [
    "info",
    "progress",
    "abort",
    "request",
    "response",
    "error",
    "redirect",
    "retry",
    "reconnect",
];

/// A lifecycle signal raised by the source stage.
///
/// Each variant carries the payload of the corresponding signal; there is no
/// catch-all. Events observed on the returned stream arrive in the order the
/// source raised them.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceEvent {
    /// Source metadata became available.
    Info {
        content_length: Option<u64>,
        content_type: Option<String>,
    },
    /// A chunk of the transfer arrived.
    Progress {
        /// Size of this chunk in bytes.
        chunk: u64,
        /// Bytes received so far.
        downloaded: u64,
        /// Total expected bytes, when the remote reported one.
        total: Option<u64>,
    },
    /// The transfer was abandoned before completion.
    Abort,
    /// An outgoing request is about to be issued.
    Request { url: String },
    /// The remote answered.
    Response { status: u16 },
    /// The source failed; the chain is torn down after this is relayed.
    Error(String),
    /// The remote redirected the request.
    Redirect { from: String, to: String },
    /// A failed transfer attempt is about to be retried.
    Retry { attempt: u32 },
    /// The connection was re-established mid-transfer.
    Reconnect { attempt: u32 },
}

impl SourceEvent {
    /// Wire name of this event, as listed in [`LIFECYCLE_EVENTS`].
    pub fn name(&self) -> &'static str {
        match self {
            SourceEvent::Info { .. } => "info",
            SourceEvent::Progress { .. } => "progress",
            SourceEvent::Abort => "abort",
            SourceEvent::Request { .. } => "request",
            SourceEvent::Response { .. } => "response",
            SourceEvent::Error(_) => "error",
            SourceEvent::Redirect { .. } => "redirect",
            SourceEvent::Retry { .. } => "retry",
            SourceEvent::Reconnect { .. } => "reconnect",
        }
    }
}

/// Mirrors every event from the source stage onto the returned stream's
/// channel. An `error` event additionally releases the chain, after the
/// event has been forwarded, so a consumer listening only to the returned
/// stream observes the failure before the stages disappear.
pub(crate) fn spawn_relay(
    mut source_events: mpsc::UnboundedReceiver<SourceEvent>,
    outer: mpsc::UnboundedSender<SourceEvent>,
    teardown: Arc<Teardown>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = source_events.recv().await {
            let fatal = matches!(event, SourceEvent::Error(_));
            if outer.send(event).is_err() {
                debug!("event consumer dropped, stopping relay");
                break;
            }
            if fatal {
                debug!("source raised error, releasing chain");
                teardown.release_all();
            }
        }
    })
}
