//! Stream composition pipeline for real-time audio playback.
//!
//! Chains a remote or arbitrary input source through the external transcoder
//! and, on request, through the Opus encoder, returning the last stage as an
//! [`AudioStream`]. Source lifecycle events are mirrored onto the returned
//! stream and a teardown coordinator releases every stage on any exit path:
//! upstream failure, transcoder failure, or the consumer dropping the
//! stream.
//!
//! Stages never see each other's internals; each is wired to the next over a
//! channel and torn down upstream-first.

pub mod args;
pub mod encode;
pub mod events;
pub mod http_source;
pub mod stream;
pub(crate) mod teardown;
pub mod traits;
pub mod transcode;

use std::sync::Arc;

use tokio::sync::mpsc;
use url::Url;

pub use events::{LIFECYCLE_EVENTS, SourceEvent};
pub use http_source::HttpSource;
pub use stream::{AudioStream, StreamInput};
pub use traits::{SourceError, SourceOpener, SourceStream};

use crate::config::StreamOptions;
use crate::{Result, WavepipeError};
use args::{InputKind, build_transcode_args};
use encode::OpusEncodeStage;
use teardown::Teardown;
use transcode::{TranscodeInput, TranscodeStage};

/// Opens a remote media source and returns the composed audio stream.
///
/// The URL is fetched by the bundled [`HttpSource`] opener; its lifecycle
/// events surface on the returned stream. Must be called within a Tokio
/// runtime.
///
/// # Errors
///
/// - `WavepipeError::InvalidArgument` - `url` is empty or does not parse;
///   no stage is constructed
/// - `WavepipeError::Source` - the opener could not start the transfer
/// - `WavepipeError::Transcode` - the transcoder process failed to start
pub async fn source(url: &str, options: StreamOptions) -> Result<AudioStream> {
    source_with(&HttpSource::new(), url, options).await
}

/// [`source`] with an explicit remote-source opener.
pub async fn source_with(
    opener: &dyn SourceOpener,
    url: &str,
    options: StreamOptions,
) -> Result<AudioStream> {
    if url.trim().is_empty() {
        return Err(invalid_argument("source url must be a non-empty string"));
    }
    if Url::parse(url).is_err() {
        return Err(invalid_argument("source url does not parse"));
    }

    let src = opener.open(url, &options.download).await?;

    let teardown = Arc::new(Teardown::new());
    let built = build_transcode_args(&options, InputKind::Piped);
    let (transcode, pump, guard) = TranscodeStage::spawn(
        &options,
        built,
        TranscodeInput::Stream(src.data),
        Arc::clone(&teardown),
    )?;

    let (event_tx, event_rx) = mpsc::unbounded_channel();
    events::spawn_relay(src.events, event_tx, Arc::clone(&teardown));

    finish_chain(transcode, pump, guard, event_rx, &options, teardown)
}

/// Builds the same transcode/encode chain over an arbitrary input: a URL the
/// transcoder dials itself, an already-open reader, or an in-memory buffer
/// adapted into a one-shot readable. Must be called within a Tokio runtime.
///
/// No remote source stage exists on this path, so the returned stream raises
/// no lifecycle events.
///
/// # Errors
///
/// - `WavepipeError::InvalidArgument` - the URL or buffer is empty; no
///   stage is constructed
/// - `WavepipeError::Transcode` - the transcoder process failed to start
pub fn arbitrary_stream(input: StreamInput, options: StreamOptions) -> Result<AudioStream> {
    let (built, transcode_input) = match input {
        StreamInput::Url(url) => {
            if url.trim().is_empty() {
                return Err(invalid_argument("input url must be a non-empty string"));
            }
            let built = build_transcode_args(&options, InputKind::Url(&url));
            (built, TranscodeInput::Direct)
        }
        StreamInput::Reader(reader) => (
            build_transcode_args(&options, InputKind::Piped),
            TranscodeInput::Reader(reader),
        ),
        StreamInput::Buffer(bytes) => {
            if bytes.is_empty() {
                return Err(invalid_argument("input buffer must not be empty"));
            }
            (
                build_transcode_args(&options, InputKind::Piped),
                TranscodeInput::Buffer(bytes),
            )
        }
    };

    let teardown = Arc::new(Teardown::new());
    let (transcode, pump, guard) =
        TranscodeStage::spawn(&options, built, transcode_input, Arc::clone(&teardown))?;

    let (_event_tx, event_rx) = mpsc::unbounded_channel();
    finish_chain(transcode, pump, guard, event_rx, &options, teardown)
}

/// Registers the constructed stages upstream-first and attaches the optional
/// encode stage, returning the outermost stream.
fn finish_chain(
    transcode: TranscodeStage,
    pump: Option<teardown::TaskStage>,
    guard: transcode::TranscodeGuard,
    event_rx: mpsc::UnboundedReceiver<SourceEvent>,
    options: &StreamOptions,
    teardown: Arc<Teardown>,
) -> Result<AudioStream> {
    if let Some(pump) = pump {
        teardown.register(Box::new(pump));
    }
    teardown.register(Box::new(guard));

    let output = if options.opus_encoded {
        match OpusEncodeStage::spawn(transcode.output) {
            Ok((encode, stage)) => {
                teardown.register(Box::new(stage));
                encode.output
            }
            Err(e) => {
                teardown.release_all();
                return Err(e.into());
            }
        }
    } else {
        transcode.output
    };

    Ok(AudioStream::new(output, event_rx, teardown))
}

fn invalid_argument(reason: &str) -> WavepipeError {
    WavepipeError::InvalidArgument {
        reason: reason.to_string(),
    }
}
