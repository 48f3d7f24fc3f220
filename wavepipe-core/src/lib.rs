//! Wavepipe Core - stream composition for real-time audio playback
//!
//! This crate turns a remote audio/video source (a URL or an arbitrary byte
//! stream) into a playable, optionally Opus-encoded, PCM audio stream suitable
//! for feeding a voice transport. The crate owns the composition only: it
//! builds a transcoder invocation from per-call options, chains an input
//! source through the transcoder and optionally through an Opus encoder,
//! mirrors source lifecycle events onto the returned stream, and guarantees
//! that every stage is released when any stage fails or the consumer stops
//! reading. Downloading, decoding, and encoding are delegated to external
//! collaborators.

pub mod config;
pub mod pipeline;

// Re-export main types for convenient access
pub use config::{DownloadOptions, StreamOptions};
pub use pipeline::encode::EncodeError;
pub use pipeline::events::{LIFECYCLE_EVENTS, SourceEvent};
pub use pipeline::http_source::HttpSource;
pub use pipeline::stream::{AudioStream, StreamInput};
pub use pipeline::traits::{SourceError, SourceOpener, SourceStream};
pub use pipeline::transcode::TranscodeError;
pub use pipeline::{arbitrary_stream, source, source_with};

/// Version of the bundled download collaborator, for diagnostic display only.
///
/// Custom openers report their own version through
/// [`SourceOpener::version`].
pub const VERSION: &str = HttpSource::VERSION;

/// Errors that can bubble up from any pipeline stage.
#[derive(Debug, thiserror::Error)]
pub enum WavepipeError {
    /// The caller handed an unusable source before any stage was built.
    #[error("Invalid argument: {reason}")]
    InvalidArgument { reason: String },

    /// The remote-source stage failed.
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    /// The transcoder stage failed.
    #[error("Transcode error: {0}")]
    Transcode(#[from] TranscodeError),

    /// The Opus encode stage failed.
    #[error("Encode error: {0}")]
    Encode(#[from] EncodeError),
}

pub type Result<T> = std::result::Result<T, WavepipeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_exposed() {
        assert!(!VERSION.is_empty());
        assert_eq!(HttpSource::new().version(), VERSION);
    }

    #[test]
    fn error_display_includes_reason() {
        let err = WavepipeError::InvalidArgument {
            reason: "source url must not be empty".to_string(),
        };
        assert!(err.to_string().contains("source url must not be empty"));
    }
}
