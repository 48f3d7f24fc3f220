//! Per-call configuration for the streaming pipeline.
//!
//! Every pipeline invocation receives its own [`StreamOptions`] value; nothing
//! is shared or mutated across calls. All fields have documented defaults so
//! `StreamOptions::default()` covers the common case.

use std::path::PathBuf;
use std::time::Duration;

/// Default output container format: raw signed 16-bit little-endian PCM.
pub const DEFAULT_FORMAT: &str = "s16le";

/// Options controlling a single pipeline invocation.
#[derive(Debug, Clone, Default)]
pub struct StreamOptions {
    /// Seek offset in seconds, applied to the transcoder input.
    ///
    /// Non-finite values (NaN, infinities) are ignored rather than rejected,
    /// matching the long-standing observable behavior of this surface.
    pub seek: Option<f64>,

    /// Extra transcoder arguments appended verbatim after the common flags.
    ///
    /// No validation is performed; elements are passed through in order.
    pub encoder_args: Vec<String>,

    /// Output container format. `None` selects [`DEFAULT_FORMAT`].
    pub fmt: Option<String>,

    /// Encode the transcoded PCM into 20 ms Opus frames before returning it.
    pub opus_encoded: bool,

    /// Custom transcoder binary. Falls back to the `FFMPEG_PATH` environment
    /// variable, then to `ffmpeg` on `PATH`.
    pub transcoder_path: Option<PathBuf>,

    /// Options passed through to the remote-source opener.
    pub download: DownloadOptions,
}

impl StreamOptions {
    /// Output format flag value, defaulting to raw signed 16-bit PCM.
    pub fn format(&self) -> &str {
        self.fmt.as_deref().unwrap_or(DEFAULT_FORMAT)
    }

    /// Seek value if present and finite; NaN and infinities count as absent.
    pub fn effective_seek(&self) -> Option<f64> {
        self.seek.filter(|seconds| seconds.is_finite())
    }
}

/// Pass-through options for the remote-source opener.
///
/// These tune how the opener fetches bytes; the pipeline itself never
/// inspects them.
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    /// User agent for outgoing requests (`None` keeps the opener's default).
    pub user_agent: Option<String>,

    /// Connection establishment timeout.
    pub connect_timeout: Option<Duration>,

    /// Mid-transfer reconnect attempts before the source gives up.
    pub max_reconnects: u32,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            user_agent: None,
            connect_timeout: Some(Duration::from_secs(10)),
            max_reconnects: 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_defaults_to_s16le() {
        let options = StreamOptions::default();
        assert_eq!(options.format(), "s16le");

        let options = StreamOptions {
            fmt: Some("mp3".to_string()),
            ..Default::default()
        };
        assert_eq!(options.format(), "mp3");
    }

    #[test]
    fn non_finite_seek_counts_as_absent() {
        let mut options = StreamOptions {
            seek: Some(f64::NAN),
            ..Default::default()
        };
        assert_eq!(options.effective_seek(), None);

        options.seek = Some(f64::INFINITY);
        assert_eq!(options.effective_seek(), None);

        options.seek = Some(12.5);
        assert_eq!(options.effective_seek(), Some(12.5));
    }

    #[test]
    fn download_defaults() {
        let options = DownloadOptions::default();
        assert_eq!(options.user_agent, None);
        assert_eq!(options.connect_timeout, Some(Duration::from_secs(10)));
        assert_eq!(options.max_reconnects, 3);
    }
}
