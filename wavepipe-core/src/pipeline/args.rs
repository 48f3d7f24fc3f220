//! Transcoder argument construction.
//!
//! Pure mapping from per-call options to the transcoder's argument list.
//! Ordering matters to the external tool: seek flags must sit at the very
//! head so they apply to the input rather than the output, reconnect flags
//! and the input selector come next for URL inputs, and caller-supplied
//! encoder arguments form the tail. Piped inputs carry no input flag here;
//! the transcode stage adds the stdin selector when it spawns the process.

use crate::config::StreamOptions;

use super::encode::{CHANNELS, SAMPLE_RATE};

/// How the transcoder receives its input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum InputKind<'a> {
    /// Bytes are piped into the transcoder's standard input.
    Piped,
    /// The transcoder dials the URL itself; reconnect flags apply.
    Url(&'a str),
}

/// Builds the transcoder argument list for one invocation.
///
/// Deterministic: same options and input kind always yield the same list.
pub(crate) fn build_transcode_args(options: &StreamOptions, input: InputKind<'_>) -> Vec<String> {
    let mut args = Vec::new();

    // Seek stays ahead of reconnect/input flags so it seeks the input.
    if let Some(seconds) = options.effective_seek() {
        args.extend(["-ss".to_string(), format_seconds(seconds)]);
    }

    if let InputKind::Url(url) = input {
        args.extend([
            "-reconnect".to_string(),
            "1".to_string(),
            "-reconnect_streamed".to_string(),
            "1".to_string(),
            "-reconnect_delay_max".to_string(),
            "5".to_string(),
            "-i".to_string(),
            url.to_string(),
        ]);
    }

    args.extend([
        "-analyzeduration".to_string(),
        "0".to_string(),
        "-loglevel".to_string(),
        "0".to_string(),
        "-f".to_string(),
        options.format().to_string(),
        "-ar".to_string(),
        SAMPLE_RATE.to_string(),
        "-ac".to_string(),
        CHANNELS.to_string(),
    ]);

    // Caller-supplied arguments pass through verbatim, last so they can
    // override or extend the common flags.
    args.extend(options.encoder_args.iter().cloned());

    args
}

/// Formats a seek offset the way the transcoder expects: integral values
/// without a fractional part (`5.0` → `"5"`).
fn format_seconds(seconds: f64) -> String {
    if seconds.fract() == 0.0 && seconds.abs() <= i64::MAX as f64 {
        format!("{}", seconds as i64)
    } else {
        format!("{seconds}")
    }
}
