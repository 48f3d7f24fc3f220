//! Opus encode stage.
//!
//! Consumes raw s16le PCM from the transcode stage and produces one Opus
//! packet per 20 ms frame. The configuration is fixed at 48 kHz stereo with
//! 960-sample frames, the framing real-time voice transports expect.
//! Upstream errors pass through as this stage's own error items; they are
//! never swallowed.

use audiopus::coder::Encoder;
use audiopus::{Application, Channels, SampleRate};
use bytes::{Bytes, BytesMut};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

use super::teardown::TaskStage;
use crate::WavepipeError;

/// Output sample rate in Hz, shared with the transcoder flags.
pub(crate) const SAMPLE_RATE: u32 = 48_000;

/// Output channel count, shared with the transcoder flags.
pub(crate) const CHANNELS: u32 = 2;

/// Samples per channel per frame: 20 ms at 48 kHz.
pub(crate) const FRAME_SIZE: usize = 960;

/// Bytes of s16le PCM in one full frame.
const FRAME_BYTES: usize = FRAME_SIZE * CHANNELS as usize * 2;

/// Upper bound for a single encoded packet.
const MAX_PACKET: usize = 4000;

/// Output channel capacity, in packets.
const OUTPUT_BUFFER: usize = 32;

/// Errors raised by the Opus encode stage.
#[derive(Debug, Error)]
pub enum EncodeError {
    /// The encoder could not be created.
    #[error("Failed to initialize Opus encoder: {0}")]
    EncoderInit(#[source] audiopus::Error),

    /// Encoding a frame failed.
    #[error("Opus encoding failed: {0}")]
    Encode(#[source] audiopus::Error),
}

/// A running Opus encoder fed from the transcode stage.
pub(crate) struct OpusEncodeStage {
    /// Encoded packets, one per frame, ending when the input ends.
    pub(crate) output: mpsc::Receiver<Result<Bytes, WavepipeError>>,
}

impl OpusEncodeStage {
    /// Spawns the encode task over the transcode stage's output channel.
    ///
    /// # Errors
    ///
    /// - `EncodeError::EncoderInit` - libopus rejected the fixed
    ///   rate/channel configuration
    pub(crate) fn spawn(
        mut input: mpsc::Receiver<Result<Bytes, WavepipeError>>,
    ) -> Result<(Self, TaskStage), EncodeError> {
        let mut encoder = Encoder::new(SampleRate::Hz48000, Channels::Stereo, Application::Audio)
            .map_err(EncodeError::EncoderInit)?;

        let (tx, rx) = mpsc::channel(OUTPUT_BUFFER);
        let handle = tokio::spawn(async move {
            let mut pending = BytesMut::new();
            let mut packet = [0u8; MAX_PACKET];

            while let Some(item) = input.recv().await {
                match item {
                    Ok(bytes) => {
                        pending.extend_from_slice(&bytes);
                        while pending.len() >= FRAME_BYTES {
                            let frame = pending.split_to(FRAME_BYTES);
                            let samples = frame_samples(&frame);
                            match encoder.encode(&samples, &mut packet) {
                                Ok(len) => {
                                    let encoded = Bytes::copy_from_slice(&packet[..len]);
                                    if tx.send(Ok(encoded)).await.is_err() {
                                        debug!("packet consumer dropped, stopping encoder");
                                        return;
                                    }
                                }
                                Err(e) => {
                                    let _ = tx.send(Err(EncodeError::Encode(e).into())).await;
                                    return;
                                }
                            }
                        }
                    }
                    Err(e) => {
                        // Upstream failure belongs on this stage's output too.
                        let _ = tx.send(Err(e)).await;
                        return;
                    }
                }
            }

            if !pending.is_empty() {
                debug!(
                    "dropping {} trailing bytes short of a full frame",
                    pending.len()
                );
            }
        });

        Ok((
            Self { output: rx },
            TaskStage::new("opus-encoder", handle.abort_handle()),
        ))
    }
}

/// Reinterprets one s16le frame as interleaved samples.
fn frame_samples(frame: &[u8]) -> Vec<i16> {
    frame
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}
