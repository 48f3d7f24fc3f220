//! Transcode stage: the external transcoder process as a pipeline stage.
//!
//! Wraps one transcoder invocation per call. Input arrives either piped into
//! the child's stdin (remote pipeline, readers, buffers) or is dialed by the
//! transcoder itself (URL in the argument list); output is read off stdout in
//! chunks and handed to the next stage over a channel. Stderr is drained into
//! the log so the child never blocks on a full pipe. If the upstream input
//! fails, the child is killed rather than left half-open waiting for data
//! that will never arrive.

use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{Notify, mpsc};
use tracing::{debug, error, warn};

use super::teardown::{Stage, TaskStage, Teardown};
use super::traits::SourceError;
use crate::WavepipeError;
use crate::config::StreamOptions;

/// Size of chunks read from the transcoder's stdout.
const CHUNK_SIZE: usize = 8 * 1024;

/// Output channel capacity, in chunks.
const OUTPUT_BUFFER: usize = 32;

/// Errors raised by the transcode stage.
#[derive(Debug, Error)]
pub enum TranscodeError {
    /// The transcoder process could not be started.
    #[error("Failed to start transcoder: {0}")]
    ProcessStart(#[source] io::Error),

    /// The transcoder exited with a non-zero status.
    #[error("Transcoder exited with {0}")]
    ProcessFailed(ExitStatus),

    /// Reading the transcoder's output failed.
    #[error("Failed to read transcoder output: {0}")]
    Read(#[source] io::Error),

    /// The upstream input feeding the transcoder failed.
    #[error("Failed to feed transcoder input: {0}")]
    Input(#[source] io::Error),
}

/// Where the transcoder's input comes from.
pub(crate) enum TranscodeInput {
    /// The transcoder dials its input itself (URL in the argument list).
    Direct,
    /// A live source stream piped into stdin.
    Stream(BoxStream<'static, Result<Bytes, SourceError>>),
    /// An arbitrary reader piped into stdin.
    Reader(Box<dyn AsyncRead + Send + Unpin>),
    /// A one-shot in-memory buffer piped into stdin.
    Buffer(Bytes),
}

/// A running transcoder invocation.
pub(crate) struct TranscodeStage {
    /// Transcoded chunks, ending when the process and its feeders are done.
    pub(crate) output: mpsc::Receiver<Result<Bytes, WavepipeError>>,
}

/// Release handle killing the transcoder process.
pub(crate) struct TranscodeGuard {
    kill: Arc<Notify>,
    released: Arc<AtomicBool>,
}

impl Stage for TranscodeGuard {
    fn label(&self) -> &'static str {
        "transcoder"
    }

    fn release(&mut self) {
        self.released.store(true, Ordering::Release);
        self.kill.notify_one();
    }
}

impl TranscodeStage {
    /// Spawns the transcoder and its pump/reader/monitor tasks.
    ///
    /// Returns the stage, the input pump's release handle when the input is
    /// piped (the upstream-most stage of the chain), and the process guard.
    /// The caller registers both with the teardown coordinator, pump first.
    ///
    /// # Errors
    ///
    /// - `TranscodeError::ProcessStart` - the binary is missing or refuses
    ///   to start
    pub(crate) fn spawn(
        options: &StreamOptions,
        args: Vec<String>,
        input: TranscodeInput,
        teardown: Arc<Teardown>,
    ) -> Result<(Self, Option<TaskStage>, TranscodeGuard), TranscodeError> {
        let piped = !matches!(input, TranscodeInput::Direct);
        let args = spawn_args(args, piped);
        let command = resolve_command(options);

        let mut cmd = Command::new(&command);
        cmd.args(&args)
            .stdin(if piped { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!("spawning transcoder {} {:?}", command.display(), args);
        let mut child = cmd.spawn().map_err(TranscodeError::ProcessStart)?;

        let stdout = child.stdout.take().ok_or_else(|| {
            TranscodeError::ProcessStart(io::Error::other("missing transcoder stdout handle"))
        })?;
        if let Some(stderr) = child.stderr.take() {
            spawn_stderr_drain(stderr);
        }

        let (tx, rx) = mpsc::channel(OUTPUT_BUFFER);

        let pump_stage = if piped {
            let stdin = child.stdin.take().ok_or_else(|| {
                TranscodeError::ProcessStart(io::Error::other("missing transcoder stdin handle"))
            })?;
            let handle = tokio::spawn(pump_input(input, stdin, tx.clone(), teardown));
            Some(TaskStage::new("input-pump", handle.abort_handle()))
        } else {
            None
        };

        tokio::spawn(read_output(stdout, tx.clone()));

        let kill = Arc::new(Notify::new());
        let released = Arc::new(AtomicBool::new(false));
        tokio::spawn(monitor(
            child,
            Arc::clone(&kill),
            Arc::clone(&released),
            tx,
        ));

        Ok((Self { output: rx }, pump_stage, TranscodeGuard { kill, released }))
    }
}

/// Completes a built argument list for spawning: piped inputs get the stdin
/// selector prepended when the list carries no input flag, and the stdout
/// operand is always appended last.
pub(crate) fn spawn_args(mut args: Vec<String>, piped: bool) -> Vec<String> {
    if piped && !args.iter().any(|arg| arg == "-i") {
        args.splice(0..0, ["-i".to_string(), "pipe:0".to_string()]);
    }
    args.push("pipe:1".to_string());
    args
}

/// Resolves the transcoder binary: explicit option, then the `FFMPEG_PATH`
/// environment variable, then `ffmpeg` on `PATH`.
fn resolve_command(options: &StreamOptions) -> PathBuf {
    options
        .transcoder_path
        .clone()
        .or_else(|| std::env::var_os("FFMPEG_PATH").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("ffmpeg"))
}

/// Feeds the piped input into the transcoder's stdin, closing it for EOF
/// when the input ends. An upstream failure surfaces on the output channel
/// and releases the chain so the child is not left waiting.
async fn pump_input(
    input: TranscodeInput,
    mut stdin: ChildStdin,
    tx: mpsc::Sender<Result<Bytes, WavepipeError>>,
    teardown: Arc<Teardown>,
) {
    match input {
        TranscodeInput::Direct => {}
        TranscodeInput::Buffer(bytes) => {
            if let Err(e) = stdin.write_all(&bytes).await {
                warn!("failed to feed buffer to transcoder: {e}");
            }
        }
        TranscodeInput::Stream(mut stream) => {
            while let Some(item) = stream.next().await {
                match item {
                    Ok(bytes) => {
                        if let Err(e) = stdin.write_all(&bytes).await {
                            warn!("transcoder stopped accepting input: {e}");
                            return;
                        }
                    }
                    Err(e) => {
                        warn!("source stream failed: {e}");
                        let _ = tx.send(Err(WavepipeError::Source(e))).await;
                        teardown.release_all();
                        return;
                    }
                }
            }
            debug!("source stream finished");
        }
        TranscodeInput::Reader(mut reader) => {
            let mut buf = vec![0u8; CHUNK_SIZE];
            loop {
                match reader.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => {
                        if let Err(e) = stdin.write_all(&buf[..n]).await {
                            warn!("transcoder stopped accepting input: {e}");
                            return;
                        }
                    }
                    Err(e) => {
                        warn!("input reader failed: {e}");
                        let _ = tx.send(Err(TranscodeError::Input(e).into())).await;
                        teardown.release_all();
                        return;
                    }
                }
            }
        }
    }
    // Dropping stdin signals EOF to the transcoder.
}

/// Reads transcoded chunks off stdout until EOF or the consumer goes away.
async fn read_output(mut stdout: ChildStdout, tx: mpsc::Sender<Result<Bytes, WavepipeError>>) {
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        match stdout.read(&mut buf).await {
            Ok(0) => {
                debug!("transcoder output finished");
                break;
            }
            Ok(n) => {
                if tx.send(Ok(Bytes::copy_from_slice(&buf[..n]))).await.is_err() {
                    debug!("output consumer dropped, stopping read");
                    break;
                }
            }
            Err(e) => {
                let _ = tx.send(Err(TranscodeError::Read(e).into())).await;
                break;
            }
        }
    }
}

/// Drains stderr into the log so the child never blocks on a full pipe.
fn spawn_stderr_drain(stderr: ChildStderr) {
    tokio::spawn(async move {
        let mut reader = BufReader::new(stderr);
        let mut line = String::new();
        loop {
            line.clear();
            match reader.read_line(&mut line).await {
                Ok(0) => break,
                Ok(_) => {
                    if !line.trim().is_empty() {
                        debug!("transcoder: {}", line.trim());
                    }
                }
                Err(e) => {
                    warn!("error reading transcoder stderr: {e}");
                    break;
                }
            }
        }
    });
}

/// Reaps the child. A deliberate release kills the process; a non-zero exit
/// that was not asked for surfaces as an error on the output channel.
async fn monitor(
    mut child: Child,
    kill: Arc<Notify>,
    released: Arc<AtomicBool>,
    tx: mpsc::Sender<Result<Bytes, WavepipeError>>,
) {
    tokio::select! {
        status = child.wait() => match status {
            Ok(status) if status.success() => debug!("transcoder exited cleanly"),
            Ok(status) => {
                if released.load(Ordering::Acquire) {
                    debug!("transcoder exited after release: {status}");
                } else {
                    warn!("transcoder failed: {status}");
                    let _ = tx.send(Err(TranscodeError::ProcessFailed(status).into())).await;
                }
            }
            Err(e) => error!("failed to wait for transcoder: {e}"),
        },
        _ = kill.notified() => {
            let _ = child.start_kill();
            let _ = child.wait().await;
            debug!("transcoder process released");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::pipeline::args::{InputKind, build_transcode_args};

    #[test]
    fn piped_spawn_args_select_stdin_and_stdout() {
        let options = StreamOptions::default();
        let built = build_transcode_args(&options, InputKind::Piped);
        let args = spawn_args(built, true);

        assert_eq!(&args[..2], &["-i".to_string(), "pipe:0".to_string()]);
        assert_eq!(args.last().unwrap(), "pipe:1");
        assert!(!args.iter().any(|a| a.starts_with("-reconnect")));
    }

    #[test]
    fn url_spawn_args_keep_their_input_flag() {
        let options = StreamOptions::default();
        let built = build_transcode_args(&options, InputKind::Url("https://stream/kpop"));
        let args = spawn_args(built, false);

        assert_eq!(args.iter().filter(|a| *a == "-i").count(), 1);
        assert!(!args.contains(&"pipe:0".to_string()));
        assert_eq!(args.last().unwrap(), "pipe:1");
    }

    #[test]
    fn explicit_transcoder_path_wins() {
        let options = StreamOptions {
            transcoder_path: Some(PathBuf::from("/opt/media/ffmpeg")),
            ..Default::default()
        };
        assert_eq!(resolve_command(&options), PathBuf::from("/opt/media/ffmpeg"));
    }

    #[tokio::test]
    async fn missing_binary_fails_to_start() {
        let options = StreamOptions {
            transcoder_path: Some(PathBuf::from("wavepipe-missing-transcoder")),
            ..Default::default()
        };
        let result = TranscodeStage::spawn(
            &options,
            Vec::new(),
            TranscodeInput::Buffer(Bytes::from_static(b"xx")),
            Arc::new(Teardown::new()),
        );
        assert!(matches!(result, Err(TranscodeError::ProcessStart(_))));
    }

    #[tokio::test]
    async fn clean_exit_ends_the_output_channel() {
        let options = StreamOptions {
            transcoder_path: Some(PathBuf::from("true")),
            ..Default::default()
        };
        let (mut stage, _pump, _guard) = TranscodeStage::spawn(
            &options,
            Vec::new(),
            TranscodeInput::Buffer(Bytes::from_static(b"payload")),
            Arc::new(Teardown::new()),
        )
        .unwrap();

        let drained = tokio::time::timeout(Duration::from_secs(5), async {
            let mut items = Vec::new();
            while let Some(item) = stage.output.recv().await {
                items.push(item);
            }
            items
        })
        .await
        .unwrap();

        assert!(drained.iter().all(Result::is_ok));
    }

    #[tokio::test]
    async fn failing_process_surfaces_an_error() {
        let options = StreamOptions {
            transcoder_path: Some(PathBuf::from("false")),
            ..Default::default()
        };
        let (mut stage, _pump, _guard) = TranscodeStage::spawn(
            &options,
            Vec::new(),
            TranscodeInput::Buffer(Bytes::from_static(b"payload")),
            Arc::new(Teardown::new()),
        )
        .unwrap();

        let saw_failure = tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(item) = stage.output.recv().await {
                if matches!(
                    item,
                    Err(WavepipeError::Transcode(TranscodeError::ProcessFailed(_)))
                ) {
                    return true;
                }
            }
            false
        })
        .await
        .unwrap();

        assert!(saw_failure);
    }
}
