//! End-to-end pipeline tests.
//!
//! A scripted opener stands in for the remote source and a coreutils binary
//! stands in for the transcoder, so these tests need neither ffmpeg nor
//! network access.

use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use wavepipe_core::{
    DownloadOptions, SourceError, SourceEvent, SourceOpener, SourceStream, StreamInput,
    StreamOptions, WavepipeError, arbitrary_stream, source_with,
};

struct ScriptedOpener {
    events: Vec<SourceEvent>,
    data: Mutex<Option<Vec<Result<Bytes, SourceError>>>>,
}

impl ScriptedOpener {
    fn new(events: Vec<SourceEvent>, data: Vec<Result<Bytes, SourceError>>) -> Self {
        Self {
            events,
            data: Mutex::new(Some(data)),
        }
    }
}

#[async_trait]
impl SourceOpener for ScriptedOpener {
    async fn open(
        &self,
        _url: &str,
        _options: &DownloadOptions,
    ) -> Result<SourceStream, SourceError> {
        let (tx, rx) = mpsc::unbounded_channel();
        for event in self.events.clone() {
            let _ = tx.send(event);
        }
        let data = self.data.lock().unwrap().take().unwrap_or_default();
        Ok(SourceStream {
            data: stream::iter(data).boxed(),
            events: rx,
        })
    }

    fn version(&self) -> &'static str {
        "scripted/0.0"
    }
}

/// A transcoder stand-in that exits cleanly without producing output.
fn quiet_transcoder() -> StreamOptions {
    StreamOptions {
        transcoder_path: Some(PathBuf::from("true")),
        ..Default::default()
    }
}

#[tokio::test]
async fn lifecycle_events_surface_on_the_returned_stream_in_order() {
    let events = vec![
        SourceEvent::Request {
            url: "https://example.test/video".to_string(),
        },
        SourceEvent::Response { status: 200 },
        SourceEvent::Info {
            content_length: Some(2048),
            content_type: Some("audio/webm".to_string()),
        },
        SourceEvent::Progress {
            chunk: 1024,
            downloaded: 1024,
            total: Some(2048),
        },
        SourceEvent::Redirect {
            from: "https://example.test/video".to_string(),
            to: "https://cdn.example.test/video".to_string(),
        },
    ];
    let opener = ScriptedOpener::new(events.clone(), vec![Ok(Bytes::from_static(b"media"))]);

    let mut stream = source_with(&opener, "https://example.test/video", quiet_transcoder())
        .await
        .unwrap();

    for expected in &events {
        let observed = timeout(Duration::from_secs(5), stream.next_event())
            .await
            .unwrap();
        assert_eq!(observed.as_ref(), Some(expected));
    }
    let done = timeout(Duration::from_secs(5), stream.next_event())
        .await
        .unwrap();
    assert_eq!(done, None);
}

#[tokio::test]
async fn source_failure_surfaces_and_ends_the_stream() {
    let opener = ScriptedOpener::new(
        Vec::new(),
        vec![Err(SourceError::ConnectionLost {
            downloaded: 5,
            reason: "connection reset".to_string(),
        })],
    );

    let mut stream = source_with(&opener, "https://example.test/video", quiet_transcoder())
        .await
        .unwrap();

    let saw_source_error = timeout(Duration::from_secs(10), async {
        let mut saw = false;
        while let Some(item) = stream.next().await {
            if matches!(item, Err(WavepipeError::Source(_))) {
                saw = true;
            }
        }
        saw
    })
    .await
    .unwrap();

    assert!(saw_source_error);
}

#[tokio::test]
async fn buffer_input_runs_to_completion() {
    let stream = arbitrary_stream(StreamInput::from(vec![0u8; 4096]), quiet_transcoder()).unwrap();

    let items = timeout(Duration::from_secs(10), stream.collect::<Vec<_>>())
        .await
        .unwrap();
    assert!(items.iter().all(Result::is_ok));
}

#[tokio::test]
async fn reader_input_runs_to_completion() {
    let reader = std::io::Cursor::new(vec![0u8; 4096]);
    let stream = arbitrary_stream(
        StreamInput::Reader(Box::new(reader)),
        quiet_transcoder(),
    )
    .unwrap();

    let items = timeout(Duration::from_secs(10), stream.collect::<Vec<_>>())
        .await
        .unwrap();
    assert!(items.iter().all(Result::is_ok));
}

#[tokio::test]
async fn opus_chain_builds_and_completes() {
    let options = StreamOptions {
        opus_encoded: true,
        ..quiet_transcoder()
    };
    let stream = arbitrary_stream(StreamInput::from(vec![0u8; 4096]), options).unwrap();

    let items = timeout(Duration::from_secs(10), stream.collect::<Vec<_>>())
        .await
        .unwrap();
    assert!(items.iter().all(Result::is_ok));
}

#[tokio::test]
async fn missing_transcoder_fails_before_returning_a_stream() {
    let options = StreamOptions {
        transcoder_path: Some(PathBuf::from("wavepipe-missing-transcoder")),
        ..Default::default()
    };
    let result = arbitrary_stream(StreamInput::from(vec![0u8; 16]), options);
    assert!(matches!(result, Err(WavepipeError::Transcode(_))));
}

#[tokio::test]
async fn destroy_ends_the_stream() {
    let stream = arbitrary_stream(StreamInput::from(vec![0u8; 4096]), quiet_transcoder()).unwrap();
    stream.destroy();

    let items = timeout(Duration::from_secs(10), stream.collect::<Vec<_>>())
        .await
        .unwrap();
    assert!(items.iter().all(Result::is_ok));
}
