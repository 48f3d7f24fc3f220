//! Default remote-source opener over HTTP.
//!
//! Streams a GET response body as the source byte stream, reporting the
//! transfer lifecycle through [`SourceEvent`]s: the outgoing request, the
//! response, redirects, transfer metadata, per-chunk progress, and bounded
//! mid-transfer resume attempts using a `Range` header. This is an opener,
//! not a download manager: no caching, no persistent state, one isolated
//! transfer per call.

use bytes::Bytes;
use futures::StreamExt;
use reqwest::{Client, Response, StatusCode, header};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use url::Url;

use super::events::SourceEvent;
use super::traits::{SourceError, SourceOpener, SourceStream};
use crate::config::DownloadOptions;

/// HTTP implementation of [`SourceOpener`], the bundled default.
#[derive(Debug, Default)]
pub struct HttpSource;

impl HttpSource {
    /// Version string reported for diagnostics.
    pub const VERSION: &'static str = concat!("wavepipe-http/", env!("CARGO_PKG_VERSION"));

    pub fn new() -> Self {
        Self
    }

    fn client(options: &DownloadOptions) -> Result<Client, SourceError> {
        let mut builder = Client::builder();
        if let Some(timeout) = options.connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        if let Some(agent) = &options.user_agent {
            builder = builder.user_agent(agent.clone());
        }
        builder.build().map_err(|e| SourceError::Request {
            reason: e.to_string(),
        })
    }
}

#[async_trait::async_trait]
impl SourceOpener for HttpSource {
    async fn open(
        &self,
        url: &str,
        options: &DownloadOptions,
    ) -> Result<SourceStream, SourceError> {
        let target = Url::parse(url)?;
        let client = Self::client(options)?;
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let _ = event_tx.send(SourceEvent::Request {
            url: target.to_string(),
        });
        let response = client
            .get(target.clone())
            .send()
            .await
            .map_err(|e| SourceError::Request {
                reason: e.to_string(),
            })?;

        let status = response.status();
        let _ = event_tx.send(SourceEvent::Response {
            status: status.as_u16(),
        });
        if !status.is_success() {
            return Err(SourceError::BadStatus {
                status: status.as_u16(),
            });
        }
        if response.url() != &target {
            let _ = event_tx.send(SourceEvent::Redirect {
                from: target.to_string(),
                to: response.url().to_string(),
            });
        }

        let total = response.content_length();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let _ = event_tx.send(SourceEvent::Info {
            content_length: total,
            content_type,
        });

        let transfer = Transfer {
            client,
            url: target,
            response,
            downloaded: 0,
            total,
            reconnects: 0,
            max_reconnects: options.max_reconnects,
            events: event_tx,
        };
        let data = futures::stream::unfold(Some(transfer), |state| async move {
            let mut transfer = state?;
            match transfer.next_chunk().await {
                ChunkOutcome::Data(bytes) => Some((Ok(bytes), Some(transfer))),
                ChunkOutcome::Finished => None,
                ChunkOutcome::Failed(err) => Some((Err(err), None)),
            }
        })
        .boxed();

        Ok(SourceStream {
            data,
            events: event_rx,
        })
    }

    fn version(&self) -> &'static str {
        Self::VERSION
    }
}

/// One in-flight transfer, resumable across connection drops.
struct Transfer {
    client: Client,
    url: Url,
    response: Response,
    downloaded: u64,
    total: Option<u64>,
    reconnects: u32,
    max_reconnects: u32,
    events: mpsc::UnboundedSender<SourceEvent>,
}

enum ChunkOutcome {
    Data(Bytes),
    Finished,
    Failed(SourceError),
}

impl Transfer {
    async fn next_chunk(&mut self) -> ChunkOutcome {
        loop {
            match self.response.chunk().await {
                Ok(Some(bytes)) => {
                    self.downloaded += bytes.len() as u64;
                    let _ = self.events.send(SourceEvent::Progress {
                        chunk: bytes.len() as u64,
                        downloaded: self.downloaded,
                        total: self.total,
                    });
                    return ChunkOutcome::Data(bytes);
                }
                Ok(None) => {
                    debug!("transfer finished after {} bytes", self.downloaded);
                    return ChunkOutcome::Finished;
                }
                Err(e) => {
                    if self.reconnects >= self.max_reconnects {
                        let err = SourceError::ConnectionLost {
                            downloaded: self.downloaded,
                            reason: e.to_string(),
                        };
                        let _ = self.events.send(SourceEvent::Error(err.to_string()));
                        return ChunkOutcome::Failed(err);
                    }
                    self.reconnects += 1;
                    warn!(
                        "transfer interrupted, retrying (attempt {}): {e}",
                        self.reconnects
                    );
                    let _ = self.events.send(SourceEvent::Retry {
                        attempt: self.reconnects,
                    });
                    match self.resume().await {
                        Ok(response) => {
                            self.response = response;
                            let _ = self.events.send(SourceEvent::Reconnect {
                                attempt: self.reconnects,
                            });
                        }
                        Err(err) => {
                            let _ = self.events.send(SourceEvent::Error(err.to_string()));
                            return ChunkOutcome::Failed(err);
                        }
                    }
                }
            }
        }
    }

    /// Re-requests the remainder of the payload. Only a partial-content
    /// answer is acceptable; a full restart would replay bytes the consumer
    /// already saw.
    async fn resume(&self) -> Result<Response, SourceError> {
        let response = self
            .client
            .get(self.url.clone())
            .header(header::RANGE, format!("bytes={}-", self.downloaded))
            .send()
            .await
            .map_err(|e| SourceError::Request {
                reason: e.to_string(),
            })?;
        match response.status() {
            StatusCode::PARTIAL_CONTENT => Ok(response),
            status => Err(SourceError::BadStatus {
                status: status.as_u16(),
            }),
        }
    }
}
