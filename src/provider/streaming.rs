//! Streaming transport
//!
//! Opens `POST /generate` with `stream = true` and consumes the body
//! incrementally. The connection goes through
//! `Connecting -> Streaming -> Done`, or `Failed` on any socket-level error
//! or idle timeout. Decoded content is handed to the caller through a channel
//! as it arrives.

use crate::provider::constants::GENERATE_PATH;
use crate::provider::error::GatewayError;
use crate::provider::sse::{Frame, FrameParser};
use crate::provider::types::GenerationRequest;
use futures_util::StreamExt;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Connection lifecycle of one streaming call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Request sent, no body bytes yet
    Connecting,
    /// At least one body chunk received
    Streaming,
    /// Terminal frame seen (or the body ended cleanly)
    Done,
    /// Socket error or idle timeout
    Failed,
}

/// Final tally of a completed stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamOutcome {
    /// Concatenation of every content delta, in arrival order
    pub text: String,
    /// Wall-clock time from connection open to the terminal frame
    pub response_time_ms: u64,
    /// Number of content deltas delivered
    pub chunks: usize,
    /// Malformed payload lines dropped along the way
    pub skipped_frames: usize,
}

/// Items delivered by an open stream
#[derive(Debug)]
pub enum StreamToken {
    /// A content delta
    Chunk(String),
    /// Stream finished; no further tokens follow
    Done(StreamOutcome),
    /// Stream aborted; no further tokens follow
    Failed(GatewayError),
}

/// Streaming client for `POST /generate`
#[derive(Clone)]
pub struct StreamingTransport {
    client: reqwest::Client,
    base_url: String,
    idle_timeout: Duration,
}

impl StreamingTransport {
    /// Create a transport sharing the given HTTP client
    ///
    /// `idle_timeout` bounds the silence between two body reads, not the
    /// total duration of the stream.
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            idle_timeout,
        }
    }

    fn generate_url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), GENERATE_PATH)
    }

    /// Open a stream
    ///
    /// Connection and status errors are returned directly. Once the service
    /// has answered 2xx, the body is read on a background task and tokens are
    /// yielded through the returned receiver, ending with exactly one
    /// `Done` or `Failed`. Dropping the receiver stops the reader.
    pub async fn open(
        &self,
        request: &GenerationRequest,
    ) -> Result<mpsc::Receiver<StreamToken>, GatewayError> {
        let start = Instant::now();
        let body = request.with_stream(true);
        let url = self.generate_url();

        debug!(url = %url, model = %body.model_id, "Opening generation stream");

        let response = timeout(
            self.idle_timeout,
            self.client.post(&url).json(&body).send(),
        )
        .await
        .map_err(|_| GatewayError::IdleTimeout(self.idle_timeout.as_millis()))?
        .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Provider {
                status: status.as_u16(),
                body: error_body,
            });
        }

        let (tx, rx) = mpsc::channel(100);
        let idle_timeout = self.idle_timeout;
        let model = body.model_id;

        tokio::spawn(async move {
            let mut bytes = response.bytes_stream();
            let mut parser = FrameParser::new();
            let mut state = StreamState::Connecting;
            let mut text = String::new();
            let mut chunks = 0usize;

            loop {
                let frames = match timeout(idle_timeout, bytes.next()).await {
                    Err(_) => {
                        transition(&mut state, StreamState::Failed);
                        let _ = tx
                            .send(StreamToken::Failed(GatewayError::IdleTimeout(
                                idle_timeout.as_millis(),
                            )))
                            .await;
                        return;
                    }
                    Ok(Some(Err(e))) => {
                        transition(&mut state, StreamState::Failed);
                        let _ = tx
                            .send(StreamToken::Failed(GatewayError::Transport(e.to_string())))
                            .await;
                        return;
                    }
                    Ok(Some(Ok(chunk))) => {
                        if state == StreamState::Connecting {
                            transition(&mut state, StreamState::Streaming);
                        }
                        parser.push(&chunk)
                    }
                    Ok(None) => {
                        // A clean end of body counts as the terminal frame
                        let mut frames = parser.finish();
                        if !frames.contains(&Frame::Done) {
                            warn!(model = %model, "Stream ended without a terminal frame");
                            frames.push(Frame::Done);
                        }
                        frames
                    }
                };

                for frame in frames {
                    match frame {
                        Frame::Text(delta) => {
                            text.push_str(&delta);
                            chunks += 1;
                            if tx.send(StreamToken::Chunk(delta)).await.is_err() {
                                debug!("Stream receiver dropped, stopping reader");
                                return;
                            }
                        }
                        Frame::Done => {
                            transition(&mut state, StreamState::Done);
                            let outcome = StreamOutcome {
                                text,
                                response_time_ms: start.elapsed().as_millis() as u64,
                                chunks,
                                skipped_frames: parser.skipped_lines(),
                            };
                            info!(
                                model = %model,
                                chunks = outcome.chunks,
                                skipped = outcome.skipped_frames,
                                elapsed_ms = outcome.response_time_ms,
                                "Streaming completed"
                            );
                            let _ = tx.send(StreamToken::Done(outcome)).await;
                            return;
                        }
                    }
                }
            }
        });

        Ok(rx)
    }
}

fn transition(state: &mut StreamState, next: StreamState) {
    debug!(from = ?state, to = ?next, "Stream state change");
    *state = next;
}
