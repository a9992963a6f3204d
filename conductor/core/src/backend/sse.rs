//! SSE Backend Implementation
//!
//! Chat backend for the AI service's server-sent-events endpoint.
//!
//! # Wire format
//!
//! `POST {base_url}/ai/chat` with `{"messages": [...], "mode": "...", "stream": true}`.
//! The response body is a sequence of frames separated by a blank line; each
//! `data: ` line in a frame carries one JSON object:
//!
//! ```text
//! data: {"type":"start","model":"tutor-large"}
//!
//! data: {"reasoning":"Let me think"}
//!
//! data: {"content":"The answer"}
//!
//! data: {"type":"done"}
//! ```
//!
//! Guided turns are plain JSON: `POST {base_url}/ai/chat/guided` with
//! `{"mode": "guided", "session_id": ..., "topic": ..., "messages": [...]}`
//! answers with a single [`GuidedReply`] object.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::ACCEPT;
use reqwest::StatusCode;
use serde::Deserialize;
use tokio::sync::mpsc;

use super::traits::{ChatBackend, ChatRequest, GuidedReply, GuidedRequest, StreamEvent};
use crate::config::ConductorConfig;
use crate::guided::GUIDED_MODE;
use crate::scheduler::CancellationToken;
use crate::tasks::TaskError;

/// Chat endpoint path, relative to the API base URL
const CHAT_PATH: &str = "/ai/chat";

/// Guided learning endpoint path, relative to the API base URL
const GUIDED_PATH: &str = "/ai/chat/guided";

/// Buffer size of the event channel handed to the Conductor
const EVENT_BUFFER: usize = 100;

/// SSE chat backend client
#[derive(Clone)]
pub struct SseBackend {
    /// API base URL, without trailing slash
    base_url: String,
    /// Bearer token sent with every request
    auth_token: Option<String>,
    /// HTTP client
    http_client: reqwest::Client,
}

impl SseBackend {
    /// Create a new SSE backend
    pub fn new(
        base_url: impl Into<String>,
        auth_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, TaskError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TaskError::Failed(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth_token,
            http_client,
        })
    }

    /// Create from the conductor configuration
    pub fn from_config(config: &ConductorConfig) -> Result<Self, TaskError> {
        Self::new(
            config.api_base_url.clone(),
            config.auth_token.clone(),
            config.request_timeout,
        )
    }

    /// Get chat endpoint URL
    fn chat_url(&self) -> String {
        format!("{}{}", self.base_url, CHAT_PATH)
    }

    /// Get guided learning endpoint URL
    fn guided_url(&self) -> String {
        format!("{}{}", self.base_url, GUIDED_PATH)
    }

    /// Send a JSON POST and map the HTTP status to a task error
    ///
    /// 401 means the session expired; every other non-success status is a
    /// plain failure carrying the response body.
    async fn post_json(
        &self,
        url: String,
        accept: &'static str,
        body: &serde_json::Value,
        cancel: &CancellationToken,
    ) -> Result<reqwest::Response, TaskError> {
        let mut req = self
            .http_client
            .post(url)
            .header(ACCEPT, accept)
            .json(body);
        if let Some(token) = &self.auth_token {
            req = req.bearer_auth(token);
        }

        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(TaskError::Cancelled),
            response = req.send() => response
                .map_err(|e| TaskError::Failed(format!("chat request failed: {e}")))?,
        };

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(TaskError::Authorization("Unauthorized".to_string()));
        }
        if status == StatusCode::FORBIDDEN {
            return Err(TaskError::Failed("permission denied (403)".to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TaskError::Failed(format!(
                "AI service error {}: {}",
                status.as_u16(),
                body
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl ChatBackend for SseBackend {
    fn name(&self) -> &'static str {
        "SSE"
    }

    async fn stream_chat(
        &self,
        request: ChatRequest,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<StreamEvent>, TaskError> {
        let body = serde_json::json!({
            "messages": request.messages,
            "mode": request.mode,
            "stream": true,
        });

        let response = self
            .post_json(self.chat_url(), "text/event-stream", &body, &cancel)
            .await?;

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let mut stream = response.bytes_stream();

        // Spawn task to process stream
        tokio::spawn(async move {
            let mut decoder = SseDecoder::default();

            loop {
                let chunk = tokio::select! {
                    biased;
                    () = cancel.cancelled() => {
                        tracing::trace!("SSE reader stopped by cancellation");
                        return;
                    }
                    chunk = stream.next() => chunk,
                };

                match chunk {
                    Some(Ok(bytes)) => {
                        for event in decoder.push(&bytes) {
                            let terminal = event.is_terminal();
                            if tx.send(event).await.is_err() {
                                // Receiver dropped, stop streaming
                                return;
                            }
                            if terminal {
                                return;
                            }
                        }
                    }
                    Some(Err(e)) => {
                        let _ = tx.send(StreamEvent::Failed(e.to_string())).await;
                        return;
                    }
                    None => {
                        // Stream ended without done signal
                        let _ = tx.send(StreamEvent::Finished).await;
                        return;
                    }
                }
            }
        });

        Ok(rx)
    }

    async fn guided_chat(
        &self,
        request: GuidedRequest,
        cancel: CancellationToken,
    ) -> Result<GuidedReply, TaskError> {
        let body = serde_json::json!({
            "mode": GUIDED_MODE,
            "session_id": request.session_id,
            "topic": request.topic,
            "messages": request.messages,
        });

        let response = self
            .post_json(self.guided_url(), "application/json", &body, &cancel)
            .await?;

        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(TaskError::Cancelled),
            reply = response.json::<GuidedReply>() => reply
                .map_err(|e| TaskError::Failed(format!("invalid guided reply: {e}"))),
        }
    }
}

/// JSON payload of one `data: ` line
#[derive(Debug, Default, Deserialize)]
struct SsePayload {
    #[serde(rename = "type")]
    kind: Option<String>,
    content: Option<String>,
    reasoning: Option<String>,
    model: Option<String>,
    error: Option<String>,
}

/// Incremental SSE frame decoder
///
/// Bytes are buffered until a full frame (terminated by a blank line) is
/// available, so multi-byte characters split across network chunks decode
/// correctly. After a terminal event the decoder yields nothing more.
#[derive(Debug, Default)]
pub(crate) struct SseDecoder {
    buffer: Vec<u8>,
    finished: bool,
}

impl SseDecoder {
    /// Feed raw body bytes, returning every event completed by them
    pub(crate) fn push(&mut self, bytes: &[u8]) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if self.finished {
            return events;
        }

        self.buffer.extend_from_slice(bytes);
        while let Some((end, sep_len)) = find_frame_end(&self.buffer) {
            let frame: Vec<u8> = self.buffer.drain(..end + sep_len).take(end).collect();
            let frame = String::from_utf8_lossy(&frame);
            if decode_frame(&frame, &mut events) {
                self.finished = true;
                self.buffer.clear();
                break;
            }
        }
        events
    }
}

/// Decode one frame; returns true if it ended the stream
fn decode_frame(frame: &str, events: &mut Vec<StreamEvent>) -> bool {
    for line in frame.lines() {
        let Some(data) = line.strip_prefix("data: ") else {
            continue;
        };

        let payload = match serde_json::from_str::<SsePayload>(data) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(error = %e, data, "Failed to parse SSE event");
                continue;
            }
        };

        if let Some(error) = payload.error {
            events.push(StreamEvent::Failed(error));
            return true;
        }

        match payload.kind.as_deref() {
            Some("start") => events.push(StreamEvent::Started {
                model: payload.model.unwrap_or_default(),
            }),
            Some("done") => {
                events.push(StreamEvent::Finished);
                return true;
            }
            _ => {
                if let Some(content) = payload.content.filter(|c| !c.is_empty()) {
                    events.push(StreamEvent::Answer(content));
                }
            }
        }

        if let Some(reasoning) = payload.reasoning.filter(|r| !r.is_empty()) {
            events.push(StreamEvent::Reasoning(reasoning));
        }
    }
    false
}

/// Locate the first frame terminator; returns (frame length, terminator length)
fn find_frame_end(buffer: &[u8]) -> Option<(usize, usize)> {
    let lf = buffer.windows(2).position(|w| w == b"\n\n").map(|p| (p, 2));
    let crlf = buffer
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|p| (p, 4));
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}
