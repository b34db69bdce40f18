//! Relay Client
//!
//! HTTP client for the relay daemon. Chat responses are read as a chunked
//! body, decoded frame by frame, and forwarded to the UI loop as
//! [`ClientEvent`]s tagged with the request they belong to.
//!
//! # Architecture
//!
//! One reader task per request. The UI keeps the [`StreamHandle`]; stopping
//! or dropping it aborts the task, which drops the response body and with it
//! the connection, so the relay sees the client go away.

use futures::{Stream, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use vidchat_core::{
    ChatRequest, FinishReason, FrameDecoder, ModelInfo, ProtocolError, SideChannelPayload,
    StreamPart,
};

use crate::transcript::{RequestId, StreamEvent};

/// Default relay URL
pub const DEFAULT_RELAY_URL: &str = "http://127.0.0.1:3000";

/// Stream event for a specific request
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientEvent {
    /// Request the event belongs to
    pub request_id: RequestId,
    /// What happened
    pub event: StreamEvent,
}

/// Relay client failures
#[derive(Debug, Error)]
pub enum ClientError {
    /// Could not reach the relay
    #[error("Relay request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// Relay rejected the request
    #[error("Relay returned {status}: {message}")]
    Status {
        /// HTTP status code
        status: u16,
        /// `error` field of the JSON body, or the raw body
        message: String,
    },
}

/// Handle to a streaming chat request
#[derive(Debug)]
pub struct StreamHandle {
    request_id: RequestId,
    task: JoinHandle<()>,
}

impl StreamHandle {
    /// Request this stream belongs to
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Abort the reader; no further events are sent
    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Client for a relay daemon
#[derive(Clone, Debug)]
pub struct RelayClient {
    base_url: String,
    http_client: reqwest::Client,
}

impl RelayClient {
    /// Create a client for the relay at `base_url`
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http_client,
        })
    }

    /// Relay base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Send a chat request and start reading its stream.
    ///
    /// Resolves once the relay has accepted the request. Events then arrive
    /// on `events` until a terminal [`StreamEvent::Closed`] or
    /// [`StreamEvent::Error`].
    pub async fn chat(
        &self,
        request_id: RequestId,
        request: &ChatRequest,
        events: mpsc::Sender<ClientEvent>,
    ) -> Result<StreamHandle, ClientError> {
        let response = self.post_chat(request).await?;
        let task = tokio::spawn(read_stream(response.bytes_stream(), request_id, events));
        Ok(StreamHandle { request_id, task })
    }

    /// Like [`RelayClient::chat`] but without waiting for the relay.
    ///
    /// Connection and status failures are delivered as a
    /// [`StreamEvent::Error`] on `events`.
    pub fn spawn_chat(
        &self,
        request_id: RequestId,
        request: ChatRequest,
        events: mpsc::Sender<ClientEvent>,
    ) -> StreamHandle {
        let client = self.clone();
        let task = tokio::spawn(async move {
            match client.post_chat(&request).await {
                Ok(response) => read_stream(response.bytes_stream(), request_id, events).await,
                Err(e) => {
                    tracing::warn!(request = %request_id, error = %e, "Chat request failed");
                    let _ = events
                        .send(ClientEvent {
                            request_id,
                            event: StreamEvent::Error(e.to_string()),
                        })
                        .await;
                }
            }
        });
        StreamHandle { request_id, task }
    }

    /// List models available through the relay
    pub async fn models(&self) -> Result<Vec<ModelInfo>, ClientError> {
        #[derive(serde::Deserialize)]
        struct ModelsResponse {
            models: Vec<ModelInfo>,
        }

        let response = self
            .http_client
            .get(format!("{}/api/models", self.base_url))
            .send()
            .await?;
        let response = check_status(response).await?;
        let body: ModelsResponse = response.json().await?;
        Ok(body.models)
    }

    async fn post_chat(&self, request: &ChatRequest) -> Result<reqwest::Response, ClientError> {
        let response = self
            .http_client
            .post(format!("{}/api/chat", self.base_url))
            .json(request)
            .send()
            .await?;
        check_status(response).await
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(String::from))
        .unwrap_or(body);

    Err(ClientError::Status {
        status: status.as_u16(),
        message,
    })
}

/// Decode a relay response body into stream events.
///
/// Exactly one terminal event is sent: [`StreamEvent::Closed`] on a `stop`
/// finish or a clean end of body, [`StreamEvent::Error`] otherwise. Returns
/// early if the receiver is dropped.
///
/// A frame too large to buffer is skipped; the reply finishes without it.
pub async fn read_stream<S, E>(mut body: S, request_id: RequestId, events: mpsc::Sender<ClientEvent>)
where
    S: Stream<Item = Result<bytes::Bytes, E>> + Unpin,
    E: std::fmt::Display,
{
    let mut reader = FrameReader::default();

    loop {
        let chunk = match body.next().await {
            Some(Ok(chunk)) => chunk,
            Some(Err(e)) => {
                tracing::warn!(request = %request_id, error = %e, "Relay stream broke");
                let _ = emit(&events, request_id, StreamEvent::Error(e.to_string())).await;
                return;
            }
            None => break,
        };
        reader.decoder.push(&chunk);

        loop {
            let step = match reader.decoder.decode() {
                Ok(Some(part)) => reader.step(part),
                Ok(None) => break,
                Err(ProtocolError::FrameTooLarge { max }) => {
                    tracing::warn!(request = %request_id, max, "Skipping oversized frame");
                    reader.decoder.skip_frame();
                    continue;
                }
                Err(e) => Step::Done(Some(StreamEvent::Error(e.to_string()))),
            };
            if !deliver(&events, request_id, step).await {
                return;
            }
        }
    }

    // A final frame may lack its newline
    let step = match reader.decoder.finish() {
        Ok(Some(part)) => reader.step(part),
        Ok(None) if reader.errored => Step::Done(None),
        Ok(None) => Step::Done(Some(StreamEvent::Closed)),
        Err(e) => Step::Done(Some(StreamEvent::Error(e.to_string()))),
    };
    if deliver(&events, request_id, step).await && !reader.errored {
        let _ = emit(&events, request_id, StreamEvent::Closed).await;
    }
}

#[derive(Default)]
struct FrameReader {
    decoder: FrameDecoder,
    errored: bool,
}

enum Step {
    /// Forward and keep reading
    Emit(StreamEvent),
    /// Forward (if any) and stop
    Done(Option<StreamEvent>),
}

impl FrameReader {
    fn step(&mut self, part: StreamPart) -> Step {
        match part {
            StreamPart::Text(text) => Step::Emit(StreamEvent::Text(text)),
            StreamPart::Data(values) => {
                Step::Emit(StreamEvent::Data(SideChannelPayload::from_values(&values)))
            }
            StreamPart::Error(message) => {
                self.errored = true;
                Step::Emit(StreamEvent::Error(message))
            }
            StreamPart::Finish {
                finish_reason: FinishReason::Stop,
            } => Step::Done(Some(StreamEvent::Closed)),
            StreamPart::Finish {
                finish_reason: FinishReason::Error,
            } if self.errored => Step::Done(None),
            StreamPart::Finish {
                finish_reason: FinishReason::Error,
            } => Step::Done(Some(StreamEvent::Error(
                "Stream ended with an error".to_string(),
            ))),
        }
    }
}

/// Send a step's event; false means stop reading
async fn deliver(events: &mpsc::Sender<ClientEvent>, request_id: RequestId, step: Step) -> bool {
    match step {
        Step::Emit(event) => emit(events, request_id, event).await,
        Step::Done(Some(event)) => {
            let _ = emit(events, request_id, event).await;
            false
        }
        Step::Done(None) => false,
    }
}

async fn emit(events: &mpsc::Sender<ClientEvent>, request_id: RequestId, event: StreamEvent) -> bool {
    events.send(ClientEvent { request_id, event }).await.is_ok()
}
