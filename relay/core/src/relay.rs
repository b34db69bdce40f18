//! Streaming Relay
//!
//! Per-request orchestration: one model token stream, one concurrent video
//! render, one outbound frame channel.
//!
//! # Design Philosophy
//!
//! The relay task is the only writer of the response body. It forwards text
//! frames as tokens arrive and joins the video task only after the model
//! stream has completed, so the data frame can never overtake a text frame
//! no matter how fast the video service answers.
//!
//! Cancellation flows from the client: dropping the [`RelayStream`] closes
//! the frame channel, the relay task notices and returns, the video task is
//! aborted when its handle drops, and the model reader stops once its token
//! receiver is gone.
//!
//! ```text
//!   tokens ──► relay task ──► 0:"..." 0:"..." ... 2:[{video}] d:{...}
//!                 ▲
//!   video task ───┘ (joined after the last token)
//! ```

use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures::Stream;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::Instrument;

use crate::backend::{BackendError, ChatBackend, StreamingToken};
use crate::messages::ChatRequest;
use crate::payload::SideChannelPayload;
use crate::protocol::{FinishReason, StreamPart, MAX_FRAME_SIZE};
use crate::video::{VideoBackend, VideoError, DEFAULT_VIDEO_TIMEOUT};

/// Default capacity of the outbound frame channel
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

// ============================================================================
// Configuration and errors
// ============================================================================

/// Relay behaviour knobs
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelayConfig {
    /// Model used when a request leaves `selectedModel` empty
    pub default_model: Option<String>,
    /// Capacity of the outbound frame channel
    pub channel_capacity: usize,
    /// Upper bound on waiting for the video once the text is done
    pub video_timeout: Duration,
    /// Largest encoded data frame sent; bigger videos are dropped
    pub max_video_frame: usize,
    /// Fixed text sent to the video service instead of the user's prompt
    pub video_fixed_text: Option<String>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            default_model: None,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            video_timeout: DEFAULT_VIDEO_TIMEOUT,
            max_video_frame: MAX_FRAME_SIZE,
            video_fixed_text: None,
        }
    }
}

/// Errors that fail a request before any frame is written
#[derive(Debug, Error)]
pub enum RelayError {
    /// The request body is structurally invalid
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The model backend could not open a stream
    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl RelayError {
    /// Whether the caller is at fault (as opposed to an upstream service)
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::InvalidRequest(_))
    }
}

// ============================================================================
// Request helpers
// ============================================================================

/// Check a request and fill in the default model.
///
/// # Errors
///
/// Returns [`RelayError::InvalidRequest`] when the history is empty, or when
/// the model name is empty and no default model is configured.
pub fn validate_request(
    request: &ChatRequest,
    default_model: Option<&str>,
) -> Result<ChatRequest, RelayError> {
    if request.messages.is_empty() {
        return Err(RelayError::InvalidRequest(
            "messages must not be empty".to_string(),
        ));
    }

    let mut validated = request.clone();
    if validated.selected_model.trim().is_empty() {
        match default_model.filter(|m| !m.trim().is_empty()) {
            Some(model) => validated.selected_model = model.to_string(),
            None => {
                return Err(RelayError::InvalidRequest(
                    "selectedModel must not be empty".to_string(),
                ))
            }
        }
    }

    Ok(validated)
}

/// Text sent to the video service for a request: the latest user turn.
///
/// The render starts alongside the model stream, before any assistant text
/// exists, so the user's prompt is the only text available.
#[must_use]
pub fn video_prompt(request: &ChatRequest) -> Option<String> {
    request
        .last_user_message()
        .map(|m| m.content.trim())
        .filter(|text| !text.is_empty())
        .map(String::from)
}

// ============================================================================
// Relay
// ============================================================================

/// Streaming relay shared by all requests
#[derive(Clone)]
pub struct Relay {
    chat: Arc<dyn ChatBackend>,
    video: Option<Arc<dyn VideoBackend>>,
    config: RelayConfig,
}

impl Relay {
    /// Create a relay over a model backend and an optional video backend
    #[must_use]
    pub fn new(
        chat: Arc<dyn ChatBackend>,
        video: Option<Arc<dyn VideoBackend>>,
        config: RelayConfig,
    ) -> Self {
        Self {
            chat,
            video,
            config,
        }
    }

    /// The model backend
    #[must_use]
    pub fn chat_backend(&self) -> &Arc<dyn ChatBackend> {
        &self.chat
    }

    /// Whether a video backend is attached
    #[must_use]
    pub fn has_video(&self) -> bool {
        self.video.is_some()
    }

    /// Relay configuration
    #[must_use]
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Start relaying a request.
    ///
    /// Resolves once the model backend has accepted the request; frames are
    /// produced by a background task and read from the returned stream.
    ///
    /// # Errors
    ///
    /// - [`RelayError::InvalidRequest`] if validation fails
    /// - [`RelayError::Backend`] if the model stream cannot be opened
    pub async fn open(&self, request: ChatRequest) -> Result<RelayStream, RelayError> {
        let request = validate_request(&request, self.config.default_model.as_deref())?;
        let request_id = uuid::Uuid::new_v4();
        let span = tracing::info_span!(
            "relay",
            %request_id,
            model = %request.selected_model,
        );

        let tokens = self
            .chat
            .send_streaming(&request)
            .instrument(span.clone())
            .await?;

        let video = self.spawn_video(&request, &span);
        let (tx, rx) = mpsc::channel(self.config.channel_capacity.max(1));

        span.in_scope(|| {
            tracing::info!(
                messages = request.messages.len(),
                video = video.is_some(),
                "Relay stream opened"
            );
        });

        let limits = VideoLimits {
            timeout: self.config.video_timeout,
            max_frame: self.config.max_video_frame,
        };
        tokio::spawn(relay_task(tokens, video, tx, limits).instrument(span));

        Ok(RelayStream {
            inner: ReceiverStream::new(rx),
        })
    }

    fn spawn_video(&self, request: &ChatRequest, span: &tracing::Span) -> Option<VideoTask> {
        let backend = Arc::clone(self.video.as_ref()?);
        let Some(text) = self
            .config
            .video_fixed_text
            .clone()
            .or_else(|| video_prompt(request))
        else {
            span.in_scope(|| tracing::debug!("No text for video render, skipping"));
            return None;
        };

        let handle = tokio::spawn(
            async move { backend.generate(&text).await }.instrument(span.clone()),
        );
        Some(VideoTask { handle })
    }
}

/// Handle to an in-flight video render; dropping it aborts the render
struct VideoTask {
    handle: JoinHandle<Result<Bytes, VideoError>>,
}

impl VideoTask {
    async fn join(mut self, timeout: Duration) -> Result<Bytes, VideoError> {
        match tokio::time::timeout(timeout, &mut self.handle).await {
            Ok(joined) => joined?,
            Err(_) => Err(VideoError::Timeout(timeout)),
        }
    }
}

impl Drop for VideoTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[derive(Clone, Copy, Debug)]
struct VideoLimits {
    timeout: Duration,
    max_frame: usize,
}

/// Forward tokens as frames, then attach the video and finish.
async fn relay_task(
    mut tokens: mpsc::Receiver<StreamingToken>,
    video: Option<VideoTask>,
    tx: mpsc::Sender<Bytes>,
    limits: VideoLimits,
) {
    let mut text_frames = 0usize;

    loop {
        let token = tokio::select! {
            token = tokens.recv() => token,
            () = tx.closed() => {
                tracing::info!(text_frames, "Client disconnected, abandoning stream");
                return;
            }
        };

        match token {
            Some(StreamingToken::Token(text)) => {
                if tx.send(StreamPart::Text(text).encode()).await.is_err() {
                    tracing::info!(text_frames, "Client disconnected, abandoning stream");
                    return;
                }
                text_frames += 1;
            }
            Some(StreamingToken::Error(message)) => {
                tracing::warn!(error = %message, text_frames, "Model stream failed mid-flight");
                drop(video);
                let _ = tx.send(StreamPart::Error(message).encode()).await;
                let _ = tx
                    .send(
                        StreamPart::Finish {
                            finish_reason: FinishReason::Error,
                        }
                        .encode(),
                    )
                    .await;
                return;
            }
            Some(StreamingToken::Complete { .. }) | None => break,
        }
    }

    // Text is done; the model reader can go
    drop(tokens);

    let mut attached = false;
    if let Some(video) = video {
        let outcome = tokio::select! {
            outcome = video.join(limits.timeout) => outcome,
            () = tx.closed() => {
                tracing::info!("Client disconnected while waiting for video");
                return;
            }
        };

        match outcome {
            Ok(bytes) => {
                let payload = SideChannelPayload::from_video_bytes(&bytes);
                let frame = StreamPart::Data(vec![payload.to_value()]).encode();
                if frame.len() > limits.max_frame {
                    tracing::warn!(
                        bytes = bytes.len(),
                        frame_bytes = frame.len(),
                        max = limits.max_frame,
                        "Video too large for a data frame, finishing without side channel"
                    );
                } else {
                    if tx.send(frame).await.is_err() {
                        return;
                    }
                    attached = true;
                    tracing::debug!(bytes = bytes.len(), "Video attached");
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Video unavailable, finishing without side channel");
            }
        }
    }

    let _ = tx
        .send(
            StreamPart::Finish {
                finish_reason: FinishReason::Stop,
            }
            .encode(),
        )
        .await;

    tracing::info!(text_frames, video = attached, "Relay stream complete");
}

// ============================================================================
// Response stream
// ============================================================================

/// Encoded frames of one relayed response, ready to become an HTTP body
pub struct RelayStream {
    inner: ReceiverStream<Bytes>,
}

impl Stream for RelayStream {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx).map(|frame| frame.map(Ok))
    }
}

impl std::fmt::Debug for RelayStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayStream").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::Message;

    #[test]
    fn test_validate_rejects_empty_history() {
        let request = ChatRequest::new("llama3.2", vec![]);
        let err = validate_request(&request, None).unwrap_err();
        assert!(err.is_client_error());
        assert_eq!(err.to_string(), "Invalid request: messages must not be empty");
    }

    #[test]
    fn test_validate_empty_model_without_default() {
        let request = ChatRequest::new("  ", vec![Message::user("Hi")]);
        assert!(matches!(
            validate_request(&request, None),
            Err(RelayError::InvalidRequest(_))
        ));
        assert!(validate_request(&request, Some("")).is_err());
    }

    #[test]
    fn test_validate_fills_default_model() {
        let request = ChatRequest::new("", vec![Message::user("Hi")]);
        let validated = validate_request(&request, Some("llama3.2")).unwrap();
        assert_eq!(validated.selected_model, "llama3.2");
    }

    #[test]
    fn test_validate_keeps_explicit_model() {
        let request = ChatRequest::new("mistral", vec![Message::user("Hi")]);
        let validated = validate_request(&request, Some("llama3.2")).unwrap();
        assert_eq!(validated, request);
    }

    #[test]
    fn test_video_prompt_uses_latest_user_turn() {
        let request = ChatRequest::new(
            "m",
            vec![
                Message::user("first"),
                Message::assistant("reply"),
                Message::user("  second  "),
                Message::assistant("partial"),
            ],
        );
        assert_eq!(video_prompt(&request).as_deref(), Some("second"));
    }

    #[test]
    fn test_video_prompt_none_without_user_text() {
        let request = ChatRequest::new("m", vec![Message::assistant("hello")]);
        assert_eq!(video_prompt(&request), None);

        let blank = ChatRequest::new("m", vec![Message::user("   ")]);
        assert_eq!(video_prompt(&blank), None);
    }

    #[test]
    fn test_backend_error_is_not_client_error() {
        let err = RelayError::from(BackendError::InvalidResponse("x".to_string()));
        assert!(!err.is_client_error());
    }
}
