//! Ollama Backend Implementation
//!
//! Chat backend for Ollama (local model server).
//!
//! # Ollama API
//!
//! - `POST /api/chat` - Chat completion with message history (streamed as NDJSON)
//! - `GET /api/tags` - List available models
//!
//! Each streamed line looks like
//! `{"message":{"role":"assistant","content":"Hel"},"done":false}`; the last
//! one carries `"done":true`. Failures mid-stream arrive as `{"error":"..."}`.

use std::ops::ControlFlow;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use super::traits::{BackendError, ChatBackend, ModelInfo, StreamingToken};
use crate::messages::ChatRequest;

/// Default Ollama base URL
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Default connect timeout; streams themselves have no overall timeout
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Token channel capacity
const TOKEN_CHANNEL_CAPACITY: usize = 100;

/// Longest NDJSON line buffered while waiting for its newline (1 MB)
const MAX_LINE_SIZE: usize = 1024 * 1024;

/// One NDJSON line of a streamed chat response
#[derive(Debug, Default, Deserialize)]
struct ChatLine {
    #[serde(default)]
    message: Option<ChatLineMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChatLineMessage {
    #[serde(default)]
    content: String,
}

/// Ollama backend client
#[derive(Clone, Debug)]
pub struct OllamaBackend {
    /// Base URL without trailing slash
    base_url: String,
    /// HTTP client
    http_client: reqwest::Client,
}

impl OllamaBackend {
    /// Create a new Ollama backend
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Transport`] if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>) -> Result<Self, BackendError> {
        Self::with_connect_timeout(base_url, DEFAULT_CONNECT_TIMEOUT)
    }

    /// Create a new Ollama backend with a custom connect timeout
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Transport`] if the HTTP client cannot be built.
    pub fn with_connect_timeout(
        base_url: impl Into<String>,
        connect_timeout: Duration,
    ) -> Result<Self, BackendError> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http_client,
        })
    }

    /// Get the base URL
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Get chat endpoint URL
    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.base_url)
    }

    /// Get tags endpoint URL
    fn tags_url(&self) -> String {
        format!("{}/api/tags", self.base_url)
    }

    /// Build the `/api/chat` body, mapping roles to user/assistant turns
    fn build_body(request: &ChatRequest) -> serde_json::Value {
        let messages: Vec<serde_json::Value> = request
            .messages
            .iter()
            .map(|m| {
                serde_json::json!({
                    "role": m.role.backend_role(),
                    "content": m.content,
                })
            })
            .collect();

        serde_json::json!({
            "model": request.selected_model,
            "messages": messages,
            "stream": true,
        })
    }
}

#[async_trait]
impl ChatBackend for OllamaBackend {
    fn name(&self) -> &str {
        "Ollama"
    }

    async fn health_check(&self) -> bool {
        self.http_client
            .get(self.tags_url())
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .is_ok_and(|r| r.status().is_success())
    }

    async fn send_streaming(
        &self,
        request: &ChatRequest,
    ) -> Result<mpsc::Receiver<StreamingToken>, BackendError> {
        let (tx, rx) = mpsc::channel(TOKEN_CHANNEL_CAPACITY);

        let response = self
            .http_client
            .post(self.chat_url())
            .json(&Self::build_body(request))
            .send()
            .await?;

        // Check for HTTP errors
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Status { status, body });
        }

        tracing::debug!(
            model = %request.selected_model,
            messages = request.messages.len(),
            "Ollama stream established"
        );

        // Spawn task to process stream
        tokio::spawn(pump_chat_stream(response.bytes_stream(), tx));

        Ok(rx)
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>, BackendError> {
        let response = self
            .http_client
            .get(self.tags_url())
            .timeout(Duration::from_secs(10))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Status { status, body });
        }

        let data: serde_json::Value = response.json().await?;

        let models = data
            .get("models")
            .and_then(|m| m.as_array())
            .ok_or_else(|| BackendError::InvalidResponse("missing 'models' array".to_string()))?
            .iter()
            .filter_map(|m| {
                let name = m.get("name")?.as_str()?.to_string();
                let size = m.get("size").and_then(serde_json::Value::as_u64);
                let parameters = m
                    .get("details")
                    .and_then(|d| d.get("parameter_size"))
                    .and_then(|p| p.as_str())
                    .map(String::from);

                Some(ModelInfo {
                    name,
                    size,
                    parameters,
                })
            })
            .collect();

        Ok(models)
    }
}

/// Read newline-delimited JSON from the response body and forward tokens.
///
/// Lines are split on raw bytes so a chunk boundary inside a multi-byte
/// character never corrupts a token. A line that grows past
/// [`MAX_LINE_SIZE`] without a newline fails the stream.
async fn pump_chat_stream<S, E>(mut stream: S, tx: mpsc::Sender<StreamingToken>)
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: std::fmt::Display,
{
    let mut buffer: Vec<u8> = Vec::new();
    let mut full_response = String::new();

    while let Some(chunk) = stream.next().await {
        let bytes = match chunk {
            Ok(bytes) => bytes,
            Err(e) => {
                let _ = tx.send(StreamingToken::Error(e.to_string())).await;
                return;
            }
        };
        buffer.extend_from_slice(&bytes);

        while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = buffer.drain(..=pos).collect();
            if forward_line(&tx, &line[..pos], &mut full_response)
                .await
                .is_break()
            {
                return;
            }
        }

        if buffer.len() > MAX_LINE_SIZE {
            tracing::warn!(buffered = buffer.len(), "Ollama line too long, abandoning stream");
            let _ = tx
                .send(StreamingToken::Error(format!(
                    "Ollama line exceeds maximum size of {MAX_LINE_SIZE} bytes"
                )))
                .await;
            return;
        }
    }

    if !buffer.is_empty() && forward_line(&tx, &buffer, &mut full_response).await.is_break() {
        return;
    }

    // Stream ended without done signal
    let _ = tx
        .send(StreamingToken::Complete {
            message: full_response,
        })
        .await;
}

/// Handle one NDJSON line. Breaks when the stream is finished or the
/// receiver is gone.
async fn forward_line(
    tx: &mpsc::Sender<StreamingToken>,
    line: &[u8],
    full_response: &mut String,
) -> ControlFlow<()> {
    let line = String::from_utf8_lossy(line);
    let line = line.trim();
    if line.is_empty() {
        return ControlFlow::Continue(());
    }

    let parsed: ChatLine = match serde_json::from_str(line) {
        Ok(parsed) => parsed,
        Err(e) => {
            tracing::debug!(error = %e, "Skipping unparseable Ollama line");
            return ControlFlow::Continue(());
        }
    };

    if let Some(error) = parsed.error {
        let _ = tx.send(StreamingToken::Error(error)).await;
        return ControlFlow::Break(());
    }

    if let Some(message) = parsed.message {
        if !message.content.is_empty() {
            full_response.push_str(&message.content);
            if tx
                .send(StreamingToken::Token(message.content))
                .await
                .is_err()
            {
                // Receiver dropped, stop streaming
                tracing::debug!("Token receiver dropped, abandoning Ollama stream");
                return ControlFlow::Break(());
            }
        }
    }

    if parsed.done {
        let _ = tx
            .send(StreamingToken::Complete {
                message: std::mem::take(full_response),
            })
            .await;
        return ControlFlow::Break(());
    }

    ControlFlow::Continue(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::Message;

    async fn collect(mut rx: mpsc::Receiver<StreamingToken>) -> Vec<StreamingToken> {
        let mut tokens = Vec::new();
        while let Some(token) = rx.recv().await {
            tokens.push(token);
        }
        tokens
    }

    fn chunks(parts: &[&str]) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Unpin {
        let owned: Vec<Result<Bytes, std::io::Error>> = parts
            .iter()
            .map(|p| Ok(Bytes::copy_from_slice(p.as_bytes())))
            .collect();
        futures::stream::iter(owned)
    }

    #[test]
    fn test_ollama_backend_creation() {
        let backend = OllamaBackend::new("http://localhost:11434/").unwrap();
        assert_eq!(backend.base_url(), "http://localhost:11434");
        assert_eq!(backend.chat_url(), "http://localhost:11434/api/chat");
        assert_eq!(backend.tags_url(), "http://localhost:11434/api/tags");
    }

    #[test]
    fn test_build_body_maps_roles() {
        let request = ChatRequest::new(
            "llama3.2",
            vec![
                Message::user("Hi"),
                Message::assistant("Hello!"),
                Message::new(crate::messages::MessageRole::System, "be brief"),
            ],
        );

        let body = OllamaBackend::build_body(&request);
        assert_eq!(body["model"], "llama3.2");
        assert_eq!(body["stream"], true);
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][1]["role"], "assistant");
        assert_eq!(body["messages"][2]["role"], "assistant");
        assert_eq!(body["messages"][2]["content"], "be brief");
    }

    #[tokio::test]
    async fn test_pump_tokens_in_order() {
        let (tx, rx) = mpsc::channel(16);
        let stream = chunks(&[
            "{\"message\":{\"content\":\"Hel\"},\"done\":false}\n",
            "{\"message\":{\"content\":\"lo!\"},\"done\":false}\n{\"message\":{\"content\":\"\"},\"done\":true}\n",
        ]);

        pump_chat_stream(stream, tx).await;

        assert_eq!(
            collect(rx).await,
            vec![
                StreamingToken::Token("Hel".to_string()),
                StreamingToken::Token("lo!".to_string()),
                StreamingToken::Complete {
                    message: "Hello!".to_string()
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_pump_line_split_across_chunks() {
        let (tx, rx) = mpsc::channel(16);
        let line = "{\"message\":{\"content\":\"señor\"},\"done\":true}\n";
        let bytes = line.as_bytes();
        // Split inside the two-byte 'ñ'
        let split = line.find('ñ').unwrap() + 1;
        let owned: Vec<Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::copy_from_slice(&bytes[..split])),
            Ok(Bytes::copy_from_slice(&bytes[split..])),
        ];

        pump_chat_stream(futures::stream::iter(owned), tx).await;

        assert_eq!(
            collect(rx).await,
            vec![
                StreamingToken::Token("señor".to_string()),
                StreamingToken::Complete {
                    message: "señor".to_string()
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_pump_unterminated_line_is_capped() {
        let (tx, rx) = mpsc::channel(16);
        let runaway = format!("{{\"message\":{{\"content\":\"{}", "x".repeat(MAX_LINE_SIZE));
        let owned: Vec<Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from_static(
                b"{\"message\":{\"content\":\"Hi\"},\"done\":false}\n",
            )),
            Ok(Bytes::from(runaway)),
            Ok(Bytes::from_static(b"\"},\"done\":true}\n")),
        ];

        pump_chat_stream(futures::stream::iter(owned), tx).await;

        assert_eq!(
            collect(rx).await,
            vec![
                StreamingToken::Token("Hi".to_string()),
                StreamingToken::Error(format!(
                    "Ollama line exceeds maximum size of {MAX_LINE_SIZE} bytes"
                )),
            ]
        );
    }

    #[tokio::test]
    async fn test_pump_error_line() {
        let (tx, rx) = mpsc::channel(16);
        let stream = chunks(&[
            "{\"message\":{\"content\":\"partial\"},\"done\":false}\n",
            "{\"error\":\"model crashed\"}\n",
            "{\"message\":{\"content\":\"never\"},\"done\":false}\n",
        ]);

        pump_chat_stream(stream, tx).await;

        assert_eq!(
            collect(rx).await,
            vec![
                StreamingToken::Token("partial".to_string()),
                StreamingToken::Error("model crashed".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_pump_transport_error() {
        let (tx, rx) = mpsc::channel(16);
        let owned: Vec<Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from_static(b"{\"message\":{\"content\":\"a\"}}\n")),
            Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "connection reset",
            )),
        ];

        pump_chat_stream(futures::stream::iter(owned), tx).await;

        let tokens = collect(rx).await;
        assert_eq!(tokens[0], StreamingToken::Token("a".to_string()));
        assert!(matches!(&tokens[1], StreamingToken::Error(e) if e.contains("connection reset")));
    }

    #[tokio::test]
    async fn test_pump_missing_done_still_completes() {
        let (tx, rx) = mpsc::channel(16);
        let stream = chunks(&["garbage\n", "{\"message\":{\"content\":\"ok\"}}"]);

        pump_chat_stream(stream, tx).await;

        assert_eq!(
            collect(rx).await,
            vec![
                StreamingToken::Token("ok".to_string()),
                StreamingToken::Complete {
                    message: "ok".to_string()
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_pump_stops_when_receiver_dropped() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let stream = chunks(&["{\"message\":{\"content\":\"a\"}}\n"]);

        // Returns instead of hanging on a closed channel
        pump_chat_stream(stream, tx).await;
    }
}
