//! Model Backend Traits
//!
//! Trait definitions for chat model backends. The relay only needs three
//! things from a backend: open a token stream for a conversation, list the
//! models it can serve, and answer a health probe.
//!
//! # Design Philosophy
//!
//! A backend turns a [`ChatRequest`] into an ordered stream of
//! [`StreamingToken`]s delivered over a bounded channel. Dropping the receiver
//! is the cancellation signal: implementations stop reading from the network
//! as soon as a send fails.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::messages::ChatRequest;

/// Token stream events from model backends
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamingToken {
    /// A token from the response
    Token(String),
    /// Response completed successfully
    Complete {
        /// The complete message (concatenation of all tokens)
        message: String,
    },
    /// Error occurred during streaming
    Error(String),
}

/// Errors establishing a backend request
#[derive(Debug, Error)]
pub enum BackendError {
    /// Could not reach the backend or the connection broke
    #[error("Failed to reach model backend: {0}")]
    Transport(#[from] reqwest::Error),

    /// Backend answered with a non-success status
    #[error("Model backend returned {status}: {body}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body (possibly empty)
        body: String,
    },

    /// Backend answered with a body we could not understand
    #[error("Unexpected model backend response: {0}")]
    InvalidResponse(String),
}

/// Information about an available model
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Model identifier, as accepted in `selectedModel`
    pub name: String,
    /// Model size in bytes (if known)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Parameter count label such as "3.2B" (if known)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<String>,
}

/// Chat model backend
///
/// Implement this trait to relay from a different model provider.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Get the backend name (e.g., "Ollama")
    fn name(&self) -> &str;

    /// Check if the backend is healthy and reachable
    async fn health_check(&self) -> bool;

    /// Open a streaming completion for a conversation
    ///
    /// Returns once the backend has accepted the request. Tokens then arrive
    /// on the receiver in the order the backend produced them; the channel
    /// closes after a terminal `Complete` or `Error`.
    async fn send_streaming(
        &self,
        request: &ChatRequest,
    ) -> Result<mpsc::Receiver<StreamingToken>, BackendError>;

    /// List available models
    async fn list_models(&self) -> Result<Vec<ModelInfo>, BackendError>;

    /// Check if a specific model is available
    async fn has_model(&self, model: &str) -> Result<bool, BackendError> {
        let models = self.list_models().await?;
        Ok(models.iter().any(|m| m.name == model))
    }
}
