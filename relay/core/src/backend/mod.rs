//! Model Backend Integration
//!
//! This module provides abstracted access to chat model backends through a
//! common trait interface.
//!
//! # Available Backends
//!
//! - **Ollama**: Local model server (default)
//!
//! # Usage
//!
//! ```ignore
//! use vidchat_core::backend::{ChatBackend, OllamaBackend};
//! use vidchat_core::{ChatRequest, Message};
//!
//! let backend = OllamaBackend::new("http://localhost:11434")?;
//! let request = ChatRequest::new("llama3.2", vec![Message::user("Hi")]);
//! let mut rx = backend.send_streaming(&request).await?;
//! ```

mod ollama;
mod traits;

pub use ollama::{OllamaBackend, DEFAULT_OLLAMA_URL};
pub use traits::{BackendError, ChatBackend, ModelInfo, StreamingToken};
