//! vidchat Core - Streaming Relay with a Video Side Channel
//!
//! This crate holds everything the relay daemon and the terminal transcript
//! share: the chat data model, the framed wire protocol, the model and video
//! backends, and the relay that stitches them together per request.
//!
//! # Architecture
//!
//! ```text
//!   ChatRequest ──► Relay::open
//!                     │
//!          ┌──────────┴───────────┐
//!          │                      │
//!   ChatBackend (Ollama)    VideoBackend (HTTP)
//!   token stream            one POST, runs concurrently
//!          │                      │
//!          ▼                      │
//!   relay task: 0:"text" frames   │
//!          │   stream completes   │
//!          └──────── join ◄───────┘
//!                     │
//!          2:[{"video": base64}]  (at most once, after all text)
//!          d:{"finishReason": ...}
//!                     │
//!                     ▼
//!               RelayStream (chunked HTTP body)
//! ```
//!
//! # Module Overview
//!
//! - [`messages`]: Chat messages and the request body of `POST /api/chat`
//! - [`protocol`]: Frame encoding/decoding for the streamed response body
//! - [`payload`]: Side-channel payload and its base64 codec
//! - [`backend`]: Model backend abstraction and the Ollama implementation
//! - [`video`]: Video backend abstraction and the HTTP implementation
//! - [`relay`]: Per-request orchestration of text stream and side channel
//! - [`config`]: TOML/env configuration for the relay daemon

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod backend;
pub mod config;
pub mod messages;
pub mod payload;
pub mod protocol;
pub mod relay;
pub mod video;

pub use backend::{BackendError, ChatBackend, ModelInfo, OllamaBackend, StreamingToken};
pub use config::{
    default_config_path, load_config, load_config_from_path, ConfigError, ConfigOverrides,
    ConfigSource, RelaySettings, VideoSettings,
};
pub use messages::{ChatRequest, Message, MessageRole};
pub use payload::{decode_base64, encode_base64, PayloadError, SideChannelPayload};
pub use protocol::{FinishReason, FrameDecoder, ProtocolError, StreamPart, MAX_FRAME_SIZE};
pub use relay::{validate_request, video_prompt, Relay, RelayConfig, RelayError, RelayStream};
pub use video::{HttpVideoBackend, VideoBackend, VideoError};
