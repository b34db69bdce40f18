//! vidchat TUI - Terminal transcript for the vidchat relay
//!
//! Streams replies from the relay into a scrolling transcript and writes
//! the videos that arrive on the side channel to disk, listing their paths
//! under the reply they belong to.
//!
//! # Architecture
//!
//! - **Client**: HTTP requests to the relay and frame decoding of the body
//! - **Transcript**: Conversation state machine keyed by request id
//! - **Artifact**: Side-channel payloads to `.webm` files
//! - **Display**: Transcript to styled, wrapped lines (code fences included)
//! - **App**: Event loop tying terminal input, streams and rendering together

pub mod app;
pub mod artifact;
pub mod client;
pub mod display;
pub mod segments;
pub mod starters;
pub mod theme;
pub mod transcript;

pub use app::{App, AppConfig};
pub use artifact::{
    default_artifact_dir, materialize_videos, session_artifact_dir, ArtifactError, VideoArtifact,
};
pub use client::{ClientError, ClientEvent, RelayClient, StreamHandle, DEFAULT_RELAY_URL};
pub use segments::{join_segments, split_fences, Segment, SegmentKind};
pub use transcript::{
    ApplyOutcome, ArtifactPhase, RequestId, RequestPhase, StreamEvent, Transcript,
    TranscriptEntry,
};
