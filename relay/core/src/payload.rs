//! Side-Channel Payload
//!
//! The out-of-band record carried in a `2:` data frame. The relay emits at
//! most one per request, after the text stream has been fully relayed.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors decoding a side-channel payload
#[derive(Debug, Error)]
pub enum PayloadError {
    /// The `video` field is not valid base64
    #[error("Invalid base64 video payload: {0}")]
    InvalidBase64(#[from] base64::DecodeError),
}

/// A video attachment, base64 encoded
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SideChannelPayload {
    /// Base64 (standard alphabet, padded) video bytes
    pub video: String,
}

impl SideChannelPayload {
    /// Wrap raw video bytes
    #[must_use]
    pub fn from_video_bytes(bytes: &[u8]) -> Self {
        Self {
            video: encode_base64(bytes),
        }
    }

    /// Decode the video bytes
    ///
    /// # Errors
    ///
    /// Returns [`PayloadError::InvalidBase64`] if the field is not valid base64.
    pub fn decode_video(&self) -> Result<Vec<u8>, PayloadError> {
        decode_base64(&self.video)
    }

    /// Whether the payload carries any video data
    #[must_use]
    pub fn has_video(&self) -> bool {
        !self.video.is_empty()
    }

    /// Extract video payloads from the JSON values of a data frame.
    ///
    /// Entries that are not objects with a string `video` field are skipped;
    /// a data frame may carry other records.
    #[must_use]
    pub fn from_values(values: &[serde_json::Value]) -> Vec<Self> {
        values
            .iter()
            .filter_map(|value| serde_json::from_value::<Self>(value.clone()).ok())
            .collect()
    }

    /// JSON value for a data frame
    #[must_use]
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::json!({ "video": self.video })
    }
}

/// Encode bytes as standard padded base64
#[must_use]
pub fn encode_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode standard padded base64
///
/// # Errors
///
/// Returns [`PayloadError::InvalidBase64`] on malformed input.
pub fn decode_base64(encoded: &str) -> Result<Vec<u8>, PayloadError> {
    Ok(STANDARD.decode(encoded)?)
}
