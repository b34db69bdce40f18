//! Stream Frame Protocol
//!
//! Wire format of the `POST /api/chat` response body: newline-terminated
//! frames, each a one-character type code, a colon, and a JSON value.
//!
//! # Frame Format
//!
//! ```text
//! 0:"Hel"\n                          text token (JSON string)
//! 0:"lo!"\n
//! 2:[{"video":"AAEC..."}]\n          side-channel data (JSON array)
//! 3:"model went away"\n              error (JSON string)
//! d:{"finishReason":"stop"}\n        end of stream
//! ```
//!
//! Text frames carry the token stream in order. At most one data frame is
//! written per response, always after the last text frame. Unknown codes are
//! skipped by the decoder so newer relays can add frame types.
//!
//! # Limits
//!
//! Frames are bounded by [`MAX_FRAME_SIZE`]; a video payload is a single
//! frame, so the limit is sized for a short clip rather than a token.

use bytes::Bytes;
use serde_json::Value;
use thiserror::Error;

/// Maximum frame size (64 MB)
pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// Minimum buffer capacity for decoder
const MIN_BUFFER_CAPACITY: usize = 4096;

const TEXT_CODE: char = '0';
const DATA_CODE: char = '2';
const ERROR_CODE: char = '3';
const FINISH_CODE: char = 'd';

/// Errors decoding frames
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A frame grew past [`MAX_FRAME_SIZE`] without a terminating newline
    #[error("Frame exceeds maximum size of {max} bytes")]
    FrameTooLarge {
        /// The configured maximum
        max: usize,
    },

    /// Frame bytes are not UTF-8
    #[error("Frame is not valid UTF-8")]
    InvalidUtf8,

    /// Frame has no `code:` prefix
    #[error("Malformed frame: {0}")]
    Malformed(String),

    /// Frame value does not match its code
    #[error("Invalid JSON in '{code}' frame: {source}")]
    Json {
        /// Frame type code
        code: char,
        /// Underlying parse error
        source: serde_json::Error,
    },
}

/// Why a stream ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FinishReason {
    /// The model stream completed
    Stop,
    /// The model stream failed mid-flight
    Error,
}

impl FinishReason {
    /// Wire name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stop => "stop",
            Self::Error => "error",
        }
    }

    fn parse(name: &str) -> Self {
        match name {
            "stop" => Self::Stop,
            _ => Self::Error,
        }
    }
}

/// One frame of the response body
#[derive(Clone, Debug, PartialEq)]
pub enum StreamPart {
    /// A text token
    Text(String),
    /// Side-channel records
    Data(Vec<Value>),
    /// The model stream failed
    Error(String),
    /// The response is complete
    Finish {
        /// Why the stream ended
        finish_reason: FinishReason,
    },
}

impl StreamPart {
    /// Type code of this frame
    #[must_use]
    pub fn code(&self) -> char {
        match self {
            Self::Text(_) => TEXT_CODE,
            Self::Data(_) => DATA_CODE,
            Self::Error(_) => ERROR_CODE,
            Self::Finish { .. } => FINISH_CODE,
        }
    }

    /// Encode as a newline-terminated frame
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let value = match self {
            Self::Text(text) | Self::Error(text) => Value::String(text.clone()),
            Self::Data(values) => Value::Array(values.clone()),
            Self::Finish { finish_reason } => {
                serde_json::json!({ "finishReason": finish_reason.as_str() })
            }
        };
        Bytes::from(format!("{}:{}\n", self.code(), value))
    }

    /// Parse a single frame line (without its newline).
    ///
    /// Returns `Ok(None)` for frame codes this decoder does not know.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Malformed`] if the line has no code prefix and
    /// [`ProtocolError::Json`] if the value does not match the code.
    pub fn parse_line(line: &str) -> Result<Option<Self>, ProtocolError> {
        let (code, json) = line
            .split_once(':')
            .ok_or_else(|| ProtocolError::Malformed(truncate(line)))?;

        let mut chars = code.chars();
        let (Some(code), None) = (chars.next(), chars.next()) else {
            return Err(ProtocolError::Malformed(truncate(line)));
        };

        let part = match code {
            TEXT_CODE => Self::Text(parse_json(code, json)?),
            DATA_CODE => Self::Data(parse_json(code, json)?),
            ERROR_CODE => Self::Error(parse_json(code, json)?),
            FINISH_CODE => {
                let value: Value = parse_json(code, json)?;
                let reason = value
                    .get("finishReason")
                    .and_then(Value::as_str)
                    .unwrap_or("stop");
                Self::Finish {
                    finish_reason: FinishReason::parse(reason),
                }
            }
            other => {
                tracing::debug!(code = %other, "Skipping unknown frame type");
                return Ok(None);
            }
        };

        Ok(Some(part))
    }
}

fn parse_json<T: serde::de::DeserializeOwned>(code: char, json: &str) -> Result<T, ProtocolError> {
    serde_json::from_str(json).map_err(|source| ProtocolError::Json { code, source })
}

fn truncate(line: &str) -> String {
    line.chars().take(40).collect()
}

/// Decoder state machine for streaming frame parsing
///
/// Buffers incoming bytes and yields complete frames. Chunk boundaries may
/// fall anywhere, including inside a multi-byte UTF-8 sequence.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    /// Position where we've consumed up to
    read_pos: usize,
    /// Dropping bytes until the next newline
    discarding: bool,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    /// Create a new decoder with default buffer capacity
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(MIN_BUFFER_CAPACITY),
            read_pos: 0,
            discarding: false,
        }
    }

    /// Append bytes to the buffer
    pub fn push(&mut self, data: &[u8]) {
        // Compact buffer if we've consumed a lot
        if self.read_pos > self.buffer.len() / 2 && self.read_pos > MIN_BUFFER_CAPACITY {
            self.buffer.drain(..self.read_pos);
            self.read_pos = 0;
        }
        self.buffer.extend_from_slice(data);
    }

    /// Get the number of bytes available in the buffer
    #[must_use]
    pub fn available(&self) -> usize {
        self.buffer.len() - self.read_pos
    }

    /// Try to decode the next frame
    ///
    /// Returns:
    /// - `Ok(Some(part))` if a complete frame was decoded
    /// - `Ok(None)` if more data is needed
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolError`] if a complete frame is invalid or a pending
    /// frame exceeds [`MAX_FRAME_SIZE`].
    pub fn decode(&mut self) -> Result<Option<StreamPart>, ProtocolError> {
        loop {
            let pending = &self.buffer[self.read_pos..];
            let newline = pending.iter().position(|&b| b == b'\n');

            if self.discarding {
                match newline {
                    Some(newline) => {
                        self.read_pos += newline + 1;
                        self.discarding = false;
                        continue;
                    }
                    None => {
                        self.read_pos = self.buffer.len();
                        return Ok(None);
                    }
                }
            }

            let Some(newline) = newline else {
                if pending.len() > MAX_FRAME_SIZE {
                    return Err(ProtocolError::FrameTooLarge {
                        max: MAX_FRAME_SIZE,
                    });
                }
                return Ok(None);
            };

            let line_start = self.read_pos;
            self.read_pos += newline + 1;

            if let Some(part) = self.parse_range(line_start, line_start + newline)? {
                return Ok(Some(part));
            }
        }
    }

    /// Decode a trailing frame that arrived without its newline.
    ///
    /// Call once the byte stream has ended.
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolError`] if the leftover bytes are not a valid frame.
    pub fn finish(&mut self) -> Result<Option<StreamPart>, ProtocolError> {
        if let Some(part) = self.decode()? {
            return Ok(Some(part));
        }
        let start = self.read_pos;
        let end = self.buffer.len();
        self.read_pos = end;
        self.parse_range(start, end)
    }

    /// Drop the pending frame, including bytes of it that have not arrived yet.
    ///
    /// Decoding resumes after the next newline. Use this to step over a frame
    /// that [`decode`](Self::decode) rejected as
    /// [`FrameTooLarge`](ProtocolError::FrameTooLarge).
    pub fn skip_frame(&mut self) {
        self.read_pos = self.buffer.len();
        self.discarding = true;
    }

    fn parse_range(&self, start: usize, end: usize) -> Result<Option<StreamPart>, ProtocolError> {
        let line = std::str::from_utf8(&self.buffer[start..end])
            .map_err(|_| ProtocolError::InvalidUtf8)?
            .trim_end_matches('\r');
        if line.trim().is_empty() {
            return Ok(None);
        }
        StreamPart::parse_line(line)
    }
}
