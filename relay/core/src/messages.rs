//! Chat Messages
//!
//! The conversation data model shared by the relay and the transcript.
//! A conversation is an ordered, append-only list of [`Message`]s identified
//! by position; there are no message IDs on the wire.

use serde::{Deserialize, Serialize};

/// Who sent a message
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// User input
    User,
    /// Model response
    Assistant,
    /// System instruction
    System,
    /// Any other role a client may send (tool, data, function, ...)
    #[serde(other)]
    Other,
}

impl MessageRole {
    /// Role name sent to the model backend.
    ///
    /// Only user turns stay user turns; everything else is replayed as an
    /// assistant turn.
    #[must_use]
    pub fn backend_role(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant | Self::System | Self::Other => "assistant",
        }
    }
}

/// A single conversation turn
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Who sent this message
    pub role: MessageRole,
    /// Message content
    pub content: String,
}

impl Message {
    /// Create a message with an explicit role
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }
}

/// Request body of `POST /api/chat`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    /// Full conversation history, oldest first
    pub messages: Vec<Message>,
    /// Model identifier understood by the model backend
    #[serde(default)]
    pub selected_model: String,
}

impl ChatRequest {
    /// Create a request for a model with the given history
    pub fn new(selected_model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            messages,
            selected_model: selected_model.into(),
        }
    }

    /// The most recent user turn, if any
    #[must_use]
    pub fn last_user_message(&self) -> Option<&Message> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::User)
    }
}
