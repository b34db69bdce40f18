//! Transcript State Machine
//!
//! The ordered list of turns shown on screen plus the bookkeeping for the
//! request currently streaming into it.
//!
//! # Design Philosophy
//!
//! The transcript knows nothing about HTTP or the terminal. Stream events
//! arrive tagged with the [`RequestId`] they belong to; events for a request
//! that is no longer active are dropped, which is what keeps a stopped
//! stream from writing into its old slot.
//!
//! ```text
//! Idle -> Submitted -> Streaming -> Finished
//!              \            \
//!               +------------+---> Errored (error frame, transport error, stop)
//!
//! Finished: ArtifactPhase None | Fetching -> Ready | Failed
//! ```

use vidchat_core::{Message, MessageRole, SideChannelPayload};

use crate::artifact::{ArtifactError, VideoArtifact};

/// Identifies one submitted request
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

impl RequestId {
    /// Raw value, for logs
    pub fn get(self) -> u64 {
        self.0
    }

    #[cfg(test)]
    pub(crate) fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

/// Lifecycle of the latest request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestPhase {
    /// Nothing submitted yet
    Idle,
    /// Sent, no text received
    Submitted,
    /// Text is arriving
    Streaming,
    /// Stream closed normally
    Finished,
    /// Stream failed or was stopped
    Errored,
}

/// Side-channel progress of the latest finished request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArtifactPhase {
    /// No payload arrived
    None,
    /// Payload is being written to disk
    Fetching,
    /// Attachments are available
    Ready,
    /// Payload could not be materialized
    Failed,
}

/// One turn of the conversation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TranscriptEntry {
    /// Who wrote it
    pub role: MessageRole,
    /// Text so far
    pub content: String,
    /// Still receiving text
    pub streaming: bool,
    /// Cut short by the user
    pub stopped: bool,
    /// Stream error, if the reply failed
    pub error: Option<String>,
    /// Materialized videos
    pub attachments: Vec<VideoArtifact>,
}

impl TranscriptEntry {
    fn new(role: MessageRole, content: impl Into<String>, streaming: bool) -> Self {
        Self {
            role,
            content: content.into(),
            streaming,
            stopped: false,
            error: None,
            attachments: Vec::new(),
        }
    }
}

/// What a request's stream delivered
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamEvent {
    /// A text chunk
    Text(String),
    /// Side-channel payloads
    Data(Vec<SideChannelPayload>),
    /// The stream failed
    Error(String),
    /// The stream ended normally
    Closed,
}

/// Payloads waiting to be written for a finished reply
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingArtifacts {
    /// Request that produced them
    pub request_id: RequestId,
    /// Transcript index of the assistant reply
    pub message_index: usize,
    /// Payloads to materialize
    pub payloads: Vec<SideChannelPayload>,
}

/// Result of applying a stream event
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Event belonged to a retired request
    Ignored,
    /// Transcript changed
    Updated,
    /// Stream finished with payloads; caller should materialize them and
    /// report back through [`Transcript::attach_artifacts`]
    ArtifactsPending(PendingArtifacts),
}

#[derive(Debug)]
struct ActiveRequest {
    id: RequestId,
    slot: usize,
    payloads: Vec<SideChannelPayload>,
}

/// Session-local conversation
#[derive(Debug)]
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
    next_id: u64,
    active: Option<ActiveRequest>,
    latest: Option<RequestId>,
    phase: RequestPhase,
    artifact_phase: ArtifactPhase,
    fetching: Vec<(RequestId, usize)>,
}

impl Default for Transcript {
    fn default() -> Self {
        Self::new()
    }
}

impl Transcript {
    /// Empty transcript
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_id: 1,
            active: None,
            latest: None,
            phase: RequestPhase::Idle,
            artifact_phase: ArtifactPhase::None,
            fetching: Vec::new(),
        }
    }

    /// Add a user turn and an empty assistant slot, starting a new request.
    ///
    /// An active request is stopped first.
    pub fn submit(&mut self, content: impl Into<String>) -> RequestId {
        self.stop();

        let id = RequestId(self.next_id);
        self.next_id += 1;

        self.entries
            .push(TranscriptEntry::new(MessageRole::User, content, false));
        self.entries
            .push(TranscriptEntry::new(MessageRole::Assistant, "", true));

        self.active = Some(ActiveRequest {
            id,
            slot: self.entries.len() - 1,
            payloads: Vec::new(),
        });
        self.latest = Some(id);
        self.phase = RequestPhase::Submitted;
        self.artifact_phase = ArtifactPhase::None;

        tracing::debug!(request = %id, "Request submitted");
        id
    }

    /// Stop the active request, keeping the text received so far.
    ///
    /// Returns the retired id, if a request was active.
    pub fn stop(&mut self) -> Option<RequestId> {
        let active = self.active.take()?;
        if let Some(entry) = self.entries.get_mut(active.slot) {
            entry.streaming = false;
            entry.stopped = true;
        }
        self.phase = RequestPhase::Errored;
        tracing::debug!(request = %active.id, "Request stopped");
        Some(active.id)
    }

    /// Apply a stream event for a request
    pub fn apply(&mut self, id: RequestId, event: StreamEvent) -> ApplyOutcome {
        let Some(active) = self.active.as_mut().filter(|a| a.id == id) else {
            tracing::trace!(request = %id, "Ignoring event for retired request");
            return ApplyOutcome::Ignored;
        };
        let slot = active.slot;

        match event {
            StreamEvent::Text(text) => {
                if let Some(entry) = self.entries.get_mut(slot) {
                    entry.content.push_str(&text);
                }
                self.phase = RequestPhase::Streaming;
                ApplyOutcome::Updated
            }
            StreamEvent::Data(payloads) => {
                active
                    .payloads
                    .extend(payloads.into_iter().filter(SideChannelPayload::has_video));
                ApplyOutcome::Updated
            }
            StreamEvent::Error(message) => {
                self.active = None;
                if let Some(entry) = self.entries.get_mut(slot) {
                    entry.streaming = false;
                    entry.error = Some(message);
                }
                self.phase = RequestPhase::Errored;
                ApplyOutcome::Updated
            }
            StreamEvent::Closed => {
                let payloads = std::mem::take(&mut active.payloads);
                self.active = None;
                if let Some(entry) = self.entries.get_mut(slot) {
                    entry.streaming = false;
                }
                self.phase = RequestPhase::Finished;

                if payloads.is_empty() {
                    return ApplyOutcome::Updated;
                }
                self.artifact_phase = ArtifactPhase::Fetching;
                self.fetching.push((id, slot));
                ApplyOutcome::ArtifactsPending(PendingArtifacts {
                    request_id: id,
                    message_index: slot,
                    payloads,
                })
            }
        }
    }

    /// Attach materialized videos to the reply of a finished request.
    ///
    /// Earlier attachments of that reply are replaced. A failure leaves the
    /// reply text untouched. Returns false if nothing was waiting on `id`.
    pub fn attach_artifacts(
        &mut self,
        id: RequestId,
        result: Result<Vec<VideoArtifact>, ArtifactError>,
    ) -> bool {
        let Some(pos) = self.fetching.iter().position(|(pending, _)| *pending == id) else {
            return false;
        };
        let (_, slot) = self.fetching.remove(pos);
        let is_latest = self.latest == Some(id);

        let phase = match result {
            Ok(artifacts) => {
                if let Some(entry) = self.entries.get_mut(slot) {
                    entry.attachments = artifacts;
                }
                ArtifactPhase::Ready
            }
            Err(e) => {
                tracing::warn!(request = %id, error = %e, "Video attachment failed");
                if let Some(entry) = self.entries.get_mut(slot) {
                    entry.attachments.clear();
                }
                ArtifactPhase::Failed
            }
        };

        if is_latest {
            self.artifact_phase = phase;
        }
        true
    }

    /// Messages to send for the next request.
    ///
    /// Leaves out the slot being streamed and replies that never got text.
    pub fn history(&self) -> Vec<Message> {
        let active_slot = self.active.as_ref().map(|a| a.slot);
        self.entries
            .iter()
            .enumerate()
            .filter(|(i, e)| Some(*i) != active_slot && !e.content.is_empty())
            .map(|(_, e)| Message::new(e.role, e.content.clone()))
            .collect()
    }

    /// All turns, oldest first
    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    /// Phase of the latest request
    pub fn phase(&self) -> RequestPhase {
        self.phase
    }

    /// Artifact phase of the latest request
    pub fn artifact_phase(&self) -> ArtifactPhase {
        self.artifact_phase
    }

    /// Id of the request still streaming, if any
    pub fn active_request(&self) -> Option<RequestId> {
        self.active.as_ref().map(|a| a.id)
    }

    /// Whether a request is streaming
    pub fn is_streaming(&self) -> bool {
        self.active.is_some()
    }

    /// Whether any artifact is being written
    pub fn is_fetching(&self) -> bool {
        !self.fetching.is_empty()
    }

    /// Whether videos for the entry at `index` are being written
    pub fn is_fetching_for(&self, index: usize) -> bool {
        self.fetching.iter().any(|(_, slot)| *slot == index)
    }

    /// Whether nothing has been said yet
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
