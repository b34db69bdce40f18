//! Main Application
//!
//! The App owns the terminal surface:
//! - Event loop (keyboard, resize, relay stream events, finished artifacts)
//! - [`Transcript`] for conversation state
//! - [`RelayClient`] for talking to the relay
//!
//! # Event flow
//!
//! 1. Enter (or a starter number) submits the input through the transcript
//! 2. A reader task streams the reply and sends [`ClientEvent`]s back
//! 3. A finished reply with videos spawns a writer task for its artifacts
//! 4. Every event is followed by a redraw

use std::path::{Path, PathBuf};

use crossterm::event::{Event, EventStream, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use futures::StreamExt;
use ratatui::backend::Backend;
use ratatui::buffer::Buffer;
use ratatui::layout::{Constraint, Layout, Rect};
use ratatui::style::Style;
use ratatui::Terminal;
use tokio::sync::mpsc;
use unicode_width::UnicodeWidthChar;

use vidchat_core::ChatRequest;

use crate::artifact::{materialize_videos, session_artifact_dir, ArtifactError, VideoArtifact};
use crate::client::{ClientEvent, RelayClient, StreamHandle};
use crate::display::{starter_lines, transcript_lines, Line, Speakers};
use crate::starters::{initials, pick_starters, starter_count};
use crate::theme::{DIM_GRAY, FADE_DARK, FADE_LIGHT, USER_GREEN};
use crate::transcript::{
    ApplyOutcome, ArtifactPhase, PendingArtifacts, RequestId, RequestPhase, StreamEvent,
    Transcript,
};

/// Input box height (lines) for text wrapping
const INPUT_HEIGHT: u16 = 5;

/// Capacity of the stream event channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Surface settings fixed at startup
#[derive(Clone, Debug)]
pub struct AppConfig {
    /// Model sent with every request
    pub model: String,
    /// Name whose initials label user turns
    pub user_name: String,
    /// Root for video files; each app writes into its own subdirectory
    pub artifact_dir: PathBuf,
}

/// Outcome of writing a reply's videos
#[derive(Debug)]
struct ArtifactResult {
    request_id: RequestId,
    result: Result<Vec<VideoArtifact>, ArtifactError>,
}

/// Main application state
pub struct App {
    // === Core State ===
    running: bool,
    config: AppConfig,
    /// This session's video directory under `config.artifact_dir`
    artifact_dir: PathBuf,
    speakers: Speakers,
    transcript: Transcript,

    // === Relay ===
    client: RelayClient,
    stream: Option<StreamHandle>,
    events_tx: mpsc::Sender<ClientEvent>,
    events_rx: mpsc::Receiver<ClientEvent>,
    artifacts_tx: mpsc::UnboundedSender<ArtifactResult>,
    artifacts_rx: mpsc::UnboundedReceiver<ArtifactResult>,

    // === Input State ===
    starters: Vec<&'static str>,
    input_buffer: String,
    /// Scroll offset (lines from bottom, 0 = latest)
    scroll_offset: usize,

    /// Terminal size
    size: (u16, u16),
}

impl App {
    /// Create an app for an 80x24 terminal; [`App::run`] picks up the real size
    pub fn new(config: AppConfig, client: RelayClient) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (artifacts_tx, artifacts_rx) = mpsc::unbounded_channel();
        let size = (80, 24);

        Self {
            running: true,
            artifact_dir: session_artifact_dir(&config.artifact_dir),
            speakers: Speakers::new(initials(&config.user_name)),
            config,
            transcript: Transcript::new(),
            client,
            stream: None,
            events_tx,
            events_rx,
            artifacts_tx,
            artifacts_rx,
            starters: pick_starters(&mut rand::thread_rng(), starter_count(size.0)),
            input_buffer: String::new(),
            scroll_offset: 0,
            size,
        }
    }

    /// Main event loop
    pub async fn run<B: Backend>(&mut self, terminal: &mut Terminal<B>) -> anyhow::Result<()> {
        let mut event_stream = EventStream::new();

        let area = terminal.size()?;
        self.handle_resize(area.width, area.height);
        self.render(terminal)?;

        while self.running {
            tokio::select! {
                biased;

                // Terminal input first so Esc is never starved by a fast stream
                maybe_event = event_stream.next() => match maybe_event {
                    Some(Ok(event)) => self.handle_terminal_event(event),
                    Some(Err(e)) => return Err(e.into()),
                    None => self.running = false,
                },

                Some(event) = self.events_rx.recv() => self.handle_client_event(event),

                Some(done) = self.artifacts_rx.recv() => self.handle_artifacts(done),
            }

            self.render(terminal)?;
        }

        if let Some(stream) = self.stream.take() {
            stream.stop();
        }
        Ok(())
    }

    /// Wait for the next stream event or artifact result and apply it
    pub async fn process_next(&mut self) {
        tokio::select! {
            Some(event) = self.events_rx.recv() => self.handle_client_event(event),
            Some(done) = self.artifacts_rx.recv() => self.handle_artifacts(done),
        }
    }

    /// Conversation state
    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// Starters offered while the transcript is empty
    pub fn starters(&self) -> &[&'static str] {
        &self.starters
    }

    /// Current contents of the input box
    pub fn input(&self) -> &str {
        &self.input_buffer
    }

    /// Whether the loop should keep going
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Where this session writes its videos
    pub fn artifact_dir(&self) -> &Path {
        &self.artifact_dir
    }

    /// Submit a user message, stopping any reply still streaming
    pub fn submit(&mut self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }

        if let Some(previous) = self.stream.take() {
            previous.stop();
        }

        let request_id = self.transcript.submit(text);
        let request = ChatRequest::new(self.config.model.clone(), self.transcript.history());
        tracing::info!(
            request = %request_id,
            model = %self.config.model,
            messages = request.messages.len(),
            "Submitting chat request"
        );

        self.stream = Some(
            self.client
                .spawn_chat(request_id, request, self.events_tx.clone()),
        );
        self.scroll_offset = 0;
    }

    /// Stop the reply that is streaming, if any
    pub fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            stream.stop();
        }
        self.transcript.stop();
    }

    fn handle_terminal_event(&mut self, event: Event) {
        match event {
            // Only handle Press events (not Release or Repeat)
            Event::Key(key) if key.kind == KeyEventKind::Press => self.handle_key(key),
            Event::Resize(w, h) => self.handle_resize(w, h),
            _ => {}
        }
    }

    /// Handle keyboard input
    pub fn handle_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                self.running = false;
            }
            KeyCode::Esc => {
                if self.transcript.is_streaming() {
                    self.stop();
                } else {
                    self.running = false;
                }
            }
            KeyCode::Enter => {
                let input = std::mem::take(&mut self.input_buffer);
                self.submit(&input);
            }
            KeyCode::Char(c) => match self.starter_shortcut(c) {
                Some(question) => self.submit(question),
                None => self.input_buffer.push(c),
            },
            KeyCode::Backspace => {
                self.input_buffer.pop();
            }
            KeyCode::PageUp => {
                self.scroll_offset = self.scroll_offset.saturating_add(self.page_size());
            }
            KeyCode::PageDown => {
                self.scroll_offset = self.scroll_offset.saturating_sub(self.page_size());
            }
            _ => {}
        }
    }

    /// Starter picked by a digit key on an empty transcript
    fn starter_shortcut(&self, c: char) -> Option<&'static str> {
        if !self.transcript.is_empty() || !self.input_buffer.is_empty() {
            return None;
        }
        let n = c.to_digit(10)? as usize;
        self.starters.get(n.checked_sub(1)?).copied()
    }

    fn handle_resize(&mut self, width: u16, height: u16) {
        if starter_count(width) != starter_count(self.size.0) {
            self.starters = pick_starters(&mut rand::thread_rng(), starter_count(width));
        }
        self.size = (width, height);
    }

    fn handle_client_event(&mut self, event: ClientEvent) {
        let ClientEvent { request_id, event } = event;
        let terminal = matches!(event, StreamEvent::Closed | StreamEvent::Error(_));

        match self.transcript.apply(request_id, event) {
            ApplyOutcome::Ignored | ApplyOutcome::Updated => {}
            ApplyOutcome::ArtifactsPending(pending) => self.spawn_materialize(pending),
        }

        if terminal
            && self
                .stream
                .as_ref()
                .is_some_and(|s| s.request_id() == request_id)
        {
            self.stream = None;
        }
    }

    fn spawn_materialize(&self, pending: PendingArtifacts) {
        let dir = self.artifact_dir.clone();
        let tx = self.artifacts_tx.clone();

        tracing::debug!(
            request = %pending.request_id,
            videos = pending.payloads.len(),
            "Writing video artifacts"
        );
        tokio::spawn(async move {
            let result = materialize_videos(&dir, pending.message_index, &pending.payloads).await;
            let _ = tx.send(ArtifactResult {
                request_id: pending.request_id,
                result,
            });
        });
    }

    fn handle_artifacts(&mut self, done: ArtifactResult) {
        if !self.transcript.attach_artifacts(done.request_id, done.result) {
            tracing::debug!(request = %done.request_id, "No reply waiting on artifacts");
        }
    }

    fn conversation_height(&self) -> usize {
        usize::from(self.size.1.saturating_sub(INPUT_HEIGHT + 1))
    }

    fn page_size(&self) -> usize {
        self.conversation_height().saturating_sub(2).max(1)
    }

    /// Status bar text
    pub fn status_text(&self) -> String {
        let state = match (self.transcript.phase(), self.transcript.artifact_phase()) {
            (RequestPhase::Idle, _) => "Ready",
            (RequestPhase::Submitted, _) => "Waiting for reply",
            (RequestPhase::Streaming, _) => "Streaming",
            (RequestPhase::Finished, ArtifactPhase::Fetching) => "Saving video",
            (RequestPhase::Finished, ArtifactPhase::Failed) => "Video failed",
            (RequestPhase::Finished, _) => "Done",
            (RequestPhase::Errored, _) => "Stopped",
        };

        let scroll_info = if self.scroll_offset > 0 {
            format!(" [^{} lines]", self.scroll_offset)
        } else {
            String::new()
        };

        format!(
            " {} | {} | Enter send | Esc {} | PgUp/PgDn scroll{}",
            self.config.model,
            state,
            if self.transcript.is_streaming() { "stop" } else { "quit" },
            scroll_info
        )
    }

    fn conversation_lines(&self) -> Vec<Line> {
        let width = usize::from(self.size.0.saturating_sub(2));
        if self.transcript.is_empty() {
            starter_lines(&self.starters, width)
        } else {
            transcript_lines(&self.transcript, &self.speakers, width)
        }
    }

    /// Render the UI
    fn render<B: Backend>(&mut self, terminal: &mut Terminal<B>) -> anyhow::Result<()> {
        let lines = self.conversation_lines();

        let max_scroll = lines.len().saturating_sub(self.conversation_height());
        self.scroll_offset = self.scroll_offset.min(max_scroll);

        let status = self.status_text();
        let scroll_offset = self.scroll_offset;
        let input = &self.input_buffer;

        terminal.draw(|frame| {
            let [conversation, input_area, status_area] = Layout::vertical([
                Constraint::Min(3),
                Constraint::Length(INPUT_HEIGHT),
                Constraint::Length(1),
            ])
            .areas(frame.area());

            let buf = frame.buffer_mut();
            draw_conversation(buf, conversation, &lines, scroll_offset);
            draw_input(buf, input_area, input);
            buf.set_string(
                status_area.x,
                status_area.y,
                &status,
                Style::default().fg(DIM_GRAY),
            );
        })?;

        Ok(())
    }
}

fn draw_conversation(buf: &mut Buffer, area: Rect, lines: &[Line], scroll_offset: usize) {
    let height = usize::from(area.height);
    let visible_end = lines.len().saturating_sub(scroll_offset);
    let visible_start = visible_end.saturating_sub(height);

    let has_content_above = visible_start > 0;
    let has_content_below = scroll_offset > 0;

    for (i, (line, style)) in lines[visible_start..visible_end].iter().enumerate() {
        // Fade the two edge lines when more content is off screen
        let final_style = if has_content_above && i < 2 {
            Style::default().fg(if i == 0 { FADE_DARK } else { FADE_LIGHT })
        } else if has_content_below && i >= height.saturating_sub(2) {
            let from_bottom = height.saturating_sub(1).saturating_sub(i);
            Style::default().fg(if from_bottom == 0 { FADE_DARK } else { FADE_LIGHT })
        } else {
            *style
        };

        let Ok(row) = u16::try_from(i) else { break };
        let display_line = fit_width(line, usize::from(area.width.saturating_sub(1)));
        buf.set_string(area.x + 1, area.y + row, &display_line, final_style);
    }
}

/// Longest prefix of `line` that fits in `width` terminal columns
fn fit_width(line: &str, width: usize) -> String {
    let mut used = 0;
    line.chars()
        .take_while(|c| {
            used += c.width().unwrap_or(0);
            used <= width
        })
        .collect()
}

fn draw_input(buf: &mut Buffer, area: Rect, input: &str) {
    let separator = "-".repeat(usize::from(area.width));
    buf.set_string(area.x, area.y, &separator, Style::default().fg(DIM_GRAY));

    let text_height = usize::from(area.height.saturating_sub(1));
    let text_width = usize::from(area.width.saturating_sub(1));
    if text_width < 5 || text_height < 1 {
        return;
    }

    let full_input = format!("> {input}_");
    let wrapped: Vec<String> = textwrap::wrap(&full_input, text_width)
        .into_iter()
        .map(|s| s.into_owned())
        .collect();
    let skip = wrapped.len().saturating_sub(text_height);

    for (row, line) in (1..area.height).zip(wrapped.iter().skip(skip)) {
        buf.set_string(area.x, area.y + row, line, Style::default().fg(USER_GREEN));
    }
}
