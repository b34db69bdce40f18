//! Transcript Rendering
//!
//! Turns the [`Transcript`] into styled, wrapped lines. The app decides which
//! slice of lines fits on screen; this module only decides what the lines
//! say and how they look.
//!
//! # Layout of a turn
//!
//! ```text
//! JA                         <- user initials
//! what is 2+2?
//!
//! vidchat                    <- assistant label
//! It is 4. In Rust:
//!   [rust]
//!   let x = 2 + 2;
//! ...                        <- typing indicator
//! video: /cache/vidchat/videos/session-3f2a.../video-1-0.webm (1.2 MB)
//! ```

use ratatui::style::{Modifier, Style};
use vidchat_core::MessageRole;

use crate::segments::split_fences;
use crate::theme::{ASSISTANT_MAGENTA, ATTACHMENT_BLUE, CODE_CYAN, DIM_GRAY, ERROR_RED, USER_GREEN};
use crate::transcript::{Transcript, TranscriptEntry};

/// A rendered line and its style
pub type Line = (String, Style);

/// Shown while a reply streams or its videos are written
pub const TYPING_INDICATOR: &str = "...";

/// Label on assistant turns
pub const ASSISTANT_LABEL: &str = "vidchat";

const CODE_INDENT: &str = "  ";

/// Who is talking, for turn headers
#[derive(Clone, Debug)]
pub struct Speakers {
    /// Shown above user turns
    pub user_initials: String,
    /// Shown above assistant turns
    pub assistant_label: String,
}

impl Speakers {
    /// Speakers with the default assistant label
    pub fn new(user_initials: impl Into<String>) -> Self {
        Self {
            user_initials: user_initials.into(),
            assistant_label: ASSISTANT_LABEL.to_string(),
        }
    }
}

/// Render every turn of the transcript, wrapped to `width` columns
pub fn transcript_lines(transcript: &Transcript, speakers: &Speakers, width: usize) -> Vec<Line> {
    let width = width.max(1);
    let mut lines = Vec::new();

    for (index, entry) in transcript.entries().iter().enumerate() {
        let fetching = transcript.is_fetching_for(index);
        render_entry(&mut lines, entry, speakers, fetching, width);
        lines.push((String::new(), Style::default()));
    }

    lines
}

fn render_entry(
    lines: &mut Vec<Line>,
    entry: &TranscriptEntry,
    speakers: &Speakers,
    fetching: bool,
    width: usize,
) {
    let (header, style) = match entry.role {
        MessageRole::User => (speakers.user_initials.as_str(), Style::default().fg(USER_GREEN)),
        _ => (
            speakers.assistant_label.as_str(),
            Style::default().fg(ASSISTANT_MAGENTA),
        ),
    };
    lines.push((header.to_string(), style.add_modifier(Modifier::BOLD)));

    if entry.role == MessageRole::User {
        push_wrapped(lines, &entry.content, width, Style::default());
    } else {
        render_segments(lines, &entry.content, width);
    }

    if entry.streaming || fetching {
        lines.push((TYPING_INDICATOR.to_string(), Style::default().fg(DIM_GRAY)));
    }
    if entry.stopped {
        lines.push(("[stopped]".to_string(), Style::default().fg(DIM_GRAY)));
    }
    if let Some(error) = &entry.error {
        push_wrapped(
            lines,
            &format!("error: {error}"),
            width,
            Style::default().fg(ERROR_RED),
        );
    }
    for artifact in &entry.attachments {
        push_wrapped(
            lines,
            &format!("video: {} ({})", artifact.path.display(), artifact.size_label()),
            width,
            Style::default().fg(ATTACHMENT_BLUE),
        );
    }
}

fn render_segments(lines: &mut Vec<Line>, content: &str, width: usize) {
    let code_style = Style::default().fg(CODE_CYAN);
    let code_width = width.saturating_sub(CODE_INDENT.len()).max(1);

    for segment in split_fences(content) {
        if !segment.is_code() {
            let prose = segment.text.trim_matches('\n');
            if !prose.is_empty() {
                push_wrapped(lines, prose, width, Style::default());
            }
            continue;
        }

        if let Some(language) = segment.language() {
            lines.push((
                format!("{CODE_INDENT}[{language}]"),
                Style::default().fg(DIM_GRAY),
            ));
        }
        // Code keeps its own line breaks; only overlong lines wrap
        for raw in segment.body().trim_end_matches('\n').lines() {
            if raw.is_empty() {
                lines.push((CODE_INDENT.to_string(), code_style));
                continue;
            }
            for piece in textwrap::wrap(raw, textwrap::Options::new(code_width).break_words(true)) {
                lines.push((format!("{CODE_INDENT}{piece}"), code_style));
            }
        }
    }
}

fn push_wrapped(lines: &mut Vec<Line>, text: &str, width: usize, style: Style) {
    for paragraph in text.split('\n') {
        if paragraph.is_empty() {
            lines.push((String::new(), style));
            continue;
        }
        for piece in textwrap::wrap(paragraph, width) {
            lines.push((piece.into_owned(), style));
        }
    }
}

/// Numbered starter questions for an empty transcript
pub fn starter_lines(starters: &[&str], width: usize) -> Vec<Line> {
    let width = width.max(1);
    let mut lines = vec![
        (
            "Ask anything, or pick a starter:".to_string(),
            Style::default().fg(ASSISTANT_MAGENTA),
        ),
        (String::new(), Style::default()),
    ];

    for (i, question) in starters.iter().enumerate() {
        let numbered = format!("{}. {question}", i + 1);
        push_wrapped(&mut lines, &numbered, width, Style::default().fg(DIM_GRAY));
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::{VideoArtifact, VIDEO_MIME};
    use crate::transcript::StreamEvent;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;
    use vidchat_core::SideChannelPayload;

    fn texts(lines: &[Line]) -> Vec<&str> {
        lines.iter().map(|(text, _)| text.as_str()).collect()
    }

    fn speakers() -> Speakers {
        Speakers::new("JA")
    }

    #[test]
    fn test_finished_turn_layout() {
        let mut transcript = Transcript::new();
        let id = transcript.submit("Hi");
        transcript.apply(id, StreamEvent::Text("Hello!".to_string()));
        transcript.apply(id, StreamEvent::Closed);

        let lines = transcript_lines(&transcript, &speakers(), 40);
        assert_eq!(texts(&lines), vec!["JA", "Hi", "", "vidchat", "Hello!", ""]);
    }

    #[test]
    fn test_streaming_shows_typing_indicator() {
        let mut transcript = Transcript::new();
        let id = transcript.submit("Hi");
        transcript.apply(id, StreamEvent::Text("Hel".to_string()));

        let lines = transcript_lines(&transcript, &speakers(), 40);
        assert_eq!(texts(&lines)[4..].to_vec(), vec!["Hel", TYPING_INDICATOR, ""]);
    }

    #[test]
    fn test_fetching_shows_typing_indicator() {
        let mut transcript = Transcript::new();
        let id = transcript.submit("Hi");
        transcript.apply(id, StreamEvent::Text("ok".to_string()));
        transcript.apply(
            id,
            StreamEvent::Data(vec![SideChannelPayload::from_video_bytes(b"v")]),
        );
        transcript.apply(id, StreamEvent::Closed);

        let lines = transcript_lines(&transcript, &speakers(), 40);
        assert!(texts(&lines).contains(&TYPING_INDICATOR));

        transcript.attach_artifacts(
            id,
            Ok(vec![VideoArtifact {
                path: PathBuf::from("/tmp/video-1-0.webm"),
                size: 2048,
                mime: VIDEO_MIME,
            }]),
        );
        let lines = transcript_lines(&transcript, &speakers(), 80);
        let texts = texts(&lines);
        assert!(!texts.contains(&TYPING_INDICATOR));
        assert!(texts.contains(&"video: /tmp/video-1-0.webm (2.0 KB)"));
    }

    #[test]
    fn test_code_block_rendering() {
        let mut lines = Vec::new();
        render_segments(&mut lines, "Try:\n```rust\nlet x = 1;\n\nx\n```\nDone.", 40);

        assert_eq!(
            texts(&lines),
            vec!["Try:", "  [rust]", "  let x = 1;", "  ", "  x", "Done."]
        );
        assert_eq!(lines[2].1, Style::default().fg(CODE_CYAN));
    }

    #[test]
    fn test_unterminated_fence_renders_as_prose() {
        let mut lines = Vec::new();
        render_segments(&mut lines, "Start ```rust\nfn", 40);
        assert!(lines.iter().all(|(_, style)| *style == Style::default()));
    }

    #[test]
    fn test_stopped_and_error_markers() {
        let mut transcript = Transcript::new();
        let first = transcript.submit("one");
        transcript.apply(first, StreamEvent::Text("par".to_string()));
        let second = transcript.submit("two");
        transcript.apply(second, StreamEvent::Error("model crashed".to_string()));

        let lines = transcript_lines(&transcript, &speakers(), 40);
        let texts = texts(&lines);
        assert!(texts.contains(&"[stopped]"));
        assert!(texts.contains(&"error: model crashed"));
    }

    #[test]
    fn test_long_prose_wraps() {
        let mut lines = Vec::new();
        push_wrapped(&mut lines, "aaaa bbbb cccc", 9, Style::default());
        assert_eq!(texts(&lines), vec!["aaaa bbbb", "cccc"]);
    }

    #[test]
    fn test_starter_lines_numbered() {
        let lines = starter_lines(&["Why?", "How?"], 40);
        assert_eq!(texts(&lines)[2..].to_vec(), vec!["1. Why?", "2. How?"]);
    }
}
