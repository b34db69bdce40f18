//! Code Fence Segmentation
//!
//! Assistant replies are split on triple-backtick fences into alternating
//! prose and code segments so the renderer can style them differently.
//!
//! Splitting never drops or rewrites text: joining the segment texts with
//! [`FENCE`] gives back the original string. An unterminated fence (odd
//! number of delimiters) leaves the tail as prose instead of swallowing the
//! rest of the reply into a code block.

/// Fence delimiter
pub const FENCE: &str = "```";

/// What a segment holds
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SegmentKind {
    /// Ordinary text
    Prose,
    /// Text between a pair of fences
    Code,
}

/// A run of prose or code
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Segment {
    /// Prose or code
    pub kind: SegmentKind,
    /// Raw text between delimiters, info string included for code
    pub text: String,
}

impl Segment {
    /// Create a prose segment
    pub fn prose(text: impl Into<String>) -> Self {
        Self {
            kind: SegmentKind::Prose,
            text: text.into(),
        }
    }

    /// Create a code segment
    pub fn code(text: impl Into<String>) -> Self {
        Self {
            kind: SegmentKind::Code,
            text: text.into(),
        }
    }

    /// Whether this is a code segment
    pub fn is_code(&self) -> bool {
        self.kind == SegmentKind::Code
    }

    /// Language hint from the fence info string (`rust` in "```rust")
    pub fn language(&self) -> Option<&str> {
        if !self.is_code() {
            return None;
        }
        let (first, _) = self.text.split_once('\n')?;
        let info = first.trim();
        if info.is_empty() || info.contains(char::is_whitespace) {
            None
        } else {
            Some(info)
        }
    }

    /// Display text: code without its info line, prose unchanged
    pub fn body(&self) -> &str {
        if !self.is_code() {
            return &self.text;
        }
        match self.text.split_once('\n') {
            Some((first, rest)) if !first.trim().contains(char::is_whitespace) => rest,
            _ => &self.text,
        }
    }
}

/// Split content on fences into alternating prose/code segments
pub fn split_fences(content: &str) -> Vec<Segment> {
    let parts: Vec<&str> = content.split(FENCE).collect();
    let count = parts.len();

    parts
        .into_iter()
        .enumerate()
        .map(|(i, text)| {
            // Odd positions sit between fences; the last one is unterminated
            // when the fence count is odd
            if i % 2 == 1 && i + 1 < count {
                Segment::code(text)
            } else {
                Segment::prose(text)
            }
        })
        .collect()
}

/// Rejoin segments with the fence delimiter
pub fn join_segments(segments: &[Segment]) -> String {
    segments
        .iter()
        .map(|s| s.text.as_str())
        .collect::<Vec<_>>()
        .join(FENCE)
}
