//! Starter Questions and Local Identity
//!
//! An empty transcript offers a few random questions to get going; the
//! selection shrinks on narrow terminals. The user's initials label their
//! turns.

use rand::seq::SliceRandom;
use rand::Rng;

/// Questions offered on an empty transcript
pub const STARTER_QUESTIONS: &[&str] = &[
    "What is the difference between a process and a thread?",
    "Explain how HTTP chunked transfer encoding works.",
    "Write a haiku about a rainy Monday.",
    "How do I reverse a linked list in Rust?",
    "What are some good habits for writing commit messages?",
    "Summarize the plot of Hamlet in three sentences.",
    "Why is the sky blue?",
    "Give me a recipe that uses leftover rice.",
    "What is base64 encoding used for?",
    "Suggest a name for a small orange cat.",
];

/// Terminals narrower than this get fewer starters
pub const NARROW_WIDTH: u16 = 80;

/// How many starters fit a terminal of `width` columns
pub fn starter_count(width: u16) -> usize {
    if width < NARROW_WIDTH {
        2
    } else {
        4
    }
}

/// Pick `count` distinct starters at random
pub fn pick_starters<R: Rng + ?Sized>(rng: &mut R, count: usize) -> Vec<&'static str> {
    STARTER_QUESTIONS
        .choose_multiple(rng, count)
        .copied()
        .collect()
}

/// First two characters of a name, uppercased
pub fn initials(name: &str) -> String {
    name.trim()
        .chars()
        .take(2)
        .flat_map(char::to_uppercase)
        .collect()
}
