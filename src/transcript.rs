//! Transcript presentation helpers
//!
//! The presenter is stateless: every transcript update regenerates the
//! full word list and reveal schedule. Words that were already visible
//! restart their reveal when new text arrives.

use std::time::Duration;

/// Delay between consecutive word reveals.
pub const WORD_REVEAL_STEP: Duration = Duration::from_millis(50);

/// A word together with the delay before it becomes visible.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WordReveal {
    pub word: String,
    pub delay: Duration,
}

/// Split transcript text into word tokens on whitespace.
pub fn split_words(text: &str) -> Vec<String> {
    text.split_whitespace().map(str::to_string).collect()
}

/// Build the reveal schedule for a transcript: each word's delay is
/// proportional to its index, at a fixed step.
pub fn reveal_schedule(text: &str) -> Vec<WordReveal> {
    split_words(text)
        .into_iter()
        .enumerate()
        .map(|(index, word)| WordReveal {
            word,
            delay: WORD_REVEAL_STEP * index as u32,
        })
        .collect()
}
