//! Reasoning Formatter
//!
//! Backends may interleave "reasoning" tokens (the model thinking out loud)
//! with answer tokens. The formatter turns both into plain text chunks for the
//! assistant message: reasoning is rendered as a Markdown blockquote under a
//! banner, and a horizontal rule separates it from the answer.
//!
//! One formatter lives for exactly one chat stream.

/// Emitted before the first reasoning token of a turn
pub const REASONING_BANNER: &str = "> **Thinking...**\n\n> ";

/// Emitted before the first answer token that follows reasoning
pub const REASONING_SEPARATOR: &str = "\n\n---\n\n";

/// Emitted when reasoning resumes after answer text (banner already shown)
pub const REASONING_RESUME: &str = "\n\n> ";

/// Per-stream reasoning/answer interleaving state
#[derive(Debug, Default)]
pub struct ReasoningFormatter {
    banner_sent: bool,
    in_reasoning: bool,
}

impl ReasoningFormatter {
    /// Create a formatter for a fresh stream
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the last emitted text was reasoning
    #[must_use]
    pub fn in_reasoning(&self) -> bool {
        self.in_reasoning
    }

    /// Format a reasoning token
    ///
    /// Newlines are continued as blockquote lines.
    pub fn reasoning(&mut self, token: &str) -> Vec<String> {
        if token.is_empty() {
            return Vec::new();
        }

        let mut chunks = Vec::with_capacity(2);
        if !self.in_reasoning {
            let prefix = if self.banner_sent {
                REASONING_RESUME
            } else {
                REASONING_BANNER
            };
            chunks.push(prefix.to_string());
            self.banner_sent = true;
            self.in_reasoning = true;
        }
        chunks.push(token.replace('\n', "\n> "));
        chunks
    }

    /// Format an answer token
    pub fn answer(&mut self, token: &str) -> Vec<String> {
        if token.is_empty() {
            return Vec::new();
        }

        let mut chunks = Vec::with_capacity(2);
        if self.in_reasoning {
            chunks.push(REASONING_SEPARATOR.to_string());
            self.in_reasoning = false;
        }
        chunks.push(token.to_string());
        chunks
    }
}
