//! Per-turn text accumulation
//!
//! Providers stream a turn as fragments and may finish it with an
//! authoritative full text.
//!
//! - **Fragments**: appended as they arrive
//! - **Final**: replaces the accumulated text when non-empty

use super::Role;

/// Accumulates one utterance or one AI turn
#[derive(Debug, Clone)]
pub struct TranscriptAggregator {
    role: Role,
    partial_text: String,
    final_text: Option<String>,
    fragment_count: u64,
}

impl TranscriptAggregator {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            partial_text: String::new(),
            final_text: None,
            fragment_count: 0,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Append an interim fragment and return the accumulated text
    pub fn push_fragment(&mut self, fragment: &str) -> &str {
        if !fragment.is_empty() {
            self.partial_text.push_str(fragment);
            self.fragment_count += 1;

            if self.fragment_count % 10 == 0 {
                log::debug!(
                    "TranscriptAggregator[{}]: {} fragments, {} chars accumulated",
                    self.role.as_str(),
                    self.fragment_count,
                    self.partial_text.len()
                );
            }
        }
        &self.partial_text
    }

    /// Record the provider's final text. Empty finals keep the fragments.
    pub fn finish(&mut self, text: &str) {
        if !text.trim().is_empty() {
            self.final_text = Some(text.to_string());
        }
    }

    /// Final text if available, otherwise the accumulated fragments
    pub fn current_text(&self) -> &str {
        self.final_text.as_deref().unwrap_or(&self.partial_text)
    }

    pub fn has_text(&self) -> bool {
        !self.current_text().trim().is_empty()
    }

    pub fn fragment_count(&self) -> u64 {
        self.fragment_count
    }

    /// Take the current text (trimmed) and start over
    pub fn take(&mut self) -> String {
        let text = self.current_text().trim().to_string();
        self.reset();
        text
    }

    pub fn reset(&mut self) {
        self.partial_text.clear();
        self.final_text = None;
        self.fragment_count = 0;
    }
}
