//! Causal ordering of user and AI transcript streams
//!
//! User transcription and AI output arrive on independent streams and can
//! race: the provider may finish an AI turn while the user's utterance is
//! still interim. The merger keeps the log causal:
//!
//! - A user-final entry is appended as soon as it arrives.
//! - An utterance opens on its first interim fragment or on detected speech,
//!   whichever comes first.
//! - An AI turn that completes while a user utterance is open is held as the
//!   pending response (at most one) and flushed right after the user-final.
//! - Interim text never enters the log.
//! - `interrupt()` discards the pending response and the turn in progress;
//!   fragments still in flight for that turn are dropped until its turn end.

use chrono::{DateTime, Utc};

use super::aggregator::TranscriptAggregator;
use super::{Role, TranscriptEntry, TranscriptEvent};

/// Errors raised while merging
#[derive(Debug, Clone, PartialEq)]
pub enum MergeError {
    /// A second AI turn completed while one was already held back
    PendingResponseOverflow { dropped: String },
}

impl std::fmt::Display for MergeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MergeError::PendingResponseOverflow { dropped } => write!(
                f,
                "AI response already pending; dropped second response ({} chars)",
                dropped.chars().count()
            ),
        }
    }
}

impl std::error::Error for MergeError {}

/// Ordered, append-only conversation log
#[derive(Debug, Clone)]
pub struct TranscriptMerger {
    entries: Vec<TranscriptEntry>,
    user: TranscriptAggregator,
    assistant: TranscriptAggregator,
    utterance_open: bool,
    response_open: bool,
    discarding: bool,
    pending: Option<TranscriptEntry>,
}

impl Default for TranscriptMerger {
    fn default() -> Self {
        Self::new()
    }
}

impl TranscriptMerger {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            user: TranscriptAggregator::new(Role::User),
            assistant: TranscriptAggregator::new(Role::Assistant),
            utterance_open: false,
            response_open: false,
            discarding: false,
            pending: None,
        }
    }

    /// Feed one transcript event. Returns the entries appended to the log.
    pub fn apply(&mut self, event: TranscriptEvent) -> Vec<TranscriptEntry> {
        match (event.role, event.is_final) {
            (Role::User, false) => {
                self.user.push_fragment(&event.text);
                self.utterance_open = true;
                Vec::new()
            }
            (Role::User, true) => self.finish_utterance(&event.text, event.received_at),
            (Role::Assistant, is_final) => {
                if self.discarding {
                    log::debug!("TranscriptMerger: dropping fragment of interrupted response");
                    return Vec::new();
                }
                if is_final {
                    self.assistant.finish(&event.text);
                } else {
                    self.assistant.push_fragment(&event.text);
                }
                self.response_open = true;
                Vec::new()
            }
        }
    }

    /// End the current AI turn (`turnComplete`).
    ///
    /// Returns the appended entry, nothing if the turn is held back or empty,
    /// or `PendingResponseOverflow` if a response is already held back.
    pub fn complete_turn(
        &mut self,
        at: DateTime<Utc>,
    ) -> Result<Vec<TranscriptEntry>, MergeError> {
        let was_discarding = self.discarding;
        self.discarding = false;
        self.response_open = false;

        let text = self.assistant.take();
        if was_discarding || text.is_empty() {
            return Ok(Vec::new());
        }

        if !self.utterance_open {
            return Ok(vec![self.append(Role::Assistant, text, at)]);
        }

        if self.pending.is_some() {
            log::error!(
                "TranscriptMerger: second AI response completed while one is pending; dropping it"
            );
            return Err(MergeError::PendingResponseOverflow { dropped: text });
        }

        log::debug!("TranscriptMerger: holding AI response until user utterance is final");
        self.pending = Some(TranscriptEntry {
            role: Role::Assistant,
            content: text,
            timestamp: at,
        });
        Ok(Vec::new())
    }

    /// Voice activity on the user's side opened an utterance before any of
    /// its transcription arrived. The next AI turn waits for its user-final.
    pub fn open_utterance(&mut self) {
        self.utterance_open = true;
    }

    /// Mark that an AI response is being generated (audio arrived, greeting sent)
    pub fn note_response_activity(&mut self) {
        if !self.discarding {
            self.response_open = true;
        }
    }

    /// Discard the pending response and the AI turn in progress.
    /// Returns true if anything was discarded.
    pub fn interrupt(&mut self) -> bool {
        let dropped_pending = self.pending.take().is_some();
        let turn_in_progress = self.response_open || self.assistant.has_text();
        self.assistant.reset();
        if turn_in_progress {
            self.discarding = true;
            self.response_open = false;
        }
        dropped_pending || turn_in_progress
    }

    /// The provider cut the AI turn itself; no trailing fragments follow.
    pub fn truncate_response(&mut self) -> bool {
        let dropped_pending = self.pending.take().is_some();
        let turn_in_progress = self.response_open || self.assistant.has_text();
        self.assistant.reset();
        self.response_open = false;
        self.discarding = false;
        dropped_pending || turn_in_progress
    }

    /// Live text of the open utterance or AI turn
    pub fn interim_text(&self, role: Role) -> &str {
        match role {
            Role::User => self.user.current_text(),
            Role::Assistant => self.assistant.current_text(),
        }
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Trailing output of an interrupted response is being dropped
    pub fn is_discarding(&self) -> bool {
        self.discarding
    }

    pub fn response_in_progress(&self) -> bool {
        self.response_open || self.assistant.has_text()
    }

    /// Start over for a new session
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    fn finish_utterance(&mut self, text: &str, at: DateTime<Utc>) -> Vec<TranscriptEntry> {
        self.user.finish(text);
        let content = self.user.take();
        self.utterance_open = false;

        let mut appended = Vec::new();
        if !content.is_empty() {
            appended.push(self.append(Role::User, content, at));
        }
        if let Some(pending) = self.pending.take() {
            appended.push(self.append(pending.role, pending.content, pending.timestamp));
        }
        appended
    }

    fn append(&mut self, role: Role, content: String, at: DateTime<Utc>) -> TranscriptEntry {
        let timestamp = match self.entries.last() {
            Some(last) if last.timestamp > at => last.timestamp,
            _ => at,
        };
        let entry = TranscriptEntry {
            role,
            content,
            timestamp,
        };
        self.entries.push(entry.clone());
        entry
    }
}
