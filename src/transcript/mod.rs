//! Transcript events and the ordered conversation log

mod aggregator;
mod merger;

pub use aggregator::TranscriptAggregator;
pub use merger::{MergeError, TranscriptMerger};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who produced a piece of the conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// Raw transcript text as delivered by a provider, in wire-arrival order.
///
/// Non-final events carry fragments; a final event carries the provider's
/// full text for the turn (empty means "use the fragments").
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptEvent {
    pub role: Role,
    pub text: String,
    pub is_final: bool,
    pub received_at: DateTime<Utc>,
}

impl TranscriptEvent {
    pub fn interim(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            is_final: false,
            received_at: Utc::now(),
        }
    }

    pub fn final_text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            is_final: true,
            received_at: Utc::now(),
        }
    }
}

/// One merged record in the conversation log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}
