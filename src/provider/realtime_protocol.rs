//! Realtime event protocol (data channel)
//!
//! JSON events exchanged over the peer connection's data channel.
//!
//! # Protocol Overview
//!
//! 1. SDP offer/answer over HTTP establishes the peer connection
//! 2. Data channel opens; receive `session.created`
//! 3. Send `session.update` (voice, instructions, transcription, server VAD)
//! 4. Receive `session.updated` (setup acknowledgement)
//! 5. Audio flows on media tracks; transcripts arrive as events

use serde::{Deserialize, Serialize};

/// Model used for transcribing the user's audio
pub const INPUT_TRANSCRIPTION_MODEL: &str = "whisper-1";

/// Error code for `response.cancel` with nothing to cancel
pub const CANCEL_NOT_ACTIVE: &str = "response_cancel_not_active";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionConfig {
    pub model: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnDetection {
    #[serde(rename = "type")]
    pub detection_type: String,
}

/// Session configuration sent after `session.created`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub modalities: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    pub voice: String,
    pub input_audio_transcription: Option<TranscriptionConfig>,
    pub turn_detection: Option<TurnDetection>,
}

impl SessionConfig {
    pub fn new(voice: &str, instructions: &str) -> Self {
        Self {
            modalities: vec!["audio".to_string(), "text".to_string()],
            instructions: if instructions.trim().is_empty() {
                None
            } else {
                Some(instructions.to_string())
            },
            voice: voice.to_string(),
            input_audio_transcription: Some(TranscriptionConfig {
                model: INPUT_TRANSCRIPTION_MODEL.to_string(),
            }),
            turn_detection: Some(TurnDetection {
                detection_type: "server_vad".to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentPart {
    #[serde(rename = "type")]
    pub part_type: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationItem {
    #[serde(rename = "type")]
    pub item_type: String,
    pub role: String,
    pub content: Vec<ContentPart>,
}

/// Session information returned by the API
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SessionInfo {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub voice: String,
}

/// Error information from the API
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ErrorInfo {
    #[serde(rename = "type", default)]
    pub error_type: String,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: String,
}

impl ErrorInfo {
    /// Errors that do not end the session
    pub fn is_recoverable(&self) -> bool {
        self.code.as_deref() == Some(CANCEL_NOT_ACTIVE)
    }
}

// ============================================================================
// Client Events (sent TO the provider)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionConfig },

    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate { item: ConversationItem },

    #[serde(rename = "response.create")]
    ResponseCreate,

    #[serde(rename = "response.cancel")]
    ResponseCancel,
}

impl ClientEvent {
    pub fn session_update(voice: &str, instructions: &str) -> Self {
        Self::SessionUpdate {
            session: SessionConfig::new(voice, instructions),
        }
    }

    /// A user text message; follow with `ResponseCreate` to get a reply
    pub fn user_text(text: &str) -> Self {
        Self::ConversationItemCreate {
            item: ConversationItem {
                item_type: "message".to_string(),
                role: "user".to_string(),
                content: vec![ContentPart {
                    part_type: "input_text".to_string(),
                    text: text.to_string(),
                }],
            },
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// ============================================================================
// Server Events (received FROM the provider)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "session.created")]
    SessionCreated { session: SessionInfo },

    #[serde(rename = "session.updated")]
    SessionUpdated { session: SessionInfo },

    #[serde(rename = "error")]
    Error { error: ErrorInfo },

    /// Partial transcription of the user's audio
    #[serde(rename = "conversation.item.input_audio_transcription.delta")]
    InputTranscriptDelta {
        #[serde(default)]
        delta: String,
    },

    /// Final transcription of the user's audio
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    InputTranscriptCompleted {
        #[serde(default)]
        transcript: String,
    },

    /// Transcription of the user's audio gave up; no `completed` follows
    #[serde(rename = "conversation.item.input_audio_transcription.failed")]
    InputTranscriptFailed {
        #[serde(default)]
        error: Option<ErrorInfo>,
    },

    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted {
        #[serde(default)]
        audio_start_ms: Option<u64>,
    },

    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped {
        #[serde(default)]
        audio_end_ms: Option<u64>,
    },

    #[serde(rename = "response.audio_transcript.delta")]
    AudioTranscriptDelta {
        #[serde(default)]
        delta: String,
    },

    #[serde(rename = "response.audio_transcript.done")]
    AudioTranscriptDone {
        #[serde(default)]
        transcript: String,
    },

    #[serde(rename = "response.text.delta")]
    TextDelta {
        #[serde(default)]
        delta: String,
    },

    #[serde(rename = "response.text.done")]
    TextDone {
        #[serde(default)]
        text: String,
    },

    /// The response finished (completed, cancelled or failed)
    #[serde(rename = "response.done")]
    ResponseDone {
        #[serde(default)]
        response: Option<serde_json::Value>,
    },

    /// Catch-all for event types we don't handle
    #[serde(other)]
    Unknown,
}

impl ServerEvent {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_update_serialization() {
        let json = ClientEvent::session_update("alloy", "Be brief.")
            .to_json()
            .unwrap();
        assert!(json.contains("\"type\":\"session.update\""));
        assert!(json.contains("\"voice\":\"alloy\""));
        assert!(json.contains("\"instructions\":\"Be brief.\""));
        assert!(json.contains("\"model\":\"whisper-1\""));
        assert!(json.contains("\"type\":\"server_vad\""));
    }

    #[test]
    fn test_greeting_events() {
        let json = ClientEvent::user_text("hello").to_json().unwrap();
        assert!(json.contains("\"type\":\"conversation.item.create\""));
        assert!(json.contains("\"type\":\"input_text\""));
        assert!(json.contains("\"role\":\"user\""));

        assert_eq!(
            ClientEvent::ResponseCreate.to_json().unwrap(),
            r#"{"type":"response.create"}"#
        );
        assert_eq!(
            ClientEvent::ResponseCancel.to_json().unwrap(),
            r#"{"type":"response.cancel"}"#
        );
    }

    #[test]
    fn test_session_created_deserialization() {
        let json = r#"{"type":"session.created","session":{"id":"sess_1","model":"m"}}"#;
        match ServerEvent::parse(json).unwrap() {
            ServerEvent::SessionCreated { session } => assert_eq!(session.id, "sess_1"),
            other => panic!("Expected SessionCreated, got {:?}", other),
        }
    }

    #[test]
    fn test_transcript_events_deserialization() {
        let delta = ServerEvent::parse(
            r#"{"type":"conversation.item.input_audio_transcription.delta","item_id":"i","delta":"hel"}"#,
        )
        .unwrap();
        assert_eq!(
            delta,
            ServerEvent::InputTranscriptDelta {
                delta: "hel".to_string()
            }
        );

        let done = ServerEvent::parse(
            r#"{"type":"response.audio_transcript.done","transcript":"Hi there"}"#,
        )
        .unwrap();
        assert_eq!(
            done,
            ServerEvent::AudioTranscriptDone {
                transcript: "Hi there".to_string()
            }
        );

        let response_done =
            ServerEvent::parse(r#"{"type":"response.done","response":{"status":"completed"}}"#)
                .unwrap();
        assert!(matches!(response_done, ServerEvent::ResponseDone { .. }));
    }

    #[test]
    fn test_recoverable_error() {
        let json = r#"{"type":"error","error":{"type":"invalid_request_error","code":"response_cancel_not_active","message":"no response"}}"#;
        match ServerEvent::parse(json).unwrap() {
            ServerEvent::Error { error } => assert!(error.is_recoverable()),
            other => panic!("Expected Error, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_event_type() {
        let json = r#"{"type":"rate_limits.updated","rate_limits":[]}"#;
        assert_eq!(ServerEvent::parse(json).unwrap(), ServerEvent::Unknown);
    }
}
