//! Streaming-socket protocol types
//!
//! JSON envelopes exchanged with the live (bidirectional streaming) API.
//!
//! # Protocol Overview
//!
//! 1. Connect to the endpoint with `?key=<api key>`
//! 2. Send `{"setup": {...}}` with model, voice and system instruction
//! 3. Receive `{"setupComplete": {}}`
//! 4. Stream audio via `{"realtimeInput": {"mediaChunks": [...]}}`
//! 5. Receive `serverContent` (model audio/text, transcriptions, `turnComplete`)

use serde::{Deserialize, Serialize};

use crate::audio::pcm::{encode_base64_pcm16, CAPTURE_SAMPLE_RATE};
use crate::audio::AudioFrame;

/// Mime type for outbound audio
pub fn input_mime_type() -> String {
    format!("audio/pcm;rate={}", CAPTURE_SAMPLE_RATE)
}

/// Inline media payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub mime_type: String,
    /// Base64-encoded bytes
    pub data: String,
}

/// One part of a content turn
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<Blob>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    pub speech_config: SpeechConfig,
}

/// Empty object: enables transcription with provider defaults
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AudioTranscriptionConfig {}

/// Session setup sent right after the handshake
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupConfig {
    pub model: String,
    pub generation_config: GenerationConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<AudioTranscriptionConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_audio_transcription: Option<AudioTranscriptionConfig>,
}

impl SetupConfig {
    /// Audio responses in `voice`, with transcription of both directions
    pub fn new(model: &str, voice: &str, instructions: &str) -> Self {
        let system_instruction = if instructions.trim().is_empty() {
            None
        } else {
            Some(Content {
                role: None,
                parts: vec![Part {
                    text: Some(instructions.to_string()),
                    inline_data: None,
                }],
            })
        };

        Self {
            model: model.to_string(),
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO".to_string()],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: voice.to_string(),
                        },
                    },
                },
            },
            system_instruction,
            input_audio_transcription: Some(AudioTranscriptionConfig::default()),
            output_audio_transcription: Some(AudioTranscriptionConfig::default()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<Blob>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientContent {
    pub turns: Vec<Content>,
    pub turn_complete: bool,
}

// ============================================================================
// Client Messages (sent TO the provider)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(SetupConfig),
    RealtimeInput(RealtimeInput),
    ClientContent(ClientContent),
}

impl ClientMessage {
    pub fn setup(model: &str, voice: &str, instructions: &str) -> Self {
        Self::Setup(SetupConfig::new(model, voice, instructions))
    }

    /// Wrap one captured frame as base64 PCM16LE at 16 kHz
    pub fn audio(frame: &AudioFrame) -> Self {
        Self::RealtimeInput(RealtimeInput {
            media_chunks: vec![Blob {
                mime_type: input_mime_type(),
                data: encode_base64_pcm16(&frame.samples),
            }],
        })
    }

    /// A complete user text turn
    pub fn text(text: &str) -> Self {
        Self::ClientContent(ClientContent {
            turns: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part {
                    text: Some(text.to_string()),
                    inline_data: None,
                }],
            }],
            turn_complete: true,
        })
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// ============================================================================
// Server Messages (received FROM the provider)
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transcription {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub finished: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default)]
    pub model_turn: Option<Content>,
    #[serde(default)]
    pub turn_complete: bool,
    #[serde(default)]
    pub interrupted: bool,
    #[serde(default)]
    pub input_transcription: Option<Transcription>,
    #[serde(default)]
    pub output_transcription: Option<Transcription>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ErrorInfo {
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub status: Option<String>,
}

/// Any inbound envelope. Unknown top-level keys are ignored.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    /// `true` or `{}` depending on API revision
    #[serde(default)]
    pub setup_complete: Option<serde_json::Value>,
    #[serde(default)]
    pub server_content: Option<ServerContent>,
    #[serde(default)]
    pub error: Option<ErrorInfo>,
}

impl ServerMessage {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn is_setup_complete(&self) -> bool {
        match &self.setup_complete {
            None | Some(serde_json::Value::Null) | Some(serde_json::Value::Bool(false)) => false,
            Some(_) => true,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.message.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_serialization() {
        let msg = ClientMessage::setup("models/live", "Puck", "Be kind.");
        let json: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();

        let setup = &json["setup"];
        assert_eq!(setup["model"], "models/live");
        assert_eq!(
            setup["generationConfig"]["responseModalities"],
            serde_json::json!(["AUDIO"])
        );
        assert_eq!(
            setup["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]
                ["voiceName"],
            "Puck"
        );
        assert_eq!(setup["systemInstruction"]["parts"][0]["text"], "Be kind.");
        assert_eq!(setup["inputAudioTranscription"], serde_json::json!({}));
    }

    #[test]
    fn test_setup_without_instructions_omits_system_instruction() {
        let json = ClientMessage::setup("m", "v", "  ").to_json().unwrap();
        assert!(!json.contains("systemInstruction"));
    }

    #[test]
    fn test_audio_envelope() {
        let frame = AudioFrame {
            sequence: 0,
            samples: vec![0x1234, 0x5678],
            sample_rate: 16_000,
        };
        let json = ClientMessage::audio(&frame).to_json().unwrap();
        // Little-endian: [0x34, 0x12, 0x78, 0x56]
        assert_eq!(
            json,
            r#"{"realtimeInput":{"mediaChunks":[{"mimeType":"audio/pcm;rate=16000","data":"NBJ4Vg=="}]}}"#
        );
    }

    #[test]
    fn test_text_turn() {
        let json = ClientMessage::text("hi").to_json().unwrap();
        assert_eq!(
            json,
            r#"{"clientContent":{"turns":[{"role":"user","parts":[{"text":"hi"}]}],"turnComplete":true}}"#
        );
    }

    #[test]
    fn test_setup_complete_variants() {
        assert!(ServerMessage::parse(r#"{"setupComplete":true}"#)
            .unwrap()
            .is_setup_complete());
        assert!(ServerMessage::parse(r#"{"setupComplete":{}}"#)
            .unwrap()
            .is_setup_complete());
        assert!(!ServerMessage::parse(r#"{"serverContent":{}}"#)
            .unwrap()
            .is_setup_complete());
    }

    #[test]
    fn test_server_content_deserialization() {
        let json = r#"{
            "serverContent": {
                "modelTurn": {"parts": [
                    {"text": "Hi"},
                    {"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": "AAA="}}
                ]},
                "turnComplete": true,
                "inputTranscription": {"text": "hello", "finished": true}
            }
        }"#;
        let msg = ServerMessage::parse(json).unwrap();
        let content = msg.server_content.unwrap();
        let parts = content.model_turn.unwrap().parts;
        assert_eq!(parts[0].text.as_deref(), Some("Hi"));
        assert_eq!(
            parts[1].inline_data.as_ref().unwrap().mime_type,
            "audio/pcm;rate=24000"
        );
        assert!(content.turn_complete);
        assert!(!content.interrupted);
        assert_eq!(
            content.input_transcription,
            Some(Transcription {
                text: "hello".to_string(),
                finished: true
            })
        );
    }

    #[test]
    fn test_error_deserialization() {
        let msg = ServerMessage::parse(r#"{"error":{"code":403,"message":"API key not valid"}}"#)
            .unwrap();
        assert_eq!(msg.error_message(), Some("API key not valid"));
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let msg = ServerMessage::parse(r#"{"usageMetadata":{"totalTokenCount":5}}"#).unwrap();
        assert_eq!(msg, ServerMessage::default());
    }
}
