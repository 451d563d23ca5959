use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::audio::pcm::FRAME_SAMPLES;
use crate::provider::ProviderKind;

pub const GEMINI_LIVE_URL: &str =
    "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";
pub const GEMINI_DEFAULT_MODEL: &str = "models/gemini-2.0-flash-live-001";
pub const GEMINI_DEFAULT_VOICE: &str = "Puck";

pub const OPENAI_REALTIME_URL: &str = "https://api.openai.com/v1/realtime";
pub const OPENAI_DEFAULT_MODEL: &str = "gpt-4o-realtime-preview-2024-12-17";
pub const OPENAI_DEFAULT_VOICE: &str = "alloy";

const DEFAULT_GREETING: &str = "Hello! Please greet me and start the conversation.";

/// Secret used to authenticate with the provider
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "value")]
pub enum Credential {
    ApiKey(String),
    EphemeralToken(String),
}

impl Credential {
    pub fn secret(&self) -> &str {
        match self {
            Credential::ApiKey(s) | Credential::EphemeralToken(s) => s,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.secret().trim().is_empty()
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credential::ApiKey(_) => f.write_str("ApiKey(<redacted>)"),
            Credential::EphemeralToken(_) => f.write_str("EphemeralToken(<redacted>)"),
        }
    }
}

/// Everything `connect()` needs to reach one provider. Passed in-memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub credential: Credential,
    pub model: String,
    pub voice: String,
    #[serde(default)]
    pub instructions: String,
    /// Overrides the provider's public endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Text sent by `start_conversation()` to make the agent speak first
    #[serde(default = "default_greeting")]
    pub greeting: String,
}

fn default_greeting() -> String {
    DEFAULT_GREETING.to_string()
}

impl ProviderConfig {
    /// Streaming-socket provider authenticated with an API key
    pub fn websocket(api_key: impl Into<String>) -> Self {
        Self {
            kind: ProviderKind::WebSocket,
            credential: Credential::ApiKey(api_key.into()),
            model: GEMINI_DEFAULT_MODEL.to_string(),
            voice: GEMINI_DEFAULT_VOICE.to_string(),
            instructions: String::new(),
            endpoint: None,
            greeting: default_greeting(),
        }
    }

    /// Peer-connection provider authenticated with an ephemeral token
    pub fn webrtc(token: impl Into<String>) -> Self {
        Self {
            kind: ProviderKind::WebRtc,
            credential: Credential::EphemeralToken(token.into()),
            model: OPENAI_DEFAULT_MODEL.to_string(),
            voice: OPENAI_DEFAULT_VOICE.to_string(),
            instructions: String::new(),
            endpoint: None,
            greeting: default_greeting(),
        }
    }

    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = voice.into();
        self
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_greeting(mut self, greeting: impl Into<String>) -> Self {
        self.greeting = greeting.into();
        self
    }

    /// Configured endpoint, or the provider's public one
    pub fn endpoint_or_default(&self) -> &str {
        match (&self.endpoint, self.kind) {
            (Some(endpoint), _) => endpoint,
            (None, ProviderKind::WebSocket) => GEMINI_LIVE_URL,
            (None, ProviderKind::WebRtc) => OPENAI_REALTIME_URL,
        }
    }
}

/// Engine tuning. Unknown or missing fields fall back to defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Samples per captured frame (16 kHz mono)
    pub frame_samples: usize,

    /// Transport handshake timeout
    pub connect_timeout_ms: u64,

    /// Time allowed for the provider's setup acknowledgement after the handshake
    pub setup_timeout_ms: u64,

    /// Upper bound for microphone release during teardown
    pub teardown_timeout_ms: u64,

    /// Playback rate assumed when inbound audio does not declare one
    pub default_playback_rate: u32,

    /// Number of recent errors kept in the session metrics
    pub error_history: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            frame_samples: FRAME_SAMPLES,
            connect_timeout_ms: 10_000,
            setup_timeout_ms: 5_000,
            teardown_timeout_ms: 2_000,
            default_playback_rate: 24_000,
            error_history: 20,
        }
    }
}

impl EngineSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn setup_timeout(&self) -> Duration {
        Duration::from_millis(self.setup_timeout_ms)
    }

    pub fn teardown_timeout(&self) -> Duration {
        Duration::from_millis(self.teardown_timeout_ms)
    }
}

/// Errors raised while assembling provider configuration
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Credential environment variable is unset or empty
    MissingCredential(&'static str),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::MissingCredential(var) => {
                write!(f, "Provider credential not configured. Set {} environment variable.", var)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Supplies `{credential, voice, instructions}` for a provider. Opaque to the engine.
#[async_trait]
pub trait CredentialSupplier: Send + Sync {
    async fn provider_config(&self, kind: ProviderKind) -> Result<ProviderConfig, ConfigError>;
}

/// Reads credentials from the environment (and a `.env` file if present)
#[derive(Debug, Clone, Default)]
pub struct EnvCredentials;

impl EnvCredentials {
    pub const GEMINI_KEY_VAR: &'static str = "GEMINI_API_KEY";
    pub const OPENAI_KEY_VAR: &'static str = "OPENAI_API_KEY";
    pub const VOICE_VAR: &'static str = "VOICE_NAME";
    pub const INSTRUCTIONS_VAR: &'static str = "VOICE_INSTRUCTIONS";

    /// Load `.env` into the process environment, then build the supplier
    pub fn load() -> Self {
        if let Err(e) = dotenvy::dotenv() {
            log::debug!("Config: no .env loaded ({})", e);
        }
        Self
    }

    fn var(name: &str) -> Option<String> {
        std::env::var(name).ok().filter(|v| !v.trim().is_empty())
    }

    pub fn config_for(&self, kind: ProviderKind) -> Result<ProviderConfig, ConfigError> {
        let mut config = match kind {
            ProviderKind::WebSocket => ProviderConfig::websocket(
                Self::var(Self::GEMINI_KEY_VAR)
                    .ok_or(ConfigError::MissingCredential(Self::GEMINI_KEY_VAR))?,
            ),
            ProviderKind::WebRtc => ProviderConfig::webrtc(
                Self::var(Self::OPENAI_KEY_VAR)
                    .ok_or(ConfigError::MissingCredential(Self::OPENAI_KEY_VAR))?,
            ),
        };
        if let Some(voice) = Self::var(Self::VOICE_VAR) {
            config.voice = voice;
        }
        if let Some(instructions) = Self::var(Self::INSTRUCTIONS_VAR) {
            config.instructions = instructions;
        }
        Ok(config)
    }
}

#[async_trait]
impl CredentialSupplier for EnvCredentials {
    async fn provider_config(&self, kind: ProviderKind) -> Result<ProviderConfig, ConfigError> {
        self.config_for(kind)
    }
}
