//! Session controller
//!
//! One engine task owns the session: state, transcript, lifecycle guard and
//! every acquired resource. Callers talk to it through a cloneable
//! `EngineHandle`; results come back on oneshot replies and everything the UI
//! renders goes out through an `EngineObserver`.

mod engine;
mod handle;
mod observer;

pub use engine::EngineDeps;
pub use handle::EngineHandle;
pub use observer::{ChannelObserver, ConversationSink, EngineObserver, NoopObserver, ObserverEvent};

use crate::audio::AudioError;
use crate::provider::ProviderError;
use crate::state_machine::ConnectionState;

/// Errors surfaced to callers and observers
#[derive(Debug, Clone, PartialEq)]
pub enum SessionError {
    /// Microphone denied or unavailable
    Permission(String),
    /// Handshake or authentication failed; `connect()` may be retried
    Connect(String),
    /// Mid-session socket or peer failure
    Transport(String),
    /// Malformed or unexpected inbound message
    Protocol(String),
    /// Explicit error payload from the backend
    ProviderReported(String),
    /// The command is not legal in the current state
    InvalidState {
        operation: &'static str,
        state: ConnectionState,
    },
    /// The engine task is gone
    EngineStopped,
}

impl SessionError {
    /// Map a failed `connect()` of an adapter
    pub fn from_connect(err: ProviderError) -> Self {
        match err {
            ProviderError::ProviderReported(msg) => SessionError::ProviderReported(msg),
            other => SessionError::Connect(other.to_string()),
        }
    }

    /// Map a provider failure after the session was established
    pub fn from_transport(err: ProviderError) -> Self {
        match err {
            ProviderError::ProviderReported(msg) => SessionError::ProviderReported(msg),
            ProviderError::ProtocolError(msg) => SessionError::Protocol(msg),
            other => SessionError::Transport(other.to_string()),
        }
    }

    /// Category used for the metrics error history
    pub fn kind(&self) -> &'static str {
        match self {
            SessionError::Permission(_) => "permission",
            SessionError::Connect(_) => "connect",
            SessionError::Transport(_) => "transport",
            SessionError::Protocol(_) => "protocol",
            SessionError::ProviderReported(_) => "provider",
            SessionError::InvalidState { .. } => "invalid_state",
            SessionError::EngineStopped => "engine",
        }
    }
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::Permission(e) => write!(f, "Microphone unavailable: {}", e),
            SessionError::Connect(e) => write!(f, "Connection failed: {}", e),
            SessionError::Transport(e) => write!(f, "Connection lost: {}", e),
            SessionError::Protocol(e) => write!(f, "Protocol error: {}", e),
            SessionError::ProviderReported(e) => write!(f, "Provider error: {}", e),
            SessionError::InvalidState { operation, state } => {
                write!(f, "{}() is not allowed while {}", operation, state)
            }
            SessionError::EngineStopped => write!(f, "Voice engine is not running"),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<AudioError> for SessionError {
    fn from(err: AudioError) -> Self {
        SessionError::Permission(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_errors_are_permission_errors() {
        let err: SessionError = AudioError::NoInputDevice.into();
        assert_eq!(err.kind(), "permission");
        assert!(err.to_string().contains("No audio input device"));
    }

    #[test]
    fn test_provider_error_mapping() {
        assert_eq!(
            SessionError::from_connect(ProviderError::AuthenticationFailed("bad key".into()))
                .kind(),
            "connect"
        );
        assert_eq!(
            SessionError::from_connect(ProviderError::ProviderReported("quota".into())),
            SessionError::ProviderReported("quota".into())
        );
        assert_eq!(
            SessionError::from_transport(ProviderError::Disconnected("eof".into())).kind(),
            "transport"
        );
    }

    #[test]
    fn test_invalid_state_display() {
        let err = SessionError::InvalidState {
            operation: "connect",
            state: ConnectionState::Speaking,
        };
        assert_eq!(err.to_string(), "connect() is not allowed while speaking");
    }
}
