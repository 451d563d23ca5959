//! Provider adapters
//!
//! A `ProviderAdapter` hides one backend transport behind a common contract:
//!
//! ```text
//!                 ┌──────────────────────┐
//!  AudioFrame ──▶ │   ProviderAdapter    │ ──▶ ProviderEvent (wire order)
//!  greeting   ──▶ │  WebSocket | WebRTC  │     tagged with the session id
//!                 └──────────────────────┘
//! ```
//!
//! The variant is chosen once per session by an `AdapterFactory`; nothing
//! downstream branches on the provider again.

mod live_protocol;
mod realtime_protocol;
mod websocket;
mod webrtc;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::audio::AudioFrame;
use crate::config::{EngineSettings, ProviderConfig};
use crate::lifecycle::ConnectPermit;
use crate::transcript::TranscriptEvent;

pub use live_protocol::{ClientMessage as LiveClientMessage, ServerMessage as LiveServerMessage};
pub use realtime_protocol::{ClientEvent as RealtimeClientEvent, ServerEvent as RealtimeServerEvent};
pub use websocket::WebSocketAdapter;
pub use webrtc::{HttpSignaler, PeerConnector, PeerEvent, PeerSession, SdpSignaler, WebRtcAdapter};

/// Backend transport variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Single streaming socket, JSON envelopes with base64 PCM
    WebSocket,
    /// Peer connection: media track out, remote track + data channel in
    WebRtc,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::WebSocket => "websocket",
            ProviderKind::WebRtc => "webrtc",
        }
    }
}

/// Something the provider told us
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderEvent {
    Transcript(TranscriptEvent),
    /// Decoded PCM16 at the provider-declared rate
    AssistantAudio { samples: Vec<i16>, sample_rate: u32 },
    /// Voice activity detected on the user's side
    SpeechStarted,
    /// The AI turn ended
    TurnComplete,
    /// The provider cut its own response
    Interrupted,
    /// Malformed or unexpected inbound message; dropped, session continues
    ProtocolError { message: String },
    /// Explicit backend error payload
    ProviderError { message: String },
    /// Transport went away mid-session
    Closed { reason: String },
}

/// A provider event tagged with the session that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct TaggedEvent {
    pub session_id: Uuid,
    pub event: ProviderEvent,
}

/// Delivers events from an adapter to the engine, in wire-arrival order
#[derive(Debug, Clone)]
pub struct ProviderEventSink {
    session_id: Uuid,
    tx: mpsc::UnboundedSender<TaggedEvent>,
}

impl ProviderEventSink {
    pub fn new(session_id: Uuid, tx: mpsc::UnboundedSender<TaggedEvent>) -> Self {
        Self { session_id, tx }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Returns false once the engine has gone away
    pub fn emit(&self, event: ProviderEvent) -> bool {
        self.tx
            .send(TaggedEvent {
                session_id: self.session_id,
                event,
            })
            .is_ok()
    }
}

/// Errors that can occur while talking to a provider
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderError {
    /// Failed to establish the transport
    ConnectionFailed(String),
    /// Credential rejected or missing
    AuthenticationFailed(String),
    /// The engine is tearing down; no new connections
    ConnectionsBlocked,
    /// Handshake or setup acknowledgement took too long
    Timeout(String),
    /// Malformed or unexpected message
    ProtocolError(String),
    /// Connection was closed unexpectedly
    Disconnected(String),
    /// Failed to queue an outbound message
    SendFailed(String),
    /// Explicit error payload from the provider
    ProviderReported(String),
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderError::ConnectionFailed(e) => write!(f, "Failed to connect to provider: {}", e),
            ProviderError::AuthenticationFailed(e) => write!(f, "Authentication failed: {}", e),
            ProviderError::ConnectionsBlocked => {
                write!(f, "Connections are blocked while the session tears down")
            }
            ProviderError::Timeout(e) => write!(f, "Timed out waiting for {}", e),
            ProviderError::ProtocolError(e) => write!(f, "Protocol error: {}", e),
            ProviderError::Disconnected(e) => write!(f, "Provider disconnected: {}", e),
            ProviderError::SendFailed(e) => write!(f, "Failed to send: {}", e),
            ProviderError::ProviderReported(e) => write!(f, "Provider error: {}", e),
        }
    }
}

impl std::error::Error for ProviderError {}

/// Common contract for both transports
#[async_trait]
pub trait ProviderAdapter: Send {
    fn kind(&self) -> ProviderKind;

    /// Resolves once the transport handshake and the provider's setup
    /// acknowledgement both succeeded.
    async fn connect(&mut self, config: &ProviderConfig) -> Result<(), ProviderError>;

    /// Best effort. Returns false if the frame was dropped (transport not open).
    fn send_audio_frame(&mut self, frame: &AudioFrame) -> bool;

    /// Send a user text turn (the greeting trigger)
    fn send_text(&mut self, text: &str) -> Result<(), ProviderError>;

    /// Ask the provider to stop the in-flight response
    fn cancel_response(&mut self);

    /// Close the transport. Safe even if `connect()` never completed.
    async fn disconnect(&mut self);

    fn is_open(&self) -> bool;
}

/// Everything an adapter needs from the engine
#[derive(Debug, Clone)]
pub struct AdapterContext {
    pub events: ProviderEventSink,
    pub permit: ConnectPermit,
    pub settings: EngineSettings,
}

/// Instantiates the adapter variant for a session
pub trait AdapterFactory: Send + Sync {
    fn create(
        &self,
        kind: ProviderKind,
        context: AdapterContext,
    ) -> Result<Box<dyn ProviderAdapter>, ProviderError>;
}

/// Builds the WebSocket adapter, and the WebRTC adapter when a media engine
/// has been supplied.
#[derive(Clone, Default)]
pub struct DefaultAdapterFactory {
    peer_connector: Option<Arc<dyn PeerConnector>>,
    signaler: Option<Arc<dyn SdpSignaler>>,
}

impl DefaultAdapterFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_peer_connector(mut self, connector: Arc<dyn PeerConnector>) -> Self {
        self.peer_connector = Some(connector);
        self
    }

    pub fn with_signaler(mut self, signaler: Arc<dyn SdpSignaler>) -> Self {
        self.signaler = Some(signaler);
        self
    }
}

impl AdapterFactory for DefaultAdapterFactory {
    fn create(
        &self,
        kind: ProviderKind,
        context: AdapterContext,
    ) -> Result<Box<dyn ProviderAdapter>, ProviderError> {
        match kind {
            ProviderKind::WebSocket => Ok(Box::new(WebSocketAdapter::new(context))),
            ProviderKind::WebRtc => {
                let connector = self.peer_connector.clone().ok_or_else(|| {
                    ProviderError::ConnectionFailed("no WebRTC media engine configured".to_string())
                })?;
                let signaler: Arc<dyn SdpSignaler> = match &self.signaler {
                    Some(signaler) => signaler.clone(),
                    None => Arc::new(HttpSignaler::new()?),
                };
                Ok(Box::new(WebRtcAdapter::new(context, connector, signaler)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::LifecycleGuard;

    fn context() -> (AdapterContext, mpsc::UnboundedReceiver<TaggedEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let context = AdapterContext {
            events: ProviderEventSink::new(Uuid::new_v4(), tx),
            permit: LifecycleGuard::new().permit(),
            settings: EngineSettings::default(),
        };
        (context, rx)
    }

    #[test]
    fn test_provider_error_display() {
        let err = ProviderError::ConnectionFailed("timeout".to_string());
        assert!(err.to_string().contains("timeout"));

        let err = ProviderError::AuthenticationFailed("invalid key".to_string());
        assert!(err.to_string().contains("invalid key"));
    }

    #[test]
    fn test_sink_tags_events() {
        let (context, mut rx) = context();
        let id = context.events.session_id();
        assert!(context.events.emit(ProviderEvent::TurnComplete));

        let tagged = rx.try_recv().unwrap();
        assert_eq!(tagged.session_id, id);
        assert_eq!(tagged.event, ProviderEvent::TurnComplete);
    }

    #[test]
    fn test_factory_selects_variant_once() {
        let factory = DefaultAdapterFactory::new();
        let (context, _rx) = context();
        let adapter = factory.create(ProviderKind::WebSocket, context).unwrap();
        assert_eq!(adapter.kind(), ProviderKind::WebSocket);
        assert!(!adapter.is_open());

        let (context, _rx) = self::context();
        assert!(matches!(
            factory.create(ProviderKind::WebRtc, context),
            Err(ProviderError::ConnectionFailed(_))
        ));
    }

    #[test]
    fn test_kind_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&ProviderKind::WebRtc).unwrap(),
            "\"webrtc\""
        );
    }
}
