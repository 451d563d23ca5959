//! Real-time duplex voice conversation engine
//!
//! Streams microphone audio to a conversational AI backend, plays its spoken
//! replies back, and merges both sides' transcription into one ordered
//! conversation log.
//!
//! ```text
//!  mic ─▶ capture ─▶ ┌──────────┐ ─▶ ProviderAdapter ─▶ backend
//!                    │  Engine  │                         │
//!  UI  ◀─ observer ◀─ │ (reduce) │ ◀─ ProviderEvent ◀──────┘
//!                    └──────────┘ ─▶ playback ─▶ speaker
//! ```
//!
//! The embedding application installs a `log` backend, builds `EngineDeps`
//! and drives everything through an `EngineHandle`.

pub mod audio;
pub mod config;
pub mod lifecycle;
pub mod metrics;
pub mod provider;
pub mod session;
pub mod state_machine;
pub mod transcript;

pub use config::{Credential, CredentialSupplier, EngineSettings, EnvCredentials, ProviderConfig};
pub use provider::{DefaultAdapterFactory, ProviderKind};
pub use session::{
    ChannelObserver, ConversationSink, EngineDeps, EngineHandle, EngineObserver, ObserverEvent,
    SessionError,
};
pub use state_machine::ConnectionState;
pub use transcript::{Role, TranscriptEntry};

use std::sync::Arc;

use audio::{CpalMicrophone, CpalSpeaker};

/// Engine on the default input and output devices
pub fn spawn_default_engine(
    settings: EngineSettings,
    adapters: DefaultAdapterFactory,
    observer: Arc<dyn EngineObserver>,
    sink: Option<Arc<dyn ConversationSink>>,
) -> EngineHandle {
    EngineHandle::spawn(EngineDeps {
        input: Arc::new(CpalMicrophone::new(settings.frame_samples)),
        output: Arc::new(CpalSpeaker),
        adapters: Arc::new(adapters),
        observer,
        sink,
        settings,
    })
}
