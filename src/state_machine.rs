//! Session state machine
//!
//! This module implements the session controller's state machine using a
//! single-writer pattern. All transitions go through `reduce()`, which
//! returns the next state and a list of effects for the engine to execute.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::provider::ProviderKind;

/// UI-visible connection state. Sole source of truth for observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    Listening,
    Processing,
    Speaking,
    Error,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Listening => "listening",
            ConnectionState::Processing => "processing",
            ConnectionState::Speaking => "speaking",
            ConnectionState::Error => "error",
        }
    }

    /// Listening, processing or speaking
    pub fn is_active_phase(&self) -> bool {
        matches!(
            self,
            ConnectionState::Listening | ConnectionState::Processing | ConnectionState::Speaking
        )
    }

    /// States to publish when moving from `self` to `next`.
    ///
    /// Active phases always return through `connected`, so a direct
    /// listening → speaking change is published as connected, speaking.
    pub fn path_to(&self, next: ConnectionState) -> Vec<ConnectionState> {
        if *self == next {
            return Vec::new();
        }
        if self.is_active_phase() && next.is_active_phase() {
            return vec![ConnectionState::Connected, next];
        }
        vec![next]
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One connected voice-conversation instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: Uuid,
    pub provider: ProviderKind,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn new(provider: ProviderKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            provider,
            created_at: Utc::now(),
        }
    }
}

/// Sub-state while the transport is up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Ready,
    Listening,
    Processing,
    Speaking,
}

/// Internal state of the session workflow.
/// This is the authoritative state - all transitions go through the reducer.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum State {
    #[default]
    Idle,
    Connecting {
        session: Session,
    },
    Connected {
        session: Session,
        phase: Phase,
    },
    Error {
        message: String,
    },
}

impl State {
    pub fn connection_state(&self) -> ConnectionState {
        match self {
            State::Idle => ConnectionState::Idle,
            State::Connecting { .. } => ConnectionState::Connecting,
            State::Connected { phase, .. } => match phase {
                Phase::Ready => ConnectionState::Connected,
                Phase::Listening => ConnectionState::Listening,
                Phase::Processing => ConnectionState::Processing,
                Phase::Speaking => ConnectionState::Speaking,
            },
            State::Error { .. } => ConnectionState::Error,
        }
    }

    pub fn session(&self) -> Option<&Session> {
        match self {
            State::Connecting { session } | State::Connected { session, .. } => Some(session),
            _ => None,
        }
    }

    pub fn session_id(&self) -> Option<Uuid> {
        self.session().map(|s| s.id)
    }

    /// `connect()` is only legal from idle or error
    pub fn can_connect(&self) -> bool {
        matches!(self, State::Idle | State::Error { .. })
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            State::Error { message } => Some(message),
            _ => None,
        }
    }
}

/// Events that can trigger state transitions.
/// Sent by the engine for commands, adapter results, provider events and
/// playback timers.
#[derive(Debug, Clone)]
pub enum Event {
    /// Microphone acquired for a new session
    ConnectRequested { session: Session },
    /// Microphone could not be acquired
    MicrophoneDenied { message: String },
    /// Transport handshake and provider setup acknowledged
    AdapterReady { id: Uuid },
    AdapterFailed { id: Uuid, message: String },

    /// Greeting trigger went out
    GreetingSent { id: Uuid },
    /// Interim user transcription arrived
    UserSpeechStarted { id: Uuid },
    /// Final user transcription arrived
    UserUtteranceFinal { id: Uuid },
    /// First audio of an AI response was scheduled
    AssistantAudioStarted { id: Uuid },
    /// `turnComplete` from the provider
    AssistantTurnComplete { id: Uuid, playback_active: bool },
    /// Scheduled playback ran out (includes id to prevent stale timers)
    PlaybackFinished { id: Uuid, response_open: bool },
    /// Provider cut its own response (server-side barge-in)
    ProviderInterrupted { id: Uuid },
    /// `interrupt()` from the caller
    InterruptRequested {
        id: Uuid,
        generating: bool,
        playing: bool,
    },

    /// Fatal transport or provider fault
    Fault { id: Uuid, message: String },
    Disconnect,
    Reset,
}

/// Effects to be executed after a state transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Instantiate the selected adapter and run its `connect()`
    StartAdapter { id: Uuid },
    /// Begin streaming microphone frames through the adapter
    StartCapture { id: Uuid },
    /// Ask the provider to cancel the in-flight response
    CancelGeneration { id: Uuid },
    /// Drop queued playback
    StopPlayback { id: Uuid },
    /// Run the ordered release sequence
    Teardown,
    /// Signal to publish the new connection state
    EmitUi,
}

/// Reducer function: (state, event) -> (next_state, effects)
///
/// Key rules:
/// - Never mutate state directly
/// - Ignore events with stale session IDs
/// - Always emit EmitUi after state changes
pub fn reduce(state: &State, event: Event) -> (State, Vec<Effect>) {
    use Effect::*;
    use Event::*;
    use State::*;

    let current_id = state.session_id();
    let is_stale = |eid: Uuid| Some(eid) != current_id;

    match (state, event) {
        // -----------------
        // Idle / Error: connect
        // -----------------
        (Idle | Error { .. }, ConnectRequested { session }) => {
            let id = session.id;
            (Connecting { session }, vec![StartAdapter { id }, EmitUi])
        }
        (Idle | Error { .. }, MicrophoneDenied { message }) => (Error { message }, vec![EmitUi]),

        // -----------------
        // Connecting
        // -----------------
        (Connecting { session }, AdapterReady { id }) if session.id == id => (
            Connected {
                session: session.clone(),
                phase: Phase::Ready,
            },
            vec![StartCapture { id }, EmitUi],
        ),
        (Connecting { session }, AdapterFailed { id, message }) if session.id == id => {
            (Error { message }, vec![Teardown, EmitUi])
        }

        // -----------------
        // Connected phases
        // -----------------
        (
            Connected {
                session,
                phase: Phase::Ready,
            },
            GreetingSent { id },
        ) if session.id == id => (
            Connected {
                session: session.clone(),
                phase: Phase::Processing,
            },
            vec![EmitUi],
        ),
        (
            Connected {
                session,
                phase: Phase::Ready | Phase::Processing,
            },
            UserSpeechStarted { id },
        ) if session.id == id => (
            Connected {
                session: session.clone(),
                phase: Phase::Listening,
            },
            vec![EmitUi],
        ),
        (
            Connected {
                session,
                phase: Phase::Ready | Phase::Listening,
            },
            UserUtteranceFinal { id },
        ) if session.id == id => (
            Connected {
                session: session.clone(),
                phase: Phase::Processing,
            },
            vec![EmitUi],
        ),
        (Connected { session, phase }, AssistantAudioStarted { id })
            if session.id == id && *phase != Phase::Speaking =>
        {
            (
                Connected {
                    session: session.clone(),
                    phase: Phase::Speaking,
                },
                vec![EmitUi],
            )
        }
        (
            Connected { session, phase },
            AssistantTurnComplete {
                id,
                playback_active,
            },
        ) if session.id == id => {
            // Speaking lasts until the scheduled audio has played out
            if playback_active || *phase == Phase::Listening {
                (state.clone(), vec![])
            } else {
                (
                    Connected {
                        session: session.clone(),
                        phase: Phase::Ready,
                    },
                    vec![EmitUi],
                )
            }
        }
        (
            Connected {
                session,
                phase: Phase::Speaking,
            },
            PlaybackFinished { id, response_open },
        ) if session.id == id => {
            let phase = if response_open {
                Phase::Processing
            } else {
                Phase::Ready
            };
            (
                Connected {
                    session: session.clone(),
                    phase,
                },
                vec![EmitUi],
            )
        }
        (Connected { session, phase }, ProviderInterrupted { id }) if session.id == id => {
            let mut effects = vec![StopPlayback { id }];
            if *phase == Phase::Listening {
                return (state.clone(), effects);
            }
            effects.push(EmitUi);
            (
                Connected {
                    session: session.clone(),
                    phase: Phase::Listening,
                },
                effects,
            )
        }
        (
            Connected { session, phase },
            InterruptRequested {
                id,
                generating,
                playing,
            },
        ) if session.id == id => {
            let mut effects = Vec::new();
            if generating {
                effects.push(CancelGeneration { id });
            }
            if playing {
                effects.push(StopPlayback { id });
            }
            // The user keeps the floor while speaking
            if effects.is_empty() || matches!(phase, Phase::Ready | Phase::Listening) {
                return (state.clone(), effects);
            }
            effects.push(EmitUi);
            (
                Connected {
                    session: session.clone(),
                    phase: Phase::Ready,
                },
                effects,
            )
        }

        // -----------------
        // Faults
        // -----------------
        (Connecting { session } | Connected { session, .. }, Fault { id, message })
            if session.id == id =>
        {
            (Error { message }, vec![Teardown, EmitUi])
        }

        // -----------------
        // Disconnect / reset
        // -----------------
        (Idle, Disconnect) => (Idle, vec![Teardown]),
        (_, Disconnect) => (Idle, vec![Teardown, EmitUi]),
        (Error { .. }, Reset) => (Idle, vec![EmitUi]),

        // -----------------
        // Stale events (drop silently)
        // -----------------
        (_, AdapterReady { id }) if is_stale(id) => (state.clone(), vec![]),
        (_, AdapterFailed { id, .. }) if is_stale(id) => (state.clone(), vec![]),
        (_, Fault { id, .. }) if is_stale(id) => (state.clone(), vec![]),
        (_, PlaybackFinished { id, .. }) if is_stale(id) => (state.clone(), vec![]),

        // -----------------
        // Unhandled: no transition
        // -----------------
        _ => (state.clone(), vec![]),
    }
}
