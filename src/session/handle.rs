//! Caller-facing handle to the engine task

use tokio::sync::{mpsc, oneshot, watch};

use super::engine::{Engine, EngineDeps};
use super::SessionError;
use crate::config::ProviderConfig;
use crate::metrics::MetricsSnapshot;
use crate::state_machine::ConnectionState;
use crate::transcript::TranscriptEntry;

const COMMAND_BUFFER: usize = 32;

pub(super) type Reply<T> = oneshot::Sender<T>;

/// Commands from handles to the engine task
pub(super) enum Command {
    Connect {
        config: ProviderConfig,
        reply: Reply<Result<(), SessionError>>,
    },
    StartConversation {
        reply: Reply<Result<(), SessionError>>,
    },
    Interrupt {
        reply: Reply<Result<bool, SessionError>>,
    },
    Disconnect {
        reply: Reply<bool>,
    },
    Reset {
        reply: Reply<Result<(), SessionError>>,
    },
    Finish {
        reply: Reply<Result<Vec<TranscriptEntry>, SessionError>>,
    },
    Transcript {
        reply: Reply<Vec<TranscriptEntry>>,
    },
    Metrics {
        reply: Reply<MetricsSnapshot>,
    },
}

/// Cloneable handle to one voice engine.
///
/// Dropping the last handle tears the session down and stops the engine.
#[derive(Clone)]
pub struct EngineHandle {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<ConnectionState>,
}

impl EngineHandle {
    /// Spawn the engine task on the current tokio runtime
    pub fn spawn(deps: EngineDeps) -> Self {
        let (commands, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (engine, inbox, state) = Engine::new(deps);
        tokio::spawn(engine.run(inbox, command_rx));
        Self { commands, state }
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| SessionError::EngineStopped)?;
        rx.await.map_err(|_| SessionError::EngineStopped)
    }

    /// Acquire the microphone and open the provider transport.
    ///
    /// Resolves once the provider acknowledged setup and capture is running.
    pub async fn connect(&self, config: ProviderConfig) -> Result<(), SessionError> {
        self.request(|reply| Command::Connect { config, reply })
            .await?
    }

    /// Send the greeting trigger so the AI speaks first
    pub async fn start_conversation(&self) -> Result<(), SessionError> {
        self.request(|reply| Command::StartConversation { reply })
            .await?
    }

    /// Cut the AI off. Returns true if a response or queued audio was dropped.
    pub async fn interrupt(&self) -> Result<bool, SessionError> {
        self.request(|reply| Command::Interrupt { reply }).await?
    }

    /// Release everything the session holds. Returns false if a teardown was
    /// already under way. Never fails.
    pub async fn disconnect(&self) -> bool {
        self.request(|reply| Command::Disconnect { reply })
            .await
            .unwrap_or(false)
    }

    /// Leave the error state
    pub async fn reset(&self) -> Result<(), SessionError> {
        self.request(|reply| Command::Reset { reply }).await?
    }

    /// Export the conversation to the sink, then disconnect
    pub async fn finish(&self) -> Result<Vec<TranscriptEntry>, SessionError> {
        self.request(|reply| Command::Finish { reply }).await?
    }

    /// The ordered conversation log so far
    pub async fn transcript(&self) -> Result<Vec<TranscriptEntry>, SessionError> {
        self.request(|reply| Command::Transcript { reply }).await
    }

    pub async fn metrics(&self) -> Result<MetricsSnapshot, SessionError> {
        self.request(|reply| Command::Metrics { reply }).await
    }

    /// Last published connection state
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch the published connection state
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Wait until `target` is the published state
    pub async fn wait_for_state(&self, target: ConnectionState) -> Result<(), SessionError> {
        let mut rx = self.state.clone();
        loop {
            if *rx.borrow_and_update() == target {
                return Ok(());
            }
            rx.changed()
                .await
                .map_err(|_| SessionError::EngineStopped)?;
        }
    }
}
