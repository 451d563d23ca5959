//! Outbound collaborator seams: the UI observer and the export sink

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::SessionError;
use crate::state_machine::ConnectionState;
use crate::transcript::{Role, TranscriptEntry};

/// Receives everything the UI renders. Called from the engine task, so
/// implementations must not block.
pub trait EngineObserver: Send + Sync {
    /// Every published state, in order, with no state skipped
    fn on_state_change(&self, state: ConnectionState);

    /// An entry was appended to the conversation log
    fn on_transcript(&self, _entry: &TranscriptEntry) {}

    /// Live caption text of the open utterance or AI turn
    fn on_interim(&self, _role: Role, _text: &str) {}

    fn on_error(&self, _error: &SessionError) {}
}

/// Ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl EngineObserver for NoopObserver {
    fn on_state_change(&self, _state: ConnectionState) {}
}

/// Observer callbacks as values
#[derive(Debug, Clone, PartialEq)]
pub enum ObserverEvent {
    StateChanged(ConnectionState),
    Transcript(TranscriptEntry),
    Interim { role: Role, text: String },
    Error(SessionError),
}

/// Forwards observer callbacks over a channel, for UIs running their own loop
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<ObserverEvent>,
}

impl ChannelObserver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ObserverEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn forward(&self, event: ObserverEvent) {
        if self.tx.send(event).is_err() {
            log::debug!("ChannelObserver: receiver dropped");
        }
    }
}

impl EngineObserver for ChannelObserver {
    fn on_state_change(&self, state: ConnectionState) {
        self.forward(ObserverEvent::StateChanged(state));
    }

    fn on_transcript(&self, entry: &TranscriptEntry) {
        self.forward(ObserverEvent::Transcript(entry.clone()));
    }

    fn on_interim(&self, role: Role, text: &str) {
        self.forward(ObserverEvent::Interim {
            role,
            text: text.to_string(),
        });
    }

    fn on_error(&self, error: &SessionError) {
        self.forward(ObserverEvent::Error(error.clone()));
    }
}

/// Accepts the finished, ordered conversation (e.g. for diary generation)
#[async_trait]
pub trait ConversationSink: Send + Sync {
    async fn export(&self, entries: Vec<TranscriptEntry>) -> Result<(), String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_observer_preserves_order() {
        let (observer, mut rx) = ChannelObserver::new();
        observer.on_state_change(ConnectionState::Connecting);
        observer.on_interim(Role::User, "hel");
        observer.on_state_change(ConnectionState::Connected);

        assert_eq!(
            rx.try_recv().unwrap(),
            ObserverEvent::StateChanged(ConnectionState::Connecting)
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            ObserverEvent::Interim {
                role: Role::User,
                text: "hel".to_string()
            }
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            ObserverEvent::StateChanged(ConnectionState::Connected)
        );
    }

    #[test]
    fn test_dropped_receiver_is_tolerated() {
        let (observer, rx) = ChannelObserver::new();
        drop(rx);
        observer.on_error(&SessionError::EngineStopped);
    }
}
