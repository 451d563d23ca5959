//! Engine task: the single writer of session state
//!
//! Mirrors a reducer/effect-runner loop. Every input (command, provider event,
//! captured frame, playback timer) becomes an `Event` for `reduce()`; the
//! resulting effects are executed here, in order, before the next input is
//! taken. Provider, capture and internal inputs are drained before commands
//! so a command always sees the effects of everything that already arrived.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::handle::{Command, Reply};
use super::observer::{ConversationSink, EngineObserver};
use super::SessionError;
use crate::audio::{AudioFrame, AudioInput, AudioOutput, FrameSink, PlaybackPipeline};
use crate::config::{EngineSettings, ProviderConfig};
use crate::lifecycle::{LifecycleGuard, SessionResources};
use crate::metrics::SessionMetrics;
use crate::provider::{
    AdapterContext, AdapterFactory, ProviderAdapter, ProviderError, ProviderEvent,
    ProviderEventSink, TaggedEvent,
};
use crate::state_machine::{reduce, ConnectionState, Effect, Event, Phase, Session, State};
use crate::transcript::{Role, TranscriptEntry, TranscriptEvent, TranscriptMerger};

/// Log every Nth forwarded frame
const FRAME_LOG_INTERVAL: u64 = 50;

/// Collaborators injected at construction
#[derive(Clone)]
pub struct EngineDeps {
    pub input: Arc<dyn AudioInput>,
    pub output: Arc<dyn AudioOutput>,
    pub adapters: Arc<dyn AdapterFactory>,
    pub observer: Arc<dyn EngineObserver>,
    pub sink: Option<Arc<dyn ConversationSink>>,
    pub settings: EngineSettings,
}

/// Frames and faults from the capture callback, tagged with their session
enum CaptureEvent {
    Frame { session_id: Uuid, frame: AudioFrame },
    Fault { session_id: Uuid, message: String },
}

/// Completions of work the engine spawned
enum Internal {
    AdapterConnected {
        id: Uuid,
        adapter: Box<dyn ProviderAdapter>,
        result: Result<(), ProviderError>,
    },
    PlaybackDrained {
        id: Uuid,
        generation: u64,
    },
}

/// A provider connect still running in its own task
struct InFlightConnect {
    id: Uuid,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Runs on the audio device thread; only forwards
struct EngineFrameSink {
    session_id: Uuid,
    tx: mpsc::UnboundedSender<CaptureEvent>,
}

impl FrameSink for EngineFrameSink {
    fn deliver(&self, frame: AudioFrame) {
        let _ = self.tx.send(CaptureEvent::Frame {
            session_id: self.session_id,
            frame,
        });
    }

    fn fault(&self, message: String) {
        let _ = self.tx.send(CaptureEvent::Fault {
            session_id: self.session_id,
            message,
        });
    }
}

/// Receiving ends of the engine's internal channels
pub(super) struct Inbox {
    provider: mpsc::UnboundedReceiver<TaggedEvent>,
    capture: mpsc::UnboundedReceiver<CaptureEvent>,
    internal: mpsc::UnboundedReceiver<Internal>,
}

pub(super) struct Engine {
    deps: EngineDeps,
    state: State,
    published: ConnectionState,
    state_tx: watch::Sender<ConnectionState>,
    guard: Arc<LifecycleGuard>,
    resources: SessionResources,
    in_flight: Option<InFlightConnect>,
    merger: TranscriptMerger,
    metrics: SessionMetrics,
    config: Option<ProviderConfig>,
    pending_connect: Option<(Uuid, Reply<Result<(), SessionError>>)>,
    connect_error: Option<SessionError>,
    conversation_started: bool,
    capturing: bool,
    provider_tx: mpsc::UnboundedSender<TaggedEvent>,
    capture_tx: mpsc::UnboundedSender<CaptureEvent>,
    internal_tx: mpsc::UnboundedSender<Internal>,
}

impl Engine {
    pub(super) fn new(deps: EngineDeps) -> (Self, Inbox, watch::Receiver<ConnectionState>) {
        let (provider_tx, provider) = mpsc::unbounded_channel();
        let (capture_tx, capture) = mpsc::unbounded_channel();
        let (internal_tx, internal) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
        let metrics = SessionMetrics::new(deps.settings.error_history);

        let engine = Self {
            deps,
            state: State::Idle,
            published: ConnectionState::Idle,
            state_tx,
            guard: LifecycleGuard::new(),
            resources: SessionResources::default(),
            in_flight: None,
            merger: TranscriptMerger::new(),
            metrics,
            config: None,
            pending_connect: None,
            connect_error: None,
            conversation_started: false,
            capturing: false,
            provider_tx,
            capture_tx,
            internal_tx,
        };
        let inbox = Inbox {
            provider,
            capture,
            internal,
        };
        (engine, inbox, state_rx)
    }

    pub(super) async fn run(mut self, mut inbox: Inbox, mut commands: mpsc::Receiver<Command>) {
        log::info!("Engine: started");

        loop {
            tokio::select! {
                biased;
                Some(message) = inbox.internal.recv() => self.handle_internal(message).await,
                Some(tagged) = inbox.provider.recv() => self.handle_provider_event(tagged).await,
                Some(event) = inbox.capture.recv() => self.handle_capture(event).await,
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
            }
        }

        log::info!("Engine: all handles dropped, tearing down");
        self.guard.begin_teardown();
        self.dispatch(Event::Disconnect).await;
        log::info!("Engine: stopped");
    }

    // ------------------------------------------------------------------
    // Reducer plumbing
    // ------------------------------------------------------------------

    async fn dispatch(&mut self, event: Event) {
        let mut queue = VecDeque::from([event]);
        while let Some(event) = queue.pop_front() {
            let (next, effects) = reduce(&self.state, event);
            if next.connection_state() != self.state.connection_state() {
                log::info!(
                    "Engine: state transition: {} -> {}",
                    self.state.connection_state(),
                    next.connection_state()
                );
            }
            self.state = next;

            for effect in effects {
                if let Some(follow_up) = self.run_effect(effect).await {
                    queue.push_back(follow_up);
                }
            }
        }
        self.settle_connect();
    }

    /// Answer a waiting `connect()` once its session left `connecting`
    fn settle_connect(&mut self) {
        let Some((id, _)) = &self.pending_connect else {
            return;
        };
        let outcome = match &self.state {
            State::Connecting { session } if session.id == *id => return,
            State::Connected { session, .. } if session.id == *id => Ok(()),
            other => Err(self.connect_error.take().unwrap_or_else(|| {
                SessionError::Connect(
                    other
                        .error_message()
                        .unwrap_or("session ended before the provider was ready")
                        .to_string(),
                )
            })),
        };
        self.connect_error = None;
        if let Some((_, reply)) = self.pending_connect.take() {
            let _ = reply.send(outcome);
        }
    }

    async fn run_effect(&mut self, effect: Effect) -> Option<Event> {
        match effect {
            Effect::StartAdapter { id } => self.start_adapter(id),
            Effect::StartCapture { id } => self.start_capture(id),
            Effect::CancelGeneration { id } => {
                log::info!("Engine: cancelling generation for session {}", id);
                if let Some(adapter) = self.resources.adapter.as_mut() {
                    adapter.cancel_response();
                }
                None
            }
            Effect::StopPlayback { id } => {
                if let Some(playback) = self.resources.playback.as_mut() {
                    if playback.stop(Instant::now()) {
                        log::info!("Engine: playback stopped for session {}", id);
                    }
                }
                None
            }
            Effect::Teardown => {
                self.teardown().await;
                None
            }
            Effect::EmitUi => {
                self.publish_state();
                None
            }
        }
    }

    /// Publish every state between the last published one and the current
    fn publish_state(&mut self) {
        let current = self.state.connection_state();
        for step in self.published.path_to(current) {
            self.published = step;
            self.state_tx.send_replace(step);
            self.deps.observer.on_state_change(step);
        }
    }

    fn start_adapter(&mut self, id: Uuid) -> Option<Event> {
        let Some(config) = self.config.clone() else {
            return Some(Event::AdapterFailed {
                id,
                message: "no provider configuration".to_string(),
            });
        };

        let context = AdapterContext {
            events: ProviderEventSink::new(id, self.provider_tx.clone()),
            permit: self.guard.permit(),
            settings: self.deps.settings.clone(),
        };
        let mut adapter = match self.deps.adapters.create(config.kind, context) {
            Ok(adapter) => adapter,
            Err(e) => {
                let err = SessionError::from_connect(e);
                self.report_connect_failure(id, err.clone());
                return Some(Event::AdapterFailed {
                    id,
                    message: err.to_string(),
                });
            }
        };

        log::info!(
            "Engine: connecting session {} via {}",
            id,
            config.kind.as_str()
        );
        let limit = self.deps.settings.connect_timeout() + self.deps.settings.setup_timeout();
        let tx = self.internal_tx.clone();
        let cancel = CancellationToken::new();
        let cancelled = cancel.clone();
        let task = tokio::spawn(async move {
            let outcome = tokio::select! {
                _ = cancelled.cancelled() => None,
                result = timeout(limit, adapter.connect(&config)) => Some(match result {
                    Ok(result) => result,
                    Err(_) => Err(ProviderError::Timeout("provider connection".to_string())),
                }),
            };
            match outcome {
                Some(result) => {
                    let _ = tx.send(Internal::AdapterConnected {
                        id,
                        adapter,
                        result,
                    });
                }
                None => {
                    log::info!("Engine: connect of session {} cancelled, closing transport", id);
                    adapter.disconnect().await;
                }
            }
        });
        self.in_flight = Some(InFlightConnect { id, cancel, task });
        None
    }

    /// Close the transport of a connect that has not completed yet
    async fn cancel_in_flight(&mut self) {
        let Some(in_flight) = self.in_flight.take() else {
            return;
        };
        in_flight.cancel.cancel();
        let abort = in_flight.task.abort_handle();
        if timeout(self.deps.settings.teardown_timeout(), in_flight.task)
            .await
            .is_err()
        {
            log::warn!(
                "Engine: transport of session {} did not close in time",
                in_flight.id
            );
            abort.abort();
        }
    }

    fn start_capture(&mut self, id: Uuid) -> Option<Event> {
        let capture = self.resources.capture.as_mut()?;
        match capture.start() {
            Ok(()) => {
                self.capturing = true;
                log::info!("Engine: capture started for session {}", id);
                None
            }
            Err(e) => {
                let err = SessionError::from(e);
                self.report_error(&err);
                Some(Event::Fault {
                    id,
                    message: err.to_string(),
                })
            }
        }
    }

    async fn teardown(&mut self) {
        self.guard.begin_teardown();
        self.capturing = false;

        let playing = self
            .resources
            .playback
            .as_ref()
            .map(|p| p.is_playing(Instant::now()))
            .unwrap_or(false);
        let cancel = self.merger.response_in_progress() || playing;
        if !self.resources.is_empty() {
            log::info!("Engine: releasing session resources");
            self.resources
                .release(cancel, self.deps.settings.teardown_timeout())
                .await;
        }
        self.cancel_in_flight().await;
        self.metrics.session_ended();
    }

    fn report_error(&mut self, err: &SessionError) {
        self.metrics.record_error(err.kind(), err.to_string());
        self.deps.observer.on_error(err);
    }

    /// Remembered so the waiting `connect()` gets the real cause
    fn report_connect_failure(&mut self, id: Uuid, err: SessionError) {
        log::error!("Engine: session {} failed to connect: {}", id, err);
        self.report_error(&err);
        self.connect_error = Some(err);
    }

    /// Fatal fault in the active session
    async fn fail(&mut self, id: Uuid, err: SessionError) {
        log::error!("Engine: session {} failed: {}", id, err);
        self.dispatch(Event::Fault {
            id,
            message: err.to_string(),
        })
        .await;
        self.report_error(&err);
    }

    fn is_current(&self, id: Uuid) -> bool {
        self.state.session_id() == Some(id)
    }

    fn playback_active(&self) -> bool {
        self.resources
            .playback
            .as_ref()
            .map(|p| p.is_playing(Instant::now()))
            .unwrap_or(false)
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect { config, reply } => self.connect(config, reply).await,
            Command::StartConversation { reply } => {
                let _ = reply.send(self.start_conversation().await);
            }
            Command::Interrupt { reply } => {
                let _ = reply.send(self.interrupt().await);
            }
            Command::Disconnect { reply } => {
                let _ = reply.send(self.disconnect().await);
            }
            Command::Reset { reply } => {
                let result = if matches!(self.state, State::Error { .. }) {
                    self.dispatch(Event::Reset).await;
                    Ok(())
                } else {
                    Err(self.invalid("reset"))
                };
                let _ = reply.send(result);
            }
            Command::Finish { reply } => {
                let _ = reply.send(Ok(self.finish().await));
            }
            Command::Transcript { reply } => {
                let _ = reply.send(self.merger.entries().to_vec());
            }
            Command::Metrics { reply } => {
                let _ = reply.send(self.metrics.snapshot());
            }
        }
    }

    fn invalid(&self, operation: &'static str) -> SessionError {
        SessionError::InvalidState {
            operation,
            state: self.state.connection_state(),
        }
    }

    async fn connect(&mut self, config: ProviderConfig, reply: Reply<Result<(), SessionError>>) {
        if !self.state.can_connect() {
            let _ = reply.send(Err(self.invalid("connect")));
            return;
        }
        if !self.resources.is_empty() {
            log::warn!("Engine: resources from a previous session still held, releasing");
            self.resources
                .release(false, self.deps.settings.teardown_timeout())
                .await;
        }

        let session = Session::new(config.kind);
        let id = session.id;
        log::info!("Engine: connect requested (session {})", id);

        let sink: Arc<dyn FrameSink> = Arc::new(EngineFrameSink {
            session_id: id,
            tx: self.capture_tx.clone(),
        });
        let input = self.deps.input.clone();
        let opened = tokio::task::spawn_blocking(move || input.open(sink))
            .await
            .map_err(|e| SessionError::Permission(format!("device thread failed: {}", e)))
            .and_then(|result| result.map_err(SessionError::from));

        let capture = match opened {
            Ok(capture) => capture,
            Err(err) => {
                log::error!("Engine: {}", err);
                self.dispatch(Event::MicrophoneDenied {
                    message: err.to_string(),
                })
                .await;
                self.report_error(&err);
                let _ = reply.send(Err(err));
                return;
            }
        };

        // The microphone is ours: a new session may open connections again
        self.guard.rearm();
        self.merger.reset();
        self.conversation_started = false;
        self.capturing = false;
        self.metrics.session_started(id);
        self.resources.capture = Some(capture);
        self.config = Some(config);
        self.pending_connect = Some((id, reply));

        self.dispatch(Event::ConnectRequested { session }).await;
    }

    async fn start_conversation(&mut self) -> Result<(), SessionError> {
        let id = match &self.state {
            State::Connected { session, .. } => session.id,
            _ => return Err(self.invalid("start_conversation")),
        };
        if self.conversation_started || !self.merger.is_empty() {
            return Err(self.invalid("start_conversation"));
        }

        let greeting = self
            .config
            .as_ref()
            .map(|c| c.greeting.clone())
            .unwrap_or_default();
        let adapter = self
            .resources
            .adapter
            .as_mut()
            .ok_or_else(|| SessionError::Transport("transport is not open".to_string()))?;
        adapter
            .send_text(&greeting)
            .map_err(SessionError::from_transport)?;

        log::info!("Engine: greeting sent for session {}", id);
        self.conversation_started = true;
        self.merger.note_response_activity();
        self.dispatch(Event::GreetingSent { id }).await;
        Ok(())
    }

    async fn interrupt(&mut self) -> Result<bool, SessionError> {
        if matches!(self.state, State::Idle) {
            return Err(self.invalid("interrupt"));
        }

        let generating = self.merger.response_in_progress();
        let playing = self.playback_active();
        let discarded = self.merger.interrupt();

        if let State::Connected { session, .. } = &self.state {
            let id = session.id;
            self.dispatch(Event::InterruptRequested {
                id,
                generating,
                playing,
            })
            .await;
        }

        let interrupted = discarded || playing;
        if interrupted {
            self.metrics.interrupted();
            log::info!("Engine: response interrupted");
        } else {
            log::debug!("Engine: nothing to interrupt");
        }
        Ok(interrupted)
    }

    async fn disconnect(&mut self) -> bool {
        let first = self.guard.begin_teardown();
        if first {
            log::info!("Engine: disconnect requested");
        } else {
            log::debug!("Engine: disconnect while already tearing down");
        }
        self.dispatch(Event::Disconnect).await;
        first
    }

    async fn finish(&mut self) -> Vec<TranscriptEntry> {
        let entries = self.merger.entries().to_vec();
        if self.merger.has_pending() {
            log::warn!("Engine: finishing with an AI response still waiting for its utterance");
        }

        if let Some(sink) = self.deps.sink.clone() {
            match sink.export(entries.clone()).await {
                Ok(()) => log::info!("Engine: exported {} transcript entries", entries.len()),
                Err(e) => {
                    log::error!("Engine: transcript export failed: {}", e);
                    self.metrics.record_error("export", e);
                }
            }
        }

        self.disconnect().await;
        entries
    }

    // ------------------------------------------------------------------
    // Spawned work
    // ------------------------------------------------------------------

    async fn handle_internal(&mut self, message: Internal) {
        match message {
            Internal::AdapterConnected {
                id,
                mut adapter,
                result,
            } => {
                if self.in_flight.as_ref().map(|f| f.id) == Some(id) {
                    self.in_flight = None;
                }
                let still_connecting =
                    matches!(&self.state, State::Connecting { session } if session.id == id);
                if !still_connecting {
                    log::info!("Engine: discarding transport of stale session {}", id);
                    adapter.disconnect().await;
                    return;
                }

                match result {
                    Ok(()) => {
                        self.resources.adapter = Some(adapter);
                        self.dispatch(Event::AdapterReady { id }).await;
                    }
                    Err(e) => {
                        adapter.disconnect().await;
                        let err = SessionError::from_connect(e);
                        self.report_connect_failure(id, err.clone());
                        self.dispatch(Event::AdapterFailed {
                            id,
                            message: err.to_string(),
                        })
                        .await;
                    }
                }
            }
            Internal::PlaybackDrained { id, generation } => {
                let current = self
                    .resources
                    .playback
                    .as_ref()
                    .map(|p| p.is_current(generation))
                    .unwrap_or(false);
                if self.is_current(id) && current {
                    let response_open = self.merger.response_in_progress();
                    self.dispatch(Event::PlaybackFinished { id, response_open })
                        .await;
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Capture
    // ------------------------------------------------------------------

    async fn handle_capture(&mut self, event: CaptureEvent) {
        match event {
            CaptureEvent::Frame { session_id, frame } => {
                if !self.is_current(session_id) {
                    return;
                }
                self.metrics.frame_captured();
                if !self.capturing {
                    return;
                }
                let delivered = self
                    .resources
                    .adapter
                    .as_mut()
                    .map(|adapter| adapter.send_audio_frame(&frame))
                    .unwrap_or(false);
                self.metrics.frame_forwarded(delivered);
                if frame.sequence % FRAME_LOG_INTERVAL == 0 {
                    log::debug!(
                        "Engine: forwarded frame {} ({} samples)",
                        frame.sequence,
                        frame.samples.len()
                    );
                }
            }
            CaptureEvent::Fault {
                session_id,
                message,
            } => {
                log::error!("Engine: capture fault: {}", message);
                if self.is_current(session_id) {
                    self.fail(session_id, SessionError::Permission(message))
                        .await;
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Provider events
    // ------------------------------------------------------------------

    async fn handle_provider_event(&mut self, tagged: TaggedEvent) {
        let id = tagged.session_id;
        if !self.is_current(id) {
            log::debug!("Engine: dropping event from stale session {}", id);
            return;
        }

        match tagged.event {
            ProviderEvent::Transcript(event) => self.handle_transcript(id, event).await,
            ProviderEvent::AssistantAudio {
                samples,
                sample_rate,
            } => self.handle_audio(id, samples, sample_rate).await,
            ProviderEvent::SpeechStarted => {
                self.merger.open_utterance();
                self.dispatch(Event::UserSpeechStarted { id }).await;
            }
            ProviderEvent::TurnComplete => {
                self.metrics.turn_completed();
                match self.merger.complete_turn(Utc::now()) {
                    Ok(appended) => self.publish_entries(&appended),
                    Err(e) => {
                        self.metrics.pending_overflow(e.to_string());
                        self.deps
                            .observer
                            .on_error(&SessionError::Protocol(e.to_string()));
                    }
                }
                let playback_active = self.playback_active();
                self.dispatch(Event::AssistantTurnComplete {
                    id,
                    playback_active,
                })
                .await;
            }
            ProviderEvent::Interrupted => {
                log::info!("Engine: provider interrupted its response");
                self.merger.truncate_response();
                self.metrics.interrupted();
                self.dispatch(Event::ProviderInterrupted { id }).await;
            }
            ProviderEvent::ProtocolError { message } => {
                log::warn!("Engine: dropped provider message: {}", message);
                self.metrics.protocol_error(message);
            }
            ProviderEvent::ProviderError { message } => {
                self.fail(id, SessionError::ProviderReported(message)).await;
            }
            ProviderEvent::Closed { reason } => {
                self.fail(id, SessionError::Transport(reason)).await;
            }
        }
    }

    fn publish_entries(&self, entries: &[TranscriptEntry]) {
        for entry in entries {
            log::debug!(
                "Engine: transcript [{}] {} chars",
                entry.role.as_str(),
                entry.content.chars().count()
            );
            self.deps.observer.on_transcript(entry);
        }
    }

    async fn handle_transcript(&mut self, id: Uuid, event: TranscriptEvent) {
        let role = event.role;
        let is_final = event.is_final;
        let appended = self.merger.apply(event);

        if !is_final {
            let text = self.merger.interim_text(role);
            if !text.is_empty() {
                self.deps.observer.on_interim(role, text);
            }
        }
        self.publish_entries(&appended);

        match (role, is_final) {
            (Role::User, false) => self.dispatch(Event::UserSpeechStarted { id }).await,
            (Role::User, true) => self.dispatch(Event::UserUtteranceFinal { id }).await,
            (Role::Assistant, _) => {}
        }
    }

    async fn handle_audio(&mut self, id: Uuid, samples: Vec<i16>, sample_rate: u32) {
        if self.merger.is_discarding() {
            log::debug!("Engine: dropping audio of interrupted response");
            return;
        }
        if samples.is_empty() {
            return;
        }
        self.metrics.audio_received(samples.len());
        self.merger.note_response_activity();

        let reopen = self
            .resources
            .playback
            .as_ref()
            .map(|p| p.sample_rate() != sample_rate)
            .unwrap_or(true);
        if reopen {
            if let Some(old) = self.resources.playback.take() {
                log::info!(
                    "Engine: playback rate changed {} -> {} Hz",
                    old.sample_rate(),
                    sample_rate
                );
                let _ = tokio::task::spawn_blocking(move || old.close()).await;
            }
            let output = self.deps.output.clone();
            let opened = tokio::task::spawn_blocking(move || {
                PlaybackPipeline::open(output.as_ref(), sample_rate)
            })
            .await;
            match opened {
                Ok(Ok(pipeline)) => self.resources.playback = Some(pipeline),
                Ok(Err(e)) => {
                    log::error!("Engine: audio output unavailable: {}", e);
                    self.metrics.record_error("playback", e.to_string());
                    return;
                }
                Err(e) => {
                    log::error!("Engine: audio output thread failed: {}", e);
                    self.metrics.record_error("playback", e.to_string());
                    return;
                }
            }
        }

        let Some(playback) = self.resources.playback.as_mut() else {
            return;
        };
        let ticket = playback.play(&samples, Instant::now());

        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep_until(tokio::time::Instant::from_std(ticket.ends_at)).await;
            let _ = tx.send(Internal::PlaybackDrained {
                id,
                generation: ticket.generation,
            });
        });

        if !matches!(
            self.state,
            State::Connected {
                phase: Phase::Speaking,
                ..
            }
        ) {
            self.dispatch(Event::AssistantAudioStarted { id }).await;
        }
    }
}
