//! End-to-end tests of the session engine
//!
//! A scripted adapter stands in for the provider and fake devices stand in
//! for the microphone and speaker, so these run without network or audio
//! hardware:
//!
//! ```bash
//! cargo test --test engine_scenarios
//! ```

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::mpsc;

use duplex_voice::audio::{
    AudioError, AudioFrame, AudioInput, AudioOutput, CaptureStream, FrameSink, PlaybackSink,
};
use duplex_voice::config::{EngineSettings, ProviderConfig};
use duplex_voice::lifecycle::ConnectPermit;
use duplex_voice::provider::{
    AdapterContext, AdapterFactory, ProviderAdapter, ProviderError, ProviderEvent,
    ProviderEventSink, ProviderKind,
};
use duplex_voice::session::{
    ChannelObserver, ConversationSink, EngineDeps, EngineHandle, ObserverEvent, SessionError,
};
use duplex_voice::state_machine::ConnectionState;
use duplex_voice::transcript::{Role, TranscriptEntry, TranscriptEvent};

// ============================================================================
// Fakes
// ============================================================================

/// Everything the fakes record, shared with the test body
#[derive(Default)]
struct Rig {
    deny_microphone: AtomicBool,
    mic_opened: AtomicUsize,
    mic_started: AtomicUsize,
    mic_released: AtomicUsize,
    frame_sink: Mutex<Option<Arc<dyn FrameSink>>>,

    outputs_opened: AtomicUsize,
    outputs_closed: AtomicUsize,

    adapters_created: AtomicUsize,
    adapters_disconnected: AtomicUsize,
    frames_sent: AtomicUsize,
    cancels: AtomicUsize,
    texts: Mutex<Vec<String>>,
    events: Mutex<Option<ProviderEventSink>>,
    connect_failure: Mutex<Option<ProviderError>>,
    connects_started: AtomicUsize,
    stall_connect: AtomicBool,
}

impl Rig {
    fn emit(&self, event: ProviderEvent) {
        let events = self.events.lock().unwrap();
        assert!(events.as_ref().expect("adapter created").emit(event));
    }

    fn user(&self, text: &str, is_final: bool) {
        let event = if is_final {
            TranscriptEvent::final_text(Role::User, text)
        } else {
            TranscriptEvent::interim(Role::User, text)
        };
        self.emit(ProviderEvent::Transcript(event));
    }

    fn assistant(&self, text: &str) {
        self.emit(ProviderEvent::Transcript(TranscriptEvent::interim(
            Role::Assistant,
            text,
        )));
    }

    fn deliver_frame(&self, sequence: u64) {
        let sink = self.frame_sink.lock().unwrap().clone();
        sink.expect("microphone opened").deliver(AudioFrame {
            sequence,
            samples: vec![0; 4096],
            sample_rate: 16_000,
        });
    }

    fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

struct FakeMicrophone(Arc<Rig>);

impl AudioInput for FakeMicrophone {
    fn open(&self, sink: Arc<dyn FrameSink>) -> Result<Box<dyn CaptureStream>, AudioError> {
        if self.0.deny_microphone.load(Ordering::SeqCst) {
            return Err(AudioError::PermissionDenied("denied by user".to_string()));
        }
        self.0.mic_opened.fetch_add(1, Ordering::SeqCst);
        *self.0.frame_sink.lock().unwrap() = Some(sink);
        Ok(Box::new(FakeCapture(self.0.clone())))
    }
}

struct FakeCapture(Arc<Rig>);

impl CaptureStream for FakeCapture {
    fn start(&mut self) -> Result<(), AudioError> {
        self.0.mic_started.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stop(self: Box<Self>) {
        self.0.mic_released.fetch_add(1, Ordering::SeqCst);
    }
}

struct FakeSpeaker(Arc<Rig>);

impl AudioOutput for FakeSpeaker {
    fn open(&self, _sample_rate: u32) -> Result<Box<dyn PlaybackSink>, AudioError> {
        self.0.outputs_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeOutputStream(self.0.clone())))
    }
}

struct FakeOutputStream(Arc<Rig>);

impl PlaybackSink for FakeOutputStream {
    fn enqueue(&mut self, _samples: &[f32]) {}
    fn clear(&mut self) {}
    fn close(self: Box<Self>) {
        self.0.outputs_closed.fetch_add(1, Ordering::SeqCst);
    }
}

struct ScriptedAdapter {
    rig: Arc<Rig>,
    permit: ConnectPermit,
    open: bool,
    disconnected: bool,
}

#[async_trait]
impl ProviderAdapter for ScriptedAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::WebSocket
    }

    async fn connect(&mut self, _config: &ProviderConfig) -> Result<(), ProviderError> {
        self.permit.check()?;
        self.rig.connects_started.fetch_add(1, Ordering::SeqCst);
        if self.rig.stall_connect.load(Ordering::SeqCst) {
            // Setup is never acknowledged
            std::future::pending::<()>().await;
        }
        if let Some(err) = self.rig.connect_failure.lock().unwrap().take() {
            return Err(err);
        }
        self.open = true;
        Ok(())
    }

    fn send_audio_frame(&mut self, _frame: &AudioFrame) -> bool {
        if !self.open {
            return false;
        }
        self.rig.frames_sent.fetch_add(1, Ordering::SeqCst);
        true
    }

    fn send_text(&mut self, text: &str) -> Result<(), ProviderError> {
        self.rig.texts.lock().unwrap().push(text.to_string());
        Ok(())
    }

    fn cancel_response(&mut self) {
        self.rig.cancels.fetch_add(1, Ordering::SeqCst);
    }

    async fn disconnect(&mut self) {
        self.open = false;
        if !self.disconnected {
            self.disconnected = true;
            self.rig
                .adapters_disconnected
                .fetch_add(1, Ordering::SeqCst);
        }
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

struct ScriptedFactory(Arc<Rig>);

impl AdapterFactory for ScriptedFactory {
    fn create(
        &self,
        _kind: ProviderKind,
        context: AdapterContext,
    ) -> Result<Box<dyn ProviderAdapter>, ProviderError> {
        self.0.adapters_created.fetch_add(1, Ordering::SeqCst);
        *self.0.events.lock().unwrap() = Some(context.events);
        Ok(Box::new(ScriptedAdapter {
            rig: self.0.clone(),
            permit: context.permit,
            open: false,
            disconnected: false,
        }))
    }
}

#[derive(Default)]
struct RecordingSink(Mutex<Vec<TranscriptEntry>>);

#[async_trait]
impl ConversationSink for RecordingSink {
    async fn export(&self, entries: Vec<TranscriptEntry>) -> Result<(), String> {
        *self.0.lock().unwrap() = entries;
        Ok(())
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn spawn_engine(
    rig: &Arc<Rig>,
    sink: Option<Arc<dyn ConversationSink>>,
) -> (EngineHandle, mpsc::UnboundedReceiver<ObserverEvent>) {
    init_logging();
    let (observer, rx) = ChannelObserver::new();
    let handle = EngineHandle::spawn(EngineDeps {
        input: Arc::new(FakeMicrophone(rig.clone())),
        output: Arc::new(FakeSpeaker(rig.clone())),
        adapters: Arc::new(ScriptedFactory(rig.clone())),
        observer: Arc::new(observer),
        sink,
        settings: EngineSettings::default(),
    });
    (handle, rx)
}

fn config() -> ProviderConfig {
    ProviderConfig::websocket("test-key").with_greeting("Say hello to the user.")
}

fn drain(rx: &mut mpsc::UnboundedReceiver<ObserverEvent>) -> Vec<ObserverEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn states(events: &[ObserverEvent]) -> Vec<ConnectionState> {
    events
        .iter()
        .filter_map(|e| match e {
            ObserverEvent::StateChanged(s) => Some(*s),
            _ => None,
        })
        .collect()
}

fn contents(entries: &[TranscriptEntry]) -> Vec<(Role, &str)> {
    entries
        .iter()
        .map(|e| (e.role, e.content.as_str()))
        .collect()
}

async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 2s");
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn scenario_a_greeting_then_user_then_ai() {
    let rig = Arc::new(Rig::default());
    let (handle, mut observed) = spawn_engine(&rig, None);

    handle.connect(config()).await.unwrap();
    assert_eq!(handle.state(), ConnectionState::Connected);
    assert_eq!(Rig::count(&rig.mic_started), 1);

    handle.start_conversation().await.unwrap();
    assert_eq!(
        *rig.texts.lock().unwrap(),
        vec!["Say hello to the user.".to_string()]
    );
    assert_eq!(handle.state(), ConnectionState::Processing);

    rig.user("안녕", false);
    rig.user("하세요", false);
    rig.user("안녕하세요", true);
    rig.assistant("반가워요! ");
    rig.assistant("오늘 어땠어요?");
    rig.emit(ProviderEvent::TurnComplete);

    let transcript = handle.transcript().await.unwrap();
    assert_eq!(
        contents(&transcript),
        vec![
            (Role::User, "안녕하세요"),
            (Role::Assistant, "반가워요! 오늘 어땠어요?")
        ]
    );
    assert_eq!(handle.state(), ConnectionState::Connected);

    let events = drain(&mut observed);
    let published = states(&events);
    assert_eq!(
        &published[..3],
        &[
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Processing
        ]
    );
    for pair in published.windows(2) {
        assert!(
            !(pair[0].is_active_phase() && pair[1].is_active_phase()),
            "skipped connected between {:?}",
            pair
        );
    }

    let appended: Vec<_> = events
        .iter()
        .filter(|e| matches!(e, ObserverEvent::Transcript(_)))
        .collect();
    assert_eq!(appended.len(), 2);
    assert!(events.iter().any(|e| matches!(
        e,
        ObserverEvent::Interim { role: Role::User, text } if text == "안녕하세요"
    )));
}

#[tokio::test]
async fn scenario_b_ai_text_before_user_final() {
    let rig = Arc::new(Rig::default());
    let (handle, _observed) = spawn_engine(&rig, None);
    handle.connect(config()).await.unwrap();

    rig.user("what's the", false);
    rig.assistant("It is sunny.");
    rig.emit(ProviderEvent::TurnComplete);

    // Held back until the utterance is final
    assert!(handle.transcript().await.unwrap().is_empty());

    rig.user("what's the weather", true);
    let transcript = handle.transcript().await.unwrap();
    assert_eq!(
        contents(&transcript),
        vec![
            (Role::User, "what's the weather"),
            (Role::Assistant, "It is sunny.")
        ]
    );
    assert!(transcript[0].timestamp <= transcript[1].timestamp);
}

#[tokio::test]
async fn detected_speech_orders_ai_turn_after_user_final() {
    // Transcription that only delivers the completed utterance, after the reply
    let rig = Arc::new(Rig::default());
    let (handle, _observed) = spawn_engine(&rig, None);
    handle.connect(config()).await.unwrap();

    rig.emit(ProviderEvent::SpeechStarted);
    rig.assistant("It is sunny.");
    rig.emit(ProviderEvent::TurnComplete);
    assert!(handle.transcript().await.unwrap().is_empty());

    rig.user("what's the weather", true);
    let transcript = handle.transcript().await.unwrap();
    assert_eq!(
        contents(&transcript),
        vec![
            (Role::User, "what's the weather"),
            (Role::Assistant, "It is sunny.")
        ]
    );
}

#[tokio::test]
async fn scenario_c_transport_error_releases_microphone() {
    let rig = Arc::new(Rig::default());
    let (handle, mut observed) = spawn_engine(&rig, None);
    handle.connect(config()).await.unwrap();

    rig.deliver_frame(0);
    handle.metrics().await.unwrap();
    assert_eq!(Rig::count(&rig.frames_sent), 1);

    rig.emit(ProviderEvent::Closed {
        reason: "connection reset".to_string(),
    });
    handle.metrics().await.unwrap();

    assert_eq!(handle.state(), ConnectionState::Error);
    assert_eq!(Rig::count(&rig.mic_released), 1);
    assert_eq!(Rig::count(&rig.adapters_disconnected), 1);

    // A late callback from the released device goes nowhere
    rig.deliver_frame(1);
    handle.metrics().await.unwrap();
    assert_eq!(Rig::count(&rig.frames_sent), 1);

    let events = drain(&mut observed);
    assert!(events
        .iter()
        .any(|e| matches!(e, ObserverEvent::Error(SessionError::Transport(_)))));
    assert_eq!(states(&events).last(), Some(&ConnectionState::Error));
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn disconnect_many_times_releases_once() {
    let rig = Arc::new(Rig::default());
    let (handle, _observed) = spawn_engine(&rig, None);
    handle.connect(config()).await.unwrap();
    rig.emit(ProviderEvent::AssistantAudio {
        samples: vec![0; 240],
        sample_rate: 24_000,
    });
    handle.metrics().await.unwrap();
    assert_eq!(Rig::count(&rig.outputs_opened), 1);

    let results =
        futures_util::future::join_all((0..5).map(|_| handle.disconnect())).await;
    assert_eq!(results.iter().filter(|first| **first).count(), 1);

    assert_eq!(handle.state(), ConnectionState::Idle);
    assert_eq!(Rig::count(&rig.mic_released), 1);
    assert_eq!(Rig::count(&rig.adapters_disconnected), 1);
    assert_eq!(Rig::count(&rig.outputs_closed), 1);

    assert!(!handle.disconnect().await);
    assert_eq!(Rig::count(&rig.mic_released), 1);
}

#[tokio::test]
async fn reconnect_after_disconnect_reacquires_everything() {
    let rig = Arc::new(Rig::default());
    let (handle, _observed) = spawn_engine(&rig, None);

    handle.connect(config()).await.unwrap();
    rig.user("first session", true);
    let old_events = rig.events.lock().unwrap().clone().unwrap();
    let old_frames = rig.frame_sink.lock().unwrap().clone().unwrap();
    assert!(handle.disconnect().await);

    handle.connect(config()).await.unwrap();
    assert_eq!(handle.state(), ConnectionState::Connected);
    assert_eq!(Rig::count(&rig.mic_opened), 2);
    assert_eq!(Rig::count(&rig.mic_started), 2);
    assert_eq!(Rig::count(&rig.adapters_created), 2);
    assert!(handle.transcript().await.unwrap().is_empty());

    // Nothing from the previous session leaks into this one
    old_events.emit(ProviderEvent::Transcript(TranscriptEvent::final_text(
        Role::User,
        "stale",
    )));
    old_frames.deliver(AudioFrame {
        sequence: 9,
        samples: vec![0; 4096],
        sample_rate: 16_000,
    });
    assert!(handle.transcript().await.unwrap().is_empty());
    assert_eq!(Rig::count(&rig.frames_sent), 0);

    // And the new session can be torn down again
    assert!(handle.disconnect().await);
    assert_eq!(Rig::count(&rig.mic_released), 2);
}

#[tokio::test]
async fn dropping_every_handle_tears_down() {
    let rig = Arc::new(Rig::default());
    let (handle, _observed) = spawn_engine(&rig, None);
    handle.connect(config()).await.unwrap();

    drop(handle);
    eventually(|| Rig::count(&rig.mic_released) == 1).await;
    eventually(|| Rig::count(&rig.adapters_disconnected) == 1).await;
}

#[tokio::test]
async fn disconnect_while_connecting_closes_transport() {
    let rig = Arc::new(Rig::default());
    rig.stall_connect.store(true, Ordering::SeqCst);
    let (handle, _observed) = spawn_engine(&rig, None);

    let connecting = tokio::spawn({
        let handle = handle.clone();
        async move { handle.connect(config()).await }
    });
    eventually(|| Rig::count(&rig.connects_started) == 1).await;
    assert_eq!(handle.state(), ConnectionState::Connecting);

    let started = Instant::now();
    assert!(handle.disconnect().await);
    // Returns once released, not when the setup timeout expires
    assert!(started.elapsed() < EngineSettings::default().setup_timeout());
    assert_eq!(Rig::count(&rig.adapters_disconnected), 1);
    assert_eq!(Rig::count(&rig.mic_released), 1);
    assert_eq!(handle.state(), ConnectionState::Idle);

    let result = connecting.await.unwrap();
    assert!(matches!(result, Err(SessionError::Connect(_))), "got {:?}", result);

    // The next session connects normally
    rig.stall_connect.store(false, Ordering::SeqCst);
    handle.connect(config()).await.unwrap();
    assert_eq!(handle.state(), ConnectionState::Connected);
    assert_eq!(Rig::count(&rig.adapters_created), 2);
    assert_eq!(Rig::count(&rig.adapters_disconnected), 1);
}

#[tokio::test]
async fn finish_exports_transcript_then_disconnects() {
    let rig = Arc::new(Rig::default());
    let sink = Arc::new(RecordingSink::default());
    let (handle, _observed) = spawn_engine(&rig, Some(sink.clone()));
    handle.connect(config()).await.unwrap();

    rig.user("good night", true);
    rig.assistant("Sleep well.");
    rig.emit(ProviderEvent::TurnComplete);

    let entries = handle.finish().await.unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(*sink.0.lock().unwrap(), entries);
    assert_eq!(handle.state(), ConnectionState::Idle);
    assert_eq!(Rig::count(&rig.mic_released), 1);

    // The log stays readable after the session ended
    assert_eq!(handle.transcript().await.unwrap(), entries);
}

// ============================================================================
// Connect failures
// ============================================================================

#[tokio::test]
async fn microphone_denied_is_permission_error() {
    let rig = Arc::new(Rig::default());
    rig.deny_microphone.store(true, Ordering::SeqCst);
    let (handle, _observed) = spawn_engine(&rig, None);

    let err = handle.connect(config()).await.unwrap_err();
    assert!(matches!(err, SessionError::Permission(_)));
    assert_eq!(handle.state(), ConnectionState::Error);
    assert_eq!(Rig::count(&rig.adapters_created), 0);

    handle.reset().await.unwrap();
    assert_eq!(handle.state(), ConnectionState::Idle);
}

#[tokio::test]
async fn handshake_failure_releases_microphone_and_allows_retry() {
    let rig = Arc::new(Rig::default());
    *rig.connect_failure.lock().unwrap() =
        Some(ProviderError::AuthenticationFailed("invalid key".to_string()));
    let (handle, _observed) = spawn_engine(&rig, None);

    let err = handle.connect(config()).await.unwrap_err();
    assert!(matches!(err, SessionError::Connect(_)));
    assert_eq!(handle.state(), ConnectionState::Error);
    assert_eq!(Rig::count(&rig.mic_released), 1);
    assert_eq!(Rig::count(&rig.adapters_disconnected), 1);

    // Retry straight from the error state
    handle.connect(config()).await.unwrap();
    assert_eq!(handle.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn provider_reported_error_surfaces_message() {
    let rig = Arc::new(Rig::default());
    let (handle, mut observed) = spawn_engine(&rig, None);
    handle.connect(config()).await.unwrap();

    rig.emit(ProviderEvent::ProviderError {
        message: "quota exceeded".to_string(),
    });
    handle.metrics().await.unwrap();

    assert_eq!(handle.state(), ConnectionState::Error);
    assert!(drain(&mut observed).iter().any(|e| matches!(
        e,
        ObserverEvent::Error(SessionError::ProviderReported(msg)) if msg == "quota exceeded"
    )));
}

#[tokio::test]
async fn protocol_errors_do_not_end_the_session() {
    let rig = Arc::new(Rig::default());
    let (handle, _observed) = spawn_engine(&rig, None);
    handle.connect(config()).await.unwrap();

    rig.emit(ProviderEvent::ProtocolError {
        message: "unexpected envelope".to_string(),
    });
    let metrics = handle.metrics().await.unwrap();
    assert_eq!(metrics.protocol_errors, 1);
    assert_eq!(handle.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn second_held_response_is_reported_and_dropped() {
    let rig = Arc::new(Rig::default());
    let (handle, mut observed) = spawn_engine(&rig, None);
    handle.connect(config()).await.unwrap();

    rig.user("so about", false);
    rig.assistant("First answer.");
    rig.emit(ProviderEvent::TurnComplete);
    rig.assistant("Second answer.");
    rig.emit(ProviderEvent::TurnComplete);

    let metrics = handle.metrics().await.unwrap();
    assert_eq!(metrics.pending_overflows, 1);
    assert_ne!(handle.state(), ConnectionState::Error);
    assert!(drain(&mut observed)
        .iter()
        .any(|e| matches!(e, ObserverEvent::Error(SessionError::Protocol(_)))));

    rig.user("so about that", true);
    let transcript = handle.transcript().await.unwrap();
    assert_eq!(
        contents(&transcript),
        vec![
            (Role::User, "so about that"),
            (Role::Assistant, "First answer.")
        ]
    );
}

// ============================================================================
// Commands
// ============================================================================

#[tokio::test]
async fn commands_rejected_in_wrong_state() {
    let rig = Arc::new(Rig::default());
    let (handle, _observed) = spawn_engine(&rig, None);

    assert!(matches!(
        handle.start_conversation().await,
        Err(SessionError::InvalidState { .. })
    ));
    assert!(matches!(
        handle.interrupt().await,
        Err(SessionError::InvalidState { .. })
    ));
    assert!(matches!(
        handle.reset().await,
        Err(SessionError::InvalidState { .. })
    ));

    handle.connect(config()).await.unwrap();
    assert!(matches!(
        handle.connect(config()).await,
        Err(SessionError::InvalidState {
            operation: "connect",
            ..
        })
    ));

    handle.start_conversation().await.unwrap();
    assert!(matches!(
        handle.start_conversation().await,
        Err(SessionError::InvalidState { .. })
    ));
    assert_eq!(rig.texts.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn interrupt_removes_pending_response() {
    let rig = Arc::new(Rig::default());
    let (handle, _observed) = spawn_engine(&rig, None);
    handle.connect(config()).await.unwrap();

    rig.user("tell me a", false);
    rig.assistant("Once upon a time");
    rig.emit(ProviderEvent::TurnComplete);

    assert!(handle.interrupt().await.unwrap());
    rig.user("tell me a joke", true);

    let transcript = handle.transcript().await.unwrap();
    assert_eq!(contents(&transcript), vec![(Role::User, "tell me a joke")]);
}

#[tokio::test]
async fn interrupt_mid_response_cancels_and_drops_trailing_text() {
    let rig = Arc::new(Rig::default());
    let (handle, _observed) = spawn_engine(&rig, None);
    handle.connect(config()).await.unwrap();

    rig.user("hi", true);
    rig.assistant("Hello, let me tell you ");
    handle.transcript().await.unwrap();

    assert!(handle.interrupt().await.unwrap());
    assert_eq!(Rig::count(&rig.cancels), 1);

    rig.assistant("about my day");
    rig.emit(ProviderEvent::TurnComplete);
    rig.user("stop", true);
    rig.assistant("Okay.");
    rig.emit(ProviderEvent::TurnComplete);

    let transcript = handle.transcript().await.unwrap();
    assert_eq!(
        contents(&transcript),
        vec![
            (Role::User, "hi"),
            (Role::User, "stop"),
            (Role::Assistant, "Okay.")
        ]
    );
}

#[tokio::test]
async fn interrupt_with_nothing_in_flight_is_noop() {
    let rig = Arc::new(Rig::default());
    let (handle, _observed) = spawn_engine(&rig, None);
    handle.connect(config()).await.unwrap();

    assert!(!handle.interrupt().await.unwrap());
    assert_eq!(Rig::count(&rig.cancels), 0);
    assert_eq!(handle.state(), ConnectionState::Connected);
}

// ============================================================================
// Playback
// ============================================================================

#[tokio::test]
async fn speaking_lasts_until_playback_drains() {
    let rig = Arc::new(Rig::default());
    let (handle, _observed) = spawn_engine(&rig, None);
    handle.connect(config()).await.unwrap();

    // 200 ms at 24 kHz
    rig.emit(ProviderEvent::AssistantAudio {
        samples: vec![100; 4800],
        sample_rate: 24_000,
    });
    rig.emit(ProviderEvent::TurnComplete);
    handle.metrics().await.unwrap();
    assert_eq!(handle.state(), ConnectionState::Speaking);

    tokio::time::timeout(
        Duration::from_secs(2),
        handle.wait_for_state(ConnectionState::Connected),
    )
    .await
    .expect("playback drained")
    .unwrap();
}

#[tokio::test]
async fn rate_change_reopens_output() {
    let rig = Arc::new(Rig::default());
    let (handle, _observed) = spawn_engine(&rig, None);
    handle.connect(config()).await.unwrap();

    rig.emit(ProviderEvent::AssistantAudio {
        samples: vec![0; 240],
        sample_rate: 24_000,
    });
    rig.emit(ProviderEvent::AssistantAudio {
        samples: vec![0; 240],
        sample_rate: 24_000,
    });
    rig.emit(ProviderEvent::AssistantAudio {
        samples: vec![0; 160],
        sample_rate: 16_000,
    });
    let metrics = handle.metrics().await.unwrap();

    assert_eq!(metrics.audio_chunks_received, 3);
    assert_eq!(Rig::count(&rig.outputs_opened), 2);
    assert_eq!(Rig::count(&rig.outputs_closed), 1);
}

#[tokio::test]
async fn provider_barge_in_stops_speaking() {
    let rig = Arc::new(Rig::default());
    let (handle, _observed) = spawn_engine(&rig, None);
    handle.connect(config()).await.unwrap();

    // One second of audio
    rig.emit(ProviderEvent::AssistantAudio {
        samples: vec![0; 24_000],
        sample_rate: 24_000,
    });
    handle.metrics().await.unwrap();
    assert_eq!(handle.state(), ConnectionState::Speaking);

    rig.emit(ProviderEvent::Interrupted);
    let metrics = handle.metrics().await.unwrap();
    assert_eq!(handle.state(), ConnectionState::Listening);
    assert_eq!(metrics.interrupts, 1);
}
