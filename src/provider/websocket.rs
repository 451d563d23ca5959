//! Streaming-socket adapter
//!
//! # Connection Flow
//!
//! 1. `connect()` - WebSocket handshake, send `setup`, wait for `setupComplete`
//! 2. `send_audio_frame()` - queue a `realtimeInput` envelope (non-blocking)
//! 3. Inbound envelopes are translated to `ProviderEvent`s by a reader task
//! 4. `disconnect()` - close frame, stop both tasks
//!
//! No retries: a failed connect is reported and the caller decides whether to
//! try again. A mid-session close is reported as `ProviderEvent::Closed`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Once};

use async_trait::async_trait;
use chrono::Utc;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::{
    connect_async_with_config,
    tungstenite::{client::IntoClientRequest, Message},
    MaybeTlsStream, WebSocketStream,
};
use tokio_util::sync::CancellationToken;

use super::live_protocol::{ClientMessage, ServerMessage};
use super::{
    AdapterContext, ProviderAdapter, ProviderError, ProviderEvent, ProviderEventSink, ProviderKind,
};
use crate::audio::pcm::{decode_base64_pcm16, rate_from_mime};
use crate::audio::AudioFrame;
use crate::config::{EngineSettings, ProviderConfig};
use crate::lifecycle::ConnectPermit;
use crate::transcript::{Role, TranscriptEvent};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Flags shared with the reader task
#[derive(Debug, Default)]
struct LinkState {
    open: AtomicBool,
    /// Set by `disconnect()` so the reader does not report a fault
    closing: AtomicBool,
    /// Drop model output until the current turn ends
    suppress_output: AtomicBool,
}

pub struct WebSocketAdapter {
    events: ProviderEventSink,
    permit: ConnectPermit,
    settings: EngineSettings,
    outbound: Option<mpsc::UnboundedSender<Message>>,
    link: Arc<LinkState>,
    cancel: CancellationToken,
    reader_task: Option<JoinHandle<()>>,
    writer_task: Option<JoinHandle<()>>,
    frames_sent: u64,
}

impl WebSocketAdapter {
    pub fn new(context: AdapterContext) -> Self {
        Self {
            events: context.events,
            permit: context.permit,
            settings: context.settings,
            outbound: None,
            link: Arc::new(LinkState::default()),
            cancel: CancellationToken::new(),
            reader_task: None,
            writer_task: None,
            frames_sent: 0,
        }
    }

    fn queue(&self, message: Message) -> Result<(), ProviderError> {
        let outbound = self
            .outbound
            .as_ref()
            .ok_or_else(|| ProviderError::Disconnected("socket not open".to_string()))?;
        outbound
            .send(message)
            .map_err(|_| ProviderError::SendFailed("writer task is gone".to_string()))
    }
}

#[async_trait]
impl ProviderAdapter for WebSocketAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::WebSocket
    }

    async fn connect(&mut self, config: &ProviderConfig) -> Result<(), ProviderError> {
        if self.outbound.is_some() {
            return Err(ProviderError::ConnectionFailed(
                "adapter already connected".to_string(),
            ));
        }
        self.permit.check()?;
        if config.credential.is_empty() {
            return Err(ProviderError::AuthenticationFailed(
                "API key is empty".to_string(),
            ));
        }

        let endpoint = config.endpoint_or_default();
        let request = with_key(endpoint, config.credential.secret())
            .into_client_request()
            .map_err(|e| ProviderError::ConnectionFailed(e.to_string()))?;

        install_crypto_provider();
        log::info!("WebSocketAdapter: connecting to {}...", endpoint);

        let (ws_stream, _response) = timeout(
            self.settings.connect_timeout(),
            connect_async_with_config(request, None, true),
        )
        .await
        .map_err(|_| ProviderError::Timeout("WebSocket handshake".to_string()))?
        .map_err(handshake_error)?;

        let (mut write, mut read) = ws_stream.split();

        if let Err(e) = self.permit.check() {
            let _ = write.close().await;
            return Err(e);
        }

        let setup = ClientMessage::setup(&config.model, &config.voice, &config.instructions)
            .to_json()
            .map_err(|e| ProviderError::ProtocolError(e.to_string()))?;
        write
            .send(Message::Text(setup))
            .await
            .map_err(|e| ProviderError::SendFailed(e.to_string()))?;

        log::info!("WebSocketAdapter: setup sent, waiting for setupComplete...");

        let acknowledged =
            match timeout(self.settings.setup_timeout(), wait_for_setup(&mut read)).await {
                Ok(result) => result,
                Err(_) => Err(ProviderError::Timeout("setupComplete".to_string())),
            };
        if let Err(e) = acknowledged.and_then(|_| self.permit.check()) {
            let _ = write.close().await;
            return Err(e);
        }

        log::info!("WebSocketAdapter: session ready (model {})", config.model);

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        self.writer_task = Some(tokio::spawn(run_writer(write, outbound_rx)));
        self.reader_task = Some(tokio::spawn(run_reader(
            read,
            self.events.clone(),
            self.link.clone(),
            self.cancel.clone(),
            self.settings.default_playback_rate,
        )));
        self.outbound = Some(outbound_tx);
        self.link.open.store(true, Ordering::Release);
        Ok(())
    }

    fn send_audio_frame(&mut self, frame: &AudioFrame) -> bool {
        if !self.is_open() {
            return false;
        }
        let json = match ClientMessage::audio(frame).to_json() {
            Ok(json) => json,
            Err(e) => {
                log::warn!("WebSocketAdapter: failed to encode frame {}: {}", frame.sequence, e);
                return false;
            }
        };
        if self.queue(Message::Text(json)).is_err() {
            return false;
        }

        self.frames_sent += 1;
        if self.frames_sent % 50 == 0 {
            log::debug!(
                "WebSocketAdapter: sent {} frames (last seq {})",
                self.frames_sent,
                frame.sequence
            );
        }
        true
    }

    fn send_text(&mut self, text: &str) -> Result<(), ProviderError> {
        if !self.is_open() {
            return Err(ProviderError::Disconnected("socket not open".to_string()));
        }
        let json = ClientMessage::text(text)
            .to_json()
            .map_err(|e| ProviderError::ProtocolError(e.to_string()))?;
        self.queue(Message::Text(json))
    }

    /// The live protocol has no cancel message: output of the current turn is
    /// dropped locally until the provider ends or interrupts it.
    fn cancel_response(&mut self) {
        if self.is_open() {
            log::info!("WebSocketAdapter: suppressing output of the current turn");
            self.link.suppress_output.store(true, Ordering::Release);
        }
    }

    async fn disconnect(&mut self) {
        self.link.closing.store(true, Ordering::Release);
        self.link.open.store(false, Ordering::Release);
        self.cancel.cancel();

        // Dropping the sender lets the writer send a close frame and exit
        self.outbound.take();
        if let Some(writer) = self.writer_task.take() {
            let abort = writer.abort_handle();
            if timeout(self.settings.teardown_timeout(), writer).await.is_err() {
                log::warn!("WebSocketAdapter: close frame not flushed in time");
                abort.abort();
            }
        }
        if let Some(reader) = self.reader_task.take() {
            reader.abort();
        }
        log::info!("WebSocketAdapter: disconnected");
    }

    fn is_open(&self) -> bool {
        self.outbound.is_some() && self.link.open.load(Ordering::Acquire)
    }
}

impl Drop for WebSocketAdapter {
    fn drop(&mut self) {
        // Ensure tasks stop if dropped without disconnect()
        self.cancel.cancel();
        if let Some(reader) = self.reader_task.take() {
            reader.abort();
        }
        if let Some(writer) = self.writer_task.take() {
            writer.abort();
        }
    }
}

/// rustls needs a process-wide crypto provider before the first TLS handshake
fn install_crypto_provider() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        if rustls::crypto::ring::default_provider()
            .install_default()
            .is_err()
        {
            log::debug!("WebSocketAdapter: crypto provider already installed");
        }
    });
}

/// Append the API key as a query parameter
fn with_key(endpoint: &str, key: &str) -> String {
    let separator = if endpoint.contains('?') { '&' } else { '?' };
    format!("{}{}key={}", endpoint, separator, key)
}

fn handshake_error(e: tokio_tungstenite::tungstenite::Error) -> ProviderError {
    use tokio_tungstenite::tungstenite::Error;
    match e {
        Error::Http(response) if matches!(response.status().as_u16(), 401 | 403) => {
            ProviderError::AuthenticationFailed(format!("HTTP {}", response.status()))
        }
        other => ProviderError::ConnectionFailed(other.to_string()),
    }
}

enum Inbound {
    Json(String),
    Invalid(String),
    Close(String),
    Skip,
}

/// JSON may arrive in text or binary frames
fn classify(message: Message) -> Inbound {
    match message {
        Message::Text(text) => Inbound::Json(text),
        Message::Binary(bytes) => match String::from_utf8(bytes) {
            Ok(text) => Inbound::Json(text),
            Err(e) => Inbound::Invalid(format!("binary frame is not UTF-8: {}", e)),
        },
        Message::Close(frame) => Inbound::Close(
            frame
                .map(|f| format!("closed by server ({}): {}", f.code, f.reason))
                .unwrap_or_else(|| "closed by server".to_string()),
        ),
        _ => Inbound::Skip, // Ignore ping/pong
    }
}

async fn wait_for_setup(read: &mut SplitStream<WsStream>) -> Result<(), ProviderError> {
    while let Some(next) = read.next().await {
        let message = next.map_err(|e| ProviderError::ConnectionFailed(e.to_string()))?;
        match classify(message) {
            Inbound::Json(text) => match ServerMessage::parse(&text) {
                Ok(msg) if msg.is_setup_complete() => return Ok(()),
                Ok(msg) => {
                    if let Some(message) = msg.error_message() {
                        return Err(ProviderError::ProviderReported(message.to_string()));
                    }
                    log::debug!("WebSocketAdapter: ignoring message before setupComplete");
                }
                Err(e) => log::warn!("WebSocketAdapter: failed to parse message: {}", e),
            },
            Inbound::Invalid(reason) => log::warn!("WebSocketAdapter: {}", reason),
            Inbound::Close(reason) => return Err(ProviderError::Disconnected(reason)),
            Inbound::Skip => {}
        }
    }
    Err(ProviderError::Disconnected(
        "stream ended before setupComplete".to_string(),
    ))
}

async fn run_writer(
    mut write: SplitSink<WsStream, Message>,
    mut outbound: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(message) = outbound.recv().await {
        if let Err(e) = write.send(message).await {
            log::warn!("WebSocketAdapter: send failed: {}", e);
            break;
        }
    }
    if let Err(e) = write.close().await {
        log::debug!("WebSocketAdapter: error closing socket: {}", e);
    }
    log::debug!("WebSocketAdapter: writer task exiting");
}

async fn run_reader(
    mut read: SplitStream<WsStream>,
    events: ProviderEventSink,
    link: Arc<LinkState>,
    cancel: CancellationToken,
    default_rate: u32,
) {
    let mut received: u64 = 0;

    let lost = loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break None,
            next = read.next() => next,
        };

        match next {
            Some(Ok(message)) => match classify(message) {
                Inbound::Json(text) => {
                    received += 1;
                    if received % 50 == 0 {
                        log::debug!("WebSocketAdapter: received {} messages", received);
                    }
                    for event in translate(&text, default_rate, &link.suppress_output) {
                        events.emit(event);
                    }
                }
                Inbound::Invalid(message) => {
                    log::warn!("WebSocketAdapter: {}", message);
                    events.emit(ProviderEvent::ProtocolError { message });
                }
                Inbound::Close(reason) => break Some(reason),
                Inbound::Skip => {}
            },
            Some(Err(e)) => break Some(e.to_string()),
            None => break Some("stream ended".to_string()),
        }
    };

    link.open.store(false, Ordering::Release);
    if let Some(reason) = lost {
        if !link.closing.load(Ordering::Acquire) {
            log::warn!("WebSocketAdapter: connection lost: {}", reason);
            events.emit(ProviderEvent::Closed { reason });
        }
    }
    log::debug!("WebSocketAdapter: reader task exiting");
}

/// Translate one inbound envelope into events, in the order the content
/// describes them: user transcription, model output, turn markers.
fn translate(text: &str, default_rate: u32, suppress_output: &AtomicBool) -> Vec<ProviderEvent> {
    let msg = match ServerMessage::parse(text) {
        Ok(msg) => msg,
        Err(e) => {
            log::warn!("WebSocketAdapter: failed to parse message: {}", e);
            return vec![ProviderEvent::ProtocolError {
                message: e.to_string(),
            }];
        }
    };

    if let Some(message) = msg.error_message() {
        return vec![ProviderEvent::ProviderError {
            message: message.to_string(),
        }];
    }

    let Some(content) = msg.server_content else {
        return Vec::new();
    };

    let now = Utc::now();
    let suppressed = suppress_output.load(Ordering::Acquire);
    let mut events = Vec::new();

    if let Some(transcription) = content.input_transcription {
        if transcription.finished || !transcription.text.is_empty() {
            events.push(ProviderEvent::Transcript(TranscriptEvent {
                role: Role::User,
                text: transcription.text,
                is_final: transcription.finished,
                received_at: now,
            }));
        }
    }

    if let Some(turn) = content.model_turn.filter(|_| !suppressed) {
        for part in turn.parts {
            if let Some(text) = part.text.filter(|t| !t.is_empty()) {
                events.push(ProviderEvent::Transcript(TranscriptEvent {
                    role: Role::Assistant,
                    text,
                    is_final: false,
                    received_at: now,
                }));
            }
            if let Some(blob) = part.inline_data {
                if !blob.mime_type.starts_with("audio/") {
                    log::debug!("WebSocketAdapter: skipping inline {}", blob.mime_type);
                    continue;
                }
                match decode_base64_pcm16(&blob.data) {
                    Ok(samples) => events.push(ProviderEvent::AssistantAudio {
                        samples,
                        sample_rate: rate_from_mime(&blob.mime_type).unwrap_or(default_rate),
                    }),
                    Err(e) => {
                        log::warn!("WebSocketAdapter: bad audio payload: {}", e);
                        events.push(ProviderEvent::ProtocolError {
                            message: format!("bad audio payload: {}", e),
                        });
                    }
                }
            }
        }
    }

    if let Some(transcription) = content.output_transcription.filter(|_| !suppressed) {
        if !transcription.text.is_empty() {
            events.push(ProviderEvent::Transcript(TranscriptEvent {
                role: Role::Assistant,
                text: transcription.text,
                is_final: false,
                received_at: now,
            }));
        }
    }

    if content.interrupted {
        suppress_output.store(false, Ordering::Release);
        events.push(ProviderEvent::Interrupted);
    }
    if content.turn_complete {
        suppress_output.store(false, Ordering::Release);
        events.push(ProviderEvent::TurnComplete);
    }
    events
}
