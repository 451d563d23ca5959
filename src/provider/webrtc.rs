//! Peer-connection adapter
//!
//! The media engine (ICE, DTLS/SRTP, Opus) is supplied by the embedder
//! through `PeerConnector`; this adapter drives it:
//!
//! 1. Create a peer with one outbound audio track and a data channel
//! 2. Exchange SDP offer/answer over HTTP (`SdpSignaler`)
//! 3. Wait for the data channel, `session.created`, send `session.update`,
//!    wait for `session.updated`
//! 4. Remote audio and data-channel events are translated to `ProviderEvent`s
//!
//! The connect permit is re-checked after every suspension point so a
//! teardown that starts mid-negotiation cannot be raced by this connection.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use super::realtime_protocol::{ClientEvent, ServerEvent};
use super::{
    AdapterContext, ProviderAdapter, ProviderError, ProviderEvent, ProviderEventSink, ProviderKind,
};
use crate::audio::AudioFrame;
use crate::config::{EngineSettings, ProviderConfig};
use crate::lifecycle::ConnectPermit;
use crate::transcript::{Role, TranscriptEvent};

/// What the media engine reports back
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    DataChannelOpen,
    DataChannelMessage(String),
    /// Decoded remote track audio
    RemoteAudio { samples: Vec<i16>, sample_rate: u32 },
    /// ICE/DTLS failure or remote hang-up
    ConnectionLost(String),
}

/// Creates peer connections. Implemented by the embedder's media engine.
#[async_trait]
pub trait PeerConnector: Send + Sync {
    /// A new peer with one send-only audio track (16 kHz mono) and an
    /// ordered data channel. Events are delivered on `events`.
    async fn create_peer(
        &self,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Box<dyn PeerSession>, ProviderError>;
}

/// One negotiated peer connection
#[async_trait]
pub trait PeerSession: Send {
    async fn create_offer(&mut self) -> Result<String, ProviderError>;

    async fn apply_answer(&mut self, sdp: &str) -> Result<(), ProviderError>;

    /// Push one frame onto the outbound track. False if the track is not live.
    fn send_audio(&mut self, frame: &AudioFrame) -> bool;

    /// Send one message on the data channel. False if the channel is not open.
    fn send_data(&mut self, message: &str) -> bool;

    async fn close(&mut self);
}

/// Exchanges an SDP offer for the provider's answer
#[async_trait]
pub trait SdpSignaler: Send + Sync {
    async fn exchange(
        &self,
        endpoint: &str,
        model: &str,
        token: &str,
        offer: &str,
    ) -> Result<String, ProviderError>;
}

/// API error response
#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// `POST {endpoint}?model=...` with `Content-Type: application/sdp`
#[derive(Debug, Clone)]
pub struct HttpSignaler {
    client: Client,
}

impl HttpSignaler {
    pub fn new() -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ProviderError::ConnectionFailed(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl SdpSignaler for HttpSignaler {
    async fn exchange(
        &self,
        endpoint: &str,
        model: &str,
        token: &str,
        offer: &str,
    ) -> Result<String, ProviderError> {
        let response = self
            .client
            .post(endpoint)
            .query(&[("model", model)])
            .header("Authorization", format!("Bearer {}", token))
            .header("Content-Type", "application/sdp")
            .body(offer.to_string())
            .send()
            .await
            .map_err(|e| ProviderError::ConnectionFailed(e.to_string()))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if status.is_success() {
            log::info!("WebRtcAdapter: SDP answer received ({} bytes)", body.len());
            return Ok(body);
        }

        // Parse error response
        let message = match serde_json::from_str::<ApiErrorResponse>(&body) {
            Ok(error_response) => error_response.error.message,
            Err(_) => body,
        };
        log::error!("WebRtcAdapter: signalling error ({}): {}", status.as_u16(), message);

        if matches!(status.as_u16(), 401 | 403) {
            Err(ProviderError::AuthenticationFailed(message))
        } else {
            Err(ProviderError::ConnectionFailed(format!(
                "signalling failed ({}): {}",
                status.as_u16(),
                message
            )))
        }
    }
}

pub struct WebRtcAdapter {
    events: ProviderEventSink,
    permit: ConnectPermit,
    settings: EngineSettings,
    connector: Arc<dyn PeerConnector>,
    signaler: Arc<dyn SdpSignaler>,
    peer: Option<Box<dyn PeerSession>>,
    open: Arc<AtomicBool>,
    closing: Arc<AtomicBool>,
    pump_task: Option<JoinHandle<()>>,
    frames_sent: u64,
}

impl WebRtcAdapter {
    pub fn new(
        context: AdapterContext,
        connector: Arc<dyn PeerConnector>,
        signaler: Arc<dyn SdpSignaler>,
    ) -> Self {
        Self {
            events: context.events,
            permit: context.permit,
            settings: context.settings,
            connector,
            signaler,
            peer: None,
            open: Arc::new(AtomicBool::new(false)),
            closing: Arc::new(AtomicBool::new(false)),
            pump_task: None,
            frames_sent: 0,
        }
    }

    fn send_event(&mut self, event: &ClientEvent) -> Result<(), ProviderError> {
        let json = event
            .to_json()
            .map_err(|e| ProviderError::ProtocolError(e.to_string()))?;
        let peer = self
            .peer
            .as_mut()
            .ok_or_else(|| ProviderError::Disconnected("peer not connected".to_string()))?;
        if peer.send_data(&json) {
            Ok(())
        } else {
            Err(ProviderError::SendFailed("data channel not open".to_string()))
        }
    }
}

#[async_trait]
impl ProviderAdapter for WebRtcAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::WebRtc
    }

    async fn connect(&mut self, config: &ProviderConfig) -> Result<(), ProviderError> {
        if self.peer.is_some() {
            return Err(ProviderError::ConnectionFailed(
                "adapter already connected".to_string(),
            ));
        }
        self.permit.check()?;
        if config.credential.is_empty() {
            return Err(ProviderError::AuthenticationFailed(
                "session token is empty".to_string(),
            ));
        }

        log::info!("WebRtcAdapter: creating peer connection...");

        let (peer_tx, mut peer_rx) = mpsc::unbounded_channel();
        let mut peer = self.connector.create_peer(peer_tx).await?;

        let negotiated = negotiate(
            &self.permit,
            &self.settings,
            &self.signaler,
            peer.as_mut(),
            &mut peer_rx,
            config,
        )
        .await;
        if let Err(e) = negotiated {
            log::warn!("WebRtcAdapter: connect failed: {}", e);
            peer.close().await;
            return Err(e);
        }

        log::info!("WebRtcAdapter: session ready (model {})", config.model);

        self.open.store(true, Ordering::Release);
        self.pump_task = Some(tokio::spawn(run_pump(
            peer_rx,
            self.events.clone(),
            self.open.clone(),
            self.closing.clone(),
        )));
        self.peer = Some(peer);
        Ok(())
    }

    fn send_audio_frame(&mut self, frame: &AudioFrame) -> bool {
        if !self.is_open() {
            return false;
        }
        let Some(peer) = self.peer.as_mut() else {
            return false;
        };
        if !peer.send_audio(frame) {
            return false;
        }

        self.frames_sent += 1;
        if self.frames_sent % 50 == 0 {
            log::debug!(
                "WebRtcAdapter: sent {} frames (last seq {})",
                self.frames_sent,
                frame.sequence
            );
        }
        true
    }

    fn send_text(&mut self, text: &str) -> Result<(), ProviderError> {
        if !self.is_open() {
            return Err(ProviderError::Disconnected("peer not open".to_string()));
        }
        self.send_event(&ClientEvent::user_text(text))?;
        self.send_event(&ClientEvent::ResponseCreate)
    }

    fn cancel_response(&mut self) {
        if !self.is_open() {
            return;
        }
        if let Err(e) = self.send_event(&ClientEvent::ResponseCancel) {
            log::warn!("WebRtcAdapter: failed to send response.cancel: {}", e);
        }
    }

    async fn disconnect(&mut self) {
        self.closing.store(true, Ordering::Release);
        self.open.store(false, Ordering::Release);
        if let Some(pump) = self.pump_task.take() {
            pump.abort();
        }
        if let Some(mut peer) = self.peer.take() {
            if timeout(self.settings.teardown_timeout(), peer.close())
                .await
                .is_err()
            {
                log::warn!("WebRtcAdapter: peer close timed out");
            }
        }
        log::info!("WebRtcAdapter: disconnected");
    }

    fn is_open(&self) -> bool {
        self.peer.is_some() && self.open.load(Ordering::Acquire)
    }
}

impl Drop for WebRtcAdapter {
    fn drop(&mut self) {
        if let Some(pump) = self.pump_task.take() {
            pump.abort();
        }
    }
}

async fn negotiate(
    permit: &ConnectPermit,
    settings: &EngineSettings,
    signaler: &Arc<dyn SdpSignaler>,
    peer: &mut dyn PeerSession,
    events: &mut mpsc::UnboundedReceiver<PeerEvent>,
    config: &ProviderConfig,
) -> Result<(), ProviderError> {
    permit.check()?;
    let offer = peer.create_offer().await?;
    permit.check()?;

    let answer = timeout(
        settings.connect_timeout(),
        signaler.exchange(
            config.endpoint_or_default(),
            &config.model,
            config.credential.secret(),
            &offer,
        ),
    )
    .await
    .map_err(|_| ProviderError::Timeout("SDP answer".to_string()))??;
    permit.check()?;

    peer.apply_answer(&answer).await?;
    permit.check()?;

    log::info!("WebRtcAdapter: peer negotiated, waiting for session.updated...");

    timeout(settings.setup_timeout(), wait_for_session(peer, events, config))
        .await
        .map_err(|_| ProviderError::Timeout("session.updated".to_string()))??;
    permit.check()
}

/// Data channel open → `session.created` → `session.update` → `session.updated`
async fn wait_for_session(
    peer: &mut dyn PeerSession,
    events: &mut mpsc::UnboundedReceiver<PeerEvent>,
    config: &ProviderConfig,
) -> Result<(), ProviderError> {
    while let Some(event) = events.recv().await {
        match event {
            PeerEvent::DataChannelOpen => log::debug!("WebRtcAdapter: data channel open"),
            PeerEvent::DataChannelMessage(text) => match ServerEvent::parse(&text) {
                Ok(ServerEvent::SessionCreated { session }) => {
                    log::info!("WebRtcAdapter: session created: {}", session.id);
                    let update = ClientEvent::session_update(&config.voice, &config.instructions)
                        .to_json()
                        .map_err(|e| ProviderError::ProtocolError(e.to_string()))?;
                    if !peer.send_data(&update) {
                        return Err(ProviderError::SendFailed(
                            "data channel not open".to_string(),
                        ));
                    }
                }
                Ok(ServerEvent::SessionUpdated { session }) => {
                    log::info!("WebRtcAdapter: session configured (voice {})", session.voice);
                    return Ok(());
                }
                Ok(ServerEvent::Error { error }) => {
                    return Err(ProviderError::ProviderReported(error.message));
                }
                Ok(_) => log::debug!("WebRtcAdapter: ignoring event during setup"),
                Err(e) => log::warn!("WebRtcAdapter: failed to parse event: {}", e),
            },
            PeerEvent::RemoteAudio { .. } => {}
            PeerEvent::ConnectionLost(reason) => {
                return Err(ProviderError::ConnectionFailed(reason));
            }
        }
    }
    Err(ProviderError::Disconnected(
        "peer closed before session.updated".to_string(),
    ))
}

async fn run_pump(
    mut peer_events: mpsc::UnboundedReceiver<PeerEvent>,
    events: ProviderEventSink,
    open: Arc<AtomicBool>,
    closing: Arc<AtomicBool>,
) {
    let mut audio_chunks: u64 = 0;

    let reason = loop {
        match peer_events.recv().await {
            Some(PeerEvent::DataChannelMessage(text)) => {
                for event in translate(&text) {
                    events.emit(event);
                }
            }
            Some(PeerEvent::RemoteAudio {
                samples,
                sample_rate,
            }) => {
                audio_chunks += 1;
                if audio_chunks % 50 == 0 {
                    log::debug!("WebRtcAdapter: received {} audio chunks", audio_chunks);
                }
                events.emit(ProviderEvent::AssistantAudio {
                    samples,
                    sample_rate,
                });
            }
            Some(PeerEvent::DataChannelOpen) => {}
            Some(PeerEvent::ConnectionLost(reason)) => break reason,
            None => break "peer event stream ended".to_string(),
        }
    };

    open.store(false, Ordering::Release);
    if !closing.load(Ordering::Acquire) {
        log::warn!("WebRtcAdapter: connection lost: {}", reason);
        events.emit(ProviderEvent::Closed { reason });
    }
    log::debug!("WebRtcAdapter: event pump exiting");
}

/// Translate one data-channel event
fn translate(text: &str) -> Vec<ProviderEvent> {
    let event = match ServerEvent::parse(text) {
        Ok(event) => event,
        Err(e) => {
            log::warn!("WebRtcAdapter: failed to parse event: {}", e);
            return vec![ProviderEvent::ProtocolError {
                message: e.to_string(),
            }];
        }
    };

    let transcript = |role: Role, text: String, is_final: bool| {
        ProviderEvent::Transcript(TranscriptEvent {
            role,
            text,
            is_final,
            received_at: Utc::now(),
        })
    };

    match event {
        ServerEvent::InputTranscriptDelta { delta } if !delta.is_empty() => {
            vec![transcript(Role::User, delta, false)]
        }
        ServerEvent::InputTranscriptCompleted { transcript: text } => {
            vec![transcript(Role::User, text, true)]
        }
        // Closes the utterance so a held response is not stuck behind it
        ServerEvent::InputTranscriptFailed { error } => {
            if let Some(error) = error {
                log::warn!("WebRtcAdapter: user transcription failed: {}", error.message);
            }
            vec![transcript(Role::User, String::new(), true)]
        }
        ServerEvent::SpeechStarted { .. } => vec![ProviderEvent::SpeechStarted],
        ServerEvent::AudioTranscriptDelta { delta } | ServerEvent::TextDelta { delta }
            if !delta.is_empty() =>
        {
            vec![transcript(Role::Assistant, delta, false)]
        }
        ServerEvent::AudioTranscriptDone { transcript: text } | ServerEvent::TextDone { text } => {
            vec![transcript(Role::Assistant, text, true)]
        }
        ServerEvent::ResponseDone { .. } => vec![ProviderEvent::TurnComplete],
        ServerEvent::Error { error } if error.is_recoverable() => {
            log::debug!("WebRtcAdapter: {}", error.message);
            vec![ProviderEvent::ProtocolError {
                message: error.message,
            }]
        }
        ServerEvent::Error { error } => vec![ProviderEvent::ProviderError {
            message: error.message,
        }],
        _ => Vec::new(),
    }
}
