//! Session metrics
//!
//! Counts frames, inbound audio, turns and faults for the active session and
//! keeps a bounded error history. Used for diagnostics; snapshots are
//! serializable for the UI.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Default number of errors to retain in history
pub const DEFAULT_ERROR_HISTORY: usize = 20;

/// Record of an error that occurred during a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// Unix timestamp when error occurred (seconds)
    pub timestamp: u64,
    /// Category of error (e.g., "transport", "protocol", "transcript")
    pub error_type: String,
    /// Human-readable error message
    pub message: String,
    /// Associated session ID, if applicable
    pub session_id: Option<String>,
}

/// Point-in-time view of the metrics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub session_id: Option<String>,
    /// Session age in milliseconds (0 when no session is active)
    pub session_duration_ms: u64,
    pub sessions_started: u64,
    pub frames_captured: u64,
    pub frames_sent: u64,
    pub frames_dropped: u64,
    pub audio_chunks_received: u64,
    pub audio_samples_received: u64,
    pub turns_completed: u64,
    pub interrupts: u64,
    pub protocol_errors: u64,
    pub pending_overflows: u64,
    /// Newest first
    pub errors: Vec<ErrorRecord>,
}

/// Collects counters for the engine's sessions
#[derive(Debug)]
pub struct SessionMetrics {
    current: Option<(Uuid, Instant)>,
    counters: MetricsSnapshot,
    errors: VecDeque<ErrorRecord>,
    max_errors: usize,
}

impl SessionMetrics {
    pub fn new(max_errors: usize) -> Self {
        Self {
            current: None,
            counters: MetricsSnapshot::default(),
            errors: VecDeque::with_capacity(max_errors),
            max_errors,
        }
    }

    /// Start counting for a new session. Per-session counters are reset;
    /// the error history is kept.
    pub fn session_started(&mut self, session_id: Uuid) {
        if let Some((old, _)) = self.current.take() {
            log::warn!(
                "Metrics: session {} still active when {} started",
                old,
                session_id
            );
        }
        let sessions_started = self.counters.sessions_started + 1;
        self.counters = MetricsSnapshot {
            sessions_started,
            ..MetricsSnapshot::default()
        };
        self.current = Some((session_id, Instant::now()));
        log::debug!("Metrics: session {} started", session_id);
    }

    pub fn session_ended(&mut self) {
        if let Some((id, started)) = self.current.take() {
            log::info!(
                "Metrics: session {} ended after {:?} - {} frames sent, {} dropped, {} turns",
                id,
                started.elapsed(),
                self.counters.frames_sent,
                self.counters.frames_dropped,
                self.counters.turns_completed
            );
        }
    }

    pub fn frame_captured(&mut self) {
        self.counters.frames_captured += 1;
    }

    /// Record the outcome of handing one frame to the adapter
    pub fn frame_forwarded(&mut self, delivered: bool) {
        if delivered {
            self.counters.frames_sent += 1;
        } else {
            self.counters.frames_dropped += 1;
        }
    }

    pub fn audio_received(&mut self, samples: usize) {
        self.counters.audio_chunks_received += 1;
        self.counters.audio_samples_received += samples as u64;
    }

    pub fn turn_completed(&mut self) {
        self.counters.turns_completed += 1;
    }

    pub fn interrupted(&mut self) {
        self.counters.interrupts += 1;
    }

    pub fn protocol_error(&mut self, message: String) {
        self.counters.protocol_errors += 1;
        self.record_error("protocol", message);
    }

    pub fn pending_overflow(&mut self, message: String) {
        self.counters.pending_overflows += 1;
        self.record_error("transcript", message);
    }

    /// Record an error against the active session (if any)
    pub fn record_error(&mut self, error_type: &str, message: String) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        let error = ErrorRecord {
            timestamp: now,
            error_type: error_type.to_string(),
            message,
            session_id: self.current.map(|(id, _)| id.to_string()),
        };

        log::debug!("Metrics: recording error - {:?}", error);

        // Add to front (newest first)
        self.errors.push_front(error);
        while self.errors.len() > self.max_errors {
            self.errors.pop_back();
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut snapshot = self.counters.clone();
        if let Some((id, started)) = self.current {
            snapshot.session_id = Some(id.to_string());
            snapshot.session_duration_ms = started.elapsed().as_millis() as u64;
        }
        snapshot.errors = self.errors.iter().cloned().collect();
        snapshot
    }
}

impl Default for SessionMetrics {
    fn default() -> Self {
        Self::new(DEFAULT_ERROR_HISTORY)
    }
}
