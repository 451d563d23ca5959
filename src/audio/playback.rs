//! Gapless playback of provider audio
//!
//! Inbound chunks are decoded at the provider-declared rate and queued back
//! to back on an output stream built at exactly that rate. No resampling is
//! performed on this path.
//!
//! The `PlaybackScheduler` keeps the timeline (when the queued audio will
//! finish) so the engine can report `speaking` for exactly the scheduled
//! duration. Every enqueue or stop bumps a generation counter; completion
//! timers carrying an older generation are ignored.

use std::collections::VecDeque;
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, SampleRate, Stream, StreamConfig};

use super::capture::AudioError;
use super::pcm::pcm16_to_f32;

/// An output device that can be opened at a given rate
pub trait AudioOutput: Send + Sync {
    fn open(&self, sample_rate: u32) -> Result<Box<dyn PlaybackSink>, AudioError>;
}

/// An open output stream (the "audio context")
pub trait PlaybackSink: Send {
    /// Append samples after everything already queued
    fn enqueue(&mut self, samples: &[f32]);

    /// Drop everything queued but not yet played
    fn clear(&mut self);

    /// Close the output stream
    fn close(self: Box<Self>);
}

/// Tracks when queued audio will finish playing
#[derive(Debug, Clone)]
pub struct PlaybackScheduler {
    sample_rate: u32,
    next_start: Option<Instant>,
}

impl PlaybackScheduler {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            next_start: None,
        }
    }

    /// Schedule `sample_count` samples and return when they finish.
    /// A chunk starts at the later of `now` and the end of the previous chunk.
    pub fn schedule(&mut self, now: Instant, sample_count: usize) -> Instant {
        let start = match self.next_start {
            Some(next) if next > now => next,
            _ => now,
        };
        let end = start + self.duration_of(sample_count);
        self.next_start = Some(end);
        end
    }

    /// Whether audio is still scheduled at `now`
    pub fn is_playing(&self, now: Instant) -> bool {
        matches!(self.next_start, Some(end) if end > now)
    }

    /// Forget the timeline (after an interruption)
    pub fn reset(&mut self) {
        self.next_start = None;
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn duration_of(&self, sample_count: usize) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(sample_count as f64 / self.sample_rate as f64)
    }
}

/// Result of scheduling one chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackTicket {
    pub generation: u64,
    pub ends_at: Instant,
}

/// Decode + schedule + output for one session
pub struct PlaybackPipeline {
    sink: Box<dyn PlaybackSink>,
    scheduler: PlaybackScheduler,
    generation: u64,
}

impl PlaybackPipeline {
    /// Open the output at exactly `sample_rate`
    pub fn open(output: &dyn AudioOutput, sample_rate: u32) -> Result<Self, AudioError> {
        let sink = output.open(sample_rate)?;
        log::info!("Playback: output opened at {} Hz", sample_rate);
        Ok(Self {
            sink,
            scheduler: PlaybackScheduler::new(sample_rate),
            generation: 0,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.scheduler.sample_rate()
    }

    /// Queue a decoded PCM16 chunk for gapless playback
    pub fn play(&mut self, samples: &[i16], now: Instant) -> PlaybackTicket {
        let floats: Vec<f32> = samples.iter().map(|&s| pcm16_to_f32(s)).collect();
        self.sink.enqueue(&floats);
        self.generation += 1;
        PlaybackTicket {
            generation: self.generation,
            ends_at: self.scheduler.schedule(now, samples.len()),
        }
    }

    /// Whether `generation` is still the latest scheduled chunk
    pub fn is_current(&self, generation: u64) -> bool {
        self.generation == generation
    }

    pub fn is_playing(&self, now: Instant) -> bool {
        self.scheduler.is_playing(now)
    }

    /// Cut playback short. Returns true if audio was still scheduled.
    pub fn stop(&mut self, now: Instant) -> bool {
        let was_playing = self.scheduler.is_playing(now);
        self.sink.clear();
        self.scheduler.reset();
        self.generation += 1;
        was_playing
    }

    /// Close the output stream
    pub fn close(self) {
        self.sink.close();
        log::info!("Playback: output closed");
    }
}

// ============================================================================
// CPAL output
// ============================================================================

/// Default output device via CPAL
#[derive(Debug, Clone, Default)]
pub struct CpalSpeaker;

impl AudioOutput for CpalSpeaker {
    fn open(&self, sample_rate: u32) -> Result<Box<dyn PlaybackSink>, AudioError> {
        let queue: Arc<Mutex<VecDeque<f32>>> = Arc::new(Mutex::new(VecDeque::new()));
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<(), AudioError>>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let thread_queue = queue.clone();

        let thread = std::thread::Builder::new()
            .name("speaker-output".to_string())
            .spawn(move || {
                let stream = match build_output_stream(sample_rate, thread_queue) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                // Block until close() or the handle is dropped
                let _ = stop_rx.recv();
                drop(stream);
                log::info!("Speaker output released");
            })
            .map_err(|e| AudioError::DeviceThreadFailed(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Box::new(CpalPlayback {
                queue,
                stop: Some(stop_tx),
                thread: Some(thread),
            })),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(AudioError::DeviceThreadFailed(
                    "output thread exited during setup".to_string(),
                ))
            }
        }
    }
}

struct CpalPlayback {
    queue: Arc<Mutex<VecDeque<f32>>>,
    stop: Option<std_mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl CpalPlayback {
    fn release(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("Output thread panicked during release");
            }
        }
    }
}

impl PlaybackSink for CpalPlayback {
    fn enqueue(&mut self, samples: &[f32]) {
        if let Ok(mut queue) = self.queue.lock() {
            queue.extend(samples.iter().copied());
        }
    }

    fn clear(&mut self) {
        if let Ok(mut queue) = self.queue.lock() {
            queue.clear();
        }
    }

    fn close(mut self: Box<Self>) {
        self.release();
    }
}

impl Drop for CpalPlayback {
    fn drop(&mut self) {
        self.release();
    }
}

fn build_output_stream(
    sample_rate: u32,
    queue: Arc<Mutex<VecDeque<f32>>>,
) -> Result<Stream, AudioError> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or(AudioError::NoOutputDevice)?;

    let channels = device
        .default_output_config()
        .map(|c| c.channels())
        .unwrap_or(1);

    log::info!(
        "Using audio output device: {:?} ({} Hz, {} channels)",
        device.name(),
        sample_rate,
        channels
    );

    let config = StreamConfig {
        channels,
        sample_rate: SampleRate(sample_rate),
        buffer_size: BufferSize::Default,
    };

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let Ok(mut queue) = queue.lock() else {
                    data.fill(0.0);
                    return;
                };
                for frame in data.chunks_mut(channels as usize) {
                    let sample = queue.pop_front().unwrap_or(0.0);
                    frame.fill(sample);
                }
            },
            |err| log::error!("Audio output error: {}", err),
            None,
        )
        .map_err(|e| AudioError::StreamCreationFailed(e.to_string()))?;

    stream
        .play()
        .map_err(|e| AudioError::StreamCreationFailed(format!("Failed to start output: {}", e)))?;

    Ok(stream)
}
