//! Microphone capture using CPAL
//!
//! `AudioInput::open` acquires the device exclusively and returns a
//! `CaptureStream`. Frames only flow after `start()`; `stop()` releases the
//! device and returns once the release is confirmed.
//!
//! CPAL streams are not `Send` on every platform, so the stream lives on a
//! dedicated device thread and is driven through a control channel.

use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, Sample, SampleFormat, SampleRate, Stream, StreamConfig};

use super::frame::{AudioFrame, Framer};
use super::pcm::{downmix_to_mono, Resampler, CAPTURE_SAMPLE_RATE, FRAME_SAMPLES};

/// Errors that can occur while acquiring or driving audio devices.
#[derive(Debug, Clone, PartialEq)]
pub enum AudioError {
    NoInputDevice,
    NoOutputDevice,
    NoSupportedConfig,
    PermissionDenied(String),
    StreamCreationFailed(String),
    DeviceThreadFailed(String),
}

impl std::fmt::Display for AudioError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AudioError::NoInputDevice => write!(f, "No audio input device found"),
            AudioError::NoOutputDevice => write!(f, "No audio output device found"),
            AudioError::NoSupportedConfig => write!(f, "No supported audio configuration"),
            AudioError::PermissionDenied(e) => write!(f, "Microphone access denied: {}", e),
            AudioError::StreamCreationFailed(e) => {
                write!(f, "Failed to create audio stream: {}", e)
            }
            AudioError::DeviceThreadFailed(e) => write!(f, "Audio device thread failed: {}", e),
        }
    }
}

impl std::error::Error for AudioError {}

/// Receives frames and faults from the capture callback.
///
/// Implementations must not block: they run on the audio device thread.
pub trait FrameSink: Send + Sync {
    fn deliver(&self, frame: AudioFrame);
    fn fault(&self, message: String);
}

/// A microphone that can be acquired for one session at a time
pub trait AudioInput: Send + Sync {
    fn open(&self, sink: Arc<dyn FrameSink>) -> Result<Box<dyn CaptureStream>, AudioError>;
}

/// An acquired microphone
pub trait CaptureStream: Send {
    /// Begin delivering frames to the sink
    fn start(&mut self) -> Result<(), AudioError>;

    /// Stop capture and release the device. Blocks until released.
    fn stop(self: Box<Self>);
}

enum CaptureControl {
    Start,
    Stop,
}

/// Default input device via CPAL
#[derive(Debug, Clone)]
pub struct CpalMicrophone {
    frame_samples: usize,
}

impl Default for CpalMicrophone {
    fn default() -> Self {
        Self::new(FRAME_SAMPLES)
    }
}

impl CpalMicrophone {
    pub fn new(frame_samples: usize) -> Self {
        Self { frame_samples }
    }
}

impl AudioInput for CpalMicrophone {
    fn open(&self, sink: Arc<dyn FrameSink>) -> Result<Box<dyn CaptureStream>, AudioError> {
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<(), AudioError>>();
        let (control_tx, control_rx) = std_mpsc::channel::<CaptureControl>();
        let frame_samples = self.frame_samples;

        let thread = std::thread::Builder::new()
            .name("mic-capture".to_string())
            .spawn(move || run_device_thread(frame_samples, sink, ready_tx, control_rx))
            .map_err(|e| AudioError::DeviceThreadFailed(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Box::new(CpalCapture {
                control: Some(control_tx),
                thread: Some(thread),
            })),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(AudioError::DeviceThreadFailed(
                    "capture thread exited during setup".to_string(),
                ))
            }
        }
    }
}

/// Handle to a microphone held by the device thread.
/// Dropping it releases the device as well.
pub struct CpalCapture {
    control: Option<std_mpsc::Sender<CaptureControl>>,
    thread: Option<JoinHandle<()>>,
}

impl CpalCapture {
    fn release(&mut self) {
        if let Some(control) = self.control.take() {
            let _ = control.send(CaptureControl::Stop);
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("Capture thread panicked during release");
            }
        }
    }
}

impl CaptureStream for CpalCapture {
    fn start(&mut self) -> Result<(), AudioError> {
        let control = self.control.as_ref().ok_or_else(|| {
            AudioError::DeviceThreadFailed("capture already released".to_string())
        })?;
        control
            .send(CaptureControl::Start)
            .map_err(|_| AudioError::DeviceThreadFailed("capture thread is gone".to_string()))
    }

    fn stop(mut self: Box<Self>) {
        self.release();
    }
}

impl Drop for CpalCapture {
    fn drop(&mut self) {
        self.release();
    }
}

fn run_device_thread(
    frame_samples: usize,
    sink: Arc<dyn FrameSink>,
    ready_tx: std_mpsc::Sender<Result<(), AudioError>>,
    control_rx: std_mpsc::Receiver<CaptureControl>,
) {
    let stream = match build_capture_stream(frame_samples, sink.clone()) {
        Ok(stream) => stream,
        Err(e) => {
            log::error!("Failed to acquire microphone: {}", e);
            let _ = ready_tx.send(Err(e));
            return;
        }
    };
    let _ = ready_tx.send(Ok(()));

    while let Ok(control) = control_rx.recv() {
        match control {
            CaptureControl::Start => {
                if let Err(e) = stream.play() {
                    log::error!("Failed to start capture stream: {}", e);
                    sink.fault(format!("Failed to start capture stream: {}", e));
                } else {
                    log::info!("Microphone capture started");
                }
            }
            CaptureControl::Stop => break,
        }
    }

    drop(stream);
    log::info!("Microphone released");
}

fn build_capture_stream(
    frame_samples: usize,
    sink: Arc<dyn FrameSink>,
) -> Result<Stream, AudioError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or(AudioError::NoInputDevice)?;

    log::info!("Using audio input device: {:?}", device.name());

    let supported = pick_input_config(&device)?;
    log::info!(
        "Capture config: {} Hz, {} channels, {:?} (frames at {} Hz)",
        supported.sample_rate().0,
        supported.channels(),
        supported.sample_format(),
        CAPTURE_SAMPLE_RATE
    );

    let sample_format = supported.sample_format();
    let config: StreamConfig = supported.into();

    match sample_format {
        SampleFormat::I16 => build_typed::<i16>(&device, &config, frame_samples, sink),
        SampleFormat::U16 => build_typed::<u16>(&device, &config, frame_samples, sink),
        SampleFormat::F32 => build_typed::<f32>(&device, &config, frame_samples, sink),
        _ => Err(AudioError::NoSupportedConfig),
    }
}

/// Prefer a native 16 kHz configuration; otherwise use the device default and
/// resample in the callback.
fn pick_input_config(device: &Device) -> Result<cpal::SupportedStreamConfig, AudioError> {
    if let Ok(ranges) = device.supported_input_configs() {
        let native = ranges
            .filter(|r| {
                matches!(
                    r.sample_format(),
                    SampleFormat::I16 | SampleFormat::U16 | SampleFormat::F32
                )
            })
            .filter(|r| {
                r.min_sample_rate().0 <= CAPTURE_SAMPLE_RATE
                    && r.max_sample_rate().0 >= CAPTURE_SAMPLE_RATE
            })
            .min_by_key(|r| r.channels());
        if let Some(range) = native {
            return Ok(range.with_sample_rate(SampleRate(CAPTURE_SAMPLE_RATE)));
        }
    }

    device.default_input_config().map_err(|e| match e {
        cpal::DefaultStreamConfigError::DeviceNotAvailable => {
            AudioError::PermissionDenied("input device not available".to_string())
        }
        _ => AudioError::NoSupportedConfig,
    })
}

fn build_typed<T>(
    device: &Device,
    config: &StreamConfig,
    frame_samples: usize,
    sink: Arc<dyn FrameSink>,
) -> Result<Stream, AudioError>
where
    T: cpal::SizedSample + Send + 'static,
    f32: FromSample<T>,
{
    let channels = config.channels;
    let source_rate = config.sample_rate.0;
    let mut resampler = Resampler::new(source_rate, CAPTURE_SAMPLE_RATE);
    let mut framer = Framer::new(frame_samples, CAPTURE_SAMPLE_RATE);
    let data_sink = sink.clone();
    let err_sink = sink;

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                let floats: Vec<f32> = data.iter().map(|&s| f32::from_sample(s)).collect();
                let mono = downmix_to_mono(&floats, channels);
                let resampled = resampler.process(&mono);
                for frame in framer.push(&resampled) {
                    data_sink.deliver(frame);
                }
            },
            move |err| {
                log::error!("Audio stream error: {}", err);
                err_sink.fault(err.to_string());
            },
            None,
        )
        .map_err(|e| match e {
            cpal::BuildStreamError::DeviceNotAvailable => {
                AudioError::PermissionDenied("input device not available".to_string())
            }
            other => AudioError::StreamCreationFailed(other.to_string()),
        })
}
