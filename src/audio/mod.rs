//! Audio capture and playback pipelines
//!
//! Capture: CPAL input → mono → 16 kHz → 4096-sample PCM16 frames.
//! Playback: provider PCM16 at its declared rate → gapless CPAL output.
//!
//! Devices sit behind the `AudioInput` / `AudioOutput` traits so the session
//! controller can be driven without hardware.

mod capture;
mod frame;
pub mod pcm;
mod playback;

pub use capture::{AudioError, AudioInput, CaptureStream, CpalCapture, CpalMicrophone, FrameSink};
pub use frame::{AudioFrame, Framer};
pub use playback::{
    AudioOutput, CpalSpeaker, PlaybackPipeline, PlaybackScheduler, PlaybackSink, PlaybackTicket,
};
