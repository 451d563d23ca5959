//! Fixed-size capture framing
//!
//! The capture callback delivers device buffers of arbitrary length. The
//! framer accumulates them and cuts exact `FRAME_SAMPLES` blocks, each
//! stamped with a strictly increasing sequence number.

use super::pcm::{encode_pcm16, CAPTURE_SAMPLE_RATE, FRAME_SAMPLES};

/// One block of captured audio ready for the wire
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    /// Sequence number (monotonically increasing per capture stream)
    pub sequence: u64,
    /// PCM16 mono samples
    pub samples: Vec<i16>,
    /// Sample rate of `samples` in Hz
    pub sample_rate: u32,
}

impl AudioFrame {
    /// Duration of this frame in milliseconds
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        (self.samples.len() as u64 * 1000) / self.sample_rate as u64
    }
}

/// Accumulates float samples and emits fixed-size PCM16 frames
#[derive(Debug)]
pub struct Framer {
    block: usize,
    pending: Vec<f32>,
    next_sequence: u64,
    sample_rate: u32,
}

impl Default for Framer {
    fn default() -> Self {
        Self::new(FRAME_SAMPLES, CAPTURE_SAMPLE_RATE)
    }
}

impl Framer {
    /// Create a framer cutting `block` samples per frame.
    /// A zero block size falls back to `FRAME_SAMPLES`.
    pub fn new(block: usize, sample_rate: u32) -> Self {
        let block = if block == 0 { FRAME_SAMPLES } else { block };
        Self {
            block,
            pending: Vec::with_capacity(block * 2),
            next_sequence: 0,
            sample_rate,
        }
    }

    /// Push samples and return every frame that became complete, in order
    pub fn push(&mut self, samples: &[f32]) -> Vec<AudioFrame> {
        self.pending.extend_from_slice(samples);

        let mut frames = Vec::new();
        while self.pending.len() >= self.block {
            let block: Vec<f32> = self.pending.drain(..self.block).collect();
            frames.push(AudioFrame {
                sequence: self.next_sequence,
                samples: encode_pcm16(&block),
                sample_rate: self.sample_rate,
            });
            self.next_sequence += 1;
        }
        frames
    }

    /// Samples waiting for the next full block
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Sequence number the next frame will carry
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }
}
