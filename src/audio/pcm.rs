//! PCM16 sample conversion helpers
//!
//! Capture produces f32 samples in [-1, 1]; both providers speak 16-bit
//! little-endian PCM, base64-encoded inside JSON envelopes.

use base64::{engine::general_purpose::STANDARD, Engine};

/// Capture rate required by both providers' speech models
pub const CAPTURE_SAMPLE_RATE: u32 = 16_000;

/// Samples per captured frame
pub const FRAME_SAMPLES: usize = 4096;

/// Convert one float sample to PCM16, saturating outside [-1, 1].
///
/// Negative values scale by 32768 and positive by 32767 so that both ends of
/// the range map onto `i16::MIN` / `i16::MAX` exactly.
pub fn f32_to_pcm16(sample: f32) -> i16 {
    let clamped = sample.clamp(-1.0, 1.0);
    if clamped < 0.0 {
        (clamped * 32768.0) as i16
    } else {
        (clamped * 32767.0) as i16
    }
}

/// Convert a block of float samples to PCM16
pub fn encode_pcm16(samples: &[f32]) -> Vec<i16> {
    samples.iter().map(|&s| f32_to_pcm16(s)).collect()
}

/// Convert a PCM16 sample back to float for playback
pub fn pcm16_to_f32(sample: i16) -> f32 {
    sample as f32 / 32768.0
}

/// Serialize samples as little-endian bytes
pub fn pcm16_to_le_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|&s| s.to_le_bytes()).collect()
}

/// Parse little-endian bytes into samples. A trailing odd byte is ignored.
pub fn le_bytes_to_pcm16(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Base64 of the little-endian byte stream, as carried in `mediaChunks`
pub fn encode_base64_pcm16(samples: &[i16]) -> String {
    STANDARD.encode(pcm16_to_le_bytes(samples))
}

/// Decode a base64 PCM16LE payload
pub fn decode_base64_pcm16(data: &str) -> Result<Vec<i16>, base64::DecodeError> {
    let bytes = STANDARD.decode(data)?;
    Ok(le_bytes_to_pcm16(&bytes))
}

/// Extract the sample rate from a mime type such as `audio/pcm;rate=24000`
pub fn rate_from_mime(mime_type: &str) -> Option<u32> {
    mime_type
        .split(';')
        .map(str::trim)
        .find_map(|param| param.strip_prefix("rate="))
        .and_then(|rate| rate.trim().parse().ok())
        .filter(|&rate| rate > 0)
}

/// Average interleaved channels down to mono
pub fn downmix_to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    let channels = channels as usize;
    samples
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Streaming resampler for the capture path.
///
/// Device callbacks deliver buffers of arbitrary length, so the unconsumed
/// tail and the interpolation phase carry over to the next `process()` call.
/// Integer ratios (48 kHz → 16 kHz) average each group of samples; other
/// ratios use linear interpolation. Playback never goes through here.
#[derive(Debug, Clone)]
pub struct Resampler {
    source_rate: u32,
    target_rate: u32,
    /// Input samples not yet fully consumed
    carry: Vec<f32>,
    /// Position of the next output sample, in input samples from `carry[0]`
    position: f64,
}

impl Resampler {
    pub fn new(source_rate: u32, target_rate: u32) -> Self {
        if source_rate == 0 || target_rate == 0 {
            log::warn!(
                "Invalid sample rate (source: {}, target: {}), passing audio through",
                source_rate,
                target_rate
            );
        }
        Self {
            source_rate,
            target_rate,
            carry: Vec::new(),
            position: 0.0,
        }
    }

    fn passthrough(&self) -> bool {
        self.source_rate == 0 || self.target_rate == 0 || self.source_rate == self.target_rate
    }

    /// Resample the next buffer of mono audio
    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        if self.passthrough() {
            return samples.to_vec();
        }
        self.carry.extend_from_slice(samples);

        if self.source_rate > self.target_rate && self.source_rate % self.target_rate == 0 {
            let ratio = (self.source_rate / self.target_rate) as usize;
            let whole = self.carry.len() / ratio * ratio;
            let output = self.carry[..whole]
                .chunks_exact(ratio)
                .map(|chunk| chunk.iter().sum::<f32>() / ratio as f32)
                .collect();
            self.carry.drain(..whole);
            return output;
        }

        let step = self.source_rate as f64 / self.target_rate as f64;
        let mut output = Vec::new();
        // Interpolating needs the sample after `idx`; wait for it otherwise
        while (self.position.floor() as usize) + 1 < self.carry.len() {
            let idx = self.position.floor() as usize;
            let frac = (self.position - idx as f64) as f32;
            let a = self.carry[idx];
            let b = self.carry[idx + 1];
            output.push(a + (b - a) * frac);
            self.position += step;
        }

        let consumed = (self.position.floor() as usize).min(self.carry.len());
        self.carry.drain(..consumed);
        self.position -= consumed as f64;
        output
    }

    /// Input samples held back for the next call
    pub fn pending_len(&self) -> usize {
        self.carry.len()
    }
}
