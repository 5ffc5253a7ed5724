// Audio buffer - immutable interleaved sample storage
// Every stage consumes a buffer by reference and produces a new one

use crate::error::{CoreError, CoreResult};

/// Highest channel count the core accepts (mono or stereo stems)
pub const MAX_CHANNELS: u16 = 2;

/// Peak level below which a buffer is treated as silence
pub const SILENCE_THRESHOLD: f32 = 1e-6;

#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    /// Interleaved samples, nominally in [-1.0, 1.0]
    samples: Vec<f32>,

    /// Sample rate in Hz (e.g., 44100, 48000)
    sample_rate: u32,

    /// Number of channels (1 = mono, 2 = stereo)
    channels: u16,
}

impl AudioBuffer {
    /// Create a validated buffer
    ///
    /// Fails with `MalformedAudio` on zero/unsupported channel counts, a zero
    /// sample rate, an empty or ragged sample array, or NaN/Inf samples.
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> CoreResult<Self> {
        if channels == 0 || channels > MAX_CHANNELS {
            return Err(CoreError::MalformedAudio(format!(
                "unsupported channel count {}",
                channels
            )));
        }
        if sample_rate == 0 {
            return Err(CoreError::MalformedAudio("sample rate is zero".to_string()));
        }
        if samples.is_empty() {
            return Err(CoreError::MalformedAudio("buffer is empty".to_string()));
        }
        if samples.len() % channels as usize != 0 {
            return Err(CoreError::MalformedAudio(format!(
                "{} samples do not divide into {} channels",
                samples.len(),
                channels
            )));
        }
        if let Some(idx) = samples.iter().position(|s| !s.is_finite()) {
            return Err(CoreError::MalformedAudio(format!(
                "non-finite sample at index {}",
                idx
            )));
        }

        Ok(AudioBuffer {
            samples,
            sample_rate,
            channels,
        })
    }

    /// Create a validated mono buffer
    pub fn mono(samples: Vec<f32>, sample_rate: u32) -> CoreResult<Self> {
        Self::new(samples, sample_rate, 1)
    }

    /// Build an interleaved buffer from per-channel sample vectors
    pub fn from_channels(channels: Vec<Vec<f32>>, sample_rate: u32) -> CoreResult<Self> {
        let channel_count = channels.len();
        let frames = channels.first().map(|c| c.len()).unwrap_or(0);
        if channels.iter().any(|c| c.len() != frames) {
            return Err(CoreError::MalformedAudio(
                "channels have different lengths".to_string(),
            ));
        }

        let mut samples = Vec::with_capacity(frames * channel_count);
        for frame_idx in 0..frames {
            for channel in &channels {
                samples.push(channel[frame_idx]);
            }
        }

        Self::new(samples, sample_rate, channel_count as u16)
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Total number of frames (samples / channels)
    pub fn frame_count(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    /// Get duration in seconds as f64
    pub fn duration_secs(&self) -> f64 {
        self.frame_count() as f64 / self.sample_rate as f64
    }

    /// Convert to mono by averaging channels
    pub fn to_mono(&self) -> Vec<f32> {
        if self.channels == 1 {
            return self.samples.clone();
        }

        let channels = self.channels as usize;
        self.samples
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    }

    /// Absolute peak across all channels
    pub fn peak(&self) -> f32 {
        self.samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()))
    }

    pub fn is_silent(&self) -> bool {
        self.peak() < SILENCE_THRESHOLD
    }

    /// Copy frames `[start, end)` into a new buffer
    pub fn slice_frames(&self, start: usize, end: usize) -> CoreResult<AudioBuffer> {
        let end = end.min(self.frame_count());
        if start >= end {
            return Err(CoreError::MalformedAudio(format!(
                "zero-length frame range {}..{}",
                start, end
            )));
        }

        let channels = self.channels as usize;
        let samples = self.samples[start * channels..end * channels].to_vec();
        Ok(AudioBuffer {
            samples,
            sample_rate: self.sample_rate,
            channels: self.channels,
        })
    }

    /// Produce a new buffer with the same format and replacement samples
    pub fn with_samples(&self, samples: Vec<f32>) -> CoreResult<AudioBuffer> {
        Self::new(samples, self.sample_rate, self.channels)
    }

    /// Seconds to the nearest frame index
    pub fn secs_to_frame(&self, secs: f64) -> usize {
        (secs.max(0.0) * self.sample_rate as f64).round() as usize
    }
}
