// Effect Processing - LFO, filter, envelope and level primitives
// Each function consumes a buffer by reference and returns a new one

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use crate::audio::buffer::SILENCE_THRESHOLD;
use crate::audio::AudioBuffer;
use crate::error::{CoreError, CoreResult};

/// Frames between filter coefficient updates
const FILTER_BLOCK_FRAMES: usize = 64;

/// Butterworth Q for the 2nd-order filter
const BUTTERWORTH_Q: f64 = std::f64::consts::FRAC_1_SQRT_2;

/// Fixed attack time of the envelope shaper
const ATTACK_SECS: f64 = 0.010;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FilterType {
    #[default]
    #[serde(rename = "none")]
    None,
    #[serde(rename = "low-pass")]
    LowPass,
    #[serde(rename = "high-pass")]
    HighPass,
}

/// Biquad coefficients normalized by a0
#[derive(Debug, Clone, Copy)]
struct BiquadCoefficients {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
}

impl BiquadCoefficients {
    /// RBJ cookbook low/high-pass
    fn new(filter_type: FilterType, sample_rate: f64, cutoff: f64, q: f64) -> Option<Self> {
        let w0 = 2.0 * PI * cutoff / sample_rate;
        let cos_w0 = w0.cos();
        let alpha = w0.sin() / (2.0 * q);
        let a0 = 1.0 + alpha;

        let (b0, b1, b2) = match filter_type {
            FilterType::LowPass => ((1.0 - cos_w0) / 2.0, 1.0 - cos_w0, (1.0 - cos_w0) / 2.0),
            FilterType::HighPass => ((1.0 + cos_w0) / 2.0, -(1.0 + cos_w0), (1.0 + cos_w0) / 2.0),
            FilterType::None => return None,
        };

        Some(BiquadCoefficients {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: -2.0 * cos_w0 / a0,
            a2: (1.0 - alpha) / a0,
        })
    }
}

/// Transposed direct form II biquad; state survives coefficient changes
#[derive(Debug, Clone, Default)]
struct Biquad {
    z1: f64,
    z2: f64,
}

impl Biquad {
    fn process(&mut self, c: &BiquadCoefficients, input: f64) -> f64 {
        let output = input * c.b0 + self.z1;
        self.z1 = input * c.b1 + self.z2 - c.a1 * output;
        self.z2 = input * c.b2 - c.a2 * output;
        output
    }
}

/// Sine LFO value in [-1, 1] at `frame`
fn lfo(frame: usize, sample_rate: u32, freq_hz: f64) -> f64 {
    (2.0 * PI * freq_hz * frame as f64 / sample_rate as f64).sin()
}

/// Tempo-synced pan and level modulation
///
/// Level gain = (1 - d) + d * (lfo + 1) / 2, so it never exceeds unity.
/// Pan uses a balance law: the side the pan moves toward stays at unity and
/// the other side is attenuated. A non-zero pan depth turns mono into stereo.
pub fn apply_pan_level(
    buffer: &AudioBuffer,
    lfo_hz: f64,
    pan_depth: f32,
    level_depth: f32,
) -> CoreResult<AudioBuffer> {
    let sr = buffer.sample_rate();
    let channels = buffer.channels() as usize;
    let pan_depth = pan_depth as f64;
    let level_depth = level_depth as f64;

    let out_channels = if pan_depth > 0.0 { 2 } else { channels };
    let mut samples = Vec::with_capacity(buffer.frame_count() * out_channels);

    for (frame_idx, frame) in buffer.samples().chunks_exact(channels).enumerate() {
        let value = lfo(frame_idx, sr, lfo_hz);
        let level = (1.0 - level_depth) + level_depth * (value + 1.0) / 2.0;

        if pan_depth > 0.0 {
            let pan = pan_depth * value;
            let left_gain = (1.0 - pan).min(1.0) * level;
            let right_gain = (1.0 + pan).min(1.0) * level;
            let (left, right) = if channels == 1 {
                (frame[0], frame[0])
            } else {
                (frame[0], frame[1])
            };
            samples.push((left as f64 * left_gain) as f32);
            samples.push((right as f64 * right_gain) as f32);
        } else {
            samples.extend(frame.iter().map(|&s| (s as f64 * level) as f32));
        }
    }

    AudioBuffer::new(samples, sr, out_channels as u16)
}

/// Biquad filter whose cutoff follows `center * 2^(2 * depth * lfo)`
///
/// Cutoff is clamped to [20 Hz, 0.45 * sample rate]; depth 0 gives a static filter.
pub fn apply_filter_lfo(
    buffer: &AudioBuffer,
    filter_type: FilterType,
    center_hz: f64,
    depth: f32,
    lfo_hz: f64,
) -> CoreResult<AudioBuffer> {
    if filter_type == FilterType::None {
        return Ok(buffer.clone());
    }

    let sr = buffer.sample_rate();
    let nyquist_limit = 0.45 * sr as f64;
    let channels = buffer.channels() as usize;
    let mut states = vec![Biquad::default(); channels];
    let mut samples = buffer.samples().to_vec();
    let frames = buffer.frame_count();

    let mut block_start = 0;
    while block_start < frames {
        let block_end = (block_start + FILTER_BLOCK_FRAMES).min(frames);
        let center_frame = (block_start + block_end) / 2;
        let octaves = 2.0 * depth as f64 * lfo(center_frame, sr, lfo_hz);
        let cutoff = (center_hz * 2f64.powf(octaves)).clamp(20.0, nyquist_limit);

        let coefficients = BiquadCoefficients::new(filter_type, sr as f64, cutoff, BUTTERWORTH_Q)
            .ok_or_else(|| CoreError::InvalidParameter("filter type has no coefficients".into()))?;

        for frame in block_start..block_end {
            for (ch, state) in states.iter_mut().enumerate() {
                let idx = frame * channels + ch;
                samples[idx] = state.process(&coefficients, samples[idx] as f64) as f32;
            }
        }
        block_start = block_end;
    }

    buffer.with_samples(samples)
}

/// Attack/sustain gain envelope
///
/// Gain ramps linearly from the attack gain to the sustain gain over the
/// first 10 ms (at most half the buffer), then holds the sustain gain.
pub fn apply_envelope(
    buffer: &AudioBuffer,
    attack_gain_db: f32,
    sustain_gain_db: f32,
) -> CoreResult<AudioBuffer> {
    let start_gain = db_to_linear(attack_gain_db as f64);
    let end_gain = db_to_linear(sustain_gain_db as f64);
    let frames = buffer.frame_count();
    let attack_frames = buffer.secs_to_frame(ATTACK_SECS).min(frames / 2);
    let channels = buffer.channels() as usize;

    let samples = buffer
        .samples()
        .chunks_exact(channels)
        .enumerate()
        .flat_map(|(frame_idx, frame)| {
            let gain = if frame_idx < attack_frames {
                let t = if attack_frames > 1 {
                    frame_idx as f64 / (attack_frames - 1) as f64
                } else {
                    1.0
                };
                start_gain + (end_gain - start_gain) * t
            } else {
                end_gain
            };
            frame.iter().map(move |&s| (s as f64 * gain) as f32)
        })
        .collect();

    buffer.with_samples(samples)
}

/// Scale the peak to `target_dbfs`, then clamp so no sample exceeds it
pub fn normalize_peak(buffer: &AudioBuffer, target_dbfs: f32) -> CoreResult<AudioBuffer> {
    if !target_dbfs.is_finite() || target_dbfs > 0.0 {
        return Err(CoreError::InvalidParameter(format!(
            "normalization target {} dBFS must be <= 0",
            target_dbfs
        )));
    }

    let peak = buffer.peak();
    if peak < SILENCE_THRESHOLD {
        return Err(CoreError::InsufficientSignal(
            "cannot normalize a silent segment".to_string(),
        ));
    }

    let target = db_to_linear(target_dbfs as f64) as f32;
    let gain = target / peak;
    let samples = buffer
        .samples()
        .iter()
        .map(|&s| (s * gain).clamp(-target, target))
        .collect();

    buffer.with_samples(samples)
}

/// Scale down (never up) so the peak does not exceed `target_dbfs`
pub fn limit_peak(buffer: &AudioBuffer, target_dbfs: f32) -> CoreResult<AudioBuffer> {
    let target = db_to_linear(target_dbfs as f64) as f32;
    let peak = buffer.peak();
    if peak <= target {
        return Ok(buffer.clone());
    }

    let gain = target / peak;
    let samples = buffer
        .samples()
        .iter()
        .map(|&s| (s * gain).clamp(-target, target))
        .collect();
    buffer.with_samples(samples)
}

pub fn db_to_linear(db: f64) -> f64 {
    10f64.powf(db / 20.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: u32 = 22050;

    fn sine(freq: f32, seconds: f32, amplitude: f32) -> AudioBuffer {
        let len = (SR as f32 * seconds) as usize;
        let samples = (0..len)
            .map(|i| amplitude * (2.0 * std::f32::consts::PI * freq * i as f32 / SR as f32).sin())
            .collect();
        AudioBuffer::mono(samples, SR).unwrap()
    }

    fn rms(samples: &[f32]) -> f32 {
        (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
    }

    #[test]
    fn test_level_lfo_never_adds_gain() {
        let buffer = AudioBuffer::mono(vec![0.8; SR as usize], SR).unwrap();
        let out = apply_pan_level(&buffer, 2.0, 0.0, 1.0).unwrap();

        assert_eq!(out.channels(), 1);
        assert!(out.peak() <= 0.8 + 1e-6);
        // Full depth reaches silence at the LFO trough
        let min = out.samples().iter().fold(f32::MAX, |acc, &s| acc.min(s));
        assert!(min < 0.01);
    }

    #[test]
    fn test_pan_lfo_makes_stereo() {
        let buffer = AudioBuffer::mono(vec![0.5; SR as usize], SR).unwrap();
        let out = apply_pan_level(&buffer, 1.0, 1.0, 0.0).unwrap();

        assert_eq!(out.channels(), 2);
        assert_eq!(out.frame_count(), buffer.frame_count());
        assert!(out.peak() <= 0.5 + 1e-6);

        // A quarter cycle in, the pan sits hard right
        let quarter = SR as usize / 4;
        let left = out.samples()[quarter * 2];
        let right = out.samples()[quarter * 2 + 1];
        assert!(left.abs() < 1e-3);
        assert!((right - 0.5).abs() < 1e-3);
    }

    #[test]
    fn test_lowpass_attenuates_highs() {
        let high = sine(8000.0, 0.5, 0.5);
        let low = sine(100.0, 0.5, 0.5);

        let high_out = apply_filter_lfo(&high, FilterType::LowPass, 500.0, 0.0, 1.0).unwrap();
        let low_out = apply_filter_lfo(&low, FilterType::LowPass, 500.0, 0.0, 1.0).unwrap();

        assert!(rms(high_out.samples()) < rms(high.samples()) * 0.05);
        assert!(rms(low_out.samples()) > rms(low.samples()) * 0.9);
    }

    #[test]
    fn test_highpass_attenuates_lows() {
        let low = sine(60.0, 0.5, 0.5);
        let out = apply_filter_lfo(&low, FilterType::HighPass, 2000.0, 0.5, 2.0).unwrap();
        assert!(rms(out.samples()) < rms(low.samples()) * 0.1);
    }

    #[test]
    fn test_filter_none_is_identity() {
        let buffer = sine(440.0, 0.1, 0.5);
        let out = apply_filter_lfo(&buffer, FilterType::None, 1000.0, 1.0, 1.0).unwrap();
        assert_eq!(out, buffer);
    }

    #[test]
    fn test_envelope_ramp() {
        let buffer = AudioBuffer::mono(vec![1.0; SR as usize], SR).unwrap();
        let out = apply_envelope(&buffer, 6.0, -6.0).unwrap();
        let samples = out.samples();

        assert!((samples[0] - db_to_linear(6.0) as f32).abs() < 1e-4);
        let attack = buffer.secs_to_frame(0.010);
        assert!((samples[attack - 1] - db_to_linear(-6.0) as f32).abs() < 1e-4);
        assert!((samples[SR as usize - 1] - db_to_linear(-6.0) as f32).abs() < 1e-4);
    }

    #[test]
    fn test_normalize_hits_target() {
        let buffer = sine(440.0, 0.2, 0.1);
        let out = normalize_peak(&buffer, -1.0).unwrap();
        let target = db_to_linear(-1.0) as f32;

        assert!(out.peak() <= target);
        assert!(out.peak() > target * 0.99);
    }

    #[test]
    fn test_normalize_rejects_silence_and_positive_target() {
        let silent = AudioBuffer::mono(vec![0.0; 100], SR).unwrap();
        assert!(matches!(
            normalize_peak(&silent, -1.0),
            Err(CoreError::InsufficientSignal(_))
        ));

        let buffer = sine(440.0, 0.1, 0.5);
        assert!(matches!(
            normalize_peak(&buffer, 1.0),
            Err(CoreError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_limit_peak_only_attenuates() {
        let quiet = sine(440.0, 0.1, 0.1);
        assert_eq!(limit_peak(&quiet, -1.0).unwrap(), quiet);

        let loud = sine(440.0, 0.1, 1.0);
        assert!(limit_peak(&loud, -6.0).unwrap().peak() <= db_to_linear(-6.0) as f32);
    }
}
