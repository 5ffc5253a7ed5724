// Pitch Shifting - duration-preserving transpose
// WSOLA time stretch by the pitch ratio, then linear resampling back to
// the original length

use crate::audio::features::hann_window;
use crate::audio::AudioBuffer;
use crate::error::{CoreError, CoreResult};

/// Largest transpose accepted, in semitones
pub const MAX_TRANSPOSE: i32 = 12;

const MAX_WINDOW: usize = 2048;
const MIN_WINDOW: usize = 32;

/// Shift pitch by `semitones` without changing the frame count
pub fn transpose(buffer: &AudioBuffer, semitones: i32) -> CoreResult<AudioBuffer> {
    if semitones.abs() > MAX_TRANSPOSE {
        return Err(CoreError::InvalidParameter(format!(
            "transpose {} outside [-{}, {}] semitones",
            semitones, MAX_TRANSPOSE, MAX_TRANSPOSE
        )));
    }
    if semitones == 0 {
        return Ok(buffer.clone());
    }

    let frames = buffer.frame_count();
    let window = window_size_for(frames).ok_or_else(|| {
        CoreError::MalformedAudio(format!("{} frames is too short to transpose", frames))
    })?;

    let ratio = 2f64.powf(semitones as f64 / 12.0);
    let stretched = wsola_stretch(buffer, ratio, window);
    let channels = buffer.channels() as usize;
    let samples = resample_to(&stretched, channels, frames);

    log::debug!(
        "Transposed {} frames by {:+} semitones (ratio {:.4}, window {})",
        frames,
        semitones,
        ratio,
        window
    );

    buffer.with_samples(samples)
}

/// Power-of-two window no longer than the buffer, capped at MAX_WINDOW
fn window_size_for(frames: usize) -> Option<usize> {
    if frames < MIN_WINDOW {
        return None;
    }
    let mut size = MAX_WINDOW;
    while size > frames {
        size /= 2;
    }
    Some(size.max(MIN_WINDOW))
}

/// Time-stretch by `ratio` (output ≈ frames * ratio) with waveform-similarity
/// overlap-add; returns interleaved samples
fn wsola_stretch(buffer: &AudioBuffer, ratio: f64, window_size: usize) -> Vec<f32> {
    let mono = buffer.to_mono();
    let channels = buffer.channels() as usize;
    let input = buffer.samples();
    let frames = mono.len();

    let synthesis_hop = window_size / 4;
    let analysis_hop = synthesis_hop as f64 / ratio;
    let tolerance = synthesis_hop / 2;
    let target_frames = (frames as f64 * ratio).round() as usize;
    let window = hann_window(window_size);

    let mut output = vec![0.0f32; (target_frames + window_size) * channels];
    let mut norm = vec![0.0f32; target_frames + window_size];

    let sample_at = |pos: usize| mono.get(pos).copied().unwrap_or(0.0);

    let mut previous: Option<usize> = None;
    let mut k = 0usize;
    while k * synthesis_hop < target_frames {
        let nominal = (k as f64 * analysis_hop).round() as usize;
        let position = match previous {
            None => nominal.min(frames.saturating_sub(1)),
            Some(prev) => {
                // Match the natural continuation of the previous frame
                let template = prev + synthesis_hop;
                let lo = nominal.saturating_sub(tolerance);
                let hi = (nominal + tolerance).min(frames.saturating_sub(1));
                best_alignment(&sample_at, template, lo, hi.max(lo), window_size / 2)
            }
        };

        let out_start = k * synthesis_hop;
        for (j, &w) in window.iter().enumerate() {
            let src = position + j;
            let dst = out_start + j;
            norm[dst] += w;
            if src < frames {
                for ch in 0..channels {
                    output[dst * channels + ch] += input[src * channels + ch] * w;
                }
            }
        }

        previous = Some(position);
        k += 1;
    }

    output.truncate(target_frames * channels);
    for (frame, &weight) in norm.iter().take(target_frames).enumerate() {
        for ch in 0..channels {
            let idx = frame * channels + ch;
            output[idx] = if weight > 1e-6 { output[idx] / weight } else { 0.0 };
        }
    }
    output
}

/// Candidate start in `[lo, hi]` whose waveform best correlates with the template
fn best_alignment<F: Fn(usize) -> f32>(
    sample_at: &F,
    template: usize,
    lo: usize,
    hi: usize,
    length: usize,
) -> usize {
    let mut best = lo;
    let mut best_score = f32::MIN;
    for candidate in lo..=hi {
        let score: f32 = (0..length)
            .step_by(4)
            .map(|j| sample_at(template + j) * sample_at(candidate + j))
            .sum();
        if score > best_score {
            best_score = score;
            best = candidate;
        }
    }
    best
}

/// Linear-interpolation resample of interleaved samples to `target_frames`
fn resample_to(samples: &[f32], channels: usize, target_frames: usize) -> Vec<f32> {
    let source_frames = samples.len() / channels;
    if source_frames == 0 {
        return vec![0.0; target_frames * channels];
    }

    let step = source_frames as f64 / target_frames as f64;
    let mut out = Vec::with_capacity(target_frames * channels);
    for i in 0..target_frames {
        let position = i as f64 * step;
        let index = position.floor() as usize;
        let frac = (position - index as f64) as f32;
        let next = (index + 1).min(source_frames - 1);
        let index = index.min(source_frames - 1);
        for ch in 0..channels {
            let a = samples[index * channels + ch];
            let b = samples[next * channels + ch];
            out.push(a + (b - a) * frac);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: u32 = 22050;

    /// Sign changes per sample, a stand-in for pitch on pure tones
    fn calculate_zcr(samples: &[f32]) -> f32 {
        let crossings = samples
            .windows(2)
            .filter(|pair| (pair[0] >= 0.0) != (pair[1] >= 0.0))
            .count();
        crossings as f32 / (samples.len() - 1) as f32
    }

    fn sine(freq: f32, seconds: f32) -> AudioBuffer {
        let len = (SR as f32 * seconds) as usize;
        let samples = (0..len)
            .map(|i| 0.5 * (2.0 * std::f32::consts::PI * freq * i as f32 / SR as f32).sin())
            .collect();
        AudioBuffer::mono(samples, SR).unwrap()
    }

    #[test]
    fn test_octave_up_doubles_frequency() {
        let buffer = sine(220.0, 1.0);
        let shifted = transpose(&buffer, 12).unwrap();

        assert_eq!(shifted.frame_count(), buffer.frame_count());
        let ratio = calculate_zcr(shifted.samples()) / calculate_zcr(buffer.samples());
        assert!((ratio - 2.0).abs() < 0.2, "zcr ratio {}", ratio);
    }

    #[test]
    fn test_octave_down_halves_frequency() {
        let buffer = sine(440.0, 1.0);
        let shifted = transpose(&buffer, -12).unwrap();

        assert_eq!(shifted.frame_count(), buffer.frame_count());
        let ratio = calculate_zcr(shifted.samples()) / calculate_zcr(buffer.samples());
        assert!((ratio - 0.5).abs() < 0.05, "zcr ratio {}", ratio);
    }

    #[test]
    fn test_stereo_keeps_layout() {
        let mono = sine(330.0, 0.5);
        let stereo = AudioBuffer::from_channels(vec![mono.to_mono(), mono.to_mono()], SR).unwrap();
        let shifted = transpose(&stereo, 5).unwrap();
        assert_eq!(shifted.channels(), 2);
        assert_eq!(shifted.frame_count(), stereo.frame_count());
    }

    #[test]
    fn test_zero_is_identity_and_range_checked() {
        let buffer = sine(220.0, 0.1);
        assert_eq!(transpose(&buffer, 0).unwrap(), buffer);
        assert!(matches!(
            transpose(&buffer, 13),
            Err(CoreError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_window_size_for_short_buffers() {
        assert_eq!(window_size_for(100), Some(64));
        assert_eq!(window_size_for(100_000), Some(2048));
        assert_eq!(window_size_for(10), None);
    }
}
