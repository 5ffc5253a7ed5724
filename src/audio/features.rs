// Spectral feature extraction
// Spectral-flux onset-strength envelope shared by tempo estimation and
// one-shot detection, plus the windowed-FFT helper used by key and melody analysis

use realfft::{RealFftPlanner, RealToComplex};
use std::sync::Arc;

use crate::audio::AudioBuffer;
use crate::error::{CoreError, CoreResult};

/// Framing for the onset-strength envelope
#[derive(Debug, Clone)]
pub struct EnvelopeConfig {
    /// FFT window size in samples
    pub window_size: usize,

    /// Hop size in samples (advance between frames)
    pub hop_size: usize,
}

impl Default for EnvelopeConfig {
    fn default() -> Self {
        EnvelopeConfig {
            window_size: 1024,
            hop_size: 256,
        }
    }
}

impl EnvelopeConfig {
    pub fn validate(&self) -> CoreResult<()> {
        if self.window_size < 2 || self.hop_size == 0 || self.hop_size > self.window_size {
            return Err(CoreError::InvalidParameter(format!(
                "envelope window {} / hop {}",
                self.window_size, self.hop_size
            )));
        }
        Ok(())
    }
}

/// Frame-wise onset strength (rectified spectral flux)
///
/// Frames are centered: frame `i` is centered on sample `i * hop_size`.
#[derive(Debug, Clone)]
pub struct OnsetEnvelope {
    pub values: Vec<f32>,
    pub hop_size: usize,
    pub sample_rate: u32,
}

impl OnsetEnvelope {
    /// Envelope frames per second
    pub fn frame_rate(&self) -> f64 {
        self.sample_rate as f64 / self.hop_size as f64
    }

    /// Time of the frame center in seconds
    pub fn frame_to_secs(&self, frame: usize) -> f64 {
        (frame * self.hop_size) as f64 / self.sample_rate as f64
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn mean(&self) -> f32 {
        if self.values.is_empty() {
            return 0.0;
        }
        self.values.iter().sum::<f32>() / self.values.len() as f32
    }

    pub fn std_dev(&self) -> f32 {
        if self.values.is_empty() {
            return 0.0;
        }
        let mean = self.mean();
        let variance = self.values.iter().map(|x| (x - mean).powi(2)).sum::<f32>()
            / self.values.len() as f32;
        variance.sqrt()
    }
}

/// Windowed real FFT with a cached plan
pub struct SpectrumAnalyzer {
    fft: Arc<dyn RealToComplex<f32>>,
    window: Vec<f32>,
}

impl SpectrumAnalyzer {
    pub fn new(window_size: usize) -> Self {
        let mut planner = RealFftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(window_size);
        SpectrumAnalyzer {
            fft,
            window: hann_window(window_size),
        }
    }

    pub fn window_size(&self) -> usize {
        self.window.len()
    }

    /// Hann-windowed magnitude spectrum of one frame
    /// Short frames are zero-padded to the window size
    pub fn magnitudes(&self, frame: &[f32]) -> CoreResult<Vec<f32>> {
        let mut input = self.fft.make_input_vec();
        for (i, slot) in input.iter_mut().enumerate() {
            *slot = frame.get(i).copied().unwrap_or(0.0) * self.window[i];
        }

        let mut spectrum = self.fft.make_output_vec();
        self.fft
            .process(&mut input, &mut spectrum)
            .map_err(|e| CoreError::InvalidParameter(format!("FFT failed: {}", e)))?;

        Ok(spectrum.iter().map(|c| c.norm()).collect())
    }
}

/// Periodic Hann window
pub fn hann_window(size: usize) -> Vec<f32> {
    if size == 0 {
        return Vec::new();
    }
    (0..size)
        .map(|i| 0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / size as f32).cos()))
        .collect()
}

/// Compute the onset-strength envelope of a buffer
///
/// Spectral flux = sum of positive differences between consecutive magnitude
/// spectra. The signal is padded by half a window on both sides so the first
/// and last transients get full frames; frame 0 is compared against silence.
pub fn onset_strength_envelope(
    buffer: &AudioBuffer,
    config: &EnvelopeConfig,
) -> CoreResult<OnsetEnvelope> {
    config.validate()?;

    let mono = buffer.to_mono();
    let window_size = config.window_size;
    let hop_size = config.hop_size;
    let pad = window_size / 2;

    let mut padded = vec![0.0f32; mono.len() + 2 * pad];
    padded[pad..pad + mono.len()].copy_from_slice(&mono);

    let num_frames = (padded.len() - window_size) / hop_size + 1;
    let analyzer = SpectrumAnalyzer::new(window_size);

    let mut values = Vec::with_capacity(num_frames);
    let mut prev_spectrum = vec![0.0f32; window_size / 2 + 1];

    for frame_idx in 0..num_frames {
        let start = frame_idx * hop_size;
        let frame = &padded[start..start + window_size];
        let spectrum = analyzer.magnitudes(frame)?;

        let flux: f32 = spectrum
            .iter()
            .zip(prev_spectrum.iter())
            .map(|(curr, prev)| (curr - prev).max(0.0))
            .sum();

        values.push(flux);
        prev_spectrum = spectrum;
    }

    log::debug!(
        "Onset envelope: {} frames @ {:.1} fps",
        values.len(),
        buffer.sample_rate() as f64 / hop_size as f64
    );

    Ok(OnsetEnvelope {
        values,
        hop_size,
        sample_rate: buffer.sample_rate(),
    })
}

/// Moving-average smoothing with a centered window
pub fn smooth(values: &[f32], window_size: usize) -> Vec<f32> {
    let mut smoothed = vec![0.0f32; values.len()];
    let half_window = window_size / 2;

    for i in 0..values.len() {
        let start = i.saturating_sub(half_window);
        let end = (i + half_window + 1).min(values.len());
        let sum: f32 = values[start..end].iter().sum();
        smoothed[i] = sum / (end - start) as f32;
    }

    smoothed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn click_track(sample_rate: u32, seconds: f64, interval: f64) -> AudioBuffer {
        let len = (sample_rate as f64 * seconds) as usize;
        let mut samples = vec![0.0f32; len];
        let mut t = 0.0;
        while t < seconds {
            let start = (t * sample_rate as f64) as usize;
            for i in 0..(sample_rate as usize / 200) {
                if start + i < len {
                    let decay = (-(i as f32) / (sample_rate as f32 * 0.002)).exp();
                    samples[start + i] =
                        0.8 * decay * (2.0 * std::f32::consts::PI * 1000.0 * i as f32 / sample_rate as f32).sin();
                }
            }
            t += interval;
        }
        AudioBuffer::mono(samples, sample_rate).unwrap()
    }

    #[test]
    fn test_hann_window() {
        let samples = hann_window(100);

        // Window should taper at edges
        assert!(samples[0] < 0.1);
        assert!(samples[99] < 0.1);
        assert!(samples[50] > 0.9);
    }

    #[test]
    fn test_envelope_frame_count_and_timing() {
        let buffer = AudioBuffer::mono(vec![0.0; 22050], 22050).unwrap();
        let config = EnvelopeConfig::default();
        let envelope = onset_strength_envelope(&buffer, &config).unwrap();

        // Centered frames: one per hop plus the frame at t = 0
        assert_eq!(envelope.len(), 22050 / 256 + 1);
        assert!(envelope.values.iter().all(|&v| v == 0.0));
        assert!((envelope.frame_to_secs(100) - 100.0 * 256.0 / 22050.0).abs() < 1e-12);
    }

    #[test]
    fn test_envelope_peaks_near_clicks() {
        let buffer = click_track(22050, 2.0, 0.5);
        let envelope = onset_strength_envelope(&buffer, &EnvelopeConfig::default()).unwrap();

        // Strongest frame within each half second should sit next to the click
        let frames_per_half = (0.5 * envelope.frame_rate()) as usize;
        for beat in 0..4 {
            let center = (beat as f64 * 0.5 * envelope.frame_rate()) as usize;
            let lo = center.saturating_sub(frames_per_half / 2);
            let hi = (center + frames_per_half / 2).min(envelope.len());
            let (best, _) = envelope.values[lo..hi]
                .iter()
                .enumerate()
                .fold((0, f32::MIN), |acc, (i, &v)| if v > acc.1 { (i, v) } else { acc });
            let best_secs = envelope.frame_to_secs(lo + best);
            assert!(
                (best_secs - beat as f64 * 0.5).abs() < 0.03,
                "beat {} peaked at {:.3}s",
                beat,
                best_secs
            );
        }
    }

    #[test]
    fn test_invalid_envelope_config() {
        let buffer = AudioBuffer::mono(vec![0.0; 1000], 8000).unwrap();
        let config = EnvelopeConfig {
            window_size: 512,
            hop_size: 0,
        };
        assert!(onset_strength_envelope(&buffer, &config).is_err());
    }

    #[test]
    fn test_smooth_preserves_constant() {
        let values = vec![2.0; 9];
        assert!(smooth(&values, 3).iter().all(|&v| (v - 2.0).abs() < 1e-6));
    }
}
