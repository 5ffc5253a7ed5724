// Onset Slicer - transient detection and one-shot extraction
// Peak-picks the shared spectral-flux envelope with an adaptive threshold

use serde::{Deserialize, Serialize};

use crate::audio::{onset_strength_envelope, AudioBuffer, EnvelopeConfig};
use crate::error::{CoreError, CoreResult};
use crate::slicing::segment::{fade_out, AppliedEffects, Segment, SegmentKind};

/// Onset detection result
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Onset {
    /// Time in seconds from start of audio
    pub time_secs: f64,

    /// Onset strength/confidence [0.0, 1.0]
    /// Higher values indicate stronger spectral changes
    pub strength: f32,
}

/// Ordered onsets detected in one stem
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OnsetList {
    onsets: Vec<Onset>,
}

impl OnsetList {
    pub fn new(mut onsets: Vec<Onset>) -> Self {
        onsets.sort_by(|a, b| a.time_secs.total_cmp(&b.time_secs));
        OnsetList { onsets }
    }

    pub fn len(&self) -> usize {
        self.onsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.onsets.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Onset> {
        self.onsets.iter()
    }

    pub fn times(&self) -> Vec<f64> {
        self.onsets.iter().map(|o| o.time_secs).collect()
    }
}

/// Configuration for onset detection
#[derive(Debug, Clone)]
pub struct OnsetConfig {
    pub envelope: EnvelopeConfig,

    /// Half-width (in envelope frames) of the local-mean window
    pub local_window_frames: usize,

    /// Threshold margin at sensitivity 0, in global standard deviations
    /// Threshold = local_mean + (1 - sensitivity) * margin_factor * std(flux)
    pub margin_factor: f32,

    /// Minimum time between onsets in milliseconds
    /// Prevents double-triggering on one transient
    pub min_onset_gap_ms: f64,

    /// Peaks below this fraction of the envelope maximum are never onsets
    pub noise_floor_ratio: f32,
}

impl Default for OnsetConfig {
    fn default() -> Self {
        OnsetConfig {
            envelope: EnvelopeConfig::default(),
            local_window_frames: 8,
            margin_factor: 1.5,
            min_onset_gap_ms: 60.0,
            noise_floor_ratio: 1e-4,
        }
    }
}

/// Detect onsets with the default configuration
///
/// `sensitivity` in [0, 1]; higher sensitivity never yields fewer onsets.
pub fn detect_onsets(buffer: &AudioBuffer, sensitivity: f32) -> CoreResult<OnsetList> {
    detect_onsets_with_config(buffer, sensitivity, &OnsetConfig::default())
}

pub fn detect_onsets_with_config(
    buffer: &AudioBuffer,
    sensitivity: f32,
    config: &OnsetConfig,
) -> CoreResult<OnsetList> {
    if !(0.0..=1.0).contains(&sensitivity) {
        return Err(CoreError::InvalidParameter(format!(
            "onset sensitivity {} outside [0, 1]",
            sensitivity
        )));
    }
    if buffer.is_silent() {
        return Err(CoreError::InsufficientSignal(
            "buffer is silent, no onsets to detect".to_string(),
        ));
    }

    let envelope = onset_strength_envelope(buffer, &config.envelope)?;
    let flux = &envelope.values;
    let std_dev = envelope.std_dev();
    let peak = flux.iter().fold(0.0f32, |acc, &v| acc.max(v));
    let noise_floor = peak * config.noise_floor_ratio;
    let margin = (1.0 - sensitivity) * config.margin_factor * std_dev;

    let min_gap_frames =
        (config.min_onset_gap_ms / 1000.0 * envelope.frame_rate()).ceil().max(1.0) as usize;

    let mut onsets = Vec::new();
    let mut last_onset_frame: Option<usize> = None;

    // Earliest-first selection keeps the maximum number of gap-respecting peaks
    for i in 0..flux.len() {
        let prev = if i > 0 { flux[i - 1] } else { 0.0 };
        let next = flux.get(i + 1).copied().unwrap_or(0.0);
        let is_peak = flux[i] > prev && flux[i] >= next;
        if !is_peak || flux[i] <= noise_floor {
            continue;
        }

        let threshold = local_mean(flux, i, config.local_window_frames) + margin;
        if flux[i] <= threshold {
            continue;
        }

        let gap_ok = last_onset_frame.map_or(true, |last| i - last >= min_gap_frames);
        if !gap_ok {
            continue;
        }

        // 1e-6 protects from division by zero
        let strength = (flux[i] - threshold) / (std_dev + 1e-6);
        onsets.push(Onset {
            time_secs: envelope.frame_to_secs(i),
            strength: strength.clamp(0.0, 1.0),
        });
        last_onset_frame = Some(i);
    }

    log::debug!(
        "Detected {} onsets (sensitivity {:.2}, min gap {} frames)",
        onsets.len(),
        sensitivity,
        min_gap_frames
    );

    Ok(OnsetList::new(onsets))
}

fn local_mean(values: &[f32], center: usize, half_width: usize) -> f32 {
    let start = center.saturating_sub(half_width);
    let end = (center + half_width + 1).min(values.len());
    values[start..end].iter().sum::<f32>() / (end - start) as f32
}

/// Configuration for one-shot extraction
#[derive(Debug, Clone)]
pub struct OneShotConfig {
    /// One-shots longer than this are trimmed
    pub max_duration_ms: f64,

    /// Fade-out applied to every one-shot tail
    pub fade_out_ms: f64,

    /// Fragments shorter than this many frames are skipped
    pub min_frames: usize,

    /// Maximum number of one-shots per stem
    pub max_count: usize,
}

impl Default for OneShotConfig {
    fn default() -> Self {
        OneShotConfig {
            max_duration_ms: 1000.0,
            fade_out_ms: 5.0,
            min_frames: 100,
            max_count: 40,
        }
    }
}

/// Cut one segment per onset, spanning to the next onset (or the end of the buffer)
pub fn extract_one_shots(
    buffer: &AudioBuffer,
    onsets: &OnsetList,
    stem: &str,
    config: &OneShotConfig,
) -> CoreResult<Vec<Segment>> {
    if config.max_duration_ms <= 0.0 || config.fade_out_ms < 0.0 {
        return Err(CoreError::InvalidParameter(format!(
            "one-shot max {} ms / fade {} ms",
            config.max_duration_ms, config.fade_out_ms
        )));
    }

    let total_frames = buffer.frame_count();
    let max_frames = buffer.secs_to_frame(config.max_duration_ms / 1000.0).max(1);
    let fade_frames = buffer.secs_to_frame(config.fade_out_ms / 1000.0);
    let channels = buffer.channels() as usize;
    let times = onsets.times();

    let mut segments = Vec::new();
    for (i, &time) in times.iter().enumerate() {
        if segments.len() >= config.max_count {
            log::debug!("One-shot limit of {} reached for {}", config.max_count, stem);
            break;
        }

        let start = buffer.secs_to_frame(time);
        let next = times
            .get(i + 1)
            .map(|&t| buffer.secs_to_frame(t))
            .unwrap_or(total_frames);
        let end = next.min(total_frames).min(start + max_frames);

        if end <= start || end - start < config.min_frames {
            log::debug!("Skipping {}-frame fragment at {:.3}s", end.saturating_sub(start), time);
            continue;
        }

        let mut samples = buffer.slice_frames(start, end)?.into_samples();
        fade_out(&mut samples, channels, fade_frames);
        let audio = buffer.with_samples(samples)?;

        segments.push(Segment {
            stem: stem.to_string(),
            index: segments.len(),
            kind: SegmentKind::OneShot,
            start_secs: start as f64 / buffer.sample_rate() as f64,
            end_secs: end as f64 / buffer.sample_rate() as f64,
            audio,
            effects: AppliedEffects {
                fade_out_ms: config.fade_out_ms,
                ..AppliedEffects::default()
            },
        });
    }

    log::info!("Extracted {} one-shots from {}", segments.len(), stem);
    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: u32 = 22050;

    /// Deterministic pseudo-random generator for test signals
    struct Lcg(u64);

    impl Lcg {
        fn next_f32(&mut self) -> f32 {
            self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            ((self.0 >> 33) as f32 / (1u64 << 31) as f32) * 2.0 - 1.0
        }
    }

    fn hit(samples: &mut [f32], start: usize, amplitude: f32, freq: f32) {
        for i in 0..(SR as usize / 100) {
            if start + i < samples.len() {
                let decay = (-(i as f32) / (SR as f32 * 0.003)).exp();
                samples[start + i] +=
                    amplitude * decay * (2.0 * std::f32::consts::PI * freq * i as f32 / SR as f32).sin();
            }
        }
    }

    fn click_track(bpm: f64, seconds: f64) -> AudioBuffer {
        let len = (SR as f64 * seconds) as usize;
        let mut samples = vec![0.0f32; len];
        let interval = (60.0 / bpm * SR as f64) as usize;
        let mut start = 0;
        while start < len {
            hit(&mut samples, start, 0.9, 1200.0);
            start += interval;
        }
        AudioBuffer::mono(samples, SR).unwrap()
    }

    /// Hits of varying loudness over low-level noise
    fn busy_signal() -> AudioBuffer {
        let mut rng = Lcg(42);
        let len = SR as usize * 4;
        let mut samples: Vec<f32> = (0..len).map(|_| rng.next_f32() * 0.01).collect();
        let mut position = 0usize;
        while position < len {
            let amplitude = 0.1 + 0.8 * (rng.next_f32() * 0.5 + 0.5);
            hit(&mut samples, position, amplitude, 600.0 + 1500.0 * (rng.next_f32() * 0.5 + 0.5));
            position += 2000 + ((rng.next_f32() * 0.5 + 0.5) * 6000.0) as usize;
        }
        AudioBuffer::mono(samples, SR).unwrap()
    }

    #[test]
    fn test_detects_each_click() {
        let buffer = click_track(120.0, 4.0);
        let onsets = detect_onsets(&buffer, 0.5).unwrap();

        assert_eq!(onsets.len(), 8);
        for (k, time) in onsets.times().iter().enumerate() {
            assert!((time - k as f64 * 0.5).abs() < 0.03, "onset {} at {:.3}", k, time);
        }
    }

    #[test]
    fn test_sensitivity_is_monotonic() {
        let buffer = busy_signal();
        let mut previous = 0;
        for step in 0..=10 {
            let sensitivity = step as f32 / 10.0;
            let count = detect_onsets(&buffer, sensitivity).unwrap().len();
            assert!(
                count >= previous,
                "sensitivity {} found {} < {}",
                sensitivity,
                count,
                previous
            );
            previous = count;
        }
        assert!(previous > 0);
    }

    #[test]
    fn test_min_gap_respected() {
        let buffer = busy_signal();
        let times = detect_onsets(&buffer, 1.0).unwrap().times();
        for pair in times.windows(2) {
            assert!(pair[1] - pair[0] >= 0.06 - 1e-9);
        }
    }

    #[test]
    fn test_invalid_sensitivity() {
        let buffer = click_track(120.0, 1.0);
        assert!(matches!(
            detect_onsets(&buffer, 1.5),
            Err(CoreError::InvalidParameter(_))
        ));
        assert!(detect_onsets(&buffer, f32::NAN).is_err());
    }

    #[test]
    fn test_silent_buffer_is_insufficient() {
        let buffer = AudioBuffer::mono(vec![0.0; SR as usize], SR).unwrap();
        assert!(matches!(
            detect_onsets(&buffer, 0.5),
            Err(CoreError::InsufficientSignal(_))
        ));
    }

    #[test]
    fn test_extract_spans_to_next_onset() {
        let buffer = click_track(120.0, 2.0);
        let onsets = OnsetList::new(vec![
            Onset { time_secs: 0.0, strength: 1.0 },
            Onset { time_secs: 0.5, strength: 1.0 },
            Onset { time_secs: 1.5, strength: 1.0 },
        ]);
        let config = OneShotConfig {
            max_duration_ms: 2000.0,
            ..OneShotConfig::default()
        };
        let shots = extract_one_shots(&buffer, &onsets, "drums", &config).unwrap();

        assert_eq!(shots.len(), 3);
        assert!((shots[0].duration_secs() - 0.5).abs() < 1e-9);
        assert!((shots[1].duration_secs() - 1.0).abs() < 1e-9);
        // Last one runs to the end of the buffer
        assert!((shots[2].end_secs - 2.0).abs() < 1e-9);
        assert!(shots.iter().all(|s| s.kind == SegmentKind::OneShot && s.stem == "drums"));
        assert_eq!(shots[2].index, 2);
    }

    #[test]
    fn test_extract_trims_and_fades() {
        let buffer = AudioBuffer::mono(vec![0.5; SR as usize * 2], SR).unwrap();
        let onsets = OnsetList::new(vec![Onset { time_secs: 0.0, strength: 1.0 }]);
        let shots = extract_one_shots(&buffer, &onsets, "bass", &OneShotConfig::default()).unwrap();

        assert_eq!(shots.len(), 1);
        assert_eq!(shots[0].audio.frame_count(), SR as usize);
        let samples = shots[0].audio.samples();
        assert!(samples[samples.len() - 1].abs() < 0.01);
        assert!((samples[0] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_extract_skips_tiny_fragments_and_limits_count() {
        let buffer = AudioBuffer::mono(vec![0.5; SR as usize], SR).unwrap();
        let mut list = vec![Onset { time_secs: 0.0, strength: 1.0 }];
        // 50 frames later: too short to keep
        list.push(Onset { time_secs: 50.0 / SR as f64, strength: 1.0 });
        let shots = extract_one_shots(&buffer, &OnsetList::new(list), "fx", &OneShotConfig::default())
            .unwrap();
        assert_eq!(shots.len(), 1);

        let many: Vec<Onset> = (0..60)
            .map(|i| Onset { time_secs: i as f64 * 0.015, strength: 1.0 })
            .collect();
        let shots = extract_one_shots(&buffer, &OnsetList::new(many), "fx", &OneShotConfig::default())
            .unwrap();
        assert_eq!(shots.len(), 40);
    }
}
