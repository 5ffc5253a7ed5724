// Tempo Estimation - BPM detection from onset-envelope periodicity
// Autocorrelates the spectral-flux envelope and picks the strongest beat period

use serde::{Deserialize, Serialize};

use crate::audio::features::{onset_strength_envelope, smooth, EnvelopeConfig, OnsetEnvelope};
use crate::audio::AudioBuffer;
use crate::error::{CoreError, CoreResult};

/// Lowest tempo the core accepts
pub const MIN_BPM: f64 = 20.0;

/// Highest tempo the core accepts
pub const MAX_BPM: f64 = 300.0;

/// Where a tempo value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TempoSource {
    /// Estimated from the audio
    Estimated,

    /// Supplied by the caller, estimation bypassed
    Manual,

    /// Caller default used after an insufficient-signal estimate
    Fallback,
}

/// Tempo estimation result with BPM and beat grid positions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tempo {
    /// Beats per minute, always finite and within [MIN_BPM, MAX_BPM]
    pub bpm: f64,

    /// Confidence in the estimate [0.0, 1.0]
    /// Higher values indicate a sharper periodicity peak
    pub confidence: f32,

    pub source: TempoSource,

    /// Estimated beat positions in seconds from buffer start
    pub beat_positions: Vec<f64>,
}

impl Tempo {
    /// Validated tempo without beat positions
    pub fn new(bpm: f64, confidence: f32, source: TempoSource) -> CoreResult<Self> {
        if !bpm.is_finite() || !(MIN_BPM..=MAX_BPM).contains(&bpm) {
            return Err(CoreError::InvalidTempo(bpm));
        }

        Ok(Tempo {
            bpm,
            confidence: confidence.clamp(0.0, 1.0),
            source,
            beat_positions: Vec::new(),
        })
    }

    /// Caller-supplied tempo, used verbatim
    pub fn manual(bpm: f64) -> CoreResult<Self> {
        Self::new(bpm, 1.0, TempoSource::Manual)
    }

    /// Default tempo substituted when estimation has nothing to work with
    pub fn fallback(bpm: f64) -> CoreResult<Self> {
        Self::new(bpm, 0.0, TempoSource::Fallback)
    }

    /// Seconds per beat
    pub fn beat_secs(&self) -> f64 {
        60.0 / self.bpm
    }

    /// Fill beat positions on a phase-zero grid up to `duration`
    pub fn with_uniform_beats(mut self, duration: f64) -> Self {
        self.beat_positions = uniform_beats(0.0, self.beat_secs(), duration);
        self
    }

    /// Snap to the nearest whole BPM, re-spacing the beats from the first one
    pub fn with_rounded_bpm(mut self, duration: f64) -> Self {
        self.bpm = self.bpm.round().clamp(MIN_BPM, MAX_BPM);
        if let Some(&phase) = self.beat_positions.first() {
            self.beat_positions = uniform_beats(phase, self.beat_secs(), duration);
        }
        self
    }
}

/// Configuration for tempo estimation
#[derive(Debug, Clone)]
pub struct TempoConfig {
    /// Minimum BPM to consider
    pub min_bpm: f64,

    /// Maximum BPM to consider
    pub max_bpm: f64,

    /// Half/double-tempo ambiguities resolve toward this tempo
    pub anchor_bpm: f64,

    /// Shorter buffers do not carry enough periodicity
    pub min_duration_secs: f64,

    /// Peaks at least this fraction of the strongest one compete for the anchor
    pub strong_peak_ratio: f32,

    pub envelope: EnvelopeConfig,
}

impl Default for TempoConfig {
    fn default() -> Self {
        TempoConfig {
            min_bpm: MIN_BPM,
            max_bpm: MAX_BPM,
            anchor_bpm: 120.0,
            min_duration_secs: 2.0,
            strong_peak_ratio: 0.5,
            envelope: EnvelopeConfig::default(),
        }
    }
}

/// Estimate tempo with the default configuration
pub fn estimate_tempo(buffer: &AudioBuffer) -> CoreResult<Tempo> {
    estimate_tempo_with_config(buffer, &TempoConfig::default())
}

/// Use the manual override verbatim when present, otherwise estimate
pub fn resolve_tempo(
    buffer: &AudioBuffer,
    manual_bpm: Option<f64>,
    config: &TempoConfig,
) -> CoreResult<Tempo> {
    match manual_bpm {
        Some(bpm) => {
            log::info!("Using manual tempo override: {:.2} BPM", bpm);
            Ok(Tempo::manual(bpm)?.with_uniform_beats(buffer.duration_secs()))
        }
        None => estimate_tempo_with_config(buffer, config),
    }
}

/// Estimate tempo with custom configuration
///
/// Algorithm:
/// 1. Compute the spectral-flux onset envelope and smooth it
/// 2. Autocorrelate the mean-removed envelope (unbiased, normalized by lag 0)
/// 3. Collect autocorrelation peaks whose period lies in the BPM range
/// 4. Among strong peaks, prefer the one closest to the anchor tempo
/// 5. Refine the lag with parabolic interpolation and phase-align a beat grid
pub fn estimate_tempo_with_config(buffer: &AudioBuffer, config: &TempoConfig) -> CoreResult<Tempo> {
    if config.min_bpm <= 0.0 || config.max_bpm <= config.min_bpm || config.anchor_bpm <= 0.0 {
        return Err(CoreError::InvalidParameter(format!(
            "tempo range {}..{} anchor {}",
            config.min_bpm, config.max_bpm, config.anchor_bpm
        )));
    }

    let duration = buffer.duration_secs();
    if duration < config.min_duration_secs {
        return Err(CoreError::InsufficientSignal(format!(
            "{:.2}s is shorter than the {:.2}s needed for tempo estimation",
            duration, config.min_duration_secs
        )));
    }
    if buffer.is_silent() {
        return Err(CoreError::InsufficientSignal("buffer is silent".to_string()));
    }

    let raw = onset_strength_envelope(buffer, &config.envelope)?;
    let envelope = OnsetEnvelope {
        values: smooth(&raw.values, 3),
        ..raw
    };

    let fps = envelope.frame_rate();
    let min_lag = ((fps * 60.0 / config.max_bpm).ceil() as usize).max(2);
    let max_lag = ((fps * 60.0 / config.min_bpm).floor() as usize).min(envelope.len() / 2);

    if max_lag < min_lag + 2 {
        return Err(CoreError::InsufficientSignal(
            "envelope too short for the tempo range".to_string(),
        ));
    }

    let acf = normalized_autocorrelation(&envelope.values, max_lag + 1).ok_or_else(|| {
        CoreError::InsufficientSignal("onset envelope has no variation".to_string())
    })?;

    let peaks = find_periodicity_peaks(&acf, min_lag, max_lag);
    if peaks.is_empty() {
        return Err(CoreError::InsufficientSignal(
            "no periodicity in the tempo range".to_string(),
        ));
    }

    let best_lag = select_anchor_peak(&peaks, fps, config);
    let refined_lag = refine_lag(&acf, best_lag);
    let bpm = (60.0 * fps / refined_lag).clamp(config.min_bpm, config.max_bpm);
    let confidence = peak_sharpness(&acf, best_lag);

    log::debug!(
        "Tempo peaks: {:?}",
        peaks
            .iter()
            .map(|&(lag, strength)| (60.0 * fps / lag as f64, strength))
            .collect::<Vec<_>>()
    );

    let phase = best_phase(&envelope.values, refined_lag);
    let mut tempo = Tempo::new(bpm, confidence, TempoSource::Estimated)?;
    tempo.beat_positions = uniform_beats(phase / fps, 60.0 / bpm, duration);

    log::info!(
        "Estimated tempo: {:.2} BPM (confidence {:.2}, {} beats)",
        tempo.bpm,
        tempo.confidence,
        tempo.beat_positions.len()
    );

    Ok(tempo)
}

/// Unbiased autocorrelation of the mean-removed signal, normalized by lag 0
/// Returns None for a constant signal
fn normalized_autocorrelation(values: &[f32], max_lag: usize) -> Option<Vec<f32>> {
    let n = values.len();
    if n == 0 {
        return None;
    }

    let mean = values.iter().sum::<f32>() / n as f32;
    let centered: Vec<f32> = values.iter().map(|v| v - mean).collect();
    let energy = centered.iter().map(|v| v * v).sum::<f32>() / n as f32;

    if energy <= f32::EPSILON {
        return None;
    }

    let max_lag = max_lag.min(n - 1);
    let acf = (0..=max_lag)
        .map(|lag| {
            let sum: f32 = centered[..n - lag]
                .iter()
                .zip(&centered[lag..])
                .map(|(a, b)| a * b)
                .sum();
            sum / (n - lag) as f32 / energy
        })
        .collect();

    Some(acf)
}

/// Local maxima of the autocorrelation inside `[min_lag, max_lag]`
fn find_periodicity_peaks(acf: &[f32], min_lag: usize, max_lag: usize) -> Vec<(usize, f32)> {
    let upper = max_lag.min(acf.len().saturating_sub(2));
    (min_lag.max(1)..=upper)
        .filter(|&lag| acf[lag] > 0.0 && acf[lag] > acf[lag - 1] && acf[lag] >= acf[lag + 1])
        .map(|lag| (lag, acf[lag]))
        .collect()
}

/// Pick the strong peak closest (in octaves) to the anchor tempo
fn select_anchor_peak(peaks: &[(usize, f32)], fps: f64, config: &TempoConfig) -> usize {
    let strongest = peaks.iter().fold(0.0f32, |acc, &(_, s)| acc.max(s));
    let threshold = strongest * config.strong_peak_ratio;

    let octave_distance = |lag: usize| {
        let bpm = 60.0 * fps / lag as f64;
        (bpm / config.anchor_bpm).log2().abs()
    };

    peaks
        .iter()
        .filter(|&&(_, strength)| strength >= threshold)
        .min_by(|a, b| {
            octave_distance(a.0)
                .partial_cmp(&octave_distance(b.0))
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal))
        })
        .map(|&(lag, _)| lag)
        .unwrap_or(peaks[0].0)
}

/// Parabolic interpolation around an autocorrelation peak
fn refine_lag(acf: &[f32], lag: usize) -> f64 {
    if lag == 0 || lag + 1 >= acf.len() {
        return lag as f64;
    }

    let (left, center, right) = (acf[lag - 1] as f64, acf[lag] as f64, acf[lag + 1] as f64);
    let denominator = left - 2.0 * center + right;
    if denominator.abs() < f64::EPSILON {
        return lag as f64;
    }

    let offset = (0.5 * (left - right) / denominator).clamp(-0.5, 0.5);
    lag as f64 + offset
}

/// Peak height above the mean of its neighborhood (lags within ±25%,
/// excluding the peak's own lobe), clamped to [0, 1]
fn peak_sharpness(acf: &[f32], lag: usize) -> f32 {
    let lobe = (lag / 8).max(3);
    let lo = (lag * 3 / 4).max(1);
    let hi = (lag * 5 / 4).min(acf.len() - 1);

    let neighborhood: Vec<f32> = (lo..=hi)
        .filter(|&k| k.abs_diff(lag) > lobe)
        .map(|k| acf[k])
        .collect();

    if neighborhood.is_empty() {
        return acf[lag].clamp(0.0, 1.0);
    }

    let baseline = neighborhood.iter().sum::<f32>() / neighborhood.len() as f32;
    (acf[lag] - baseline).clamp(0.0, 1.0)
}

/// Find the beat phase (in frames) whose grid collects the most onset energy
fn best_phase(envelope: &[f32], period: f64) -> f64 {
    let steps = period.floor().max(1.0) as usize;
    let mut best_phase = 0.0;
    let mut best_score = f32::MIN;

    for step in 0..steps {
        let phase = step as f64;
        let mut score = 0.0f32;
        let mut position = phase;
        while (position.round() as usize) < envelope.len() {
            score += envelope[position.round() as usize];
            position += period;
        }

        if score > best_score {
            best_score = score;
            best_phase = phase;
        }
    }

    best_phase
}

/// Beat times `phase + k * interval` that do not exceed `duration`
fn uniform_beats(phase: f64, interval: f64, duration: f64) -> Vec<f64> {
    if interval <= 0.0 || !interval.is_finite() {
        return Vec::new();
    }

    let mut beats = Vec::new();
    let mut k = 0usize;
    loop {
        let t = phase + k as f64 * interval;
        if t > duration + 1e-9 {
            break;
        }
        beats.push(t);
        k += 1;
    }
    beats
}
