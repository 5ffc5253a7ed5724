// Key Estimation - Tonic and mode from chroma energy
// Folds spectral energy into 12 pitch classes and correlates it against
// rotated Krumhansl-Schmuckler major/minor profiles

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::audio::{AudioBuffer, SpectrumAnalyzer};
use crate::error::{CoreError, CoreResult};

/// Krumhansl-Schmuckler major key profile, tonic first
pub const MAJOR_PROFILE: [f32; 12] = [
    6.35, 2.23, 3.48, 2.33, 4.38, 4.09, 2.52, 5.19, 2.39, 3.66, 2.29, 2.88,
];

/// Krumhansl-Schmuckler minor key profile, tonic first
pub const MINOR_PROFILE: [f32; 12] = [
    6.33, 2.68, 3.52, 5.38, 2.60, 3.53, 2.54, 4.75, 3.98, 2.69, 3.34, 3.17,
];

/// Pitch class (chromatic note without octave)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PitchClass {
    C,
    Cs,
    D,
    Ds,
    E,
    F,
    Fs,
    G,
    Gs,
    A,
    As,
    B,
}

impl PitchClass {
    pub const ALL: [PitchClass; 12] = [
        PitchClass::C,
        PitchClass::Cs,
        PitchClass::D,
        PitchClass::Ds,
        PitchClass::E,
        PitchClass::F,
        PitchClass::Fs,
        PitchClass::G,
        PitchClass::Gs,
        PitchClass::A,
        PitchClass::As,
        PitchClass::B,
    ];

    /// Semitones above C (0-11)
    pub fn index(self) -> usize {
        self as usize
    }

    /// Pitch class for any semitone count, wrapping octaves
    pub fn from_index(index: i32) -> PitchClass {
        Self::ALL[index.rem_euclid(12) as usize]
    }

    pub fn name(self) -> &'static str {
        match self {
            PitchClass::C => "C",
            PitchClass::Cs => "C#",
            PitchClass::D => "D",
            PitchClass::Ds => "D#",
            PitchClass::E => "E",
            PitchClass::F => "F",
            PitchClass::Fs => "F#",
            PitchClass::G => "G",
            PitchClass::Gs => "G#",
            PitchClass::A => "A",
            PitchClass::As => "A#",
            PitchClass::B => "B",
        }
    }

    pub fn transpose(self, semitones: i32) -> PitchClass {
        Self::from_index(self.index() as i32 + semitones)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Major,
    Minor,
}

impl Mode {
    /// Short label used in file tags ("Maj" / "Min")
    pub fn short(self) -> &'static str {
        match self {
            Mode::Major => "Maj",
            Mode::Minor => "Min",
        }
    }
}

/// Estimated key of one buffer
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KeyEstimate {
    pub tonic: PitchClass,
    pub mode: Mode,

    /// Correlation margin between the winning and runner-up profile [0.0, 1.0]
    pub confidence: f32,

    /// Pearson correlation of the winning profile
    pub correlation: f32,
}

impl KeyEstimate {
    /// Same mode, tonic shifted by `semitones`
    pub fn transposed(&self, semitones: i32) -> KeyEstimate {
        KeyEstimate {
            tonic: self.tonic.transpose(semitones),
            ..*self
        }
    }

    /// Compact tag for file names, e.g. "CMaj", "F#Min"
    pub fn tag(&self) -> String {
        format!("{}{}", self.tonic.name(), self.mode.short())
    }
}

impl fmt::Display for KeyEstimate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.tonic.name(), self.mode.short())
    }
}

/// Configuration for chroma extraction
#[derive(Debug, Clone)]
pub struct KeyConfig {
    /// FFT window size in samples
    pub window_size: usize,

    /// Hop size in samples
    pub hop_size: usize,

    /// Lowest frequency folded into the chroma (Hz)
    pub min_freq: f32,

    /// Highest frequency folded into the chroma (Hz)
    pub max_freq: f32,

    /// Shorter buffers are rejected as insufficient
    pub min_duration_secs: f64,
}

impl Default for KeyConfig {
    fn default() -> Self {
        KeyConfig {
            window_size: 8192,
            hop_size: 4096,
            min_freq: 55.0,
            max_freq: 5000.0,
            min_duration_secs: 0.5,
        }
    }
}

/// Estimate key with the default configuration
pub fn estimate_key(buffer: &AudioBuffer) -> CoreResult<KeyEstimate> {
    estimate_key_with_config(buffer, &KeyConfig::default())
}

/// Estimate key with custom configuration
pub fn estimate_key_with_config(buffer: &AudioBuffer, config: &KeyConfig) -> CoreResult<KeyEstimate> {
    if config.window_size < 2 || config.hop_size == 0 || config.min_freq >= config.max_freq {
        return Err(CoreError::InvalidParameter(format!(
            "key window {} / hop {} / band {}..{} Hz",
            config.window_size, config.hop_size, config.min_freq, config.max_freq
        )));
    }
    if buffer.duration_secs() < config.min_duration_secs {
        return Err(CoreError::InsufficientSignal(format!(
            "{:.2}s is too short for key estimation",
            buffer.duration_secs()
        )));
    }
    if buffer.is_silent() {
        return Err(CoreError::InsufficientSignal("buffer is silent".to_string()));
    }

    let chroma = compute_chroma(buffer, config)?;
    let total: f32 = chroma.iter().sum();
    if total <= f32::EPSILON {
        return Err(CoreError::InsufficientSignal(
            "no tonal energy in the analysis band".to_string(),
        ));
    }

    let mut scores: Vec<(PitchClass, Mode, f32)> = Vec::with_capacity(24);
    for tonic in PitchClass::ALL {
        for (mode, profile) in [(Mode::Major, &MAJOR_PROFILE), (Mode::Minor, &MINOR_PROFILE)] {
            let rotated = rotate_profile(profile, tonic.index());
            scores.push((tonic, mode, pearson(&chroma, &rotated)));
        }
    }

    scores.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal));
    let (tonic, mode, best) = scores[0];
    let runner_up = scores[1].2;

    let estimate = KeyEstimate {
        tonic,
        mode,
        confidence: (best - runner_up).clamp(0.0, 1.0),
        correlation: best,
    };

    log::info!(
        "Estimated key: {} (r = {:.3}, confidence {:.3})",
        estimate,
        best,
        estimate.confidence
    );

    Ok(estimate)
}

/// 12-bin pitch-class energy summed over all frames
pub fn compute_chroma(buffer: &AudioBuffer, config: &KeyConfig) -> CoreResult<[f32; 12]> {
    let mono = buffer.to_mono();
    let window_size = config.window_size;
    let analyzer = SpectrumAnalyzer::new(window_size);
    let bin_hz = buffer.sample_rate() as f32 / window_size as f32;

    // Precompute the pitch class of each bin inside the band
    let bin_classes: Vec<Option<usize>> = (0..=window_size / 2)
        .map(|k| {
            let freq = k as f32 * bin_hz;
            if freq < config.min_freq || freq > config.max_freq {
                return None;
            }
            let midi = 69.0 + 12.0 * (freq / 440.0).log2();
            Some((midi.round() as i32).rem_euclid(12) as usize)
        })
        .collect();

    let num_frames = if mono.len() <= window_size {
        1
    } else {
        (mono.len() - window_size) / config.hop_size + 1
    };

    let mut chroma = [0.0f32; 12];
    for frame_idx in 0..num_frames {
        let start = frame_idx * config.hop_size;
        let end = (start + window_size).min(mono.len());
        let spectrum = analyzer.magnitudes(&mono[start..end])?;

        for (magnitude, class) in spectrum.iter().zip(&bin_classes) {
            if let Some(pc) = class {
                chroma[*pc] += magnitude * magnitude;
            }
        }
    }

    log::debug!("Chroma over {} frames: {:?}", num_frames, chroma);
    Ok(chroma)
}

/// Profile for a tonic `shift` semitones above C
fn rotate_profile(profile: &[f32; 12], shift: usize) -> [f32; 12] {
    let mut rotated = [0.0f32; 12];
    for (i, value) in profile.iter().enumerate() {
        rotated[(i + shift) % 12] = *value;
    }
    rotated
}

/// Pearson correlation coefficient, 0.0 when either side is constant
fn pearson(x: &[f32; 12], y: &[f32; 12]) -> f32 {
    let mean_x = x.iter().sum::<f32>() / 12.0;
    let mean_y = y.iter().sum::<f32>() / 12.0;

    let mut covariance = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (a, b) in x.iter().zip(y) {
        let dx = a - mean_x;
        let dy = b - mean_y;
        covariance += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }

    let denominator = (var_x * var_y).sqrt();
    if denominator <= f32::EPSILON {
        return 0.0;
    }
    covariance / denominator
}
