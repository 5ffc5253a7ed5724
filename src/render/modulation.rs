// Modulation Engine - per-segment effect chain
// Fixed order: pan/level LFO -> filter LFO -> envelope -> normalization -> transpose

use serde::{Deserialize, Serialize};

use crate::audio::AudioBuffer;
use crate::error::{CoreError, CoreResult};
use crate::groove::tempo::{MAX_BPM, MIN_BPM};
use crate::render::effects::{
    apply_envelope, apply_filter_lfo, apply_pan_level, limit_peak, normalize_peak, FilterType,
};
use crate::render::pitch::{transpose, MAX_TRANSPOSE};

/// Musical LFO rate relative to the beat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NoteRate {
    #[serde(rename = "1/2")]
    Half,
    #[default]
    #[serde(rename = "1/4")]
    Quarter,
    #[serde(rename = "1/8")]
    Eighth,
    #[serde(rename = "1/16")]
    Sixteenth,
}

impl NoteRate {
    /// LFO cycles per beat
    pub fn cycles_per_beat(self) -> f64 {
        match self {
            NoteRate::Half => 0.5,
            NoteRate::Quarter => 1.0,
            NoteRate::Eighth => 2.0,
            NoteRate::Sixteenth => 4.0,
        }
    }

    /// LFO frequency in Hz at a tempo
    pub fn lfo_hz(self, bpm: f64) -> f64 {
        bpm / 60.0 * self.cycles_per_beat()
    }
}

/// Tempo-synced LFO parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LfoConfig {
    pub bpm: f64,
    pub rate: NoteRate,

    /// Pan swing [0, 1]
    pub pan_depth: f32,

    /// Level dip [0, 1]
    pub level_depth: f32,

    pub filter_type: FilterType,

    /// Filter center frequency in Hz
    pub filter_freq: f32,

    /// Cutoff swing [0, 1]; 1 sweeps two octaves either side of the center
    pub filter_depth: f32,
}

/// Attack/sustain gains in dB
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeShape {
    pub attack_gain_db: f32,
    pub sustain_gain_db: f32,
}

/// Full modulation chain; each stage is skipped when absent or neutral
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModulationConfig {
    pub lfo: Option<LfoConfig>,
    pub envelope: Option<EnvelopeShape>,
    pub normalize_peak_dbfs: Option<f32>,
    pub transpose_semitones: i32,
}

impl ModulationConfig {
    pub fn validate(&self) -> CoreResult<()> {
        if let Some(lfo) = &self.lfo {
            if !lfo.bpm.is_finite() || !(MIN_BPM..=MAX_BPM).contains(&lfo.bpm) {
                return Err(CoreError::InvalidTempo(lfo.bpm));
            }
            for (name, depth) in [
                ("pan_depth", lfo.pan_depth),
                ("level_depth", lfo.level_depth),
                ("filter_depth", lfo.filter_depth),
            ] {
                if !(0.0..=1.0).contains(&depth) {
                    return Err(CoreError::InvalidParameter(format!(
                        "{} {} outside [0, 1]",
                        name, depth
                    )));
                }
            }
            if !lfo.filter_freq.is_finite() || lfo.filter_freq <= 0.0 {
                return Err(CoreError::InvalidParameter(format!(
                    "filter frequency {} Hz",
                    lfo.filter_freq
                )));
            }
        }
        if let Some(env) = &self.envelope {
            if !env.attack_gain_db.is_finite() || !env.sustain_gain_db.is_finite() {
                return Err(CoreError::InvalidParameter("envelope gains must be finite".into()));
            }
        }
        if let Some(dbfs) = self.normalize_peak_dbfs {
            if !dbfs.is_finite() || dbfs > 0.0 {
                return Err(CoreError::InvalidParameter(format!(
                    "normalization target {} dBFS must be <= 0",
                    dbfs
                )));
            }
        }
        if self.transpose_semitones.abs() > MAX_TRANSPOSE {
            return Err(CoreError::InvalidParameter(format!(
                "transpose {} semitones",
                self.transpose_semitones
            )));
        }
        Ok(())
    }

    /// True when no stage would change the audio
    pub fn is_identity(&self) -> bool {
        let lfo_active = self.lfo.as_ref().is_some_and(|lfo| {
            lfo.pan_depth > 0.0 || lfo.level_depth > 0.0 || lfo.filter_type != FilterType::None
        });
        let envelope_active = self
            .envelope
            .is_some_and(|env| env.attack_gain_db != 0.0 || env.sustain_gain_db != 0.0);

        !lfo_active
            && !envelope_active
            && self.normalize_peak_dbfs.is_none()
            && self.transpose_semitones == 0
    }
}

/// Apply the modulation chain; the input buffer is never modified
pub fn apply_modulation(segment: &AudioBuffer, config: &ModulationConfig) -> CoreResult<AudioBuffer> {
    config.validate()?;

    let mut audio = segment.clone();

    if let Some(lfo) = &config.lfo {
        let lfo_hz = lfo.rate.lfo_hz(lfo.bpm);
        if lfo.pan_depth > 0.0 || lfo.level_depth > 0.0 {
            audio = apply_pan_level(&audio, lfo_hz, lfo.pan_depth, lfo.level_depth)?;
        }
        if lfo.filter_type != FilterType::None {
            audio = apply_filter_lfo(
                &audio,
                lfo.filter_type,
                lfo.filter_freq as f64,
                lfo.filter_depth,
                lfo_hz,
            )?;
        }
    }

    if let Some(env) = &config.envelope {
        audio = apply_envelope(&audio, env.attack_gain_db, env.sustain_gain_db)?;
    }

    if let Some(dbfs) = config.normalize_peak_dbfs {
        audio = normalize_peak(&audio, dbfs)?;
    }

    if config.transpose_semitones != 0 {
        audio = transpose(&audio, config.transpose_semitones)?;
        // Overlap-add can push the peak back over the target
        if let Some(dbfs) = config.normalize_peak_dbfs {
            audio = limit_peak(&audio, dbfs)?;
        }
    }

    Ok(audio)
}
