// Pipeline configuration
// JSON-loadable options with defaults matching the interactive tool

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{CoreError, CoreResult};
use crate::groove::grid::TimeSignature;
use crate::groove::tempo::{MAX_BPM, MIN_BPM};
use crate::render::effects::FilterType;
use crate::render::modulation::NoteRate;
use crate::render::pitch::MAX_TRANSPOSE;
use crate::slicing::loops::BarsPerLoop;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoopType {
    #[serde(rename = "1-bar")]
    OneBar,
    #[serde(rename = "2-bar")]
    TwoBar,
    #[serde(rename = "4-bar")]
    FourBar,
    #[serde(rename = "one-shot")]
    OneShot,
}

impl LoopType {
    /// Bars per loop, None for one-shot slicing
    pub fn bars_per_loop(self) -> Option<BarsPerLoop> {
        match self {
            LoopType::OneBar => Some(BarsPerLoop::One),
            LoopType::TwoBar => Some(BarsPerLoop::Two),
            LoopType::FourBar => Some(BarsPerLoop::Four),
            LoopType::OneShot => None,
        }
    }

    pub fn parse(value: &str) -> CoreResult<Self> {
        serde_json::from_value(serde_json::Value::String(value.to_string())).map_err(|_| {
            CoreError::InvalidConfig(format!(
                "loop type '{}' is not one of 1-bar, 2-bar, 4-bar, one-shot",
                value
            ))
        })
    }
}

/// LFO modulation options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModulationSettings {
    pub enabled: bool,
    pub rate: NoteRate,
    pub pan_depth: f32,
    pub level_depth: f32,
    pub filter_type: FilterType,
    pub filter_freq: f32,
    pub filter_depth: f32,
}

impl Default for ModulationSettings {
    fn default() -> Self {
        ModulationSettings {
            enabled: false,
            rate: NoteRate::Quarter,
            pan_depth: 0.0,
            level_depth: 0.0,
            filter_type: FilterType::None,
            filter_freq: 5000.0,
            filter_depth: 0.0,
        }
    }
}

/// One-shot envelope gains in dB
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvelopeSettings {
    pub attack_gain: f32,
    pub sustain_gain: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Bypasses tempo estimation when set
    pub manual_bpm: Option<f64>,
    pub time_signature: TimeSignature,
    pub loop_type: LoopType,
    pub one_shot_sensitivity: f32,
    pub crossfade_ms: f64,

    /// None disables normalization
    pub normalize_peak_dbfs: Option<f32>,
    pub transpose_semitones: i32,
    pub modulation: ModulationSettings,
    pub envelope: EnvelopeSettings,

    /// Tempo used when estimation has insufficient signal
    pub default_bpm: f64,

    /// Half/double-tempo ambiguities resolve toward this tempo
    pub tempo_anchor_bpm: f64,

    /// Snap estimated tempos to the nearest whole BPM
    pub round_estimated_bpm: bool,

    pub max_loops: usize,
    pub max_one_shots: usize,
    pub one_shot_max_ms: f64,

    /// Stems transcribed to MIDI in loop modes
    pub midi_stems: Vec<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            manual_bpm: None,
            time_signature: TimeSignature::FOUR_FOUR,
            loop_type: LoopType::FourBar,
            one_shot_sensitivity: 0.5,
            crossfade_ms: 10.0,
            normalize_peak_dbfs: Some(-1.0),
            transpose_semitones: 0,
            modulation: ModulationSettings::default(),
            envelope: EnvelopeSettings::default(),
            default_bpm: 120.0,
            tempo_anchor_bpm: 120.0,
            round_estimated_bpm: true,
            max_loops: 16,
            max_one_shots: 40,
            one_shot_max_ms: 1000.0,
            midi_stems: ["vocals", "bass", "guitar", "piano", "other"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl PipelineConfig {
    pub fn from_json_str(json: &str) -> CoreResult<Self> {
        let config: PipelineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: &Path) -> CoreResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config = Self::from_json_str(&contents)?;
        log::info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Check every option against its allowed range
    pub fn validate(&self) -> CoreResult<()> {
        let invalid = |msg: String| Err(CoreError::InvalidConfig(msg));

        for (name, bpm) in [
            ("manual_bpm", self.manual_bpm),
            ("default_bpm", Some(self.default_bpm)),
            ("tempo_anchor_bpm", Some(self.tempo_anchor_bpm)),
        ] {
            if let Some(bpm) = bpm {
                if !bpm.is_finite() || !(MIN_BPM..=MAX_BPM).contains(&bpm) {
                    return invalid(format!("{} {} outside [{}, {}]", name, bpm, MIN_BPM, MAX_BPM));
                }
            }
        }
        if !(0.0..=1.0).contains(&self.one_shot_sensitivity) {
            return invalid(format!(
                "one_shot_sensitivity {} outside [0, 1]",
                self.one_shot_sensitivity
            ));
        }
        if !self.crossfade_ms.is_finite() || self.crossfade_ms < 0.0 {
            return invalid(format!("crossfade_ms {} must be >= 0", self.crossfade_ms));
        }
        if let Some(dbfs) = self.normalize_peak_dbfs {
            if !dbfs.is_finite() || dbfs > 0.0 {
                return invalid(format!("normalize_peak_dbfs {} must be <= 0", dbfs));
            }
        }
        if self.transpose_semitones.abs() > MAX_TRANSPOSE {
            return invalid(format!(
                "transpose_semitones {} outside [-12, 12]",
                self.transpose_semitones
            ));
        }
        for (name, depth) in [
            ("pan_depth", self.modulation.pan_depth),
            ("level_depth", self.modulation.level_depth),
            ("filter_depth", self.modulation.filter_depth),
        ] {
            if !(0.0..=1.0).contains(&depth) {
                return invalid(format!("modulation.{} {} outside [0, 1]", name, depth));
            }
        }
        if !self.modulation.filter_freq.is_finite() || self.modulation.filter_freq <= 0.0 {
            return invalid(format!(
                "modulation.filter_freq {} must be positive",
                self.modulation.filter_freq
            ));
        }
        if !self.envelope.attack_gain.is_finite() || !self.envelope.sustain_gain.is_finite() {
            return invalid("envelope gains must be finite".to_string());
        }
        for (name, limit) in [("max_loops", self.max_loops), ("max_one_shots", self.max_one_shots)] {
            if limit == 0 {
                return invalid(format!("{} must be at least 1", name));
            }
        }
        if !self.one_shot_max_ms.is_finite() || self.one_shot_max_ms <= 0.0 {
            return invalid(format!("one_shot_max_ms {} must be positive", self.one_shot_max_ms));
        }
        Ok(())
    }
}
