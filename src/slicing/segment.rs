// Segment - a tagged sub-range of a stem
// Produced by the loop and onset slicers, replaced (never mutated) by modulation

use serde::{Deserialize, Serialize};

use crate::audio::AudioBuffer;
use crate::render::modulation::ModulationConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum SegmentKind {
    /// Bar-aligned loop spanning `bars` bars (a kept partial final loop spans fewer)
    Loop { bars: u32 },

    /// Single transient from one onset to the next
    OneShot,
}

impl SegmentKind {
    /// Label used in exported file names ("4Bar", "OneShot")
    pub fn label(&self) -> String {
        match self {
            SegmentKind::Loop { bars } => format!("{}Bar", bars),
            SegmentKind::OneShot => "OneShot".to_string(),
        }
    }
}

/// Effects already baked into a segment's audio
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppliedEffects {
    /// Crossfade margin requested at slicing time
    pub crossfade_ms: f64,

    /// Length of the linear fade ramp at each end, in frames
    pub crossfade_frames: usize,

    /// Fade-out applied to a one-shot tail
    pub fade_out_ms: f64,

    /// Modulation chain applied after slicing
    pub modulation: Option<ModulationConfig>,
}

#[derive(Debug, Clone)]
pub struct Segment {
    /// Source stem label ("drums", "vocals", "mix", ...)
    pub stem: String,

    /// Position in the stem's segment sequence (0-indexed)
    pub index: usize,

    pub kind: SegmentKind,

    /// Nominal start in seconds from stem start
    pub start_secs: f64,

    /// Nominal end in seconds; crossfade margins extend the audio past this range
    pub end_secs: f64,

    pub audio: AudioBuffer,

    pub effects: AppliedEffects,
}

impl Segment {
    pub fn duration_secs(&self) -> f64 {
        self.end_secs - self.start_secs
    }

    /// New segment with replacement audio and modulation metadata
    pub fn with_modulation(&self, audio: AudioBuffer, modulation: ModulationConfig) -> Segment {
        Segment {
            audio,
            effects: AppliedEffects {
                modulation: Some(modulation),
                ..self.effects.clone()
            },
            ..self.clone()
        }
    }
}

/// Linear fade-in over the first `frames` frames of an interleaved buffer
pub(crate) fn fade_in(samples: &mut [f32], channels: usize, frames: usize) {
    let total = samples.len() / channels;
    let frames = frames.min(total);
    for frame in 0..frames {
        let gain = frame as f32 / frames as f32;
        for sample in &mut samples[frame * channels..(frame + 1) * channels] {
            *sample *= gain;
        }
    }
}

/// Linear fade-out over the last `frames` frames of an interleaved buffer
pub(crate) fn fade_out(samples: &mut [f32], channels: usize, frames: usize) {
    let total = samples.len() / channels;
    let frames = frames.min(total);
    for i in 0..frames {
        let frame = total - frames + i;
        let gain = (frames - i) as f32 / frames as f32;
        for sample in &mut samples[frame * channels..(frame + 1) * channels] {
            *sample *= gain;
        }
    }
}
