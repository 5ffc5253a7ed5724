// Loop Slicer - bar-aligned loops with crossfade margins
// Groups consecutive bar-grid intervals into 1/2/4-bar segments

use serde::{Deserialize, Serialize};

use crate::audio::AudioBuffer;
use crate::error::{CoreError, CoreResult};
use crate::groove::grid::BarGrid;
use crate::slicing::segment::{fade_in, fade_out, AppliedEffects, Segment, SegmentKind};

/// Loop length in bars
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum BarsPerLoop {
    One,
    Two,
    Four,
}

impl BarsPerLoop {
    pub fn bars(self) -> usize {
        match self {
            BarsPerLoop::One => 1,
            BarsPerLoop::Two => 2,
            BarsPerLoop::Four => 4,
        }
    }
}

impl TryFrom<u32> for BarsPerLoop {
    type Error = CoreError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(BarsPerLoop::One),
            2 => Ok(BarsPerLoop::Two),
            4 => Ok(BarsPerLoop::Four),
            other => Err(CoreError::InvalidParameter(format!(
                "loops span 1, 2 or 4 bars, not {}",
                other
            ))),
        }
    }
}

impl From<BarsPerLoop> for u32 {
    fn from(value: BarsPerLoop) -> Self {
        value.bars() as u32
    }
}

#[derive(Debug, Clone)]
pub struct LoopSliceConfig {
    pub bars_per_loop: BarsPerLoop,

    /// Margin captured before and after each loop, faded linearly
    pub crossfade_ms: f64,

    /// A partial final loop is kept only if at least this fraction of nominal length
    pub min_final_fraction: f64,

    /// Maximum number of loops per stem
    pub max_loops: usize,
}

impl Default for LoopSliceConfig {
    fn default() -> Self {
        LoopSliceConfig {
            bars_per_loop: BarsPerLoop::Four,
            crossfade_ms: 10.0,
            min_final_fraction: 0.5,
            max_loops: 16,
        }
    }
}

/// Cut a stem into loops spanning `bars_per_loop` grid intervals
///
/// With a crossfade, each loop's audio covers `[start - xf, end + xf]`
/// (clamped to the buffer) and ramps linearly over `2 * xf` frames at each
/// end, so consecutive loops overlap-add back to the source audio.
pub fn slice_loops(
    buffer: &AudioBuffer,
    grid: &BarGrid,
    stem: &str,
    config: &LoopSliceConfig,
) -> CoreResult<Vec<Segment>> {
    if !config.crossfade_ms.is_finite() || config.crossfade_ms < 0.0 {
        return Err(CoreError::InvalidParameter(format!(
            "crossfade {} ms must be >= 0",
            config.crossfade_ms
        )));
    }

    if buffer.is_silent() {
        return Err(CoreError::InsufficientSignal(
            "buffer is silent, no loops to cut".to_string(),
        ));
    }

    let bars = config.bars_per_loop.bars();
    let boundaries = grid.boundaries();
    let duration = buffer.duration_secs();
    let nominal_secs = grid.bar_secs() * bars as f64;

    let mut ranges = Vec::new();
    let mut first_bar = 0;
    while first_bar + bars < boundaries.len() {
        ranges.push((boundaries[first_bar], boundaries[first_bar + bars], bars));
        first_bar += bars;
    }

    // Partial final group: whatever audio remains after the last full loop
    if let Some(&start) = boundaries.get(first_bar) {
        let remaining = duration - start;
        if remaining >= nominal_secs * config.min_final_fraction && remaining > 0.0 {
            // Bars covered by the remaining audio, not by the remaining grid lines
            let bars_left = ((remaining / grid.bar_secs()).round() as usize).clamp(1, bars);
            ranges.push((start, duration, bars_left));
        } else if remaining > 1e-9 {
            log::debug!(
                "Dropping partial final loop of {:.3}s ({:.0}% of {:.3}s)",
                remaining,
                remaining / nominal_secs * 100.0,
                nominal_secs
            );
        }
    }

    if ranges.len() > config.max_loops {
        log::debug!("Loop limit of {} reached for {}", config.max_loops, stem);
        ranges.truncate(config.max_loops);
    }

    let total_frames = buffer.frame_count();
    let channels = buffer.channels() as usize;
    let xf = buffer.secs_to_frame(config.crossfade_ms / 1000.0);

    let mut segments = Vec::with_capacity(ranges.len());
    for (index, (start_secs, end_secs, span_bars)) in ranges.into_iter().enumerate() {
        let start = buffer.secs_to_frame(start_secs);
        let end = buffer.secs_to_frame(end_secs).min(total_frames);
        if end <= start {
            return Err(CoreError::MalformedAudio(format!(
                "zero-length loop {} at {:.3}s",
                index, start_secs
            )));
        }

        let capture_start = start.saturating_sub(xf);
        let capture_end = (end + xf).min(total_frames);
        let mut samples = buffer.slice_frames(capture_start, capture_end)?.into_samples();

        let ramp = if xf > 0 {
            (2 * xf).min((capture_end - capture_start) / 2)
        } else {
            0
        };
        if ramp > 0 {
            fade_in(&mut samples, channels, ramp);
            fade_out(&mut samples, channels, ramp);
        }

        segments.push(Segment {
            stem: stem.to_string(),
            index,
            kind: SegmentKind::Loop {
                bars: span_bars as u32,
            },
            start_secs,
            end_secs,
            audio: buffer.with_samples(samples)?,
            effects: AppliedEffects {
                crossfade_ms: config.crossfade_ms,
                crossfade_frames: ramp,
                ..AppliedEffects::default()
            },
        });
    }

    log::info!(
        "Sliced {} {}-bar loops from {} ({:.2}s)",
        segments.len(),
        bars,
        stem,
        duration
    );

    Ok(segments)
}

/// Overlap-add two consecutive loops across their shared crossfade region
pub fn crossfade_join(first: &Segment, second: &Segment) -> CoreResult<AudioBuffer> {
    let a = &first.audio;
    let b = &second.audio;
    if a.channels() != b.channels() || a.sample_rate() != b.sample_rate() {
        return Err(CoreError::MalformedAudio(
            "cannot join segments with different formats".to_string(),
        ));
    }

    let channels = a.channels() as usize;
    let overlap = first
        .effects
        .crossfade_frames
        .min(second.effects.crossfade_frames)
        .min(a.frame_count())
        .min(b.frame_count());

    let head_len = (a.frame_count() - overlap) * channels;
    let mut samples = Vec::with_capacity(a.samples().len() + b.samples().len() - overlap * channels);
    samples.extend_from_slice(&a.samples()[..head_len]);
    samples.extend(
        a.samples()[head_len..]
            .iter()
            .zip(&b.samples()[..overlap * channels])
            .map(|(x, y)| x + y),
    );
    samples.extend_from_slice(&b.samples()[overlap * channels..]);

    a.with_samples(samples)
}
