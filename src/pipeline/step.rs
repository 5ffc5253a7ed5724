// Workflow steps - per-stem processing stages
// The orchestrator runs STEM_STEPS in order over one StemContext per stem

use crate::audio::AudioBuffer;
use crate::config::{LoopType, PipelineConfig};
use crate::error::{CoreError, CoreResult};
use crate::groove::grid::{build_bar_grid, BarGrid};
use crate::groove::tempo::Tempo;
use crate::harmony::key::KeyEstimate;
use crate::melody::midi::{export_melody_midi, MidiExportOptions};
use crate::melody::pitch::{track_melody, MelodyConfig, MelodyNote};
use crate::pipeline::trace::{TraceBuilder, TraceEntry};
use crate::render::modulation::{apply_modulation, EnvelopeShape, LfoConfig, ModulationConfig};
use crate::slicing::loops::{slice_loops, LoopSliceConfig};
use crate::slicing::onset::{detect_onsets, extract_one_shots, OneShotConfig};
use crate::slicing::segment::{Segment, SegmentKind};

/// Working state for one stem, filled in step by step
pub struct StemContext<'a> {
    pub stem: String,
    pub audio: &'a AudioBuffer,
    pub tempo: &'a Tempo,

    /// None when key estimation had too little signal
    pub key: Option<&'a KeyEstimate>,
    pub config: &'a PipelineConfig,

    pub grid: Option<BarGrid>,
    pub segments: Vec<Segment>,
    pub melody: Vec<MelodyNote>,
    pub midi: Option<Vec<u8>>,
    pub trace: Vec<TraceEntry>,
}

impl<'a> StemContext<'a> {
    pub fn new(
        stem: impl Into<String>,
        audio: &'a AudioBuffer,
        tempo: &'a Tempo,
        key: Option<&'a KeyEstimate>,
        config: &'a PipelineConfig,
    ) -> Self {
        StemContext {
            stem: stem.into(),
            audio,
            tempo,
            key,
            config,
            grid: None,
            segments: Vec::new(),
            melody: Vec::new(),
            midi: None,
            trace: Vec::new(),
        }
    }

    fn record(&mut self, entry: TraceEntry) {
        log::debug!("[{}] {}: {}", self.stem, entry.stage, entry.message);
        self.trace.push(entry);
    }
}

/// One stage of per-stem processing
pub trait WorkflowStep: Sync {
    fn name(&self) -> &'static str;

    fn run(&self, ctx: &mut StemContext<'_>) -> CoreResult<()>;
}

/// Ordered per-stem stages
pub static STEM_STEPS: &[&dyn WorkflowStep] = &[&BarGridStep, &SliceStep, &ModulateStep, &MelodyStep];

/// Bar boundaries for the stem from the shared tempo
pub struct BarGridStep;

impl WorkflowStep for BarGridStep {
    fn name(&self) -> &'static str {
        "grid"
    }

    fn run(&self, ctx: &mut StemContext<'_>) -> CoreResult<()> {
        let grid = build_bar_grid(ctx.tempo, ctx.config.time_signature, ctx.audio.duration_secs())?;
        let message = format!("{} bars of {:.3}s", grid.bar_count(), grid.bar_secs());
        ctx.grid = Some(grid);
        ctx.record(TraceBuilder::stage(self.name()).stem(ctx.stem.as_str()).complete(message));
        Ok(())
    }
}

/// Loops on the bar grid, or one-shots on detected onsets
pub struct SliceStep;

impl WorkflowStep for SliceStep {
    fn name(&self) -> &'static str {
        "slice"
    }

    fn run(&self, ctx: &mut StemContext<'_>) -> CoreResult<()> {
        let config = ctx.config;

        let segments = match config.loop_type.bars_per_loop() {
            Some(bars_per_loop) => {
                let grid = match ctx.grid.take() {
                    Some(grid) => grid,
                    None => build_bar_grid(ctx.tempo, config.time_signature, ctx.audio.duration_secs())?,
                };
                let loop_config = LoopSliceConfig {
                    bars_per_loop,
                    crossfade_ms: config.crossfade_ms,
                    max_loops: config.max_loops,
                    ..LoopSliceConfig::default()
                };
                let segments = slice_loops(ctx.audio, &grid, &ctx.stem, &loop_config)?;
                ctx.grid = Some(grid);
                segments
            }
            None => {
                let onsets = detect_onsets(ctx.audio, config.one_shot_sensitivity)?;
                let one_shot_config = OneShotConfig {
                    max_duration_ms: config.one_shot_max_ms,
                    max_count: config.max_one_shots,
                    ..OneShotConfig::default()
                };
                extract_one_shots(ctx.audio, &onsets, &ctx.stem, &one_shot_config)?
            }
        };

        let message = format!("{} segments", segments.len());
        let data = serde_json::json!({ "segments": segments.len() });
        ctx.segments = segments;
        ctx.record(
            TraceBuilder::stage(self.name())
                .stem(ctx.stem.as_str())
                .with_data(1.0, message, data),
        );
        Ok(())
    }
}

/// LFO, envelope, normalization and transpose over every segment
pub struct ModulateStep;

impl ModulateStep {
    fn modulation_for(ctx: &StemContext<'_>, kind: SegmentKind) -> ModulationConfig {
        let config = ctx.config;
        let settings = &config.modulation;

        let lfo = settings.enabled.then(|| LfoConfig {
            bpm: ctx.tempo.bpm,
            rate: settings.rate,
            pan_depth: settings.pan_depth,
            level_depth: settings.level_depth,
            filter_type: settings.filter_type,
            filter_freq: settings.filter_freq,
            filter_depth: settings.filter_depth,
        });

        // Envelope shaping is a one-shot treatment
        let envelope = (kind == SegmentKind::OneShot).then_some(EnvelopeShape {
            attack_gain_db: config.envelope.attack_gain,
            sustain_gain_db: config.envelope.sustain_gain,
        });

        ModulationConfig {
            lfo,
            envelope,
            normalize_peak_dbfs: config.normalize_peak_dbfs,
            transpose_semitones: config.transpose_semitones,
        }
    }
}

impl WorkflowStep for ModulateStep {
    fn name(&self) -> &'static str {
        "modulate"
    }

    fn run(&self, ctx: &mut StemContext<'_>) -> CoreResult<()> {
        let segments = std::mem::take(&mut ctx.segments);
        let total = segments.len();
        let mut processed = Vec::with_capacity(total);
        let mut dropped = 0;

        for segment in segments {
            let modulation = Self::modulation_for(ctx, segment.kind);
            if modulation.is_identity() {
                processed.push(segment);
                continue;
            }

            match apply_modulation(&segment.audio, &modulation) {
                Ok(audio) => processed.push(segment.with_modulation(audio, modulation)),
                Err(e) if e.is_recoverable() => {
                    log::warn!(
                        "Dropping {} segment {} ({:.3}s-{:.3}s): {}",
                        ctx.stem,
                        segment.index,
                        segment.start_secs,
                        segment.end_secs,
                        e
                    );
                    dropped += 1;
                }
                Err(e) => return Err(e),
            }
        }

        if total > 0 && processed.is_empty() {
            return Err(CoreError::InsufficientSignal(format!(
                "all {} segments of {} were silent",
                total, ctx.stem
            )));
        }

        for (index, segment) in processed.iter_mut().enumerate() {
            segment.index = index;
        }
        ctx.segments = processed;

        let message = format!("{} of {} segments kept", total - dropped, total);
        ctx.record(TraceBuilder::stage(self.name()).stem(ctx.stem.as_str()).complete(message));
        Ok(())
    }
}

/// Melody transcription for melodic stems in loop modes
pub struct MelodyStep;

impl WorkflowStep for MelodyStep {
    fn name(&self) -> &'static str {
        "melody"
    }

    fn run(&self, ctx: &mut StemContext<'_>) -> CoreResult<()> {
        let config = ctx.config;
        if config.loop_type == LoopType::OneShot || !config.midi_stems.contains(&ctx.stem) {
            return Ok(());
        }

        let notes = match track_melody(ctx.audio, &MelodyConfig::default()) {
            Ok(notes) => notes,
            Err(e) if e.is_recoverable() => {
                log::debug!("No melody for {}: {}", ctx.stem, e);
                Vec::new()
            }
            Err(e) => return Err(e),
        };

        if !notes.is_empty() {
            ctx.midi = Some(export_melody_midi(
                &notes,
                &ctx.stem,
                ctx.tempo.bpm,
                config.time_signature,
                &MidiExportOptions::default(),
            )?);
        }

        let message = format!("{} notes", notes.len());
        ctx.melody = notes;
        ctx.record(TraceBuilder::stage(self.name()).stem(ctx.stem.as_str()).complete(message));
        Ok(())
    }
}

/// Run every step in order, stopping at the first error
pub fn run_steps(ctx: &mut StemContext<'_>) -> CoreResult<()> {
    for step in STEM_STEPS {
        step.run(ctx)?;
    }
    Ok(())
}
