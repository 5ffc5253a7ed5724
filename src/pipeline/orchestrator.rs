// Track orchestrator - tempo, key and per-stem processing for one track
// Key estimation runs beside the tempo/slicing branch; stems run in parallel
// and fail independently

use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::audio::AudioBuffer;
use crate::config::PipelineConfig;
use crate::error::CoreResult;
use crate::groove::grid::TimeSignature;
use crate::groove::tempo::{resolve_tempo, Tempo, TempoConfig, TempoSource};
use crate::harmony::camelot::{harmonic_moves, CamelotCode, HarmonicMove};
use crate::harmony::key::{estimate_key, KeyEstimate};
use crate::melody::pitch::MelodyNote;
use crate::pipeline::step::{run_steps, StemContext};
use crate::pipeline::trace::{TraceBuilder, TraceEntry};
use crate::slicing::segment::{AppliedEffects, Segment, SegmentKind};

/// File-name key tag when no key could be estimated
pub const UNKNOWN_KEY_TAG: &str = "UnknownKey";

/// Everything the export layer needs to name and tag one segment
#[derive(Debug, Clone, Serialize)]
pub struct SegmentTags {
    pub stem: String,
    pub index: usize,
    pub kind: SegmentKind,
    pub start_secs: f64,
    pub end_secs: f64,
    pub bpm: f64,

    /// Key after transposition, e.g. "A Min"
    pub key: Option<String>,
    pub camelot: Option<CamelotCode>,
    pub transpose_semitones: i32,
    pub time_signature: TimeSignature,
    pub effects: AppliedEffects,

    /// `{stem}_{4Bar|OneShot}_{NNN}_{KeyTag}_{BPM}BPM`
    pub file_stem: String,
}

/// Result of one successfully processed stem
#[derive(Debug, Clone)]
pub struct StemReport {
    pub stem: String,
    pub segments: Vec<Segment>,
    pub tags: Vec<SegmentTags>,
    pub melody: Vec<MelodyNote>,

    /// Standard MIDI File bytes for melodic stems
    pub midi: Option<Vec<u8>>,

    /// `{stem}_MELODY_{KeyTag}_{BPM}BPM`
    pub midi_file_stem: Option<String>,
    pub trace: Vec<TraceEntry>,
}

#[derive(Debug)]
pub struct StemOutcome {
    pub stem: String,
    pub result: CoreResult<StemReport>,
}

impl StemOutcome {
    /// User-facing failure line, None when the stem succeeded
    pub fn failure_message(&self) -> Option<String> {
        self.result
            .as_ref()
            .err()
            .map(|e| format!("isolation/analysis failed for stem {}: {}", self.stem, e))
    }

    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Track-level analysis plus one outcome per stem, in stem-name order
#[derive(Debug)]
pub struct PackReport {
    pub tempo: Tempo,
    pub key: Option<KeyEstimate>,
    pub camelot: Option<CamelotCode>,
    pub recommendations: Vec<HarmonicMove>,
    pub time_signature: TimeSignature,
    pub outcomes: Vec<StemOutcome>,
    pub trace: Vec<TraceEntry>,
}

/// Serializable view of a stem outcome
#[derive(Debug, Clone, Serialize)]
pub struct StemSummary {
    pub stem: String,
    pub ok: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub segments: Vec<SegmentTags>,
    pub melody_notes: usize,
}

/// Serializable view of a whole report
#[derive(Debug, Clone, Serialize)]
pub struct PackSummary {
    pub tempo: Tempo,
    pub key: Option<KeyEstimate>,
    pub camelot: Option<CamelotCode>,
    pub recommendations: Vec<HarmonicMove>,
    pub time_signature: TimeSignature,
    pub stems: Vec<StemSummary>,
}

impl PackReport {
    pub fn successful(&self) -> impl Iterator<Item = &StemReport> {
        self.outcomes.iter().filter_map(|o| o.result.as_ref().ok())
    }

    pub fn failures(&self) -> Vec<String> {
        self.outcomes.iter().filter_map(|o| o.failure_message()).collect()
    }

    /// All trace entries: track-level first, then each stem's in order
    pub fn all_trace(&self) -> Vec<TraceEntry> {
        let mut entries = self.trace.clone();
        for report in self.successful() {
            entries.extend(report.trace.iter().cloned());
        }
        entries
    }

    pub fn summary(&self) -> PackSummary {
        let stems = self
            .outcomes
            .iter()
            .map(|outcome| match &outcome.result {
                Ok(report) => StemSummary {
                    stem: outcome.stem.clone(),
                    ok: true,
                    error: None,
                    segments: report.tags.clone(),
                    melody_notes: report.melody.len(),
                },
                Err(_) => StemSummary {
                    stem: outcome.stem.clone(),
                    ok: false,
                    error: outcome.failure_message(),
                    segments: Vec::new(),
                    melody_notes: 0,
                },
            })
            .collect();

        PackSummary {
            tempo: self.tempo.clone(),
            key: self.key,
            camelot: self.camelot,
            recommendations: self.recommendations.clone(),
            time_signature: self.time_signature,
            stems,
        }
    }
}

/// Analyze a mix and slice every stem
///
/// Tempo and key come from the mix. Insufficient signal falls back to the
/// configured default tempo or an unknown key; any other track-level error
/// aborts. Per-stem errors are captured in that stem's outcome only.
pub fn process_track(
    mix: &AudioBuffer,
    stems: &BTreeMap<String, AudioBuffer>,
    config: &PipelineConfig,
) -> CoreResult<PackReport> {
    config.validate()?;

    let tempo_config = TempoConfig {
        anchor_bpm: config.tempo_anchor_bpm,
        ..TempoConfig::default()
    };

    let (key_result, tempo_result) = rayon::join(
        || analyze_key(mix),
        || analyze_tempo(mix, config, &tempo_config),
    );
    let (key, key_entry) = key_result?;
    let (tempo, tempo_entry) = tempo_result?;

    let camelot = key.as_ref().map(CamelotCode::from);
    let recommendations = camelot.map(harmonic_moves).unwrap_or_default();

    log::info!(
        "Track analysis: {:.2} BPM ({:?}, confidence {:.2}), key {}",
        tempo.bpm,
        tempo.source,
        tempo.confidence,
        key.map(|k| k.to_string()).unwrap_or_else(|| "unknown".to_string())
    );

    let outcomes: Vec<StemOutcome> = stems
        .par_iter()
        .map(|(name, audio)| {
            let result = process_stem(name, audio, &tempo, key.as_ref(), config);
            if let Err(e) = &result {
                log::warn!("isolation/analysis failed for stem {}: {}", name, e);
            }
            StemOutcome {
                stem: name.clone(),
                result,
            }
        })
        .collect();

    Ok(PackReport {
        tempo,
        key,
        camelot,
        recommendations,
        time_signature: config.time_signature,
        outcomes,
        trace: vec![tempo_entry, key_entry],
    })
}

fn analyze_tempo(
    mix: &AudioBuffer,
    config: &PipelineConfig,
    tempo_config: &TempoConfig,
) -> CoreResult<(Tempo, TraceEntry)> {
    match resolve_tempo(mix, config.manual_bpm, tempo_config) {
        Ok(tempo) => {
            let tempo = if config.round_estimated_bpm && tempo.source == TempoSource::Estimated {
                tempo.with_rounded_bpm(mix.duration_secs())
            } else {
                tempo
            };
            let entry = TraceBuilder::stage("tempo").with_data(
                1.0,
                format!("{:.2} BPM", tempo.bpm),
                serde_json::json!({ "bpm": tempo.bpm, "confidence": tempo.confidence }),
            );
            Ok((tempo, entry))
        }
        Err(e) if e.is_recoverable() => {
            log::warn!("Tempo estimation fell back to {} BPM: {}", config.default_bpm, e);
            let tempo = Tempo::fallback(config.default_bpm)?.with_uniform_beats(mix.duration_secs());
            let entry = TraceBuilder::stage("tempo")
                .complete(format!("fallback {:.2} BPM ({})", tempo.bpm, e));
            Ok((tempo, entry))
        }
        Err(e) => Err(e),
    }
}

fn analyze_key(mix: &AudioBuffer) -> CoreResult<(Option<KeyEstimate>, TraceEntry)> {
    match estimate_key(mix) {
        Ok(key) => {
            let entry = TraceBuilder::stage("key").with_data(
                1.0,
                key.to_string(),
                serde_json::json!({ "confidence": key.confidence }),
            );
            Ok((Some(key), entry))
        }
        Err(e) if e.is_recoverable() => {
            log::warn!("Key estimation failed, key unknown: {}", e);
            Ok((None, TraceBuilder::stage("key").complete(format!("unknown ({})", e))))
        }
        Err(e) => Err(e),
    }
}

fn process_stem(
    name: &str,
    audio: &AudioBuffer,
    tempo: &Tempo,
    key: Option<&KeyEstimate>,
    config: &PipelineConfig,
) -> CoreResult<StemReport> {
    let mut ctx = StemContext::new(name, audio, tempo, key, config);
    run_steps(&mut ctx)?;

    let tags = segment_tags(&ctx);
    let midi_file_stem = ctx.midi.as_ref().map(|_| {
        format!(
            "{}_MELODY_{}_{}BPM",
            ctx.stem,
            key_tag(ctx.key, config.transpose_semitones),
            tempo.bpm.round() as i64
        )
    });

    log::info!("Stem {}: {} segments", name, ctx.segments.len());

    Ok(StemReport {
        stem: ctx.stem,
        segments: ctx.segments,
        tags,
        melody: ctx.melody,
        midi: ctx.midi,
        midi_file_stem,
        trace: ctx.trace,
    })
}

/// Key label for file names: "CMaj", "DMinShift" after transposition, or "UnknownKey"
pub fn key_tag(key: Option<&KeyEstimate>, transpose_semitones: i32) -> String {
    match key {
        Some(key) if transpose_semitones != 0 => {
            format!("{}Shift", key.transposed(transpose_semitones).tag())
        }
        Some(key) => key.tag(),
        None => UNKNOWN_KEY_TAG.to_string(),
    }
}

fn segment_tags(ctx: &StemContext<'_>) -> Vec<SegmentTags> {
    let config = ctx.config;
    let shifted = ctx.key.map(|k| k.transposed(config.transpose_semitones));
    let tag = key_tag(ctx.key, config.transpose_semitones);
    let bpm_int = ctx.tempo.bpm.round() as i64;

    ctx.segments
        .iter()
        .map(|segment| SegmentTags {
            stem: segment.stem.clone(),
            index: segment.index,
            kind: segment.kind,
            start_secs: segment.start_secs,
            end_secs: segment.end_secs,
            bpm: ctx.tempo.bpm,
            key: shifted.map(|k| k.to_string()),
            camelot: shifted.as_ref().map(CamelotCode::from),
            transpose_semitones: config.transpose_semitones,
            time_signature: config.time_signature,
            effects: segment.effects.clone(),
            file_stem: format!(
                "{}_{}_{:03}_{}_{}BPM",
                segment.stem,
                segment.kind.label(),
                segment.index + 1,
                tag,
                bpm_int
            ),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LoopType;
    use crate::error::CoreError;
    use crate::harmony::key::{Mode, PitchClass};

    const SR: u32 = 22050;

    fn click_track(bpm: f64, seconds: f64) -> AudioBuffer {
        let len = (SR as f64 * seconds) as usize;
        let beat = (SR as f64 * 60.0 / bpm) as usize;
        let mut samples = vec![0.0f32; len];
        for start in (0..len).step_by(beat) {
            for (i, s) in samples[start..(start + 200).min(len)].iter_mut().enumerate() {
                *s = 0.8 * (1.0 - i as f32 / 200.0) * if i % 2 == 0 { 1.0 } else { -1.0 };
            }
        }
        AudioBuffer::mono(samples, SR).unwrap()
    }

    fn key(tonic: PitchClass, mode: Mode) -> KeyEstimate {
        KeyEstimate {
            tonic,
            mode,
            confidence: 0.5,
            correlation: 0.8,
        }
    }

    #[test]
    fn test_key_tags() {
        let a_minor = key(PitchClass::A, Mode::Minor);
        assert_eq!(key_tag(Some(&a_minor), 0), "AMin");
        assert_eq!(key_tag(Some(&a_minor), 2), "BMinShift");
        assert_eq!(key_tag(Some(&a_minor), -10), "BMinShift");
        assert_eq!(key_tag(None, 3), UNKNOWN_KEY_TAG);
    }

    #[test]
    fn test_failure_message_format() {
        let outcome = StemOutcome {
            stem: "vocals".to_string(),
            result: Err(CoreError::InsufficientSignal("buffer is silent".to_string())),
        };
        assert_eq!(
            outcome.failure_message().unwrap(),
            "isolation/analysis failed for stem vocals: Insufficient signal: buffer is silent"
        );
    }

    #[test]
    fn test_silent_mix_falls_back() {
        let mix = AudioBuffer::mono(vec![0.0; SR as usize * 4], SR).unwrap();
        let stems = BTreeMap::new();
        let report = process_track(&mix, &stems, &PipelineConfig::default()).unwrap();

        assert_eq!(report.tempo.bpm, 120.0);
        assert_eq!(report.tempo.confidence, 0.0);
        assert!(report.key.is_none());
        assert!(report.recommendations.is_empty());
        assert_eq!(report.trace.len(), 2);
    }

    #[test]
    fn test_file_names_carry_tags() {
        let mix = click_track(120.0, 8.0);
        let mut stems = BTreeMap::new();
        stems.insert("drums".to_string(), mix.clone());
        let config = PipelineConfig {
            manual_bpm: Some(120.0),
            loop_type: LoopType::TwoBar,
            ..PipelineConfig::default()
        };

        let report = process_track(&mix, &stems, &config).unwrap();
        let drums = report.successful().next().unwrap();
        assert_eq!(drums.tags.len(), 2);

        let tag = &drums.tags[1];
        assert!(tag.file_stem.starts_with("drums_2Bar_002_"), "{}", tag.file_stem);
        assert!(tag.file_stem.ends_with("_120BPM"), "{}", tag.file_stem);
        assert_eq!(tag.bpm, 120.0);
        assert_eq!(tag.camelot, report.camelot);
    }

    #[test]
    fn test_invalid_config_rejected_up_front() {
        let mix = click_track(120.0, 4.0);
        let config = PipelineConfig {
            transpose_semitones: 20,
            ..PipelineConfig::default()
        };
        assert!(matches!(
            process_track(&mix, &BTreeMap::new(), &config),
            Err(CoreError::InvalidConfig(_))
        ));
    }
}
