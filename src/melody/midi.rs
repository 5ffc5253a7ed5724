// MIDI Export - transcribed melody to a Standard MIDI File using midly
// Track 0 carries tempo and time signature, track 1 the melody

use midly::{Header, MetaMessage, MidiMessage, Smf, Timing, Track, TrackEvent, TrackEventKind};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::groove::grid::TimeSignature;
use crate::melody::pitch::MelodyNote;

/// MIDI export options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MidiExportOptions {
    /// Pulses per quarter note (PPQ) - typically 480 or 960
    pub ppq: u16,

    /// MIDI channel for the melody track (0-15)
    pub channel: u8,
}

impl Default for MidiExportOptions {
    fn default() -> Self {
        MidiExportOptions { ppq: 480, channel: 0 }
    }
}

/// Export melody notes to MIDI file bytes
pub fn export_melody_midi(
    notes: &[MelodyNote],
    track_name: &str,
    bpm: f64,
    time_signature: TimeSignature,
    options: &MidiExportOptions,
) -> CoreResult<Vec<u8>> {
    if !bpm.is_finite() || bpm <= 0.0 {
        return Err(CoreError::InvalidTempo(bpm));
    }
    if options.channel > 15 || options.ppq == 0 || options.ppq > 0x7FFF {
        return Err(CoreError::InvalidParameter(format!(
            "MIDI channel {} / ppq {}",
            options.channel, options.ppq
        )));
    }

    let header = Header {
        format: midly::Format::Parallel,
        timing: Timing::Metrical(options.ppq.into()),
    };

    let mut meta_track = Track::new();
    add_track_name(&mut meta_track, "META");
    add_tempo(&mut meta_track, bpm);
    add_time_signature(&mut meta_track, time_signature);
    meta_track.push(TrackEvent {
        delta: 0.into(),
        kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
    });

    let ticks_per_sec = options.ppq as f64 * bpm / 60.0;
    let melody_track = create_melody_track(notes, track_name, ticks_per_sec, options.channel);

    let smf = Smf {
        header,
        tracks: vec![meta_track, melody_track],
    };

    let mut bytes = Vec::new();
    smf.write(&mut bytes)
        .map_err(|e| CoreError::InvalidParameter(format!("Failed to write MIDI: {}", e)))?;

    log::debug!("Exported {} notes to MIDI ({} bytes)", notes.len(), bytes.len());
    Ok(bytes)
}

fn create_melody_track<'a>(
    notes: &[MelodyNote],
    name: &'a str,
    ticks_per_sec: f64,
    channel: u8,
) -> Track<'a> {
    let mut events: Vec<(u32, TrackEventKind<'a>)> = Vec::with_capacity(notes.len() * 2);

    for note in notes {
        let key = note.pitch.min(127);
        let tick_on = (note.start_secs * ticks_per_sec).round() as u32;
        let tick_off = (((note.start_secs + note.duration_secs) * ticks_per_sec).round() as u32)
            .max(tick_on + 1);

        events.push((
            tick_on,
            TrackEventKind::Midi {
                channel: channel.into(),
                message: MidiMessage::NoteOn {
                    key: key.into(),
                    vel: note.velocity.clamp(1, 127).into(),
                },
            },
        ));
        events.push((
            tick_off,
            TrackEventKind::Midi {
                channel: channel.into(),
                message: MidiMessage::NoteOff {
                    key: key.into(),
                    vel: 0.into(),
                },
            },
        ));
    }

    // Stable sort keeps a note-off ahead of a note-on sharing its tick
    events.sort_by_key(|(tick, kind)| {
        let is_note_on = matches!(
            kind,
            TrackEventKind::Midi {
                message: MidiMessage::NoteOn { .. },
                ..
            }
        );
        (*tick, is_note_on)
    });

    let mut track = Track::new();
    add_track_name(&mut track, name);

    let mut last_tick = 0;
    for (tick, kind) in events {
        track.push(TrackEvent {
            delta: tick.saturating_sub(last_tick).into(),
            kind,
        });
        last_tick = tick;
    }

    track.push(TrackEvent {
        delta: 0.into(),
        kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
    });
    track
}

fn add_track_name<'a>(track: &mut Track<'a>, name: &'a str) {
    track.push(TrackEvent {
        delta: 0.into(),
        kind: TrackEventKind::Meta(MetaMessage::TrackName(name.as_bytes())),
    });
}

/// Tempo as microseconds per quarter note (24-bit)
fn add_tempo(track: &mut Track<'_>, bpm: f64) {
    let us_per_quarter = ((60_000_000.0 / bpm) as u32).min(0xFF_FFFF);
    track.push(TrackEvent {
        delta: 0.into(),
        kind: TrackEventKind::Meta(MetaMessage::Tempo(us_per_quarter.into())),
    });
}

fn add_time_signature(track: &mut Track<'_>, time_signature: TimeSignature) {
    let numerator = time_signature.beats_per_bar().min(255) as u8;
    // Denominator is stored as a power of two
    let denominator = time_signature.beat_unit().trailing_zeros() as u8;

    // MIDI clocks per metronome click (24 for quarter note)
    let clocks_per_click = 24u8;

    // 32nd notes per quarter note (8)
    let thirty_seconds_per_quarter = 8u8;

    track.push(TrackEvent {
        delta: 0.into(),
        kind: TrackEventKind::Meta(MetaMessage::TimeSignature(
            numerator,
            denominator,
            clocks_per_click,
            thirty_seconds_per_quarter,
        )),
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(pitch: u8, start: f64, duration: f64) -> MelodyNote {
        MelodyNote {
            pitch,
            start_secs: start,
            duration_secs: duration,
            velocity: 100,
        }
    }

    #[test]
    fn test_export_parses_back() {
        let notes = vec![note(60, 0.0, 0.5), note(64, 0.5, 0.5), note(67, 1.0, 1.0)];
        let bytes = export_melody_midi(
            &notes,
            "vocals",
            120.0,
            TimeSignature::FOUR_FOUR,
            &MidiExportOptions::default(),
        )
        .unwrap();

        let smf = Smf::parse(&bytes).unwrap();
        assert_eq!(smf.tracks.len(), 2);

        let note_ons = smf.tracks[1]
            .iter()
            .filter(|e| {
                matches!(
                    e.kind,
                    TrackEventKind::Midi {
                        message: MidiMessage::NoteOn { .. },
                        ..
                    }
                )
            })
            .count();
        assert_eq!(note_ons, 3);
    }

    #[test]
    fn test_tempo_and_time_signature_meta() {
        let ts = TimeSignature::new(3, 4).unwrap();
        let bytes = export_melody_midi(&[], "bass", 100.0, ts, &MidiExportOptions::default()).unwrap();
        let smf = Smf::parse(&bytes).unwrap();

        let mut saw_tempo = false;
        let mut saw_signature = false;
        for event in &smf.tracks[0] {
            match event.kind {
                TrackEventKind::Meta(MetaMessage::Tempo(t)) => {
                    assert_eq!(t.as_int(), 600_000);
                    saw_tempo = true;
                }
                TrackEventKind::Meta(MetaMessage::TimeSignature(num, den, _, _)) => {
                    assert_eq!((num, den), (3, 2));
                    saw_signature = true;
                }
                _ => {}
            }
        }
        assert!(saw_tempo && saw_signature);
    }

    #[test]
    fn test_note_timing_in_ticks() {
        // At 120 BPM and 480 PPQ one second is 960 ticks
        let bytes = export_melody_midi(
            &[note(69, 1.0, 0.5)],
            "lead",
            120.0,
            TimeSignature::FOUR_FOUR,
            &MidiExportOptions::default(),
        )
        .unwrap();
        let smf = Smf::parse(&bytes).unwrap();

        let mut tick = 0u32;
        let mut on_tick = None;
        let mut off_tick = None;
        for event in &smf.tracks[1] {
            tick += event.delta.as_int();
            match event.kind {
                TrackEventKind::Midi { message: MidiMessage::NoteOn { .. }, .. } => on_tick = Some(tick),
                TrackEventKind::Midi { message: MidiMessage::NoteOff { .. }, .. } => off_tick = Some(tick),
                _ => {}
            }
        }
        assert_eq!(on_tick, Some(960));
        assert_eq!(off_tick, Some(1440));
    }

    #[test]
    fn test_rejects_bad_tempo() {
        assert!(matches!(
            export_melody_midi(&[], "x", 0.0, TimeSignature::FOUR_FOUR, &MidiExportOptions::default()),
            Err(CoreError::InvalidTempo(_))
        ));
    }
}
