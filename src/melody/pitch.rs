// Melody Tracking - dominant pitch per frame, grouped into notes
// Used to transcribe melodic stems (vocals, bass, keys) to MIDI

use serde::{Deserialize, Serialize};

use crate::audio::{AudioBuffer, SpectrumAnalyzer};
use crate::error::{CoreError, CoreResult};

/// A transcribed note
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MelodyNote {
    /// MIDI note number (60 = middle C)
    pub pitch: u8,

    pub start_secs: f64,
    pub duration_secs: f64,

    /// MIDI velocity (1-127) from the note's relative loudness
    pub velocity: u8,
}

#[derive(Debug, Clone)]
pub struct MelodyConfig {
    /// FFT window size in samples
    pub window_size: usize,

    /// Hop size in samples
    pub hop_size: usize,

    /// Frequencies below this are not pitched (Hz)
    pub min_freq: f32,

    /// Frequencies above this are ignored (Hz)
    pub max_freq: f32,

    /// Frames quieter than this fraction of the loudest frame are unvoiced
    pub rms_gate: f32,

    /// Notes shorter than this many frames are dropped
    pub min_note_frames: usize,
}

impl Default for MelodyConfig {
    fn default() -> Self {
        MelodyConfig {
            window_size: 2048,
            hop_size: 512,
            min_freq: 32.0,
            max_freq: 2000.0,
            rms_gate: 0.1,
            min_note_frames: 2,
        }
    }
}

/// Frequency to the nearest MIDI note, None outside the MIDI range
pub fn freq_to_midi(freq: f32) -> Option<u8> {
    if !freq.is_finite() || freq <= 0.0 {
        return None;
    }
    let note = (69.0 + 12.0 * (freq / 440.0).log2()).round();
    (0.0..=127.0).contains(&note).then_some(note as u8)
}

/// Track the dominant pitch and group steady frames into notes
pub fn track_melody(buffer: &AudioBuffer, config: &MelodyConfig) -> CoreResult<Vec<MelodyNote>> {
    if config.window_size < 2 || config.hop_size == 0 || config.min_freq >= config.max_freq {
        return Err(CoreError::InvalidParameter(format!(
            "melody window {} / hop {}",
            config.window_size, config.hop_size
        )));
    }
    if buffer.is_silent() {
        return Err(CoreError::InsufficientSignal(
            "silent stem has no melody".to_string(),
        ));
    }

    let mono = buffer.to_mono();
    let sample_rate = buffer.sample_rate() as f32;
    let window_size = config.window_size;
    let hop_size = config.hop_size;
    let analyzer = SpectrumAnalyzer::new(window_size);
    let bin_hz = sample_rate / window_size as f32;

    let num_frames = if mono.len() <= window_size {
        1
    } else {
        (mono.len() - window_size) / hop_size + 1
    };

    let frame_rms: Vec<f32> = (0..num_frames)
        .map(|i| {
            let start = i * hop_size;
            let frame = &mono[start..(start + window_size).min(mono.len())];
            (frame.iter().map(|s| s * s).sum::<f32>() / frame.len() as f32).sqrt()
        })
        .collect();
    let loudest = frame_rms.iter().fold(0.0f32, |acc, &r| acc.max(r));

    let lo_bin = ((config.min_freq / bin_hz).ceil() as usize).max(1);
    let hi_bin = ((config.max_freq / bin_hz).floor() as usize).min(window_size / 2 - 1);

    let mut frame_pitches: Vec<Option<u8>> = Vec::with_capacity(num_frames);
    for (i, &rms) in frame_rms.iter().enumerate() {
        if rms < loudest * config.rms_gate || lo_bin >= hi_bin {
            frame_pitches.push(None);
            continue;
        }

        let start = i * hop_size;
        let spectrum = analyzer.magnitudes(&mono[start..(start + window_size).min(mono.len())])?;

        let (peak_bin, _) = (lo_bin..=hi_bin).fold((lo_bin, f32::MIN), |best, k| {
            if spectrum[k] > best.1 {
                (k, spectrum[k])
            } else {
                best
            }
        });

        // Parabolic refinement around the peak bin
        let (left, center, right) = (spectrum[peak_bin - 1], spectrum[peak_bin], spectrum[peak_bin + 1]);
        let denominator = left - 2.0 * center + right;
        let offset = if denominator.abs() > f32::EPSILON {
            (0.5 * (left - right) / denominator).clamp(-0.5, 0.5)
        } else {
            0.0
        };
        let freq = (peak_bin as f32 + offset) * bin_hz;

        frame_pitches.push(if freq < config.min_freq {
            None
        } else {
            freq_to_midi(freq)
        });
    }

    let frame_secs = hop_size as f64 / sample_rate as f64;
    let mut notes = Vec::new();
    let mut i = 0;
    while i < frame_pitches.len() {
        let Some(pitch) = frame_pitches[i] else {
            i += 1;
            continue;
        };

        let start = i;
        while i < frame_pitches.len() && frame_pitches[i] == Some(pitch) {
            i += 1;
        }

        let length = i - start;
        if length >= config.min_note_frames {
            let mean_rms = frame_rms[start..i].iter().sum::<f32>() / length as f32;
            let velocity = (mean_rms / loudest * 127.0).round().clamp(1.0, 127.0) as u8;
            notes.push(MelodyNote {
                pitch,
                start_secs: start as f64 * frame_secs,
                duration_secs: length as f64 * frame_secs,
                velocity,
            });
        }
    }

    log::debug!("Tracked {} notes over {} frames", notes.len(), num_frames);
    Ok(notes)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: u32 = 22050;

    fn tone_sequence(freqs: &[f32], note_secs: f32) -> AudioBuffer {
        let per_note = (SR as f32 * note_secs) as usize;
        let mut samples = Vec::with_capacity(per_note * freqs.len());
        for &freq in freqs {
            for i in 0..per_note {
                samples.push(0.5 * (2.0 * std::f32::consts::PI * freq * i as f32 / SR as f32).sin());
            }
        }
        AudioBuffer::mono(samples, SR).unwrap()
    }

    #[test]
    fn test_freq_to_midi() {
        assert_eq!(freq_to_midi(440.0), Some(69));
        assert_eq!(freq_to_midi(261.63), Some(60));
        assert_eq!(freq_to_midi(0.0), None);
        assert_eq!(freq_to_midi(f32::NAN), None);
    }

    #[test]
    fn test_tracks_a_scale_fragment() {
        // A4, C5, E5 for half a second each
        let buffer = tone_sequence(&[440.0, 523.25, 659.26], 0.5);
        let notes = track_melody(&buffer, &MelodyConfig::default()).unwrap();

        let pitches: Vec<u8> = notes.iter().filter(|n| n.duration_secs > 0.2).map(|n| n.pitch).collect();
        assert_eq!(pitches, vec![69, 72, 76]);
        assert!(notes.iter().all(|n| n.velocity >= 1));
    }

    #[test]
    fn test_notes_are_ordered() {
        let buffer = tone_sequence(&[220.0, 330.0], 0.5);
        let notes = track_melody(&buffer, &MelodyConfig::default()).unwrap();
        for pair in notes.windows(2) {
            assert!(pair[1].start_secs >= pair[0].start_secs + pair[0].duration_secs - 1e-9);
        }
    }

    #[test]
    fn test_silence_is_insufficient() {
        let buffer = AudioBuffer::mono(vec![0.0; SR as usize], SR).unwrap();
        assert!(matches!(
            track_melody(&buffer, &MelodyConfig::default()),
            Err(CoreError::InsufficientSignal(_))
        ));
    }
}
