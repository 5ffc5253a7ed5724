// Melody - pitch tracking and MIDI export for melodic stems

pub mod midi;
pub mod pitch;

pub use midi::{export_melody_midi, MidiExportOptions};
pub use pitch::{freq_to_midi, track_melody, MelodyConfig, MelodyNote};
