// Render Engine - Segment modulation and effects
// LFO, filter, envelope, normalization and transpose over AudioBuffers

pub mod effects;
pub mod modulation;
pub mod pitch;

pub use effects::FilterType;
pub use modulation::{apply_modulation, EnvelopeShape, LfoConfig, ModulationConfig, NoteRate};
pub use pitch::transpose;
