// Loop Architect - stem analysis and loop/one-shot slicing
// Module declarations

pub mod audio;
pub mod config;
pub mod error;
pub mod groove;
pub mod harmony;
pub mod melody;
pub mod pipeline;
pub mod render;
pub mod slicing;

pub use audio::AudioBuffer;
pub use config::{LoopType, PipelineConfig};
pub use error::{CoreError, CoreResult};
pub use pipeline::{process_track, ModelContext, PackReport, SeparationBackend};
