// Pipeline execution and monitoring module
// Orchestrates tempo, key and per-stem slicing for one track

pub mod backend;
pub mod orchestrator;
pub mod step;
pub mod trace;

pub use backend::{ModelContext, SeparationBackend, SeparationError, MIX_STEM};
pub use orchestrator::{
    key_tag, process_track, PackReport, PackSummary, SegmentTags, StemOutcome, StemReport,
    StemSummary,
};
pub use step::{run_steps, StemContext, WorkflowStep, STEM_STEPS};
pub use trace::{read_trace_file, TraceBuilder, TraceEntry, TraceError, TraceWriter};
