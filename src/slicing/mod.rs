// Slicing - bar-aligned loops and onset-aligned one-shots

pub mod loops;
pub mod onset;
pub mod segment;

pub use loops::{crossfade_join, slice_loops, BarsPerLoop, LoopSliceConfig};
pub use onset::{
    detect_onsets, detect_onsets_with_config, extract_one_shots, OneShotConfig, Onset,
    OnsetConfig, OnsetList,
};
pub use segment::{AppliedEffects, Segment, SegmentKind};
