// Harmony - Key estimation and Camelot-wheel recommendations
// Runs independently of slicing on the raw mix

pub mod camelot;
pub mod key;

pub use camelot::{harmonic_moves, recommend, CamelotCode, HarmonicMove, HarmonicRelation};
pub use key::{estimate_key, estimate_key_with_config, KeyConfig, KeyEstimate, Mode, PitchClass};
