// Groove Engine - Tempo and bar grid
// Musical timing derived from onset periodicity

pub mod grid;
pub mod tempo;

pub use grid::{build_bar_grid, BarGrid, TimeSignature};
pub use tempo::{
    estimate_tempo, estimate_tempo_with_config, resolve_tempo, Tempo, TempoConfig, TempoSource,
};
