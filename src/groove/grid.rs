// Bar Grid - Time signature and bar boundaries
// Converts a tempo plus time signature into absolute bar start times

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{CoreError, CoreResult};
use crate::groove::tempo::Tempo;

/// Musical time signature (e.g. 4/4, 3/4, 6/8)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeSignature {
    numerator: u32,
    denominator: u32,
}

impl TimeSignature {
    pub const FOUR_FOUR: TimeSignature = TimeSignature {
        numerator: 4,
        denominator: 4,
    };

    /// Validated time signature
    /// Numerator must be positive, denominator a power of two
    pub fn new(numerator: u32, denominator: u32) -> CoreResult<Self> {
        if numerator == 0 || denominator == 0 || !denominator.is_power_of_two() {
            return Err(CoreError::InvalidTimeSignature {
                numerator,
                denominator,
            });
        }
        Ok(TimeSignature {
            numerator,
            denominator,
        })
    }

    /// Get number of beats per bar
    pub fn beats_per_bar(&self) -> u32 {
        self.numerator
    }

    /// Get the note value that gets one beat (4 = quarter note)
    pub fn beat_unit(&self) -> u32 {
        self.denominator
    }
}

impl Default for TimeSignature {
    fn default() -> Self {
        TimeSignature::FOUR_FOUR
    }
}

impl fmt::Display for TimeSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

impl FromStr for TimeSignature {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CoreError::InvalidConfig(format!("time signature '{}' is not N/D", s));
        let (num, den) = s.trim().split_once('/').ok_or_else(invalid)?;
        let numerator = num.trim().parse::<u32>().map_err(|_| invalid())?;
        let denominator = den.trim().parse::<u32>().map_err(|_| invalid())?;
        TimeSignature::new(numerator, denominator)
    }
}

impl TryFrom<String> for TimeSignature {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TimeSignature> for String {
    fn from(value: TimeSignature) -> Self {
        value.to_string()
    }
}

/// Bar boundaries in seconds from buffer start
///
/// Strictly increasing, starts at 0.0, constant spacing of one bar, last
/// boundary never past the buffer duration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BarGrid {
    boundaries: Vec<f64>,
    bar_secs: f64,
    bpm: f64,
    time_signature: TimeSignature,
}

impl BarGrid {
    pub fn boundaries(&self) -> &[f64] {
        &self.boundaries
    }

    /// Length of one bar in seconds
    pub fn bar_secs(&self) -> f64 {
        self.bar_secs
    }

    pub fn bpm(&self) -> f64 {
        self.bpm
    }

    pub fn time_signature(&self) -> TimeSignature {
        self.time_signature
    }

    /// Number of complete bars between boundaries
    pub fn bar_count(&self) -> usize {
        self.boundaries.len().saturating_sub(1)
    }

    /// Get bar number for a given time (0-indexed)
    pub fn bar_at(&self, secs: f64) -> usize {
        if secs <= 0.0 {
            return 0;
        }
        (secs / self.bar_secs).floor() as usize
    }
}

/// Build the bar grid: `grid[i] = i * (60 / bpm) * numerator`
/// for `i = 0 ..= floor(duration / bar_length)`
pub fn build_bar_grid(
    tempo: &Tempo,
    time_signature: TimeSignature,
    duration: f64,
) -> CoreResult<BarGrid> {
    if !tempo.bpm.is_finite() || tempo.bpm <= 0.0 {
        return Err(CoreError::InvalidTempo(tempo.bpm));
    }
    if !duration.is_finite() || duration <= 0.0 {
        return Err(CoreError::MalformedAudio(format!(
            "bar grid needs a positive duration, got {}",
            duration
        )));
    }

    let bar_secs = 60.0 / tempo.bpm * time_signature.beats_per_bar() as f64;

    // Tolerate rounding when the duration is an exact number of bars
    let count = (duration / bar_secs + 1e-9).floor() as usize;
    let boundaries = (0..=count).map(|i| i as f64 * bar_secs).collect();

    log::debug!(
        "Bar grid: {} bars of {:.3}s at {:.2} BPM ({})",
        count,
        bar_secs,
        tempo.bpm,
        time_signature
    );

    Ok(BarGrid {
        boundaries,
        bar_secs,
        bpm: tempo.bpm,
        time_signature,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tempo(bpm: f64) -> Tempo {
        Tempo::manual(bpm).unwrap()
    }

    #[test]
    fn test_time_signature_beats() {
        assert_eq!(TimeSignature::FOUR_FOUR.beats_per_bar(), 4);
        assert_eq!(TimeSignature::new(3, 4).unwrap().beats_per_bar(), 3);
        assert_eq!(TimeSignature::new(6, 8).unwrap().beat_unit(), 8);
    }

    #[test]
    fn test_invalid_time_signature() {
        assert!(matches!(
            TimeSignature::new(0, 4),
            Err(CoreError::InvalidTimeSignature { numerator: 0, denominator: 4 })
        ));
        assert!(TimeSignature::new(4, 0).is_err());
        assert!(TimeSignature::new(4, 3).is_err());
    }

    #[test]
    fn test_time_signature_string_form() {
        let ts: TimeSignature = "3/4".parse().unwrap();
        assert_eq!(ts, TimeSignature::new(3, 4).unwrap());
        assert_eq!(ts.to_string(), "3/4");
        assert!("four".parse::<TimeSignature>().is_err());

        let json = serde_json::to_string(&TimeSignature::FOUR_FOUR).unwrap();
        assert_eq!(json, "\"4/4\"");
        let back: TimeSignature = serde_json::from_str("\"7/8\"").unwrap();
        assert_eq!(back.beats_per_bar(), 7);
        assert!(serde_json::from_str::<TimeSignature>("\"0/4\"").is_err());
    }

    #[test]
    fn test_grid_120_bpm_eight_seconds() {
        let grid = build_bar_grid(&tempo(120.0), TimeSignature::FOUR_FOUR, 8.0).unwrap();
        assert_eq!(grid.boundaries(), &[0.0, 2.0, 4.0, 6.0, 8.0]);
        assert_eq!(grid.bar_count(), 4);
        assert!((grid.bar_secs() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_grid_spacing_is_constant_across_tempo_range() {
        for bpm in [20.0, 61.3, 97.0, 120.0, 174.5, 300.0] {
            for duration in [0.3, 3.7, 10.0, 61.0] {
                let grid = build_bar_grid(&tempo(bpm), TimeSignature::FOUR_FOUR, duration).unwrap();
                let bar = 60.0 / bpm * 4.0;

                assert_eq!(grid.boundaries().len(), (duration / bar).floor() as usize + 1);
                assert_eq!(grid.boundaries()[0], 0.0);
                for pair in grid.boundaries().windows(2) {
                    assert!((pair[1] - pair[0] - bar).abs() < 1e-9);
                }
                assert!(*grid.boundaries().last().unwrap() <= duration + 1e-9);
            }
        }
    }

    #[test]
    fn test_grid_three_four() {
        let ts = TimeSignature::new(3, 4).unwrap();
        let grid = build_bar_grid(&tempo(90.0), ts, 10.0).unwrap();
        // 3 beats at 90 BPM = 2.0s per bar
        assert_eq!(grid.boundaries(), &[0.0, 2.0, 4.0, 6.0, 8.0, 10.0]);
    }

    #[test]
    fn test_grid_rejects_bad_duration() {
        assert!(matches!(
            build_bar_grid(&tempo(120.0), TimeSignature::FOUR_FOUR, 0.0),
            Err(CoreError::MalformedAudio(_))
        ));
        assert!(build_bar_grid(&tempo(120.0), TimeSignature::FOUR_FOUR, f64::NAN).is_err());
    }

    #[test]
    fn test_bar_at() {
        let grid = build_bar_grid(&tempo(120.0), TimeSignature::FOUR_FOUR, 8.0).unwrap();
        assert_eq!(grid.bar_at(0.5), 0);
        assert_eq!(grid.bar_at(2.5), 1);
        assert_eq!(grid.bar_at(4.5), 2);
    }
}
