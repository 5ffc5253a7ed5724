// Camelot Wheel - Harmonic mixing recommendations
// Fixed 24-entry table from (tonic, mode) to wheel position:
// numbers 1-12 are wheel positions, 'A' = minor, 'B' = major.
// Adjacent numbers are a fifth apart; same number, other letter is the relative key.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;
use crate::harmony::key::{KeyEstimate, Mode, PitchClass};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CamelotLetter {
    /// Minor keys
    A,
    /// Major keys
    B,
}

impl CamelotLetter {
    pub fn opposite(self) -> CamelotLetter {
        match self {
            CamelotLetter::A => CamelotLetter::B,
            CamelotLetter::B => CamelotLetter::A,
        }
    }

    fn mode(self) -> Mode {
        match self {
            CamelotLetter::A => Mode::Minor,
            CamelotLetter::B => Mode::Major,
        }
    }
}

/// A position on the Camelot wheel, always in 1A..12A / 1B..12B
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CamelotCode {
    number: u8,
    letter: CamelotLetter,
}

impl CamelotCode {
    pub fn new(number: u8, letter: CamelotLetter) -> Option<CamelotCode> {
        (1..=12)
            .contains(&number)
            .then_some(CamelotCode { number, letter })
    }

    pub fn number(&self) -> u8 {
        self.number
    }

    pub fn letter(&self) -> CamelotLetter {
        self.letter
    }

    /// Wheel position for a key
    pub fn from_key(tonic: PitchClass, mode: Mode) -> CamelotCode {
        let (number, letter) = match (tonic, mode) {
            // Minor keys (A)
            (PitchClass::A, Mode::Minor) => (8, CamelotLetter::A),
            (PitchClass::As, Mode::Minor) => (3, CamelotLetter::A),
            (PitchClass::B, Mode::Minor) => (10, CamelotLetter::A),
            (PitchClass::C, Mode::Minor) => (5, CamelotLetter::A),
            (PitchClass::Cs, Mode::Minor) => (12, CamelotLetter::A),
            (PitchClass::D, Mode::Minor) => (7, CamelotLetter::A),
            (PitchClass::Ds, Mode::Minor) => (2, CamelotLetter::A),
            (PitchClass::E, Mode::Minor) => (9, CamelotLetter::A),
            (PitchClass::F, Mode::Minor) => (4, CamelotLetter::A),
            (PitchClass::Fs, Mode::Minor) => (11, CamelotLetter::A),
            (PitchClass::G, Mode::Minor) => (6, CamelotLetter::A),
            (PitchClass::Gs, Mode::Minor) => (1, CamelotLetter::A),

            // Major keys (B)
            (PitchClass::A, Mode::Major) => (11, CamelotLetter::B),
            (PitchClass::As, Mode::Major) => (6, CamelotLetter::B),
            (PitchClass::B, Mode::Major) => (1, CamelotLetter::B),
            (PitchClass::C, Mode::Major) => (8, CamelotLetter::B),
            (PitchClass::Cs, Mode::Major) => (3, CamelotLetter::B),
            (PitchClass::D, Mode::Major) => (10, CamelotLetter::B),
            (PitchClass::Ds, Mode::Major) => (5, CamelotLetter::B),
            (PitchClass::E, Mode::Major) => (12, CamelotLetter::B),
            (PitchClass::F, Mode::Major) => (7, CamelotLetter::B),
            (PitchClass::Fs, Mode::Major) => (2, CamelotLetter::B),
            (PitchClass::G, Mode::Major) => (9, CamelotLetter::B),
            (PitchClass::Gs, Mode::Major) => (4, CamelotLetter::B),
        };
        CamelotCode { number, letter }
    }

    /// The key sitting at this wheel position
    pub fn to_key(&self) -> (PitchClass, Mode) {
        let mode = self.letter.mode();
        // Reverse lookup over the 24-entry table
        let tonic = PitchClass::ALL
            .into_iter()
            .find(|&pc| CamelotCode::from_key(pc, mode) == *self)
            .unwrap_or(PitchClass::C);
        (tonic, mode)
    }

    /// Step around the wheel, wrapping 12 -> 1 and 1 -> 12
    pub fn step(&self, delta: i8) -> CamelotCode {
        let number = (self.number as i8 - 1 + delta).rem_euclid(12) as u8 + 1;
        CamelotCode {
            number,
            letter: self.letter,
        }
    }

    pub fn relative(&self) -> CamelotCode {
        CamelotCode {
            number: self.number,
            letter: self.letter.opposite(),
        }
    }
}

impl From<&KeyEstimate> for CamelotCode {
    fn from(key: &KeyEstimate) -> Self {
        CamelotCode::from_key(key.tonic, key.mode)
    }
}

impl fmt::Display for CamelotCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let letter = match self.letter {
            CamelotLetter::A => 'A',
            CamelotLetter::B => 'B',
        };
        write!(f, "{}{}", self.number, letter)
    }
}

impl FromStr for CamelotCode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CoreError::InvalidParameter(format!("'{}' is not a Camelot code", s));
        let s = s.trim();
        let letter = match s.chars().last() {
            Some('A') | Some('a') => CamelotLetter::A,
            Some('B') | Some('b') => CamelotLetter::B,
            _ => return Err(invalid()),
        };
        let number = s[..s.len() - 1].parse::<u8>().map_err(|_| invalid())?;
        CamelotCode::new(number, letter).ok_or_else(invalid)
    }
}

impl TryFrom<String> for CamelotCode {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CamelotCode> for String {
    fn from(value: CamelotCode) -> Self {
        value.to_string()
    }
}

/// How a recommended code relates to the source key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HarmonicRelation {
    Same,
    /// +1 on the wheel
    FifthUp,
    /// -1 on the wheel
    FifthDown,
    /// Same number, opposite letter (energy boost / mood change)
    RelativeMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarmonicMove {
    pub code: CamelotCode,
    pub relation: HarmonicRelation,
}

/// Compatible codes for a key: its own code first, then ±1 and the relative mode
pub fn recommend(key: &KeyEstimate) -> Vec<CamelotCode> {
    harmonic_moves(CamelotCode::from(key))
        .into_iter()
        .map(|m| m.code)
        .collect()
}

/// Compatible moves from a wheel position, labelled by relation
pub fn harmonic_moves(code: CamelotCode) -> Vec<HarmonicMove> {
    vec![
        HarmonicMove {
            code,
            relation: HarmonicRelation::Same,
        },
        HarmonicMove {
            code: code.step(1),
            relation: HarmonicRelation::FifthUp,
        },
        HarmonicMove {
            code: code.step(-1),
            relation: HarmonicRelation::FifthDown,
        },
        HarmonicMove {
            code: code.relative(),
            relation: HarmonicRelation::RelativeMode,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(tonic: PitchClass, mode: Mode) -> KeyEstimate {
        KeyEstimate {
            tonic,
            mode,
            confidence: 0.5,
            correlation: 0.9,
        }
    }

    #[test]
    fn test_camelot_table_entries() {
        assert_eq!(CamelotCode::from_key(PitchClass::C, Mode::Major).to_string(), "8B");
        assert_eq!(CamelotCode::from_key(PitchClass::A, Mode::Minor).to_string(), "8A");
        assert_eq!(CamelotCode::from_key(PitchClass::Gs, Mode::Minor).to_string(), "1A");
        assert_eq!(CamelotCode::from_key(PitchClass::E, Mode::Major).to_string(), "12B");
    }

    #[test]
    fn test_table_is_a_bijection() {
        let mut seen = std::collections::HashSet::new();
        for tonic in PitchClass::ALL {
            for mode in [Mode::Major, Mode::Minor] {
                let code = CamelotCode::from_key(tonic, mode);
                assert!(seen.insert(code), "duplicate code {}", code);
                assert_eq!(code.to_key(), (tonic, mode));
            }
        }
        assert_eq!(seen.len(), 24);
    }

    #[test]
    fn test_adjacent_positions_are_fifths() {
        for tonic in PitchClass::ALL {
            for mode in [Mode::Major, Mode::Minor] {
                let code = CamelotCode::from_key(tonic, mode);
                assert_eq!(code.step(1).to_key().0, tonic.transpose(7));
            }
        }
    }

    #[test]
    fn test_recommend_closure() {
        for tonic in PitchClass::ALL {
            for mode in [Mode::Major, Mode::Minor] {
                let estimate = key(tonic, mode);
                let codes = recommend(&estimate);
                assert!(!codes.is_empty());
                assert!(codes.contains(&CamelotCode::from(&estimate)));
                for code in &codes {
                    assert!((1..=12).contains(&code.number()));
                }
            }
        }
    }

    #[test]
    fn test_recommend_wraps_wheel() {
        let codes = recommend(&key(PitchClass::Cs, Mode::Minor));
        let labels: Vec<String> = codes.iter().map(|c| c.to_string()).collect();
        assert_eq!(labels, vec!["12A", "1A", "11A", "12B"]);
    }

    #[test]
    fn test_harmonic_move_relations() {
        let moves = harmonic_moves("8A".parse().unwrap());
        assert_eq!(moves[0].relation, HarmonicRelation::Same);
        assert_eq!(moves[1].code.to_string(), "9A");
        assert_eq!(moves[2].code.to_string(), "7A");
        assert_eq!(moves[3].code.to_string(), "8B");
        assert_eq!(moves[3].relation, HarmonicRelation::RelativeMode);
    }

    #[test]
    fn test_parse_camelot_code() {
        assert_eq!("11b".parse::<CamelotCode>().unwrap().to_string(), "11B");
        assert!("13A".parse::<CamelotCode>().is_err());
        assert!("0B".parse::<CamelotCode>().is_err());
        assert!("8C".parse::<CamelotCode>().is_err());
        assert!("A".parse::<CamelotCode>().is_err());
        assert!("".parse::<CamelotCode>().is_err());
    }
}
