//! File-wide meta events: key and time signatures, lyrics and text.
//!
//! These are global to a score rather than owned by an instrument. Key
//! signatures use the 0-23 key number convention: 0-11 are C to B major,
//! 12-23 are C to B minor.

use super::error::{CodecError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Key names used when printing key numbers, preferring flats.
const KEY_NAMES: [&str; 12] = [
    "C", "Db", "D", "Eb", "E", "F", "Gb", "G", "Ab", "A", "Bb", "B",
];

const MAJOR_MODES: [&str; 5] = ["M", "Maj", "Major", "maj", "major"];
const MINOR_MODES: [&str; 5] = ["m", "Min", "Minor", "min", "minor"];

/// Sharps (positive) or flats (negative) written for each major key number.
const MAJOR_ACCIDENTALS: [i8; 12] = [0, -5, 2, -3, 4, -1, 6, 1, -4, 3, -2, 5];
/// Same for minor keys, indexed by tonic pitch class.
const MINOR_ACCIDENTALS: [i8; 12] = [-3, 4, -1, 6, 1, -4, 3, -2, 5, 0, -5, 2];

fn check_time(time: f64) -> Result<()> {
    if !time.is_finite() || time < 0.0 {
        return Err(CodecError::InvalidValue(format!(
            "{} is not a valid `time` value",
            time
        )));
    }
    Ok(())
}

/// A key signature change.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KeySignature {
    /// Key number in `[0, 24)`.
    pub key_number: u8,
    /// Event time in seconds.
    pub time: f64,
}

impl KeySignature {
    pub fn new(key_number: u8, time: f64) -> Result<Self> {
        if key_number >= 24 {
            return Err(CodecError::InvalidValue(format!(
                "{} is not a valid `key_number` value",
                key_number
            )));
        }
        check_time(time)?;
        Ok(Self { key_number, time })
    }

    /// Builds a key signature from the SMF representation: number of sharps
    /// (negative for flats) and the minor flag.
    pub fn from_accidentals(accidentals: i8, minor: bool, time: f64) -> Result<Self> {
        let major_tonic = (7 * accidentals as i32).rem_euclid(12);
        let key_number = if minor {
            (major_tonic + 9).rem_euclid(12) + 12
        } else {
            major_tonic
        };
        Self::new(key_number as u8, time)
    }

    /// The SMF representation of this key: `(sharps or -flats, is_minor)`.
    pub fn to_accidentals(&self) -> (i8, bool) {
        let index = (self.key_number % 12) as usize;
        if self.key_number < 12 {
            (MAJOR_ACCIDENTALS[index], false)
        } else {
            (MINOR_ACCIDENTALS[index], true)
        }
    }
}

impl fmt::Display for KeySignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = key_number_to_key_name(self.key_number).unwrap_or_default();
        write!(f, "{} at {:.2} seconds", name, self.time)
    }
}

/// A time signature change.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeSignature {
    pub numerator: u8,
    pub denominator: u8,
    /// Event time in seconds.
    pub time: f64,
}

impl TimeSignature {
    pub fn new(numerator: u8, denominator: u8, time: f64) -> Result<Self> {
        if numerator == 0 {
            return Err(CodecError::InvalidValue(
                "0 is not a valid `numerator` value".to_string(),
            ));
        }
        if denominator == 0 {
            return Err(CodecError::InvalidValue(
                "0 is not a valid `denominator` value".to_string(),
            ));
        }
        check_time(time)?;
        Ok(Self {
            numerator,
            denominator,
            time,
        })
    }
}

/// A time signature denominator as the power of two written in an SMF event.
///
/// E.g., 4 -> 2 (2^2 = 4), 8 -> 3 (2^3 = 8). Denominators that are not a
/// power of two cannot be written and fall back to a quarter note.
pub(crate) fn denominator_power(denominator: u8) -> u8 {
    if denominator.is_power_of_two() {
        denominator.trailing_zeros() as u8
    } else {
        tracing::warn!(
            denominator,
            "time signature denominator is not a power of two, writing 4"
        );
        2
    }
}

impl fmt::Display for TimeSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} at {:.2} seconds",
            self.numerator, self.denominator, self.time
        )
    }
}

/// Timestamped lyric text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lyric {
    pub text: String,
    pub time: f64,
}

impl Lyric {
    pub fn new(text: impl Into<String>, time: f64) -> Result<Self> {
        check_time(time)?;
        Ok(Self {
            text: text.into(),
            time,
        })
    }
}

impl fmt::Display for Lyric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\" at {:.2} seconds", self.text, self.time)
    }
}

/// Timestamped text event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Text {
    pub text: String,
    pub time: f64,
}

impl Text {
    pub fn new(text: impl Into<String>, time: f64) -> Result<Self> {
        check_time(time)?;
        Ok(Self {
            text: text.into(),
            time,
        })
    }
}

impl fmt::Display for Text {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\" at {:.2} seconds", self.text, self.time)
    }
}

/// Converts a key number to a name such as `"Eb Major"` or `"C# minor"`.
///
/// Flats are preferred, except for the C#, F# and G# minor keys.
pub fn key_number_to_key_name(key_number: u8) -> Result<String> {
    if key_number >= 24 {
        return Err(CodecError::InvalidValue(format!(
            "`key_number` {} is not below 24",
            key_number
        )));
    }
    let key_index = (key_number % 12) as usize;
    if key_number < 12 {
        return Ok(format!("{} Major", KEY_NAMES[key_index]));
    }
    if matches!(key_index, 1 | 6 | 8) {
        Ok(format!("{}# minor", KEY_NAMES[key_index - 1]))
    } else {
        Ok(format!("{} minor", KEY_NAMES[key_index]))
    }
}

/// Parses a key name such as `"C"`, `"f# minor"`, `"Bb Maj"` or `"a"`.
///
/// The root is one of `A-G` (optionally followed by `#` or `b`), then an
/// optional space and mode. A lowercase root without a mode means minor.
pub fn key_name_to_key_number(key_name: &str) -> Result<u8> {
    let invalid = || CodecError::InvalidValue(format!("supplied key {} is not valid", key_name));

    let mut chars = key_name.chars();
    let root = chars.next().ok_or_else(invalid)?;
    let mut key_number: i32 = match root.to_ascii_lowercase() {
        'c' => 0,
        'd' => 2,
        'e' => 4,
        'f' => 5,
        'g' => 7,
        'a' => 9,
        'b' => 11,
        _ => return Err(invalid()),
    };

    let mut rest = chars.as_str();
    if let Some(stripped) = rest.strip_prefix('#') {
        key_number += 1;
        rest = stripped;
    } else if let Some(stripped) = rest.strip_prefix('b') {
        key_number -= 1;
        rest = stripped;
    }
    let mode = rest.strip_prefix(' ').unwrap_or(rest);

    let is_major = MAJOR_MODES.contains(&mode);
    let is_minor = MINOR_MODES.contains(&mode);
    if !mode.is_empty() && !is_major && !is_minor {
        return Err(invalid());
    }

    let mut key_number = key_number.rem_euclid(12) as u8;
    if is_minor || (root.is_ascii_lowercase() && !is_major) {
        key_number += 12;
    }
    Ok(key_number)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_number_to_name() {
        assert_eq!(key_number_to_key_name(0).unwrap(), "C Major");
        assert_eq!(key_number_to_key_name(3).unwrap(), "Eb Major");
        assert_eq!(key_number_to_key_name(13).unwrap(), "C# minor");
        assert_eq!(key_number_to_key_name(21).unwrap(), "A minor");
        assert!(key_number_to_key_name(24).is_err());
    }

    #[test]
    fn test_key_name_to_number() {
        assert_eq!(key_name_to_key_number("C").unwrap(), 0);
        assert_eq!(key_name_to_key_number("C#m").unwrap(), 13);
        assert_eq!(key_name_to_key_number("Bb Major").unwrap(), 10);
        assert_eq!(key_name_to_key_number("a").unwrap(), 21);
        assert_eq!(key_name_to_key_number("a major").unwrap(), 9);
        assert_eq!(key_name_to_key_number("f# minor").unwrap(), 18);
        assert!(key_name_to_key_number("H").is_err());
        assert!(key_name_to_key_number("C dorian").is_err());
        assert!(key_name_to_key_number("").is_err());
    }

    #[test]
    fn test_accidentals_round_trip() {
        for key_number in 0..24 {
            let key = KeySignature::new(key_number, 0.0).unwrap();
            let (accidentals, minor) = key.to_accidentals();
            let back = KeySignature::from_accidentals(accidentals, minor, 0.0).unwrap();
            assert_eq!(back.key_number, key_number);
        }
    }

    #[test]
    fn test_from_accidentals() {
        // One sharp major is G, no accidentals minor is A minor
        assert_eq!(KeySignature::from_accidentals(1, false, 0.0).unwrap().key_number, 7);
        assert_eq!(KeySignature::from_accidentals(0, true, 0.0).unwrap().key_number, 21);
        assert_eq!(KeySignature::from_accidentals(-1, false, 0.0).unwrap().key_number, 5);
    }

    #[test]
    fn test_validation() {
        assert!(KeySignature::new(24, 0.0).is_err());
        assert!(KeySignature::new(0, -1.0).is_err());
        assert!(KeySignature::new(0, f64::INFINITY).is_err());
        assert!(TimeSignature::new(4, 4, f64::NAN).is_err());
        assert!(Lyric::new("la", f64::INFINITY).is_err());
        assert!(Text::new("intro", -0.5).is_err());
        assert!(Text::new("intro", 0.5).is_ok());
        assert!(TimeSignature::new(0, 4, 0.0).is_err());
        assert!(TimeSignature::new(3, 0, 0.0).is_err());
        assert!(TimeSignature::new(6, 8, 3.14).is_ok());
    }

    #[test]
    fn test_display() {
        let ts = TimeSignature::new(6, 8, 3.14).unwrap();
        assert_eq!(ts.to_string(), "6/8 at 3.14 seconds");
        let ks = KeySignature::new(13, 3.14).unwrap();
        assert_eq!(ks.to_string(), "C# minor at 3.14 seconds");
    }

    #[test]
    fn test_denominator_power() {
        assert_eq!(denominator_power(4), 2);
        assert_eq!(denominator_power(8), 3);
        assert_eq!(denominator_power(2), 1);
        assert_eq!(denominator_power(6), 2);
    }
}
