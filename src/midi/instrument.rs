//! Instrument container.
//!
//! An instrument holds the notes, control changes and pitch bends decoded for
//! one (program, channel, track) combination, or built up programmatically
//! before encoding.

use super::error::Result;
use super::note::{check_data_byte, ControlChange, Note, PitchBend};
use serde::{Deserialize, Serialize};

/// Channel reserved for drums in General MIDI (0-indexed).
pub const DRUM_CHANNEL: u8 = 9;

/// Event information for a single instrument.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    /// MIDI program number (0-127). Determines the instrument sound.
    pub program: u8,

    /// Whether this is a drum instrument (decoded from channel 9).
    pub is_drum: bool,

    /// Track name, empty if the track had none.
    pub name: String,

    /// Notes in decode (or insertion) order.
    pub notes: Vec<Note>,

    pub control_changes: Vec<ControlChange>,

    pub pitch_bends: Vec<PitchBend>,
}

impl Instrument {
    /// Creates an empty instrument.
    ///
    /// # Arguments
    ///
    /// * `program` - MIDI program number (0-127)
    /// * `is_drum` - Whether the instrument plays on the drum channel
    /// * `name` - Display name, written as the track name when encoding
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidValue`](super::CodecError::InvalidValue)
    /// if `program` is above 127.
    pub fn new(program: u8, is_drum: bool, name: impl Into<String>) -> Result<Self> {
        Ok(Self {
            program: check_data_byte("program", program)?,
            is_drum,
            name: name.into(),
            ..Default::default()
        })
    }

    /// Time in seconds of the last note end or control change, 0.0 if empty.
    pub fn end_time(&self) -> f64 {
        self.notes
            .iter()
            .map(|n| n.end)
            .chain(self.control_changes.iter().map(|c| c.time))
            .fold(0.0, f64::max)
    }

    /// Returns the number of notes in the instrument.
    pub fn note_count(&self) -> usize {
        self.notes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instrument_creation() {
        let instrument = Instrument::new(0, false, "Piano").unwrap();
        assert_eq!(instrument.name, "Piano");
        assert_eq!(instrument.program, 0);
        assert!(!instrument.is_drum);
        assert_eq!(instrument.note_count(), 0);
    }

    #[test]
    fn test_end_time() {
        let mut instrument = Instrument::new(0, false, "").unwrap();
        assert_eq!(instrument.end_time(), 0.0);

        instrument.notes.push(Note::new(60, 100, 0.0, 1.5).unwrap());
        assert_eq!(instrument.end_time(), 1.5);

        instrument.control_changes.push(ControlChange::new(64, 0, 2.5).unwrap());
        assert_eq!(instrument.end_time(), 2.5);
    }

    #[test]
    fn test_program_out_of_range() {
        assert!(Instrument::new(127, false, "").is_ok());
        assert!(Instrument::new(128, false, "").is_err());
    }
}
