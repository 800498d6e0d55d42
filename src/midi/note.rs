//! Note and controller events in absolute time.
//!
//! A note represents a single MIDI note-on/note-off pair with start and end
//! times in seconds. Control changes and pitch bends are point events.

use super::error::{CodecError, Result};
use serde::{Deserialize, Serialize};

/// Controller number of the sustain (damper) pedal.
pub const SUSTAIN_CONTROLLER: u8 = 64;

/// Rejects data bytes above 127.
pub(crate) fn check_data_byte(field: &str, value: u8) -> Result<u8> {
    if value > 127 {
        return Err(CodecError::InvalidValue(format!(
            "{} is not a valid `{}` value",
            value, field
        )));
    }
    Ok(value)
}

/// Rejects NaN and infinite event times.
pub(crate) fn check_finite(field: &str, time: f64) -> Result<f64> {
    if !time.is_finite() {
        return Err(CodecError::InvalidValue(format!(
            "{} is not a valid `{}` value",
            time, field
        )));
    }
    Ok(time)
}

/// Represents a single MIDI note with absolute timing and dynamics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Note {
    /// MIDI note number (0-127). 60 = Middle C (C4).
    pub pitch: u8,

    /// Note velocity (0-127).
    pub velocity: u8,

    /// Note-on time in seconds.
    pub start: f64,

    /// Note-off time in seconds. Never before `start`.
    pub end: f64,
}

impl Note {
    /// Creates a new note with the given parameters.
    ///
    /// # Arguments
    ///
    /// * `pitch` - MIDI note number (0-127)
    /// * `velocity` - Note velocity (0-127)
    /// * `start` - Note-on time in seconds
    /// * `end` - Note-off time in seconds
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidNote`] if `end < start`, and
    /// [`CodecError::InvalidValue`] for a pitch or velocity above 127 or a
    /// time that is not finite.
    ///
    /// # Examples
    ///
    /// ```
    /// use midiframe::midi::Note;
    ///
    /// // Middle C held for one second
    /// let note = Note::new(60, 100, 0.0, 1.0).unwrap();
    /// assert_eq!(note.duration(), 1.0);
    /// assert!(Note::new(60, 100, 1.0, 0.5).is_err());
    /// ```
    pub fn new(pitch: u8, velocity: u8, start: f64, end: f64) -> Result<Self> {
        let pitch = check_data_byte("pitch", pitch)?;
        let velocity = check_data_byte("velocity", velocity)?;
        let start = check_finite("start", start)?;
        let end = check_finite("end", end)?;
        if end < start {
            return Err(CodecError::InvalidNote { start, end });
        }
        Ok(Self {
            pitch,
            velocity,
            start,
            end,
        })
    }

    /// Duration of the note in seconds.
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    /// Returns a copy of this note moved by `seconds`.
    pub fn shifted(&self, seconds: f64) -> Self {
        Self {
            start: self.start + seconds,
            end: self.end + seconds,
            ..*self
        }
    }
}

/// A control change event.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ControlChange {
    /// Controller number (0-127).
    pub number: u8,

    /// Controller value (0-127).
    pub value: u8,

    /// Event time in seconds.
    pub time: f64,
}

impl ControlChange {
    pub fn new(number: u8, value: u8, time: f64) -> Result<Self> {
        Ok(Self {
            number: check_data_byte("number", number)?,
            value: check_data_byte("value", value)?,
            time: check_finite("time", time)?,
        })
    }

    /// Whether this event belongs to the sustain pedal.
    pub fn is_sustain(&self) -> bool {
        self.number == SUSTAIN_CONTROLLER
    }

    pub fn shifted(&self, seconds: f64) -> Self {
        Self {
            time: self.time + seconds,
            ..*self
        }
    }
}

/// A pitch bend event. `pitch` is centred on zero, in `[-8192, 8191]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PitchBend {
    pub pitch: i16,
    pub time: f64,
}

impl PitchBend {
    pub fn new(pitch: i16, time: f64) -> Result<Self> {
        if !(-8192..=8191).contains(&pitch) {
            return Err(CodecError::InvalidValue(format!(
                "{} is not a valid `pitch` value",
                pitch
            )));
        }
        Ok(Self {
            pitch,
            time: check_finite("time", time)?,
        })
    }
}
