//! Flattened single-instrument note tables with provenance.
//!
//! A [`Piece`] is what downstream consumers (rendering, datasets, audio) read:
//! one list of notes in absolute time, the sustain pedal events that go with
//! them, and a free-form `source` map that records where the notes came from. Every transform returns a new piece;
//! the receiver is never modified.

use super::error::{CodecError, Result};
use super::file::{LoadOptions, MidiFile};
use super::instrument::Instrument;
use super::note::{ControlChange, Note};
use super::score::Score;
use super::DEFAULT_RESOLUTION;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::ops::{Add, Range};
use std::path::Path;
use std::str::FromStr;

/// Provenance record: origin path, slice offsets, start time, metadata.
pub type Source = BTreeMap<String, Value>;

/// Tempo used when a piece is turned back into a MIDI file.
const PIECE_TEMPO_BPM: f64 = 120.0;

/// Pedal events this long after the last note end still belong to a slice.
const SUSTAIN_TAIL: f64 = 0.2;

/// How [`Piece::trim`] selects notes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SliceType {
    /// Notes whose start lies in `[start, finish]`.
    #[default]
    Standard,
    /// Notes that start at or after `start` and end at or before `finish`.
    ByEnd,
    /// Notes with index in `[start, finish]`; bounds must be whole numbers.
    Index,
}

impl FromStr for SliceType {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "standard" => Ok(SliceType::Standard),
            "by_end" => Ok(SliceType::ByEnd),
            "index" => Ok(SliceType::Index),
            other => Err(CodecError::UnsupportedSliceType(other.to_string())),
        }
    }
}

impl fmt::Display for SliceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SliceType::Standard => "standard",
            SliceType::ByEnd => "by_end",
            SliceType::Index => "index",
        };
        f.write_str(name)
    }
}

/// Column-oriented note data, as read from or written to tabular storage.
///
/// `pitch` and `velocity` are required. At least two of `start`, `end` and
/// `duration` must be present; the third is derived.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NoteColumns {
    pub pitch: Option<Vec<u8>>,
    pub velocity: Option<Vec<u8>>,
    pub start: Option<Vec<f64>>,
    pub end: Option<Vec<f64>>,
    pub duration: Option<Vec<f64>>,
}

impl NoteColumns {
    /// Converts the columns to notes, deriving the missing timing column.
    pub fn into_notes(self) -> Result<Vec<Note>> {
        let pitch = self
            .pitch
            .ok_or_else(|| CodecError::Usage("the `pitch` column is required".to_string()))?;
        let velocity = self
            .velocity
            .ok_or_else(|| CodecError::Usage("the `velocity` column is required".to_string()))?;

        let (start, end) = match (self.start, self.end, self.duration) {
            (Some(start), Some(end), _) => (start, end),
            (Some(start), None, Some(duration)) => {
                check_length("duration", duration.len(), start.len())?;
                let end = start.iter().zip(&duration).map(|(s, d)| s + d).collect();
                (start, end)
            }
            (None, Some(end), Some(duration)) => {
                check_length("duration", duration.len(), end.len())?;
                let start = end.iter().zip(&duration).map(|(e, d)| e - d).collect();
                (start, end)
            }
            _ => {
                return Err(CodecError::Usage(
                    "at least two of `start`, `end` and `duration` are required".to_string(),
                ))
            }
        };

        let rows = pitch.len();
        check_length("velocity", velocity.len(), rows)?;
        check_length("start", start.len(), rows)?;
        check_length("end", end.len(), rows)?;

        (0..rows)
            .map(|i| Note::new(pitch[i], velocity[i], start[i], end[i]))
            .collect()
    }
}

fn check_length(column: &str, len: usize, expected: usize) -> Result<()> {
    if len != expected {
        return Err(CodecError::Usage(format!(
            "column `{}` has {} rows, expected {}",
            column, len, expected
        )));
    }
    Ok(())
}

/// A single-instrument note table with provenance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Piece {
    notes: Vec<Note>,
    /// Sustain pedal events, in the same time frame as `notes`.
    #[serde(default)]
    sustain: Vec<ControlChange>,
    #[serde(default)]
    source: Source,
}

impl Piece {
    pub fn new(notes: Vec<Note>, source: Source) -> Self {
        Self {
            notes,
            sustain: Vec::new(),
            source,
        }
    }

    /// Attaches sustain pedal events to the piece.
    pub fn with_sustain(mut self, sustain: Vec<ControlChange>) -> Self {
        self.sustain = sustain;
        self
    }

    /// Builds a piece from column data.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Usage`] if `pitch` or `velocity` is missing,
    /// fewer than two timing columns are given, or columns differ in length.
    pub fn from_columns(columns: NoteColumns, source: Source) -> Result<Self> {
        Ok(Self::new(columns.into_notes()?, source))
    }

    /// The note table as columns, with every timing column filled.
    pub fn to_columns(&self) -> NoteColumns {
        NoteColumns {
            pitch: Some(self.notes.iter().map(|n| n.pitch).collect()),
            velocity: Some(self.notes.iter().map(|n| n.velocity).collect()),
            start: Some(self.notes.iter().map(|n| n.start).collect()),
            end: Some(self.notes.iter().map(|n| n.end).collect()),
            duration: Some(self.notes.iter().map(Note::duration).collect()),
        }
    }

    pub fn notes(&self) -> &[Note] {
        &self.notes
    }

    pub fn sustain(&self) -> &[ControlChange] {
        &self.sustain
    }

    pub fn source(&self) -> &Source {
        &self.source
    }

    /// Number of notes.
    pub fn size(&self) -> usize {
        self.notes.len()
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    /// Time from the first note start to the last note end, 0.0 when empty.
    pub fn duration(&self) -> f64 {
        if self.notes.is_empty() {
            return 0.0;
        }
        self.end() - self.first_start()
    }

    /// Latest note end, 0.0 when empty.
    pub fn end(&self) -> f64 {
        self.notes.iter().map(|n| n.end).fold(0.0, f64::max)
    }

    fn first_start(&self) -> f64 {
        self.notes
            .iter()
            .map(|n| n.start)
            .fold(f64::INFINITY, f64::min)
    }

    /// Selects notes `range.start..range.end` by index.
    ///
    /// Pedal events from the first selected start to 0.2 s past the last
    /// selected end are kept. The source always accumulates the index offsets
    /// as `start` and `finish`. With `shift_time` the result is moved so its
    /// first note starts at 0, and `start_time` accumulates the removed time.
    ///
    /// # Errors
    ///
    /// [`CodecError::Usage`] if the range is reversed, [`CodecError::IndexRange`]
    /// if it is empty or reaches past the last note.
    pub fn slice(&self, range: Range<usize>, shift_time: bool) -> Result<Piece> {
        if range.start > range.end {
            return Err(CodecError::Usage(format!(
                "slice start {} is after its end {}",
                range.start, range.end
            )));
        }
        if range.end > self.notes.len() {
            return Err(CodecError::IndexRange(format!(
                "slice end {} is past the last note ({} notes)",
                range.end,
                self.notes.len()
            )));
        }
        if range.is_empty() {
            return Err(CodecError::IndexRange(format!(
                "slice {}..{} selects no notes",
                range.start, range.end
            )));
        }

        let notes = self.notes[range.clone()].to_vec();
        let mut part = Piece::new(notes, self.source.clone());
        let first_sound = part.first_start();
        let last_sound = part.end() + SUSTAIN_TAIL;
        part.sustain = self
            .sustain
            .iter()
            .filter(|c| c.time >= first_sound && c.time <= last_sound)
            .copied()
            .collect();

        let start = source_index(&self.source, "start") + range.start as u64;
        let finish = source_index(&self.source, "finish") + range.end as u64;
        part.source.insert("start".to_string(), Value::from(start));
        part.source.insert("finish".to_string(), Value::from(finish));
        if !shift_time {
            return Ok(part);
        }

        let start_time = source_time(&self.source, "start_time") + first_sound;
        part.source
            .insert("start_time".to_string(), Value::from(start_time));
        Ok(part.time_shift(-first_sound))
    }

    /// Selects a section of the piece by time or by index.
    ///
    /// # Errors
    ///
    /// - [`CodecError::Usage`] if `start > finish`, or for [`SliceType::Index`]
    ///   when a bound is negative or not a whole number
    /// - [`CodecError::IndexRange`] if nothing is selected
    ///
    /// # Examples
    ///
    /// ```
    /// use midiframe::midi::{Note, Piece, SliceType};
    ///
    /// let notes = (0..5)
    ///     .map(|i| Note::new(60 + i as u8, 80, i as f64, i as f64 + 1.0).unwrap())
    ///     .collect();
    /// let piece = Piece::new(notes, Default::default());
    ///
    /// let part = piece.trim(2.0, 3.0, true, SliceType::Standard).unwrap();
    /// assert_eq!(part.size(), 2);
    /// assert_eq!(part.notes()[0].start, 0.0);
    /// ```
    pub fn trim(
        &self,
        start: f64,
        finish: f64,
        shift_time: bool,
        slice_type: SliceType,
    ) -> Result<Piece> {
        if start > finish {
            return Err(CodecError::Usage(format!(
                "trim start {} is after its finish {}",
                start, finish
            )));
        }

        let range = match slice_type {
            SliceType::Index => {
                if start < 0.0 || start.fract() != 0.0 || finish.fract() != 0.0 {
                    return Err(CodecError::Usage(format!(
                        "index trim needs whole-number bounds, got {} and {}",
                        start, finish
                    )));
                }
                let (first, last) = (start as usize, finish as usize);
                if last >= self.notes.len() {
                    return Err(CodecError::IndexRange(format!(
                        "index {} is past the last note ({} notes)",
                        last,
                        self.notes.len()
                    )));
                }
                first..last + 1
            }
            SliceType::Standard => {
                self.matching_range(|n| n.start >= start && n.start <= finish, start, finish)?
            }
            SliceType::ByEnd => {
                self.matching_range(|n| n.start >= start && n.end <= finish, start, finish)?
            }
        };

        tracing::trace!(%slice_type, start, finish, notes = range.len(), "trim");
        self.slice(range, shift_time)
    }

    /// Index range from the first to the last note matching `predicate`.
    fn matching_range<F>(&self, predicate: F, start: f64, finish: f64) -> Result<Range<usize>>
    where
        F: Fn(&Note) -> bool,
    {
        let first = self.notes.iter().position(&predicate);
        let last = self.notes.iter().rposition(&predicate);
        match (first, last) {
            (Some(first), Some(last)) => Ok(first..last + 1),
            _ => Err(CodecError::IndexRange(format!(
                "no notes between {} and {} seconds",
                start, finish
            ))),
        }
    }

    /// Returns a copy with every note and pedal event moved by `seconds`.
    pub fn time_shift(&self, seconds: f64) -> Piece {
        Piece {
            notes: self.notes.iter().map(|n| n.shifted(seconds)).collect(),
            sustain: self.sustain.iter().map(|c| c.shifted(seconds)).collect(),
            source: self.source.clone(),
        }
    }

    /// Appends `other` after the end of this piece.
    ///
    /// `other` is shifted by [`Piece::end`]; neither input is modified.
    pub fn concat(&self, other: &Piece) -> Piece {
        let shifted = other.time_shift(self.end());
        let mut notes = self.notes.clone();
        notes.extend(shifted.notes);
        let mut sustain = self.sustain.clone();
        sustain.extend(shifted.sustain);

        let mut source = Source::new();
        source.insert("type".to_string(), Value::from("concatenation"));
        source.insert(
            "parts".to_string(),
            Value::Array(vec![
                Value::Object(self.source.clone().into_iter().collect()),
                Value::Object(other.source.clone().into_iter().collect()),
            ]),
        );
        Piece {
            notes,
            sustain,
            source,
        }
    }

    /// Builds a single-instrument MIDI file from the notes and pedal events.
    ///
    /// The instrument uses program 0 and is written at 220 ticks per beat
    /// and 120 BPM.
    pub fn to_midi(&self, instrument_name: &str) -> MidiFile {
        let mut score = Score::new(DEFAULT_RESOLUTION, PIECE_TEMPO_BPM);
        let instrument = Instrument {
            name: instrument_name.to_string(),
            notes: self.notes.clone(),
            control_changes: self.sustain.clone(),
            ..Default::default()
        };
        score.add_instrument(instrument);
        MidiFile::from_score(score, None, LoadOptions::default())
    }

    /// Serializes the piece to pretty-printed JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Saves the piece to a JSON file.
    ///
    /// # Errors
    ///
    /// Returns error if serialization or file writing fails
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path, self.to_json()?)?;
        Ok(())
    }

    /// Loads a piece from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns error if file reading or parsing fails
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        Self::from_json(&json)
    }
}

impl Add for &Piece {
    type Output = Piece;

    fn add(self, other: &Piece) -> Piece {
        self.concat(other)
    }
}

fn source_index(source: &Source, key: &str) -> u64 {
    source.get(key).and_then(Value::as_u64).unwrap_or(0)
}

fn source_time(source: &Source, key: &str) -> f64 {
    source.get(key).and_then(Value::as_f64).unwrap_or(0.0)
}
