//! Piano-performance view of a decoded MIDI file.
//!
//! [`MidiFile`] wraps a [`Score`] and exposes the first instrument as a note
//! table, with the sustain pedal applied by default. It is the usual entry
//! point for turning recorded performances into [`Piece`]s.

use super::error::Result;
use super::instrument::Instrument;
use super::note::{ControlChange, Note};
use super::piece::{Piece, Source};
use super::score::Score;
use super::sustain::apply_sustain;
use super::timing::DEFAULT_TEMPO_BPM;
use super::DEFAULT_RESOLUTION;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::ops::Range;
use std::path::{Path, PathBuf};

/// Sustain threshold used when loading files.
pub const FILE_SUSTAIN_THRESHOLD: u8 = 62;

/// Controls how a [`MidiFile`] builds its note table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadOptions {
    /// Extend note ends with the sustain pedal.
    pub apply_sustain: bool,

    /// Pedal values at or above this count as pressed.
    pub sustain_threshold: u8,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            apply_sustain: true,
            sustain_threshold: FILE_SUSTAIN_THRESHOLD,
        }
    }
}

/// A decoded file plus its first-instrument note tables.
#[derive(Debug, Clone)]
pub struct MidiFile {
    path: Option<PathBuf>,
    score: Score,
    options: LoadOptions,
    /// Instrument 0 notes ordered by start.
    raw_notes: Vec<Note>,
    control_changes: Vec<ControlChange>,
    sustain: Vec<ControlChange>,
    /// `raw_notes` with the sustain pedal applied, if enabled.
    notes: Vec<Note>,
}

impl MidiFile {
    /// Decodes Standard MIDI File bytes.
    ///
    /// # Arguments
    ///
    /// * `bytes` - File contents
    /// * `path` - Where the bytes came from, recorded in piece provenance
    /// * `options` - Sustain handling
    pub fn from_bytes(bytes: &[u8], path: Option<&Path>, options: LoadOptions) -> Result<Self> {
        let score = Score::from_bytes(bytes)?;
        Ok(Self::from_score(score, path.map(Path::to_path_buf), options))
    }

    /// Reads and decodes a Standard MIDI File.
    pub fn from_path<P: AsRef<Path>>(path: P, options: LoadOptions) -> Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path)?;
        Self::from_bytes(&bytes, Some(path), options)
    }

    /// Wraps an already decoded or programmatically built score.
    pub fn from_score(score: Score, path: Option<PathBuf>, options: LoadOptions) -> Self {
        let (mut raw_notes, control_changes) = match score.instruments.first() {
            Some(instrument) => (instrument.notes.clone(), instrument.control_changes.clone()),
            None => (Vec::new(), Vec::new()),
        };
        raw_notes.sort_by(|a, b| a.start.total_cmp(&b.start));

        let sustain: Vec<ControlChange> = control_changes
            .iter()
            .filter(|c| c.is_sustain())
            .copied()
            .collect();

        let notes = if options.apply_sustain {
            apply_sustain(&raw_notes, &sustain, options.sustain_threshold)
        } else {
            raw_notes.clone()
        };

        Self {
            path,
            score,
            options,
            raw_notes,
            control_changes,
            sustain,
            notes,
        }
    }

    pub fn score(&self) -> &Score {
        &self.score
    }

    /// Note table, with the sustain pedal applied when enabled.
    pub fn notes(&self) -> &[Note] {
        &self.notes
    }

    /// Note table of the first instrument as decoded, ordered by start.
    pub fn raw_notes(&self) -> &[Note] {
        &self.raw_notes
    }

    /// Control changes of the first instrument.
    pub fn control_changes(&self) -> &[ControlChange] {
        &self.control_changes
    }

    /// Sustain pedal events of the first instrument.
    pub fn sustain(&self) -> &[ControlChange] {
        &self.sustain
    }

    /// Time of the last event in seconds.
    pub fn duration(&self) -> f64 {
        self.score.end_time()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn options(&self) -> LoadOptions {
        self.options
    }

    /// The note table and pedal events as a [`Piece`] whose source points
    /// back at this file.
    pub fn piece(&self) -> Piece {
        let mut source = Source::new();
        source.insert("type".to_string(), Value::from("MidiFile"));
        let path = match &self.path {
            Some(path) => Value::from(path.to_string_lossy().into_owned()),
            None => Value::Null,
        };
        source.insert("path".to_string(), path);
        Piece::new(self.notes.clone(), source).with_sustain(self.sustain.clone())
    }

    /// A time-shifted slice of the note table by index.
    pub fn slice(&self, range: Range<usize>) -> Result<Piece> {
        self.piece().slice(range, true)
    }

    /// Concatenates files into one single-instrument file.
    ///
    /// Each file's raw notes and control changes are placed after the
    /// previous file's duration plus `space` seconds. The merged file keeps
    /// the default load options, so the pedal is applied to the result.
    pub fn merge(files: &[MidiFile], space: f64) -> MidiFile {
        let mut instrument = Instrument::default();
        let mut offset = 0.0;

        for file in files {
            instrument
                .notes
                .extend(file.raw_notes.iter().map(|n| n.shifted(offset)));
            instrument
                .control_changes
                .extend(file.control_changes.iter().map(|c| c.shifted(offset)));
            offset += file.duration() + space;
        }

        tracing::debug!(
            files = files.len(),
            notes = instrument.notes.len(),
            "merged MIDI files"
        );

        let mut score = Score::new(DEFAULT_RESOLUTION, DEFAULT_TEMPO_BPM);
        score.add_instrument(instrument);
        MidiFile::from_score(score, None, LoadOptions::default())
    }

    /// Encodes the underlying score.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        self.score.to_bytes()
    }

    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.score.write(path)
    }
}

/// Decodes many files in parallel, one result per path in input order.
///
/// Each decode is independent; one failing file does not affect the others.
pub fn decode_many<P>(paths: &[P], options: LoadOptions) -> Vec<Result<MidiFile>>
where
    P: AsRef<Path> + Sync,
{
    paths
        .par_iter()
        .map(|path| {
            let result = MidiFile::from_path(path, options);
            if let Err(e) = &result {
                tracing::warn!(
                    path = %path.as_ref().display(),
                    error = %e,
                    "failed to decode MIDI file"
                );
            }
            result
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::error::CodecError;

    fn performance(notes: &[(u8, f64, f64)], pedal: &[(u8, f64)]) -> Score {
        let mut score = Score::new(480, 120.0);
        let mut piano = Instrument::new(0, false, "piano").unwrap();
        for &(pitch, start, end) in notes {
            piano.notes.push(Note::new(pitch, 70, start, end).unwrap());
        }
        for &(value, time) in pedal {
            piano.control_changes.push(ControlChange::new(64, value, time).unwrap());
        }
        piano.control_changes.push(ControlChange::new(7, 100, 0.0).unwrap());
        score.add_instrument(piano);
        score
    }

    #[test]
    fn test_default_options() {
        let options = LoadOptions::default();
        assert!(options.apply_sustain);
        assert_eq!(options.sustain_threshold, 62);

        let parsed: LoadOptions = serde_json::from_str(r#"{"apply_sustain": false}"#).unwrap();
        assert!(!parsed.apply_sustain);
        assert_eq!(parsed.sustain_threshold, 62);
    }

    #[test]
    fn test_tables() {
        let score = performance(
            &[(64, 2.0, 3.0), (60, 0.0, 1.0), (60, 2.5, 3.5)],
            &[(100, 0.5), (0, 2.5)],
        );
        let file = MidiFile::from_score(score, None, LoadOptions::default());

        let starts: Vec<f64> = file.raw_notes().iter().map(|n| n.start).collect();
        assert_eq!(starts, vec![0.0, 2.0, 2.5]);
        assert_eq!(file.control_changes().len(), 3);
        assert_eq!(file.sustain().len(), 2);

        // Held by the pedal up to the re-strike at 2.5
        assert_eq!(file.notes()[0].end, 2.5);
        assert_eq!(file.raw_notes()[0].end, 1.0);
        assert_eq!(file.duration(), 3.5);
    }

    #[test]
    fn test_sustain_disabled() {
        let score = performance(&[(60, 0.0, 1.0)], &[(100, 0.5), (0, 2.5)]);
        let options = LoadOptions {
            apply_sustain: false,
            ..Default::default()
        };
        let file = MidiFile::from_score(score, None, options);
        assert_eq!(file.notes(), file.raw_notes());
    }

    #[test]
    fn test_piece_source() {
        let score = performance(&[(60, 0.5, 1.0), (62, 1.0, 2.0)], &[]);
        let bytes = score.to_bytes().unwrap();
        let file =
            MidiFile::from_bytes(&bytes, Some(Path::new("song.mid")), LoadOptions::default())
                .unwrap();

        let piece = file.piece();
        assert_eq!(piece.source()["type"], "MidiFile");
        assert_eq!(piece.source()["path"], "song.mid");
        assert_eq!(piece.size(), 2);

        let part = file.slice(1..2).unwrap();
        assert_eq!(part.notes()[0].start, 0.0);
        assert_eq!(part.source()["start"], 1);
        assert_eq!(part.source()["path"], "song.mid");
    }

    #[test]
    fn test_piece_keeps_pedal() {
        let score = performance(
            &[(60, 0.0, 1.0), (62, 2.0, 3.0), (64, 4.0, 5.0)],
            &[(100, 0.5), (0, 1.5), (100, 2.5), (0, 3.1), (100, 4.5)],
        );
        let file = MidiFile::from_score(score, None, LoadOptions::default());
        assert_eq!(file.piece().sustain(), file.sustain());

        // Second note sounds from 2.0 to 3.0; the release at 3.1 rings out
        let part = file.slice(1..2).unwrap();
        let times: Vec<f64> = part.sustain().iter().map(|c| c.time).collect();
        assert_eq!(times.len(), 2);
        assert!((times[0] - 0.5).abs() < 1e-9);
        assert!((times[1] - 1.1).abs() < 1e-9);
        assert_eq!(part.to_midi("piano").sustain().len(), 2);
    }

    #[test]
    fn test_merge_conserves_notes_and_duration() {
        let a = MidiFile::from_score(
            performance(&[(60, 0.0, 1.0), (62, 1.0, 2.0)], &[]),
            None,
            LoadOptions::default(),
        );
        let b = MidiFile::from_score(
            performance(&[(70, 0.0, 0.5), (72, 0.5, 3.0), (74, 1.0, 1.5)], &[]),
            None,
            LoadOptions::default(),
        );

        let merged = MidiFile::merge(&[a.clone(), b.clone()], 0.0);
        assert_eq!(merged.raw_notes().len(), a.raw_notes().len() + b.raw_notes().len());
        assert_eq!(merged.duration(), a.duration() + b.duration());
        assert_eq!(merged.raw_notes()[2].start, 2.0);

        let spaced = MidiFile::merge(&[a.clone(), b.clone()], 5.0);
        assert_eq!(spaced.raw_notes()[2].start, 7.0);
        assert_eq!(spaced.control_changes().len(), 2);
    }

    #[test]
    fn test_decode_many() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.mid");
        let bad = dir.path().join("bad.mid");
        performance(&[(60, 0.0, 1.0)], &[]).write(&good).unwrap();
        fs::write(&bad, b"not a midi file").unwrap();

        let paths = [good.clone(), bad, dir.path().join("missing.mid")];
        let results = decode_many(&paths, LoadOptions::default());
        assert_eq!(results.len(), 3);
        let file = results[0].as_ref().unwrap();
        assert_eq!(file.path(), Some(good.as_path()));
        assert_eq!(file.raw_notes().len(), 1);
        assert!(matches!(results[1], Err(CodecError::Parse(_))));
        assert!(matches!(results[2], Err(CodecError::Io(_))));
    }
}
