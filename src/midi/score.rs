//! Decoded MIDI score container.
//!
//! A score holds the tempo map, the instruments and the file-wide meta events
//! (key and time signatures, lyrics and text). It is what the decoder
//! produces and what the encoder consumes.

use super::error::Result;
use super::instrument::Instrument;
use super::meta::{KeySignature, Lyric, Text, TimeSignature};
use super::timing::{TickMapper, TickScale, DEFAULT_TEMPO_BPM};
use super::{midi_export, midi_import, DEFAULT_RESOLUTION};
use std::path::Path;

/// A complete MIDI composition with its own tempo map.
///
/// Each score owns its tick-to-time table, so scores never share timing
/// state.
#[derive(Debug, Clone, PartialEq)]
pub struct Score {
    mapper: TickMapper,

    /// Instruments in order of first appearance.
    pub instruments: Vec<Instrument>,

    pub key_signatures: Vec<KeySignature>,

    pub time_signatures: Vec<TimeSignature>,

    /// Lyrics from every track, ordered by time.
    pub lyrics: Vec<Lyric>,

    /// Text events from every track, ordered by time.
    pub text_events: Vec<Text>,
}

impl Score {
    /// Creates an empty score with a single tempo.
    ///
    /// # Arguments
    ///
    /// * `resolution` - Ticks per quarter note
    /// * `initial_tempo` - Tempo in beats per minute
    pub fn new(resolution: u16, initial_tempo: f64) -> Self {
        Self::from_parts(
            TickMapper::new(resolution, initial_tempo),
            Vec::new(),
            Vec::new(),
            Vec::new(),
            Vec::new(),
            Vec::new(),
        )
    }

    pub(crate) fn from_parts(
        mapper: TickMapper,
        instruments: Vec<Instrument>,
        key_signatures: Vec<KeySignature>,
        time_signatures: Vec<TimeSignature>,
        lyrics: Vec<Lyric>,
        text_events: Vec<Text>,
    ) -> Self {
        Self {
            mapper,
            instruments,
            key_signatures,
            time_signatures,
            lyrics,
            text_events,
        }
    }

    /// Decodes a score from Standard MIDI File bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        midi_import::decode(bytes)
    }

    /// Reads and decodes a Standard MIDI File.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        midi_import::import_from_midi(path)
    }

    /// Encodes the score as Standard MIDI File bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        midi_export::encode(self)
    }

    /// Encodes the score and writes it to `path`.
    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        midi_export::export_to_midi(self, path)
    }

    /// Ticks per quarter note.
    pub fn resolution(&self) -> u16 {
        self.mapper.resolution()
    }

    pub fn mapper(&self) -> &TickMapper {
        &self.mapper
    }

    /// The tempo map as `(tick, seconds per tick)` scales.
    pub fn tick_scales(&self) -> &[TickScale] {
        self.mapper.scales()
    }

    /// Converts a tick to seconds, extending the table when needed.
    pub fn tick_to_time(&mut self, tick: u64) -> Result<f64> {
        self.mapper.tick_to_time(tick)
    }

    /// Converts seconds to the nearest tick.
    pub fn time_to_tick(&self, time: f64) -> u64 {
        self.mapper.time_to_tick(time)
    }

    /// Times (seconds) and tempi (BPM) of every tempo change.
    pub fn tempo_changes(&self) -> (Vec<f64>, Vec<f64>) {
        self.mapper.tempo_changes()
    }

    /// Replaces the tempo from `tick` onwards.
    pub fn set_tempo_from(&mut self, tick: u64, bpm: f64) -> Result<()> {
        self.mapper.set_tempo_from(tick, bpm)
    }

    /// Time of the last event in seconds, 0.0 for an empty score.
    ///
    /// Covers note ends, control changes, meta events and tempo changes.
    pub fn end_time(&self) -> f64 {
        let (tempo_times, _) = self.tempo_changes();
        let instrument_end = self
            .instruments
            .iter()
            .map(Instrument::end_time)
            .fold(0.0, f64::max);

        let meta_times = self
            .key_signatures
            .iter()
            .map(|ks| ks.time)
            .chain(self.time_signatures.iter().map(|ts| ts.time))
            .chain(self.lyrics.iter().map(|l| l.time))
            .chain(self.text_events.iter().map(|t| t.time))
            .chain(tempo_times);

        meta_times.fold(instrument_end, f64::max)
    }

    /// Adds an instrument and returns its index.
    pub fn add_instrument(&mut self, instrument: Instrument) -> usize {
        self.instruments.push(instrument);
        self.instruments.len() - 1
    }

    /// Total number of notes across every instrument.
    pub fn note_count(&self) -> usize {
        self.instruments.iter().map(Instrument::note_count).sum()
    }
}

impl Default for Score {
    fn default() -> Self {
        Self::new(DEFAULT_RESOLUTION, DEFAULT_TEMPO_BPM)
    }
}
