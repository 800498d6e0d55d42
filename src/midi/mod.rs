//! MIDI codec: Standard MIDI Files to absolute-time notes and back.
//!
//! Decoding turns a tick-based, multi-track event stream into a [`Score`]
//! of instruments with notes in seconds. Encoding quantizes a score back
//! into ticks. [`MidiFile`] and [`Piece`] expose the first instrument as a
//! note table with sustain pedal handling and provenance.

mod error;
mod event;
mod file;
mod instrument;
mod meta;
mod midi_export;
mod midi_import;
mod note;
mod piece;
mod score;
mod sustain;
mod timing;

pub use error::{CodecError, Result};
pub use event::{sort_track, Event, TimedEvent};
pub use file::{decode_many, LoadOptions, MidiFile, FILE_SUSTAIN_THRESHOLD};
pub use instrument::{Instrument, DRUM_CHANNEL};
pub use meta::{
    key_name_to_key_number, key_number_to_key_name, KeySignature, Lyric, Text, TimeSignature,
};
pub use midi_export::{encode, encode_tracks, export_to_midi, write_smf};
pub use midi_import::{decode, decode_tracks, import_from_midi, tracks_from_smf};
pub use note::{ControlChange, Note, PitchBend, SUSTAIN_CONTROLLER};
pub use piece::{NoteColumns, Piece, SliceType, Source};
pub use score::Score;
pub use sustain::{apply_sustain, sustain_intervals, DEFAULT_SUSTAIN_THRESHOLD};
pub use timing::{TickMapper, TickScale, DEFAULT_TEMPO_BPM, MAX_TICK};

/// Ticks per quarter note for scores built in memory.
pub const DEFAULT_RESOLUTION: u16 = 220;

/// Standard MIDI note names for display purposes.
/// Maps MIDI note number (0-127) to note name within an octave.
pub const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Converts a MIDI note number to a human-readable note name with octave.
///
/// # Arguments
///
/// * `note_number` - MIDI note number (0-127)
///
/// # Examples
///
/// ```
/// use midiframe::midi::note_number_to_name;
///
/// assert_eq!(note_number_to_name(60), "C4"); // Middle C
/// assert_eq!(note_number_to_name(61), "C#4");
/// ```
pub fn note_number_to_name(note_number: u8) -> String {
    let octave = (note_number / 12) as i8 - 1; // MIDI octave convention
    let note_index = (note_number % 12) as usize;
    format!("{}{}", NOTE_NAMES[note_index], octave)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_note_number_to_name() {
        assert_eq!(note_number_to_name(60), "C4");
        assert_eq!(note_number_to_name(69), "A4");
        assert_eq!(note_number_to_name(0), "C-1");
        assert_eq!(note_number_to_name(127), "G9");
    }
}
