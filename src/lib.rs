//! midiframe - Standard MIDI File codec.
//!
//! Decodes MIDI files into absolute-time notes, applies the sustain pedal,
//! exposes flattened note tables with provenance and encodes scores back to
//! MIDI.

pub mod midi;

// Re-export commonly used types
pub use midi::{
    apply_sustain, decode, encode, CodecError, Instrument, LoadOptions, MidiFile, Note, Piece,
    Score, SliceType,
};
