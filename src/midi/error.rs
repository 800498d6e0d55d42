//! Error taxonomy for the codec.
//!
//! Every fallible operation in [`crate::midi`] returns [`CodecError`]. There is
//! no recovery inside the codec: callers that process batches decide whether
//! to skip a failing file.

use thiserror::Error;

/// Errors that can occur while decoding, encoding or slicing MIDI data.
#[derive(Debug, Error)]
pub enum CodecError {
    /// A tick beyond the sanity ceiling was found; the file is almost
    /// certainly corrupt and building a tick table would exhaust memory.
    #[error("MIDI file has a largest tick of {max_tick}, it is likely corrupt")]
    Corrupt { max_tick: u64 },

    /// A note whose end precedes its start.
    #[error("note end time ({end}) must not be before its start time ({start})")]
    InvalidNote { start: f64, end: f64 },

    /// A value outside the range accepted by a constructor.
    #[error("invalid value: {0}")]
    InvalidValue(String),

    /// The caller asked for something that cannot be done with these arguments.
    #[error("usage error: {0}")]
    Usage(String),

    /// A slice or trim selected nothing, or reached past the end of the table.
    #[error("index out of range: {0}")]
    IndexRange(String),

    /// `trim` was given a slice type it does not know.
    #[error("slice type '{0}' is not implemented")]
    UnsupportedSliceType(String),

    /// The byte stream is not a Standard MIDI File.
    #[error("MIDI parse error: {0}")]
    Parse(String),

    /// SMPTE timecode division; only metrical timing is supported.
    #[error("SMPTE timecode timing is not supported")]
    UnsupportedTiming,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result alias used throughout the codec.
pub type Result<T> = std::result::Result<T, CodecError>;
