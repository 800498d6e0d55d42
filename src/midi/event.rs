//! Tagged track events with absolute tick positions.
//!
//! The decoder consumes and the encoder produces tracks as lists of
//! [`TimedEvent`]. Conversion to and from midly's borrowed event kinds
//! happens here so the rest of the codec never touches raw bytes.

use super::meta::denominator_power;
use midly::num::{u14, u24, u4, u7};
use midly::{MetaMessage, MidiMessage, TrackEventKind};

/// MIDI clocks per metronome click written in time signatures.
const CLOCKS_PER_CLICK: u8 = 24;
/// 32nd notes per quarter note written in time signatures.
const THIRTY_SECONDS_PER_QUARTER: u8 = 8;

/// The closed set of events the codec understands.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    TrackName(String),
    /// Set tempo in microseconds per quarter note.
    Tempo { micros_per_quarter: u32 },
    /// Time signature with the denominator as a plain number (4, 8, ...).
    TimeSignature { numerator: u8, denominator: u8 },
    /// Key signature as sharps (positive) or flats (negative) plus mode.
    KeySignature { accidentals: i8, minor: bool },
    Lyric(String),
    Text(String),
    ProgramChange { channel: u8, program: u8 },
    /// Pitch bend centred on zero, in `[-8192, 8191]`.
    PitchBend { channel: u8, bend: i16 },
    ControlChange { channel: u8, number: u8, value: u8 },
    NoteOff { channel: u8, pitch: u8, velocity: u8 },
    NoteOn { channel: u8, pitch: u8, velocity: u8 },
    EndOfTrack,
}

impl Event {
    /// Ordering key for events that share a tick.
    ///
    /// The type priority occupies the high bits; pitch bends, control changes
    /// and notes add a secondary key so that a note-off (or a note-on with
    /// velocity 0) always sorts before a note-on of the same pitch.
    pub fn sort_key(&self) -> i64 {
        const STEP: i64 = 256 * 256;
        match self {
            Event::TrackName(_) => 0,
            Event::Tempo { .. } => STEP,
            Event::TimeSignature { .. } => 2 * STEP,
            Event::KeySignature { .. } => 3 * STEP,
            Event::Lyric(_) => 4 * STEP,
            Event::Text(_) => 5 * STEP,
            Event::ProgramChange { .. } => 6 * STEP,
            Event::PitchBend { bend, .. } => 7 * STEP + *bend as i64,
            Event::ControlChange { number, value, .. } => {
                8 * STEP + *number as i64 * 256 + *value as i64
            }
            Event::NoteOff { pitch, .. } => 9 * STEP + *pitch as i64 * 256,
            Event::NoteOn {
                pitch, velocity, ..
            } => 10 * STEP + *pitch as i64 * 256 + *velocity as i64,
            Event::EndOfTrack => 11 * STEP,
        }
    }

    /// Whether this is a tempo, key or time signature event, which only
    /// belong on the first track.
    pub fn is_timing_meta(&self) -> bool {
        matches!(
            self,
            Event::Tempo { .. } | Event::TimeSignature { .. } | Event::KeySignature { .. }
        )
    }

    /// Converts a midly event. Events outside the codec's set return `None`.
    pub fn from_midly(kind: &TrackEventKind<'_>) -> Option<Event> {
        match kind {
            TrackEventKind::Midi { channel, message } => {
                let channel = channel.as_int();
                match *message {
                    MidiMessage::NoteOn { key, vel } => Some(Event::NoteOn {
                        channel,
                        pitch: key.as_int(),
                        velocity: vel.as_int(),
                    }),
                    MidiMessage::NoteOff { key, vel } => Some(Event::NoteOff {
                        channel,
                        pitch: key.as_int(),
                        velocity: vel.as_int(),
                    }),
                    MidiMessage::Controller { controller, value } => Some(Event::ControlChange {
                        channel,
                        number: controller.as_int(),
                        value: value.as_int(),
                    }),
                    MidiMessage::ProgramChange { program } => Some(Event::ProgramChange {
                        channel,
                        program: program.as_int(),
                    }),
                    MidiMessage::PitchBend { bend } => Some(Event::PitchBend {
                        channel,
                        bend: bend.0.as_int() as i16 - 8192,
                    }),
                    _ => None,
                }
            }
            TrackEventKind::Meta(meta) => match *meta {
                MetaMessage::TrackName(bytes) => Some(Event::TrackName(decode_text(bytes))),
                MetaMessage::Tempo(tempo) => Some(Event::Tempo {
                    micros_per_quarter: tempo.as_int(),
                }),
                MetaMessage::TimeSignature(numerator, power, _, _) => {
                    let denominator = 1u8.checked_shl(power as u32)?;
                    Some(Event::TimeSignature {
                        numerator,
                        denominator,
                    })
                }
                MetaMessage::KeySignature(accidentals, minor) => Some(Event::KeySignature {
                    accidentals,
                    minor,
                }),
                MetaMessage::Lyric(bytes) => Some(Event::Lyric(decode_text(bytes))),
                MetaMessage::Text(bytes) => Some(Event::Text(decode_text(bytes))),
                MetaMessage::EndOfTrack => Some(Event::EndOfTrack),
                _ => None,
            },
            _ => None,
        }
    }

    /// Converts to a midly event kind borrowing this event's text.
    pub fn to_midly(&self) -> TrackEventKind<'_> {
        let midi = |channel: u8, message: MidiMessage| TrackEventKind::Midi {
            channel: u4::new(channel.min(15)),
            message,
        };
        match self {
            Event::TrackName(name) => TrackEventKind::Meta(MetaMessage::TrackName(name.as_bytes())),
            Event::Tempo { micros_per_quarter } => TrackEventKind::Meta(MetaMessage::Tempo(
                u24::new((*micros_per_quarter).min(0x00FF_FFFF)),
            )),
            Event::TimeSignature {
                numerator,
                denominator,
            } => TrackEventKind::Meta(MetaMessage::TimeSignature(
                *numerator,
                denominator_power(*denominator),
                CLOCKS_PER_CLICK,
                THIRTY_SECONDS_PER_QUARTER,
            )),
            Event::KeySignature { accidentals, minor } => {
                TrackEventKind::Meta(MetaMessage::KeySignature(*accidentals, *minor))
            }
            Event::Lyric(text) => TrackEventKind::Meta(MetaMessage::Lyric(text.as_bytes())),
            Event::Text(text) => TrackEventKind::Meta(MetaMessage::Text(text.as_bytes())),
            Event::ProgramChange { channel, program } => midi(
                *channel,
                MidiMessage::ProgramChange {
                    program: u7::new((*program).min(127)),
                },
            ),
            Event::PitchBend { channel, bend } => {
                let raw = ((*bend).clamp(-8192, 8191) + 8192) as u16;
                midi(
                    *channel,
                    MidiMessage::PitchBend {
                        bend: midly::PitchBend(u14::new(raw)),
                    },
                )
            }
            Event::ControlChange {
                channel,
                number,
                value,
            } => midi(
                *channel,
                MidiMessage::Controller {
                    controller: u7::new((*number).min(127)),
                    value: u7::new((*value).min(127)),
                },
            ),
            Event::NoteOff {
                channel,
                pitch,
                velocity,
            } => midi(
                *channel,
                MidiMessage::NoteOff {
                    key: u7::new((*pitch).min(127)),
                    vel: u7::new((*velocity).min(127)),
                },
            ),
            Event::NoteOn {
                channel,
                pitch,
                velocity,
            } => midi(
                *channel,
                MidiMessage::NoteOn {
                    key: u7::new((*pitch).min(127)),
                    vel: u7::new((*velocity).min(127)),
                },
            ),
            Event::EndOfTrack => TrackEventKind::Meta(MetaMessage::EndOfTrack),
        }
    }
}

/// An event at an absolute tick.
#[derive(Debug, Clone, PartialEq)]
pub struct TimedEvent {
    pub tick: u64,
    pub event: Event,
}

impl TimedEvent {
    pub fn new(tick: u64, event: Event) -> Self {
        Self { tick, event }
    }
}

/// Sorts a track by tick, then by [`Event::sort_key`]. The sort is stable,
/// so events with identical keys keep their insertion order.
pub fn sort_track(events: &mut [TimedEvent]) {
    events.sort_by_key(|e| (e.tick, e.event.sort_key()));
}

fn decode_text(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => {
            tracing::warn!("meta event text is not valid UTF-8, decoding lossily");
            String::from_utf8_lossy(bytes).into_owned()
        }
    }
}
