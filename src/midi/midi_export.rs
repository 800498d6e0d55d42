//! Standard MIDI File (SMF) encoding.
//!
//! Turns a [`Score`] back into tick-quantized tracks and writes them with
//! midly.
//!
//! # Format Details
//!
//! Exports as SMF Format 1 (multi-track) with:
//! - Track 0: time signature (4/4 unless one is declared at time 0), one tempo
//!   event per tempo change, key signatures, lyrics and text
//! - Tracks 1-N: one track per instrument with a program change at tick 0,
//!   notes, pitch bends and control changes
//!
//! Note-offs are written as note-ons with velocity 0.

use super::error::{CodecError, Result};
use super::event::{sort_track, Event, TimedEvent};
use super::instrument::DRUM_CHANNEL;
use super::score::Score;
use super::timing::MAX_TICK;
use midly::num::{u15, u28};
use midly::{Format, Header, Smf, Timing, TrackEvent};
use std::fs;
use std::path::Path;

/// Largest delta time an SMF event can carry.
const MAX_DELTA: u64 = 0x0FFF_FFFF;

/// Encodes a score to Standard MIDI File bytes.
pub fn encode(score: &Score) -> Result<Vec<u8>> {
    let tracks = encode_tracks(score)?;
    write_smf(&tracks, score.resolution())
}

/// Exports a score to a Standard MIDI File on disk.
///
/// # Errors
///
/// Returns error if encoding or writing fails
pub fn export_to_midi<P: AsRef<Path>>(score: &Score, path: P) -> Result<()> {
    let bytes = encode(score)?;
    fs::write(path, bytes)?;
    Ok(())
}

/// Builds the ordered, absolute-tick event list for every output track.
///
/// The first track is the conductor track; each instrument follows in order.
///
/// # Errors
///
/// Returns [`CodecError::InvalidValue`] if an event time is not finite or
/// lands at or beyond [`MAX_TICK`].
pub fn encode_tracks(score: &Score) -> Result<Vec<Vec<TimedEvent>>> {
    let mut tracks = Vec::with_capacity(1 + score.instruments.len());
    tracks.push(conductor_track(score)?);

    // Melodic instruments cycle through every channel except the drum channel
    let channels: Vec<u8> = (0..16).filter(|&c| c != DRUM_CHANNEL).collect();

    for (n, instrument) in score.instruments.iter().enumerate() {
        let mut events = Vec::new();

        if !instrument.name.is_empty() {
            events.push(TimedEvent::new(0, Event::TrackName(instrument.name.clone())));
        }

        let channel = if instrument.is_drum {
            DRUM_CHANNEL
        } else {
            channels[n % channels.len()]
        };

        events.push(TimedEvent::new(
            0,
            Event::ProgramChange {
                channel,
                program: instrument.program,
            },
        ));

        for note in &instrument.notes {
            events.push(TimedEvent::new(
                tick_at(score, note.start)?,
                Event::NoteOn {
                    channel,
                    pitch: note.pitch,
                    velocity: note.velocity,
                },
            ));
            events.push(TimedEvent::new(
                tick_at(score, note.end)?,
                Event::NoteOn {
                    channel,
                    pitch: note.pitch,
                    velocity: 0,
                },
            ));
        }

        for bend in &instrument.pitch_bends {
            events.push(TimedEvent::new(
                tick_at(score, bend.time)?,
                Event::PitchBend {
                    channel,
                    bend: bend.pitch,
                },
            ));
        }

        for control_change in &instrument.control_changes {
            events.push(TimedEvent::new(
                tick_at(score, control_change.time)?,
                Event::ControlChange {
                    channel,
                    number: control_change.number,
                    value: control_change.value,
                },
            ));
        }

        sort_track(&mut events);
        release_before_restrike(&mut events);
        push_end_of_track(&mut events);
        tracks.push(events);
    }

    tracing::debug!(tracks = tracks.len(), "encoded MIDI event stream");
    Ok(tracks)
}

/// Quantizes an event time, rejecting times no SMF track can hold.
fn tick_at(score: &Score, time: f64) -> Result<u64> {
    let tick = if time.is_finite() {
        score.time_to_tick(time)
    } else {
        MAX_TICK
    };
    if tick >= MAX_TICK {
        return Err(CodecError::InvalidValue(format!(
            "event time {} is beyond the last encodable tick",
            time
        )));
    }
    Ok(tick)
}

/// Builds the tempo/meta track.
fn conductor_track(score: &Score) -> Result<Vec<TimedEvent>> {
    let mut events = Vec::new();

    let declares_start_signature = score.time_signatures.iter().any(|ts| ts.time <= 0.0);
    if !declares_start_signature {
        events.push(TimedEvent::new(
            0,
            Event::TimeSignature {
                numerator: 4,
                denominator: 4,
            },
        ));
    }

    let mapper = score.mapper();
    for scale in mapper.scales() {
        events.push(TimedEvent::new(
            scale.tick,
            Event::Tempo {
                micros_per_quarter: mapper.micros_per_quarter(scale),
            },
        ));
    }

    for ts in &score.time_signatures {
        events.push(TimedEvent::new(
            tick_at(score, ts.time)?,
            Event::TimeSignature {
                numerator: ts.numerator,
                denominator: ts.denominator,
            },
        ));
    }

    for ks in &score.key_signatures {
        let (accidentals, minor) = ks.to_accidentals();
        events.push(TimedEvent::new(
            tick_at(score, ks.time)?,
            Event::KeySignature { accidentals, minor },
        ));
    }

    for lyric in &score.lyrics {
        events.push(TimedEvent::new(
            tick_at(score, lyric.time)?,
            Event::Lyric(lyric.text.clone()),
        ));
    }

    for text in &score.text_events {
        events.push(TimedEvent::new(
            tick_at(score, text.time)?,
            Event::Text(text.text.clone()),
        ));
    }

    sort_track(&mut events);
    push_end_of_track(&mut events);
    Ok(events)
}

/// Swaps any note-on that still precedes a same-tick, same-pitch release.
///
/// The sort key already orders these correctly; this pass keeps the
/// guarantee independent of the key layout.
fn release_before_restrike(events: &mut [TimedEvent]) {
    for n in 0..events.len().saturating_sub(1) {
        let out_of_order = events[n].tick == events[n + 1].tick
            && matches!(
                (&events[n].event, &events[n + 1].event),
                (
                    Event::NoteOn { pitch: a, velocity: va, .. },
                    Event::NoteOn { pitch: b, velocity: 0, .. },
                ) if a == b && *va != 0
            );
        if out_of_order {
            events.swap(n, n + 1);
        }
    }
}

/// Terminates a track one tick after its last event.
fn push_end_of_track(events: &mut Vec<TimedEvent>) {
    let end = events.last().map(|e| e.tick.saturating_add(1)).unwrap_or(0);
    events.push(TimedEvent::new(end, Event::EndOfTrack));
}

/// Converts absolute-tick tracks to delta times and writes SMF bytes.
pub fn write_smf(tracks: &[Vec<TimedEvent>], resolution: u16) -> Result<Vec<u8>> {
    let header = Header::new(
        Format::Parallel,
        Timing::Metrical(u15::new(resolution.clamp(1, 0x7FFF))),
    );
    let mut smf = Smf::new(header);
    for track in tracks {
        smf.tracks.push(to_delta_track(track)?);
    }

    let mut bytes = Vec::new();
    smf.write_std(&mut bytes)?;
    Ok(bytes)
}

/// Running difference of ticks within one track.
fn to_delta_track(events: &[TimedEvent]) -> Result<Vec<TrackEvent<'_>>> {
    let mut previous_tick = 0;
    events
        .iter()
        .map(|timed| {
            let delta = timed.tick.saturating_sub(previous_tick);
            previous_tick = timed.tick;
            if delta > MAX_DELTA {
                return Err(CodecError::InvalidValue(format!(
                    "delta time {} at tick {} does not fit in an SMF event",
                    delta, timed.tick
                )));
            }
            Ok(TrackEvent {
                delta: u28::new(delta as u32),
                kind: timed.event.to_midly(),
            })
        })
        .collect()
}
