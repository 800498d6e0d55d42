//! Standard MIDI File (SMF) decoding.
//!
//! Bytes are parsed with midly, each track's delta times are summed into
//! absolute ticks, and the resulting event stream is decoded into a
//! [`Score`]: a tempo map, per-(program, channel, track) instruments with
//! paired notes, and file-wide meta events.
//!
//! # Decoding rules
//!
//! - Tempo, key and time signature events are read from track 0 only. Finding
//!   them on another track logs a warning; they are not applied.
//! - Lyrics and text events are read from every track and merged by time.
//! - A note-off closes every open note of that pitch and channel except those
//!   that started on the same tick.
//! - Control changes and pitch bends seen before any note on their
//!   (channel, track) are buffered and handed to the first instrument created
//!   there.

use super::error::{CodecError, Result};
use super::event::{Event, TimedEvent};
use super::instrument::{Instrument, DRUM_CHANNEL};
use super::meta::{KeySignature, Lyric, Text, TimeSignature};
use super::note::{ControlChange, Note, PitchBend};
use super::score::Score;
use super::timing::{TickMapper, MAX_TICK};
use midly::{Smf, Timing, TrackEvent};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Open notes keyed by (channel, pitch); each entry is (start_tick, velocity).
type OpenNotes = HashMap<(u8, u8), Vec<(u64, u8)>>;

/// Decodes a MIDI file from disk.
///
/// # Errors
///
/// Returns error if the file cannot be read or decoded
pub fn import_from_midi<P: AsRef<Path>>(path: P) -> Result<Score> {
    let data = fs::read(path.as_ref())?;
    decode(&data)
}

/// Decodes Standard MIDI File bytes (format 0, 1 or 2) into a [`Score`].
///
/// # Errors
///
/// - [`CodecError::Parse`] if the bytes are not an SMF
/// - [`CodecError::UnsupportedTiming`] for SMPTE timecode division
/// - [`CodecError::Corrupt`] if the largest tick reaches the sanity ceiling
pub fn decode(bytes: &[u8]) -> Result<Score> {
    let smf = Smf::parse(bytes).map_err(|e| CodecError::Parse(e.to_string()))?;

    let resolution = match smf.header.timing {
        Timing::Metrical(tpb) => tpb.as_int(),
        Timing::Timecode(_, _) => return Err(CodecError::UnsupportedTiming),
    };

    let tracks = tracks_from_smf(&smf.tracks);
    decode_tracks(&tracks, resolution)
}

/// Converts midly tracks to absolute-tick events.
///
/// Delta times are summed per track; events the codec does not model
/// (sysex, aftertouch, other meta events) are skipped but still advance time.
pub fn tracks_from_smf(tracks: &[Vec<TrackEvent<'_>>]) -> Vec<Vec<TimedEvent>> {
    tracks
        .iter()
        .map(|track| {
            let mut tick: u64 = 0;
            track
                .iter()
                .filter_map(|event| {
                    tick += event.delta.as_int() as u64;
                    Event::from_midly(&event.kind).map(|e| TimedEvent::new(tick, e))
                })
                .collect()
        })
        .collect()
}

/// Decodes tracks of absolute-tick events into a [`Score`].
///
/// # Arguments
///
/// * `tracks` - One event list per track, each ordered by tick
/// * `resolution` - Ticks per quarter note
pub fn decode_tracks(tracks: &[Vec<TimedEvent>], resolution: u16) -> Result<Score> {
    let max_tick = tracks
        .iter()
        .filter_map(|track| track.last().map(|e| e.tick))
        .max()
        .unwrap_or(0);

    // A huge tick means a corrupt file; building the table would thrash memory
    if max_tick >= MAX_TICK {
        return Err(CodecError::Corrupt { max_tick });
    }

    let conductor: &[TimedEvent] = tracks.first().map(Vec::as_slice).unwrap_or(&[]);
    let tempo_events = conductor.iter().filter_map(|e| match e.event {
        Event::Tempo { micros_per_quarter } => Some((e.tick, micros_per_quarter)),
        _ => None,
    });

    let mut mapper = TickMapper::from_tempo_events(resolution, tempo_events);
    mapper.ensure_coverage(max_tick)?;

    for (track_idx, track) in tracks.iter().enumerate().skip(1) {
        if track.iter().any(|e| e.event.is_timing_meta()) {
            tracing::warn!(
                track = track_idx,
                "Tempo, key or time signature change events found on non-zero tracks. \
                 This is not a valid type 0 or type 1 MIDI file. Tempo, key or time \
                 signature may be wrong."
            );
        }
    }

    let mut decoder = Decoder {
        mapper,
        instruments: InstrumentSet::default(),
    };

    let (time_signatures, key_signatures) = decoder.load_signatures(conductor)?;
    let (lyrics, text_events) = decoder.load_text(tracks)?;
    for (track_idx, track) in tracks.iter().enumerate() {
        decoder.load_track(track_idx, track)?;
    }

    let instruments = decoder.instruments.instruments;
    tracing::debug!(
        tracks = tracks.len(),
        instruments = instruments.len(),
        max_tick,
        "decoded MIDI event stream"
    );

    Ok(Score::from_parts(
        decoder.mapper,
        instruments,
        key_signatures,
        time_signatures,
        lyrics,
        text_events,
    ))
}

/// Controller events that may arrive before their instrument exists.
enum Controller {
    Change(ControlChange),
    Bend(PitchBend),
}

/// Events buffered for a (channel, track) that has no instrument yet.
enum Straggler {
    Pending {
        control_changes: Vec<ControlChange>,
        pitch_bends: Vec<PitchBend>,
    },
    /// The buffer was handed to the instrument at this index.
    Promoted(usize),
}

/// Instruments in creation order, indexed by (program, channel, track).
#[derive(Default)]
struct InstrumentSet {
    instruments: Vec<Instrument>,
    index: HashMap<(u8, u8, usize), usize>,
    stragglers: HashMap<(u8, usize), Straggler>,
}

impl InstrumentSet {
    /// Returns the instrument for this key, creating it on first use.
    ///
    /// A newly created instrument takes over the straggler buffer of its
    /// (channel, track), if one is still pending.
    fn concrete(
        &mut self,
        program: u8,
        channel: u8,
        track: usize,
        name: &str,
    ) -> Result<&mut Instrument> {
        if let Some(&idx) = self.index.get(&(program, channel, track)) {
            return Ok(&mut self.instruments[idx]);
        }

        let idx = self.instruments.len();
        let mut instrument = Instrument::new(program, channel == DRUM_CHANNEL, name)?;

        let pending = matches!(
            self.stragglers.get(&(channel, track)),
            Some(Straggler::Pending { .. })
        );
        if pending {
            if let Some(Straggler::Pending {
                control_changes,
                pitch_bends,
            }) = self
                .stragglers
                .insert((channel, track), Straggler::Promoted(idx))
            {
                instrument.control_changes = control_changes;
                instrument.pitch_bends = pitch_bends;
            }
        }

        self.index.insert((program, channel, track), idx);
        self.instruments.push(instrument);
        Ok(&mut self.instruments[idx])
    }

    /// Routes a controller event to its instrument, or buffers it.
    fn push_controller(&mut self, program: u8, channel: u8, track: usize, event: Controller) {
        let target = match self.index.get(&(program, channel, track)) {
            Some(&idx) => Some(idx),
            None => match self
                .stragglers
                .entry((channel, track))
                .or_insert_with(|| Straggler::Pending {
                    control_changes: Vec::new(),
                    pitch_bends: Vec::new(),
                }) {
                Straggler::Pending {
                    control_changes,
                    pitch_bends,
                } => {
                    match event {
                        Controller::Change(cc) => control_changes.push(cc),
                        Controller::Bend(bend) => pitch_bends.push(bend),
                    }
                    return;
                }
                Straggler::Promoted(idx) => Some(*idx),
            },
        };

        if let Some(idx) = target {
            let instrument = &mut self.instruments[idx];
            match event {
                Controller::Change(cc) => instrument.control_changes.push(cc),
                Controller::Bend(bend) => instrument.pitch_bends.push(bend),
            }
        }
    }
}

struct Decoder {
    mapper: TickMapper,
    instruments: InstrumentSet,
}

impl Decoder {
    fn time(&mut self, tick: u64) -> Result<f64> {
        self.mapper.tick_to_time(tick)
    }

    /// Reads time and key signatures from the conductor track.
    fn load_signatures(
        &mut self,
        conductor: &[TimedEvent],
    ) -> Result<(Vec<TimeSignature>, Vec<KeySignature>)> {
        let mut time_signatures = Vec::new();
        let mut key_signatures = Vec::new();

        for event in conductor {
            match event.event {
                Event::TimeSignature {
                    numerator,
                    denominator,
                } => {
                    let time = self.time(event.tick)?;
                    time_signatures.push(TimeSignature::new(numerator, denominator, time)?);
                }
                Event::KeySignature { accidentals, minor } => {
                    let time = self.time(event.tick)?;
                    key_signatures.push(KeySignature::from_accidentals(accidentals, minor, time)?);
                }
                _ => {}
            }
        }

        Ok((time_signatures, key_signatures))
    }

    /// Collects lyrics and text events from every track, ordered by time.
    fn load_text(&mut self, tracks: &[Vec<TimedEvent>]) -> Result<(Vec<Lyric>, Vec<Text>)> {
        let mut lyrics = Vec::new();
        let mut text_events = Vec::new();

        for track in tracks {
            for event in track {
                match &event.event {
                    Event::Lyric(text) => {
                        lyrics.push(Lyric::new(text.clone(), self.time(event.tick)?)?)
                    }
                    Event::Text(text) => {
                        text_events.push(Text::new(text.clone(), self.time(event.tick)?)?)
                    }
                    _ => {}
                }
            }
        }

        // Stable, so equal times keep track order
        lyrics.sort_by(|a, b| a.time.total_cmp(&b.time));
        text_events.sort_by(|a, b| a.time.total_cmp(&b.time));
        Ok((lyrics, text_events))
    }

    /// Pairs notes and routes controllers for one track.
    fn load_track(&mut self, track_idx: usize, track: &[TimedEvent]) -> Result<()> {
        let mut current_program = [0u8; 16];
        let mut open_notes: OpenNotes = HashMap::new();
        let mut track_name = String::new();

        for event in track {
            let tick = event.tick;
            match &event.event {
                Event::TrackName(name) => track_name = name.clone(),
                Event::ProgramChange { channel, program } => {
                    current_program[(*channel & 0x0F) as usize] = *program;
                }
                Event::NoteOn {
                    channel,
                    pitch,
                    velocity,
                } if *velocity > 0 => {
                    open_notes
                        .entry((*channel, *pitch))
                        .or_default()
                        .push((tick, *velocity));
                }
                Event::NoteOn { channel, pitch, .. } | Event::NoteOff { channel, pitch, .. } => {
                    let key = (*channel, *pitch);
                    // A release without a matching note-on is ignored
                    let Some(open) = open_notes.remove(&key) else {
                        continue;
                    };

                    // A note that started on this very tick survives this release
                    let (to_close, to_keep): (Vec<_>, Vec<_>) =
                        open.into_iter().partition(|(start_tick, _)| *start_tick != tick);

                    if !to_close.is_empty() {
                        let end = self.time(tick)?;
                        let program = current_program[(*channel & 0x0F) as usize];
                        for (start_tick, velocity) in &to_close {
                            let start = self.time(*start_tick)?;
                            let note = Note::new(*pitch, *velocity, start, end)?;
                            self.instruments
                                .concrete(program, *channel, track_idx, &track_name)?
                                .notes
                                .push(note);
                        }
                    }

                    if !to_close.is_empty() && !to_keep.is_empty() {
                        open_notes.insert(key, to_keep);
                    }
                }
                Event::ControlChange {
                    channel,
                    number,
                    value,
                } => {
                    let cc = ControlChange::new(*number, *value, self.time(tick)?)?;
                    let program = current_program[(*channel & 0x0F) as usize];
                    self.instruments.push_controller(
                        program,
                        *channel,
                        track_idx,
                        Controller::Change(cc),
                    );
                }
                Event::PitchBend { channel, bend } => {
                    let bend = PitchBend::new(*bend, self.time(tick)?)?;
                    let program = current_program[(*channel & 0x0F) as usize];
                    self.instruments.push_controller(
                        program,
                        *channel,
                        track_idx,
                        Controller::Bend(bend),
                    );
                }
                _ => {}
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use midly::num::{u15, u24, u28, u4, u7};
    use midly::{Format, Header, MetaMessage, MidiMessage, TrackEventKind};

    fn on(tick: u64, channel: u8, pitch: u8, velocity: u8) -> TimedEvent {
        TimedEvent::new(
            tick,
            Event::NoteOn {
                channel,
                pitch,
                velocity,
            },
        )
    }

    fn off(tick: u64, channel: u8, pitch: u8) -> TimedEvent {
        TimedEvent::new(
            tick,
            Event::NoteOff {
                channel,
                pitch,
                velocity: 0,
            },
        )
    }

    fn cc(tick: u64, channel: u8, number: u8, value: u8) -> TimedEvent {
        TimedEvent::new(
            tick,
            Event::ControlChange {
                channel,
                number,
                value,
            },
        )
    }

    fn program(tick: u64, channel: u8, program: u8) -> TimedEvent {
        TimedEvent::new(tick, Event::ProgramChange { channel, program })
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_simple_note_pairing() {
        // 120 BPM, 480 ticks per beat: 480 ticks = 0.5 s
        let tracks = vec![vec![
            on(0, 0, 60, 100),
            off(480, 0, 60),
            on(480, 0, 62, 90),
            on(960, 0, 62, 0),
        ]];
        let score = decode_tracks(&tracks, 480).unwrap();
        assert_eq!(score.instruments.len(), 1);

        let notes = &score.instruments[0].notes;
        assert_eq!(notes.len(), 2);
        assert_eq!(notes[0].pitch, 60);
        assert!(close(notes[0].start, 0.0));
        assert!(close(notes[0].end, 0.5));
        assert_eq!(notes[1].velocity, 90);
        assert!(close(notes[1].end, 1.0));
    }

    #[test]
    fn test_same_tick_restrike_is_kept_open() {
        let tracks = vec![vec![
            on(0, 0, 60, 100),
            on(100, 0, 60, 80),
            off(100, 0, 60),
            off(200, 0, 60),
        ]];
        let score = decode_tracks(&tracks, 100).unwrap();
        let notes = &score.instruments[0].notes;
        assert_eq!(notes.len(), 2);
        assert_eq!(notes[0].velocity, 100);
        assert!(close(notes[0].start, 0.0));
        assert!(close(notes[0].end, 0.5));
        assert_eq!(notes[1].velocity, 80);
        assert!(close(notes[1].start, 0.5));
        assert!(close(notes[1].end, 1.0));
    }

    #[test]
    fn test_only_same_tick_notes_are_dropped() {
        // Every open note started on the release tick: the key is cleared
        let tracks = vec![vec![on(100, 0, 60, 100), off(100, 0, 60), off(200, 0, 60)]];
        let score = decode_tracks(&tracks, 100).unwrap();
        assert!(score.instruments.is_empty());
    }

    #[test]
    fn test_restrike_without_release_closes_all() {
        let tracks = vec![vec![on(0, 0, 60, 100), on(50, 0, 60, 90), off(100, 0, 60)]];
        let score = decode_tracks(&tracks, 100).unwrap();
        let notes = &score.instruments[0].notes;
        assert_eq!(notes.len(), 2);
        assert!(close(notes[0].end, notes[1].end));
    }

    #[test]
    fn test_spurious_note_off_ignored() {
        let tracks = vec![vec![off(10, 0, 64), on(20, 0, 60, 100), off(30, 0, 60)]];
        let score = decode_tracks(&tracks, 100).unwrap();
        assert_eq!(score.instruments.len(), 1);
        assert_eq!(score.instruments[0].notes.len(), 1);
    }

    #[test]
    fn test_instrument_per_program_channel_track() {
        let tracks = vec![
            vec![TimedEvent::new(0, Event::TrackName("conductor".to_string()))],
            vec![
                TimedEvent::new(0, Event::TrackName("strings".to_string())),
                program(0, 0, 48),
                on(0, 0, 60, 100),
                off(10, 0, 60),
                program(20, 0, 40),
                on(20, 0, 60, 100),
                off(30, 0, 60),
                on(40, 9, 36, 100),
                off(50, 9, 36),
            ],
        ];
        let score = decode_tracks(&tracks, 100).unwrap();
        assert_eq!(score.instruments.len(), 3);
        assert_eq!(score.instruments[0].program, 48);
        assert_eq!(score.instruments[0].name, "strings");
        assert_eq!(score.instruments[1].program, 40);
        assert!(!score.instruments[1].is_drum);
        assert!(score.instruments[2].is_drum);
    }

    #[test]
    fn test_stragglers_fold_into_first_instrument() {
        let tracks = vec![vec![
            cc(0, 0, 64, 127),
            cc(10, 0, 64, 0),
            on(20, 0, 60, 100),
            off(30, 0, 60),
            // Program 5 has no instrument yet: goes to the promoted bucket owner
            program(40, 0, 5),
            cc(40, 0, 7, 90),
            // Never gets a note: buffered and dropped
            cc(50, 3, 64, 127),
        ]];
        let score = decode_tracks(&tracks, 100).unwrap();
        assert_eq!(score.instruments.len(), 1);
        let ccs = &score.instruments[0].control_changes;
        assert_eq!(ccs.len(), 3);
        assert_eq!(ccs[0].value, 127);
        assert_eq!(ccs[2].number, 7);
    }

    #[test]
    fn test_control_change_goes_to_existing_instrument() {
        let tracks = vec![vec![on(0, 0, 60, 100), off(10, 0, 60), cc(20, 0, 64, 100)]];
        let score = decode_tracks(&tracks, 100).unwrap();
        assert_eq!(score.instruments[0].control_changes.len(), 1);
        assert!(close(score.instruments[0].control_changes[0].time, 0.1));
    }

    #[test]
    fn test_timing_meta_only_from_first_track() {
        let tracks = vec![
            vec![
                TimedEvent::new(
                    0,
                    Event::TimeSignature {
                        numerator: 3,
                        denominator: 4,
                    },
                ),
                TimedEvent::new(
                    0,
                    Event::KeySignature {
                        accidentals: 2,
                        minor: false,
                    },
                ),
            ],
            vec![
                TimedEvent::new(
                    0,
                    Event::Tempo {
                        micros_per_quarter: 1_000_000,
                    },
                ),
                on(0, 0, 60, 100),
                off(480, 0, 60),
            ],
        ];
        let score = decode_tracks(&tracks, 480).unwrap();
        assert_eq!(score.time_signatures.len(), 1);
        assert_eq!(score.time_signatures[0].numerator, 3);
        assert_eq!(score.key_signatures[0].key_number, 2);
        // The tempo on track 1 is not applied: still 120 BPM
        assert!(close(score.instruments[0].notes[0].end, 0.5));
    }

    #[test]
    fn test_lyrics_merged_across_tracks() {
        let tracks = vec![
            vec![
                TimedEvent::new(0, Event::Lyric("one".to_string())),
                TimedEvent::new(200, Event::Lyric("three".to_string())),
            ],
            vec![
                TimedEvent::new(100, Event::Lyric("two".to_string())),
                TimedEvent::new(150, Event::Text("marker".to_string())),
            ],
        ];
        let score = decode_tracks(&tracks, 100).unwrap();
        let words: Vec<_> = score.lyrics.iter().map(|l| l.text.as_str()).collect();
        assert_eq!(words, vec!["one", "two", "three"]);
        assert_eq!(score.text_events.len(), 1);
    }

    #[test]
    fn test_corrupt_max_tick() {
        let tracks = vec![vec![on(0, 0, 60, 100), off(MAX_TICK, 0, 60)]];
        let err = decode_tracks(&tracks, 480).unwrap_err();
        assert!(matches!(err, CodecError::Corrupt { .. }));
    }

    fn smf_bytes(timing: Timing, tracks: Vec<Vec<TrackEvent<'static>>>) -> Vec<u8> {
        let mut smf = Smf::new(Header::new(Format::Parallel, timing));
        smf.tracks = tracks;
        let mut bytes = Vec::new();
        smf.write_std(&mut bytes).unwrap();
        bytes
    }

    #[test]
    fn test_decode_bytes_with_tempo() {
        let conductor = vec![
            TrackEvent {
                delta: u28::new(0),
                kind: TrackEventKind::Meta(MetaMessage::Tempo(u24::new(500_000))),
            },
            TrackEvent {
                delta: u28::new(0),
                kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
            },
        ];
        let notes = vec![
            TrackEvent {
                delta: u28::new(0),
                kind: TrackEventKind::Midi {
                    channel: u4::new(0),
                    message: MidiMessage::NoteOn {
                        key: u7::new(60),
                        vel: u7::new(100),
                    },
                },
            },
            TrackEvent {
                delta: u28::new(480),
                kind: TrackEventKind::Midi {
                    channel: u4::new(0),
                    message: MidiMessage::NoteOff {
                        key: u7::new(60),
                        vel: u7::new(0),
                    },
                },
            },
            TrackEvent {
                delta: u28::new(0),
                kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
            },
        ];
        let bytes = smf_bytes(Timing::Metrical(u15::new(480)), vec![conductor, notes]);

        let mut score = decode(&bytes).unwrap();
        assert_eq!(score.resolution(), 480);
        assert!(close(score.tick_to_time(480).unwrap(), 0.5));
        assert!(close(score.instruments[0].notes[0].end, 0.5));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let err = decode(b"not a midi file").unwrap_err();
        assert!(matches!(err, CodecError::Parse(_)));
    }

    #[test]
    fn test_decode_rejects_timecode() {
        let track = vec![TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
        }];
        let bytes = smf_bytes(Timing::Timecode(midly::Fps::Fps25, 40), vec![track]);
        let err = decode(&bytes).unwrap_err();
        assert!(matches!(err, CodecError::UnsupportedTiming));
    }

    #[test]
    fn test_tracks_from_smf_accumulates_deltas() {
        let track = vec![
            TrackEvent {
                delta: u28::new(10),
                kind: TrackEventKind::Midi {
                    channel: u4::new(0),
                    message: MidiMessage::Aftertouch {
                        key: u7::new(60),
                        vel: u7::new(10),
                    },
                },
            },
            TrackEvent {
                delta: u28::new(5),
                kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
            },
        ];
        let tracks = tracks_from_smf(&[track]);
        assert_eq!(tracks[0].len(), 1);
        assert_eq!(tracks[0][0].tick, 15);
    }
}
