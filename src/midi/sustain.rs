//! Sustain pedal projection.
//!
//! Turns sustain pedal control changes into pedal-down intervals and extends
//! note ends the way a held damper pedal would, so downstream consumers see
//! the durations that were actually heard.

use super::note::{ControlChange, Note};
use std::collections::HashMap;

/// Pedal values at or above this count as "down" unless the caller chooses
/// otherwise.
pub const DEFAULT_SUSTAIN_THRESHOLD: u8 = 64;

/// Groups sustain events into pedal-down intervals `(pedal_down, pedal_up)`.
///
/// Only sustain pedal (controller 64) events are considered. A run of
/// consecutive values at or above `threshold` starts at its first sample and
/// ends at the sample that releases it. A run that is never released ends at
/// its last down sample.
pub fn sustain_intervals(sustain: &[ControlChange], threshold: u8) -> Vec<(f64, f64)> {
    let mut events: Vec<&ControlChange> = sustain.iter().filter(|c| c.is_sustain()).collect();
    events.sort_by(|a, b| a.time.total_cmp(&b.time));

    let mut intervals = Vec::new();
    let mut run: Option<(f64, f64)> = None;

    for event in events {
        let is_down = event.value >= threshold;
        match (run, is_down) {
            (None, true) => run = Some((event.time, event.time)),
            (Some((down, _)), true) => run = Some((down, event.time)),
            (Some((down, _)), false) => {
                intervals.push((down, event.time));
                run = None;
            }
            (None, false) => {}
        }
    }

    if let Some(interval) = run {
        intervals.push(interval);
    }
    intervals
}

/// Applies sustain pedal intervals to a note table and returns the result.
///
/// For each pedal-down interval, notes whose end lies in
/// `[pedal_down, pedal_up)` are extended: up to the next same-pitch note
/// start (capped at the pedal release) if one exists, otherwise to the pedal
/// release. Intervals are applied in time order and each sees the ends
/// written by the previous ones. Within one interval every new end is
/// computed from the table as it was before that interval.
///
/// Applying the same pedal data to an already sustained table is a no-op.
///
/// # Examples
///
/// ```
/// use midiframe::midi::{apply_sustain, ControlChange, Note};
///
/// let notes = vec![
///     Note::new(60, 80, 0.0, 1.0).unwrap(),
///     Note::new(60, 80, 2.0, 3.0).unwrap(),
/// ];
/// let pedal = vec![
///     ControlChange::new(64, 100, 0.5).unwrap(),
///     ControlChange::new(64, 0, 2.5).unwrap(),
/// ];
///
/// let sustained = apply_sustain(&notes, &pedal, 64);
/// assert_eq!(sustained[0].end, 2.0);
/// assert_eq!(sustained[1].end, 3.0);
/// ```
pub fn apply_sustain(notes: &[Note], sustain: &[ControlChange], threshold: u8) -> Vec<Note> {
    let mut sustained = notes.to_vec();
    let intervals = sustain_intervals(sustain, threshold);
    if intervals.is_empty() {
        return sustained;
    }

    // Starts never change, so the re-strike lookup can be built once
    let mut starts_by_pitch: HashMap<u8, Vec<f64>> = HashMap::new();
    for note in notes {
        starts_by_pitch.entry(note.pitch).or_default().push(note.start);
    }
    for starts in starts_by_pitch.values_mut() {
        starts.sort_by(f64::total_cmp);
    }

    let next_start = |note: &Note| -> Option<f64> {
        let starts = starts_by_pitch.get(&note.pitch)?;
        let index = starts.partition_point(|&s| s <= note.start);
        starts.get(index).copied()
    };

    for (pedal_down, pedal_up) in intervals {
        let new_ends: Vec<(usize, f64)> = sustained
            .iter()
            .enumerate()
            .filter(|(_, note)| note.end >= pedal_down && note.end < pedal_up)
            .map(|(index, note)| {
                let end = match next_start(note) {
                    Some(restrike) => restrike.min(pedal_up),
                    None => note.end.max(pedal_up),
                };
                (index, end)
            })
            .collect();

        tracing::trace!(pedal_down, pedal_up, affected = new_ends.len(), "sustain interval");
        for (index, end) in new_ends {
            sustained[index].end = end;
        }
    }

    sustained
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(pitch: u8, start: f64, end: f64) -> Note {
        Note::new(pitch, 80, start, end).unwrap()
    }

    fn pedal(value: u8, time: f64) -> ControlChange {
        ControlChange::new(64, value, time).unwrap()
    }

    #[test]
    fn test_intervals() {
        let events = vec![
            pedal(0, 0.0),
            pedal(100, 1.0),
            pedal(127, 1.5),
            pedal(10, 2.0),
            pedal(80, 3.0),
            pedal(90, 3.5),
        ];
        assert_eq!(
            sustain_intervals(&events, 64),
            vec![(1.0, 2.0), (3.0, 3.5)]
        );
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let events = vec![pedal(62, 0.0), pedal(61, 1.0)];
        assert_eq!(sustain_intervals(&events, 62), vec![(0.0, 1.0)]);
        assert!(sustain_intervals(&events, 64).is_empty());
    }

    #[test]
    fn test_other_controllers_ignored() {
        let events = vec![
            ControlChange::new(7, 127, 0.0).unwrap(),
            ControlChange::new(7, 0, 1.0).unwrap(),
        ];
        assert!(sustain_intervals(&events, 64).is_empty());
    }

    #[test]
    fn test_restrike_caps_extension() {
        let notes = vec![note(60, 0.0, 1.0), note(60, 2.0, 3.0)];
        let events = vec![pedal(100, 0.5), pedal(0, 2.5)];

        let sustained = apply_sustain(&notes, &events, 64);
        assert_eq!(sustained[0].end, 2.0);
        assert_eq!(sustained[1].end, 3.0);
    }

    #[test]
    fn test_extends_to_pedal_release() {
        let notes = vec![note(60, 0.0, 1.0), note(64, 0.2, 0.8), note(67, 0.0, 0.1)];
        let events = vec![pedal(127, 0.5), pedal(0, 4.0)];

        let sustained = apply_sustain(&notes, &events, 64);
        assert_eq!(sustained[0].end, 4.0);
        assert_eq!(sustained[1].end, 4.0);
        // Released before the pedal went down
        assert_eq!(sustained[2].end, 0.1);
    }

    #[test]
    fn test_idempotent() {
        let notes = vec![
            note(60, 0.0, 1.0),
            note(60, 2.0, 3.0),
            note(62, 0.5, 1.2),
            note(65, 3.1, 3.3),
        ];
        let events = vec![
            pedal(100, 0.5),
            pedal(0, 2.5),
            pedal(100, 3.2),
            pedal(0, 5.0),
        ];

        let once = apply_sustain(&notes, &events, 64);
        let twice = apply_sustain(&once, &events, 64);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_later_interval_sees_earlier_extension() {
        // First interval moves the end to 2.0, the second then extends it to 4.0
        let notes = vec![note(60, 0.0, 1.0)];
        let events = vec![
            pedal(100, 0.5),
            pedal(0, 2.0),
            pedal(100, 2.0),
            pedal(0, 4.0),
        ];
        let sustained = apply_sustain(&notes, &events, 64);
        assert_eq!(sustained[0].end, 4.0);
    }

    #[test]
    fn test_no_pedal_is_identity() {
        let notes = vec![note(60, 0.0, 1.0)];
        assert_eq!(apply_sustain(&notes, &[], 64), notes);
    }
}
