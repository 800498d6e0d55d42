//! Conversion between MIDI ticks and seconds.
//!
//! A file's tempo map is a list of [`TickScale`] entries, each giving the
//! length of one tick from that tick onwards. [`TickMapper`] integrates the
//! list into a dense tick-to-time table that it owns and grows on demand, so
//! every decoded score carries its own mapper and nothing is shared between
//! scores.

use super::error::{CodecError, Result};
use serde::{Deserialize, Serialize};

/// The largest tick we accept before declaring a file corrupt.
pub const MAX_TICK: u64 = 10_000_000_000;

/// Tempo assumed when a file carries no tempo event.
pub const DEFAULT_TEMPO_BPM: f64 = 120.0;

/// A tempo change: from `tick` onwards every tick lasts `seconds_per_tick`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TickScale {
    pub tick: u64,
    pub seconds_per_tick: f64,
}

/// Seconds per tick for a tempo in beats per minute.
pub fn scale_for_bpm(bpm: f64, resolution: u16) -> f64 {
    60.0 / (bpm * resolution as f64)
}

/// Seconds per tick for a set-tempo value in microseconds per quarter note.
pub fn scale_for_micros(micros_per_quarter: u32, resolution: u16) -> f64 {
    scale_for_bpm(6e7 / micros_per_quarter as f64, resolution)
}

/// Piecewise tempo map plus the tick-to-time table integrated from it.
///
/// Invariants: `scales` is never empty, starts at tick 0 and has strictly
/// increasing ticks; `table` always covers at least the last scale tick.
#[derive(Debug, Clone, PartialEq)]
pub struct TickMapper {
    resolution: u16,
    scales: Vec<TickScale>,
    table: Vec<f64>,
}

impl TickMapper {
    /// Creates a mapper with a single tempo starting at tick 0.
    ///
    /// # Arguments
    ///
    /// * `resolution` - Ticks per quarter note
    /// * `initial_tempo` - Tempo in beats per minute
    pub fn new(resolution: u16, initial_tempo: f64) -> Self {
        let mut mapper = Self {
            resolution: resolution.max(1),
            scales: vec![TickScale {
                tick: 0,
                seconds_per_tick: scale_for_bpm(initial_tempo, resolution.max(1)),
            }],
            table: Vec::new(),
        };
        mapper.rebuild(0);
        mapper
    }

    /// Builds the tempo map from `(tick, microseconds per quarter)` pairs in
    /// track order.
    ///
    /// A tempo at tick 0 replaces the default 120 BPM instead of adding to it.
    /// Later tempos are appended unless they repeat the previous scale.
    pub fn from_tempo_events<I>(resolution: u16, events: I) -> Self
    where
        I: IntoIterator<Item = (u64, u32)>,
    {
        let resolution = resolution.max(1);
        let mut scales = vec![TickScale {
            tick: 0,
            seconds_per_tick: scale_for_bpm(DEFAULT_TEMPO_BPM, resolution),
        }];

        for (tick, micros) in events {
            if micros == 0 {
                continue;
            }
            let seconds_per_tick = scale_for_micros(micros, resolution);
            if tick == 0 {
                scales = vec![TickScale {
                    tick: 0,
                    seconds_per_tick,
                }];
                continue;
            }
            push_scale(&mut scales, tick, seconds_per_tick);
        }

        let mut mapper = Self {
            resolution,
            scales,
            table: Vec::new(),
        };
        mapper.rebuild(0);
        mapper
    }

    /// Ticks per quarter note.
    pub fn resolution(&self) -> u16 {
        self.resolution
    }

    /// The tempo map, ordered by tick.
    pub fn scales(&self) -> &[TickScale] {
        &self.scales
    }

    /// Last tick the table currently covers.
    pub fn covered_tick(&self) -> u64 {
        (self.table.len() - 1) as u64
    }

    /// Makes sure the table covers `max_tick`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Corrupt`] if `max_tick` reaches [`MAX_TICK`];
    /// nothing is allocated in that case.
    pub fn ensure_coverage(&mut self, max_tick: u64) -> Result<()> {
        if max_tick >= MAX_TICK {
            return Err(CodecError::Corrupt { max_tick });
        }
        if max_tick > self.covered_tick() {
            self.extend_to(max_tick);
        }
        Ok(())
    }

    /// Converts a tick to seconds, growing the table if needed.
    pub fn tick_to_time(&mut self, tick: u64) -> Result<f64> {
        self.ensure_coverage(tick)?;
        Ok(self.table[tick as usize])
    }

    /// Converts a tick to seconds without growing the table.
    pub fn time_at(&self, tick: u64) -> Option<f64> {
        self.table.get(tick as usize).copied()
    }

    /// Converts seconds to the nearest tick.
    ///
    /// Times past the end of the table are extrapolated with the final tempo.
    /// When a time lies exactly halfway between two ticks the earlier one wins.
    pub fn time_to_tick(&self, time: f64) -> u64 {
        let index = self.table.partition_point(|&t| t < time);

        if index == self.table.len() {
            let last = index - 1;
            let final_scale = self.final_scale().seconds_per_tick;
            let tick = last as f64 + (time - self.table[last]) / final_scale;
            return tick.round().max(0.0) as u64;
        }

        if index > 0 && (time - self.table[index - 1]).abs() <= (time - self.table[index]).abs() {
            (index - 1) as u64
        } else {
            index as u64
        }
    }

    /// Returns the times (seconds) and tempi (BPM) of every tempo change.
    pub fn tempo_changes(&self) -> (Vec<f64>, Vec<f64>) {
        self.scales
            .iter()
            .map(|scale| {
                let time = self.table[scale.tick as usize];
                let bpm = 60.0 / (scale.seconds_per_tick * self.resolution as f64);
                (time, bpm)
            })
            .unzip()
    }

    /// Sets the tempo from `tick` onwards, dropping later tempo changes.
    ///
    /// Used when building a score programmatically. The table is rebuilt.
    pub fn set_tempo_from(&mut self, tick: u64, bpm: f64) -> Result<()> {
        if tick >= MAX_TICK {
            return Err(CodecError::Corrupt { max_tick: tick });
        }
        if !bpm.is_finite() || bpm <= 0.0 {
            return Err(CodecError::InvalidValue(format!(
                "{} is not a valid tempo",
                bpm
            )));
        }
        let covered = self.covered_tick();
        let seconds_per_tick = scale_for_bpm(bpm, self.resolution);

        self.scales.retain(|scale| scale.tick < tick);
        if self.scales.is_empty() {
            self.scales.push(TickScale {
                tick: 0,
                seconds_per_tick,
            });
        } else {
            push_scale(&mut self.scales, tick, seconds_per_tick);
        }

        self.rebuild(covered);
        Ok(())
    }

    /// Microseconds per quarter note for a scale; inverse of [`scale_for_micros`].
    pub fn micros_per_quarter(&self, scale: &TickScale) -> u32 {
        (scale.seconds_per_tick * self.resolution as f64 * 1e6).round() as u32
    }

    fn final_scale(&self) -> TickScale {
        // `scales` is never empty
        self.scales[self.scales.len() - 1]
    }

    /// Integrates the whole table from tick 0 to `max(max_tick, last scale tick)`.
    fn rebuild(&mut self, max_tick: u64) {
        let max_tick = max_tick.max(self.final_scale().tick);
        let mut table = Vec::with_capacity(max_tick as usize + 1);
        let mut last_end_time = 0.0;

        for pair in self.scales.windows(2) {
            let (start, end) = (pair[0], pair[1]);
            let span = end.tick - start.tick;
            for offset in 0..span {
                table.push(last_end_time + start.seconds_per_tick * offset as f64);
            }
            last_end_time += start.seconds_per_tick * span as f64;
        }

        let last = self.final_scale();
        for offset in 0..=(max_tick - last.tick) {
            table.push(last_end_time + last.seconds_per_tick * offset as f64);
        }

        tracing::debug!(ticks = table.len(), scales = self.scales.len(), "built tick table");
        self.table = table;
    }

    /// Grows the table to cover exactly `max_tick`. Only the final tempo
    /// interval is affected, so existing entries stay valid.
    fn extend_to(&mut self, max_tick: u64) {
        let last = self.final_scale();
        let base = self.table[last.tick as usize];
        let start = self.table.len() as u64;
        self.table.reserve((max_tick + 1 - start) as usize);
        for tick in start..=max_tick {
            self.table
                .push(base + last.seconds_per_tick * (tick - last.tick) as f64);
        }
    }
}

impl Default for TickMapper {
    fn default() -> Self {
        Self::new(super::DEFAULT_RESOLUTION, DEFAULT_TEMPO_BPM)
    }
}

/// Appends a scale, coalescing repeats and keeping ticks strictly increasing.
fn push_scale(scales: &mut Vec<TickScale>, tick: u64, seconds_per_tick: f64) {
    if let Some(last) = scales.last_mut() {
        if last.tick == tick {
            last.seconds_per_tick = seconds_per_tick;
            let len = scales.len();
            if len >= 2 && scales[len - 2].seconds_per_tick == seconds_per_tick {
                scales.pop();
            }
            return;
        }
        // Ignore repetition of the same tempo, which happens often
        if last.seconds_per_tick == seconds_per_tick {
            return;
        }
    }
    scales.push(TickScale {
        tick,
        seconds_per_tick,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_default_tempo() {
        let mut mapper = TickMapper::from_tempo_events(480, Vec::new());
        assert_eq!(mapper.scales().len(), 1);
        // 120 BPM: one beat = 0.5 seconds
        assert!(close(mapper.tick_to_time(480).unwrap(), 0.5));
    }

    #[test]
    fn test_initial_tempo_replaces_default() {
        let mut mapper = TickMapper::from_tempo_events(480, vec![(0, 500_000)]);
        assert_eq!(mapper.scales().len(), 1);
        assert!(close(mapper.tick_to_time(480).unwrap(), 0.5));

        let mut slow = TickMapper::from_tempo_events(480, vec![(0, 1_000_000)]);
        assert_eq!(slow.scales().len(), 1);
        assert!(close(slow.tick_to_time(480).unwrap(), 1.0));
    }

    #[test]
    fn test_repeated_tempo_is_coalesced() {
        let mapper =
            TickMapper::from_tempo_events(480, vec![(0, 500_000), (960, 500_000), (1920, 500_000)]);
        assert_eq!(mapper.scales().len(), 1);
    }

    #[test]
    fn test_piecewise_tempo() {
        // 120 BPM for two beats, then 60 BPM
        let mut mapper = TickMapper::from_tempo_events(480, vec![(0, 500_000), (960, 1_000_000)]);
        assert_eq!(mapper.scales().len(), 2);
        assert!(close(mapper.tick_to_time(960).unwrap(), 1.0));
        assert!(close(mapper.tick_to_time(1440).unwrap(), 2.0));
        assert!(close(mapper.tick_to_time(1920).unwrap(), 3.0));

        let (times, tempi) = mapper.tempo_changes();
        assert!(close(times[1], 1.0));
        assert!(close(tempi[0], 120.0));
        assert!(close(tempi[1], 60.0));
    }

    #[test]
    fn test_monotonic() {
        let mut mapper = TickMapper::from_tempo_events(
            96,
            vec![(0, 400_000), (100, 900_000), (250, 300_000)],
        );
        mapper.ensure_coverage(1000).unwrap();
        let mut previous = mapper.time_at(0).unwrap();
        for tick in 1..=1000 {
            let time = mapper.time_at(tick).unwrap();
            assert!(time >= previous);
            previous = time;
        }
    }

    #[test]
    fn test_table_grows_on_demand() {
        let mut mapper = TickMapper::new(220, 120.0);
        assert_eq!(mapper.covered_tick(), 0);
        let time = mapper.tick_to_time(440).unwrap();
        assert!(close(time, 1.0));
        assert_eq!(mapper.covered_tick(), 440);
    }

    #[test]
    fn test_corrupt_tick_rejected() {
        let mut mapper = TickMapper::new(480, 120.0);
        let err = mapper.tick_to_time(MAX_TICK).unwrap_err();
        assert!(matches!(err, CodecError::Corrupt { .. }));
        // Nothing was allocated
        assert_eq!(mapper.covered_tick(), 0);
    }

    #[test]
    fn test_time_to_tick_extrapolates() {
        let mapper = TickMapper::new(220, 120.0);
        assert_eq!(mapper.time_to_tick(0.0), 0);
        assert_eq!(mapper.time_to_tick(1.0), 440);
        assert_eq!(mapper.time_to_tick(2.5), 1100);
    }

    #[test]
    fn test_time_to_tick_nearest() {
        let mut mapper = TickMapper::new(100, 60.0); // 0.01 s per tick
        mapper.ensure_coverage(200).unwrap();
        assert_eq!(mapper.time_to_tick(0.5), 50);
        assert_eq!(mapper.time_to_tick(0.503), 50);
        assert_eq!(mapper.time_to_tick(0.507), 51);
    }

    #[test]
    fn test_time_to_tick_tie_prefers_earlier() {
        let mut mapper = TickMapper::new(2, 60.0); // 0.5 s per tick
        mapper.ensure_coverage(4).unwrap();
        assert_eq!(mapper.time_to_tick(0.25), 0);
        assert_eq!(mapper.time_to_tick(0.75), 1);
    }

    #[test]
    fn test_set_tempo_from() {
        let mut mapper = TickMapper::new(480, 120.0);
        mapper.set_tempo_from(960, 60.0).unwrap();
        assert_eq!(mapper.scales().len(), 2);
        assert!(close(mapper.tick_to_time(1440).unwrap(), 2.0));

        mapper.set_tempo_from(0, 60.0).unwrap();
        assert_eq!(mapper.scales().len(), 1);
        assert!(close(mapper.tick_to_time(480).unwrap(), 1.0));
    }

    #[test]
    fn test_micros_round_trip() {
        let mapper = TickMapper::from_tempo_events(480, vec![(0, 434_783)]);
        assert_eq!(mapper.micros_per_quarter(&mapper.scales()[0]), 434_783);
    }
}
