// SPDX-License-Identifier: Apache-2.0

//! Level-crossing trigger detection.
//!
//! Two independent tools live here:
//!
//! - [`find_crossing`] searches a window of samples for the first rising edge, used through
//!   [`sync_window`] to align the displayed waveform.
//! - [`EdgeDetector`] tracks a sample stream with a hysteresis band, so that noise around the
//!   level does not produce extra events when measuring the period between pulses.

use crate::{buffer::SampleCounter, Duration, Instant};

/// A rising crossing of the trigger level.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TriggerEvent {
    /// Position of the crossing sample in the acquisition stream
    pub sample_index: SampleCounter,
    /// Time the crossing sample was taken
    pub timestamp: Instant,
}

/// First index `i` in `start_offset..=len - 2` with `samples[i - 1] < level <= samples[i]`.
///
/// The comparison is half-open: a value exactly at `level` counts as "at or above", so a signal
/// sitting on the level while falling never retriggers. Index 0 is never reported since it has no
/// predecessor. The lowest qualifying index always wins.
pub fn find_crossing(samples: &[f32], level: f32, start_offset: usize) -> Option<usize> {
    let end = samples.len().checked_sub(1)?;
    (start_offset.max(1)..end).find(|&i| samples[i - 1] < level && samples[i] >= level)
}

/// Bounds of the waveform slice to display.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SyncedWindow {
    /// First displayed sample
    pub start: usize,
    /// Number of displayed samples
    pub len: usize,
    /// Crossing the window was aligned to, if any
    pub sync_index: Option<usize>,
}

impl SyncedWindow {
    /// Borrow the window out of the buffer it was computed from
    pub fn slice<'a>(&self, samples: &'a [f32]) -> &'a [f32] {
        &samples[self.start..self.start + self.len]
    }
}

/// Choose a `width`-sample window aligned `offset` samples after the first rising crossing.
///
/// - Buffer shorter than `width`: the whole buffer, unsynchronised.
/// - No crossing: the newest `width` samples.
/// - Crossing too close to the end: clamped to the newest `width` samples.
pub fn sync_window(samples: &[f32], width: usize, level: f32, offset: usize) -> SyncedWindow {
    let len = samples.len();
    if len < width {
        return SyncedWindow {
            start: 0,
            len,
            sync_index: None,
        };
    }
    let newest = len - width;
    let sync_index = find_crossing(samples, level, offset);
    let start = match sync_index {
        Some(idx) => (idx + offset).min(newest),
        None => newest,
    };
    SyncedWindow {
        start,
        len: width,
        sync_index,
    }
}

/// Streaming rising-edge detector with hysteresis.
///
/// After an edge fires, the detector only re-arms once the signal has dropped strictly below
/// `level - hysteresis`. The armed state persists across calls.
#[derive(Debug, Clone)]
pub struct EdgeDetector {
    /// Trigger level
    level: f32,
    /// Width of the re-arm band below `level`
    hysteresis: f32,
    /// Signal has been below the re-arm threshold since the last edge
    below: bool,
}

impl EdgeDetector {
    /// New detector, armed
    pub fn new(level: f32, hysteresis: f32) -> Self {
        Self {
            level,
            hysteresis,
            below: true,
        }
    }

    /// Trigger level
    pub fn level(&self) -> f32 {
        self.level
    }

    /// Whether the next crossing of the level will fire
    pub fn is_below(&self) -> bool {
        self.below
    }

    /// Feed one sample; returns `true` on an accepted rising edge
    pub fn update(&mut self, value: f32) -> bool {
        let fired = self.below && value >= self.level;
        if fired {
            self.below = false;
        }
        if value < self.level - self.hysteresis {
            self.below = true;
        }
        fired
    }

    /// Force the armed state, e.g. after a restart
    pub fn rearm(&mut self) {
        self.below = true;
    }
}

/// Interval between consecutive trigger events.
#[derive(Debug, Default, Clone)]
pub struct PeriodMeter {
    /// Most recent event
    last: Option<TriggerEvent>,
    /// Interval ending at `last`
    period: Option<Duration>,
}

impl PeriodMeter {
    /// Record an event and return the interval since the previous one
    pub fn record(&mut self, event: TriggerEvent) -> Option<Duration> {
        if let Some(prev) = self.last {
            self.period = event.timestamp.checked_duration_since(prev.timestamp);
        }
        self.last = Some(event);
        self.period
    }

    /// Latest measured interval
    pub fn period(&self) -> Option<Duration> {
        self.period
    }

    /// Last recorded event
    pub fn last_event(&self) -> Option<TriggerEvent> {
        self.last
    }

    /// Forget history, e.g. when acquisition restarts
    pub fn clear(&mut self) {
        self.last = None;
        self.period = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rising_ramp_crosses_at_first_sample_at_level() {
        let ramp = [0.0, 0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7];
        assert_eq!(find_crossing(&ramp, 0.4, 0), Some(4));
        assert_eq!(find_crossing(&ramp, 0.35, 0), Some(4));
        assert_eq!(find_crossing(&ramp, 0.05, 0), Some(1));
    }

    #[test]
    fn no_crossing_when_always_above() {
        let high = [0.9, 0.8, 1.0, 0.95, 0.85];
        assert_eq!(find_crossing(&high, 0.4, 0), None);
    }

    #[test]
    fn last_sample_is_outside_search_range() {
        let late = [0.0, 0.0, 0.0, 1.0];
        assert_eq!(find_crossing(&late, 0.5, 0), None);
        assert_eq!(find_crossing(&[], 0.5, 0), None);
        assert_eq!(find_crossing(&[1.0], 0.5, 0), None);
    }

    #[test]
    fn falling_through_level_does_not_trigger() {
        let wave = [0.6, 0.4, 0.2, 0.4, 0.6, 0.0];
        assert_eq!(find_crossing(&wave, 0.4, 0), Some(3));
    }

    #[test]
    fn first_edge_wins_and_offset_skips() {
        let wave = [0.0, 1.0, 0.0, 1.0, 0.0, 1.0, 0.0];
        assert_eq!(find_crossing(&wave, 0.5, 0), Some(1));
        assert_eq!(find_crossing(&wave, 0.5, 2), Some(3));
    }

    #[test]
    fn window_aligns_after_crossing_with_offset() {
        let mut samples = [0.0f32; 20];
        samples[5..].iter_mut().for_each(|s| *s = 1.0);
        let window = sync_window(&samples, 8, 0.5, 3);
        assert_eq!(window.sync_index, Some(5));
        assert_eq!(window.start, 8);
        assert_eq!(window.slice(&samples).len(), 8);
    }

    #[test]
    fn window_clamps_and_falls_back() {
        let mut samples = [0.0f32; 10];
        samples[8] = 1.0;
        let window = sync_window(&samples, 6, 0.5, 0);
        assert_eq!(window.sync_index, Some(8));
        assert_eq!(window.start, 4);

        let flat = [0.0f32; 10];
        let window = sync_window(&flat, 6, 0.5, 0);
        assert_eq!((window.start, window.len, window.sync_index), (4, 6, None));

        let short = sync_window(&flat[..3], 6, 0.5, 0);
        assert_eq!((short.start, short.len), (0, 3));
    }

    #[test]
    fn hysteresis_suppresses_shallow_dip() {
        let mut edge = EdgeDetector::new(0.4, 0.05);
        let fired: Vec<bool> = [0.30, 0.45, 0.38, 0.42]
            .iter()
            .map(|&v| edge.update(v))
            .collect();
        assert_eq!(fired, [false, true, false, false]);
        assert!(!edge.is_below());
    }

    #[test]
    fn hysteresis_rearms_below_band() {
        let mut edge = EdgeDetector::new(0.4, 0.05);
        let fired = [0.45, 0.34, 0.42]
            .iter()
            .filter(|&&v| edge.update(v))
            .count();
        assert_eq!(fired, 2);
    }

    #[test]
    fn exactly_at_rearm_threshold_stays_disarmed() {
        let mut edge = EdgeDetector::new(0.5, 0.25);
        assert!(edge.update(0.5));
        assert!(!edge.update(0.25));
        assert!(!edge.update(0.6));
    }

    #[test]
    fn period_between_consecutive_events() {
        let mut meter = PeriodMeter::default();
        let at = |idx: u32, us: u64| TriggerEvent {
            sample_index: SampleCounter::new(idx),
            timestamp: Instant::from_ticks(us),
        };
        assert_eq!(meter.record(at(10, 1_000)), None);
        assert_eq!(meter.record(at(20, 251_000)), Some(Duration::millis(250)));
        assert_eq!(meter.period(), Some(Duration::millis(250)));
        meter.clear();
        assert_eq!(meter.period(), None);
    }
}
