// SPDX-License-Identifier: Apache-2.0

//! State shared between the acquisition context and the presentation context.
//!
//! Both types are built on [`critical_section::Mutex`] so they can live in a `static` visible to
//! both RP2040 cores (or to interrupt handlers on a single core). Every access holds the critical
//! section only for the duration of a copy.

use core::cell::Cell;

use critical_section::Mutex;
use fugit::HertzU32;

use crate::Duration;

/// Latest result published by the acquisition context.
#[derive(Debug, Copy, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Measurement {
    /// RMS current with a signal present, mean current otherwise. A
    pub current_value: f32,
    /// Running maximum of peak currents. A
    pub max_current: f32,
    /// The last window exceeded the trigger threshold
    pub signal_detected: bool,
    /// Time spanned by the last measured window
    pub capture_duration: Duration,
    /// Effective sample rate of the last window
    pub sample_rate: HertzU32,
    /// Interval between the last two trigger events
    pub period: Option<Duration>,
    /// Trigger events counted since the last user reset
    pub event_count: u32,
    /// Acquisition is running
    pub running: bool,
    /// Acquisition was stopped because the period exceeded its limit
    pub fault: bool,
    /// DMA capture has been abandoned for this session in favour of polling
    pub degraded: bool,
    /// Incremented on every write
    pub version: u32,
}

impl Measurement {
    /// Power-on value
    pub const EMPTY: Self = Self {
        current_value: 0.0,
        max_current: 0.0,
        signal_detected: false,
        capture_duration: Duration::from_ticks(0),
        sample_rate: HertzU32::from_raw(0),
        period: None,
        event_count: 0,
        running: false,
        fault: false,
        degraded: false,
        version: 0,
    };
}

impl Default for Measurement {
    fn default() -> Self {
        Self::EMPTY
    }
}

/// Versioned [`Measurement`] behind a critical section.
///
/// Readers always observe a complete record from one write. A [`reset_max`](Self::reset_max)
/// racing a writer's [`update`](Self::update) is resolved by whichever runs last.
pub struct SharedMeasurement {
    /// Protected record
    inner: Mutex<Cell<Measurement>>,
}

impl SharedMeasurement {
    /// Empty record, usable in a `static`
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(Cell::new(Measurement::EMPTY)),
        }
    }

    /// Replace the stored record. The version is taken over from the stored record and bumped.
    pub fn write(&self, measurement: Measurement) {
        critical_section::with(|cs| {
            let cell = self.inner.borrow(cs);
            let mut next = measurement;
            next.version = cell.get().version.wrapping_add(1);
            cell.set(next);
        });
    }

    /// Modify the stored record in place within one critical section and return the new value.
    ///
    /// Used by the writer to merge its running maximum against the stored one, so that a reset
    /// from the consumer is not undone by a stale maximum held elsewhere.
    pub fn update<F: FnOnce(&mut Measurement)>(&self, f: F) -> Measurement {
        critical_section::with(|cs| {
            let cell = self.inner.borrow(cs);
            let mut next = cell.get();
            f(&mut next);
            next.version = cell.get().version.wrapping_add(1);
            cell.set(next);
            next
        })
    }

    /// Copy of the latest record
    pub fn read_snapshot(&self) -> Measurement {
        critical_section::with(|cs| self.inner.borrow(cs).get())
    }

    /// Clear the running maximum and the signal flag
    pub fn reset_max(&self) {
        self.update(|m| {
            m.max_current = 0.0;
            m.signal_detected = false;
        });
    }
}

impl Default for SharedMeasurement {
    fn default() -> Self {
        Self::new()
    }
}

/// Pending user actions, raised by the presentation context and consumed at the top of the next
/// acquisition tick.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Requests {
    /// Begin acquisition
    pub start: bool,
    /// Stop acquisition and tear down any transfer
    pub stop: bool,
    /// Clear event count and period history
    pub reset: bool,
}

/// Request flags behind a critical section. Flags stay raised until taken, so a request is never
/// lost between two ticks.
pub struct ControlRequests {
    /// Raised flags
    inner: Mutex<Cell<Requests>>,
}

impl ControlRequests {
    /// No pending requests, usable in a `static`
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(Cell::new(Requests {
                start: false,
                stop: false,
                reset: false,
            })),
        }
    }

    /// Raise the start flag, clearing a pending stop
    pub fn request_start(&self) {
        self.modify(|r| {
            r.start = true;
            r.stop = false;
        });
    }

    /// Raise the stop flag, clearing a pending start
    pub fn request_stop(&self) {
        self.modify(|r| {
            r.stop = true;
            r.start = false;
        });
    }

    /// Raise the reset flag
    pub fn request_reset(&self) {
        self.modify(|r| r.reset = true);
    }

    /// Start when `running` is false, stop otherwise
    pub fn toggle(&self, running: bool) {
        if running {
            self.request_stop();
        } else {
            self.request_start();
        }
    }

    /// Take all pending flags, leaving none raised
    pub fn take(&self) -> Requests {
        critical_section::with(|cs| self.inner.borrow(cs).take())
    }

    /// Apply `f` to the flags within one critical section
    fn modify<F: FnOnce(&mut Requests)>(&self, f: F) {
        critical_section::with(|cs| {
            let cell = self.inner.borrow(cs);
            let mut requests = cell.get();
            f(&mut requests);
            cell.set(requests);
        });
    }
}

impl Default for ControlRequests {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_bumps_version_and_replaces_fields() {
        let shared = SharedMeasurement::new();
        shared.write(Measurement {
            current_value: 1.5,
            max_current: 3.0,
            signal_detected: true,
            ..Measurement::EMPTY
        });
        let snapshot = shared.read_snapshot();
        assert_eq!(snapshot.version, 1);
        assert_eq!(snapshot.current_value, 1.5);
        assert!(snapshot.signal_detected);

        shared.write(Measurement::EMPTY);
        assert_eq!(shared.read_snapshot().version, 2);
        assert_eq!(shared.read_snapshot().max_current, 0.0);
    }

    #[test]
    fn reset_max_clears_maximum_and_signal() {
        let shared = SharedMeasurement::new();
        shared.update(|m| {
            m.max_current = 12.0;
            m.signal_detected = true;
            m.current_value = 4.0;
        });
        shared.reset_max();
        let snapshot = shared.read_snapshot();
        assert_eq!(snapshot.max_current, 0.0);
        assert!(!snapshot.signal_detected);
        assert_eq!(snapshot.current_value, 4.0);
    }

    #[test]
    fn requests_are_taken_once() {
        let requests = ControlRequests::new();
        requests.request_start();
        requests.request_reset();
        let taken = requests.take();
        assert!(taken.start && taken.reset && !taken.stop);
        assert_eq!(requests.take(), Requests::default());
    }

    #[test]
    fn toggle_follows_running_state() {
        let requests = ControlRequests::new();
        requests.toggle(false);
        requests.toggle(true);
        let taken = requests.take();
        assert!(taken.stop);
        assert!(!taken.start);
    }
}
