// SPDX-License-Identifier: Apache-2.0

//! Presentation context: buttons in, snapshots out.
//!
//! Nothing here touches acquisition state. User actions become [`ControlRequests`] flags and
//! the display only ever sees copies taken with [`SharedMeasurement::read_snapshot`].

use embedded_hal::digital::InputPin;

use crate::{
    error::Error,
    shared::{ControlRequests, Measurement, SharedMeasurement},
};

/// Tick-driven debouncer for a push button.
///
/// The pin must agree with itself for `stable_ticks` consecutive polls before a change of state
/// is accepted. A press is reported once, on the accepted transition to pressed.
pub struct Debouncer<P> {
    /// Button input
    pin: P,
    /// Pressed reads low (button to ground with a pull-up)
    active_low: bool,
    /// Polls required to accept a change
    stable_ticks: u8,
    /// Consecutive polls disagreeing with `pressed`
    pending: u8,
    /// Accepted state
    pressed: bool,
}

impl<P: InputPin> Debouncer<P> {
    /// Wrap `pin`, initially released
    pub fn new(pin: P, active_low: bool, stable_ticks: u8) -> Self {
        Self {
            pin,
            active_low,
            stable_ticks: stable_ticks.max(1),
            pending: 0,
            pressed: false,
        }
    }

    /// Accepted state
    pub fn is_pressed(&self) -> bool {
        self.pressed
    }

    /// Sample the pin; `true` on an accepted press
    pub fn poll(&mut self) -> Result<bool, Error> {
        let level_low = self.pin.is_low().map_err(|_| Error::Hardware)?;
        let raw = level_low == self.active_low;
        if raw == self.pressed {
            self.pending = 0;
            return Ok(false);
        }
        self.pending += 1;
        if self.pending < self.stable_ticks {
            return Ok(false);
        }
        self.pending = 0;
        self.pressed = raw;
        Ok(raw)
    }
}

/// Render collaborator
pub trait MeasurementSink {
    /// Show one snapshot
    fn render(&mut self, measurement: &Measurement);
}

/// One presentation loop: start/stop and reset buttons plus a display.
pub struct Presentation<'a, SS, RS, D> {
    /// Start/stop toggle
    start_stop: Debouncer<SS>,
    /// Maximum and counter reset
    reset: Debouncer<RS>,
    /// Where snapshots go
    display: D,
    /// Published results
    shared: &'a SharedMeasurement,
    /// User actions for the acquisition context
    requests: &'a ControlRequests,
}

impl<'a, SS, RS, D> Presentation<'a, SS, RS, D>
where
    SS: InputPin,
    RS: InputPin,
    D: MeasurementSink,
{
    /// Assemble a presentation loop
    pub fn new(
        start_stop: Debouncer<SS>,
        reset: Debouncer<RS>,
        display: D,
        shared: &'a SharedMeasurement,
        requests: &'a ControlRequests,
    ) -> Self {
        Self {
            start_stop,
            reset,
            display,
            shared,
            requests,
        }
    }

    /// Handle buttons and render the latest snapshot, which is returned.
    ///
    /// A button read fault skips that button for this tick.
    pub fn tick(&mut self) -> Measurement {
        let snapshot = self.shared.read_snapshot();
        match self.start_stop.poll() {
            Ok(true) => {
                info!("start/stop pressed");
                self.requests.toggle(snapshot.running);
            }
            Ok(false) => {}
            Err(err) => warn!("start/stop button: {}", err),
        }
        let snapshot = match self.reset.poll() {
            Ok(true) => {
                info!("reset pressed");
                self.shared.reset_max();
                self.requests.request_reset();
                self.shared.read_snapshot()
            }
            Ok(false) => snapshot,
            Err(err) => {
                warn!("reset button: {}", err);
                snapshot
            }
        };
        self.display.render(&snapshot);
        snapshot
    }

    /// Display collaborator
    pub fn display(&mut self) -> &mut D {
        &mut self.display
    }
}

#[cfg(test)]
mod tests {
    use core::{cell::Cell, convert::Infallible};

    use embedded_hal::digital::ErrorType;

    use super::*;

    /// Input pin replaying a script of levels, then holding the last one
    struct ScriptPin<'a> {
        levels: &'a [bool],
        at: Cell<usize>,
    }

    impl<'a> ScriptPin<'a> {
        fn new(levels: &'a [bool]) -> Self {
            Self {
                levels,
                at: Cell::new(0),
            }
        }
    }

    impl ErrorType for ScriptPin<'_> {
        type Error = Infallible;
    }

    impl InputPin for ScriptPin<'_> {
        fn is_high(&mut self) -> Result<bool, Self::Error> {
            let i = self.at.get();
            self.at.set(i + 1);
            Ok(self.levels[i.min(self.levels.len() - 1)])
        }

        fn is_low(&mut self) -> Result<bool, Self::Error> {
            self.is_high().map(|high| !high)
        }
    }

    #[derive(Default)]
    struct Recorder {
        frames: Vec<Measurement>,
    }

    impl MeasurementSink for Recorder {
        fn render(&mut self, measurement: &Measurement) {
            self.frames.push(*measurement);
        }
    }

    const H: bool = true;
    const L: bool = false;

    #[test]
    fn bounce_yields_single_press() {
        let mut button = Debouncer::new(ScriptPin::new(&[H, L, H, L, L, L, L, L, H, H, H]), true, 3);
        let presses: Vec<bool> = (0..11).map(|_| button.poll().unwrap()).collect();
        assert_eq!(presses.iter().filter(|&&p| p).count(), 1);
        assert!(presses[5]);
        assert!(!button.is_pressed());
    }

    #[test]
    fn held_button_reports_once() {
        let mut button = Debouncer::new(ScriptPin::new(&[L]), true, 2);
        let presses = (0..10).filter(|_| button.poll().unwrap()).count();
        assert_eq!(presses, 1);
        assert!(button.is_pressed());
    }

    #[test]
    fn active_high_button() {
        let mut button = Debouncer::new(ScriptPin::new(&[L, H]), false, 1);
        assert!(!button.poll().unwrap());
        assert!(button.poll().unwrap());
    }

    #[test]
    fn buttons_become_requests() {
        let shared = SharedMeasurement::new();
        let requests = ControlRequests::new();
        shared.update(|m| {
            m.max_current = 7.0;
            m.signal_detected = true;
        });
        let mut ui = Presentation::new(
            Debouncer::new(ScriptPin::new(&[L]), true, 1),
            Debouncer::new(ScriptPin::new(&[H, L]), true, 1),
            Recorder::default(),
            &shared,
            &requests,
        );

        let first = ui.tick();
        assert_eq!(first.max_current, 7.0);
        let taken = requests.take();
        assert!(taken.start && !taken.reset);

        let second = ui.tick();
        assert_eq!(second.max_current, 0.0);
        assert!(requests.take().reset);
        assert_eq!(ui.display().frames.len(), 2);
    }

    #[test]
    fn start_stop_toggles_on_running_flag() {
        let shared = SharedMeasurement::new();
        let requests = ControlRequests::new();
        shared.update(|m| m.running = true);
        let mut ui = Presentation::new(
            Debouncer::new(ScriptPin::new(&[L]), true, 1),
            Debouncer::new(ScriptPin::new(&[H]), true, 1),
            Recorder::default(),
            &shared,
            &requests,
        );
        ui.tick();
        assert!(requests.take().stop);
    }
}
