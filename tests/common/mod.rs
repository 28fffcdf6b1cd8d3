// SPDX-License-Identifier: Apache-2.0

//! Hardware stand-ins shared by the integration tests
#![allow(dead_code)]

use core::convert::Infallible;

use acs758_monitor::{
    source::{AdcDma, CONVERSION_12BIT},
    Error, Instant,
};
use embedded_hal::digital::{ErrorType, OutputPin};

/// Surface `log` output with `RUST_LOG=debug cargo test`
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// ADC code for a pin voltage, clamped to the converter range
pub fn code(volts: f32) -> u16 {
    (volts / CONVERSION_12BIT).round().clamp(0.0, 4095.0) as u16
}

/// `samples` codes of `bias + amplitude * sin`, `per_cycle` samples per cycle
pub fn sine_codes(bias: f32, amplitude: f32, per_cycle: usize, samples: usize) -> Vec<u16> {
    (0..samples)
        .map(|i| {
            let phase = 2.0 * std::f32::consts::PI * (i % per_cycle) as f32 / per_cycle as f32;
            code(bias + amplitude * phase.sin())
        })
        .collect()
}

pub fn at_ms(ms: u64) -> Instant {
    Instant::from_ticks(ms * 1000)
}

/// Replays `codes` cyclically, for single reads and block captures alike
#[derive(Default)]
pub struct ScriptedAdc {
    pub codes: Vec<u16>,
    cursor: usize,
    block: Vec<u16>,
    armed: bool,
    /// Transfers never complete, as with a stalled DMA channel
    pub stalled: bool,
    /// Every arming attempt reports the DMA channel as busy
    pub busy: bool,
    pub starts: usize,
    pub stops: usize,
}

impl ScriptedAdc {
    pub fn new(codes: Vec<u16>) -> Self {
        Self {
            codes,
            ..Default::default()
        }
    }

    fn next_code(&mut self) -> u16 {
        let code = self.codes[self.cursor % self.codes.len()];
        self.cursor += 1;
        code
    }
}

impl AdcDma for ScriptedAdc {
    fn configure(&mut self, _channel: u8, _clock_divisor: u16) {}

    fn read_single(&mut self) -> Result<u16, Error> {
        Ok(self.next_code())
    }

    fn start_capture(&mut self, count: usize) -> Result<(), Error> {
        self.starts += 1;
        if self.busy {
            return Err(Error::HardwareBusy);
        }
        self.block = (0..count).map(|_| self.next_code()).collect();
        self.armed = true;
        Ok(())
    }

    fn is_complete(&self) -> bool {
        self.armed && !self.stalled
    }

    fn stop(&mut self) {
        self.armed = false;
        self.stops += 1;
    }

    fn captured(&self) -> Result<&[u16], Error> {
        Ok(&self.block)
    }
}

/// Records the level of the pulse-enable output
#[derive(Default)]
pub struct EnablePin {
    pub high: bool,
}

impl ErrorType for EnablePin {
    type Error = Infallible;
}

impl OutputPin for EnablePin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.high = false;
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.high = true;
        Ok(())
    }
}
