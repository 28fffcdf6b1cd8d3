// SPDX-License-Identifier: Apache-2.0

//! ADC sample sources.
//!
//! [`SampleSource`] wraps an [`AdcDma`] collaborator and hides whether a reading is taken by
//! single-shot polling ([`SampleSource::read_one`]) or by a hardware block transfer
//! ([`SampleSource::start_capture`], [`SampleSource::poll_complete`], [`SampleSource::drain`]).

use fugit::HertzU32;

use crate::error::Error;

/// ADC reference voltage on the Pico board
pub const ADC_VREF: f32 = 3.3;
/// Full-scale code of the 12-bit RP2040 ADC
pub const ADC_FULL_SCALE: u16 = 4095;
/// Volts per code for a 12-bit reading against [`ADC_VREF`]
pub const CONVERSION_12BIT: f32 = ADC_VREF / ADC_FULL_SCALE as f32;
/// The RP2040 ADC is clocked from the 48 MHz USB PLL
pub const ADC_CLOCK_HZ: u32 = 48_000_000;
/// One conversion takes 96 ADC clock cycles (500 ksamples/s back to back)
const CYCLES_PER_CONVERSION: u32 = 96;

/// A single ADC code, together with the factor that converts it to volts.
#[derive(Debug, Copy, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RawSample {
    /// Unsigned ADC result
    pub code: u16,
    /// Volts per code
    pub conversion: f32,
}

impl RawSample {
    /// Voltage at the ADC pin
    pub fn voltage(&self) -> f32 {
        self.code as f32 * self.conversion
    }
}

/// Hardware ADC + DMA collaborator.
///
/// Implementations own the destination buffer of block transfers, which is allocated once at
/// start-up and reused for every capture.
pub trait AdcDma {
    /// Select the input channel and the free-running clock divisor
    fn configure(&mut self, channel: u8, clock_divisor: u16);
    /// Blocking single conversion, bounded by the hardware conversion time
    fn read_single(&mut self) -> Result<u16, Error>;
    /// Program a transfer of `count` results into the destination buffer and arm the ADC
    fn start_capture(&mut self, count: usize) -> Result<(), Error>;
    /// Whether the armed transfer has moved all requested results
    fn is_complete(&self) -> bool;
    /// Abort the transfer and pause the ADC. Must be safe to call when nothing is armed.
    fn stop(&mut self);
    /// Results of the last completed transfer
    fn captured(&self) -> Result<&[u16], Error>;
}

/// Lifecycle guard around an [`AdcDma`] collaborator.
pub struct SampleSource<H> {
    /// Hardware collaborator
    hw: H,
    /// Volts per code applied to every sample
    conversion: f32,
    /// Depth of the capture currently in flight
    active: Option<usize>,
}

impl<H: AdcDma> SampleSource<H> {
    /// Wrap an already configured collaborator
    pub fn new(hw: H, conversion: f32) -> Self {
        Self {
            hw,
            conversion,
            active: None,
        }
    }

    /// Volts per code
    pub fn conversion(&self) -> f32 {
        self.conversion
    }

    /// A capture has been started and not yet drained or stopped
    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Take one polled reading.
    ///
    /// Fails with [`Error::HardwareBusy`] while a block capture owns the ADC.
    pub fn read_one(&mut self) -> Result<RawSample, Error> {
        if self.active.is_some() {
            return Err(Error::HardwareBusy);
        }
        let code = self.hw.read_single()?;
        Ok(RawSample {
            code,
            conversion: self.conversion,
        })
    }

    /// Arm a block capture of `depth` samples. Returns immediately.
    ///
    /// A capture that completed but was never drained is discarded; one still in flight makes
    /// this fail with [`Error::HardwareBusy`].
    pub fn start_capture(&mut self, depth: usize) -> Result<(), Error> {
        if self.active.is_some() {
            if !self.hw.is_complete() {
                return Err(Error::HardwareBusy);
            }
            self.active = None;
            debug!("discarding completed capture that was never drained");
        }
        if depth == 0 {
            return Err(Error::InvalidConfig);
        }
        self.hw.start_capture(depth)?;
        self.active = Some(depth);
        debug!("capture armed for {} samples", depth);
        Ok(())
    }

    /// Non-blocking completion check
    pub fn poll_complete(&self) -> bool {
        self.active.is_some() && self.hw.is_complete()
    }

    /// Hand out the samples of a completed capture. The capture is released either way once the
    /// transfer has completed, so the next [`start_capture`](Self::start_capture) can proceed.
    pub fn drain(&mut self) -> Result<impl Iterator<Item = RawSample> + '_, Error> {
        if !self.poll_complete() {
            return Err(Error::NotReady);
        }
        let depth = self.active.take().unwrap_or(0);
        let conversion = self.conversion;
        let block = self.hw.captured()?;
        Ok(block.iter().take(depth).map(move |&code| RawSample { code, conversion }))
    }

    /// Tear down any capture in flight. Idempotent.
    pub fn stop_capture(&mut self) {
        if self.active.take().is_some() {
            self.hw.stop();
            debug!("capture stopped");
        }
    }

    /// Access the collaborator
    pub fn hardware(&mut self) -> &mut H {
        &mut self.hw
    }
}

/// Integer clock divisor giving `rate` from [`ADC_CLOCK_HZ`].
///
/// Rates at or above 500 kHz map to 0 (back-to-back conversions).
pub fn clock_divisor(rate: HertzU32) -> Result<u16, Error> {
    let hz = rate.raw();
    if hz == 0 {
        return Err(Error::InvalidConfig);
    }
    let cycles = ADC_CLOCK_HZ / hz;
    if cycles <= CYCLES_PER_CONVERSION {
        return Ok(0);
    }
    u16::try_from(cycles - 1).map_err(|_| Error::InvalidConfig)
}

/// Effective sample rate for a clock divisor
pub fn sample_rate(divisor: u16) -> HertzU32 {
    let cycles = (divisor as u32 + 1).max(CYCLES_PER_CONVERSION);
    HertzU32::from_raw(ADC_CLOCK_HZ / cycles)
}

#[cfg(test)]
pub(crate) mod mock {
    //! In-memory ADC used by unit tests
    use super::*;

    /// Replays a fixed waveform: polled reads walk through `codes` cyclically, block captures
    /// copy the next `count` codes.
    #[derive(Default)]
    pub struct MockAdc {
        pub codes: Vec<u16>,
        pub cursor: usize,
        pub armed: Option<usize>,
        pub complete_after_polls: usize,
        pub polls: core::cell::Cell<usize>,
        pub block: Vec<u16>,
        pub fail_reads: bool,
        pub fail_captures: bool,
        pub never_complete: bool,
        pub refuse_arming: Option<Error>,
        pub starts: usize,
        pub stops: usize,
        pub configured: Option<(u8, u16)>,
    }

    impl MockAdc {
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

    impl AdcDma for MockAdc {
        fn configure(&mut self, channel: u8, clock_divisor: u16) {
            self.configured = Some((channel, clock_divisor));
        }

        fn read_single(&mut self) -> Result<u16, Error> {
            if self.fail_reads {
                return Err(Error::Hardware);
            }
            Ok(self.next_code())
        }

        fn start_capture(&mut self, count: usize) -> Result<(), Error> {
            self.starts += 1;
            if let Some(err) = self.refuse_arming {
                return Err(err);
            }
            self.armed = Some(count);
            self.polls.set(0);
            self.block.clear();
            for _ in 0..count {
                let code = self.next_code();
                self.block.push(code);
            }
            Ok(())
        }

        fn is_complete(&self) -> bool {
            if self.never_complete || self.armed.is_none() {
                return false;
            }
            self.polls.set(self.polls.get() + 1);
            self.polls.get() > self.complete_after_polls
        }

        fn stop(&mut self) {
            self.armed = None;
            self.stops += 1;
        }

        fn captured(&self) -> Result<&[u16], Error> {
            if self.fail_captures {
                return Err(Error::Hardware);
            }
            Ok(&self.block)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockAdc;
    use super::*;

    #[test]
    fn second_start_is_rejected_until_stopped() {
        let mut adc = MockAdc::new(vec![1, 2, 3]);
        adc.never_complete = true;
        let mut source = SampleSource::new(adc, CONVERSION_12BIT);
        source.start_capture(3).unwrap();
        assert_eq!(source.start_capture(3), Err(Error::HardwareBusy));
        source.stop_capture();
        source.stop_capture();
        assert_eq!(source.hardware().stops, 1);
        assert!(source.start_capture(3).is_ok());
    }

    #[test]
    fn completed_capture_does_not_block_rearming() {
        let mut source = SampleSource::new(MockAdc::new(vec![1, 2, 3]), CONVERSION_12BIT);
        source.start_capture(3).unwrap();
        assert!(source.poll_complete());
        assert!(source.start_capture(3).is_ok());
        assert!(source.is_active());
        assert_eq!(source.hardware().starts, 2);
    }

    #[test]
    fn drain_before_completion_is_not_ready() {
        let mut adc = MockAdc::new(vec![10, 20]);
        adc.complete_after_polls = 5;
        let mut source = SampleSource::new(adc, 1.0);
        source.start_capture(2).unwrap();
        assert_eq!(source.drain().err(), Some(Error::NotReady));
    }

    #[test]
    fn drained_block_is_converted_and_releases_capture() {
        let mut source = SampleSource::new(MockAdc::new(vec![0, 4095]), CONVERSION_12BIT);
        source.start_capture(2).unwrap();
        assert!(source.poll_complete());
        let volts: Vec<f32> = source.drain().unwrap().map(|s| s.voltage()).collect();
        assert_eq!(volts.len(), 2);
        assert_eq!(volts[0], 0.0);
        assert!((volts[1] - ADC_VREF).abs() < 1e-4);
        assert!(!source.is_active());
    }

    #[test]
    fn polling_is_blocked_during_capture() {
        let mut source = SampleSource::new(MockAdc::new(vec![7]), 1.0);
        assert_eq!(source.read_one().unwrap().code, 7);
        source.start_capture(1).unwrap();
        assert_eq!(source.read_one(), Err(Error::HardwareBusy));
    }

    #[test]
    fn divisor_round_trips_to_rate() {
        assert_eq!(clock_divisor(HertzU32::from_raw(500_000)), Ok(0));
        assert_eq!(sample_rate(0).raw(), 500_000);
        let div = clock_divisor(HertzU32::from_raw(10_000)).unwrap();
        assert_eq!(div, 4799);
        assert_eq!(sample_rate(div).raw(), 10_000);
        assert_eq!(clock_divisor(HertzU32::from_raw(0)), Err(Error::InvalidConfig));
    }
}
