// SPDX-License-Identifier: Apache-2.0

//! Acquisition state machine.
//!
//! [`AcquisitionController`] owns every piece of mutable acquisition state: the sample source,
//! filter, capture buffer, trigger tracking and estimator. It is driven by [`tick`] from a
//! periodic timer in the acquisition context and publishes results into a
//! [`SharedMeasurement`]. User actions arrive through [`ControlRequests`] and are taken at the
//! top of every tick.
//!
//! Burst modes walk `Idle → Arming → Draining → Measuring → PublishingResult → Idle`, with
//! `Arming` spanning as many ticks as the DMA transfer needs. [`CaptureMode::Polling`] collapses
//! arming and draining into a per-tick sampling loop over a sliding ring buffer.
//!
//! [`tick`]: AcquisitionController::tick

use embedded_hal::digital::OutputPin;
use fugit::HertzU32;

use crate::{
    buffer::{BufferMode, CaptureBuffer, SampleCounter},
    current::{CurrentEstimator, WindowStats},
    error::Error,
    filter::MovingAverage,
    shared::{ControlRequests, Measurement, SharedMeasurement},
    source::{self, AdcDma, SampleSource},
    trigger::{sync_window, EdgeDetector, PeriodMeter, TriggerEvent},
    Duration, Instant,
};

/// How samples are acquired.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CaptureMode {
    /// One polled conversion per sample into a ring buffer (oscilloscope mode)
    Polling,
    /// Hardware block transfers through the HAL DMA abstraction (pulse capture mode)
    BurstDma,
    /// Hardware block transfers programmed directly through the DMA registers
    RawRegisterDma,
}

impl CaptureMode {
    /// Uses block captures
    pub fn is_burst(&self) -> bool {
        !matches!(self, CaptureMode::Polling)
    }
}

/// Controller state.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum State {
    /// Nothing in flight
    Idle,
    /// Block capture started, awaiting hardware completion
    Arming,
    /// Transfer complete, extracting samples
    Draining,
    /// Running the estimator
    Measuring,
    /// Writing the result to the shared record
    PublishingResult,
}

/// Result of one [`AcquisitionController::tick`].
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum TickOutcome {
    /// Acquisition is not running
    Stopped,
    /// Waiting on hardware, or a transient fault will be retried next tick
    Waiting,
    /// A new measurement was written to the shared record
    Published(Measurement),
}

/// Compiled-in acquisition settings.
#[derive(Debug, Copy, Clone)]
pub struct AcquisitionConfig {
    /// Acquisition strategy
    pub mode: CaptureMode,
    /// Key into [`PROFILES`](crate::current::PROFILES)
    pub sensor: &'static str,
    /// Sensor supply, V. 3.3 selects the 3.3 V calibration, anything else the 5 V one.
    pub supply_voltage: f32,
    /// Divider ratio from sensor output to ADC pin
    pub divider: f32,
    /// ADC input (0-3 are GPIO26-29)
    pub adc_channel: u8,
    /// Volts per ADC code
    pub conversion: f32,
    /// Sample rate. Polling: rate of the timer calling `tick` times `samples_per_tick`. Burst:
    /// requested free-running ADC rate.
    pub sample_rate: HertzU32,
    /// Moving-average window
    pub filter_window: usize,
    /// Rising-edge trigger level and signal-detection threshold, pin V
    pub trigger_level: f32,
    /// Re-arm band below `trigger_level`, V
    pub hysteresis: f32,
    /// Samples to skip before searching for, and after aligning to, a crossing
    pub sync_offset: usize,
    /// Samples in one displayed/measured window (polling)
    pub display_width: usize,
    /// Ring capacity as a multiple of `display_width` (polling)
    pub buffer_multiplier: usize,
    /// Conversions per tick (polling)
    pub samples_per_tick: usize,
    /// Samples per block capture (burst)
    pub capture_depth: usize,
    /// Longest wait for a DMA transfer before falling back to polling for that cycle
    pub capture_timeout: Duration,
    /// Longest wait for an in-flight transfer after a stop request
    pub stop_timeout: Duration,
    /// Reset the maximum after this long without a signal
    pub max_hold_timeout: Duration,
    /// Stop with a fault if the period between trigger events exceeds this
    pub period_limit: Duration,
    /// Consecutive DMA faults before polling for the rest of the session
    pub max_dma_failures: u8,
}

impl AcquisitionConfig {
    /// Pico Display board with an ACS758-100U on a 5 V supply behind a 1.6k/3.14k divider
    pub const DEFAULT: Self = Self {
        mode: CaptureMode::RawRegisterDma,
        sensor: "100U",
        supply_voltage: 5.0,
        divider: 3140.0 / (1600.0 + 3140.0),
        adc_channel: 2,
        conversion: source::CONVERSION_12BIT,
        sample_rate: HertzU32::from_raw(10_000),
        filter_window: 5,
        trigger_level: 0.4,
        hysteresis: 0.05,
        sync_offset: 3,
        display_width: 240,
        buffer_multiplier: 1,
        samples_per_tick: 10,
        capture_depth: 1000,
        capture_timeout: Duration::millis(200),
        stop_timeout: Duration::millis(100),
        max_hold_timeout: Duration::millis(5000),
        period_limit: Duration::millis(2000),
        max_dma_failures: 3,
    };

    /// Ring buffer capacity in polling mode
    pub fn ring_capacity(&self) -> usize {
        self.display_width * self.buffer_multiplier
    }

    /// Check values that no other constructor covers
    pub fn validate(&self) -> Result<(), Error> {
        let invalid = self.sample_rate.raw() == 0
            || self.display_width == 0
            || self.buffer_multiplier == 0
            || self.samples_per_tick == 0
            || self.capture_depth == 0
            || !(self.hysteresis >= 0.0)
            || !(self.conversion > 0.0);
        if invalid {
            return Err(Error::InvalidConfig);
        }
        Ok(())
    }
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Trigger bookkeeping across ticks
#[derive(Debug, Clone)]
struct EventTracker {
    /// Hysteresis edge detector
    edge: EdgeDetector,
    /// Interval between accepted edges
    period: PeriodMeter,
    /// Stream position of the next sample
    counter: SampleCounter,
    /// Accepted edges since the last user reset
    count: u32,
    /// Last time a signal was seen, for the maximum hold timeout
    last_signal_at: Option<Instant>,
}

impl EventTracker {
    /// Feed one filtered sample taken at `timestamp`
    fn observe(&mut self, filtered: f32, timestamp: Instant) -> Option<TriggerEvent> {
        let sample_index = self.counter;
        self.counter.increment();
        if !self.edge.update(filtered) {
            return None;
        }
        let event = TriggerEvent {
            sample_index,
            timestamp,
        };
        self.count = self.count.wrapping_add(1);
        self.last_signal_at = Some(timestamp);
        self.period.record(event);
        Some(event)
    }
}

/// Elapsed time from `since` to `now`, zero if `now` is earlier
fn elapsed(since: Instant, now: Instant) -> Duration {
    now.checked_duration_since(since)
        .unwrap_or(Duration::from_ticks(0))
}

/// Orchestrates acquisition, filtering, triggering and estimation.
///
/// `N` is the compiled capacity of the capture buffer; it must hold either the ring
/// (`display_width * buffer_multiplier`) or one block (`capture_depth`).
pub struct AcquisitionController<'a, H, EN, const N: usize> {
    /// Compiled-in settings
    config: AcquisitionConfig,
    /// ADC access
    source: SampleSource<H>,
    /// Smoothing applied to every sample
    filter: MovingAverage,
    /// Calibration for the configured sensor
    estimator: CurrentEstimator,
    /// Filtered samples of the current window
    buffer: CaptureBuffer<N>,
    /// Last trigger-aligned window, kept for the display after the ring is consumed
    display: CaptureBuffer<N>,
    /// Trigger events and period
    events: EventTracker,
    /// Pulse-enable output, high while running
    enable: EN,
    /// Published results
    shared: &'a SharedMeasurement,
    /// Pending user actions
    requests: &'a ControlRequests,
    /// State machine position
    state: State,
    /// Acquisition has been started and not stopped
    running: bool,
    /// Stopped by the period limit
    fault: bool,
    /// DMA abandoned for the session
    degraded: bool,
    /// DMA faults since the last successful transfer
    dma_failures: u8,
    /// Effective sample rate
    sample_rate: HertzU32,
    /// Time between samples
    sample_period: Duration,
    /// Start of the capture in flight
    armed_at: Instant,
    /// Stop requested while a transfer was in flight
    stop_deadline: Option<Instant>,
    /// Aggregate of the window awaiting publication
    pending: WindowStats,
    /// Samples in the window awaiting publication
    pending_len: usize,
}

impl<'a, H, EN, const N: usize> AcquisitionController<'a, H, EN, N>
where
    H: AdcDma,
    EN: OutputPin,
{
    /// Build a controller and configure the ADC.
    ///
    /// Fails with [`Error::InvalidProfile`] for an unknown sensor or zero-scale calibration, and
    /// with [`Error::InvalidConfig`] when the configuration does not fit `N`.
    pub fn new(
        config: AcquisitionConfig,
        mut hw: H,
        mut enable: EN,
        shared: &'a SharedMeasurement,
        requests: &'a ControlRequests,
    ) -> Result<Self, Error> {
        config.validate()?;
        let estimator =
            CurrentEstimator::for_sensor(config.sensor, config.supply_voltage, config.divider)?;
        let filter = MovingAverage::new(config.filter_window)?;
        let buffer = if config.mode.is_burst() {
            CaptureBuffer::new(BufferMode::Block, config.capture_depth)?
        } else {
            CaptureBuffer::new(BufferMode::Ring, config.ring_capacity())?
        };

        let display = CaptureBuffer::new(BufferMode::Block, config.display_width.min(N))?;

        // Polled reads are paced by the tick, so only block captures use the clock divider
        let sample_rate = if config.mode.is_burst() {
            let divisor = source::clock_divisor(config.sample_rate)?;
            hw.configure(config.adc_channel, divisor);
            source::sample_rate(divisor)
        } else {
            hw.configure(config.adc_channel, 0);
            config.sample_rate
        };
        let sample_period = Duration::from_ticks((1_000_000 / sample_rate.raw()).max(1) as u64);

        if enable.set_low().is_err() {
            warn!("failed to drive pulse enable output");
        }
        info!(
            "acquisition configured: {:?}, {} Hz, sensor {}",
            config.mode,
            sample_rate.raw(),
            estimator.profile().name
        );

        Ok(Self {
            config,
            source: SampleSource::new(hw, config.conversion),
            filter,
            estimator,
            buffer,
            display,
            events: EventTracker {
                edge: EdgeDetector::new(config.trigger_level, config.hysteresis),
                period: PeriodMeter::default(),
                counter: SampleCounter::default(),
                count: 0,
                last_signal_at: None,
            },
            enable,
            shared,
            requests,
            state: State::Idle,
            running: false,
            fault: false,
            degraded: false,
            dma_failures: 0,
            sample_rate,
            sample_period,
            armed_at: Instant::from_ticks(0),
            stop_deadline: None,
            pending: WindowStats::default(),
            pending_len: 0,
        })
    }

    /// Advance the state machine. Never blocks on hardware.
    pub fn tick(&mut self, now: Instant) -> TickOutcome {
        self.handle_requests(now);
        if let Some(deadline) = self.stop_deadline {
            return self.finish_stop(now, deadline);
        }
        if !self.running {
            return TickOutcome::Stopped;
        }
        if self.config.mode.is_burst() {
            self.burst_step(now)
        } else {
            self.poll_step(now)
        }
    }

    /// Current state
    pub fn state(&self) -> State {
        self.state
    }

    /// Acquisition is running
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// DMA has been abandoned for the session
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// Trigger events since the last reset
    pub fn event_count(&self) -> u32 {
        self.events.count
    }

    /// Most recent accepted trigger event
    pub fn last_event(&self) -> Option<TriggerEvent> {
        self.events.period.last_event()
    }

    /// Effective sample rate
    pub fn sample_rate(&self) -> HertzU32 {
        self.sample_rate
    }

    /// Settings in use
    pub fn config(&self) -> &AcquisitionConfig {
        &self.config
    }

    /// Calibration in use
    pub fn estimator(&self) -> &CurrentEstimator {
        &self.estimator
    }

    /// Filtered samples of the last measured window, oldest first: the trigger-aligned window
    /// in polling mode, the whole block otherwise. Only for a display running in the
    /// acquisition context.
    pub fn waveform(&mut self) -> &[f32] {
        if self.config.mode.is_burst() {
            self.buffer.as_slice()
        } else {
            self.display.as_slice()
        }
    }

    /// ADC collaborator
    pub fn hardware(&mut self) -> &mut H {
        self.source.hardware()
    }

    /// Pulse-enable output
    pub fn enable_output(&mut self) -> &mut EN {
        &mut self.enable
    }

    /// Take and apply pending user actions
    fn handle_requests(&mut self, now: Instant) {
        let requests = self.requests.take();
        if requests.reset {
            self.events.count = 0;
            self.events.period.clear();
            info!("event counter reset");
        }
        let stop_pending = self.stop_deadline.is_some();
        if requests.stop && !stop_pending && (self.running || self.source.is_active()) {
            self.begin_stop(now);
        }
        if requests.start && !self.running {
            if self.stop_deadline.is_some() {
                // Retry once the previous transfer has been torn down
                self.requests.request_start();
            } else {
                self.start();
            }
        }
    }

    /// Enter the running state from scratch
    fn start(&mut self) {
        self.running = true;
        self.fault = false;
        self.state = State::Idle;
        self.filter.clear();
        self.buffer.clear();
        self.events.edge.rearm();
        self.events.period.clear();
        self.set_enable(true);
        info!("acquisition started");
        self.publish_status();
    }

    /// Stop acquisition, waiting up to `stop_timeout` for a transfer in flight
    fn begin_stop(&mut self, now: Instant) {
        self.running = false;
        self.set_enable(false);
        info!("acquisition stop requested");
        if self.source.is_active() {
            self.stop_deadline = Some(now + self.config.stop_timeout);
        } else {
            self.state = State::Idle;
        }
        self.publish_status();
    }

    /// Tear down the transfer once it completes or the deadline passes
    fn finish_stop(&mut self, now: Instant, deadline: Instant) -> TickOutcome {
        let complete = self.source.poll_complete();
        if !complete && now < deadline {
            return TickOutcome::Waiting;
        }
        if !complete {
            warn!("capture still in flight after stop timeout, forcing stop");
        }
        self.source.stop_capture();
        self.stop_deadline = None;
        self.state = State::Idle;
        self.publish_status();
        TickOutcome::Stopped
    }

    /// Continuous mode: sample, then measure the synchronised window
    fn poll_step(&mut self, now: Instant) -> TickOutcome {
        self.state = State::Measuring;
        for i in 0..self.config.samples_per_tick {
            let raw = match self.source.read_one() {
                Ok(raw) => raw,
                Err(err) => {
                    warn!("ADC read failed, retrying next tick: {}", err);
                    self.state = State::Idle;
                    return TickOutcome::Waiting;
                }
            };
            let timestamp = self.sample_time(now, i);
            self.ingest(raw.voltage(), timestamp);
        }

        let samples = self.buffer.as_slice();
        let window = sync_window(
            samples,
            self.config.display_width,
            self.config.trigger_level,
            self.config.sync_offset,
        );
        let shown = window.slice(samples);
        self.pending = WindowStats::from_samples(shown);
        self.pending_len = window.len;
        self.display.clear();
        for &sample in shown {
            self.display.push(sample);
        }
        if window.sync_index.is_some() {
            // The synchronised window has been consumed
            self.buffer.clear();
        }

        self.state = State::PublishingResult;
        let measurement = self.publish(now);
        self.state = State::Idle;
        TickOutcome::Published(measurement)
    }

    /// Burst modes: advance through as many states as the hardware allows this tick
    fn burst_step(&mut self, now: Instant) -> TickOutcome {
        loop {
            match self.state {
                State::Idle => {
                    if self.degraded {
                        if let Err(err) = self.polled_block(now) {
                            warn!("polled capture failed, retrying next tick: {}", err);
                            return TickOutcome::Waiting;
                        }
                        self.state = State::Measuring;
                        continue;
                    }
                    match self.source.start_capture(self.config.capture_depth) {
                        Ok(()) => {
                            self.armed_at = now;
                            self.state = State::Arming;
                        }
                        Err(err) => {
                            self.dma_fault();
                            if err.is_transient() && !self.degraded {
                                warn!("unable to arm capture, retrying next tick: {}", err);
                                return TickOutcome::Waiting;
                            }
                            error!("capture rejected ({}), falling back to polled capture", err);
                            if let Err(err) = self.polled_block(now) {
                                warn!("polled capture failed, retrying next tick: {}", err);
                                return TickOutcome::Waiting;
                            }
                            self.state = State::Measuring;
                        }
                    }
                }
                State::Arming => {
                    if self.source.poll_complete() {
                        self.state = State::Draining;
                    } else if elapsed(self.armed_at, now) > self.config.capture_timeout {
                        warn!(
                            "{}, falling back to polled capture",
                            Error::CaptureTimeout
                        );
                        self.source.stop_capture();
                        self.dma_fault();
                        if let Err(err) = self.polled_block(now) {
                            warn!("polled capture failed, retrying next tick: {}", err);
                            self.state = State::Idle;
                            return TickOutcome::Waiting;
                        }
                        self.state = State::Measuring;
                    } else {
                        return TickOutcome::Waiting;
                    }
                }
                State::Draining => match self.drain_block() {
                    Ok(()) => {
                        self.dma_failures = 0;
                        self.state = State::Measuring;
                    }
                    Err(err) => {
                        warn!("drain failed ({}), falling back to polled capture", err);
                        // The capture is already released; make sure the ADC is paused
                        self.source.hardware().stop();
                        self.dma_fault();
                        if let Err(err) = self.polled_block(now) {
                            warn!("polled capture failed, retrying next tick: {}", err);
                            self.state = State::Idle;
                            return TickOutcome::Waiting;
                        }
                        self.state = State::Measuring;
                    }
                },
                State::Measuring => {
                    let samples = self.buffer.as_slice();
                    self.pending = WindowStats::from_samples(samples);
                    self.pending_len = samples.len();
                    self.state = State::PublishingResult;
                }
                State::PublishingResult => {
                    let measurement = self.publish(now);
                    self.state = State::Idle;
                    return TickOutcome::Published(measurement);
                }
            }
        }
    }

    /// Move a completed DMA block through the filter into the buffer
    fn drain_block(&mut self) -> Result<(), Error> {
        self.buffer.clear();
        self.filter.clear();
        let base = self.armed_at;
        let period = self.sample_period.ticks();
        let Self {
            source,
            filter,
            buffer,
            events,
            ..
        } = self;
        for (i, raw) in source.drain()?.enumerate() {
            let filtered = filter.push(raw.voltage());
            buffer.push(filtered);
            events.observe(filtered, base + Duration::from_ticks(period * i as u64));
        }
        debug!("drained {} samples", self.buffer.len());
        #[cfg(feature = "trace_capture")]
        self.buffer.trace_samples();
        Ok(())
    }

    /// Capture one block by polling, used when DMA fails
    fn polled_block(&mut self, now: Instant) -> Result<(), Error> {
        self.buffer.clear();
        self.filter.clear();
        for i in 0..self.config.capture_depth {
            let raw = self.source.read_one()?;
            let timestamp = self.sample_time(now, i);
            self.ingest(raw.voltage(), timestamp);
        }
        Ok(())
    }

    /// Filter, store and trigger-check one sample
    fn ingest(&mut self, voltage: f32, timestamp: Instant) {
        let filtered = self.filter.push(voltage);
        self.buffer.push(filtered);
        self.events.observe(filtered, timestamp);
    }

    /// Time of the `index`th sample of a capture starting at `base`
    fn sample_time(&self, base: Instant, index: usize) -> Instant {
        base + Duration::from_ticks(self.sample_period.ticks() * index as u64)
    }

    /// Record a DMA fault, degrading to polling once they persist
    fn dma_fault(&mut self) {
        self.dma_failures = self.dma_failures.saturating_add(1);
        if !self.degraded && self.dma_failures >= self.config.max_dma_failures {
            self.degraded = true;
            warn!(
                "DMA failed {} times in a row, polling for the rest of the session",
                self.dma_failures
            );
        }
    }

    /// Stop because the period between events exceeded its limit
    fn period_fault(&mut self, period: Duration) {
        error!(
            "period of {} us exceeds the limit, stopping acquisition",
            period.ticks()
        );
        self.fault = true;
        self.running = false;
        self.source.stop_capture();
        self.set_enable(false);
    }

    /// Estimate the pending window and write the result
    fn publish(&mut self, now: Instant) -> Measurement {
        let window = self.estimator.measure(&self.pending, self.config.trigger_level);
        if window.signal_detected {
            self.events.last_signal_at = Some(now);
        }
        let hold_expired = !window.signal_detected
            && self
                .events
                .last_signal_at
                .is_some_and(|at| elapsed(at, now) > self.config.max_hold_timeout);
        if hold_expired {
            debug!("no signal within hold timeout, resetting maximum");
            self.events.last_signal_at = None;
        }

        let period = self.events.period.period();
        if let Some(period) = period {
            if self.running && period > self.config.period_limit {
                self.period_fault(period);
            }
        }

        let capture_duration =
            Duration::from_ticks(self.sample_period.ticks() * self.pending_len as u64);
        let sample_rate = self.sample_rate;
        let (running, fault, degraded) = (self.running, self.fault, self.degraded);
        let event_count = self.events.count;
        self.shared.update(|m| {
            m.current_value = window.current;
            if let Some(peak) = window.peak {
                if peak > m.max_current {
                    m.max_current = peak;
                }
            }
            if hold_expired {
                m.max_current = 0.0;
            }
            m.signal_detected = window.signal_detected;
            m.capture_duration = capture_duration;
            m.sample_rate = sample_rate;
            m.period = period;
            m.event_count = event_count;
            m.running = running;
            m.fault = fault;
            m.degraded = degraded;
        })
    }

    /// Publish run flags without a new measurement
    fn publish_status(&self) {
        let (running, fault, degraded) = (self.running, self.fault, self.degraded);
        let event_count = self.events.count;
        self.shared.update(|m| {
            m.running = running;
            m.fault = fault;
            m.degraded = degraded;
            m.event_count = event_count;
        });
    }

    /// Drive the pulse-enable output, logging failures
    fn set_enable(&mut self, on: bool) {
        let result = if on {
            self.enable.set_high()
        } else {
            self.enable.set_low()
        };
        if result.is_err() {
            warn!("failed to drive pulse enable output");
        }
    }
}
