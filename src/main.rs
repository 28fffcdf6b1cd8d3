//! Dual-core current monitor for a Pimoroni Pico Display board with an ACS758 on GPIO28.
//!
//! Core 1 runs acquisition; core 0 handles the buttons and the display. The two only share
//! [`SHARED`] and [`REQUESTS`].
#![no_std]
#![no_main]
#![warn(missing_docs)]

use acs758_monitor::{
    controller::{AcquisitionConfig, AcquisitionController, TickOutcome},
    presentation::{Debouncer, MeasurementSink, Presentation},
    rp2040::Rp2040AdcDma,
    shared::{ControlRequests, Measurement, SharedMeasurement},
    Duration,
};
use cortex_m::singleton;
use defmt::{error, info};
#[allow(unused_imports)]
use defmt_rtt as _;
#[allow(unused_imports)]
use panic_probe as _;
use rp2040_hal::{
    adc::AdcPin,
    clocks::init_clocks_and_plls,
    entry,
    gpio::{bank0::Gpio22, FunctionSioOutput, Pin, Pins, PullDown},
    multicore::{Multicore, Stack},
    pac, Sio, Timer, Watchdog,
};

/// Second-stage bootloader, from [rp2040-boot2](https://docs.rs/rp2040-boot2)
#[link_section = ".boot2"]
#[used]
pub static BOOT2: [u8; 256] = rp2040_boot2::BOOT_LOADER_W25Q080;
/// External high-speed crystal on the pico board is 12Mhz
pub const XOSC_FREQ_HZ: u32 = 12_000_000;

/// Samples per block capture, also the capture buffer size
const CAPTURE_DEPTH: usize = 1000;
/// Board configuration
const CONFIG: AcquisitionConfig = AcquisitionConfig {
    capture_depth: CAPTURE_DEPTH,
    ..AcquisitionConfig::DEFAULT
};
/// Acquisition tick period on core 1
const ACQUISITION_TICK: Duration = Duration::millis(5);
/// Presentation tick period on core 0 (25 frames/s)
const PRESENTATION_TICK: Duration = Duration::millis(40);
/// Presentation ticks a button must be stable for
const DEBOUNCE_TICKS: u8 = 2;
/// DMA channel reserved for captures
const CAPTURE_DMA_CHANNEL: usize = 0;

/// Latest measurement, written by core 1
static SHARED: SharedMeasurement = SharedMeasurement::new();
/// User actions, raised by core 0
static REQUESTS: ControlRequests = ControlRequests::new();
/// Core 1 stack
static mut CORE1_STACK: Stack<4096> = Stack::new();

/// Pulse-enable output
type EnablePin = Pin<Gpio22, FunctionSioOutput, PullDown>;
/// Acquisition controller as wired on this board
type Controller =
    AcquisitionController<'static, Rp2040AdcDma<CAPTURE_DEPTH>, EnablePin, CAPTURE_DEPTH>;

/// Stands in for the LCD: logs a snapshot once a second while it changes
struct LogSink {
    /// Frames rendered
    frames: u32,
    /// Version of the last logged snapshot
    logged_version: u32,
}

impl MeasurementSink for LogSink {
    fn render(&mut self, measurement: &Measurement) {
        self.frames = self.frames.wrapping_add(1);
        if self.frames % 25 != 0 || measurement.version == self.logged_version {
            return;
        }
        self.logged_version = measurement.version;
        if measurement.fault {
            error!("stopped on period limit: {}", measurement);
        } else {
            info!("{}", measurement);
        }
    }
}

/// Core 1: pace the controller from the timer forever
fn acquisition_loop(controller: &'static mut Controller, timer: Timer) -> ! {
    info!("acquisition running on core 1");
    let mut next = timer.get_counter();
    loop {
        let now = timer.get_counter();
        if now < next {
            continue;
        }
        next = now + ACQUISITION_TICK;
        if let TickOutcome::Published(measurement) = controller.tick(now) {
            if measurement.fault {
                error!("period limit exceeded, press Y to restart");
            }
        }
    }
}

/// Main operation loop
#[entry]
fn main() -> ! {
    info!("Current monitor startup");
    let Some(mut pac) = pac::Peripherals::take() else {
        defmt::panic!("peripherals already taken");
    };
    let mut watchdog = Watchdog::new(pac.WATCHDOG);
    let mut sio = Sio::new(pac.SIO);

    let Ok(clocks) = init_clocks_and_plls(
        XOSC_FREQ_HZ,
        pac.XOSC,
        pac.CLOCKS,
        pac.PLL_SYS,
        pac.PLL_USB,
        &mut pac.RESETS,
        &mut watchdog,
    ) else {
        defmt::panic!("unable to start clocks and PLLs");
    };
    let timer = Timer::new(pac.TIMER, &mut pac.RESETS, &clocks);
    let pins = Pins::new(
        pac.IO_BANK0,
        pac.PADS_BANK0,
        sio.gpio_bank0,
        &mut pac.RESETS,
    );

    // ADC input on GPIO28 (channel 2), digital input disabled
    let Ok(_adc_pin) = AdcPin::new(pins.gpio28.into_floating_input()) else {
        defmt::panic!("GPIO28 is not an ADC pin");
    };
    let Some(capture_buffer) = singleton!(: [u16; CAPTURE_DEPTH] = [0; CAPTURE_DEPTH]) else {
        defmt::panic!("capture buffer already allocated");
    };
    let adc_dma = Rp2040AdcDma::new(
        pac.ADC,
        pac.DMA,
        CAPTURE_DMA_CHANNEL,
        capture_buffer,
        &mut pac.RESETS,
    );

    let enable: EnablePin = pins.gpio22.into_push_pull_output();
    let controller = match Controller::new(CONFIG, adc_dma, enable, &SHARED, &REQUESTS) {
        Ok(controller) => controller,
        Err(err) => defmt::panic!("invalid acquisition configuration: {}", err),
    };
    let Some(controller) = singleton!(: Controller = controller) else {
        defmt::panic!("controller already allocated");
    };

    // Launch acquisition on core 1
    let mut mc = Multicore::new(&mut pac.PSM, &mut pac.PPB, &mut sio.fifo);
    let cores = mc.cores();
    let core1 = &mut cores[1];
    // SAFETY: the stack is handed to core 1 once and never touched again from core 0
    let stack = unsafe { &mut *core::ptr::addr_of_mut!(CORE1_STACK.mem) };
    if core1
        .spawn(stack, move || acquisition_loop(controller, timer))
        .is_err()
    {
        defmt::panic!("unable to start core 1");
    }

    // Buttons Y (start/stop) and B (reset) pull to ground
    let start_stop = Debouncer::new(pins.gpio15.into_pull_up_input(), true, DEBOUNCE_TICKS);
    let reset = Debouncer::new(pins.gpio13.into_pull_up_input(), true, DEBOUNCE_TICKS);
    let mut presentation = Presentation::new(
        start_stop,
        reset,
        LogSink {
            frames: 0,
            logged_version: 0,
        },
        &SHARED,
        &REQUESTS,
    );
    info!("System initialization complete, press Y to start");

    let mut next = timer.get_counter();
    loop {
        let now = timer.get_counter();
        if now < next {
            continue;
        }
        next = now + PRESENTATION_TICK;
        presentation.tick();
    }
}
