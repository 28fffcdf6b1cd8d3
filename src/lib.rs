//! Triggered current acquisition and measurement for
//! [ACS758](https://www.allegromicro.com/en/products/sense/current-sensor-ics/fifty-to-two-hundred-amp-integrated-conductor-sensor-ics/acs758)
//! Hall-effect current sensors on the [RP2040](rp2040_hal).
//!
//! The pipeline takes raw ADC codes, smooths them with a [moving average](filter::MovingAverage),
//! aligns and times them against a [rising-edge trigger](trigger), and turns each window into
//! [RMS, peak and maximum currents](current::CurrentEstimator). Everything is driven by one
//! [`AcquisitionController`](controller::AcquisitionController) per acquisition context, which
//! publishes into a [`SharedMeasurement`](shared::SharedMeasurement) read by the presentation
//! context (normally the other RP2040 core).
//!
//! The library is `no_std`; the hardware collaborators are traits
//! ([`AdcDma`](source::AdcDma), `embedded-hal` digital pins), so the whole pipeline is also tested
//! on a host.
//!
//! ## Crate features
//!
//! - `rp2040`: Register-level [ADC + DMA back-end](rp2040::Rp2040AdcDma) and the dual-core
//!   firmware binary. Implies `defmt`.
//! - `defmt`: Log through [defmt](https://docs.rs/defmt) instead of the [`log`] facade.
//! - `trace_capture`: Logs every drained capture block at trace level. Very noisy! See
//!   [`buffer::CaptureBuffer::trace_samples`].
//!
//! ## Demo
//!
//! A single-context loop on a host, with a mock ADC standing in for the hardware:
//!
//! ```ignore
//! use acs758_monitor::{
//!     controller::{AcquisitionConfig, AcquisitionController, CaptureMode, TickOutcome},
//!     shared::{ControlRequests, SharedMeasurement},
//!     Duration, Instant,
//! };
//!
//! static SHARED: SharedMeasurement = SharedMeasurement::new();
//! static REQUESTS: ControlRequests = ControlRequests::new();
//!
//! let config = AcquisitionConfig {
//!     mode: CaptureMode::BurstDma,
//!     ..AcquisitionConfig::DEFAULT
//! };
//! let mut controller =
//!     AcquisitionController::<_, _, 1024>::new(config, adc, enable_pin, &SHARED, &REQUESTS)?;
//! REQUESTS.request_start();
//! let mut now = Instant::from_ticks(0);
//! loop {
//!     if let TickOutcome::Published(m) = controller.tick(now) {
//!         println!("{} A rms, {} A max", m.current_value, m.max_current);
//!     }
//!     now += Duration::millis(5);
//! }
//! ```

// Copyright 2024 Cameron Rodriguez
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg), feature(doc_auto_cfg), feature(doc_cfg_hide))]

#[macro_use]
mod fmt;

pub mod buffer;
pub mod controller;
pub mod current;
pub mod error;
pub mod filter;
pub mod presentation;
#[cfg(feature = "rp2040")]
pub mod rp2040;
pub mod shared;
pub mod source;
pub mod trigger;

pub use error::Error;

/// Timestamps passed into the pipeline, 1 µs ticks (the RP2040 timer's native resolution)
pub type Instant = fugit::TimerInstantU64<1_000_000>;
/// Durations between [`Instant`]s
pub type Duration = fugit::MicrosDurationU64;
