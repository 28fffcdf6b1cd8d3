// SPDX-License-Identifier: Apache-2.0

//! Crate-wide error type

use core::fmt;

/// Errors raised by the acquisition pipeline.
///
/// Hardware variants are transient: the controller logs them and retries on the next tick.
/// Configuration variants are fatal and returned from constructors only.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// A capture was requested while a previous one has not completed or been stopped
    HardwareBusy,
    /// Samples were drained before the capture completed
    NotReady,
    /// The DMA transfer did not complete within the configured bound
    CaptureTimeout,
    /// The ADC/DMA collaborator reported a read fault
    Hardware,
    /// Unknown sensor key, or a calibration entry with a zero scale
    InvalidProfile,
    /// A configuration value lies outside the compiled capacity or is not physical
    InvalidConfig,
}

impl Error {
    /// Whether the error may clear on its own by retrying on a later tick
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::HardwareBusy | Error::NotReady | Error::CaptureTimeout | Error::Hardware
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::HardwareBusy => f.write_str("capture already in progress"),
            Error::NotReady => f.write_str("capture has not completed"),
            Error::CaptureTimeout => f.write_str("capture did not complete in time"),
            Error::Hardware => f.write_str("ADC or DMA read fault"),
            Error::InvalidProfile => f.write_str("unknown sensor profile or zero scale"),
            Error::InvalidConfig => f.write_str("invalid acquisition configuration"),
        }
    }
}
