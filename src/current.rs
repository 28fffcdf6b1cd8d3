// SPDX-License-Identifier: Apache-2.0

//! ACS758 calibration and current estimation.
//!
//! Currents are computed as `|v - offset| * 1000 / scale`, with `scale` the datasheet
//! sensitivity in mV/A and `offset` the quiescent output voltage, both multiplied by the
//! divider ratio between the sensor output and the ADC pin.

use libm::{fabsf, sqrtf};

use crate::error::Error;

/// Millivolts per volt, matching the mV/A sensitivities in [`PROFILES`]
const MV_PER_V: f32 = 1000.0;

/// Whether the sensor measures current in one direction or both.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Directionality {
    /// Zero current sits near ground (part suffix `U`)
    Unipolar,
    /// Zero current sits at mid-supply (part suffix `B`)
    Bipolar,
}

/// Calibration of one ACS758 variant.
#[derive(Debug, Copy, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SensorProfile {
    /// Current range and direction, e.g. `"100U"`
    pub name: &'static str,
    /// Sensitivity with a 5 V supply, mV/A
    pub scale_5v: f32,
    /// Zero-current output with a 5 V supply, V
    pub offset_5v: f32,
    /// Sensitivity with a 3.3 V supply, mV/A
    pub scale_3v3: f32,
    /// Zero-current output with a 3.3 V supply, V
    pub offset_3v3: f32,
    /// Sensing direction. Kept for completeness; output currents are magnitudes.
    pub directionality: Directionality,
}

/// ACS758 variants, keyed by `<range><direction>`
pub const PROFILES: [SensorProfile; 8] = [
    SensorProfile::new("50B", 40.0, 2.5, 20.0, 1.65, Directionality::Bipolar),
    SensorProfile::new("50U", 60.0, 0.6, 30.0, 0.36, Directionality::Unipolar),
    SensorProfile::new("100B", 20.0, 2.5, 10.0, 1.65, Directionality::Bipolar),
    SensorProfile::new("100U", 40.0, 0.6, 20.0, 0.36, Directionality::Unipolar),
    SensorProfile::new("150B", 13.3, 2.6, 6.65, 1.65, Directionality::Bipolar),
    SensorProfile::new("150U", 26.7, 0.6, 13.35, 0.36, Directionality::Unipolar),
    SensorProfile::new("200B", 10.0, 2.5, 5.0, 1.65, Directionality::Bipolar),
    SensorProfile::new("200U", 20.0, 0.6, 10.0, 0.36, Directionality::Unipolar),
];

impl SensorProfile {
    /// Table entry constructor
    const fn new(
        name: &'static str,
        scale_5v: f32,
        offset_5v: f32,
        scale_3v3: f32,
        offset_3v3: f32,
        directionality: Directionality,
    ) -> Self {
        Self {
            name,
            scale_5v,
            offset_5v,
            scale_3v3,
            offset_3v3,
            directionality,
        }
    }

    /// Find a profile by key, ignoring ASCII case.
    ///
    /// Unknown keys and entries with a zero scale are rejected with [`Error::InvalidProfile`]
    /// rather than falling back to a default.
    pub fn lookup(key: &str) -> Result<&'static SensorProfile, Error> {
        let profile = PROFILES
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(key))
            .ok_or(Error::InvalidProfile)?;
        profile.validate()?;
        Ok(profile)
    }

    /// Reject profiles that would divide by zero
    pub fn validate(&self) -> Result<(), Error> {
        if self.scale_5v == 0.0 || self.scale_3v3 == 0.0 {
            return Err(Error::InvalidProfile);
        }
        Ok(())
    }

    /// `(offset, scale)` pair calibrated for `supply`
    pub fn calibration(&self, supply: f32) -> (f32, f32) {
        if is_3v3(supply) {
            (self.offset_3v3, self.scale_3v3)
        } else {
            (self.offset_5v, self.scale_5v)
        }
    }
}

/// Supplies within 10 mV of 3.3 V use the 3.3 V calibration, anything else the 5 V one
fn is_3v3(supply: f32) -> bool {
    fabsf(supply - 3.3) < 0.01
}

/// Ratio of a resistive divider, `r2` to ground: `r2 / (r1 + r2)`
pub fn divider_ratio(r1: f32, r2: f32) -> f32 {
    r2 / (r1 + r2)
}

/// Divider ratio loaded by the ADC input resistance `r_in` in parallel with `r2`
pub fn effective_divider(r1: f32, r2: f32, r_in: f32) -> f32 {
    (r2 * r_in) / (r1 * r_in + r2 * r_in + r1 * r2)
}

/// Magnitude of a window of voltage samples
#[derive(Debug, Default, Copy, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct WindowStats {
    /// Largest sample, V
    pub peak: f32,
    /// Root mean square, V
    pub rms: f32,
    /// Arithmetic mean, V
    pub mean: f32,
}

impl WindowStats {
    /// Aggregate a window; all zero when empty
    pub fn from_samples(samples: &[f32]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        let n = samples.len() as f32;
        let mut peak = f32::MIN;
        let mut sum = 0.0;
        let mut sum_sq = 0.0;
        for &s in samples {
            peak = peak.max(s);
            sum += s;
            sum_sq += s * s;
        }
        Self {
            peak,
            rms: sqrtf(sum_sq / n),
            mean: sum / n,
        }
    }
}

/// Currents derived from one window
#[derive(Debug, Default, Copy, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct WindowCurrent {
    /// Stable reading to display: RMS when a signal is present, mean otherwise. A
    pub current: f32,
    /// Peak current, only when a signal is present. A
    pub peak: Option<f32>,
    /// The window peak exceeded the trigger threshold
    pub signal_detected: bool,
}

/// Converts pin voltages to current for one sensor, supply and divider.
#[derive(Debug, Copy, Clone)]
pub struct CurrentEstimator {
    /// Sensor calibration
    profile: &'static SensorProfile,
    /// Offset at the ADC pin, V
    offset: f32,
    /// Sensitivity at the ADC pin, mV/A
    scale: f32,
}

impl CurrentEstimator {
    /// Build an estimator. Fails on a zero-scale profile or a non-positive divider.
    pub fn new(profile: &'static SensorProfile, supply: f32, divider: f32) -> Result<Self, Error> {
        profile.validate()?;
        if !(divider > 0.0) || !(supply > 0.0) {
            return Err(Error::InvalidConfig);
        }
        let (offset, scale) = profile.calibration(supply);
        Ok(Self {
            profile,
            offset: offset * divider,
            scale: scale * divider,
        })
    }

    /// Shortcut for [`SensorProfile::lookup`] followed by [`new`](Self::new)
    pub fn for_sensor(key: &str, supply: f32, divider: f32) -> Result<Self, Error> {
        let profile = SensorProfile::lookup(key).map_err(|err| {
            error!("unknown or invalid sensor profile");
            err
        })?;
        Self::new(profile, supply, divider)
    }

    /// Calibration in use
    pub fn profile(&self) -> &'static SensorProfile {
        self.profile
    }

    /// Zero-current voltage at the ADC pin
    pub fn offset(&self) -> f32 {
        self.offset
    }

    /// Current magnitude for a pin voltage, A
    pub fn voltage_to_current(&self, voltage: f32) -> f32 {
        fabsf((voltage - self.offset) * MV_PER_V / self.scale)
    }

    /// Classify a window against `trigger_threshold` (pin volts) and convert it to currents.
    ///
    /// With a signal the RMS is the displayed current and the peak feeds the running maximum;
    /// without one the mean is reported as a noise-floor estimate.
    pub fn measure(&self, stats: &WindowStats, trigger_threshold: f32) -> WindowCurrent {
        if stats.peak > trigger_threshold {
            WindowCurrent {
                current: self.voltage_to_current(stats.rms),
                peak: Some(self.voltage_to_current(stats.peak)),
                signal_detected: true,
            }
        } else {
            WindowCurrent {
                current: self.voltage_to_current(stats.mean),
                peak: None,
                signal_detected: false,
            }
        }
    }
}

/// Convenience wrapper for a one-off conversion against a table key
pub fn voltage_to_current(
    voltage: f32,
    profile: &str,
    supply: f32,
    divider: f32,
) -> Result<f32, Error> {
    Ok(CurrentEstimator::for_sensor(profile, supply, divider)?.voltage_to_current(voltage))
}
