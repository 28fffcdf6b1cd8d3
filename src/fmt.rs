// SPDX-License-Identifier: Apache-2.0

//! Logging macros which forward to [`defmt`](https://docs.rs/defmt) when the `defmt` feature is
//! enabled (target firmware), or to the [`log`] facade otherwise (host builds and tests).
//!
//! Format strings must stay within the subset both back-ends accept: plain `{}` and `{:?}`
//! placeholders, no width or precision specifiers.
#![allow(unused_macros)]

/// Trace-level message
macro_rules! trace {
    ($($arg:tt)+) => {{
        #[cfg(feature = "defmt")]
        ::defmt::trace!($($arg)+);
        #[cfg(not(feature = "defmt"))]
        ::log::trace!($($arg)+);
    }};
}

/// Debug-level message
macro_rules! debug {
    ($($arg:tt)+) => {{
        #[cfg(feature = "defmt")]
        ::defmt::debug!($($arg)+);
        #[cfg(not(feature = "defmt"))]
        ::log::debug!($($arg)+);
    }};
}

/// Info-level message
macro_rules! info {
    ($($arg:tt)+) => {{
        #[cfg(feature = "defmt")]
        ::defmt::info!($($arg)+);
        #[cfg(not(feature = "defmt"))]
        ::log::info!($($arg)+);
    }};
}

/// Warning-level message
macro_rules! warn {
    ($($arg:tt)+) => {{
        #[cfg(feature = "defmt")]
        ::defmt::warn!($($arg)+);
        #[cfg(not(feature = "defmt"))]
        ::log::warn!($($arg)+);
    }};
}

/// Error-level message
macro_rules! error {
    ($($arg:tt)+) => {{
        #[cfg(feature = "defmt")]
        ::defmt::error!($($arg)+);
        #[cfg(not(feature = "defmt"))]
        ::log::error!($($arg)+);
    }};
}
