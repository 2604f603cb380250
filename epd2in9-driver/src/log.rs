//! Logging shims. Each macro forwards to `defmt` and/or `log` depending on the enabled features,
//! and expands to nothing when neither is enabled.

macro_rules! debug {
    ($($arg:tt)*) => {
        #[cfg(feature = "defmt")]
        defmt::debug!($($arg)*);

        #[cfg(feature = "log")]
        log::debug!($($arg)*);
    };
}

macro_rules! trace {
    ($($arg:tt)*) => {
        #[cfg(feature = "defmt")]
        defmt::trace!($($arg)*);

        #[cfg(feature = "log")]
        log::trace!($($arg)*);
    };
}

macro_rules! warn_log {
    ($($arg:tt)*) => {
        #[cfg(feature = "defmt")]
        defmt::warn!($($arg)*);

        #[cfg(feature = "log")]
        log::warn!($($arg)*);
    };
}

pub(crate) use {debug, trace, warn_log};
