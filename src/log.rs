//! Logging facade for the engines.
//!
//! With the `log` feature enabled (the default), engine events are
//! emitted through the `log` crate under the `torii` target, so
//! embedders can filter the gateway separately from their own code.
//! Without the feature, `trace!`/`debug!`/`info!` compile away entirely,
//! but `warning!` still reaches stderr: a refused body, a leaked temp
//! file or an out-of-order chunk should never be silent.

macro_rules! trace {
    ($($tt:tt)*) => {
        #[cfg(feature = "log")]
        ::log::trace!(target: "torii", $($tt)*);
    };
}

macro_rules! debug {
    ($($tt:tt)*) => {
        #[cfg(feature = "log")]
        ::log::debug!(target: "torii", $($tt)*);
    };
}

macro_rules! info {
    ($($tt:tt)*) => {
        #[cfg(feature = "log")]
        ::log::info!(target: "torii", $($tt)*);
    };
}

macro_rules! warning {
    ($($tt:tt)*) => {
        {
            #[cfg(feature = "log")]
            ::log::warn!(target: "torii", $($tt)*);
            #[cfg(not(feature = "log"))]
            eprintln!($($tt)*);
        }
    };
}

pub(crate) use {debug, info, trace, warning};
