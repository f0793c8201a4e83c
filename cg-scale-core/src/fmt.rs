// Copyright (C) 2025 Paul Hampson
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License version 3 as  published by the
// Free Software Foundation.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more
// details.
//
// You should have received a copy of the GNU General Public License along with
// this program.  If not, see <https://www.gnu.org/licenses/>.

//! Logging front end. Firmware builds route through `defmt`, host builds through `log`.
//! With neither feature enabled the arguments are still referenced so that values only
//! used for logging do not trigger warnings.

#![macro_use]
#![allow(unused_macros)]

macro_rules! log_trace {
    ($s:literal $(, $x:expr)* $(,)?) => {
        {
            #[cfg(feature = "log")]
            ::log::trace!($s $(, $x)*);

            #[cfg(feature = "defmt")]
            ::defmt::trace!($s $(, $x)*);

            #[cfg(not(any(feature = "log", feature = "defmt")))]
            { $( let _ = &$x; )* }
        }
    };
}

macro_rules! log_debug {
    ($s:literal $(, $x:expr)* $(,)?) => {
        {
            #[cfg(feature = "log")]
            ::log::debug!($s $(, $x)*);

            #[cfg(feature = "defmt")]
            ::defmt::debug!($s $(, $x)*);

            #[cfg(not(any(feature = "log", feature = "defmt")))]
            { $( let _ = &$x; )* }
        }
    };
}

macro_rules! log_info {
    ($s:literal $(, $x:expr)* $(,)?) => {
        {
            #[cfg(feature = "log")]
            ::log::info!($s $(, $x)*);

            #[cfg(feature = "defmt")]
            ::defmt::info!($s $(, $x)*);

            #[cfg(not(any(feature = "log", feature = "defmt")))]
            { $( let _ = &$x; )* }
        }
    };
}

macro_rules! log_warn {
    ($s:literal $(, $x:expr)* $(,)?) => {
        {
            #[cfg(feature = "log")]
            ::log::warn!($s $(, $x)*);

            #[cfg(feature = "defmt")]
            ::defmt::warn!($s $(, $x)*);

            #[cfg(not(any(feature = "log", feature = "defmt")))]
            { $( let _ = &$x; )* }
        }
    };
}

macro_rules! log_error {
    ($s:literal $(, $x:expr)* $(,)?) => {
        {
            #[cfg(feature = "log")]
            ::log::error!($s $(, $x)*);

            #[cfg(feature = "defmt")]
            ::defmt::error!($s $(, $x)*);

            #[cfg(not(any(feature = "log", feature = "defmt")))]
            { $( let _ = &$x; )* }
        }
    };
}
