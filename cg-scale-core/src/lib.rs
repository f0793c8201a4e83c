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

//! Measurement pipeline of a two support wing CG scale: load cell filtering, calibration,
//! battery monitoring and the centre of gravity calculation. Hardware comes in through the
//! traits in [`weight::interface`], [`battery`] and [`storage`].

#![cfg_attr(not(test), no_std)]
#![allow(async_fn_in_trait)]

// must be first so the log macros are visible to the other modules
mod fmt;

pub mod battery;
pub mod calibration;
pub mod cg;
pub mod command;
pub mod config;
pub mod report;
pub mod scale;
pub mod storage;
pub mod weight;

#[cfg(test)]
pub(crate) mod test_utils;
