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

use core::fmt::Debug;

pub mod calibration_store;
pub mod record;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StorageError {
    /// The underlying storage could not be read or written.
    PersistenceError,
    /// Refused to store a zero or non-finite factor.
    InvalidCalibration,
}

/// Fixed size block of non-volatile memory holding the calibration record.
pub trait BlockStorage {
    type Error: Debug;

    /// Fill `buf` with the stored block. A block that was never written reads back as erased
    /// (`0xFF`) bytes.
    async fn read_block(&mut self, buf: &mut [u8]) -> Result<(), Self::Error>;

    /// Replace the stored block with `data`.
    async fn write_block(&mut self, data: &[u8]) -> Result<(), Self::Error>;
}
