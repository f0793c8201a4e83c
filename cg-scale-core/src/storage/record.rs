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

//! Block layout of the persisted calibration, little endian:
//!
//! | bytes  | field                        |
//! |--------|------------------------------|
//! | 0..2   | magic `0x5CC6`               |
//! | 2      | version                      |
//! | 3      | reserved, zero               |
//! | 4..8   | front load cell factor       |
//! | 8..12  | rear load cell factor        |
//! | 12..16 | battery voltage factor       |
//! | 16..20 | CRC-32 of bytes 0..16        |
//!
//! The checksum closes the block, so a write interrupted part way never decodes.

use crate::calibration::{is_valid_factor, CalibrationTarget};
use crate::weight::ChannelId;
use crc::{Crc, CRC_32_ISO_HDLC};

pub const RECORD_SIZE: usize = 20;

const RECORD_MAGIC: u16 = 0x5CC6;
const RECORD_VERSION: u8 = 1;
const CHECKSUMMED_LEN: usize = 16;
const RECORD_CRC: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CalibrationFactors {
    /// Raw counts per gram, front support.
    pub front: f32,
    /// Raw counts per gram, rear support.
    pub rear: f32,
    /// Millivolts per ADC count.
    pub battery: f32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RecordSource {
    /// Read back from, or successfully written to, persistent storage.
    Stored,
    /// Compiled in defaults, nothing valid was stored.
    Defaults,
    /// Changed at runtime but the write failed.
    InMemory,
}

impl RecordSource {
    pub fn is_persisted(&self) -> bool {
        *self == RecordSource::Stored
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CalibrationRecord {
    pub factors: CalibrationFactors,
    pub source: RecordSource,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DecodeError {
    /// Erased or zeroed block, never written.
    Blank,
    BadMarker,
    BadChecksum,
    /// Intact block holding a zero or non-finite factor.
    InvalidFactor,
}

impl CalibrationFactors {
    pub fn is_valid(&self) -> bool {
        is_valid_factor(self.front) && is_valid_factor(self.rear) && is_valid_factor(self.battery)
    }

    pub fn get(&self, target: CalibrationTarget) -> f32 {
        match target {
            CalibrationTarget::LoadCell(ChannelId::Front) => self.front,
            CalibrationTarget::LoadCell(ChannelId::Rear) => self.rear,
            CalibrationTarget::BatteryVoltage => self.battery,
        }
    }

    pub fn set(&mut self, target: CalibrationTarget, factor: f32) {
        match target {
            CalibrationTarget::LoadCell(ChannelId::Front) => self.front = factor,
            CalibrationTarget::LoadCell(ChannelId::Rear) => self.rear = factor,
            CalibrationTarget::BatteryVoltage => self.battery = factor,
        }
    }

    pub fn encode(&self) -> [u8; RECORD_SIZE] {
        let mut block = [0u8; RECORD_SIZE];
        block[0..2].copy_from_slice(&RECORD_MAGIC.to_le_bytes());
        block[2] = RECORD_VERSION;
        block[4..8].copy_from_slice(&self.front.to_le_bytes());
        block[8..12].copy_from_slice(&self.rear.to_le_bytes());
        block[12..16].copy_from_slice(&self.battery.to_le_bytes());
        let checksum = RECORD_CRC.checksum(&block[..CHECKSUMMED_LEN]);
        block[CHECKSUMMED_LEN..].copy_from_slice(&checksum.to_le_bytes());
        block
    }

    pub fn decode(block: &[u8; RECORD_SIZE]) -> Result<Self, DecodeError> {
        if block.iter().all(|b| *b == 0xFF) || block.iter().all(|b| *b == 0x00) {
            return Err(DecodeError::Blank);
        }

        let magic = u16::from_le_bytes([block[0], block[1]]);
        if magic != RECORD_MAGIC || block[2] != RECORD_VERSION {
            return Err(DecodeError::BadMarker);
        }

        let stored_checksum = u32::from_le_bytes(read_word(block, CHECKSUMMED_LEN));
        if RECORD_CRC.checksum(&block[..CHECKSUMMED_LEN]) != stored_checksum {
            return Err(DecodeError::BadChecksum);
        }

        let factors = Self {
            front: f32::from_le_bytes(read_word(block, 4)),
            rear: f32::from_le_bytes(read_word(block, 8)),
            battery: f32::from_le_bytes(read_word(block, 12)),
        };
        if !factors.is_valid() {
            return Err(DecodeError::InvalidFactor);
        }
        Ok(factors)
    }
}

fn read_word(block: &[u8; RECORD_SIZE], offset: usize) -> [u8; 4] {
    [
        block[offset],
        block[offset + 1],
        block[offset + 2],
        block[offset + 3],
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    const FACTORS: CalibrationFactors = CalibrationFactors {
        front: 954.0,
        rear: -799.25,
        battery: 15.26,
    };

    #[test]
    fn decode_returns_identical_bits() {
        let decoded = CalibrationFactors::decode(&FACTORS.encode()).unwrap();
        assert_eq!(decoded.front.to_bits(), FACTORS.front.to_bits());
        assert_eq!(decoded.rear.to_bits(), FACTORS.rear.to_bits());
        assert_eq!(decoded.battery.to_bits(), FACTORS.battery.to_bits());
    }

    #[test]
    fn erased_and_zeroed_blocks_are_blank() {
        assert_eq!(
            CalibrationFactors::decode(&[0xFF; RECORD_SIZE]),
            Err(DecodeError::Blank)
        );
        assert_eq!(
            CalibrationFactors::decode(&[0x00; RECORD_SIZE]),
            Err(DecodeError::Blank)
        );
    }

    #[test]
    fn torn_write_fails_checksum() {
        let mut block = FACTORS.encode();
        // factors landed, checksum still from an older erase
        block[16..].copy_from_slice(&[0xFF; 4]);
        assert_eq!(CalibrationFactors::decode(&block), Err(DecodeError::BadChecksum));

        let mut block = FACTORS.encode();
        block[9] ^= 0x40;
        assert_eq!(CalibrationFactors::decode(&block), Err(DecodeError::BadChecksum));
    }

    #[test]
    fn wrong_version_is_rejected() {
        let mut block = FACTORS.encode();
        block[2] = RECORD_VERSION + 1;
        assert_eq!(CalibrationFactors::decode(&block), Err(DecodeError::BadMarker));
    }

    #[test]
    fn zero_factor_is_rejected_even_with_valid_checksum() {
        let factors = CalibrationFactors {
            battery: 0.0,
            ..FACTORS
        };
        assert_eq!(
            CalibrationFactors::decode(&factors.encode()),
            Err(DecodeError::InvalidFactor)
        );
    }
}
