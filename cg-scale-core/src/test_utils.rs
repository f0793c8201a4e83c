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

//! Scripted stand-ins for the hardware traits.

use crate::battery::BatterySense;
use crate::storage::record::RECORD_SIZE;
use crate::storage::BlockStorage;
use crate::weight::interface::AsyncStrainGaugeInterface;
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockError;

/// Replays a list of raw readings. Once the list runs out the last reading repeats.
pub struct MockStrainGauge {
    readings: VecDeque<i32>,
    last: i32,
    cycle: bool,
    stall: bool,
    fail: bool,
    ready: bool,
    pub powered_up: bool,
}

impl MockStrainGauge {
    pub fn from_readings(readings: &[i32]) -> Self {
        Self {
            readings: readings.iter().copied().collect(),
            last: 0,
            cycle: false,
            stall: false,
            fail: false,
            ready: true,
            powered_up: false,
        }
    }

    pub fn constant(reading: i32) -> Self {
        Self::from_readings(&[reading])
    }

    pub fn push_readings(&mut self, readings: &[i32]) {
        self.readings.extend(readings.iter().copied());
    }

    /// Loop over the readings instead of holding the last one.
    pub fn cycle(&mut self, cycle: bool) {
        self.cycle = cycle;
    }

    /// Never complete a conversion.
    pub fn stall(&mut self, stall: bool) {
        self.stall = stall;
    }

    pub fn fail(&mut self, fail: bool) {
        self.fail = fail;
    }

    pub fn set_ready(&mut self, ready: bool) {
        self.ready = ready;
    }
}

impl AsyncStrainGaugeInterface for MockStrainGauge {
    type Error = MockError;

    async fn initialize(&mut self) -> Result<(), Self::Error> {
        self.power_up().await
    }

    fn is_ready(&mut self) -> Result<bool, Self::Error> {
        Ok(self.ready)
    }

    async fn get_next_reading(&mut self) -> Result<i32, Self::Error> {
        if self.stall {
            core::future::pending::<()>().await;
        }
        if self.fail {
            return Err(MockError);
        }
        if let Some(reading) = self.readings.pop_front() {
            if self.cycle {
                self.readings.push_back(reading);
            }
            self.last = reading;
        }
        Ok(self.last)
    }

    async fn power_down(&mut self) -> Result<(), Self::Error> {
        self.powered_up = false;
        Ok(())
    }

    async fn power_up(&mut self) -> Result<(), Self::Error> {
        self.powered_up = true;
        Ok(())
    }

    fn get_adc_bit_count(&self) -> usize {
        24
    }
}

#[derive(Clone)]
pub struct MockBatterySense {
    pub raw: u16,
    pub fail: bool,
}

impl MockBatterySense {
    pub fn constant(raw: u16) -> Self {
        Self { raw, fail: false }
    }
}

impl BatterySense for MockBatterySense {
    type Error = MockError;

    async fn read_raw(&mut self) -> Result<u16, Self::Error> {
        if self.fail {
            return Err(MockError);
        }
        Ok(self.raw)
    }
}

/// One flash block held in RAM.
#[derive(Clone)]
pub struct MockBlockStorage {
    pub block: [u8; RECORD_SIZE],
    pub fail_reads: bool,
    pub fail_writes: bool,
    /// Flips a bit of every block after it is written.
    pub corrupt_writes: bool,
    /// Successful writes so far.
    pub writes: usize,
}

impl MockBlockStorage {
    pub fn erased() -> Self {
        Self {
            block: [0xFF; RECORD_SIZE],
            fail_reads: false,
            fail_writes: false,
            corrupt_writes: false,
            writes: 0,
        }
    }
}

impl BlockStorage for MockBlockStorage {
    type Error = MockError;

    async fn read_block(&mut self, buf: &mut [u8]) -> Result<(), Self::Error> {
        if self.fail_reads || buf.len() > RECORD_SIZE {
            return Err(MockError);
        }
        buf.copy_from_slice(&self.block[..buf.len()]);
        Ok(())
    }

    async fn write_block(&mut self, data: &[u8]) -> Result<(), Self::Error> {
        if self.fail_writes || data.len() > RECORD_SIZE {
            return Err(MockError);
        }
        self.block[..data.len()].copy_from_slice(data);
        if self.corrupt_writes {
            self.block[0] ^= 0x01;
        }
        self.writes += 1;
        Ok(())
    }
}
