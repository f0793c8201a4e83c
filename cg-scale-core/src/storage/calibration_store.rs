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

use crate::calibration::{is_valid_factor, CalibrationTarget};
use crate::storage::record::{
    CalibrationFactors, CalibrationRecord, DecodeError, RecordSource, RECORD_SIZE,
};
use crate::storage::{BlockStorage, StorageError};

/// Owns the persisted calibration record. Everything else gets copies of the factors.
pub struct CalibrationStore<B> {
    storage: B,
    defaults: CalibrationFactors,
    record: CalibrationRecord,
}

impl<B> CalibrationStore<B>
where
    B: BlockStorage,
{
    pub fn new(storage: B, defaults: CalibrationFactors) -> Self {
        Self {
            storage,
            defaults,
            record: CalibrationRecord {
                factors: defaults,
                source: RecordSource::Defaults,
            },
        }
    }

    /// Reads the stored record, falling back to the compiled in defaults if there is nothing
    /// valid to read.
    pub async fn load(&mut self) -> CalibrationRecord {
        let mut block = [0u8; RECORD_SIZE];
        self.record = match self.storage.read_block(&mut block).await {
            Ok(()) => match CalibrationFactors::decode(&block) {
                Ok(factors) => {
                    log_info!(
                        "Loaded calibration: front = {}, rear = {}, battery = {}",
                        factors.front,
                        factors.rear,
                        factors.battery
                    );
                    CalibrationRecord {
                        factors,
                        source: RecordSource::Stored,
                    }
                }
                Err(DecodeError::Blank) => {
                    log_info!("No stored calibration, using defaults");
                    self.default_record()
                }
                Err(e) => {
                    log_warn!("Stored calibration rejected ({:?}), using defaults", e);
                    self.default_record()
                }
            },
            Err(_) => {
                log_warn!("Unable to read stored calibration, using defaults");
                self.default_record()
            }
        };
        self.record
    }

    fn default_record(&self) -> CalibrationRecord {
        CalibrationRecord {
            factors: self.defaults,
            source: RecordSource::Defaults,
        }
    }

    /// Writes the whole record and reads it back. If either step fails the new factors are
    /// still kept in memory and the record is marked as not persisted.
    pub async fn save(&mut self, factors: &CalibrationFactors) -> Result<(), StorageError> {
        if !factors.is_valid() {
            return Err(StorageError::InvalidCalibration);
        }

        let block = factors.encode();
        self.record.factors = *factors;
        if self.storage.write_block(&block).await.is_err() {
            self.record.source = RecordSource::InMemory;
            log_warn!("Unable to store calibration, keeping it in memory only");
            return Err(StorageError::PersistenceError);
        }
        if !self.read_back_matches(&block).await {
            self.record.source = RecordSource::InMemory;
            log_warn!("Stored calibration did not read back, keeping it in memory only");
            return Err(StorageError::PersistenceError);
        }

        self.record.source = RecordSource::Stored;
        log_debug!("Calibration record saved");
        Ok(())
    }

    async fn read_back_matches(&mut self, expected: &[u8; RECORD_SIZE]) -> bool {
        let mut block = [0u8; RECORD_SIZE];
        match self.storage.read_block(&mut block).await {
            Ok(()) => block == *expected,
            Err(_) => false,
        }
    }

    /// Replaces one factor and saves the whole record.
    pub async fn commit_factor(
        &mut self,
        target: CalibrationTarget,
        factor: f32,
    ) -> Result<(), StorageError> {
        if !is_valid_factor(factor) {
            return Err(StorageError::InvalidCalibration);
        }
        let mut factors = self.record.factors;
        factors.set(target, factor);
        self.save(&factors).await
    }

    pub fn record(&self) -> CalibrationRecord {
        self.record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScaleConfig;
    use crate::test_utils::MockBlockStorage;
    use crate::weight::ChannelId;
    use embassy_futures::block_on;

    const DEFAULTS: CalibrationFactors = ScaleConfig::DEFAULT.default_calibration;

    #[test]
    fn unwritten_store_loads_defaults() {
        let mut store = CalibrationStore::new(MockBlockStorage::erased(), DEFAULTS);
        let record = block_on(store.load());
        assert_eq!(record.factors, DEFAULTS);
        assert_eq!(record.source, RecordSource::Defaults);
    }

    #[test]
    fn save_then_load_round_trips() {
        let factors = CalibrationFactors {
            front: 1021.375,
            rear: 812.0625,
            battery: 14.98,
        };
        let mut store = CalibrationStore::new(MockBlockStorage::erased(), DEFAULTS);
        block_on(store.save(&factors)).unwrap();

        let mut reopened = CalibrationStore::new(store.storage.clone(), DEFAULTS);
        let record = block_on(reopened.load());
        assert_eq!(record.source, RecordSource::Stored);
        assert_eq!(record.factors.front.to_bits(), factors.front.to_bits());
        assert_eq!(record.factors.rear.to_bits(), factors.rear.to_bits());
        assert_eq!(record.factors.battery.to_bits(), factors.battery.to_bits());
    }

    #[test]
    fn corrupt_block_loads_defaults() {
        let mut storage = MockBlockStorage::erased();
        let mut block = CalibrationFactors {
            front: 1.0,
            rear: 2.0,
            battery: 3.0,
        }
        .encode();
        block[5] ^= 0x01;
        storage.block = block;

        let mut store = CalibrationStore::new(storage, DEFAULTS);
        let record = block_on(store.load());
        assert_eq!(record.factors, DEFAULTS);
        assert_eq!(record.source, RecordSource::Defaults);
    }

    #[test]
    fn read_failure_loads_defaults() {
        let mut storage = MockBlockStorage::erased();
        storage.fail_reads = true;
        let mut store = CalibrationStore::new(storage, DEFAULTS);
        assert_eq!(block_on(store.load()).source, RecordSource::Defaults);
    }

    #[test]
    fn failed_write_keeps_factors_in_memory() {
        let mut storage = MockBlockStorage::erased();
        storage.fail_writes = true;
        let mut store = CalibrationStore::new(storage, DEFAULTS);
        block_on(store.load());

        let result =
            block_on(store.commit_factor(CalibrationTarget::LoadCell(ChannelId::Rear), 640.0));
        assert_eq!(result, Err(StorageError::PersistenceError));
        assert_eq!(store.record().factors.rear, 640.0);
        assert_eq!(store.record().factors.front, DEFAULTS.front);
        assert_eq!(store.record().source, RecordSource::InMemory);
    }

    #[test]
    fn write_that_does_not_read_back_is_not_trusted() {
        let mut storage = MockBlockStorage::erased();
        storage.corrupt_writes = true;
        let mut store = CalibrationStore::new(storage, DEFAULTS);
        block_on(store.load());

        let result =
            block_on(store.commit_factor(CalibrationTarget::LoadCell(ChannelId::Front), 900.0));
        assert_eq!(result, Err(StorageError::PersistenceError));
        assert_eq!(store.storage.writes, 1);
        assert_eq!(store.record().factors.front, 900.0);
        assert_eq!(store.record().source, RecordSource::InMemory);
    }

    #[test]
    fn unreadable_write_is_not_trusted() {
        let mut storage = MockBlockStorage::erased();
        storage.fail_reads = true;
        let mut store = CalibrationStore::new(storage, DEFAULTS);

        let result = block_on(store.commit_factor(CalibrationTarget::BatteryVoltage, 16.0));
        assert_eq!(result, Err(StorageError::PersistenceError));
        assert_eq!(store.record().source, RecordSource::InMemory);
    }

    #[test]
    fn commit_factor_updates_only_its_field() {
        let mut store = CalibrationStore::new(MockBlockStorage::erased(), DEFAULTS);
        block_on(store.load());
        block_on(store.commit_factor(CalibrationTarget::BatteryVoltage, 16.5)).unwrap();

        let record = store.record();
        assert_eq!(record.factors.battery, 16.5);
        assert_eq!(record.factors.front, DEFAULTS.front);
        assert_eq!(record.factors.rear, DEFAULTS.rear);
        assert_eq!(record.source, RecordSource::Stored);
    }

    #[test]
    fn invalid_factor_is_not_written() {
        let mut store = CalibrationStore::new(MockBlockStorage::erased(), DEFAULTS);
        let result =
            block_on(store.commit_factor(CalibrationTarget::LoadCell(ChannelId::Front), f32::NAN));
        assert_eq!(result, Err(StorageError::InvalidCalibration));
        assert_eq!(store.storage.writes, 0);
    }
}
