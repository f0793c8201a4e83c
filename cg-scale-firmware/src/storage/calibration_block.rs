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

use crate::storage::storage_manager::{StorageManager, NV_STORAGE};
use crate::storage::NvStorageError;
use cg_scale_core::storage::record::RECORD_SIZE;
use cg_scale_core::storage::BlockStorage;

/// Map key of the calibration record.
const CALIBRATION_KEY: u16 = 0x0C01;

/// The calibration record as one item in the key/value store.
pub struct FlashCalibrationBlock;

impl BlockStorage for FlashCalibrationBlock {
    type Error = NvStorageError;

    async fn read_block(&mut self, buf: &mut [u8]) -> Result<(), Self::Error> {
        if buf.len() != RECORD_SIZE {
            return Err(NvStorageError::SizeMismatch);
        }
        let mut storage = NV_STORAGE.lock().await;
        match storage
            .read_key_value_pair::<[u8; RECORD_SIZE]>(CALIBRATION_KEY)
            .await?
        {
            Some(block) => buf.copy_from_slice(&block),
            // never written, looks like erased flash
            None => buf.fill(0xFF),
        }
        Ok(())
    }

    async fn write_block(&mut self, data: &[u8]) -> Result<(), Self::Error> {
        let block: [u8; RECORD_SIZE] = data
            .try_into()
            .map_err(|_| NvStorageError::SizeMismatch)?;
        let mut storage = NV_STORAGE.lock().await;
        storage.save_key_value_pair(CALIBRATION_KEY, block).await
    }
}
