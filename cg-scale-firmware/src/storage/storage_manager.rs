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

use crate::storage::NvStorageError;
use core::cell::RefCell;
use core::future::Future;
use core::ops::Range;
use defmt::{debug, error, warn, Debug2Format};
use embassy_embedded_hal::adapter::BlockingAsync;
use embassy_embedded_hal::flash::partition::BlockingPartition;
use embassy_rp::flash;
use embassy_rp::peripherals::FLASH;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;
use embedded_storage_async::nor_flash::NorFlash;
use sequential_storage::cache::NoCache;
use sequential_storage::map;
use sequential_storage::map::Value;

/// Scratch buffer for one serialised key/value item, rounded up to the flash word size.
pub const DATA_BUFFER_SIZE: usize = 64;

pub trait StorageManager {
    fn save_key_value_pair<'d, V: Value<'d>>(
        &mut self,
        key: u16,
        value: V,
    ) -> impl Future<Output = Result<(), NvStorageError>>;
    fn read_key_value_pair<V>(
        &mut self,
        key: u16,
    ) -> impl Future<Output = Result<Option<V>, NvStorageError>>
    where
        for<'a> V: Value<'a>;
}

pub type BlockingFlash =
    embassy_rp::flash::Flash<'static, FLASH, flash::Blocking, { crate::FLASH_SIZE }>;

pub type BlockingAsyncPartition =
    BlockingAsync<BlockingPartition<'static, CriticalSectionRawMutex, BlockingFlash>>;

pub type StorageManagerMutex =
    Mutex<CriticalSectionRawMutex, StorageManagerSequentialStorage<BlockingAsyncPartition>>;

pub static NV_STORAGE: StorageManagerMutex =
    StorageManagerMutex::new(StorageManagerSequentialStorage::new());

pub struct StorageManagerSequentialStorage<F>
where
    F: NorFlash,
{
    flash: Option<F>,
    key_value_range: Option<Range<u32>>,
    flash_cache: NoCache,
}

impl<F> StorageManagerSequentialStorage<F>
where
    F: NorFlash,
{
    pub const fn new() -> Self {
        Self {
            flash: None,
            key_value_range: None,
            flash_cache: NoCache::new(),
        }
    }

    fn initialise(&mut self, flash: F, key_value_range_in_partition: Range<u32>) {
        debug!(
            "Storage initialising. KeyValue flash address range: 0x{:x} to 0x{:x}, flash size: {}",
            key_value_range_in_partition.start,
            key_value_range_in_partition.end,
            flash.capacity(),
        );
        self.flash = Some(flash);
        self.key_value_range = Some(key_value_range_in_partition);
        debug!("Storage initialised");
    }

    fn parts(&mut self) -> Result<(&mut F, Range<u32>, &mut NoCache), NvStorageError> {
        match (self.flash.as_mut(), self.key_value_range.clone()) {
            (Some(flash), Some(range)) => Ok((flash, range, &mut self.flash_cache)),
            _ => {
                error!("Storage used before initialisation");
                Err(NvStorageError::NotInitialized)
            }
        }
    }
}

impl<F> StorageManager for StorageManagerSequentialStorage<F>
where
    F: NorFlash,
{
    async fn save_key_value_pair<'d, V: Value<'d>>(
        &mut self,
        key: u16,
        value: V,
    ) -> Result<(), NvStorageError> {
        let mut data_buffer = [0; DATA_BUFFER_SIZE];
        let (flash, storage_range, cache) = self.parts()?;

        map::store_item(flash, storage_range, cache, &mut data_buffer, &key, &value)
            .await
            .map_err(|e| {
                warn!("Unable to save key/value: {:?}", Debug2Format(&e));
                NvStorageError::SaveError
            })
    }

    async fn read_key_value_pair<V>(&mut self, key: u16) -> Result<Option<V>, NvStorageError>
    where
        for<'a> V: Value<'a>,
    {
        let mut data_buffer = [0; DATA_BUFFER_SIZE];
        let (flash, storage_range, cache) = self.parts()?;

        map::fetch_item(flash, storage_range, cache, &mut data_buffer, &key)
            .await
            .map_err(|e| {
                warn!("Unable to read key/value: {:?}", Debug2Format(&e));
                NvStorageError::RetrieveError
            })
    }
}

pub async fn initialise_storage(
    flash_mutex: &'static embassy_sync::blocking_mutex::Mutex<
        CriticalSectionRawMutex,
        RefCell<BlockingFlash>,
    >,
    partition_range_in_flash: Range<u32>,
    key_value_range_in_partition: Range<u32>,
) {
    let nvm_partition = BlockingPartition::new(
        flash_mutex,
        partition_range_in_flash.start,
        partition_range_in_flash.len() as u32,
    );
    let blocking_async_nvm_partition = BlockingAsync::new(nvm_partition);

    let mut nvm_storage = NV_STORAGE.lock().await;
    nvm_storage.initialise(blocking_async_nvm_partition, key_value_range_in_partition);
}
