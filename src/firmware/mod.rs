//! ESP32-C3 implementations of the collaborator traits.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;
use esp_bootloader_esp_idf::partitions::{
    self, DataPartitionSubType, PARTITION_TABLE_MAX_LEN, PartitionType,
};
use esp_storage::FlashStorage;
use log::{error, info};

use crate::store::{SECTOR_SIZE, STORE_SECTORS};

pub mod alert_led;
pub mod net;
pub mod ota;
pub mod portal;
pub mod radio;
pub mod sensors;
pub mod transport;

/// Flash shared by the credential store and the OTA updater.
pub type SharedFlash = Mutex<CriticalSectionRawMutex, FlashStorage<'static>>;

/// Offset of the `nvs` data partition, which holds the credential store.
pub fn locate_store(flash: &mut FlashStorage<'_>) -> Option<u32> {
    let mut buffer = [0u8; PARTITION_TABLE_MAX_LEN];
    let table = partitions::read_partition_table(flash, &mut buffer)
        .inspect_err(|e| error!("Store: failed to read partition table: {e:?}"))
        .ok()?;
    info!("Currently booted partition {:?}", table.booted_partition());

    let entry = table
        .find_partition(PartitionType::Data(DataPartitionSubType::Nvs))
        .inspect_err(|e| error!("Store: partition lookup failed: {e:?}"))
        .ok()??;
    if entry.len() < STORE_SECTORS * SECTOR_SIZE {
        error!("Store: nvs partition too small ({} bytes)", entry.len());
        return None;
    }
    info!("Store: using nvs partition at {:#x}", entry.offset());
    Some(entry.offset())
}
