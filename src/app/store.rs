use embedded_storage::ReadStorage;
use esp_storage::FlashStorage;
use log::{info, warn};
use provision::EepromStore;

use super::{config::BOOTLOADER_HEADER_OFFSET, identity::ProbedFlash};

pub(crate) type DeviceStore = EepromStore<FlashStorage<'static>>;

/// Opens the byte store on the last flash sector.
///
/// The flash chip is probed for the identity fields on the way, before the store
/// takes ownership of the driver.
pub(crate) fn open(
    flash_peripheral: esp_hal::peripherals::FLASH<'static>,
) -> Result<(DeviceStore, ProbedFlash), &'static str> {
    let mut flash = FlashStorage::new(flash_peripheral).multicore_auto_park();
    let capacity = flash.capacity() as u32;
    let offset = capacity.saturating_sub(FlashStorage::SECTOR_SIZE);

    let mut header = [0u8; 4];
    let header = match flash.read(BOOTLOADER_HEADER_OFFSET, &mut header) {
        Ok(()) => Some(header),
        Err(err) => {
            warn!("store: bootloader header read err={:?}", err);
            None
        }
    };
    let probed = ProbedFlash::probe(header);

    info!("store: flash capacity={} store_offset={:#x}", capacity, offset);
    let store = EepromStore::open(flash, offset).map_err(|_| "store: flash read failed")?;
    Ok((store, probed))
}
