use esp_hal::efuse::Efuse;
use log::{info, warn};
use provision::identity::{
    flash_speed_from_image_header, Esp32Identity, FlashInfo, IdentityError, MacAddress,
};

/// `esp_rom_spiflash_chip_t` as laid out in ESP32 ROM data.
#[repr(C)]
struct RomFlashChip {
    device_id: u32,
    chip_size: u32,
    block_size: u32,
    sector_size: u32,
    page_size: u32,
    status_mask: u32,
}

/// `g_rom_flashchip`, filled in by the ROM and bootloader before the app starts.
const ROM_FLASHCHIP: *const RomFlashChip = 0x3FFA_E270 as *const RomFlashChip;

/// Flash id and clock captured once at boot.
#[derive(Clone, Copy, Debug)]
pub(crate) struct ProbedFlash {
    id: Option<u32>,
    speed: Option<u32>,
}

impl ProbedFlash {
    pub(crate) fn probe(bootloader_header: Option<[u8; 4]>) -> Self {
        // SAFETY: fixed ROM data address on ESP32, only read.
        let device_id =
            unsafe { core::ptr::addr_of!((*ROM_FLASHCHIP).device_id).read_volatile() };
        let id = match device_id {
            0 | u32::MAX => None,
            id => Some(id),
        };
        let speed = bootloader_header.and_then(flash_speed_from_image_header);
        if id.is_none() || speed.is_none() {
            warn!("identity: flash probe incomplete id={:?} speed={:?}", id, speed);
        }
        Self { id, speed }
    }
}

impl FlashInfo for ProbedFlash {
    fn flash_id(&self) -> Result<u32, IdentityError> {
        self.id.ok_or(IdentityError::FlashId)
    }

    fn flash_speed(&self) -> Result<u32, IdentityError> {
        self.speed.ok_or(IdentityError::FlashSpeed)
    }
}

pub(crate) type DeviceIdentity = Esp32Identity<ProbedFlash>;

pub(crate) fn device_identity(flash: ProbedFlash) -> DeviceIdentity {
    let mac = Efuse::read_base_mac_address();
    info!("identity: efuse mac={}", MacAddress(mac));
    Esp32Identity::new(mac, flash)
}
