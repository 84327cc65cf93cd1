//! Hardware identity and the device fingerprint derived from it.

use core::fmt::{self, Write as _};

use heapless::String;

/// `AA:BB:CC:DD:EE:FF` plus three `u32` values in decimal.
pub const FINGERPRINT_MAX_LEN: usize = 17 + 3 * 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IdentityError {
    NetworkAddress,
    ChipId,
    FlashId,
    FlashSpeed,
    /// Rendered identifiers did not fit their buffer. Buffers are sized for the
    /// widest values, so this marks a sizing bug rather than bad hardware.
    TextOverflow,
}

impl fmt::Display for IdentityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let what = match self {
            Self::NetworkAddress => "network hardware address",
            Self::ChipId => "chip id",
            Self::FlashId => "flash id",
            Self::FlashSpeed => "flash speed",
            Self::TextOverflow => return f.write_str("identity text overflowed its buffer"),
        };
        write!(f, "{what} unavailable")
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
    /// All-zero and all-ones addresses come from unprogrammed efuses.
    pub fn is_programmed(&self) -> bool {
        self.0 != [0; 6] && self.0 != [0xFF; 6]
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

/// Identifiers burned into the hardware of one chip family.
pub trait HardwareIdentity {
    fn network_address(&self) -> Result<MacAddress, IdentityError>;
    fn chip_id(&self) -> Result<u32, IdentityError>;
    fn flash_id(&self) -> Result<u32, IdentityError>;
    /// Flash clock in Hz.
    fn flash_speed(&self) -> Result<u32, IdentityError>;
}

/// Flash chip probe shared by both chip families.
pub trait FlashInfo {
    fn flash_id(&self) -> Result<u32, IdentityError>;
    fn flash_speed(&self) -> Result<u32, IdentityError>;
}

/// ESP32: the station address is the factory efuse MAC and the chip id is folded
/// out of its last three bytes.
pub struct Esp32Identity<F> {
    efuse_mac: MacAddress,
    flash: F,
}

impl<F: FlashInfo> Esp32Identity<F> {
    pub fn new(efuse_mac: [u8; 6], flash: F) -> Self {
        Self {
            efuse_mac: MacAddress(efuse_mac),
            flash,
        }
    }
}

/// Reads the efuse MAC as a little-endian `u64` and gathers bytes 5, 4 and 3 into
/// the low 24 bits, most significant first.
pub fn chip_id_from_efuse_mac(mac: [u8; 6]) -> u32 {
    let mut raw = [0u8; 8];
    raw[..6].copy_from_slice(&mac);
    let efuse = u64::from_le_bytes(raw);
    let mut chip_id = 0u32;
    for shift in [0u32, 8, 16] {
        chip_id |= (((efuse >> (40 - shift)) & 0xFF) as u32) << shift;
    }
    chip_id
}

impl<F: FlashInfo> HardwareIdentity for Esp32Identity<F> {
    fn network_address(&self) -> Result<MacAddress, IdentityError> {
        if self.efuse_mac.is_programmed() {
            Ok(self.efuse_mac)
        } else {
            Err(IdentityError::NetworkAddress)
        }
    }

    fn chip_id(&self) -> Result<u32, IdentityError> {
        if !self.efuse_mac.is_programmed() {
            return Err(IdentityError::ChipId);
        }
        Ok(chip_id_from_efuse_mac(self.efuse_mac.0))
    }

    fn flash_id(&self) -> Result<u32, IdentityError> {
        self.flash.flash_id()
    }

    fn flash_speed(&self) -> Result<u32, IdentityError> {
        self.flash.flash_speed()
    }
}

/// ESP8266: station address and chip id come from separate registers.
pub struct Esp8266Identity<F> {
    station_mac: MacAddress,
    chip_id: Option<u32>,
    flash: F,
}

impl<F: FlashInfo> Esp8266Identity<F> {
    pub fn new(station_mac: [u8; 6], chip_id: Option<u32>, flash: F) -> Self {
        Self {
            station_mac: MacAddress(station_mac),
            chip_id,
            flash,
        }
    }
}

impl<F: FlashInfo> HardwareIdentity for Esp8266Identity<F> {
    fn network_address(&self) -> Result<MacAddress, IdentityError> {
        if self.station_mac.is_programmed() {
            Ok(self.station_mac)
        } else {
            Err(IdentityError::NetworkAddress)
        }
    }

    fn chip_id(&self) -> Result<u32, IdentityError> {
        self.chip_id.ok_or(IdentityError::ChipId)
    }

    fn flash_id(&self) -> Result<u32, IdentityError> {
        self.flash.flash_id()
    }

    fn flash_speed(&self) -> Result<u32, IdentityError> {
        self.flash.flash_speed()
    }
}

/// First byte of every ESP application and bootloader image.
pub const IMAGE_MAGIC: u8 = 0xE9;

/// Flash clock in Hz from the first four bytes of an ESP image header.
///
/// The low nibble of byte 3 holds the SPI clock selected at flashing time.
pub fn flash_speed_from_image_header(header: [u8; 4]) -> Option<u32> {
    if header[0] != IMAGE_MAGIC {
        return None;
    }
    match header[3] & 0x0F {
        0x0 => Some(40_000_000),
        0x1 => Some(26_000_000),
        0x2 => Some(20_000_000),
        0xF => Some(80_000_000),
        _ => None,
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fingerprint(String<FINGERPRINT_MAX_LEN>);

impl Fingerprint {
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Builds the fingerprint: address, chip id, flash id, flash speed, in that order.
pub fn generate<I: HardwareIdentity + ?Sized>(identity: &I) -> Result<Fingerprint, IdentityError> {
    let mac = identity.network_address()?;
    let chip_id = identity.chip_id()?;
    let flash_id = identity.flash_id()?;
    let flash_speed = identity.flash_speed()?;

    let mut out = String::new();
    write!(out, "{mac}{chip_id}{flash_id}{flash_speed}")
        .map_err(|_| IdentityError::TextOverflow)?;
    Ok(Fingerprint(out))
}
