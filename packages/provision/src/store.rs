use core::fmt;

use embedded_storage::{ReadStorage, Storage};
use log::{debug, error};

use crate::layout::STORE_SIZE;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreError {
    OutOfRange { address: usize },
    FlashRead,
    FlashWrite,
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfRange { address } => write!(f, "address {address} outside byte store"),
            Self::FlashRead => f.write_str("flash read failed"),
            Self::FlashWrite => f.write_str("flash write failed"),
        }
    }
}

/// Addressable persistent byte array.
///
/// Writes are pending until [`ByteStore::commit`] returns `Ok`.
pub trait ByteStore {
    fn read(&self, address: usize) -> Result<u8, StoreError>;
    fn write(&mut self, address: usize, value: u8) -> Result<(), StoreError>;
    fn commit(&mut self) -> Result<(), StoreError>;

    fn read_into(&self, address: usize, out: &mut [u8]) -> Result<(), StoreError> {
        for (idx, slot) in out.iter_mut().enumerate() {
            *slot = self.read(address + idx)?;
        }
        Ok(())
    }

    fn write_all(&mut self, address: usize, bytes: &[u8]) -> Result<(), StoreError> {
        for (idx, &byte) in bytes.iter().enumerate() {
            self.write(address + idx, byte)?;
        }
        Ok(())
    }
}

/// EEPROM emulation on top of a flash region.
///
/// The region is copied into RAM once on [`EepromStore::open`]; reads and writes hit
/// the RAM copy and `commit` writes the whole copy back when it has changed.
pub struct EepromStore<F> {
    flash: F,
    offset: u32,
    shadow: [u8; STORE_SIZE],
    dirty: bool,
}

impl<F> EepromStore<F>
where
    F: ReadStorage + Storage,
    <F as ReadStorage>::Error: fmt::Debug,
{
    pub fn open(mut flash: F, offset: u32) -> Result<Self, StoreError> {
        let mut shadow = [0u8; STORE_SIZE];
        flash.read(offset, &mut shadow).map_err(|err| {
            error!("store: flash read err={:?} offset={:#x}", err, offset);
            StoreError::FlashRead
        })?;
        debug!("store: loaded {} bytes offset={:#x}", STORE_SIZE, offset);
        Ok(Self {
            flash,
            offset,
            shadow,
            dirty: false,
        })
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn into_inner(self) -> F {
        self.flash
    }
}

impl<F> ByteStore for EepromStore<F>
where
    F: ReadStorage + Storage,
    <F as ReadStorage>::Error: fmt::Debug,
{
    fn read(&self, address: usize) -> Result<u8, StoreError> {
        self.shadow
            .get(address)
            .copied()
            .ok_or(StoreError::OutOfRange { address })
    }

    fn write(&mut self, address: usize, value: u8) -> Result<(), StoreError> {
        let slot = self
            .shadow
            .get_mut(address)
            .ok_or(StoreError::OutOfRange { address })?;
        if *slot != value {
            *slot = value;
            self.dirty = true;
        }
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        if !self.dirty {
            return Ok(());
        }
        self.flash.write(self.offset, &self.shadow).map_err(|err| {
            error!("store: flash write err={:?} offset={:#x}", err, self.offset);
            StoreError::FlashWrite
        })?;
        self.dirty = false;
        debug!("store: committed offset={:#x}", self.offset);
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::FakeFlash;
    use super::*;

    const SECTOR: u32 = 4096;

    #[test]
    fn open_loads_region_at_offset() {
        let mut flash = FakeFlash::erased(2 * SECTOR as usize);
        flash.data[SECTOR as usize] = 0x42;
        let store = EepromStore::open(flash, SECTOR).unwrap();
        assert_eq!(store.read(0), Ok(0x42));
        assert_eq!(store.read(1), Ok(0xFF));
    }

    #[test]
    fn writes_stay_in_ram_until_commit() {
        let flash = FakeFlash::erased(2 * SECTOR as usize);
        let mut store = EepromStore::open(flash, SECTOR).unwrap();
        store.write_all(10, b"abc").unwrap();
        assert!(store.is_dirty());

        let flash = store.into_inner();
        assert_eq!(flash.writes, 0);
        assert_eq!(flash.data[SECTOR as usize + 10], 0xFF);
    }

    #[test]
    fn commit_flushes_once_and_survives_reopen() {
        let flash = FakeFlash::erased(2 * SECTOR as usize);
        let mut store = EepromStore::open(flash, SECTOR).unwrap();
        store.write_all(64, b"Home").unwrap();
        store.commit().unwrap();
        store.commit().unwrap();
        assert!(!store.is_dirty());

        let flash = store.into_inner();
        assert_eq!(flash.writes, 1);

        let reopened = EepromStore::open(flash, SECTOR).unwrap();
        let mut out = [0u8; 4];
        reopened.read_into(64, &mut out).unwrap();
        assert_eq!(&out, b"Home");
    }

    #[test]
    fn rewriting_identical_bytes_does_not_dirty() {
        let flash = FakeFlash::erased(SECTOR as usize);
        let mut store = EepromStore::open(flash, 0).unwrap();
        store.write(5, 0xFF).unwrap();
        assert!(!store.is_dirty());
    }

    #[test]
    fn failed_flash_write_keeps_store_dirty() {
        let mut flash = FakeFlash::erased(SECTOR as usize);
        flash.fail_writes = true;
        let mut store = EepromStore::open(flash, 0).unwrap();
        store.write(0, 1).unwrap();
        assert_eq!(store.commit(), Err(StoreError::FlashWrite));
        assert!(store.is_dirty());
    }

    #[test]
    fn out_of_range_access_is_rejected() {
        let flash = FakeFlash::erased(SECTOR as usize);
        let mut store = EepromStore::open(flash, 0).unwrap();
        assert_eq!(
            store.read(STORE_SIZE),
            Err(StoreError::OutOfRange {
                address: STORE_SIZE
            })
        );
        assert!(store.write(STORE_SIZE + 3, 0).is_err());
    }

    #[test]
    fn open_fails_when_region_is_unreadable() {
        let flash = FakeFlash::erased(100);
        assert!(matches!(
            EepromStore::open(flash, 0),
            Err(StoreError::FlashRead)
        ));
    }
}
