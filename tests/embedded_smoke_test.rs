//! On-device checks for the pieces that only behave for real on ESP32 hardware:
//! efuse identity and the flash-backed byte store.

#![no_std]
#![no_main]

#[cfg(test)]
#[embedded_test::tests(executor = esp_rtos::embassy::Executor::new())]
mod tests {
    use embedded_storage::ReadStorage;
    use esp_hal::efuse::Efuse;
    use esp_storage::FlashStorage;
    use provision::{
        identity::{generate, Esp32Identity, FlashInfo, IdentityError},
        layout::{STORE_RESERVED, STORE_SIZE},
        ByteStore, EepromStore,
    };

    struct Fixed;

    impl FlashInfo for Fixed {
        fn flash_id(&self) -> Result<u32, IdentityError> {
            Ok(0x0016_40EF)
        }

        fn flash_speed(&self) -> Result<u32, IdentityError> {
            Ok(40_000_000)
        }
    }

    struct Context {
        flash: FlashStorage<'static>,
    }

    #[init]
    fn init() -> Context {
        let peripherals = esp_hal::init(esp_hal::Config::default());
        let timg0 = esp_hal::timer::timg::TimerGroup::new(peripherals.TIMG0);
        esp_rtos::start(timg0.timer0);
        Context {
            flash: FlashStorage::new(peripherals.FLASH).multicore_auto_park(),
        }
    }

    #[test]
    async fn fingerprint_is_stable_within_a_boot() {
        let identity = Esp32Identity::new(Efuse::read_base_mac_address(), Fixed);
        let first = generate(&identity).unwrap();
        embassy_time::Timer::after(embassy_time::Duration::from_millis(10)).await;
        let second = generate(&identity).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn store_commit_survives_reopen(context: Context) {
        let flash = context.flash;
        let offset = (flash.capacity() as u32).saturating_sub(FlashStorage::SECTOR_SIZE);

        let mut store = EepromStore::open(flash, offset).unwrap();
        let mut original = [0u8; STORE_SIZE];
        store.read_into(0, &mut original).unwrap();

        let probe = STORE_SIZE - STORE_RESERVED;
        let marker = original[probe].wrapping_add(1);
        store.write(probe, marker).unwrap();
        store.commit().unwrap();

        let mut reopened = EepromStore::open(store.into_inner(), offset).unwrap();
        assert_eq!(reopened.read(probe), Ok(marker));

        reopened.write_all(0, &original).unwrap();
        reopened.commit().unwrap();
    }
}
