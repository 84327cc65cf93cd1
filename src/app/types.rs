use esp_hal::{uart::Uart, Async};

use super::{identity::DeviceIdentity, store::DeviceStore};

pub(crate) type SerialUart = Uart<'static, Async>;

/// Hardware handed from bring-up to the provisioning task.
pub(crate) struct Board {
    pub(crate) uart: SerialUart,
    pub(crate) store: DeviceStore,
    pub(crate) identity: DeviceIdentity,
    pub(crate) wifi: esp_hal::peripherals::WIFI<'static>,
}
