use log::LevelFilter;
use provision::{controller, ProvisioningConfig};

pub(crate) const UART_BAUD: u32 = 115_200;
pub(crate) const HEAP_BYTES: usize = 72 * 1024;

pub(crate) const PORTAL_HTTP_PORT: u16 = 80;
pub(crate) const PORTAL_ADDRESS: [u8; 4] = [192, 168, 4, 1];
pub(crate) const PORTAL_PREFIX_LEN: u8 = 24;
pub(crate) const PORTAL_CHANNEL: u8 = 1;
pub(crate) const PORTAL_DHCP_LEASES: usize = 8;
pub(crate) const PORTAL_SOCKET_TIMEOUT_SECS: u64 = 20;
pub(crate) const HTTP_RW_BUF: usize = 2048;
pub(crate) const HTTP_RESPONSE_MAX: usize = 4096;

/// Offset of the second stage bootloader image header.
pub(crate) const BOOTLOADER_HEADER_OFFSET: u32 = 0x1000;

pub(crate) const PROVISIONING: ProvisioningConfig = ProvisioningConfig {
    connect_attempts: parse_u8(
        option_env!("DEVGATE_CONNECT_ATTEMPTS"),
        controller::CONNECT_ATTEMPTS_DEFAULT,
    ),
    connect_interval_ms: parse_u32(
        option_env!("DEVGATE_CONNECT_INTERVAL_MS"),
        controller::CONNECT_INTERVAL_MS_DEFAULT,
    ),
    save_restart_delay_ms: controller::SAVE_RESTART_DELAY_MS_DEFAULT,
    portal_timeout_ms: match option_env!("DEVGATE_PORTAL_TIMEOUT_SECS") {
        Some(secs) => Some(parse_u32(Some(secs), 0).saturating_mul(1_000)),
        None => None,
    },
}
.sanitized();

pub(crate) fn log_level() -> LevelFilter {
    match option_env!("DEVGATE_LOG_LEVEL") {
        Some("off") => LevelFilter::Off,
        Some("error") => LevelFilter::Error,
        Some("warn") => LevelFilter::Warn,
        Some("debug") => LevelFilter::Debug,
        Some("trace") => LevelFilter::Trace,
        _ => LevelFilter::Info,
    }
}

/// Decimal `u32` from a build-time variable; falls back on anything unparsable.
const fn parse_u32(value: Option<&str>, default: u32) -> u32 {
    let Some(value) = value else {
        return default;
    };
    let bytes = value.as_bytes();
    if bytes.is_empty() {
        return default;
    }
    let mut acc: u32 = 0;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if !b.is_ascii_digit() {
            return default;
        }
        acc = match acc.checked_mul(10) {
            Some(v) => match v.checked_add((b - b'0') as u32) {
                Some(v) => v,
                None => return default,
            },
            None => return default,
        };
        i += 1;
    }
    acc
}

const fn parse_u8(value: Option<&str>, default: u8) -> u8 {
    let parsed = parse_u32(value, default as u32);
    if parsed > u8::MAX as u32 {
        default
    } else {
        parsed as u8
    }
}
