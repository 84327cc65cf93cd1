//! Fixed address map of the persistent byte store.
//!
//! The map is part of the on-flash format; devices in the field depend on it, so the
//! offsets never move.

use crate::identity::FINGERPRINT_MAX_LEN;

/// Size of the emulated EEPROM region kept in the last flash sector.
pub const STORE_SIZE: usize = 512;

/// Smallest region the address map needs.
pub const STORE_RESERVED: usize = 256;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FieldSlot {
    pub offset: usize,
    pub max_len: usize,
}

impl FieldSlot {
    pub const fn new(offset: usize, max_len: usize) -> Self {
        Self { offset, max_len }
    }

    pub const fn end(self) -> usize {
        self.offset + self.max_len
    }
}

pub const AUTH_RECORD: FieldSlot = FieldSlot::new(0, 128);
pub const SSID: FieldSlot = FieldSlot::new(64, 32);
pub const PASSWORD: FieldSlot = FieldSlot::new(96, 32);
pub const MQTT_SERVER: FieldSlot = FieldSlot::new(128, 64);
pub const MQTT_TOPIC: FieldSlot = FieldSlot::new(192, 64);

pub const SSID_MAX: usize = SSID.max_len;
pub const PASSWORD_MAX: usize = PASSWORD.max_len;
pub const MQTT_SERVER_MAX: usize = MQTT_SERVER.max_len;
pub const MQTT_TOPIC_MAX: usize = MQTT_TOPIC.max_len;

// The authorization record is declared with a 128 byte bound, but reads and writes
// only ever touch the fingerprint's own length, which must stay clear of the SSID.
const _: () = assert!(AUTH_RECORD.offset + FINGERPRINT_MAX_LEN <= SSID.offset);
const _: () = assert!(FINGERPRINT_MAX_LEN <= AUTH_RECORD.max_len);
const _: () = assert!(SSID.end() <= PASSWORD.offset);
const _: () = assert!(PASSWORD.end() <= MQTT_SERVER.offset);
const _: () = assert!(MQTT_SERVER.end() <= MQTT_TOPIC.offset);
const _: () = assert!(MQTT_TOPIC.end() <= STORE_RESERVED);
const _: () = assert!(STORE_RESERVED <= STORE_SIZE);
