use core::fmt;

use heapless::Vec;
use log::{debug, info};

use crate::{
    layout::{
        FieldSlot, MQTT_SERVER, MQTT_SERVER_MAX, MQTT_TOPIC, MQTT_TOPIC_MAX, PASSWORD,
        PASSWORD_MAX, SSID, SSID_MAX,
    },
    store::{ByteStore, StoreError},
};

/// Bounded string field stored without a length prefix.
///
/// Holds the bytes up to the first NUL or up to `N`. Fields read from a store that
/// was never saved may hold arbitrary bytes.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Field<const N: usize>(Vec<u8, N>);

impl<const N: usize> Field<N> {
    pub const MAX_LEN: usize = N;

    pub const fn new() -> Self {
        Self(Vec::new())
    }

    /// Decodes a raw storage window: stops at the first NUL, never reads past `N`.
    pub fn from_window(window: &[u8]) -> Self {
        let window = &window[..window.len().min(N)];
        let end = window.iter().position(|&b| b == 0).unwrap_or(window.len());
        let mut bytes = Vec::new();
        // `end <= N`, so the copy always fits.
        let _ = bytes.extend_from_slice(&window[..end]);
        Self(bytes)
    }

    /// Copies `value`, silently dropping whatever does not fit in `N` bytes.
    ///
    /// Valid UTF-8 is cut on a character boundary so the result stays valid text.
    pub fn truncated(value: &[u8]) -> Self {
        let mut end = value.len().min(N);
        if let Ok(text) = core::str::from_utf8(value) {
            while !text.is_char_boundary(end) {
                end -= 1;
            }
        }
        let end = value[..end]
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(end);
        let mut bytes = Vec::new();
        let _ = bytes.extend_from_slice(&value[..end]);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn as_str(&self) -> Option<&str> {
        core::str::from_utf8(&self.0).ok()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<const N: usize> fmt::Debug for Field<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_str() {
            Some(text) => write!(f, "{text:?}"),
            None => write!(f, "<{} non-utf8 bytes>", self.len()),
        }
    }
}

#[derive(Clone, Default, PartialEq, Eq)]
pub struct CredentialRecord {
    pub ssid: Field<SSID_MAX>,
    pub password: Field<PASSWORD_MAX>,
    pub mqtt_server: Field<MQTT_SERVER_MAX>,
    pub mqtt_topic: Field<MQTT_TOPIC_MAX>,
}

impl fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialRecord")
            .field("ssid", &self.ssid)
            .field("password_len", &self.password.len())
            .field("mqtt_server", &self.mqtt_server)
            .field("mqtt_topic", &self.mqtt_topic)
            .finish()
    }
}

/// Credential view over the byte store.
pub struct CredentialStore<'s, S: ByteStore> {
    store: &'s mut S,
}

impl<'s, S: ByteStore> CredentialStore<'s, S> {
    pub fn new(store: &'s mut S) -> Self {
        Self { store }
    }

    pub fn load(&self) -> Result<CredentialRecord, StoreError> {
        let record = CredentialRecord {
            ssid: self.read_field(SSID)?,
            password: self.read_field(PASSWORD)?,
            mqtt_server: self.read_field(MQTT_SERVER)?,
            mqtt_topic: self.read_field(MQTT_TOPIC)?,
        };
        info!("credentials: loaded {:?}", record);
        Ok(record)
    }

    /// Writes all four fields and commits once.
    ///
    /// Power loss after the writes but before the commit finishes can leave old and
    /// new field values mixed on flash.
    pub fn save(&mut self, record: &CredentialRecord) -> Result<(), StoreError> {
        self.write_field(SSID, record.ssid.as_bytes())?;
        self.write_field(PASSWORD, record.password.as_bytes())?;
        self.write_field(MQTT_SERVER, record.mqtt_server.as_bytes())?;
        self.write_field(MQTT_TOPIC, record.mqtt_topic.as_bytes())?;
        self.store.commit()?;
        info!("credentials: saved {:?}", record);
        Ok(())
    }

    fn read_field<const N: usize>(&self, slot: FieldSlot) -> Result<Field<N>, StoreError> {
        let mut window = [0u8; N];
        self.store.read_into(slot.offset, &mut window)?;
        Ok(Field::from_window(&window))
    }

    fn write_field(&mut self, slot: FieldSlot, value: &[u8]) -> Result<(), StoreError> {
        let len = value.len().min(slot.max_len);
        self.store.write_all(slot.offset, &value[..len])?;
        for address in slot.offset + len..slot.end() {
            self.store.write(address, 0)?;
        }
        debug!(
            "credentials: wrote field offset={} len={}",
            slot.offset, len
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::MemoryStore;

    fn record(ssid: &str, password: &str, server: &str, topic: &str) -> CredentialRecord {
        CredentialRecord {
            ssid: Field::truncated(ssid.as_bytes()),
            password: Field::truncated(password.as_bytes()),
            mqtt_server: Field::truncated(server.as_bytes()),
            mqtt_topic: Field::truncated(topic.as_bytes()),
        }
    }

    #[test]
    fn save_then_load_returns_same_values() {
        let mut store = MemoryStore::filled(0xFF);
        let saved = record("Home", "secret123", "broker.local", "devices/42");
        CredentialStore::new(&mut store).save(&saved).unwrap();
        store.reboot();

        let loaded = CredentialStore::new(&mut store).load().unwrap();
        assert_eq!(loaded, saved);
        assert_eq!(loaded.ssid.as_str(), Some("Home"));
        assert_eq!(store.commits, 1);
    }

    #[test]
    fn save_truncates_each_field_to_its_bound() {
        let long = "x".repeat(100);
        let saved = record(&long, &long, &long, &long);
        assert_eq!(saved.ssid.len(), SSID_MAX);
        assert_eq!(saved.mqtt_topic.len(), MQTT_TOPIC_MAX);

        let mut store = MemoryStore::filled(0);
        CredentialStore::new(&mut store).save(&saved).unwrap();
        let loaded = CredentialStore::new(&mut store).load().unwrap();
        assert_eq!(loaded.ssid.as_bytes(), &long.as_bytes()[..SSID_MAX]);
        assert_eq!(loaded.password.len(), PASSWORD_MAX);
        assert_eq!(loaded.mqtt_server.len(), MQTT_SERVER_MAX);
        assert_eq!(loaded.mqtt_topic.len(), MQTT_TOPIC_MAX);
    }

    #[test]
    fn full_length_field_does_not_bleed_into_neighbour() {
        let mut store = MemoryStore::filled(0);
        let saved = record(&"s".repeat(SSID_MAX), "pw", "", "");
        CredentialStore::new(&mut store).save(&saved).unwrap();
        let loaded = CredentialStore::new(&mut store).load().unwrap();
        assert_eq!(loaded.ssid.len(), SSID_MAX);
        assert_eq!(loaded.password.as_str(), Some("pw"));
    }

    #[test]
    fn shorter_value_clears_previous_tail() {
        let mut store = MemoryStore::filled(0);
        CredentialStore::new(&mut store)
            .save(&record("LongNetworkName", "", "", ""))
            .unwrap();
        CredentialStore::new(&mut store)
            .save(&record("Net", "", "", ""))
            .unwrap();
        let loaded = CredentialStore::new(&mut store).load().unwrap();
        assert_eq!(loaded.ssid.as_str(), Some("Net"));
    }

    #[test]
    fn erased_flash_loads_as_unreadable_bytes() {
        let mut store = MemoryStore::filled(0xFF);
        let loaded = CredentialStore::new(&mut store).load().unwrap();
        assert_eq!(loaded.ssid.len(), SSID_MAX);
        assert_eq!(loaded.ssid.as_str(), None);
    }

    #[test]
    fn failed_commit_is_reported_and_not_durable() {
        let mut store = MemoryStore::filled(0);
        store.fail_commit = true;
        let result = CredentialStore::new(&mut store).save(&record("Home", "pw", "", ""));
        assert_eq!(result, Err(StoreError::FlashWrite));
        store.reboot();
        let loaded = CredentialStore::new(&mut store).load().unwrap();
        assert!(loaded.ssid.is_empty());
    }

    #[test]
    fn truncation_respects_utf8_boundaries() {
        let value = "é".repeat(20);
        let field = Field::<SSID_MAX>::truncated(value.as_bytes());
        assert_eq!(field.len(), 32);
        assert!(field.as_str().is_some());

        let value = "a".to_owned() + &"é".repeat(20);
        let field = Field::<SSID_MAX>::truncated(value.as_bytes());
        assert_eq!(field.len(), 31);
        assert!(field.as_str().is_some());
    }

    #[test]
    fn window_stops_at_first_nul() {
        let field = Field::<8>::from_window(b"abc\0def\0");
        assert_eq!(field.as_bytes(), b"abc");
    }

    #[test]
    fn debug_output_hides_password() {
        let rendered = std::format!("{:?}", record("Home", "secret123", "", ""));
        assert!(!rendered.contains("secret123"));
        assert!(rendered.contains("password_len: 9"));
    }
}
