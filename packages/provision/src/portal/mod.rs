//! Local configuration service served from the device's own access point.

pub mod dhcp;
pub mod http;
pub mod page;

use core::fmt::{self, Write as _};

use heapless::String;
use log::{info, warn};

use crate::{
    credentials::{CredentialRecord, CredentialStore},
    identity::{HardwareIdentity, IdentityError},
    store::ByteStore,
    RestartReason,
};
use http::{Method, Request, RequestError, SaveForm};
use page::ConfigPage;

pub const SAVED_MESSAGE: &str = "Configuration saved. Restarting...";

/// WPA2 needs at least eight passphrase characters.
pub const AP_PASSPHRASE_MIN: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    Ok,
    BadRequest,
    NotFound,
    MethodNotAllowed,
    PayloadTooLarge,
    InternalError,
}

impl Status {
    pub fn line(self) -> &'static str {
        match self {
            Self::Ok => "200 OK",
            Self::BadRequest => "400 Bad Request",
            Self::NotFound => "404 Not Found",
            Self::MethodNotAllowed => "405 Method Not Allowed",
            Self::PayloadTooLarge => "413 Payload Too Large",
            Self::InternalError => "500 Internal Server Error",
        }
    }
}

pub enum ReplyBody<'a> {
    Page(ConfigPage<'a>),
    Text(&'static str),
}

impl ReplyBody<'_> {
    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Page(_) => "text/html; charset=utf-8",
            Self::Text(_) => "text/plain; charset=utf-8",
        }
    }
}

impl fmt::Display for ReplyBody<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Page(page) => fmt::Display::fmt(page, f),
            Self::Text(text) => f.write_str(text),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RestartAfter {
    pub reason: RestartReason,
    pub delay_ms: u32,
}

pub struct Reply<'a> {
    pub status: Status,
    pub body: ReplyBody<'a>,
    /// When set, the device restarts this long after the reply is sent.
    pub restart: Option<RestartAfter>,
}

impl<'a> Reply<'a> {
    fn text(status: Status, text: &'static str) -> Self {
        Self {
            status,
            body: ReplyBody::Text(text),
            restart: None,
        }
    }

    /// Reply for a request that never reached a route.
    pub fn rejected(err: RequestError) -> Reply<'static> {
        match err {
            RequestError::HeaderTooLarge | RequestError::BodyTooLarge => {
                Reply::text(Status::PayloadTooLarge, "request too large")
            }
            RequestError::Incomplete | RequestError::Malformed => {
                Reply::text(Status::BadRequest, "bad request")
            }
        }
    }

    /// Writes the full HTTP/1.0 response, headers included.
    pub fn write_to<W: fmt::Write>(&self, out: &mut W) -> fmt::Result {
        let mut counter = ByteCounter(0);
        write!(counter, "{}", self.body)?;

        write!(
            out,
            "HTTP/1.0 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            self.status.line(),
            self.body.content_type(),
            counter.0,
            self.body
        )
    }
}

struct ByteCounter(usize);

impl fmt::Write for ByteCounter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.0 += s.len();
        Ok(())
    }
}

/// Serves the configuration form and persists submitted values.
///
/// Owns the only in-memory copy of the credentials for the rest of the boot.
pub struct ConfigService {
    record: CredentialRecord,
    restart_delay_ms: u32,
}

impl ConfigService {
    pub fn new(record: CredentialRecord, restart_delay_ms: u32) -> Self {
        Self {
            record,
            restart_delay_ms,
        }
    }

    pub fn record(&self) -> &CredentialRecord {
        &self.record
    }

    pub fn handle<S: ByteStore>(&mut self, request: Request<'_>, store: &mut S) -> Reply<'_> {
        info!(
            "portal: request method={:?} path={} body_len={}",
            request.method,
            request.path,
            request.body.len()
        );
        match (request.path, request.method) {
            ("/", Method::Get) => Reply {
                status: Status::Ok,
                body: ReplyBody::Page(ConfigPage::new(&self.record)),
                restart: None,
            },
            ("/save", Method::Post) => self.save(request.body, store),
            ("/", _) | ("/save", _) => Reply::text(Status::MethodNotAllowed, "method not allowed"),
            _ => Reply::text(Status::NotFound, "not found"),
        }
    }

    fn save<S: ByteStore>(&mut self, body: &[u8], store: &mut S) -> Reply<'_> {
        let form = match SaveForm::parse(body) {
            Ok(form) => form,
            Err(err) => {
                warn!("portal: form err={}", err);
                return Reply::text(Status::BadRequest, "malformed form");
            }
        };

        let mut updated = self.record.clone();
        form.apply_to(&mut updated);

        if let Err(err) = CredentialStore::new(store).save(&updated) {
            warn!("portal: save err={}", err);
            return Reply::text(Status::InternalError, "save failed");
        }
        self.record = updated;

        Reply {
            status: Status::Ok,
            body: ReplyBody::Text(SAVED_MESSAGE),
            restart: Some(RestartAfter {
                reason: RestartReason::CredentialsSaved,
                delay_ms: self.restart_delay_ms,
            }),
        }
    }
}

/// Name and passphrase of the configuration access point.
///
/// Derived from public hardware identifiers; not a security boundary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccessPointCredentials {
    pub ssid: String<32>,
    pub passphrase: String<16>,
}

impl AccessPointCredentials {
    pub fn derive<I: HardwareIdentity + ?Sized>(identity: &I) -> Result<Self, IdentityError> {
        let mac = identity.network_address()?;
        let chip_id = identity.chip_id()?;

        let mut ssid = String::new();
        // 17 address characters plus at most 10 digits.
        write!(ssid, "{mac}{chip_id}").map_err(|_| IdentityError::TextOverflow)?;
        let mut passphrase = String::new();
        write!(passphrase, "{chip_id:0width$}", width = AP_PASSPHRASE_MIN)
            .map_err(|_| IdentityError::TextOverflow)?;

        Ok(Self { ssid, passphrase })
    }
}

#[cfg(test)]
mod tests {
    use std::string::String as StdString;

    use super::*;
    use crate::credentials::Field;
    use crate::identity::test_support::{test_identity, FixedFlash, TEST_MAC};
    use crate::identity::Esp8266Identity;
    use crate::store::test_support::MemoryStore;

    fn service_with(record: CredentialRecord) -> ConfigService {
        ConfigService::new(record, 2_000)
    }

    fn existing() -> CredentialRecord {
        CredentialRecord {
            ssid: Field::truncated(b"Office"),
            password: Field::truncated(b"oldpass"),
            mqtt_server: Field::truncated(b"broker.local"),
            mqtt_topic: Field::truncated(b"home/sensor"),
        }
    }

    fn get(path: &str) -> Request<'_> {
        Request {
            method: Method::Get,
            path,
            body: &[],
        }
    }

    fn post<'a>(path: &'a str, body: &'a [u8]) -> Request<'a> {
        Request {
            method: Method::Post,
            path,
            body,
        }
    }

    fn render(reply: &Reply<'_>) -> StdString {
        let mut out = StdString::new();
        reply.write_to(&mut out).unwrap();
        out
    }

    #[test]
    fn root_serves_prefilled_form() {
        let mut store = MemoryStore::filled(0xFF);
        let mut service = service_with(existing());

        let reply = service.handle(get("/"), &mut store);

        assert_eq!(reply.status, Status::Ok);
        assert!(reply.restart.is_none());
        let text = render(&reply);
        assert!(text.starts_with("HTTP/1.0 200 OK\r\nContent-Type: text/html"));
        assert!(text.contains(r#"value="Office""#));
    }

    #[test]
    fn partial_save_persists_and_requests_restart() {
        let mut store = MemoryStore::filled(0xFF);
        CredentialStore::new(&mut store).save(&existing()).unwrap();
        store.commits = 0;
        let mut service = service_with(existing());

        let reply = service.handle(post("/save", b"ssid=Home&password=secret123"), &mut store);

        assert_eq!(reply.status, Status::Ok);
        assert_eq!(
            reply.restart,
            Some(RestartAfter {
                reason: RestartReason::CredentialsSaved,
                delay_ms: 2_000
            })
        );
        assert!(render(&reply).ends_with("\r\n\r\nConfiguration saved. Restarting..."));
        assert_eq!(store.commits, 1);

        store.reboot();
        let loaded = CredentialStore::new(&mut store).load().unwrap();
        assert_eq!(loaded.ssid.as_str(), Some("Home"));
        assert_eq!(loaded.password.as_str(), Some("secret123"));
        assert_eq!(loaded.mqtt_server.as_str(), Some("broker.local"));
        assert_eq!(loaded.mqtt_topic.as_str(), Some("home/sensor"));
        assert_eq!(service.record(), &loaded);
    }

    #[test]
    fn failed_commit_keeps_record_and_skips_restart() {
        let mut store = MemoryStore::filled(0xFF);
        store.fail_commit = true;
        let mut service = service_with(existing());

        let reply = service.handle(post("/save", b"ssid=Home"), &mut store);

        assert_eq!(reply.status, Status::InternalError);
        assert!(reply.restart.is_none());
        assert_eq!(service.record(), &existing());
    }

    #[test]
    fn malformed_form_is_rejected_without_writing() {
        let mut store = MemoryStore::filled(0xFF);
        let mut service = service_with(existing());

        let reply = service.handle(post("/save", b"ssid=%G1"), &mut store);

        assert_eq!(reply.status, Status::BadRequest);
        assert_eq!(store.commits, 0);
    }

    #[test]
    fn routing_errors() {
        let mut store = MemoryStore::filled(0xFF);
        let mut service = service_with(existing());

        assert_eq!(service.handle(get("/save"), &mut store).status, Status::MethodNotAllowed);
        assert_eq!(service.handle(post("/", b""), &mut store).status, Status::MethodNotAllowed);
        assert_eq!(service.handle(get("/favicon.ico"), &mut store).status, Status::NotFound);
        assert_eq!(
            Reply::rejected(RequestError::BodyTooLarge).status,
            Status::PayloadTooLarge
        );
        assert_eq!(
            Reply::rejected(RequestError::Malformed).status,
            Status::BadRequest
        );
    }

    #[test]
    fn content_length_matches_body() {
        let reply = Reply::rejected(RequestError::Malformed);
        assert_eq!(
            render(&reply),
            "HTTP/1.0 400 Bad Request\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: 11\r\nConnection: close\r\n\r\nbad request"
        );
    }

    #[test]
    fn access_point_credentials_follow_identity() {
        let ap = AccessPointCredentials::derive(&test_identity()).unwrap();
        assert_eq!(ap.ssid.as_str(), "AA:BB:CC:DD:EE:FF1234567");
        assert_eq!(ap.passphrase.as_str(), "01234567");

        let wide = Esp8266Identity::new(TEST_MAC, Some(4_000_000_000), FixedFlash::new(1, 2));
        let ap = AccessPointCredentials::derive(&wide).unwrap();
        assert_eq!(ap.ssid.as_str(), "AA:BB:CC:DD:EE:FF4000000000");
        assert_eq!(ap.passphrase.as_str(), "4000000000");
    }
}
