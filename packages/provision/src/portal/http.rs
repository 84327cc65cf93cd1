//! Minimal HTTP/1.x request parsing for the configuration service.

use core::fmt;

use heapless::Vec;

use crate::{
    credentials::{CredentialRecord, Field},
    layout::{MQTT_SERVER_MAX, MQTT_TOPIC_MAX, PASSWORD_MAX, SSID_MAX},
};

/// Request line plus headers, including the blank line.
pub const REQUEST_HEAD_MAX: usize = 1024;
pub const REQUEST_BODY_MAX: usize = 512;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Other,
}

impl Method {
    fn parse(token: &str) -> Self {
        match token {
            "GET" => Self::Get,
            "POST" => Self::Post,
            _ => Self::Other,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestError {
    /// The blank line ending the headers has not arrived yet.
    Incomplete,
    HeaderTooLarge,
    BodyTooLarge,
    Malformed,
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Incomplete => f.write_str("incomplete request head"),
            Self::HeaderTooLarge => f.write_str("header too large"),
            Self::BodyTooLarge => f.write_str("body too large"),
            Self::Malformed => f.write_str("malformed request"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RequestHead<'a> {
    pub method: Method,
    /// Target without its query string.
    pub path: &'a str,
    pub content_length: usize,
    /// Offset of the first body byte in the buffer handed to [`parse_head`].
    pub body_start: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Request<'a> {
    pub method: Method,
    pub path: &'a str,
    pub body: &'a [u8],
}

pub fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|window| window == b"\r\n\r\n")
}

/// Parses the head at the start of `buf`.
///
/// Returns [`RequestError::Incomplete`] while more bytes may complete the head.
pub fn parse_head(buf: &[u8]) -> Result<RequestHead<'_>, RequestError> {
    let Some(header_end) = find_header_end(buf) else {
        return if buf.len() >= REQUEST_HEAD_MAX {
            Err(RequestError::HeaderTooLarge)
        } else {
            Err(RequestError::Incomplete)
        };
    };
    if header_end + 4 > REQUEST_HEAD_MAX {
        return Err(RequestError::HeaderTooLarge);
    }

    let header = core::str::from_utf8(&buf[..header_end]).map_err(|_| RequestError::Malformed)?;
    let (method, target) = parse_request_line(header).ok_or(RequestError::Malformed)?;
    let content_length = parse_content_length(header)?.unwrap_or(0);
    if content_length > REQUEST_BODY_MAX {
        return Err(RequestError::BodyTooLarge);
    }

    Ok(RequestHead {
        method: Method::parse(method),
        path: target_path(target),
        content_length,
        body_start: header_end + 4,
    })
}

fn parse_request_line(header: &str) -> Option<(&str, &str)> {
    let first_line = header.lines().next()?;
    let mut parts = first_line.split_ascii_whitespace();
    let method = parts.next()?;
    let target = parts.next()?;
    let version = parts.next()?;
    if !version.starts_with("HTTP/") || parts.next().is_some() {
        return None;
    }
    Some((method, target))
}

fn parse_content_length(header: &str) -> Result<Option<usize>, RequestError> {
    for line in header.lines().skip(1) {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        if name.trim().eq_ignore_ascii_case("content-length") {
            return value
                .trim()
                .parse::<usize>()
                .map(Some)
                .map_err(|_| RequestError::Malformed);
        }
    }
    Ok(None)
}

fn target_path(target: &str) -> &str {
    target.split('?').next().unwrap_or(target)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FormError {
    BadPercentEncoding { offset: usize },
}

impl fmt::Display for FormError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadPercentEncoding { offset } => {
                write!(f, "bad percent-encoding at byte {offset}")
            }
        }
    }
}

/// Fields posted to `/save`; `None` means the name was not in the body.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SaveForm {
    pub ssid: Option<Field<SSID_MAX>>,
    pub password: Option<Field<PASSWORD_MAX>>,
    pub mqtt_server: Option<Field<MQTT_SERVER_MAX>>,
    pub mqtt_topic: Option<Field<MQTT_TOPIC_MAX>>,
}

impl SaveForm {
    /// Decodes an `application/x-www-form-urlencoded` body.
    ///
    /// Unknown names are skipped. When a name repeats, the first value wins.
    pub fn parse(body: &[u8]) -> Result<Self, FormError> {
        let mut form = Self::default();
        let mut offset = 0usize;

        for pair in body.split(|&b| b == b'&') {
            let pair_offset = offset;
            offset += pair.len() + 1;
            if pair.is_empty() {
                continue;
            }

            let (name, value) = match pair.iter().position(|&b| b == b'=') {
                Some(eq) => (&pair[..eq], &pair[eq + 1..]),
                None => (pair, &pair[pair.len()..]),
            };
            let mut decoded_name: Vec<u8, 16> = Vec::new();
            if percent_decode(name, &mut decoded_name, pair_offset).is_err() {
                // Undecodable or longer than any known name.
                continue;
            }
            let value_offset = pair_offset + (pair.len() - value.len());

            match decoded_name.as_slice() {
                b"ssid" => fill(&mut form.ssid, value, value_offset)?,
                b"password" => fill(&mut form.password, value, value_offset)?,
                b"mqtt_server" => fill(&mut form.mqtt_server, value, value_offset)?,
                b"mqtt_topic" => fill(&mut form.mqtt_topic, value, value_offset)?,
                _ => {}
            }
        }
        Ok(form)
    }

    pub fn is_empty(&self) -> bool {
        self.ssid.is_none()
            && self.password.is_none()
            && self.mqtt_server.is_none()
            && self.mqtt_topic.is_none()
    }

    /// Overwrites the fields present in the form, keeps the rest.
    pub fn apply_to(self, record: &mut CredentialRecord) {
        if let Some(ssid) = self.ssid {
            record.ssid = ssid;
        }
        if let Some(password) = self.password {
            record.password = password;
        }
        if let Some(mqtt_server) = self.mqtt_server {
            record.mqtt_server = mqtt_server;
        }
        if let Some(mqtt_topic) = self.mqtt_topic {
            record.mqtt_topic = mqtt_topic;
        }
    }
}

fn fill<const N: usize>(
    slot: &mut Option<Field<N>>,
    encoded: &[u8],
    offset: usize,
) -> Result<(), FormError> {
    let mut decoded: Vec<u8, REQUEST_BODY_MAX> = Vec::new();
    percent_decode(encoded, &mut decoded, offset)?;
    if slot.is_none() {
        *slot = Some(Field::truncated(&decoded));
    }
    Ok(())
}

/// Decodes `+` and `%XX` into `out`. Fails when `out` fills up.
fn percent_decode<const N: usize>(
    encoded: &[u8],
    out: &mut Vec<u8, N>,
    offset: usize,
) -> Result<(), FormError> {
    let mut i = 0usize;
    while i < encoded.len() {
        let b = encoded[i];
        let decoded = if b == b'%' {
            let bad = FormError::BadPercentEncoding { offset: offset + i };
            if i + 2 >= encoded.len() {
                return Err(bad);
            }
            let hi = decode_hex(encoded[i + 1]).ok_or(bad)?;
            let lo = decode_hex(encoded[i + 2]).ok_or(bad)?;
            i += 3;
            (hi << 4) | lo
        } else if b == b'+' {
            i += 1;
            b' '
        } else {
            i += 1;
            b
        };
        out.push(decoded)
            .map_err(|_| FormError::BadPercentEncoding { offset: offset + i })?;
    }
    Ok(())
}

fn decode_hex(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(10 + (b - b'a')),
        b'A'..=b'F' => Some(10 + (b - b'A')),
        _ => None,
    }
}
