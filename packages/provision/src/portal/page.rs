use core::fmt::{self, Write as _};

use crate::credentials::CredentialRecord;

/// Configuration form pre-filled from the in-memory record.
pub struct ConfigPage<'a> {
    record: &'a CredentialRecord,
}

impl<'a> ConfigPage<'a> {
    pub fn new(record: &'a CredentialRecord) -> Self {
        Self { record }
    }
}

const PAGE_HEAD: &str = r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>Device Configuration</title>
<style>
body { font-family: Arial, sans-serif; }
h1 { text-align: center; }
form { width: 80%; max-width: 400px; margin: 20px auto; padding: 20px; border: 1px solid #ccc; border-radius: 5px; }
label { display: block; margin-bottom: 5px; }
input[type="text"], input[type="password"] { width: 100%; padding: 8px; margin-bottom: 10px; border: 1px solid #ddd; border-radius: 3px; box-sizing: border-box; }
input[type="submit"] { background-color: #007bff; color: white; padding: 10px 15px; border: none; border-radius: 3px; cursor: pointer; font-size: 16px; }
</style>
</head>
<body>
<h1>Device Configuration</h1>
<form action="/save" method="post">
"#;

const PAGE_TAIL: &str = r#"<input type="submit" value="Save &amp; Restart">
</form>
</body>
</html>
"#;

impl fmt::Display for ConfigPage<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(PAGE_HEAD)?;
        input(f, "ssid", "WiFi SSID", "text", self.record.ssid.as_bytes())?;
        input(
            f,
            "password",
            "WiFi Password",
            "password",
            self.record.password.as_bytes(),
        )?;
        input(
            f,
            "mqtt_server",
            "MQTT Server",
            "text",
            self.record.mqtt_server.as_bytes(),
        )?;
        input(
            f,
            "mqtt_topic",
            "MQTT Main Topic",
            "text",
            self.record.mqtt_topic.as_bytes(),
        )?;
        f.write_str(PAGE_TAIL)
    }
}

fn input(
    f: &mut fmt::Formatter<'_>,
    name: &str,
    label: &str,
    kind: &str,
    value: &[u8],
) -> fmt::Result {
    writeln!(
        f,
        r#"<label for="{name}">{label}:</label>
<input type="{kind}" id="{name}" name="{name}" value="{}"><br>"#,
        Escaped(value)
    )
}

/// HTML-escapes raw field bytes; invalid UTF-8 becomes U+FFFD.
pub struct Escaped<'a>(pub &'a [u8]);

impl fmt::Display for Escaped<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for chunk in self.0.utf8_chunks() {
            for ch in chunk.valid().chars() {
                match ch {
                    '&' => f.write_str("&amp;")?,
                    '<' => f.write_str("&lt;")?,
                    '>' => f.write_str("&gt;")?,
                    '"' => f.write_str("&quot;")?,
                    '\'' => f.write_str("&#39;")?,
                    other => f.write_char(other)?,
                }
            }
            if !chunk.invalid().is_empty() {
                f.write_char(char::REPLACEMENT_CHARACTER)?;
            }
        }
        Ok(())
    }
}
