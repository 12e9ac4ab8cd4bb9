//! Formatting helpers for reported values.

/// Format a converted reading the way it is reported in status.
///
/// # Example
///
/// ```
/// use ble_device_sync::format_reading;
///
/// assert_eq!(format_reading(21.5), "21.500000");
/// ```
#[inline]
pub fn format_reading(value: f64) -> String {
    format!("{:.6}", value)
}

/// Format a raw notification payload as a quoted, escaped string.
///
/// Valid UTF-8 is kept as text with quotes, backslashes and control
/// characters escaped. Bytes that are not valid UTF-8 are written as `\xNN`.
///
/// # Example
///
/// ```
/// use ble_device_sync::quote_bytes;
///
/// assert_eq!(quote_bytes(b"ok\x01"), r#""ok\x01""#);
/// assert_eq!(quote_bytes("21.5°C".as_bytes()), r#""21.5°C""#);
/// ```
pub fn quote_bytes(data: &[u8]) -> String {
    let mut quoted = String::with_capacity(data.len() + 2);
    quoted.push('"');

    let mut rest = data;
    while !rest.is_empty() {
        match std::str::from_utf8(rest) {
            Ok(text) => {
                push_escaped_str(&mut quoted, text);
                break;
            }
            Err(e) => {
                let (valid, invalid) = rest.split_at(e.valid_up_to());
                if let Ok(text) = std::str::from_utf8(valid) {
                    push_escaped_str(&mut quoted, text);
                }

                let bad = e.error_len().unwrap_or(invalid.len());
                for byte in &invalid[..bad] {
                    quoted.push_str(&format!("\\x{:02x}", byte));
                }
                rest = &invalid[bad..];
            }
        }
    }

    quoted.push('"');
    quoted
}

fn push_escaped_str(out: &mut String, text: &str) {
    for c in text.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\x07' => out.push_str("\\a"),
            '\x08' => out.push_str("\\b"),
            '\x0c' => out.push_str("\\f"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\x0b' => out.push_str("\\v"),
            c if c.is_control() => {
                let code = c as u32;
                if code < 0x80 {
                    out.push_str(&format!("\\x{:02x}", code));
                } else {
                    out.push_str(&format!("\\u{:04x}", code));
                }
            }
            c => out.push(c),
        }
    }
}
