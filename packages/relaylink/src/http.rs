//! HTTP/1.x head parsing shared by the portal server and the backend
//! clients. Errors are static reasons; callers map them to a status or a
//! [`crate::SyncError`].

use alloc::{string::String, vec::Vec};

pub fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|window| window == b"\r\n\r\n")
}

pub fn parse_request_line(header: &str) -> Option<(&str, &str)> {
    let first_line = header.lines().next()?;
    let mut parts = first_line.split_ascii_whitespace();
    let method = parts.next()?;
    let target = parts.next()?;
    let _version = parts.next()?;
    Some((method, target))
}

/// Status code of a response head (`HTTP/1.1 200 OK`).
pub fn parse_status_line(header: &str) -> Option<u16> {
    let first_line = header.lines().next()?;
    let mut parts = first_line.split_ascii_whitespace();
    let version = parts.next()?;
    if !version.starts_with("HTTP/") {
        return None;
    }
    parts.next()?.parse().ok()
}

pub fn parse_content_length(header: &str) -> Result<Option<usize>, &'static str> {
    let mut content_length = None;

    for line in header.lines().skip(1) {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };

        if !name.eq_ignore_ascii_case("content-length") {
            continue;
        }

        let parsed = value
            .trim()
            .parse::<usize>()
            .map_err(|_| "invalid content-length")?;

        if content_length.is_some() {
            return Err("duplicate content-length");
        }

        content_length = Some(parsed);
    }

    Ok(content_length)
}

pub fn header_value<'a>(header: &'a str, wanted_name: &str) -> Option<&'a str> {
    for line in header.lines().skip(1) {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };

        if name.eq_ignore_ascii_case(wanted_name) {
            return Some(value.trim());
        }
    }

    None
}

pub fn target_path(target: &str) -> &str {
    target.split('?').next().unwrap_or(target)
}

/// Decodes one `application/x-www-form-urlencoded` component.
pub fn percent_decode(encoded: &str) -> Result<String, &'static str> {
    let bytes = encoded.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0usize;

    while i < bytes.len() {
        let b = bytes[i];
        let decoded = if b == b'%' {
            if i + 2 >= bytes.len() {
                return Err("bad percent-encoding");
            }
            let hi = decode_hex(bytes[i + 1]).ok_or("bad percent-encoding")?;
            let lo = decode_hex(bytes[i + 2]).ok_or("bad percent-encoding")?;
            i += 3;
            (hi << 4) | lo
        } else if b == b'+' {
            i += 1;
            b' '
        } else {
            i += 1;
            b
        };
        out.push(decoded);
    }

    String::from_utf8(out).map_err(|_| "form value not utf-8")
}

/// Value of `key` in a form body or query string, decoded. Missing keys are
/// `Ok(None)`.
pub fn form_field(body: &str, key: &str) -> Result<Option<String>, &'static str> {
    for pair in body.split('&') {
        let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
        if percent_decode(name)? == key {
            return percent_decode(value).map(Some);
        }
    }
    Ok(None)
}

fn decode_hex(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(10 + (b - b'a')),
        b'A'..=b'F' => Some(10 + (b - b'A')),
        _ => None,
    }
}
