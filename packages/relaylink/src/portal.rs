//! JSON API served on the onboarding access point (and the hotspot once
//! connected). Parsing and response bodies live here; the socket loop is
//! firmware glue.

use alloc::{format, string::String, vec::Vec};

use serde::Serialize;

use crate::http::{form_field, parse_content_length, parse_request_line, target_path};
use crate::provisioning::{ProvisioningNotice, ProvisioningState};
use crate::radio::{LinkInfo, ScanEntry};

/// Largest request body the portal reads.
pub const BODY_MAX: usize = 512;

pub const STATUS_OK: &str = "200 OK";
pub const STATUS_FOUND: &str = "302 Found";
pub const STATUS_BAD_REQUEST: &str = "400 Bad Request";
pub const STATUS_NOT_FOUND: &str = "404 Not Found";
pub const STATUS_METHOD_NOT_ALLOWED: &str = "405 Method Not Allowed";
pub const STATUS_CONFLICT: &str = "409 Conflict";
pub const STATUS_PAYLOAD_TOO_LARGE: &str = "413 Payload Too Large";
pub const STATUS_UNAVAILABLE: &str = "503 Service Unavailable";

// OS connectivity probes; redirecting them pops the captive sheet.
const CAPTIVE_PROBES: [&str; 6] = [
    "/generate_204",
    "/gen_204",
    "/hotspot-detect.html",
    "/library/test/success.html",
    "/connecttest.txt",
    "/ncsi.txt",
];

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PortalRequest {
    Scan,
    SaveWifi { ssid: String, password: String },
    ResetWifi,
    System,
    CaptiveProbe,
    BadRequest(&'static str),
    MethodNotAllowed,
    NotFound,
}

impl PortalRequest {
    /// Classifies a request from its head (request line and headers, no
    /// terminator) and body.
    pub fn parse(head: &str, body: &[u8]) -> Self {
        let Some((method, target)) = parse_request_line(head) else {
            return Self::BadRequest("bad request line");
        };
        let path = target_path(target);
        let route = match path {
            "/api/scan" => Route::Get(Self::Scan),
            "/api/system" | "/" => Route::Get(Self::System),
            "/api/wifi/save" => Route::Post,
            "/api/wifi/reset" => Route::Post,
            _ if CAPTIVE_PROBES.contains(&path) => Route::Get(Self::CaptiveProbe),
            _ => return Self::NotFound,
        };

        match (route, method) {
            (Route::Get(request), "GET" | "HEAD") => request,
            (Route::Post, "POST") if path == "/api/wifi/reset" => Self::ResetWifi,
            (Route::Post, "POST") => Self::parse_save(body),
            _ => Self::MethodNotAllowed,
        }
    }

    fn parse_save(body: &[u8]) -> Self {
        let Ok(body) = core::str::from_utf8(body) else {
            return Self::BadRequest("form body not utf-8");
        };
        let ssid = match form_field(body, "ssid") {
            Ok(Some(ssid)) => ssid,
            Ok(None) => return Self::BadRequest("missing ssid"),
            Err(reason) => return Self::BadRequest(reason),
        };
        let password = match form_field(body, "password") {
            Ok(password) => password.unwrap_or_default(),
            Err(reason) => return Self::BadRequest(reason),
        };
        Self::SaveWifi { ssid, password }
    }
}

enum Route {
    Get(PortalRequest),
    Post,
}

/// Body length the server has to read after the head, bounded by
/// [`BODY_MAX`].
pub fn expected_body_len(head: &str) -> Result<usize, &'static str> {
    let len = parse_content_length(head)?.unwrap_or(0);
    if len > BODY_MAX {
        return Err("body too large");
    }
    Ok(len)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PortalResponse {
    pub status: &'static str,
    pub body: String,
    pub location: Option<String>,
}

impl PortalResponse {
    pub fn json<T: Serialize>(status: &'static str, value: &T) -> Self {
        let body = serde_json::to_string(value).unwrap_or_else(|_| String::from("{}"));
        Self {
            status,
            body,
            location: None,
        }
    }

    pub fn error(status: &'static str, message: &str) -> Self {
        Self::json(status, &ErrorBody { error: message })
    }

    pub fn redirect(location: String) -> Self {
        Self {
            status: STATUS_FOUND,
            body: String::new(),
            location: Some(location),
        }
    }

    /// Status line and headers, terminator included.
    pub fn head(&self) -> String {
        let mut head = format!(
            "HTTP/1.0 {}\r\nConnection: close\r\nContent-Type: application/json\r\nContent-Length: {}\r\n",
            self.status,
            self.body.len()
        );
        if let Some(location) = &self.location {
            head.push_str("Location: ");
            head.push_str(location);
            head.push_str("\r\n");
        }
        head.push_str("\r\n");
        head
    }
}

/// What the control loop makes of a portal request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PortalReply {
    Ready(PortalResponse),
    /// Answer follows once the join outcome is known.
    Deferred,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
}

#[derive(Serialize)]
struct ScanItem<'a> {
    ssid: &'a str,
    rssi: i8,
    secure: bool,
}

#[derive(Serialize)]
struct SaveBody<'a> {
    success: bool,
    ip: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    hostname: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
}

#[derive(Serialize)]
struct ResetBody {
    success: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SystemBody<'a> {
    hostname: &'a str,
    state: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    ssid: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    rssi: Option<i8>,
    uptime_ms: u64,
}

pub fn scan_response(entries: &[ScanEntry]) -> PortalResponse {
    let items: Vec<ScanItem<'_>> = entries
        .iter()
        .map(|entry| ScanItem {
            ssid: &entry.ssid,
            rssi: entry.rssi,
            secure: entry.secure,
        })
        .collect();
    PortalResponse::json(STATUS_OK, &items)
}

/// Answer to a deferred save once the join has resolved. Notices other
/// than a join outcome yield `None`.
pub fn save_outcome(notice: &ProvisioningNotice, hostname: &str) -> Option<PortalResponse> {
    match notice {
        ProvisioningNotice::Connected { link, .. } => Some(PortalResponse::json(
            STATUS_OK,
            &SaveBody {
                success: true,
                ip: link.ip_string(),
                hostname: (!hostname.is_empty()).then_some(hostname),
                error: None,
            },
        )),
        ProvisioningNotice::ConnectFailed { error, .. } => {
            Some(save_failure(STATUS_OK, error.as_str()))
        }
        _ => None,
    }
}

pub fn save_failure(status: &'static str, reason: &str) -> PortalResponse {
    PortalResponse::json(
        status,
        &SaveBody {
            success: false,
            ip: String::new(),
            hostname: None,
            error: Some(reason),
        },
    )
}

pub fn reset_response() -> PortalResponse {
    PortalResponse::json(STATUS_OK, &ResetBody { success: true })
}

pub fn system_response(
    hostname: &str,
    state: ProvisioningState,
    ssid: Option<&str>,
    link: Option<LinkInfo>,
    uptime_ms: u64,
) -> PortalResponse {
    PortalResponse::json(
        STATUS_OK,
        &SystemBody {
            hostname,
            state: state.as_str(),
            ssid,
            ip: link.map(|link| link.ip_string()),
            rssi: link.and_then(|link| link.rssi),
            uptime_ms,
        },
    )
}
