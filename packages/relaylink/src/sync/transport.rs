use alloc::{format, string::String, vec::Vec};

use crate::error::SyncError;
use crate::http::{find_header_end, parse_status_line};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Method {
    Get,
    Put,
    Patch,
}

impl Method {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpReply {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpReply {
    /// 2xx passes; 401/403 are `Unauthorized`; anything else means the peer
    /// could not serve us.
    pub fn check(self) -> Result<Self, SyncError> {
        match status_error(self.status) {
            Some(err) => Err(err),
            None => Ok(self),
        }
    }

    /// Parses a complete HTTP/1.x response read up to connection close.
    pub fn parse(raw: &[u8]) -> Result<Self, SyncError> {
        let end = find_header_end(raw).ok_or(SyncError::MalformedPayload)?;
        let head = core::str::from_utf8(&raw[..end]).map_err(|_| SyncError::MalformedPayload)?;
        let status = parse_status_line(head).ok_or(SyncError::MalformedPayload)?;
        Ok(Self {
            status,
            body: raw[end + 4..].to_vec(),
        })
    }
}

/// HTTP/1.0 request with `Connection: close`, so the reply ends at EOF.
pub fn encode_request(method: Method, authority: &str, path: &str, body: Option<&[u8]>) -> Vec<u8> {
    let mut request = format!(
        "{} {} HTTP/1.0\r\nHost: {}\r\nConnection: close\r\n",
        method.as_str(),
        path,
        authority
    )
    .into_bytes();
    if let Some(body) = body {
        request.extend_from_slice(
            format!(
                "Content-Type: application/json\r\nContent-Length: {}\r\n",
                body.len()
            )
            .as_bytes(),
        );
    }
    request.extend_from_slice(b"\r\n");
    if let Some(body) = body {
        request.extend_from_slice(body);
    }
    request
}

pub fn status_error(status: u16) -> Option<SyncError> {
    match status {
        200..=299 => None,
        401 | 403 => Some(SyncError::Unauthorized),
        _ => Some(SyncError::PeerUnreachable),
    }
}

/// One request/response exchange against the configured backend. The
/// implementation owns host, port and the I/O deadline.
#[allow(async_fn_in_trait)]
pub trait RestTransport {
    async fn request(
        &mut self,
        method: Method,
        path: &str,
        body: Option<&[u8]>,
    ) -> Result<HttpReply, SyncError>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamEvent {
    Text(String),
    /// The connection is gone, cleanly or not.
    Closed,
}

/// A persistent message connection to the backend.
#[allow(async_fn_in_trait)]
pub trait StreamTransport {
    async fn connect(&mut self, path: &str) -> Result<(), SyncError>;

    async fn send_text(&mut self, text: &str) -> Result<(), SyncError>;

    /// Next pending event, `None` when nothing is waiting. Must not wait
    /// for traffic.
    async fn poll(&mut self) -> Option<StreamEvent>;

    async fn close(&mut self);
}

/// Stand-in for the strategy a build does not use.
#[derive(Debug)]
pub enum NoTransport {}

impl RestTransport for NoTransport {
    async fn request(
        &mut self,
        _method: Method,
        _path: &str,
        _body: Option<&[u8]>,
    ) -> Result<HttpReply, SyncError> {
        match *self {}
    }
}

impl StreamTransport for NoTransport {
    async fn connect(&mut self, _path: &str) -> Result<(), SyncError> {
        match *self {}
    }

    async fn send_text(&mut self, _text: &str) -> Result<(), SyncError> {
        match *self {}
    }

    async fn poll(&mut self) -> Option<StreamEvent> {
        match *self {}
    }

    async fn close(&mut self) {
        match *self {}
    }
}
