//! Client side of the WebSocket wire format: the upgrade request, the
//! upgrade response check and frame coding. I/O stays with the caller.

use alloc::{format, string::String, vec::Vec};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use sha1::{Digest, Sha1};

use crate::error::SyncError;
use crate::http::{find_header_end, header_value, parse_status_line};

/// Frames larger than this are refused rather than buffered.
pub const FRAME_PAYLOAD_MAX: usize = 4096;

const ACCEPT_GUID: &[u8] = b"258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Opcode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl Opcode {
    const fn bits(self) -> u8 {
        match self {
            Self::Continuation => 0x0,
            Self::Text => 0x1,
            Self::Binary => 0x2,
            Self::Close => 0x8,
            Self::Ping => 0x9,
            Self::Pong => 0xA,
        }
    }

    const fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0x0 => Some(Self::Continuation),
            0x1 => Some(Self::Text),
            0x2 => Some(Self::Binary),
            0x8 => Some(Self::Close),
            0x9 => Some(Self::Ping),
            0xA => Some(Self::Pong),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub opcode: Opcode,
    pub payload: Vec<u8>,
}

/// What a client does with one inbound frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FrameAction {
    Deliver(String),
    /// Answer with a pong carrying this payload, then keep reading.
    Pong(Vec<u8>),
    PeerClosed,
    /// Nothing to surface; keep reading.
    Skip,
}

impl Frame {
    pub fn action(self) -> FrameAction {
        if !self.fin {
            return FrameAction::Skip;
        }
        match self.opcode {
            Opcode::Text => match String::from_utf8(self.payload) {
                Ok(text) => FrameAction::Deliver(text),
                Err(_) => FrameAction::Skip,
            },
            Opcode::Ping => FrameAction::Pong(self.payload),
            Opcode::Close => FrameAction::PeerClosed,
            Opcode::Binary | Opcode::Pong | Opcode::Continuation => FrameAction::Skip,
        }
    }
}

/// `Sec-WebSocket-Accept` value a server must return for `nonce`.
pub fn accept_key(nonce: [u8; 16]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(STANDARD.encode(nonce).as_bytes());
    hasher.update(ACCEPT_GUID);
    STANDARD.encode(hasher.finalize())
}

/// `GET` upgrade request for `path` on `authority`. `nonce` becomes the
/// `Sec-WebSocket-Key`.
pub fn handshake_request(authority: &str, path: &str, nonce: [u8; 16]) -> String {
    format!(
        "GET {} HTTP/1.1\r\nHost: {}\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: {}\r\nSec-WebSocket-Version: 13\r\n\r\n",
        path,
        authority,
        STANDARD.encode(nonce)
    )
}

/// Looks for a complete response head in `buf`. `Ok(None)` means more bytes
/// are needed; `Ok(Some(n))` means the upgrade was accepted and the first
/// `n` bytes belong to the head. The accept key must match `nonce`.
pub fn check_handshake(buf: &[u8], nonce: [u8; 16]) -> Result<Option<usize>, SyncError> {
    let Some(end) = find_header_end(buf) else {
        return Ok(None);
    };
    let head = core::str::from_utf8(&buf[..end]).map_err(|_| SyncError::MalformedPayload)?;
    match parse_status_line(head) {
        Some(101) => {}
        Some(401 | 403) => return Err(SyncError::Unauthorized),
        Some(_) => return Err(SyncError::PeerUnreachable),
        None => return Err(SyncError::MalformedPayload),
    }
    let upgraded = header_value(head, "upgrade")
        .is_some_and(|value| value.eq_ignore_ascii_case("websocket"));
    if !upgraded {
        return Err(SyncError::MalformedPayload);
    }
    let accepted = header_value(head, "sec-websocket-accept")
        .is_some_and(|value| value == accept_key(nonce));
    if !accepted {
        return Err(SyncError::MalformedPayload);
    }
    Ok(Some(end + 4))
}

/// Appends one final, masked client frame to `out`.
pub fn encode_frame(opcode: Opcode, payload: &[u8], mask: [u8; 4], out: &mut Vec<u8>) {
    out.push(0x80 | opcode.bits());
    let len = payload.len();
    if len < 126 {
        out.push(0x80 | len as u8);
    } else if len <= u16::MAX as usize {
        out.push(0x80 | 126);
        out.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        out.push(0x80 | 127);
        out.extend_from_slice(&(len as u64).to_be_bytes());
    }
    out.extend_from_slice(&mask);
    out.extend(
        payload
            .iter()
            .enumerate()
            .map(|(i, byte)| byte ^ mask[i % 4]),
    );
}

/// Decodes the frame at the start of `buf`. `Ok(None)` means the frame is
/// not complete yet; otherwise returns the frame and the bytes consumed.
pub fn decode_frame(buf: &[u8]) -> Result<Option<(Frame, usize)>, SyncError> {
    if buf.len() < 2 {
        return Ok(None);
    }
    let fin = buf[0] & 0x80 != 0;
    if buf[0] & 0x70 != 0 {
        return Err(SyncError::MalformedPayload);
    }
    let opcode = Opcode::from_bits(buf[0] & 0x0F).ok_or(SyncError::MalformedPayload)?;
    let masked = buf[1] & 0x80 != 0;

    let mut at = 2usize;
    let len = match buf[1] & 0x7F {
        126 => {
            let Some(bytes) = buf.get(at..at + 2) else {
                return Ok(None);
            };
            at += 2;
            u16::from_be_bytes([bytes[0], bytes[1]]) as usize
        }
        127 => {
            let Some(bytes) = buf.get(at..at + 8) else {
                return Ok(None);
            };
            at += 8;
            let mut raw = [0u8; 8];
            raw.copy_from_slice(bytes);
            usize::try_from(u64::from_be_bytes(raw)).map_err(|_| SyncError::MalformedPayload)?
        }
        short => short as usize,
    };
    if len > FRAME_PAYLOAD_MAX {
        return Err(SyncError::MalformedPayload);
    }

    let mask = if masked {
        let Some(bytes) = buf.get(at..at + 4) else {
            return Ok(None);
        };
        at += 4;
        Some([bytes[0], bytes[1], bytes[2], bytes[3]])
    } else {
        None
    };

    let Some(body) = buf.get(at..at + len) else {
        return Ok(None);
    };
    let payload = match mask {
        Some(mask) => body
            .iter()
            .enumerate()
            .map(|(i, byte)| byte ^ mask[i % 4])
            .collect(),
        None => body.to_vec(),
    };
    Ok(Some((
        Frame {
            fin,
            opcode,
            payload,
        },
        at + len,
    )))
}
