//! JSON shapes exchanged with the backend.
//!
//! Relays are keyed `relay1..relayN` on the wire (1-based) and indexed from
//! zero everywhere else.

use alloc::{collections::BTreeMap, format, string::String, vec::Vec};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SyncError;
use crate::relay::RelayRecord;

pub const HEARTBEAT: &str = r#"{"type":"heartbeat"}"#;

const KEY_PREFIX: &str = "relay";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InboundKind {
    Command,
    Update,
    StateUpdate,
    Heartbeat,
    Unknown,
}

impl InboundKind {
    fn parse(kind: &str) -> Self {
        match kind {
            "command" => Self::Command,
            "update" => Self::Update,
            "state_update" => Self::StateUpdate,
            "heartbeat" => Self::Heartbeat,
            _ => Self::Unknown,
        }
    }

    pub const fn carries_states(self) -> bool {
        matches!(self, Self::Command | Self::Update)
    }
}

/// A decoded stream frame. `states` is filled only for kinds that carry
/// relay values.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Inbound {
    pub kind: InboundKind,
    pub states: Vec<(usize, bool)>,
}

#[derive(Serialize)]
struct RelayEntry<'a> {
    state: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
}

#[derive(Serialize)]
struct StateUpdate<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    data: BTreeMap<String, RelayEntry<'a>>,
}

#[derive(Deserialize)]
struct RawMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Option<Value>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DeviceStatus {
    pub online: bool,
    #[serde(rename = "lastSeen")]
    pub last_seen: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
}

pub fn wire_key(index: usize) -> String {
    format!("{}{}", KEY_PREFIX, index + 1)
}

/// `relay<k>` with `1 <= k <= count` to a zero-based index. Leading zeros
/// and out-of-range numbers are rejected.
pub fn parse_wire_key(key: &str, count: usize) -> Option<usize> {
    let digits = key.strip_prefix(KEY_PREFIX)?;
    if digits.is_empty() || digits.starts_with('0') || !digits.bytes().all(|b| b.is_ascii_digit())
    {
        return None;
    }
    let number: usize = digits.parse().ok()?;
    (1..=count).contains(&number).then(|| number - 1)
}

/// `{"type":"state_update","data":{"relay1":{"state":..},..}}`
pub fn encode_state_update(states: &[bool]) -> Result<String, SyncError> {
    let data = states
        .iter()
        .enumerate()
        .map(|(index, &state)| (wire_key(index), RelayEntry { state, name: None }))
        .collect();
    serde_json::to_string(&StateUpdate {
        kind: "state_update",
        data,
    })
    .map_err(|_| SyncError::MalformedPayload)
}

/// Full snapshot body for the REST `PUT`, names included.
pub fn encode_snapshot(records: &[RelayRecord]) -> Result<String, SyncError> {
    let body: BTreeMap<String, RelayEntry<'_>> = records
        .iter()
        .map(|record| {
            (
                wire_key(record.index),
                RelayEntry {
                    state: record.state,
                    name: Some(record.name),
                },
            )
        })
        .collect();
    serde_json::to_string(&body).map_err(|_| SyncError::MalformedPayload)
}

pub fn encode_status(status: &DeviceStatus) -> Result<String, SyncError> {
    serde_json::to_string(status).map_err(|_| SyncError::MalformedPayload)
}

pub fn decode_inbound(text: &str, count: usize) -> Result<Inbound, SyncError> {
    let raw: RawMessage = serde_json::from_str(text).map_err(|_| SyncError::MalformedPayload)?;
    let kind = InboundKind::parse(&raw.kind);
    let states = match (kind.carries_states(), raw.data) {
        (true, Some(data)) => relay_states(&data, count)?,
        _ => Vec::new(),
    };
    Ok(Inbound { kind, states })
}

/// Body of a REST relay snapshot. An empty or `null` body means the peer
/// holds no data yet.
pub fn decode_relays(body: &[u8], count: usize) -> Result<Option<Vec<(usize, bool)>>, SyncError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    let value: Value = serde_json::from_slice(body).map_err(|_| SyncError::MalformedPayload)?;
    if value.is_null() {
        return Ok(None);
    }
    relay_states(&value, count).map(Some)
}

/// Keys that are not valid relay keys and entries without a boolean
/// `state` are skipped.
fn relay_states(data: &Value, count: usize) -> Result<Vec<(usize, bool)>, SyncError> {
    let object = data.as_object().ok_or(SyncError::MalformedPayload)?;
    let mut states: Vec<(usize, bool)> = object
        .iter()
        .filter_map(|(key, entry)| {
            let index = parse_wire_key(key, count)?;
            let state = entry.get("state")?.as_bool()?;
            Some((index, state))
        })
        .collect();
    states.sort_unstable_by_key(|(index, _)| *index);
    Ok(states)
}
