use alloc::{collections::BTreeMap, string::String, vec, vec::Vec};

use embedded_storage::{ReadStorage, Storage};
use heapless::Vec as BoundedVec;

use super::{KvStore, KvValue};
use crate::error::PersistenceError;

const KV_RECORD_MAGIC: u32 = 0x564B_4C52; // "RLKV"
const KV_RECORD_VERSION: u8 = 1;
const KV_HEADER_LEN: usize = 7;
pub const KV_RECORD_MAX: usize = 512;
const KV_MAX_NAMESPACES: usize = 4;

const TAG_BOOL: u8 = 0;
const TAG_STR: u8 = 1;

type Entries = BTreeMap<String, KvValue>;

/// Key/value namespaces over raw flash, one region (sector) per namespace.
///
/// Record layout: `[magic u32 LE][version u8][payload len u16 LE][payload][checksum8]`.
/// An erased, truncated or corrupt record reads as an empty namespace.
pub struct FlashKv<S> {
    storage: S,
    regions: BoundedVec<(&'static str, u32), KV_MAX_NAMESPACES>,
}

impl<S> FlashKv<S>
where
    S: ReadStorage + Storage,
{
    pub fn new(storage: S) -> Self {
        Self {
            storage,
            regions: BoundedVec::new(),
        }
    }

    /// Maps `namespace` to the flash region starting at `offset`. Extra
    /// namespaces beyond capacity are ignored and logged.
    pub fn with_region(mut self, namespace: &'static str, offset: u32) -> Self {
        if self.regions.push((namespace, offset)).is_err() {
            log::warn!("kv: namespace table full, ignoring {}", namespace);
        }
        self
    }

    pub fn into_inner(self) -> S {
        self.storage
    }

    fn region(&self, namespace: &str) -> Option<u32> {
        self.regions
            .iter()
            .find(|(name, _)| *name == namespace)
            .map(|(_, offset)| *offset)
    }

    fn load(&mut self, offset: u32) -> Result<Entries, PersistenceError> {
        let mut header = [0u8; KV_HEADER_LEN];
        self.storage
            .read(offset, &mut header)
            .map_err(|_| PersistenceError::ReadFailure)?;
        if header.iter().all(|&byte| byte == 0xFF) {
            return Ok(Entries::new());
        }
        if u32::from_le_bytes([header[0], header[1], header[2], header[3]]) != KV_RECORD_MAGIC
            || header[4] != KV_RECORD_VERSION
        {
            log::warn!("kv: record at {:#x} has unknown header, treating as empty", offset);
            return Ok(Entries::new());
        }
        let payload_len = u16::from_le_bytes([header[5], header[6]]) as usize;
        if KV_HEADER_LEN + payload_len + 1 > KV_RECORD_MAX {
            log::warn!("kv: record at {:#x} oversized len={}", offset, payload_len);
            return Ok(Entries::new());
        }

        let mut record = vec![0u8; KV_HEADER_LEN + payload_len + 1];
        self.storage
            .read(offset, &mut record)
            .map_err(|_| PersistenceError::ReadFailure)?;
        let (body, checksum) = record.split_at(record.len() - 1);
        if checksum8(body) != checksum[0] {
            log::warn!("kv: record at {:#x} failed checksum", offset);
            return Ok(Entries::new());
        }
        match decode_entries(&body[KV_HEADER_LEN..]) {
            Some(entries) => Ok(entries),
            None => {
                log::warn!("kv: record at {:#x} has malformed payload", offset);
                Ok(Entries::new())
            }
        }
    }

    fn store(&mut self, offset: u32, entries: &Entries) -> Result<(), PersistenceError> {
        let record = encode_record(entries).ok_or(PersistenceError::WriteFailure)?;
        self.storage
            .write(offset, &record)
            .map_err(|_| PersistenceError::WriteFailure)
    }
}

impl<S> KvStore for FlashKv<S>
where
    S: ReadStorage + Storage,
{
    fn get(&mut self, namespace: &str, key: &str) -> Result<Option<KvValue>, PersistenceError> {
        let offset = self
            .region(namespace)
            .ok_or(PersistenceError::ReadFailure)?;
        let mut entries = self.load(offset)?;
        Ok(entries.remove(key))
    }

    fn put_all(
        &mut self,
        namespace: &str,
        updates: &[(&str, KvValue)],
    ) -> Result<(), PersistenceError> {
        let offset = self
            .region(namespace)
            .ok_or(PersistenceError::WriteFailure)?;
        // Never clobber a namespace we could not read back.
        let mut entries = self
            .load(offset)
            .map_err(|_| PersistenceError::WriteFailure)?;
        let before = entries.clone();
        for (key, value) in updates {
            entries.insert(String::from(*key), value.clone());
        }
        if entries == before {
            return Ok(());
        }
        self.store(offset, &entries)
    }

    fn clear(&mut self, namespace: &str) -> Result<(), PersistenceError> {
        let offset = self
            .region(namespace)
            .ok_or(PersistenceError::WriteFailure)?;
        self.store(offset, &Entries::new())
    }
}

pub(super) fn encode_record(entries: &Entries) -> Option<Vec<u8>> {
    let mut payload = Vec::new();
    for (key, value) in entries {
        let key = key.as_bytes();
        payload.push(u8::try_from(key.len()).ok()?);
        payload.extend_from_slice(key);
        match value {
            KvValue::Bool(flag) => {
                payload.push(TAG_BOOL);
                payload.push(u8::from(*flag));
            }
            KvValue::Str(text) => {
                let text = text.as_bytes();
                payload.push(TAG_STR);
                payload.push(u8::try_from(text.len()).ok()?);
                payload.extend_from_slice(text);
            }
        }
    }
    if KV_HEADER_LEN + payload.len() + 1 > KV_RECORD_MAX {
        return None;
    }

    let mut record = Vec::with_capacity(KV_HEADER_LEN + payload.len() + 1);
    record.extend_from_slice(&KV_RECORD_MAGIC.to_le_bytes());
    record.push(KV_RECORD_VERSION);
    record.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    record.extend_from_slice(&payload);
    record.push(checksum8(&record));
    Some(record)
}

fn decode_entries(mut payload: &[u8]) -> Option<Entries> {
    let mut entries = Entries::new();
    while let Some((&key_len, rest)) = payload.split_first() {
        let key_len = key_len as usize;
        let key = core::str::from_utf8(rest.get(..key_len)?).ok()?;
        let rest = &rest[key_len..];
        let (&tag, rest) = rest.split_first()?;
        let (value, rest) = match tag {
            TAG_BOOL => {
                let (&flag, rest) = rest.split_first()?;
                (KvValue::Bool(flag != 0), rest)
            }
            TAG_STR => {
                let (&len, rest) = rest.split_first()?;
                let len = len as usize;
                let text = core::str::from_utf8(rest.get(..len)?).ok()?;
                (KvValue::Str(String::from(text)), &rest[len..])
            }
            _ => return None,
        };
        entries.insert(String::from(key), value);
        payload = rest;
    }
    Some(entries)
}

pub(super) fn checksum8(bytes: &[u8]) -> u8 {
    let mut acc = 0x5Au8;
    for &byte in bytes {
        acc ^= byte.rotate_left(1);
    }
    acc
}
