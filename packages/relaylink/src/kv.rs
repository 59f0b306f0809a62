//! Namespaced key/value persistence.
//!
//! Each namespace is written as one unit, so a multi-key update through
//! [`KvStore::put_all`] lands in a single flash write.

use alloc::{
    collections::BTreeMap,
    string::{String, ToString},
};
use core::cell::RefCell;

use crate::error::PersistenceError;

mod flash;

pub use flash::{FlashKv, KV_RECORD_MAX};

pub const WIFI_NAMESPACE: &str = "wifi-creds";
pub const RELAY_NAMESPACE: &str = "relay-states";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KvValue {
    Bool(bool),
    Str(String),
}

pub trait KvStore {
    fn get(&mut self, namespace: &str, key: &str) -> Result<Option<KvValue>, PersistenceError>;

    fn put_all(
        &mut self,
        namespace: &str,
        entries: &[(&str, KvValue)],
    ) -> Result<(), PersistenceError>;

    fn clear(&mut self, namespace: &str) -> Result<(), PersistenceError>;

    fn put(&mut self, namespace: &str, key: &str, value: KvValue) -> Result<(), PersistenceError> {
        self.put_all(namespace, &[(key, value)])
    }

    fn put_bool(&mut self, namespace: &str, key: &str, value: bool) -> Result<(), PersistenceError> {
        self.put(namespace, key, KvValue::Bool(value))
    }

    fn put_str(&mut self, namespace: &str, key: &str, value: &str) -> Result<(), PersistenceError> {
        self.put(namespace, key, KvValue::Str(String::from(value)))
    }

    fn get_bool(&mut self, namespace: &str, key: &str) -> Result<Option<bool>, PersistenceError> {
        Ok(match self.get(namespace, key)? {
            Some(KvValue::Bool(value)) => Some(value),
            _ => None,
        })
    }

    fn get_str(&mut self, namespace: &str, key: &str) -> Result<Option<String>, PersistenceError> {
        Ok(match self.get(namespace, key)? {
            Some(KvValue::Str(value)) => Some(value),
            _ => None,
        })
    }
}

/// Lets several owners share one backing store from the single control loop.
impl<K: KvStore + ?Sized> KvStore for &RefCell<K> {
    fn get(&mut self, namespace: &str, key: &str) -> Result<Option<KvValue>, PersistenceError> {
        self.borrow_mut().get(namespace, key)
    }

    fn put_all(
        &mut self,
        namespace: &str,
        entries: &[(&str, KvValue)],
    ) -> Result<(), PersistenceError> {
        self.borrow_mut().put_all(namespace, entries)
    }

    fn clear(&mut self, namespace: &str) -> Result<(), PersistenceError> {
        self.borrow_mut().clear(namespace)
    }
}

/// RAM-backed store. Counts writes and can be told to fail, which is what
/// the host tests lean on.
#[derive(Debug, Default)]
pub struct MemoryKv {
    entries: BTreeMap<(String, String), KvValue>,
    writes: usize,
    fail_writes: bool,
    fail_reads: bool,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn writes(&self) -> usize {
        self.writes
    }

    pub fn set_fail_writes(&mut self, fail: bool) {
        self.fail_writes = fail;
    }

    pub fn set_fail_reads(&mut self, fail: bool) {
        self.fail_reads = fail;
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl KvStore for MemoryKv {
    fn get(&mut self, namespace: &str, key: &str) -> Result<Option<KvValue>, PersistenceError> {
        if self.fail_reads {
            return Err(PersistenceError::ReadFailure);
        }
        Ok(self
            .entries
            .get(&(namespace.to_string(), key.to_string()))
            .cloned())
    }

    fn put_all(
        &mut self,
        namespace: &str,
        entries: &[(&str, KvValue)],
    ) -> Result<(), PersistenceError> {
        if self.fail_writes {
            return Err(PersistenceError::WriteFailure);
        }
        for (key, value) in entries {
            self.entries
                .insert((namespace.to_string(), key.to_string()), value.clone());
        }
        self.writes += 1;
        Ok(())
    }

    fn clear(&mut self, namespace: &str) -> Result<(), PersistenceError> {
        if self.fail_writes {
            return Err(PersistenceError::WriteFailure);
        }
        self.entries.retain(|(ns, _), _| ns != namespace);
        self.writes += 1;
        Ok(())
    }
}
