use alloc::string::String;
use core::fmt;

use crate::error::{PersistenceError, ProvisioningError};
use crate::kv::{KvStore, KvValue, WIFI_NAMESPACE};

pub const SSID_MAX_LEN: usize = 32;
pub const SECRET_MAX_LEN: usize = 64;

const SSID_KEY: &str = "ssid";
const SECRET_KEY: &str = "password";

/// Credentials for the infrastructure network. An empty secret means an
/// open network.
#[derive(Clone, PartialEq, Eq)]
pub struct NetworkIdentity {
    ssid: String,
    secret: String,
}

impl NetworkIdentity {
    pub fn new(ssid: &str, secret: &str) -> Result<Self, ProvisioningError> {
        if ssid.is_empty() || ssid.len() > SSID_MAX_LEN || secret.len() > SECRET_MAX_LEN {
            return Err(ProvisioningError::InvalidIdentity);
        }
        Ok(Self {
            ssid: String::from(ssid),
            secret: String::from(secret),
        })
    }

    pub fn ssid(&self) -> &str {
        &self.ssid
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    pub fn is_open(&self) -> bool {
        self.secret.is_empty()
    }
}

impl fmt::Debug for NetworkIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkIdentity")
            .field("ssid", &self.ssid)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Single-slot persisted identity.
pub struct CredentialStore<K> {
    kv: K,
    cached: Option<NetworkIdentity>,
}

impl<K: KvStore> CredentialStore<K> {
    pub fn new(kv: K) -> Self {
        Self { kv, cached: None }
    }

    /// Reads the slot. A read failure or a half-written slot counts as no
    /// identity.
    pub fn load(&mut self) -> Option<NetworkIdentity> {
        let ssid = match self.kv.get_str(WIFI_NAMESPACE, SSID_KEY) {
            Ok(ssid) => ssid,
            Err(err) => {
                log::warn!("credentials: load failed err={}", err);
                self.cached = None;
                return None;
            }
        };
        let secret = self
            .kv
            .get_str(WIFI_NAMESPACE, SECRET_KEY)
            .unwrap_or_else(|err| {
                log::warn!("credentials: secret read failed err={}", err);
                None
            })
            .unwrap_or_default();

        self.cached = ssid
            .filter(|ssid| !ssid.is_empty())
            .map(|ssid| NetworkIdentity { ssid, secret });
        self.cached.clone()
    }

    /// Overwrites the slot in one write. On failure the identity is still
    /// cached so the running session can use it.
    pub fn save(&mut self, identity: &NetworkIdentity) -> Result<(), PersistenceError> {
        self.cached = Some(identity.clone());
        self.kv
            .put_all(
                WIFI_NAMESPACE,
                &[
                    (SSID_KEY, KvValue::Str(identity.ssid.clone())),
                    (SECRET_KEY, KvValue::Str(identity.secret.clone())),
                ],
            )
            .inspect_err(|err| {
                log::warn!("credentials: save failed ssid={} err={}", identity.ssid, err)
            })
    }

    pub fn clear(&mut self) -> Result<(), PersistenceError> {
        self.cached = None;
        self.kv.clear(WIFI_NAMESPACE)
    }

    pub fn current(&self) -> Option<&NetworkIdentity> {
        self.cached.as_ref()
    }

    pub fn into_inner(self) -> K {
        self.kv
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;

    #[test]
    fn identity_enforces_length_limits() {
        assert!(NetworkIdentity::new("", "x").is_err());
        assert!(NetworkIdentity::new(&"s".repeat(33), "").is_err());
        assert!(NetworkIdentity::new("home", &"p".repeat(65)).is_err());
        let open = NetworkIdentity::new(&"s".repeat(32), "").expect("valid");
        assert!(open.is_open());
    }

    #[test]
    fn debug_output_redacts_secret() {
        let identity = NetworkIdentity::new("home", "hunter22").expect("valid");
        let rendered = alloc::format!("{:?}", identity);
        assert!(rendered.contains("home"));
        assert!(!rendered.contains("hunter22"));
    }

    #[test]
    fn empty_store_loads_nothing() {
        let mut store = CredentialStore::new(MemoryKv::new());
        assert_eq!(store.load(), None);
        assert_eq!(store.current(), None);
    }

    #[test]
    fn save_then_load_round_trips_in_one_write() {
        let identity = NetworkIdentity::new("home", "hunter22").expect("valid");
        let mut store = CredentialStore::new(MemoryKv::new());
        store.save(&identity).expect("save");
        let kv = store.into_inner();
        assert_eq!(kv.writes(), 1);

        let mut reloaded = CredentialStore::new(kv);
        assert_eq!(reloaded.load(), Some(identity));
    }

    #[test]
    fn save_overwrites_previous_identity() {
        let mut store = CredentialStore::new(MemoryKv::new());
        store
            .save(&NetworkIdentity::new("old", "a").expect("valid"))
            .expect("save");
        let new = NetworkIdentity::new("new", "").expect("valid");
        store.save(&new).expect("save");
        assert_eq!(store.load(), Some(new));
    }

    #[test]
    fn failed_save_keeps_identity_in_memory() {
        let mut kv = MemoryKv::new();
        kv.set_fail_writes(true);
        let mut store = CredentialStore::new(kv);
        let identity = NetworkIdentity::new("home", "pw").expect("valid");
        assert_eq!(store.save(&identity), Err(PersistenceError::WriteFailure));
        assert_eq!(store.current(), Some(&identity));
    }

    #[test]
    fn clear_is_idempotent() {
        let mut store = CredentialStore::new(MemoryKv::new());
        store
            .save(&NetworkIdentity::new("home", "pw").expect("valid"))
            .expect("save");
        store.clear().expect("first clear");
        store.clear().expect("second clear");
        assert_eq!(store.load(), None);
    }

    #[test]
    fn read_failure_is_treated_as_absent() {
        let mut kv = MemoryKv::new();
        kv.set_fail_reads(true);
        let mut store = CredentialStore::new(kv);
        assert_eq!(store.load(), None);
    }
}
