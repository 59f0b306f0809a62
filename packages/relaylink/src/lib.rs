//! Connectivity and relay-state reconciliation for the relaynode firmware.
//!
//! Everything in this crate is platform independent: the radio, the flash
//! and the network transports are reached through traits so the whole
//! provisioning / sync pipeline runs on the host in tests. The ESP32 glue
//! lives in the firmware crate.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod config;
pub mod control;
pub mod credentials;
pub mod dhcp;
pub mod dns;
pub mod error;
pub mod http;
pub mod kv;
pub mod portal;
pub mod provisioning;
pub mod radio;
pub mod relay;
pub mod sync;
pub mod ws;

pub use config::{BackoffPolicy, ProvisioningPolicy, SyncConfig, SyncStrategy, TlsPolicy};
pub use control::ControlLoop;
pub use credentials::{CredentialStore, NetworkIdentity};
pub use error::{
    ConfigError, ConnectivityError, IndexError, PersistenceError, ProvisioningError, SyncError,
};
pub use kv::{FlashKv, KvStore, KvValue, MemoryKv};
pub use provisioning::{ConnectOutcome, ProvisioningController, ProvisioningNotice, ProvisioningState};
pub use radio::{AccessPointSettings, LinkInfo, ScanEntry, WifiRadio};
pub use relay::{Actuator, Origin, RelayChange, RelayRecord, RelayStore};
pub use sync::{
    Backoff, NoTransport, PollSync, RestTransport, StreamSync, StreamTransport, SyncEngine,
    SyncSession,
};
