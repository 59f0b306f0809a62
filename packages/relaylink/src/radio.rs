use alloc::{format, string::String, vec::Vec};

use crate::credentials::NetworkIdentity;
use crate::error::ConnectivityError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScanEntry {
    pub ssid: String,
    pub rssi: i8,
    pub secure: bool,
}

/// What a successful station join reports.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LinkInfo {
    pub ip: [u8; 4],
    pub rssi: Option<i8>,
}

impl LinkInfo {
    pub fn ip_string(&self) -> String {
        let [a, b, c, d] = self.ip;
        format!("{}.{}.{}.{}", a, b, c, d)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccessPointSettings {
    pub ssid: String,
    pub password: String,
}

impl AccessPointSettings {
    pub fn new(ssid: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            ssid: ssid.into(),
            password: password.into(),
        }
    }
}

/// Station, access point and scan control of the WiFi radio.
///
/// Every async call must resolve within its own bound; `join` is given the
/// caller's timeout and reports [`ConnectivityError::Timeout`] past it.
#[allow(async_fn_in_trait)]
pub trait WifiRadio {
    async fn join(
        &mut self,
        identity: &NetworkIdentity,
        timeout_ms: u64,
    ) -> Result<LinkInfo, ConnectivityError>;

    /// Current station link, `None` while not associated with an address.
    fn link(&mut self) -> Option<LinkInfo>;

    async fn scan(&mut self) -> Result<Vec<ScanEntry>, ConnectivityError>;

    async fn open_portal(&mut self, settings: &AccessPointSettings)
        -> Result<(), ConnectivityError>;

    async fn close_portal(&mut self) -> Result<(), ConnectivityError>;

    async fn open_hotspot(&mut self, settings: &AccessPointSettings)
        -> Result<(), ConnectivityError>;
}
