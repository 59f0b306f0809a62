use alloc::{format, string::String};

use crate::error::ConfigError;

// Reconnect backoff: short fixed window to catch a peer finishing a cold
// start, then doubling up to the cap.
pub const BACKOFF_MIN_INTERVAL_DEFAULT_MS: u64 = 5_000;
pub const BACKOFF_MAX_INTERVAL_DEFAULT_MS: u64 = 60_000;
pub const BACKOFF_FIXED_ATTEMPTS_DEFAULT: u32 = 3;

pub const CONNECT_TIMEOUT_DEFAULT_MS: u64 = 20_000;
pub const STORED_RETRY_INTERVAL_DEFAULT_MS: u64 = 10_000;

pub const POLL_INTERVAL_DEFAULT_MS: u64 = 2_000;
pub const HEARTBEAT_INTERVAL_DEFAULT_MS: u64 = 30_000;
pub const PING_INTERVAL_DEFAULT_MS: u64 = 25_000;
pub const IO_TIMEOUT_DEFAULT_MS: u64 = 5_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub min_interval_ms: u64,
    pub max_interval_ms: u64,
    /// Attempts retried at `min_interval_ms` before doubling starts.
    pub fixed_attempts: u32,
}

impl BackoffPolicy {
    pub const fn defaults() -> Self {
        Self {
            min_interval_ms: BACKOFF_MIN_INTERVAL_DEFAULT_MS,
            max_interval_ms: BACKOFF_MAX_INTERVAL_DEFAULT_MS,
            fixed_attempts: BACKOFF_FIXED_ATTEMPTS_DEFAULT,
        }
    }

    pub const fn sanitized(self) -> Self {
        let min_interval_ms = clamp_u64(self.min_interval_ms, 100, 600_000);
        let mut max_interval_ms = clamp_u64(self.max_interval_ms, 100, 3_600_000);
        if max_interval_ms < min_interval_ms {
            max_interval_ms = min_interval_ms;
        }
        let fixed_attempts = if self.fixed_attempts > 32 {
            32
        } else {
            self.fixed_attempts
        };
        Self {
            min_interval_ms,
            max_interval_ms,
            fixed_attempts,
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::defaults()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProvisioningPolicy {
    /// Upper bound on a single join attempt (`T_connect`).
    pub connect_timeout_ms: u64,
    /// Spacing of stored-identity retries while the link is lost.
    pub retry_interval_ms: u64,
    /// Bring up the secondary always-reachable access point once connected.
    pub hotspot_enabled: bool,
}

impl ProvisioningPolicy {
    pub const fn defaults() -> Self {
        Self {
            connect_timeout_ms: CONNECT_TIMEOUT_DEFAULT_MS,
            retry_interval_ms: STORED_RETRY_INTERVAL_DEFAULT_MS,
            hotspot_enabled: true,
        }
    }

    pub const fn sanitized(self) -> Self {
        Self {
            connect_timeout_ms: clamp_u64(self.connect_timeout_ms, 2_000, 180_000),
            retry_interval_ms: clamp_u64(self.retry_interval_ms, 1_000, 600_000),
            hotspot_enabled: self.hotspot_enabled,
        }
    }
}

impl Default for ProvisioningPolicy {
    fn default() -> Self {
        Self::defaults()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncStrategy {
    Poll,
    Stream,
}

impl SyncStrategy {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Poll => "poll",
            Self::Stream => "stream",
        }
    }
}

/// Certificate handling for secure endpoints. `Verify` is the default;
/// turning validation off has to be spelled out in the configuration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TlsPolicy {
    #[default]
    Verify,
    Disabled,
}

/// Path layout of the polling backend.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RestDialect {
    /// `{root}/devices/{id}/relays?api_key=...`
    #[default]
    Plain,
    /// `/devices/{id}/relays.json?auth=...` (realtime-database style)
    Firebase,
}

/// Everything that differs between deployed devices.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncConfig {
    pub host: String,
    pub port: u16,
    pub device_id: String,
    pub api_key: Option<String>,
    pub secure: bool,
    pub tls: TlsPolicy,
    pub strategy: SyncStrategy,
    pub dialect: RestDialect,
    pub rest_root: String,
    pub poll_interval_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub ping_interval_ms: u64,
    pub io_timeout_ms: u64,
    pub backoff: BackoffPolicy,
}

impl SyncConfig {
    pub fn new(host: impl Into<String>, device_id: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: 80,
            device_id: device_id.into(),
            api_key: None,
            secure: false,
            tls: TlsPolicy::Verify,
            strategy: SyncStrategy::Stream,
            dialect: RestDialect::Plain,
            rest_root: String::from("/api/v1"),
            poll_interval_ms: POLL_INTERVAL_DEFAULT_MS,
            heartbeat_interval_ms: HEARTBEAT_INTERVAL_DEFAULT_MS,
            ping_interval_ms: PING_INTERVAL_DEFAULT_MS,
            io_timeout_ms: IO_TIMEOUT_DEFAULT_MS,
            backoff: BackoffPolicy::defaults(),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        let api_key = api_key.into();
        self.api_key = if api_key.is_empty() {
            None
        } else {
            Some(api_key)
        };
        self
    }

    pub fn with_secure(mut self, secure: bool, tls: TlsPolicy) -> Self {
        self.secure = secure;
        self.tls = tls;
        self
    }

    pub fn with_strategy(mut self, strategy: SyncStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_dialect(mut self, dialect: RestDialect) -> Self {
        self.dialect = dialect;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn sanitized(mut self) -> Self {
        self.poll_interval_ms = clamp_u64(self.poll_interval_ms, 250, 600_000);
        self.heartbeat_interval_ms = clamp_u64(self.heartbeat_interval_ms, 1_000, 3_600_000);
        self.ping_interval_ms = clamp_u64(self.ping_interval_ms, 1_000, 600_000);
        self.io_timeout_ms = clamp_u64(self.io_timeout_ms, 500, 60_000);
        self.backoff = self.backoff.sanitized();
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::MissingHost);
        }
        if self.device_id.trim().is_empty() {
            return Err(ConfigError::MissingDeviceId);
        }
        Ok(())
    }

    /// Host header value; the port is omitted when it is the scheme default.
    pub fn authority(&self) -> String {
        let default_port = if self.secure { 443 } else { 80 };
        if self.port == default_port {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    pub fn relays_path(&self) -> String {
        self.rest_path("/relays")
    }

    pub fn device_path(&self) -> String {
        self.rest_path("")
    }

    pub fn stream_path(&self) -> String {
        match &self.api_key {
            Some(key) => format!("/api/v1/ws/{}?api_key={}", self.device_id, key),
            None => format!("/api/v1/ws/{}", self.device_id),
        }
    }

    /// Endpoint description for logs. Never includes the api key.
    pub fn endpoint_label(&self) -> String {
        let scheme = match (self.strategy, self.secure) {
            (SyncStrategy::Stream, false) => "ws",
            (SyncStrategy::Stream, true) => "wss",
            (SyncStrategy::Poll, false) => "http",
            (SyncStrategy::Poll, true) => "https",
        };
        format!("{}://{} device={}", scheme, self.authority(), self.device_id)
    }

    fn rest_path(&self, suffix: &str) -> String {
        match self.dialect {
            RestDialect::Plain => {
                let root = self.rest_root.trim_end_matches('/');
                match &self.api_key {
                    Some(key) => format!(
                        "{}/devices/{}{}?api_key={}",
                        root, self.device_id, suffix, key
                    ),
                    None => format!("{}/devices/{}{}", root, self.device_id, suffix),
                }
            }
            RestDialect::Firebase => match &self.api_key {
                Some(key) => format!("/devices/{}{}.json?auth={}", self.device_id, suffix, key),
                None => format!("/devices/{}{}.json", self.device_id, suffix),
            },
        }
    }
}

const fn clamp_u64(value: u64, min: u64, max: u64) -> u64 {
    if value < min {
        min
    } else if value > max {
        max
    } else {
        value
    }
}
