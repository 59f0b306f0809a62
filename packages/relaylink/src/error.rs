use thiserror::Error;

/// Failures while joining or holding a WiFi link. Never fatal: the
/// provisioning controller always resolves them into a state transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum ConnectivityError {
    #[error("join timed out")]
    Timeout,
    #[error("authentication rejected")]
    AuthFailure,
    #[error("link lost")]
    LinkLost,
    #[error("network not found")]
    NotFound,
    #[error("no stored network identity")]
    NotConfigured,
    #[error("radio driver error")]
    Radio,
    #[error("a join is already in progress")]
    JoinInProgress,
}

impl ConnectivityError {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::AuthFailure => "auth_failure",
            Self::LinkLost => "link_lost",
            Self::NotFound => "not_found",
            Self::NotConfigured => "not_configured",
            Self::Radio => "radio",
            Self::JoinInProgress => "join_in_progress",
        }
    }
}

/// Failures talking to the remote peer. Logged and dropped; only
/// `PeerUnreachable` advances the streaming reconnect backoff.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error("peer unreachable")]
    PeerUnreachable,
    #[error("malformed payload")]
    MalformedPayload,
    #[error("unauthorized")]
    Unauthorized,
}

impl SyncError {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PeerUnreachable => "peer_unreachable",
            Self::MalformedPayload => "malformed_payload",
            Self::Unauthorized => "unauthorized",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum PersistenceError {
    #[error("persistent write failed")]
    WriteFailure,
    #[error("persistent read failed")]
    ReadFailure,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
#[error("relay index {index} out of range (relay count {count})")]
pub struct IndexError {
    pub index: usize,
    pub count: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum ProvisioningError {
    #[error("controller is not accepting credentials in its current state")]
    NotAccepting,
    #[error("network identity violates length limits")]
    InvalidIdentity,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("backend host is empty")]
    MissingHost,
    #[error("device id is empty")]
    MissingDeviceId,
    #[error("secure backend requested but no verifying TLS transport is available")]
    TlsUnavailable,
}
