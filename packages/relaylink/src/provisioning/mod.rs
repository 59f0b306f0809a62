//! Provisioning: stored credentials (or their absence) into either a live
//! station link or the onboarding portal.
//!
//! The transition table lives in a `statig` machine; the controller runs the
//! radio I/O and feeds outcomes back as events.

use alloc::string::String;

use crate::error::ConnectivityError;
use crate::radio::LinkInfo;

mod controller;
mod machine;

pub use controller::ProvisioningController;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProvisioningState {
    Unconfigured,
    PortalActive,
    Connecting,
    Connected,
    ConnectionLost,
}

impl ProvisioningState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unconfigured => "unconfigured",
            Self::PortalActive => "portal_active",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::ConnectionLost => "connection_lost",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectOutcome {
    Connected(LinkInfo),
    Failed(ConnectivityError),
}

/// Reported by a controller step when something the rest of the device
/// cares about happened.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProvisioningNotice {
    PortalOpened,
    Connected { ssid: String, link: LinkInfo },
    ConnectFailed { ssid: String, error: ConnectivityError },
    LinkLost,
    Reconnected(LinkInfo),
}
