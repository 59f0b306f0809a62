use alloc::vec::Vec;

use statig::blocking::IntoStateMachineExt as _;

use super::machine::{DispatchContext, DispatchStatus, ProvisioningEvent, ProvisioningMachine};
use super::{ConnectOutcome, ProvisioningNotice, ProvisioningState};
use crate::config::ProvisioningPolicy;
use crate::credentials::{CredentialStore, NetworkIdentity};
use crate::error::{ConnectivityError, ProvisioningError};
use crate::kv::KvStore;
use crate::radio::{AccessPointSettings, LinkInfo, ScanEntry, WifiRadio};

pub struct ProvisioningController<R, K> {
    radio: R,
    credentials: CredentialStore<K>,
    machine: statig::blocking::StateMachine<ProvisioningMachine>,
    policy: ProvisioningPolicy,
    portal: AccessPointSettings,
    hotspot: Option<AccessPointSettings>,
    link: Option<LinkInfo>,
    pending: Option<NetworkIdentity>,
    portal_open: bool,
    next_retry_at_ms: u64,
}

impl<R, K> ProvisioningController<R, K>
where
    R: WifiRadio,
    K: KvStore,
{
    pub fn new(
        radio: R,
        credentials: CredentialStore<K>,
        policy: ProvisioningPolicy,
        portal: AccessPointSettings,
        hotspot: Option<AccessPointSettings>,
    ) -> Self {
        Self {
            radio,
            credentials,
            machine: ProvisioningMachine::new().state_machine(),
            policy: policy.sanitized(),
            portal,
            hotspot,
            link: None,
            pending: None,
            portal_open: false,
            next_retry_at_ms: 0,
        }
    }

    /// Boot decision. With no stored identity the controller stays
    /// `Unconfigured` and the next tick opens the portal; a stored identity
    /// is tried once and a failed join falls back to the portal.
    pub async fn start(&mut self, now_ms: u64) -> Option<ProvisioningNotice> {
        let Some(identity) = self.credentials.load() else {
            log::info!("provisioning: no stored network, portal on next tick");
            return None;
        };
        log::info!("provisioning: stored network ssid={}", identity.ssid());

        match self.attempt_stored_connection(now_ms).await {
            ConnectOutcome::Connected(link) => Some(ProvisioningNotice::Connected {
                ssid: identity.ssid().into(),
                link,
            }),
            ConnectOutcome::Failed(err) => {
                log::warn!(
                    "provisioning: stored join failed ssid={} err={}, opening portal",
                    identity.ssid(),
                    err.as_str()
                );
                self.start_portal().await.ok()
            }
        }
    }

    pub async fn attempt_stored_connection(&mut self, now_ms: u64) -> ConnectOutcome {
        let Some(identity) = self.credentials.current().cloned() else {
            return ConnectOutcome::Failed(ConnectivityError::NotConfigured);
        };

        match self
            .radio
            .join(&identity, self.policy.connect_timeout_ms)
            .await
        {
            Ok(link) => {
                self.finish_join().await;
                self.link = Some(link);
                self.dispatch(ProvisioningEvent::StoredJoinSucceeded);
                log::info!(
                    "provisioning: joined ssid={} ip={}",
                    identity.ssid(),
                    link.ip_string()
                );
                ConnectOutcome::Connected(link)
            }
            Err(err) => {
                self.next_retry_at_ms = now_ms.saturating_add(self.policy.retry_interval_ms);
                ConnectOutcome::Failed(err)
            }
        }
    }

    /// Brings up the onboarding access point. Allowed from every state
    /// except `Connecting`, whose portal is already up.
    pub async fn start_portal(&mut self) -> Result<ProvisioningNotice, ConnectivityError> {
        if self.state() == ProvisioningState::Connecting {
            return Err(ConnectivityError::JoinInProgress);
        }
        if !self.portal_open {
            self.radio.open_portal(&self.portal).await?;
            self.portal_open = true;
            log::info!("provisioning: portal open ssid={}", self.portal.ssid);
        }
        self.link = None;
        self.dispatch(ProvisioningEvent::PortalOpened);
        Ok(ProvisioningNotice::PortalOpened)
    }

    /// Tears the portal down. Leaving `PortalActive` this way needs a stored
    /// identity to fall back on; without one the portal stays.
    pub async fn stop_portal(&mut self) -> Result<(), ProvisioningError> {
        if self.state() == ProvisioningState::PortalActive && self.credentials.current().is_none()
        {
            return Err(ProvisioningError::NotAccepting);
        }
        self.close_portal().await;
        self.dispatch(ProvisioningEvent::PortalClosed);
        Ok(())
    }

    /// Queues a join with a new identity. The outcome arrives from a later
    /// [`Self::tick`] as `Connected` or `ConnectFailed`.
    pub fn submit_credentials(
        &mut self,
        ssid: &str,
        secret: &str,
    ) -> Result<ProvisioningState, ProvisioningError> {
        if self.state() != ProvisioningState::PortalActive {
            return Err(ProvisioningError::NotAccepting);
        }
        let identity = NetworkIdentity::new(ssid, secret)?;
        log::info!("provisioning: credentials submitted ssid={}", identity.ssid());
        self.pending = Some(identity);
        self.dispatch(ProvisioningEvent::CredentialsSubmitted);
        Ok(self.state())
    }

    /// Visible networks, strongest first, one entry per SSID. Hidden
    /// networks are dropped.
    pub async fn scan_networks(&mut self) -> Result<Vec<ScanEntry>, ConnectivityError> {
        let mut entries = self.radio.scan().await?;
        entries.retain(|entry| !entry.ssid.is_empty());
        entries.sort_by(|a, b| b.rssi.cmp(&a.rssi));
        let mut unique: Vec<ScanEntry> = Vec::with_capacity(entries.len());
        for entry in entries {
            if !unique.iter().any(|seen| seen.ssid == entry.ssid) {
                unique.push(entry);
            }
        }
        log::info!("provisioning: scan found={}", unique.len());
        Ok(unique)
    }

    pub fn factory_reset(&mut self) {
        if let Err(err) = self.credentials.clear() {
            log::warn!("provisioning: credential erase failed err={}", err);
        }
        self.pending = None;
        self.link = None;
        self.dispatch(ProvisioningEvent::FactoryReset);
        log::info!("provisioning: factory reset");
    }

    pub async fn tick(&mut self, now_ms: u64) -> Option<ProvisioningNotice> {
        match self.state() {
            ProvisioningState::Unconfigured => match self.start_portal().await {
                Ok(notice) => Some(notice),
                Err(err) => {
                    log::warn!("provisioning: portal open failed err={}", err.as_str());
                    None
                }
            },
            ProvisioningState::PortalActive => None,
            ProvisioningState::Connecting => self.run_pending_join().await,
            ProvisioningState::Connected => {
                self.link = self.radio.link();
                if self.link.is_some() {
                    return None;
                }
                log::warn!("provisioning: link lost");
                self.next_retry_at_ms = now_ms.saturating_add(self.policy.retry_interval_ms);
                self.dispatch(ProvisioningEvent::LinkDropped);
                Some(ProvisioningNotice::LinkLost)
            }
            ProvisioningState::ConnectionLost => self.recover(now_ms).await,
        }
    }

    pub fn state(&self) -> ProvisioningState {
        self.machine.inner().state
    }

    pub fn link(&self) -> Option<LinkInfo> {
        self.link
    }

    pub fn identity(&self) -> Option<&NetworkIdentity> {
        self.credentials.current()
    }

    pub fn is_portal_open(&self) -> bool {
        self.portal_open
    }

    pub fn radio(&mut self) -> &mut R {
        &mut self.radio
    }

    pub fn credentials(&mut self) -> &mut CredentialStore<K> {
        &mut self.credentials
    }

    async fn run_pending_join(&mut self) -> Option<ProvisioningNotice> {
        let Some(identity) = self.pending.take() else {
            // Nothing to join with; treat as a failed attempt.
            self.dispatch(ProvisioningEvent::JoinFailed);
            return None;
        };

        match self
            .radio
            .join(&identity, self.policy.connect_timeout_ms)
            .await
        {
            Ok(link) => {
                if let Err(err) = self.credentials.save(&identity) {
                    log::warn!("provisioning: identity kept in memory only err={}", err);
                }
                self.finish_join().await;
                self.link = Some(link);
                self.dispatch(ProvisioningEvent::JoinSucceeded);
                log::info!(
                    "provisioning: joined ssid={} ip={}",
                    identity.ssid(),
                    link.ip_string()
                );
                Some(ProvisioningNotice::Connected {
                    ssid: identity.ssid().into(),
                    link,
                })
            }
            Err(error) => {
                log::warn!(
                    "provisioning: join failed ssid={} err={}",
                    identity.ssid(),
                    error.as_str()
                );
                self.dispatch(ProvisioningEvent::JoinFailed);
                Some(ProvisioningNotice::ConnectFailed {
                    ssid: identity.ssid().into(),
                    error,
                })
            }
        }
    }

    async fn recover(&mut self, now_ms: u64) -> Option<ProvisioningNotice> {
        if let Some(link) = self.radio.link() {
            log::info!("provisioning: link restored ip={}", link.ip_string());
            self.link = Some(link);
            self.dispatch(ProvisioningEvent::LinkRestored);
            return Some(ProvisioningNotice::Reconnected(link));
        }
        if now_ms < self.next_retry_at_ms {
            return None;
        }
        match self.attempt_stored_connection(now_ms).await {
            ConnectOutcome::Connected(link) => Some(ProvisioningNotice::Reconnected(link)),
            ConnectOutcome::Failed(err) => {
                log::info!(
                    "provisioning: retry failed err={} next_in_ms={}",
                    err.as_str(),
                    self.policy.retry_interval_ms
                );
                None
            }
        }
    }

    async fn finish_join(&mut self) {
        self.close_portal().await;
        if !self.policy.hotspot_enabled {
            return;
        }
        if let Some(hotspot) = &self.hotspot {
            if let Err(err) = self.radio.open_hotspot(hotspot).await {
                log::warn!("provisioning: hotspot failed err={}", err.as_str());
            }
        }
    }

    async fn close_portal(&mut self) {
        if !self.portal_open {
            return;
        }
        if let Err(err) = self.radio.close_portal().await {
            log::warn!("provisioning: portal close failed err={}", err.as_str());
        }
        self.portal_open = false;
    }

    fn dispatch(&mut self, event: ProvisioningEvent) {
        let before = self.state();
        let mut context = DispatchContext::default();
        self.machine.handle_with_context(&event, &mut context);
        match context.status {
            DispatchStatus::Applied => log::info!(
                "provisioning: {} -> {} on {:?}",
                before.as_str(),
                self.state().as_str(),
                event
            ),
            DispatchStatus::Ignored => {
                log::debug!("provisioning: {:?} ignored in {}", event, before.as_str())
            }
        }
    }
}
