//! The single cooperative loop body: provisioning first, then relay sync
//! while the station link is up, plus the portal requests in between.

use alloc::string::String;

use crate::error::ProvisioningError;
use crate::kv::KvStore;
use crate::portal::{self, PortalReply, PortalRequest, PortalResponse};
use crate::provisioning::{ProvisioningController, ProvisioningNotice, ProvisioningState};
use crate::radio::WifiRadio;
use crate::relay::{Actuator, RelayStore};
use crate::sync::{RestTransport, StreamTransport, SyncEngine};

#[cfg(test)]
mod tests;

pub struct ControlLoop<R, K, A, H, W, const N: usize> {
    provisioning: ProvisioningController<R, K>,
    relays: RelayStore<K, A, N>,
    sync: Option<SyncEngine<H, W>>,
    sync_active: bool,
    hostname: String,
    portal_host: String,
    save_pending: bool,
    save_reply: Option<PortalResponse>,
    restart_requested: bool,
}

impl<R, K, A, H, W, const N: usize> ControlLoop<R, K, A, H, W, N>
where
    R: WifiRadio,
    K: KvStore,
    A: Actuator,
    H: RestTransport,
    W: StreamTransport,
{
    /// `sync` is `None` when no backend is configured; the device then only
    /// keeps its relays and its link.
    pub fn new(
        provisioning: ProvisioningController<R, K>,
        relays: RelayStore<K, A, N>,
        sync: Option<SyncEngine<H, W>>,
        hostname: impl Into<String>,
        portal_host: impl Into<String>,
    ) -> Self {
        Self {
            provisioning,
            relays,
            sync,
            sync_active: false,
            hostname: hostname.into(),
            portal_host: portal_host.into(),
            save_pending: false,
            save_reply: None,
            restart_requested: false,
        }
    }

    /// Restores the relays before any network activity, then makes the boot
    /// connectivity decision.
    pub async fn start(&mut self, now_ms: u64) -> Option<ProvisioningNotice> {
        self.relays.init();
        self.provisioning.start(now_ms).await
    }

    pub async fn tick(&mut self, now_ms: u64) -> Option<ProvisioningNotice> {
        let notice = self.provisioning.tick(now_ms).await;
        if self.save_pending {
            self.resolve_save(notice.as_ref());
        }

        let connected = self.provisioning.state() == ProvisioningState::Connected;
        match (connected, self.sync_active) {
            (true, false) => {
                if let (Some(sync), Some(link)) = (self.sync.as_mut(), self.provisioning.link()) {
                    log::info!("control: sync on strategy={}", sync.session().strategy.as_str());
                    sync.activate(now_ms, link, &mut self.relays).await;
                }
                self.sync_active = true;
            }
            (true, true) => {
                if let Some(sync) = self.sync.as_mut() {
                    sync.reconcile(now_ms, &mut self.relays).await;
                }
            }
            (false, true) => {
                if let Some(sync) = self.sync.as_mut() {
                    log::info!("control: sync off");
                    sync.deactivate().await;
                }
                self.sync_active = false;
            }
            (false, false) => {}
        }
        notice
    }

    pub async fn handle_portal(&mut self, request: PortalRequest, now_ms: u64) -> PortalReply {
        let response = match request {
            PortalRequest::Scan => match self.provisioning.scan_networks().await {
                Ok(entries) => portal::scan_response(&entries),
                Err(err) => {
                    log::warn!("control: scan failed err={}", err.as_str());
                    PortalResponse::error(portal::STATUS_UNAVAILABLE, "scan failed")
                }
            },
            PortalRequest::SaveWifi { ssid, password } => {
                match self.provisioning.submit_credentials(&ssid, &password) {
                    Ok(_) => {
                        self.save_pending = true;
                        return PortalReply::Deferred;
                    }
                    Err(ProvisioningError::NotAccepting) => {
                        portal::save_failure(portal::STATUS_CONFLICT, "not accepting credentials")
                    }
                    Err(ProvisioningError::InvalidIdentity) => {
                        portal::save_failure(portal::STATUS_BAD_REQUEST, "invalid ssid or password")
                    }
                }
            }
            PortalRequest::ResetWifi => {
                self.factory_reset().await;
                portal::reset_response()
            }
            PortalRequest::System => portal::system_response(
                &self.hostname,
                self.provisioning.state(),
                self.provisioning.identity().map(|identity| identity.ssid()),
                self.provisioning.link(),
                now_ms,
            ),
            PortalRequest::CaptiveProbe => {
                PortalResponse::redirect(alloc::format!("http://{}/", self.portal_host))
            }
            PortalRequest::BadRequest(reason) => {
                PortalResponse::error(portal::STATUS_BAD_REQUEST, reason)
            }
            PortalRequest::MethodNotAllowed => {
                PortalResponse::error(portal::STATUS_METHOD_NOT_ALLOWED, "method not allowed")
            }
            PortalRequest::NotFound => PortalResponse::error(portal::STATUS_NOT_FOUND, "not found"),
        };
        PortalReply::Ready(response)
    }

    /// Answer for the last deferred save, once per save.
    pub fn take_save_reply(&mut self) -> Option<PortalResponse> {
        self.save_reply.take()
    }

    /// Set after a factory reset; the firmware restarts once the reply is
    /// out.
    pub fn restart_requested(&self) -> bool {
        self.restart_requested
    }

    pub fn provisioning(&self) -> &ProvisioningController<R, K> {
        &self.provisioning
    }

    pub fn provisioning_mut(&mut self) -> &mut ProvisioningController<R, K> {
        &mut self.provisioning
    }

    pub fn relays(&self) -> &RelayStore<K, A, N> {
        &self.relays
    }

    pub fn relays_mut(&mut self) -> &mut RelayStore<K, A, N> {
        &mut self.relays
    }

    pub fn sync(&self) -> Option<&SyncEngine<H, W>> {
        self.sync.as_ref()
    }

    pub fn sync_mut(&mut self) -> Option<&mut SyncEngine<H, W>> {
        self.sync.as_mut()
    }

    pub fn is_sync_active(&self) -> bool {
        self.sync_active
    }

    async fn factory_reset(&mut self) {
        if self.sync_active {
            if let Some(sync) = self.sync.as_mut() {
                sync.deactivate().await;
            }
            self.sync_active = false;
        }
        self.provisioning.factory_reset();
        if self.save_pending {
            self.save_pending = false;
            self.save_reply = Some(portal::save_failure(portal::STATUS_CONFLICT, "reset"));
        }
        self.restart_requested = true;
    }

    fn resolve_save(&mut self, notice: Option<&ProvisioningNotice>) {
        if let Some(response) = notice.and_then(|notice| portal::save_outcome(notice, &self.hostname)) {
            self.save_pending = false;
            self.save_reply = Some(response);
            return;
        }
        if self.provisioning.state() != ProvisioningState::Connecting {
            self.save_pending = false;
            self.save_reply = Some(portal::save_failure(
                portal::STATUS_OK,
                "connection attempt abandoned",
            ));
        }
    }
}
