use alloc::{string::String, vec::Vec};

use super::transport::{Method, RestTransport};
use super::wire::{self, DeviceStatus};
use super::{apply_remote, drain_local, SyncSession};
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::kv::KvStore;
use crate::radio::LinkInfo;
use crate::relay::{Actuator, RelayStore};

/// Pull strategy: fetch the peer snapshot on a fixed cadence, push the full
/// local snapshot whenever something changes locally.
pub struct PollSync<H> {
    config: SyncConfig,
    transport: H,
    session: SyncSession,
    next_poll_at_ms: u64,
    next_heartbeat_at_ms: u64,
    /// When the latest unacknowledged local snapshot was taken. Peer values
    /// are held back for one poll interval after it, then the peer wins.
    pending_since_ms: Option<u64>,
}

impl<H: RestTransport> PollSync<H> {
    pub fn new(config: SyncConfig, transport: H) -> Self {
        let config = config.sanitized();
        let session = SyncSession::new(&config);
        Self {
            config,
            transport,
            session,
            next_poll_at_ms: 0,
            next_heartbeat_at_ms: 0,
            pending_since_ms: None,
        }
    }

    pub async fn activate<K, A, const N: usize>(
        &mut self,
        now_ms: u64,
        link: LinkInfo,
        relays: &mut RelayStore<K, A, N>,
    ) where
        K: KvStore,
        A: Actuator,
    {
        log::info!("sync: poll active {}", self.config.endpoint_label());
        self.session.connected = true;
        let _ = relays.drain_changes();

        let status = DeviceStatus {
            online: true,
            last_seen: now_ms,
            ip: Some(link.ip_string()),
        };
        if let Err(err) = self.send_status(now_ms, &status).await {
            log::warn!("sync: announce failed err={}", err.as_str());
        }
        self.pending_since_ms = Some(now_ms);
        self.push(now_ms, relays).await;

        self.next_poll_at_ms = now_ms.saturating_add(self.config.poll_interval_ms);
        self.next_heartbeat_at_ms = now_ms.saturating_add(self.config.heartbeat_interval_ms);
    }

    pub async fn reconcile<K, A, const N: usize>(
        &mut self,
        now_ms: u64,
        relays: &mut RelayStore<K, A, N>,
    ) where
        K: KvStore,
        A: Actuator,
    {
        let fresh_local = drain_local(relays);
        if fresh_local {
            // Fresh changes go out at once.
            self.pending_since_ms = Some(now_ms);
            self.push(now_ms, relays).await;
        }

        if now_ms >= self.next_poll_at_ms {
            self.next_poll_at_ms = now_ms.saturating_add(self.config.poll_interval_ms);
            if self.pending_since_ms.is_some() && !fresh_local {
                self.push(now_ms, relays).await;
            }
            let shielded = self.pending_since_ms.is_some_and(|since| {
                now_ms.saturating_sub(since) < self.config.poll_interval_ms
            });
            if shielded {
                log::debug!("sync: poll skipped, local change unacknowledged");
            } else if let Err(err) = self.pull(now_ms, relays).await {
                log::warn!("sync: poll failed err={}", err.as_str());
            }
        }

        if now_ms >= self.next_heartbeat_at_ms {
            self.next_heartbeat_at_ms = now_ms.saturating_add(self.config.heartbeat_interval_ms);
            let status = DeviceStatus {
                online: true,
                last_seen: now_ms,
                ip: None,
            };
            if let Err(err) = self.send_status(now_ms, &status).await {
                log::warn!("sync: heartbeat failed err={}", err.as_str());
            }
        }
    }

    pub fn deactivate(&mut self) {
        if self.session.connected {
            log::info!("sync: poll inactive");
        }
        self.session.connected = false;
    }

    pub fn session(&self) -> &SyncSession {
        &self.session
    }

    pub fn transport(&mut self) -> &mut H {
        &mut self.transport
    }

    async fn push<K, A, const N: usize>(&mut self, now_ms: u64, relays: &RelayStore<K, A, N>)
    where
        K: KvStore,
        A: Actuator,
    {
        let result = match wire::encode_snapshot(&relays.snapshot()) {
            Ok(body) => {
                let path = self.config.relays_path();
                self.exchange(now_ms, Method::Put, &path, Some(body)).await
            }
            Err(err) => Err(err),
        };
        match result {
            Ok(_) => self.pending_since_ms = None,
            Err(err) => log::warn!("sync: push failed err={}", err.as_str()),
        }
    }

    async fn pull<K, A, const N: usize>(
        &mut self,
        now_ms: u64,
        relays: &mut RelayStore<K, A, N>,
    ) -> Result<(), SyncError>
    where
        K: KvStore,
        A: Actuator,
    {
        let path = self.config.relays_path();
        let body = self.exchange(now_ms, Method::Get, &path, None).await?;
        let Some(states) = wire::decode_relays(&body, N)? else {
            return Ok(());
        };
        let applied = apply_remote(relays, &states);
        if applied > 0 {
            log::info!("sync: applied remote changes count={}", applied);
        }
        Ok(())
    }

    async fn send_status(&mut self, now_ms: u64, status: &DeviceStatus) -> Result<(), SyncError> {
        let body = wire::encode_status(status)?;
        let path = self.config.device_path();
        self.exchange(now_ms, Method::Patch, &path, Some(body))
            .await
            .map(|_| ())
    }

    async fn exchange(
        &mut self,
        now_ms: u64,
        method: Method,
        path: &str,
        body: Option<String>,
    ) -> Result<Vec<u8>, SyncError> {
        let reply = self
            .transport
            .request(method, path, body.as_deref().map(str::as_bytes))
            .await?
            .check()?;
        self.session.last_exchange_ms = Some(now_ms);
        Ok(reply.body)
    }
}
