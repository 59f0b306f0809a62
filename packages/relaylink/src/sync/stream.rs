use super::transport::{StreamEvent, StreamTransport};
use super::wire::{self, InboundKind};
use super::{apply_remote, drain_local, SyncSession};
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::kv::KvStore;
use crate::relay::{Actuator, RelayStore};

/// Inbound frames handled per pass, so a chatty peer cannot starve the loop.
const MAX_INBOUND_PER_TICK: usize = 8;

/// Push strategy over one persistent connection.
pub struct StreamSync<W> {
    config: SyncConfig,
    transport: W,
    session: SyncSession,
    next_attempt_at_ms: u64,
    next_ping_at_ms: u64,
}

impl<W: StreamTransport> StreamSync<W> {
    pub fn new(config: SyncConfig, transport: W) -> Self {
        let config = config.sanitized();
        let session = SyncSession::new(&config);
        Self {
            config,
            transport,
            session,
            next_attempt_at_ms: 0,
            next_ping_at_ms: 0,
        }
    }

    /// Arms an immediate connection attempt on the next pass.
    pub fn activate<K, A, const N: usize>(&mut self, now_ms: u64, relays: &mut RelayStore<K, A, N>)
    where
        K: KvStore,
        A: Actuator,
    {
        log::info!("sync: stream active {}", self.config.endpoint_label());
        let _ = relays.drain_changes();
        self.session.connected = false;
        self.session.backoff.reset();
        self.next_attempt_at_ms = now_ms;
    }

    pub async fn reconcile<K, A, const N: usize>(
        &mut self,
        now_ms: u64,
        relays: &mut RelayStore<K, A, N>,
    ) where
        K: KvStore,
        A: Actuator,
    {
        if !self.session.connected {
            // Keep the transport serviced while waiting out the backoff.
            let _ = self.transport.poll().await;
            if now_ms >= self.next_attempt_at_ms {
                self.connect(now_ms, relays).await;
            }
            return;
        }

        for _ in 0..MAX_INBOUND_PER_TICK {
            match self.transport.poll().await {
                Some(StreamEvent::Text(text)) => {
                    self.session.last_exchange_ms = Some(now_ms);
                    self.handle_text(&text, relays);
                }
                Some(StreamEvent::Closed) => {
                    self.lost(now_ms, "closed by peer");
                    return;
                }
                None => break,
            }
        }

        if drain_local(relays) {
            self.send_state(now_ms, relays).await;
        }

        if self.session.connected && now_ms >= self.next_ping_at_ms {
            self.next_ping_at_ms = now_ms.saturating_add(self.config.ping_interval_ms);
            if let Err(err) = self.transport.send_text(wire::HEARTBEAT).await {
                log::warn!("sync: heartbeat failed err={}", err.as_str());
                self.lost(now_ms, "heartbeat send failed");
            }
        }
    }

    pub async fn deactivate(&mut self) {
        if self.session.connected {
            self.transport.close().await;
            log::info!("sync: stream inactive");
        }
        self.session.connected = false;
    }

    pub fn session(&self) -> &SyncSession {
        &self.session
    }

    pub fn transport(&mut self) -> &mut W {
        &mut self.transport
    }

    async fn connect<K, A, const N: usize>(&mut self, now_ms: u64, relays: &mut RelayStore<K, A, N>)
    where
        K: KvStore,
        A: Actuator,
    {
        let path = self.config.stream_path();
        match self.transport.connect(&path).await {
            Ok(()) => {
                log::info!(
                    "sync: stream connected after attempts={}",
                    self.session.backoff.attempt()
                );
                self.session.connected = true;
                self.session.last_exchange_ms = Some(now_ms);
                self.session.backoff.reset();
                self.next_ping_at_ms = now_ms.saturating_add(self.config.ping_interval_ms);
                let _ = relays.drain_changes();
                self.send_state(now_ms, relays).await;
            }
            Err(SyncError::PeerUnreachable) => {
                let delay = self.session.backoff.next_delay();
                self.next_attempt_at_ms = now_ms.saturating_add(delay);
                log::warn!(
                    "sync: stream connect failed err=peer_unreachable attempt={} next_in_ms={}",
                    self.session.backoff.attempt(),
                    delay
                );
            }
            Err(err) => {
                let delay = self.session.backoff.interval_ms();
                self.next_attempt_at_ms = now_ms.saturating_add(delay);
                log::warn!(
                    "sync: stream connect failed err={} next_in_ms={}",
                    err.as_str(),
                    delay
                );
            }
        }
    }

    fn handle_text<K, A, const N: usize>(&mut self, text: &str, relays: &mut RelayStore<K, A, N>)
    where
        K: KvStore,
        A: Actuator,
    {
        let inbound = match wire::decode_inbound(text, N) {
            Ok(inbound) => inbound,
            Err(err) => {
                log::warn!("sync: dropped frame err={}", err.as_str());
                return;
            }
        };
        match inbound.kind {
            InboundKind::Command | InboundKind::Update => {
                let applied = apply_remote(relays, &inbound.states);
                if applied > 0 {
                    log::info!("sync: applied remote changes count={}", applied);
                }
            }
            InboundKind::StateUpdate | InboundKind::Heartbeat | InboundKind::Unknown => {}
        }
    }

    async fn send_state<K, A, const N: usize>(&mut self, now_ms: u64, relays: &RelayStore<K, A, N>)
    where
        K: KvStore,
        A: Actuator,
    {
        let text = match wire::encode_state_update(&relays.states()) {
            Ok(text) => text,
            Err(err) => {
                log::warn!("sync: state encode failed err={}", err.as_str());
                return;
            }
        };
        if let Err(err) = self.transport.send_text(&text).await {
            log::warn!("sync: state push failed err={}", err.as_str());
            self.lost(now_ms, "send failed");
        }
    }

    fn lost(&mut self, now_ms: u64, reason: &str) {
        self.session.connected = false;
        self.next_attempt_at_ms = now_ms.saturating_add(self.session.backoff.interval_ms());
        log::warn!(
            "sync: stream lost reason={} retry_in_ms={}",
            reason,
            self.session.backoff.interval_ms()
        );
    }
}
