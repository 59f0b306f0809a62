//! Reconciliation of the relay store with the backend.
//!
//! Two strategies share one contract: `activate` when the station link comes
//! up, `reconcile` every control-loop pass while it stays up, `deactivate`
//! when it drops. Both push full snapshots, apply peer values through
//! [`RelayStore::set`] with [`Origin::Remote`], and never echo those back.

use crate::config::{SyncConfig, SyncStrategy};
use crate::kv::KvStore;
use crate::radio::LinkInfo;
use crate::relay::{Actuator, Origin, RelayStore};

mod backoff;
mod poll;
mod stream;
mod transport;
pub mod wire;

#[cfg(test)]
mod tests;

pub use backoff::Backoff;
pub use poll::PollSync;
pub use stream::StreamSync;
pub use transport::{
    encode_request, status_error, HttpReply, Method, NoTransport, RestTransport, StreamEvent,
    StreamTransport,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SyncSession {
    pub strategy: SyncStrategy,
    pub connected: bool,
    pub last_exchange_ms: Option<u64>,
    pub backoff: Backoff,
}

impl SyncSession {
    fn new(config: &SyncConfig) -> Self {
        Self {
            strategy: config.strategy,
            connected: false,
            last_exchange_ms: None,
            backoff: Backoff::new(config.backoff),
        }
    }
}

pub enum SyncEngine<H, W> {
    Poll(PollSync<H>),
    Stream(StreamSync<W>),
}

impl<H, W> SyncEngine<H, W>
where
    H: RestTransport,
    W: StreamTransport,
{
    pub fn poll(config: SyncConfig, transport: H) -> Self {
        Self::Poll(PollSync::new(config, transport))
    }

    pub fn stream(config: SyncConfig, transport: W) -> Self {
        Self::Stream(StreamSync::new(config, transport))
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
        match self {
            Self::Poll(engine) => engine.activate(now_ms, link, relays).await,
            Self::Stream(engine) => engine.activate(now_ms, relays),
        }
    }

    pub async fn reconcile<K, A, const N: usize>(
        &mut self,
        now_ms: u64,
        relays: &mut RelayStore<K, A, N>,
    ) where
        K: KvStore,
        A: Actuator,
    {
        match self {
            Self::Poll(engine) => engine.reconcile(now_ms, relays).await,
            Self::Stream(engine) => engine.reconcile(now_ms, relays).await,
        }
    }

    pub async fn deactivate(&mut self) {
        match self {
            Self::Poll(engine) => engine.deactivate(),
            Self::Stream(engine) => engine.deactivate().await,
        }
    }

    pub fn session(&self) -> &SyncSession {
        match self {
            Self::Poll(engine) => engine.session(),
            Self::Stream(engine) => engine.session(),
        }
    }
}

/// Applies peer values as remote-origin writes. Equal values are no-ops in
/// the store, so nothing here can start an echo. Returns how many relays
/// changed.
pub(crate) fn apply_remote<K, A, const N: usize>(
    relays: &mut RelayStore<K, A, N>,
    states: &[(usize, bool)],
) -> usize
where
    K: KvStore,
    A: Actuator,
{
    let mut applied = 0;
    for &(index, state) in states {
        if let Ok(previous) = relays.set(index, state, Origin::Remote) {
            if previous != state {
                applied += 1;
            }
        }
    }
    applied
}

/// True when any change since the last drain came from the local side.
pub(crate) fn drain_local<K, A, const N: usize>(relays: &mut RelayStore<K, A, N>) -> bool
where
    K: KvStore,
    A: Actuator,
{
    relays
        .drain_changes()
        .iter()
        .any(|change| change.origin == Origin::Local)
}
