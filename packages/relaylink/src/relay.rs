//! Authoritative relay state.
//!
//! [`RelayStore::set`] is the only write path: it updates memory, persists
//! the value, drives the output and records the change, in that order.
//! Writing an already-held value does nothing at all, which is what keeps
//! flash wear down and stops remote/local echo loops.

use alloc::format;
use core::array;

use heapless::Deque;

use crate::error::IndexError;
use crate::kv::{KvStore, RELAY_NAMESPACE};


pub const CHANGE_QUEUE_CAPACITY: usize = 16;

/// Physical output. Polarity is the implementor's concern; `on` is the
/// logical state.
pub trait Actuator {
    fn drive(&mut self, index: usize, on: bool);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Origin {
    Local,
    Remote,
}

impl Origin {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Remote => "remote",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RelayChange {
    pub index: usize,
    pub state: bool,
    pub origin: Origin,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RelayRecord {
    pub index: usize,
    pub name: &'static str,
    pub state: bool,
}

pub type ChangeQueue = Deque<RelayChange, CHANGE_QUEUE_CAPACITY>;

pub struct RelayStore<K, A, const N: usize> {
    kv: K,
    actuator: A,
    names: [&'static str; N],
    states: [bool; N],
    durable: [bool; N],
    changes: ChangeQueue,
}

impl<K, A, const N: usize> RelayStore<K, A, N>
where
    K: KvStore,
    A: Actuator,
{
    pub fn new(kv: K, actuator: A, names: [&'static str; N]) -> Self {
        Self {
            kv,
            actuator,
            names,
            states: [false; N],
            durable: [true; N],
            changes: Deque::new(),
        }
    }

    /// Restores persisted states (missing entries default to off) and drives
    /// every output to match. Emits no change notifications.
    pub fn init(&mut self) {
        for index in 0..N {
            let state = match self.kv.get_bool(RELAY_NAMESPACE, &relay_key(index)) {
                Ok(state) => state.unwrap_or(false),
                Err(err) => {
                    log::warn!("relay: restore failed index={} err={}", index, err);
                    false
                }
            };
            self.states[index] = state;
            self.durable[index] = true;
            self.actuator.drive(index, state);
        }
        log::info!("relay: restored {:?}", self.states);
    }

    /// Returns the state held before the call.
    pub fn set(&mut self, index: usize, state: bool, origin: Origin) -> Result<bool, IndexError> {
        let previous = self.state(index)?;
        if previous == state {
            return Ok(previous);
        }

        self.states[index] = state;
        match self.kv.put_bool(RELAY_NAMESPACE, &relay_key(index), state) {
            Ok(()) => self.durable[index] = true,
            Err(err) => {
                log::warn!(
                    "relay: persist failed index={} state={} err={}",
                    index,
                    state,
                    err
                );
                self.durable[index] = false;
            }
        }
        self.actuator.drive(index, state);

        let change = RelayChange {
            index,
            state,
            origin,
        };
        if self.changes.is_full() {
            let _ = self.changes.pop_front();
        }
        let _ = self.changes.push_back(change);
        log::info!(
            "relay: {} {} origin={}",
            self.names[index],
            if state { "on" } else { "off" },
            origin.as_str()
        );
        Ok(previous)
    }

    pub fn toggle(&mut self, index: usize, origin: Origin) -> Result<bool, IndexError> {
        let current = self.state(index)?;
        self.set(index, !current, origin)
    }

    pub fn all_off(&mut self, origin: Origin) {
        for index in 0..N {
            let _ = self.set(index, false, origin);
        }
    }

    pub fn state(&self, index: usize) -> Result<bool, IndexError> {
        self.states
            .get(index)
            .copied()
            .ok_or(IndexError { index, count: N })
    }

    pub fn snapshot(&self) -> [RelayRecord; N] {
        array::from_fn(|index| RelayRecord {
            index,
            name: self.names[index],
            state: self.states[index],
        })
    }

    pub fn states(&self) -> [bool; N] {
        self.states
    }

    pub fn name(&self, index: usize) -> Option<&'static str> {
        self.names.get(index).copied()
    }

    /// Takes every change committed since the last drain, oldest first.
    pub fn drain_changes(&mut self) -> ChangeQueue {
        core::mem::take(&mut self.changes)
    }

    pub fn is_durable(&self, index: usize) -> bool {
        self.durable.get(index).copied().unwrap_or(false)
    }

    pub const fn len(&self) -> usize {
        N
    }

    pub const fn is_empty(&self) -> bool {
        N == 0
    }

    pub fn into_parts(self) -> (K, A) {
        (self.kv, self.actuator)
    }
}

fn relay_key(index: usize) -> alloc::string::String {
    format!("relay{}", index)
}
