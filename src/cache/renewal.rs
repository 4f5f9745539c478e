//! Per-key single-flight guard for token renewals.
//!
//! The first caller to `acquire` a key becomes the leader and performs the fetch.
//! Everybody else for that key gets a waiter bound to the leader's completion
//! signal (a `watch` channel created at `acquire`). Keys never block each other.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::cache::token::Token;
use crate::errors::{CacheError, CacheResult};

type Outcome = Option<CacheResult<Token>>;

#[derive(Debug)]
struct InFlight {
    id: u64,
    tx: watch::Sender<Outcome>,
}

#[derive(Debug, Default)]
struct CoordinatorState {
    in_flight: HashMap<String, InFlight>,
    next_id: u64,
    shut_down: bool,
}

#[derive(Debug, Clone, Default)]
pub struct RenewalCoordinator {
    state: Arc<Mutex<CoordinatorState>>,
}

/// Result of `RenewalCoordinator::acquire`.
#[derive(Debug)]
pub enum Renewal {
    /// This caller performs the fetch and must complete the guard.
    Leader(RenewalGuard),
    /// A renewal is already in flight; wait for its outcome.
    InProgress(RenewalWaiter),
}

impl Renewal {
    pub fn already_in_progress(&self) -> bool {
        matches!(self, Renewal::InProgress(_))
    }
}

impl RenewalCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    // The lock only guards map transitions; a poisoned map is still consistent.
    fn lock(&self) -> MutexGuard<'_, CoordinatorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Atomically check-and-set the renewing marker for `key`.
    pub fn acquire(&self, key: &str) -> CacheResult<Renewal> {
        let mut state = self.lock();
        if state.shut_down {
            return Err(CacheError::Shutdown);
        }

        if let Some(in_flight) = state.in_flight.get(key) {
            debug!(key = %key, "renewal already in progress, joining");
            return Ok(Renewal::InProgress(RenewalWaiter {
                key: key.to_owned(),
                rx: in_flight.tx.subscribe(),
            }));
        }

        state.next_id += 1;
        let id = state.next_id;
        let (tx, _) = watch::channel(None);
        state.in_flight.insert(key.to_owned(), InFlight { id, tx });
        debug!(key = %key, "renewal leader acquired");

        Ok(Renewal::Leader(RenewalGuard {
            key: key.to_owned(),
            id,
            coordinator: self.clone(),
            released: false,
        }))
    }

    /// Waiter for the renewal currently in flight for `key`, if there is one.
    pub fn wait_for_completion(&self, key: &str) -> Option<RenewalWaiter> {
        self.lock().in_flight.get(key).map(|in_flight| RenewalWaiter {
            key: key.to_owned(),
            rx: in_flight.tx.subscribe(),
        })
    }

    pub fn is_renewing(&self, key: &str) -> bool {
        self.lock().in_flight.contains_key(key)
    }

    pub fn renewing_keys(&self) -> BTreeSet<String> {
        self.lock().in_flight.keys().cloned().collect()
    }

    /// Wake every pending waiter with `CacheError::Shutdown` and refuse new renewals.
    /// Leaders still running finish their fetch; their outcome goes nowhere.
    pub fn shutdown(&self) {
        let drained: Vec<(String, InFlight)> = {
            let mut state = self.lock();
            state.shut_down = true;
            state.in_flight.drain().collect()
        };
        for (key, in_flight) in drained {
            debug!(key = %key, "releasing renewal waiters on shutdown");
            in_flight.tx.send_replace(Some(Err(CacheError::Shutdown)));
        }
    }

    fn release(&self, key: &str, id: u64, outcome: CacheResult<Token>) {
        let in_flight = {
            let mut state = self.lock();
            match state.in_flight.get(key) {
                Some(current) if current.id == id => state.in_flight.remove(key),
                _ => None,
            }
        };
        if let Some(in_flight) = in_flight {
            in_flight.tx.send_replace(Some(outcome));
        }
    }
}

/// Leadership over one key's renewal. Dropping it without `complete` still
/// releases the key and fails the waiters, so the key can never stay blocked.
#[derive(Debug)]
pub struct RenewalGuard {
    key: String,
    id: u64,
    coordinator: RenewalCoordinator,
    released: bool,
}

impl RenewalGuard {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Release the key and broadcast `outcome` to every waiter.
    pub fn complete(mut self, outcome: CacheResult<Token>) {
        self.released = true;
        self.coordinator.release(&self.key, self.id, outcome);
    }
}

impl Drop for RenewalGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        warn!(key = %self.key, "renewal dropped before completion");
        self.coordinator.release(
            &self.key,
            self.id,
            Err(CacheError::fetch(&self.key, "renewal abandoned before completion")),
        );
    }
}

#[derive(Debug)]
pub struct RenewalWaiter {
    key: String,
    rx: watch::Receiver<Outcome>,
}

impl RenewalWaiter {
    /// Suspend until the leader resolves, then return its outcome.
    pub async fn wait(mut self) -> CacheResult<Token> {
        let outcome = match self.rx.wait_for(Option::is_some).await {
            Ok(value) => value.clone(),
            Err(_) => None,
        };
        outcome.unwrap_or_else(|| {
            Err(CacheError::fetch(&self.key, "renewal ended without a result"))
        })
    }
}
