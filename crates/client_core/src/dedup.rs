//! In-flight request registry.
//!
//! Each [`OperationKey`] moves through `ABSENT -> IN_FLIGHT -> ABSENT`. The
//! caller that wins [`RequestDedup::begin`] holds an [`InFlightTicket`] that
//! releases the entry when completed or dropped, so every exit path (success,
//! error, cancellation of the caller's future) settles the key. Callers that
//! lose get a [`SupersededHandle`] and either give up immediately or join the
//! original's outcome, depending on [`DedupPolicy`].

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use serde::Deserialize;
use tokio::{sync::watch, time::Instant};
use tracing::{debug, warn};

use crate::{error::ClientError, operation_key::OperationKey, transport::ResponseEnvelope};

pub const DEFAULT_MAX_IN_FLIGHT_AGE: Duration = Duration::from_secs(120);

pub type SharedOutcome = Result<ResponseEnvelope, ClientError>;

/// What a duplicate caller does while the original is outstanding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupPolicy {
    /// Fail fast with [`ClientError::Superseded`].
    #[default]
    Suppress,
    /// Wait for the original and share its outcome.
    Join,
}

struct InFlightEntry {
    generation: u64,
    started_at: Instant,
    outcome: watch::Sender<Option<SharedOutcome>>,
}

#[derive(Default)]
struct Registry {
    entries: HashMap<OperationKey, InFlightEntry>,
    next_generation: u64,
}

pub struct RequestDedup {
    registry: Arc<Mutex<Registry>>,
    max_age: Duration,
}

pub enum Admission {
    Proceed(InFlightTicket),
    Duplicate(SupersededHandle),
}

impl Admission {
    pub fn proceed(&self) -> bool {
        matches!(self, Self::Proceed(_))
    }
}

impl RequestDedup {
    pub fn new(max_age: Duration) -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry::default())),
            max_age,
        }
    }

    /// Registers `key` as in flight, or reports that it already is.
    ///
    /// An entry older than the maximum age is treated as hung: it is evicted
    /// and the new caller proceeds.
    pub fn begin(&self, key: OperationKey) -> Admission {
        let mut registry = lock(&self.registry);
        let now = Instant::now();

        if let Some(entry) = registry.entries.get(&key) {
            let age = now.saturating_duration_since(entry.started_at);
            if age < self.max_age {
                debug!(key = %key, "dedup: duplicate request suppressed");
                return Admission::Duplicate(SupersededHandle {
                    key,
                    outcome: entry.outcome.subscribe(),
                    max_wait: self.max_age.saturating_sub(age),
                });
            }
            warn!(
                key = %key,
                age_ms = age.as_millis() as u64,
                "dedup: evicting stale in-flight entry"
            );
            registry.entries.remove(&key);
        }

        registry.next_generation += 1;
        let generation = registry.next_generation;
        let (outcome, _) = watch::channel(None);
        registry.entries.insert(
            key.clone(),
            InFlightEntry {
                generation,
                started_at: now,
                outcome,
            },
        );
        Admission::Proceed(InFlightTicket {
            key,
            generation,
            registry: Arc::clone(&self.registry),
            released: false,
        })
    }

    /// Removes the entry for `key` unconditionally. Joined duplicates of the
    /// removed entry resolve as superseded.
    pub fn settle(&self, key: &OperationKey) -> bool {
        lock(&self.registry).entries.remove(key).is_some()
    }

    /// Drops every entry whose key matches `predicate`; returns how many.
    pub fn release_where(&self, predicate: impl Fn(&OperationKey) -> bool) -> usize {
        let mut registry = lock(&self.registry);
        let before = registry.entries.len();
        registry.entries.retain(|key, _| !predicate(key));
        before - registry.entries.len()
    }

    pub fn release_all(&self) -> usize {
        self.release_where(|_| true)
    }

    pub fn is_in_flight(&self, key: &OperationKey) -> bool {
        lock(&self.registry).entries.contains_key(key)
    }

    pub fn in_flight_count(&self) -> usize {
        lock(&self.registry).entries.len()
    }
}

impl Default for RequestDedup {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_IN_FLIGHT_AGE)
    }
}

fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Proof that the holder owns the in-flight entry for its key.
#[must_use = "dropping the ticket settles the key immediately"]
pub struct InFlightTicket {
    key: OperationKey,
    generation: u64,
    registry: Arc<Mutex<Registry>>,
    released: bool,
}

impl InFlightTicket {
    /// Settles the key and hands `outcome` to any joined duplicates.
    pub fn complete(mut self, outcome: &SharedOutcome) {
        self.release(Some(outcome.clone()));
    }

    fn release(&mut self, outcome: Option<SharedOutcome>) {
        if self.released {
            return;
        }
        self.released = true;

        let entry = {
            let mut registry = lock(&self.registry);
            // An evicted or bulk-released entry may have been replaced by a
            // newer caller; only our own generation is removed.
            match registry.entries.get(&self.key) {
                Some(entry) if entry.generation == self.generation => {
                    registry.entries.remove(&self.key)
                }
                _ => None,
            }
        };

        match (entry, outcome) {
            (Some(entry), Some(outcome)) => {
                let _ = entry.outcome.send(Some(outcome));
            }
            (None, _) => debug!(key = %self.key, "dedup: entry already released"),
            (Some(_), None) => debug!(key = %self.key, "dedup: released without outcome"),
        }
    }
}

impl Drop for InFlightTicket {
    fn drop(&mut self) {
        self.release(None);
    }
}

/// Handed to a caller whose request duplicates one already in flight.
pub struct SupersededHandle {
    key: OperationKey,
    outcome: watch::Receiver<Option<SharedOutcome>>,
    max_wait: Duration,
}

impl SupersededHandle {
    pub fn key(&self) -> &OperationKey {
        &self.key
    }

    /// Abandons the redundant attempt. The original is untouched.
    pub fn abort(self) -> ClientError {
        ClientError::Superseded {
            key: self.key.to_string(),
        }
    }

    /// Waits for the original to settle and returns its outcome. Resolves as
    /// superseded when the original is released without an outcome or
    /// outlives the remaining maximum age.
    pub async fn join(mut self) -> SharedOutcome {
        let waited =
            tokio::time::timeout(self.max_wait, self.outcome.wait_for(Option::is_some)).await;
        let outcome = match waited {
            Ok(Ok(value)) => value.clone(),
            Ok(Err(_)) | Err(_) => None,
        };
        outcome.unwrap_or_else(|| {
            Err(ClientError::Superseded {
                key: self.key.to_string(),
            })
        })
    }
}

#[cfg(test)]
#[path = "tests/dedup_tests.rs"]
mod tests;
