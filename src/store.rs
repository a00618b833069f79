//! Presence store: the shared table of who is currently live, and where.
//!
//! One record per driver, merge-upsert semantics, and a subscription feed
//! that always delivers the full current active set — never a diff. Two
//! backends: [`MemoryPresenceStore`] for embedding and deterministic tests,
//! [`PgPresenceStore`] for durable shared state.

mod memory;
mod postgres;

pub use memory::MemoryPresenceStore;
pub use postgres::PgPresenceStore;

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::errors::PresenceError;
use crate::models::{DriverId, PresencePatch, PresenceRecord};

/// Default reclamation age for abandoned records: 24 hours.
///
/// Distinct from the display recency threshold on purpose; this one only
/// bounds storage growth from sessions that were never stopped.
pub const DEFAULT_SWEEP_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

#[async_trait]
pub trait PresenceStore: Send + Sync {
    /// Merge-write a record. Fields left `None` in the patch are preserved
    /// from the existing record; `last_seen_at` is refreshed on every call
    /// and `first_seen_at` assigned once at creation.
    async fn upsert(&self, driver: &DriverId, patch: PresencePatch)
        -> Result<(), PresenceError>;

    /// Remove the record entirely. Deleting an absent record is a no-op.
    async fn delete(&self, driver: &DriverId) -> Result<(), PresenceError>;

    /// Subscribe to the set of records where `active == true`.
    ///
    /// The current snapshot is available immediately; every subsequent
    /// write publishes the full current set.
    async fn subscribe(&self) -> Result<PresenceFeed, PresenceError>;

    /// Delete records whose `last_seen_at` is older than `max_age`,
    /// returning how many were removed. Out-of-band reclamation, typically
    /// run on a timer with [`DEFAULT_SWEEP_MAX_AGE`].
    async fn sweep(&self, max_age: Duration) -> Result<u64, PresenceError>;
}

/// Live feed of the active presence set
///
/// Wraps a watch channel: at-least-once delivery of the full snapshot after
/// every write, no cross-key ordering. Dropping the feed unsubscribes.
pub struct PresenceFeed {
    rx: watch::Receiver<Vec<PresenceRecord>>,
    _guard: Option<FeedGuard>,
}

struct FeedGuard(JoinHandle<()>);

impl Drop for FeedGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl PresenceFeed {
    pub(crate) fn new(
        rx: watch::Receiver<Vec<PresenceRecord>>,
        listener: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            rx,
            _guard: listener.map(FeedGuard),
        }
    }

    /// Current snapshot, without waiting.
    pub fn snapshot(&self) -> Vec<PresenceRecord> {
        self.rx.borrow().clone()
    }

    /// Wait for the next change, then return the new snapshot.
    pub async fn recv(&mut self) -> Result<Vec<PresenceRecord>, PresenceError> {
        self.rx
            .changed()
            .await
            .map_err(|_| PresenceError::FeedClosed)?;
        let rows = self.rx.borrow_and_update().clone();
        Ok(rows)
    }
}
