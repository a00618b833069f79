//! In-process presence store.
//!
//! Deterministic backend for embedding and tests: a mutex-guarded map plus
//! a watch channel carrying the active snapshot. Timestamps come from the
//! injected [`Clock`], so recency behavior is reproducible.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use super::{PresenceFeed, PresenceStore};
use crate::clock::{Clock, SystemClock};
use crate::errors::PresenceError;
use crate::models::{DriverId, PresencePatch, PresenceRecord};

pub struct MemoryPresenceStore {
    records: Mutex<HashMap<DriverId, PresenceRecord>>,
    tx: watch::Sender<Vec<PresenceRecord>>,
    clock: Arc<dyn Clock>,
}

impl MemoryPresenceStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        let (tx, _rx) = watch::channel(Vec::new());
        Self {
            records: Mutex::new(HashMap::new()),
            tx,
            clock,
        }
    }

    fn active_snapshot(records: &HashMap<DriverId, PresenceRecord>) -> Vec<PresenceRecord> {
        let mut rows: Vec<_> = records.values().filter(|r| r.active).cloned().collect();
        rows.sort_by(|a, b| a.driver_id.cmp(&b.driver_id));
        rows
    }

    fn publish(&self, records: &HashMap<DriverId, PresenceRecord>) {
        self.tx.send_replace(Self::active_snapshot(records));
    }
}

impl Default for MemoryPresenceStore {
    fn default() -> Self {
        Self::new()
    }
}

fn apply_patch(record: &mut PresenceRecord, patch: PresencePatch) {
    if let Some(v) = patch.display_name {
        record.display_name = Some(v);
    }
    if let Some(v) = patch.vehicle_label {
        record.vehicle_label = Some(v);
    }
    if let Some(v) = patch.route_label {
        record.route_label = Some(v);
    }
    if let Some(v) = patch.position {
        record.position = Some(v);
    }
    if let Some(v) = patch.accuracy_m {
        record.accuracy_m = Some(v);
    }
    if let Some(v) = patch.heading_deg {
        record.heading_deg = Some(v);
    }
    if let Some(v) = patch.speed_mps {
        record.speed_mps = Some(v);
    }
    if let Some(v) = patch.active {
        record.active = v;
    }
}

#[async_trait]
impl PresenceStore for MemoryPresenceStore {
    async fn upsert(
        &self,
        driver: &DriverId,
        patch: PresencePatch,
    ) -> Result<(), PresenceError> {
        let now = self.clock.now();
        let mut records = self.records.lock().unwrap();

        match records.get_mut(driver) {
            Some(record) => {
                apply_patch(record, patch);
                record.last_seen_at = now;
            }
            None => {
                let mut record = PresenceRecord {
                    driver_id: driver.clone(),
                    display_name: None,
                    vehicle_label: None,
                    route_label: None,
                    position: None,
                    accuracy_m: None,
                    heading_deg: None,
                    speed_mps: None,
                    active: false,
                    first_seen_at: now,
                    last_seen_at: now,
                };
                apply_patch(&mut record, patch);
                records.insert(driver.clone(), record);
            }
        }

        self.publish(&records);
        Ok(())
    }

    async fn delete(&self, driver: &DriverId) -> Result<(), PresenceError> {
        let mut records = self.records.lock().unwrap();
        if records.remove(driver).is_some() {
            self.publish(&records);
        }
        Ok(())
    }

    async fn subscribe(&self) -> Result<PresenceFeed, PresenceError> {
        Ok(PresenceFeed::new(self.tx.subscribe(), None))
    }

    async fn sweep(&self, max_age: Duration) -> Result<u64, PresenceError> {
        let Some(cutoff) = chrono::Duration::from_std(max_age)
            .ok()
            .and_then(|age| self.clock.now().checked_sub_signed(age))
        else {
            return Ok(0);
        };

        let mut records = self.records.lock().unwrap();
        let before = records.len();
        records.retain(|_, record| record.last_seen_at >= cutoff);
        let removed = (before - records.len()) as u64;
        if removed > 0 {
            self.publish(&records);
        }
        Ok(removed)
    }
}
