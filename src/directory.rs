//! Static scheduled-vehicle data collaborator.
//!
//! Schedule CRUD lives elsewhere; this crate only consumes the snapshot
//! feed. The shape mirrors the presence feed so viewers can select over
//! both.

use async_trait::async_trait;
use tokio::sync::watch;

use crate::errors::PresenceError;
use crate::models::StaticVehicle;

#[async_trait]
pub trait VehicleDirectory: Send + Sync {
    /// Subscribe to the scheduled-vehicle set. The current snapshot is
    /// available immediately; every change delivers the full set.
    async fn subscribe(&self) -> Result<VehicleFeed, PresenceError>;
}

/// Snapshot feed of scheduled vehicles
pub struct VehicleFeed {
    rx: watch::Receiver<Vec<StaticVehicle>>,
}

impl VehicleFeed {
    pub fn new(rx: watch::Receiver<Vec<StaticVehicle>>) -> Self {
        Self { rx }
    }

    pub fn snapshot(&self) -> Vec<StaticVehicle> {
        self.rx.borrow().clone()
    }

    pub async fn recv(&mut self) -> Result<Vec<StaticVehicle>, PresenceError> {
        self.rx
            .changed()
            .await
            .map_err(|_| PresenceError::FeedClosed)?;
        let rows = self.rx.borrow_and_update().clone();
        Ok(rows)
    }
}

/// Fixed in-process directory, for embedding and tests.
pub struct MemoryVehicleDirectory {
    tx: watch::Sender<Vec<StaticVehicle>>,
}

impl MemoryVehicleDirectory {
    pub fn new(vehicles: Vec<StaticVehicle>) -> Self {
        let (tx, _rx) = watch::channel(vehicles);
        Self { tx }
    }

    /// Replace the schedule; subscribers see the new set.
    pub fn replace(&self, vehicles: Vec<StaticVehicle>) {
        self.tx.send_replace(vehicles);
    }
}

#[async_trait]
impl VehicleDirectory for MemoryVehicleDirectory {
    async fn subscribe(&self) -> Result<VehicleFeed, PresenceError> {
        Ok(VehicleFeed::new(self.tx.subscribe()))
    }
}
