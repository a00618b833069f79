//! Viewer-side merge of live presence and the static schedule.
//!
//! The one place where ephemeral and scheduled data meet. [`merge_view`]
//! is a pure projection; [`PresenceAggregator`] runs it whenever either
//! input feed changes and republishes the merged list.

use std::sync::Arc;

use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::directory::VehicleFeed;
use crate::errors::PresenceError;
use crate::models::{PresenceRecord, StaticVehicle, VehicleStatus, VehicleView};
use crate::store::PresenceFeed;

const FALLBACK_LABEL: &str = "Bus";
const FALLBACK_ROUTE: &str = "Unknown route";

/// Merge scheduled vehicles and live presence into one renderable list.
///
/// Pure and total. Static entries pass through unchanged (`is_live =
/// false`); live records are projected with `is_live = true` and label
/// fallbacks. Records without a usable position are skipped — a row is
/// never emitted with a null coordinate. Source order is preserved;
/// callers re-sort for display if they care. Static and live ids are
/// disjoint by construction, so no deduplication happens here.
pub fn merge_view(
    static_vehicles: &[StaticVehicle],
    live: &[PresenceRecord],
) -> Vec<VehicleView> {
    let mut rows: Vec<VehicleView> = static_vehicles
        .iter()
        .map(|v| VehicleView {
            id: v.id.clone(),
            label: v.label.clone(),
            route: v.route.clone(),
            latitude: v.latitude,
            longitude: v.longitude,
            status: v.status,
            speed_mps: v.speed_mps,
            last_updated: v.last_updated,
            is_live: false,
            driver_name: None,
        })
        .collect();

    for record in live {
        let Some(position) = record.position.filter(|p| p.is_valid()) else {
            debug!(driver = %record.driver_id, "Dropping presence entry without a usable position");
            continue;
        };
        rows.push(VehicleView {
            id: record.driver_id.to_string(),
            label: record
                .vehicle_label
                .clone()
                .unwrap_or_else(|| FALLBACK_LABEL.to_string()),
            route: record
                .route_label
                .clone()
                .unwrap_or_else(|| FALLBACK_ROUTE.to_string()),
            latitude: position.latitude,
            longitude: position.longitude,
            status: VehicleStatus::Active,
            speed_mps: record.speed_mps,
            last_updated: Some(record.last_seen_at),
            is_live: true,
            driver_name: record.display_name.clone(),
        });
    }

    rows
}

pub struct PresenceAggregator;

impl PresenceAggregator {
    /// Re-merge on every change of either feed and publish the result.
    ///
    /// Dropping the returned [`ViewFeed`] unsubscribes and stops the loop.
    pub fn spawn(mut presence: PresenceFeed, mut vehicles: VehicleFeed) -> ViewFeed {
        let (tx, rx) = watch::channel(merge_view(&vehicles.snapshot(), &presence.snapshot()));
        let refresh = Arc::new(Notify::new());

        let refresh_rx = refresh.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = presence.recv() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    changed = vehicles.recv() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    // Manual refresh: recompute and re-deliver on demand.
                    _ = refresh_rx.notified() => {}
                }
                tx.send_replace(merge_view(&vehicles.snapshot(), &presence.snapshot()));
                if tx.is_closed() {
                    break;
                }
            }
        });

        ViewFeed {
            rx,
            refresh,
            _guard: AggregatorGuard(handle),
        }
    }
}

struct AggregatorGuard(JoinHandle<()>);

impl Drop for AggregatorGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Feed of the merged display model
pub struct ViewFeed {
    rx: watch::Receiver<Vec<VehicleView>>,
    refresh: Arc<Notify>,
    _guard: AggregatorGuard,
}

impl ViewFeed {
    /// Current merged list, without waiting.
    pub fn snapshot(&self) -> Vec<VehicleView> {
        self.rx.borrow().clone()
    }

    /// Wait for the next delivery, then return the merged list.
    pub async fn recv(&mut self) -> Result<Vec<VehicleView>, PresenceError> {
        self.rx
            .changed()
            .await
            .map_err(|_| PresenceError::FeedClosed)?;
        let rows = self.rx.borrow_and_update().clone();
        Ok(rows)
    }

    /// Ask for a recomputation and re-delivery of the current state.
    ///
    /// Not needed for correctness — the next change self-corrects any
    /// stale snapshot — but gives viewers a pull affordance.
    pub fn refresh(&self) {
        self.refresh.notify_one();
    }
}
