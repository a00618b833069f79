//! Driver-side sharing session.
//!
//! The publisher owns the whole "I am live" lifecycle for one driver:
//! acquire a first fix, write the presence record, then forward continuous
//! sensor updates as position-only merge-upserts until stopped. Stopping
//! must win every race — a late update from a cancelled subscription is
//! discarded by an epoch check so it can never resurrect a deleted record.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::acquire::{DeviceProfile, PositionAcquirer};
use crate::errors::PresenceError;
use crate::models::{DriverId, DriverIdentity, PositionFix, PresencePatch, VehicleInfo};
use crate::sensor::{AcquisitionOptions, PositionSensor};
use crate::store::PresenceStore;

/// Continuous-tracking profile: fresh-ish, accurate, sensor-paced.
const TRACKING: AcquisitionOptions = AcquisitionOptions {
    high_accuracy: true,
    timeout: Duration::from_secs(15),
    max_cache_age: Duration::from_secs(30),
};

/// Lifecycle of one sharing session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Starting,
    Sharing,
    Stopping,
}

impl SessionState {
    /// Legal transitions. `Sharing -> Idle` covers the fatal-error path
    /// (permission revoked mid-session).
    pub fn can_transition(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Idle, Starting)
                | (Starting, Sharing)
                | (Starting, Idle)
                | (Sharing, Stopping)
                | (Sharing, Idle)
                | (Stopping, Idle)
        )
    }
}

/// Snapshot of a session for host UIs
///
/// Delivered over a watch channel so the host can render sharing state,
/// the latest fix, and the most recent error without polling.
#[derive(Debug, Clone, Default)]
pub struct PublisherStatus {
    pub state: SessionState,
    pub last_fix: Option<PositionFix>,
    pub last_error: Option<Arc<PresenceError>>,
}

struct SessionShared {
    store: Arc<dyn PresenceStore>,
    /// Generation counter; bumped on every teardown. Update tasks capture
    /// their generation at spawn and discard work once it no longer
    /// matches.
    epoch: AtomicU64,
    core: Mutex<SessionCore>,
    status_tx: watch::Sender<PublisherStatus>,
}

#[derive(Default)]
struct SessionCore {
    state: SessionState,
    driver: Option<DriverId>,
}

impl SessionShared {
    fn set_state(&self, state: SessionState) {
        let mut core = self.core.lock().unwrap();
        core.state = state;
        if state == SessionState::Idle {
            core.driver = None;
        }
        drop(core);
        self.status_tx.send_modify(|s| s.state = state);
    }

    fn publish_fix(&self, fix: PositionFix) {
        self.status_tx.send_modify(|s| {
            s.last_fix = Some(fix);
            s.last_error = None;
        });
    }

    fn publish_error(&self, error: PresenceError) {
        self.status_tx
            .send_modify(|s| s.last_error = Some(Arc::new(error)));
    }

    /// Fatal-error teardown from inside an update task.
    ///
    /// Only the session that observed the failure may stop itself; a
    /// replacement session that already bumped the epoch is left alone.
    async fn force_stop(&self, driver: &DriverId, session_epoch: u64) {
        if self
            .epoch
            .compare_exchange(
                session_epoch,
                session_epoch + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            return;
        }
        if let Err(e) = self.store.delete(driver).await {
            warn!("Failed to delete presence record on fatal stop: {}", e);
        }
        self.set_state(SessionState::Idle);
    }
}

/// Manages one driver's live-sharing session end-to-end
pub struct PresencePublisher {
    sensor: Arc<dyn PositionSensor>,
    acquirer: PositionAcquirer,
    shared: Arc<SessionShared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PresencePublisher {
    pub fn new(
        sensor: Arc<dyn PositionSensor>,
        store: Arc<dyn PresenceStore>,
        profile: DeviceProfile,
    ) -> Self {
        let (status_tx, _rx) = watch::channel(PublisherStatus::default());
        Self {
            acquirer: PositionAcquirer::new(sensor.clone(), profile),
            sensor,
            shared: Arc::new(SessionShared {
                store,
                epoch: AtomicU64::new(0),
                core: Mutex::new(SessionCore::default()),
                status_tx,
            }),
            task: Mutex::new(None),
        }
    }

    /// Subscribe to session status updates.
    pub fn status(&self) -> watch::Receiver<PublisherStatus> {
        self.shared.status_tx.subscribe()
    }

    pub fn state(&self) -> SessionState {
        self.shared.core.lock().unwrap().state
    }

    /// Cheap acquisition to surface the permission prompt up front.
    pub async fn request_permission(&self) -> Result<(), PresenceError> {
        self.acquirer.probe().await
    }

    /// Start sharing for a verified driver.
    ///
    /// Refuses unverified identities before touching the store. An already
    /// running session is torn down first so two subscriptions never race
    /// on the same key.
    pub async fn start(
        &self,
        identity: &DriverIdentity,
        vehicle: &VehicleInfo,
    ) -> Result<(), PresenceError> {
        if !identity.is_verified_driver {
            return Err(PresenceError::Unauthorized {
                driver: identity.driver_id.to_string(),
            });
        }

        self.stop().await?;

        {
            let mut core = self.shared.core.lock().unwrap();
            core.state = SessionState::Starting;
            core.driver = Some(identity.driver_id.clone());
        }
        self.shared
            .status_tx
            .send_modify(|s| s.state = SessionState::Starting);

        let fix = match self.acquirer.acquire().await {
            Ok(fix) => fix,
            Err(e) => {
                self.shared.set_state(SessionState::Idle);
                return Err(e);
            }
        };

        let driver = identity.driver_id.clone();
        if let Err(e) = self
            .shared
            .store
            .upsert(&driver, PresencePatch::start_sharing(vehicle, &fix))
            .await
        {
            self.shared.set_state(SessionState::Idle);
            return Err(e);
        }

        let position_watch = match self.sensor.watch(TRACKING) {
            Ok(w) => w,
            Err(e) => {
                // Do not leave a record behind for a session that never
                // got its continuous channel.
                if let Err(del) = self.shared.store.delete(&driver).await {
                    warn!("Failed to clean up presence record: {}", del);
                }
                self.shared.set_state(SessionState::Idle);
                return Err(e);
            }
        };

        let session_epoch = self.shared.epoch.load(Ordering::SeqCst);
        let shared = self.shared.clone();
        let handle = tokio::spawn(run_session(shared, driver, position_watch, session_epoch));
        *self.task.lock().unwrap() = Some(handle);

        self.shared.set_state(SessionState::Sharing);
        self.shared.publish_fix(fix);
        info!(driver = %identity.driver_id, "Location sharing started");
        Ok(())
    }

    /// Stop sharing and remove the presence record.
    ///
    /// Idempotent: stopping an idle publisher is a no-op. The continuous
    /// subscription is invalidated before the delete so no in-flight
    /// update can write after it.
    pub async fn stop(&self) -> Result<(), PresenceError> {
        let driver = {
            let mut core = self.shared.core.lock().unwrap();
            if core.state == SessionState::Idle {
                return Ok(());
            }
            core.state = SessionState::Stopping;
            core.driver.clone()
        };
        self.shared
            .status_tx
            .send_modify(|s| s.state = SessionState::Stopping);

        self.shared.epoch.fetch_add(1, Ordering::SeqCst);
        if let Some(task) = self.task.lock().unwrap().take() {
            task.abort();
        }

        let result = match &driver {
            Some(driver) => self.shared.store.delete(driver).await,
            None => Ok(()),
        };
        self.shared.set_state(SessionState::Idle);
        if result.is_ok() {
            if let Some(driver) = driver {
                info!(driver = %driver, "Location sharing stopped");
            }
        }
        result
    }
}

/// Forward continuous sensor updates into the store.
async fn run_session(
    shared: Arc<SessionShared>,
    driver: DriverId,
    mut position_watch: crate::sensor::PositionWatch,
    session_epoch: u64,
) {
    loop {
        let update = position_watch.recv().await;

        // Cancelled sessions discard whatever was still in flight.
        if shared.epoch.load(Ordering::SeqCst) != session_epoch {
            break;
        }

        match update {
            Ok(Some(fix)) => {
                match shared
                    .store
                    .upsert(&driver, PresencePatch::position_only(&fix))
                    .await
                {
                    Ok(()) => shared.publish_fix(fix),
                    Err(e) => {
                        // One failed write does not end the session; the
                        // next sensor update retries at the channel's own
                        // pace.
                        warn!(driver = %driver, "Presence update failed: {}", e);
                        shared.publish_error(e);
                    }
                }
            }
            Ok(None) => {
                warn!(driver = %driver, "Position channel closed");
                break;
            }
            Err(PresenceError::PermissionDenied) => {
                error!(driver = %driver, "Location permission revoked, stopping session");
                shared.publish_error(PresenceError::PermissionDenied);
                shared.force_stop(&driver, session_epoch).await;
                break;
            }
            Err(e) => {
                warn!(driver = %driver, "Position channel error: {}", e);
                shared.publish_error(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::AtomicBool;

    use async_trait::async_trait;
    use tokio::sync::mpsc;

    use crate::models::GeoPoint;
    use crate::sensor::PositionWatch;
    use crate::store::{MemoryPresenceStore, PresenceFeed};

    fn fix(latitude: f64, longitude: f64) -> PositionFix {
        PositionFix {
            latitude,
            longitude,
            accuracy_m: Some(10.0),
            heading_deg: None,
            speed_mps: Some(9.0),
        }
    }

    fn verified(id: &str) -> DriverIdentity {
        DriverIdentity {
            driver_id: DriverId::try_from(id).unwrap(),
            is_verified_driver: true,
        }
    }

    fn vehicle() -> VehicleInfo {
        VehicleInfo {
            display_name: Some("Dana".to_string()),
            vehicle_label: Some("Bus 12".to_string()),
            route_label: Some("Route 7".to_string()),
        }
    }

    /// Sensor whose continuous channel is driven by the test.
    struct StreamSensor {
        first_fix: PositionFix,
        updates_tx: Mutex<Option<mpsc::Sender<Result<PositionFix, PresenceError>>>>,
    }

    impl StreamSensor {
        fn new(first_fix: PositionFix) -> Self {
            Self {
                first_fix,
                updates_tx: Mutex::new(None),
            }
        }

        async fn push(&self, update: Result<PositionFix, PresenceError>) {
            let tx = self.updates_tx.lock().unwrap().clone().expect("no watch open");
            tx.send(update).await.unwrap();
        }
    }

    #[async_trait]
    impl PositionSensor for StreamSensor {
        fn supported(&self) -> Result<(), PresenceError> {
            Ok(())
        }

        async fn request_fix(
            &self,
            _options: AcquisitionOptions,
        ) -> Result<PositionFix, PresenceError> {
            Ok(self.first_fix.clone())
        }

        fn watch(&self, _options: AcquisitionOptions) -> Result<PositionWatch, PresenceError> {
            let (tx, rx) = mpsc::channel(16);
            *self.updates_tx.lock().unwrap() = Some(tx);
            Ok(PositionWatch::new(rx))
        }
    }

    /// Store decorator that fails upserts on demand.
    struct FlakyStore {
        inner: MemoryPresenceStore,
        fail_upserts: AtomicBool,
    }

    #[async_trait]
    impl PresenceStore for FlakyStore {
        async fn upsert(
            &self,
            driver: &DriverId,
            patch: PresencePatch,
        ) -> Result<(), PresenceError> {
            if self.fail_upserts.load(Ordering::SeqCst) {
                return Err(PresenceError::FeedClosed);
            }
            self.inner.upsert(driver, patch).await
        }

        async fn delete(&self, driver: &DriverId) -> Result<(), PresenceError> {
            self.inner.delete(driver).await
        }

        async fn subscribe(&self) -> Result<PresenceFeed, PresenceError> {
            self.inner.subscribe().await
        }

        async fn sweep(&self, max_age: Duration) -> Result<u64, PresenceError> {
            self.inner.sweep(max_age).await
        }
    }

    fn publisher(
        sensor: Arc<StreamSensor>,
        store: Arc<dyn PresenceStore>,
    ) -> PresencePublisher {
        PresencePublisher::new(sensor, store, DeviceProfile::Mobile)
    }

    #[tokio::test]
    async fn unverified_driver_is_refused_without_store_write() {
        let store = Arc::new(MemoryPresenceStore::new());
        let publisher = publisher(
            Arc::new(StreamSensor::new(fix(40.0, -73.0))),
            store.clone(),
        );

        let identity = DriverIdentity {
            driver_id: DriverId::try_from("d1").unwrap(),
            is_verified_driver: false,
        };
        let err = publisher.start(&identity, &vehicle()).await.unwrap_err();

        assert!(matches!(err, PresenceError::Unauthorized { .. }));
        assert_eq!(publisher.state(), SessionState::Idle);
        assert!(store.subscribe().await.unwrap().snapshot().is_empty());
    }

    #[tokio::test]
    async fn start_writes_record_and_enters_sharing() {
        let store = Arc::new(MemoryPresenceStore::new());
        let publisher = publisher(
            Arc::new(StreamSensor::new(fix(40.0, -73.0))),
            store.clone(),
        );

        publisher.start(&verified("d1"), &vehicle()).await.unwrap();

        assert_eq!(publisher.state(), SessionState::Sharing);
        let rows = store.subscribe().await.unwrap().snapshot();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].active);
        assert_eq!(
            rows[0].position,
            Some(GeoPoint {
                latitude: 40.0,
                longitude: -73.0
            })
        );
        assert_eq!(rows[0].display_name.as_deref(), Some("Dana"));
    }

    #[tokio::test]
    async fn continuous_updates_merge_position_only() {
        let store = Arc::new(MemoryPresenceStore::new());
        let sensor = Arc::new(StreamSensor::new(fix(40.0, -73.0)));
        let publisher = publisher(sensor.clone(), store.clone());

        publisher.start(&verified("d1"), &vehicle()).await.unwrap();
        let mut feed = store.subscribe().await.unwrap();

        sensor.push(Ok(fix(40.5, -73.5))).await;
        let rows = feed.recv().await.unwrap();

        assert_eq!(
            rows[0].position,
            Some(GeoPoint {
                latitude: 40.5,
                longitude: -73.5
            })
        );
        assert_eq!(rows[0].vehicle_label.as_deref(), Some("Bus 12"));
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let store = Arc::new(MemoryPresenceStore::new());
        let publisher = publisher(
            Arc::new(StreamSensor::new(fix(40.0, -73.0))),
            store.clone(),
        );

        publisher.start(&verified("d1"), &vehicle()).await.unwrap();
        publisher.stop().await.unwrap();
        publisher.stop().await.unwrap();

        assert_eq!(publisher.state(), SessionState::Idle);
        assert!(store.subscribe().await.unwrap().snapshot().is_empty());
    }

    #[tokio::test]
    async fn late_update_never_resurrects_a_stopped_session() {
        let store = Arc::new(MemoryPresenceStore::new());
        let sensor = Arc::new(StreamSensor::new(fix(40.0, -73.0)));
        let publisher = publisher(sensor.clone(), store.clone());

        publisher.start(&verified("d1"), &vehicle()).await.unwrap();
        publisher.stop().await.unwrap();

        // The sensor channel outlives the session; this update must be
        // discarded, not upserted.
        sensor.push(Ok(fix(41.0, -70.0))).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(store.subscribe().await.unwrap().snapshot().is_empty());
    }

    #[tokio::test]
    async fn permission_revoked_mid_session_stops_and_deletes() {
        let store = Arc::new(MemoryPresenceStore::new());
        let sensor = Arc::new(StreamSensor::new(fix(40.0, -73.0)));
        let publisher = publisher(sensor.clone(), store.clone());

        publisher.start(&verified("d1"), &vehicle()).await.unwrap();
        let mut feed = store.subscribe().await.unwrap();

        sensor.push(Err(PresenceError::PermissionDenied)).await;
        let rows = feed.recv().await.unwrap();

        assert!(rows.is_empty());
        assert_eq!(publisher.state(), SessionState::Idle);

        let status = publisher.status().borrow().clone();
        assert!(matches!(
            status.last_error.as_deref(),
            Some(PresenceError::PermissionDenied)
        ));
    }

    #[tokio::test]
    async fn store_failure_mid_session_keeps_sharing() {
        let store = Arc::new(FlakyStore {
            inner: MemoryPresenceStore::new(),
            fail_upserts: AtomicBool::new(false),
        });
        let sensor = Arc::new(StreamSensor::new(fix(40.0, -73.0)));
        let publisher = publisher(sensor.clone(), store.clone());

        publisher.start(&verified("d1"), &vehicle()).await.unwrap();

        store.fail_upserts.store(true, Ordering::SeqCst);
        sensor.push(Ok(fix(40.5, -73.5))).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(publisher.state(), SessionState::Sharing);
        assert!(publisher.status().borrow().last_error.is_some());

        // Next update goes through once the store recovers.
        store.fail_upserts.store(false, Ordering::SeqCst);
        let mut feed = store.inner.subscribe().await.unwrap();
        sensor.push(Ok(fix(40.6, -73.6))).await;
        let rows = feed.recv().await.unwrap();
        assert_eq!(
            rows[0].position,
            Some(GeoPoint {
                latitude: 40.6,
                longitude: -73.6
            })
        );
    }

    #[test]
    fn session_state_transitions() {
        use SessionState::*;
        assert!(Idle.can_transition(Starting));
        assert!(Starting.can_transition(Sharing));
        assert!(Starting.can_transition(Idle));
        assert!(Sharing.can_transition(Stopping));
        assert!(Sharing.can_transition(Idle));
        assert!(Stopping.can_transition(Idle));

        assert!(!Idle.can_transition(Sharing));
        assert!(!Stopping.can_transition(Sharing));
        assert!(!Idle.can_transition(Idle));
    }
}
