//! PostgreSQL store integration tests.
//!
//! These need a provisioned database; set `DATABASE_URL` (a `.env` file
//! works) and run with `cargo test -- --ignored`.

use std::env;
use std::time::Duration;

use bus_presence::models::{DriverId, PositionFix, PresencePatch, VehicleInfo};
use bus_presence::store::{PgPresenceStore, PresenceStore};

async fn connect() -> PgPresenceStore {
    dotenvy::dotenv().ok();
    let url = env::var("DATABASE_URL").expect("Environment variable DATABASE_URL required");
    PgPresenceStore::connect(&url)
        .await
        .expect("Failed to connect to database")
}

fn fix(latitude: f64, longitude: f64) -> PositionFix {
    PositionFix {
        latitude,
        longitude,
        accuracy_m: Some(9.0),
        heading_deg: Some(120.0),
        speed_mps: Some(7.5),
    }
}

fn start_patch() -> PresencePatch {
    PresencePatch::start_sharing(
        &VehicleInfo {
            display_name: Some("Dana".to_string()),
            vehicle_label: Some("Bus 12".to_string()),
            route_label: Some("Route 7".to_string()),
        },
        &fix(40.0, -73.0),
    )
}

fn test_driver(suffix: &str) -> DriverId {
    DriverId::try_from(format!("itest-{}-{}", suffix, std::process::id())).unwrap()
}

#[ignore]
#[tokio::test]
async fn upsert_merges_partial_patches() {
    let store = connect().await;
    let driver = test_driver("merge");
    store.delete(&driver).await.unwrap();

    store.upsert(&driver, start_patch()).await.unwrap();
    store
        .upsert(&driver, PresencePatch::position_only(&fix(41.0, -72.0)))
        .await
        .unwrap();

    let rows = store.subscribe().await.unwrap().snapshot();
    let row = rows
        .iter()
        .find(|r| r.driver_id == driver)
        .expect("record present after upsert");
    assert_eq!(row.display_name.as_deref(), Some("Dana"));
    assert_eq!(row.vehicle_label.as_deref(), Some("Bus 12"));
    assert_eq!(row.position.unwrap().latitude, 41.0);
    assert!(row.active);
    assert!(row.last_seen_at >= row.first_seen_at);

    store.delete(&driver).await.unwrap();
}

#[ignore]
#[tokio::test]
async fn subscribe_delivers_trigger_notifications() {
    let store = connect().await;
    let driver = test_driver("notify");
    store.delete(&driver).await.unwrap();

    let mut feed = store.subscribe().await.unwrap();
    store.upsert(&driver, start_patch()).await.unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let rows = feed.recv().await.unwrap();
            if rows.iter().any(|r| r.driver_id == driver) {
                break;
            }
        }
    })
    .await
    .expect("notification not delivered");

    store.delete(&driver).await.unwrap();
}

#[ignore]
#[tokio::test]
async fn delete_is_idempotent_and_sweep_runs() {
    let store = connect().await;
    let driver = test_driver("delete");

    store.upsert(&driver, start_patch()).await.unwrap();
    store.delete(&driver).await.unwrap();
    store.delete(&driver).await.unwrap();

    let rows = store.subscribe().await.unwrap().snapshot();
    assert!(!rows.iter().any(|r| r.driver_id == driver));

    // Fresh test records are younger than the default age, so the sweep
    // must leave them alone.
    let keeper = test_driver("keeper");
    store.upsert(&keeper, start_patch()).await.unwrap();
    store
        .sweep(bus_presence::store::DEFAULT_SWEEP_MAX_AGE)
        .await
        .unwrap();
    let rows = store.subscribe().await.unwrap().snapshot();
    assert!(rows.iter().any(|r| r.driver_id == keeper));

    store.delete(&keeper).await.unwrap();
}
