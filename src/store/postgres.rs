//! PostgreSQL-backed presence store.
//!
//! One `presence` table keyed by `driver_id`. Merge semantics are pushed
//! into the upsert statement (`ON CONFLICT ... COALESCE`), timestamps are
//! assigned by the database, and change notification rides LISTEN/NOTIFY:
//! a row trigger fires `presence_changed` and subscribers re-query the
//! active set on every notification.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgListener, PgPoolOptions};
use sqlx::PgPool;
use tokio::sync::watch;
use tracing::{error, info, warn};

use super::{PresenceFeed, PresenceStore};
use crate::errors::PresenceError;
use crate::models::{DriverId, GeoPoint, PresencePatch, PresenceRecord};

const CHANGE_CHANNEL: &str = "presence_changed";

pub struct PgPresenceStore {
    pool: PgPool,
}

impl PgPresenceStore {
    /// Connect and run pending migrations.
    pub async fn connect(url: &str) -> Result<Self, PresenceError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await?;
        Self::new(pool).await
    }

    pub async fn new(pool: PgPool) -> Result<Self, PresenceError> {
        info!("Initializing presence store");
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| PresenceError::MigrationError(e.to_string()))?;
        Ok(Self { pool })
    }

    async fn active_rows(pool: &PgPool) -> Result<Vec<PresenceRecord>, sqlx::Error> {
        let rows: Vec<PresenceRow> = sqlx::query_as(
            "SELECT driver_id, display_name, vehicle_label, route_label,
                    latitude, longitude, accuracy_m, heading_deg, speed_mps,
                    active, first_seen_at, last_seen_at
             FROM presence
             WHERE active
             ORDER BY driver_id",
        )
        .fetch_all(pool)
        .await?;

        Ok(rows.into_iter().filter_map(PresenceRow::into_record).collect())
    }
}

#[async_trait]
impl PresenceStore for PgPresenceStore {
    async fn upsert(
        &self,
        driver: &DriverId,
        patch: PresencePatch,
    ) -> Result<(), PresenceError> {
        sqlx::query(
            "INSERT INTO presence (
                driver_id, display_name, vehicle_label, route_label,
                latitude, longitude, accuracy_m, heading_deg, speed_mps, active
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, COALESCE($10, FALSE))
            ON CONFLICT (driver_id) DO UPDATE SET
                display_name = COALESCE($2, presence.display_name),
                vehicle_label = COALESCE($3, presence.vehicle_label),
                route_label = COALESCE($4, presence.route_label),
                latitude = COALESCE($5, presence.latitude),
                longitude = COALESCE($6, presence.longitude),
                accuracy_m = COALESCE($7, presence.accuracy_m),
                heading_deg = COALESCE($8, presence.heading_deg),
                speed_mps = COALESCE($9, presence.speed_mps),
                active = COALESCE($10, presence.active),
                last_seen_at = NOW()",
        )
        .bind(driver.as_str())
        .bind(patch.display_name.as_deref())
        .bind(patch.vehicle_label.as_deref())
        .bind(patch.route_label.as_deref())
        .bind(patch.position.map(|p| p.latitude))
        .bind(patch.position.map(|p| p.longitude))
        .bind(patch.accuracy_m)
        .bind(patch.heading_deg)
        .bind(patch.speed_mps)
        .bind(patch.active)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, driver: &DriverId) -> Result<(), PresenceError> {
        sqlx::query("DELETE FROM presence WHERE driver_id = $1")
            .bind(driver.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn subscribe(&self) -> Result<PresenceFeed, PresenceError> {
        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener.listen(CHANGE_CHANNEL).await?;

        // Snapshot after LISTEN so nothing written in between is missed.
        let initial = Self::active_rows(&self.pool).await?;
        let (tx, rx) = watch::channel(initial);

        let pool = self.pool.clone();
        let handle = tokio::spawn(async move {
            loop {
                match listener.recv().await {
                    Ok(_) => match Self::active_rows(&pool).await {
                        Ok(rows) => {
                            tx.send_replace(rows);
                        }
                        Err(e) => warn!("Failed to refresh presence snapshot: {}", e),
                    },
                    Err(e) => {
                        error!("Presence listener lost: {}", e);
                        break;
                    }
                }
                if tx.is_closed() {
                    break;
                }
            }
        });

        Ok(PresenceFeed::new(rx, Some(handle)))
    }

    async fn sweep(&self, max_age: Duration) -> Result<u64, PresenceError> {
        let Some(cutoff) = chrono::Duration::from_std(max_age)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
        else {
            return Ok(0);
        };

        let result = sqlx::query("DELETE FROM presence WHERE last_seen_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        let removed = result.rows_affected();
        if removed > 0 {
            info!(removed, "Swept abandoned presence records");
        }
        Ok(removed)
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PresenceRow {
    driver_id: String,
    display_name: Option<String>,
    vehicle_label: Option<String>,
    route_label: Option<String>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    accuracy_m: Option<f64>,
    heading_deg: Option<f64>,
    speed_mps: Option<f64>,
    active: bool,
    first_seen_at: DateTime<Utc>,
    last_seen_at: DateTime<Utc>,
}

impl PresenceRow {
    fn into_record(self) -> Option<PresenceRecord> {
        let driver_id = match DriverId::try_from(self.driver_id) {
            Ok(id) => id,
            Err(e) => {
                warn!("Skipping presence row with invalid key: {}", e);
                return None;
            }
        };

        let position = match (self.latitude, self.longitude) {
            (Some(latitude), Some(longitude)) => Some(GeoPoint {
                latitude,
                longitude,
            }),
            _ => None,
        };

        Some(PresenceRecord {
            driver_id,
            display_name: self.display_name,
            vehicle_label: self.vehicle_label,
            route_label: self.route_label,
            position,
            accuracy_m: self.accuracy_m,
            heading_deg: self.heading_deg,
            speed_mps: self.speed_mps,
            active: self.active,
            first_seen_at: self.first_seen_at,
            last_seen_at: self.last_seen_at,
        })
    }
}
