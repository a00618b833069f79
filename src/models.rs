//! Data models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::PresenceError;
use serde_helpers::*;

/// Driver identifier
///
/// Opaque unique key for a driver's presence record. Non-empty, at most
/// 64 bytes, no whitespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub struct DriverId(String);

impl TryFrom<String> for DriverId {
    type Error = PresenceError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.is_empty() || value.len() > 64 {
            return Err(PresenceError::InvalidDriverId(value));
        }
        if value.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(PresenceError::InvalidDriverId(value));
        }
        Ok(Self(value))
    }
}

impl TryFrom<&str> for DriverId {
    type Error = PresenceError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::try_from(value.to_string())
    }
}

impl DriverId {
    /// Get the raw identifier
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DriverId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Geographic point in WGS84 decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, PresenceError> {
        let point = Self {
            latitude,
            longitude,
        };
        if point.is_valid() {
            Ok(point)
        } else {
            Err(PresenceError::InvalidCoordinates {
                lat: latitude,
                lon: longitude,
            })
        }
    }

    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// One successfully obtained position reading from the device
///
/// Optional fields come back as `None` whenever the device reports its
/// "not available" sentinel: a heading outside [0, 360), a negative speed,
/// or a non-positive accuracy radius.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionFix {
    /// Latitude in decimal degrees
    pub latitude: f64,
    /// Longitude in decimal degrees
    pub longitude: f64,
    /// Estimated accuracy radius in meters, None if not reported
    #[serde(default, deserialize_with = "deserialize_accuracy")]
    pub accuracy_m: Option<f64>,
    /// Heading in degrees [0, 360), None if the device has no bearing
    #[serde(default, deserialize_with = "deserialize_heading")]
    pub heading_deg: Option<f64>,
    /// Ground speed in meters per second, None if not reported
    #[serde(default, deserialize_with = "deserialize_speed")]
    pub speed_mps: Option<f64>,
}

impl PositionFix {
    pub fn point(&self) -> GeoPoint {
        GeoPoint {
            latitude: self.latitude,
            longitude: self.longitude,
        }
    }
}

/// Descriptive vehicle info a driver supplies when sharing starts
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VehicleInfo {
    pub display_name: Option<String>,
    pub vehicle_label: Option<String>,
    pub route_label: Option<String>,
}

/// Identity claim from the authorization collaborator
#[derive(Debug, Clone, PartialEq)]
pub struct DriverIdentity {
    pub driver_id: DriverId,
    pub is_verified_driver: bool,
}

/// Live presence entry for one actively-sharing driver
///
/// Keyed by `driver_id` in the presence store. `first_seen_at` is assigned
/// once when the record is created; `last_seen_at` on every write. Both are
/// store-assigned, never client-supplied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceRecord {
    pub driver_id: DriverId,
    pub display_name: Option<String>,
    pub vehicle_label: Option<String>,
    pub route_label: Option<String>,
    pub position: Option<GeoPoint>,
    pub accuracy_m: Option<f64>,
    pub heading_deg: Option<f64>,
    pub speed_mps: Option<f64>,
    pub active: bool,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

/// Partial presence record for merge-upserts
///
/// `None` fields are preserved from the existing record; `Some` fields
/// overwrite. Timestamps are not part of the patch — the store assigns them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PresencePatch {
    pub display_name: Option<String>,
    pub vehicle_label: Option<String>,
    pub route_label: Option<String>,
    pub position: Option<GeoPoint>,
    pub accuracy_m: Option<f64>,
    pub heading_deg: Option<f64>,
    pub speed_mps: Option<f64>,
    pub active: Option<bool>,
}

impl PresencePatch {
    /// Full patch written when a sharing session starts.
    pub fn start_sharing(info: &VehicleInfo, fix: &PositionFix) -> Self {
        Self {
            display_name: info.display_name.clone(),
            vehicle_label: info.vehicle_label.clone(),
            route_label: info.route_label.clone(),
            position: Some(fix.point()),
            accuracy_m: fix.accuracy_m,
            heading_deg: fix.heading_deg,
            speed_mps: fix.speed_mps,
            active: Some(true),
        }
    }

    /// Patch for a continuous position update.
    ///
    /// Touches only the position-related fields; descriptive fields keep
    /// whatever the start patch wrote.
    pub fn position_only(fix: &PositionFix) -> Self {
        Self {
            position: Some(fix.point()),
            accuracy_m: fix.accuracy_m,
            heading_deg: fix.heading_deg,
            speed_mps: fix.speed_mps,
            ..Self::default()
        }
    }
}

/// Operational status of a scheduled vehicle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VehicleStatus {
    #[default]
    Active,
    Inactive,
    Maintenance,
}

impl std::fmt::Display for VehicleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Inactive => write!(f, "inactive"),
            Self::Maintenance => write!(f, "maintenance"),
        }
    }
}

/// Scheduled vehicle entry from the static data collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticVehicle {
    pub id: String,
    pub label: String,
    pub route: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub status: VehicleStatus,
    #[serde(default, deserialize_with = "deserialize_speed")]
    pub speed_mps: Option<f64>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

/// One row of the merged display model
///
/// Static schedule entries and live presence records normalized to one
/// shape. `is_live` tags provenance; consumers badge live rows differently.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VehicleView {
    pub id: String,
    pub label: String,
    pub route: String,
    pub latitude: f64,
    pub longitude: f64,
    pub status: VehicleStatus,
    pub speed_mps: Option<f64>,
    pub last_updated: Option<DateTime<Utc>>,
    pub is_live: bool,
    pub driver_name: Option<String>,
}

impl VehicleView {
    /// Recency of this row at `now`, under the given threshold.
    pub fn freshness(
        &self,
        now: DateTime<Utc>,
        threshold: std::time::Duration,
    ) -> crate::recency::Freshness {
        crate::recency::classify(self.last_updated, now, threshold)
    }
}

/// Custom deserializers
mod serde_helpers {
    use serde::{self, Deserialize, Deserializer};

    pub fn deserialize_heading<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<f64>::deserialize(deserializer)?;
        Ok(value.filter(|v| v.is_finite() && (0.0..360.0).contains(v)))
    }

    pub fn deserialize_speed<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<f64>::deserialize(deserializer)?;
        Ok(value.filter(|v| v.is_finite() && *v >= 0.0))
    }

    pub fn deserialize_accuracy<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<f64>::deserialize(deserializer)?;
        Ok(value.filter(|v| v.is_finite() && *v > 0.0))
    }
}
