//! Errors for the presence subsystem
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PresenceError {
    #[error("location permission denied")]
    PermissionDenied,

    #[error("position unavailable: {reason}")]
    PositionUnavailable { reason: String },

    #[error("location request timed out after {waited:?}")]
    Timeout { waited: Duration },

    #[error("location not supported: {reason}")]
    Unsupported { reason: String },

    #[error("driver `{driver}` is not authorized to share location")]
    Unauthorized { driver: String },

    #[error("presence store unavailable")]
    StoreUnavailable(#[from] sqlx::Error),

    #[error("store migration error: {0}")]
    MigrationError(String),

    #[error("presence feed closed")]
    FeedClosed,

    #[error("invalid driver id: {0}")]
    InvalidDriverId(String),

    #[error("invalid coordinates: lat={lat}, lon={lon}")]
    InvalidCoordinates { lat: f64, lon: f64 },

    #[error("configuration error")]
    ConfigError(#[from] config::ConfigError),

    #[error("configuration error: {message}")]
    ConfigurationError { message: String },
}

impl PresenceError {
    /// Human-actionable hint matching the error kind.
    ///
    /// Presentation is up to the caller; the text is safe to show verbatim.
    pub fn remediation(&self) -> &'static str {
        match self {
            Self::PermissionDenied => {
                "Allow location access for this application, then try again"
            }
            Self::PositionUnavailable { .. } => {
                "Check that Location Services are enabled and disable any VPN or proxy"
            }
            Self::Timeout { .. } => {
                "The device took too long to produce a fix; move to open sky and retry"
            }
            Self::Unsupported { .. } => {
                "Location requires a secure (HTTPS or loopback) origin on a capable device"
            }
            Self::Unauthorized { .. } => {
                "Only approved, verified drivers may share a live location"
            }
            Self::StoreUnavailable(_) | Self::FeedClosed => {
                "Check connectivity to the presence store; the next update retries on its own"
            }
            _ => "Check the configuration and input values",
        }
    }

    /// Whether retrying can ever succeed without outside intervention.
    ///
    /// Permanent failures should stop prompting; transient ones may retry.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            Self::PermissionDenied | Self::Unsupported { .. } | Self::Unauthorized { .. }
        )
    }
}
