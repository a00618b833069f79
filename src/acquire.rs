//! Position acquisition with layered fallback.
//!
//! One sensor request is rarely enough in the field: battery-saving GPS
//! chipsets stall, permission prompts race the first attempt, and cached
//! fixes are often the only thing a device will hand out quickly. The
//! acquirer runs an ordered ladder of attempt profiles and falls back to
//! the continuous channel as a last resort, since some platforms deliver
//! fixes there when the one-shot path stalls.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::PresenceError;
use crate::models::PositionFix;
use crate::sensor::{AcquisitionOptions, PositionSensor};

/// Named attempt profile in the ladder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquisitionStrategy {
    pub name: &'static str,
    pub options: AcquisitionOptions,
}

/// Accept a cached fix up to ten minutes old, fail fast.
const CACHED: AcquisitionStrategy = AcquisitionStrategy {
    name: "cached",
    options: AcquisitionOptions {
        high_accuracy: false,
        timeout: Duration::from_secs(5),
        max_cache_age: Duration::from_secs(600),
    },
};

/// Demand a fresh reading, give the chipset time.
const PATIENT: AcquisitionStrategy = AcquisitionStrategy {
    name: "patient",
    options: AcquisitionOptions {
        high_accuracy: false,
        timeout: Duration::from_secs(15),
        max_cache_age: Duration::ZERO,
    },
};

const fn precise(timeout: Duration) -> AcquisitionStrategy {
    AcquisitionStrategy {
        name: "precise",
        options: AcquisitionOptions {
            high_accuracy: true,
            timeout,
            max_cache_age: Duration::from_secs(60),
        },
    }
}

/// Last-resort continuous-channel profile: first delivered fix wins.
const WATCH_FALLBACK: AcquisitionOptions = AcquisitionOptions {
    high_accuracy: false,
    timeout: Duration::from_secs(10),
    max_cache_age: Duration::from_secs(300),
};

/// Quick low-accuracy attempt used by [`PositionAcquirer::probe`].
const PROBE: AcquisitionStrategy = AcquisitionStrategy {
    name: "probe",
    options: AcquisitionOptions {
        high_accuracy: false,
        timeout: Duration::from_secs(5),
        max_cache_age: Duration::from_secs(60),
    },
};

/// Device class the strategy ladder is tuned for.
///
/// Mobile chipsets answer low-accuracy, cache-tolerant requests faster and
/// cheaper, so those run first there. Elsewhere a precise fix is usually
/// quick, so it leads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceProfile {
    Mobile,
    #[default]
    Desktop,
}

impl DeviceProfile {
    pub fn strategies(&self) -> [AcquisitionStrategy; 3] {
        match self {
            Self::Mobile => [CACHED, PATIENT, precise(Duration::from_secs(20))],
            Self::Desktop => [precise(Duration::from_secs(10)), CACHED, PATIENT],
        }
    }
}

/// Best-effort single-fix acquisition over an injected sensor
pub struct PositionAcquirer {
    sensor: Arc<dyn PositionSensor>,
    profile: DeviceProfile,
}

impl PositionAcquirer {
    pub fn new(sensor: Arc<dyn PositionSensor>, profile: DeviceProfile) -> Self {
        Self { sensor, profile }
    }

    /// Obtain one fix, trying each strategy in order and the continuous
    /// channel last.
    ///
    /// A strategy that fails is abandoned, never retried with the same
    /// parameters. Permission denial aborts the remaining ladder outright:
    /// no later strategy can succeed once the user has said no. The error
    /// returned is the final failure.
    pub async fn acquire(&self) -> Result<PositionFix, PresenceError> {
        self.sensor.supported()?;

        for strategy in self.profile.strategies() {
            match self.attempt(&strategy).await {
                Ok(fix) => {
                    debug!(strategy = strategy.name, "acquired fix");
                    return Ok(fix);
                }
                Err(PresenceError::PermissionDenied) => {
                    warn!(strategy = strategy.name, "permission denied, aborting ladder");
                    return Err(PresenceError::PermissionDenied);
                }
                Err(e) => {
                    debug!(strategy = strategy.name, error = %e, "strategy failed");
                }
            }
        }

        self.watch_first().await
    }

    /// Cheap acquisition used to surface the permission prompt and report
    /// the current permission state without starting a session.
    pub async fn probe(&self) -> Result<(), PresenceError> {
        self.sensor.supported()?;
        self.attempt(&PROBE).await.map(|_| ())
    }

    async fn attempt(
        &self,
        strategy: &AcquisitionStrategy,
    ) -> Result<PositionFix, PresenceError> {
        // The sensor gets the same budget it was told about; the outer
        // timeout covers implementations that ignore theirs.
        match tokio::time::timeout(
            strategy.options.timeout,
            self.sensor.request_fix(strategy.options),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(PresenceError::Timeout {
                waited: strategy.options.timeout,
            }),
        }
    }

    async fn watch_first(&self) -> Result<PositionFix, PresenceError> {
        debug!("one-shot strategies exhausted, falling back to watch channel");
        let mut watch = self.sensor.watch(WATCH_FALLBACK)?;

        // Subscription is cancelled when `watch` drops on return.
        match tokio::time::timeout(WATCH_FALLBACK.timeout, watch.recv()).await {
            Ok(Ok(Some(fix))) => Ok(fix),
            Ok(Ok(None)) => Err(PresenceError::PositionUnavailable {
                reason: "watch channel closed before delivering a fix".to_string(),
            }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(PresenceError::Timeout {
                waited: WATCH_FALLBACK.timeout,
            }),
        }
    }
}
