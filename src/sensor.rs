//! Device position sensing interface.
//!
//! The publisher and acquirer never touch a concrete device API; they are
//! handed a [`PositionSensor`] implementation. Hosts bind this to whatever
//! capability the platform offers.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::{errors::PresenceError, models::PositionFix};

/// One configured attempt profile for acquiring a fix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquisitionOptions {
    /// Request the most precise fix the device can produce
    pub high_accuracy: bool,
    /// Give up after this long
    pub timeout: Duration,
    /// Accept a cached fix up to this old; zero demands a fresh reading
    pub max_cache_age: Duration,
}

#[async_trait]
pub trait PositionSensor: Send + Sync {
    /// Fail fast when this context cannot deliver fixes at all — missing
    /// hardware, or a non-secure transport origin. Checked before any
    /// acquisition is attempted.
    fn supported(&self) -> Result<(), PresenceError>;

    /// Request a single fix.
    async fn request_fix(&self, options: AcquisitionOptions)
        -> Result<PositionFix, PresenceError>;

    /// Open the continuous position-update channel.
    ///
    /// Updates arrive at the device's own event rate, throttled by
    /// `options.max_cache_age`. Dropping the returned watch cancels the
    /// subscription.
    fn watch(&self, options: AcquisitionOptions) -> Result<PositionWatch, PresenceError>;
}

/// Handle on a continuous position subscription
pub struct PositionWatch {
    rx: mpsc::Receiver<Result<PositionFix, PresenceError>>,
}

impl PositionWatch {
    pub fn new(rx: mpsc::Receiver<Result<PositionFix, PresenceError>>) -> Self {
        Self { rx }
    }

    /// Receive the next update.
    ///
    /// `Ok(None)` means the sensor closed the channel.
    pub async fn recv(&mut self) -> Result<Option<PositionFix>, PresenceError> {
        self.rx.recv().await.transpose()
    }
}
