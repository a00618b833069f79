//! Presence monitor utility
//!
//! Subscribes to the shared presence store, logs each driver's freshness
//! as the feed changes, and runs the periodic reclamation sweep.

use bus_presence::config::AppConfig;
use bus_presence::errors::PresenceError;
use bus_presence::recency::{classify, describe_age};
use bus_presence::store::{PgPresenceStore, PresenceFeed, PresenceStore};
use chrono::Utc;
use tokio::signal;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), PresenceError> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load configuration, preferring environment variables and config files
    let config = AppConfig::load()?;
    config.validate()?;

    let store = PgPresenceStore::connect(&config.store.url).await?;
    let feed = store.subscribe().await?;

    // Setup signal handling for graceful shutdown
    let shutdown_signal = signal::ctrl_c();

    tokio::select! {
        result = run_monitor(&store, feed, &config) => {
            info!("Presence monitor completed: {:?}", result);
        }
        _ = shutdown_signal => {
            info!("Received shutdown signal");
        }
    }

    Ok(())
}

async fn run_monitor(
    store: &PgPresenceStore,
    mut feed: PresenceFeed,
    config: &AppConfig,
) -> Result<(), PresenceError> {
    let mut sweep_timer = tokio::time::interval(config.store.sweep_interval);

    loop {
        tokio::select! {
            rows = feed.recv() => {
                let rows = rows?;
                let now = Utc::now();
                info!("Active drivers: {}", rows.len());
                for row in &rows {
                    let freshness = classify(
                        Some(row.last_seen_at),
                        now,
                        config.presence.recency_threshold,
                    );
                    info!(
                        driver = %row.driver_id,
                        "{} [{}] seen {}",
                        row.vehicle_label.as_deref().unwrap_or("Bus"),
                        freshness,
                        describe_age(Some(row.last_seen_at), now),
                    );
                }
            }
            _ = sweep_timer.tick() => {
                if let Err(e) = store.sweep(config.store.sweep_max_age).await {
                    error!("Sweep failed: {}", e);
                }
            }
        }
    }
}
