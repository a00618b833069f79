//! Live-location presence and freshness for a bus-tracking fleet.
//!
//! Drivers publish their position through a [`publisher::PresencePublisher`]
//! into a shared [`store::PresenceStore`]; viewers subscribe to the live
//! feed, merge it with the static schedule via [`aggregator::merge_view`],
//! and badge each entry live or stale with [`recency::classify`].
//!
//! Device sensing ([`sensor::PositionSensor`]), the static schedule
//! ([`directory::VehicleDirectory`]) and time ([`clock::Clock`]) are
//! injected, so the whole pipeline runs deterministically under test.

pub mod acquire;
pub mod aggregator;
pub mod clock;
pub mod config;
pub mod directory;
pub mod errors;
pub mod models;
pub mod publisher;
pub mod recency;
pub mod sensor;
pub mod store;
