//! Freshness classification for presence timestamps.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Maximum age of a `last_seen_at` still rendered as live: 5 minutes.
///
/// Display policy only. Storage reclamation uses its own, much longer
/// threshold (see the store's sweep configuration).
pub const DEFAULT_RECENCY_THRESHOLD: Duration = Duration::from_millis(300_000);

/// Freshness of a presence entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Live,
    Stale,
}

impl std::fmt::Display for Freshness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Live => write!(f, "LIVE"),
            Self::Stale => write!(f, "OFFLINE"),
        }
    }
}

/// Classify a last-seen timestamp as live or stale.
///
/// Live iff `now - last_seen < threshold`. A missing timestamp is stale;
/// a timestamp in the future (clock skew between writer and reader) is
/// live. Total over all inputs, never panics.
pub fn classify(
    last_seen: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    threshold: Duration,
) -> Freshness {
    let Some(last_seen) = last_seen else {
        return Freshness::Stale;
    };
    let threshold = chrono::Duration::from_std(threshold).unwrap_or(chrono::Duration::MAX);
    if now.signed_duration_since(last_seen) < threshold {
        Freshness::Live
    } else {
        Freshness::Stale
    }
}

/// Human-readable age of a timestamp, for tooltips and self-display.
pub fn describe_age(last_seen: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    let Some(last_seen) = last_seen else {
        return "unknown".to_string();
    };

    let minutes = now.signed_duration_since(last_seen).num_minutes();
    if minutes < 1 {
        return "just now".to_string();
    }
    if minutes < 60 {
        return format!("{}m ago", minutes);
    }
    let hours = minutes / 60;
    if hours < 24 {
        return format!("{}h ago", hours);
    }
    last_seen.format("%Y-%m-%d").to_string()
}
