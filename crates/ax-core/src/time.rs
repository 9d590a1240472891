//! Time helpers

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Current Unix time in milliseconds, as carried in heartbeat frames.
///
/// A clock before the epoch reads as 0 rather than failing the session.
pub fn current_time_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Milliseconds elapsed since a heartbeat timestamp; 0 for future timestamps
pub fn elapsed_millis(since: u64) -> u64 {
    current_time_millis().saturating_sub(since)
}

/// [`elapsed_millis`] as a `Duration`
pub fn elapsed_duration(since_millis: u64) -> Duration {
    Duration::from_millis(elapsed_millis(since_millis))
}
