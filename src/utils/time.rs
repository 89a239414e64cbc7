//! Timestamp utilities for freshness and TTL checks.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current unix time in whole seconds.
///
/// Falls back to 0 if the system clock reads before the epoch; validation
/// then rejects everything, which is the safe failure mode for an
/// authentication daemon.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Unix seconds narrowed to the packet timestamp width.
pub fn unix_now_u32() -> u32 {
    unix_now() as u32
}
