//! Timestamp helpers shared by the header codec and the transports.

use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch, as carried in the packet header.
///
/// A clock set before 1970 yields 0 rather than an error; the send time is
/// informational and must never block a send.
pub fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

/// Age in milliseconds of a header timestamp relative to now (negative if it
/// lies in the future).
pub fn age_millis(send_time: i64) -> i64 {
    unix_millis().saturating_sub(send_time)
}
