//! # Utility Functions and Helper Module
//!
//! Small helpers shared across the IPC layer: high-precision timestamps for
//! message stamping and reply-socket path generation.
//!
//! ## Design Principles
//!
//! - **Safe fallbacks**: Clock anomalies degrade to zero rather than panic
//! - **Cross-component**: Used by message construction, transport path
//!   generation, and the timeout manager's statistics

use std::time::{SystemTime, UNIX_EPOCH};

/// Get the current time as fractional seconds since the Unix epoch
///
/// This is the timestamp format carried on every `Request` and `Response`.
/// Sub-second precision comes from the underlying system clock; on systems
/// where the clock reads before the epoch (very rare) this returns 0.0
/// rather than panicking.
pub fn current_timestamp_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// Get current timestamp as nanoseconds since Unix epoch
///
/// Used for reply-socket path uniqueness, where nanosecond resolution plus
/// a random suffix guarantees distinct paths under high request rates.
///
/// ## Error Handling
///
/// If the system time is before the Unix epoch (very rare), returns 0
/// to provide a safe fallback rather than panicking.
pub fn current_timestamp_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Test that the seconds clock is sane and monotone enough for stamping
    #[test]
    fn test_timestamp_secs_is_recent() {
        let ts = current_timestamp_secs();
        // After 2020-01-01 and before 2100-01-01.
        assert!(ts > 1_577_836_800.0);
        assert!(ts < 4_102_444_800.0);
    }

    /// Test that successive nanosecond reads do not go backwards
    #[test]
    fn test_timestamp_ns_ordering() {
        let a = current_timestamp_ns();
        let b = current_timestamp_ns();
        assert!(b >= a);
    }
}
