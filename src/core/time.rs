// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Timestamp helpers.
//!
//! All receive times are nanoseconds since the Unix epoch, stored as `u64`.

use std::time::Duration;

/// Nanoseconds since the Unix epoch.
pub type Time = u64;

/// Nanoseconds per second.
pub const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Convert a time to floating point seconds.
pub fn to_sec(time: Time) -> f64 {
    time as f64 / NANOS_PER_SEC as f64
}

/// Convert floating point seconds to a time, saturating at the bounds.
pub fn from_sec(sec: f64) -> Time {
    if sec <= 0.0 || sec.is_nan() {
        0
    } else {
        (sec * NANOS_PER_SEC as f64).min(u64::MAX as f64) as u64
    }
}

/// Build a time from ROS-style seconds and nanoseconds.
pub fn from_sec_nsec(sec: u32, nsec: u32) -> Time {
    sec as u64 * NANOS_PER_SEC + nsec as u64
}

/// Clamp `time` into `[start, end]`.
pub fn clamp(time: Time, start: Time, end: Time) -> Time {
    time.max(start).min(end.max(start))
}

/// Amount of receive time covered by `wall` elapsed at playback `speed`.
pub fn scaled_advance(wall: Duration, speed: f64) -> u64 {
    let nanos = wall.as_nanos() as f64 * speed;
    if nanos <= 0.0 || nanos.is_nan() {
        0
    } else {
        nanos.min(u64::MAX as f64) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sec_conversions() {
        assert_eq!(from_sec(1.5), 1_500_000_000);
        assert_eq!(from_sec(-3.0), 0);
        assert!((to_sec(2_250_000_000) - 2.25).abs() < 1e-9);
        assert_eq!(from_sec_nsec(2, 5), 2_000_000_005);
    }

    #[test]
    fn test_clamp() {
        assert_eq!(clamp(5, 10, 20), 10);
        assert_eq!(clamp(15, 10, 20), 15);
        assert_eq!(clamp(25, 10, 20), 20);
        // Degenerate range collapses to start
        assert_eq!(clamp(25, 10, 5), 10);
    }

    #[test]
    fn test_speed_scaling() {
        assert_eq!(scaled_advance(Duration::from_millis(100), 2.0), 200_000_000);
        assert_eq!(scaled_advance(Duration::from_millis(100), 0.5), 50_000_000);
        assert_eq!(scaled_advance(Duration::from_millis(1), -1.0), 0);
    }
}
