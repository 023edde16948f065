//! # Timestamp authority
//!
//! One clock for every producer. The first sample from the primary source
//! fixes the offset between that source's clock and the system clock, and
//! every later sample is shifted by the same offset. The offset is never
//! re-estimated.
//!
//! With no primary source, or before its first sample, the authority reads
//! the system clock.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::sync::atomic::{AtomicU64, Ordering};

use conquer_once::OnceCell;
use log::{info, warn};
use serde_json::{json, Value};
use util::time;

use crate::clients::{StatusReporting, TimestampProvider};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

pub struct TimestampAuthority {
    /// Name of the primary source, set at most once
    primary: OnceCell<String>,

    /// System clock minus primary clock, in nanoseconds
    offset_ns: OnceCell<i64>,

    /// Latest corrected primary timestamp
    last_ns: AtomicU64,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl TimestampAuthority {
    /// An authority with no primary source.
    pub fn new() -> Self {
        Self {
            primary: OnceCell::uninit(),
            offset_ns: OnceCell::uninit(),
            last_ns: AtomicU64::new(0),
        }
    }

    /// Designate the primary source. Only the first designation counts.
    pub fn designate_primary(&self, name: &str) -> bool {
        match self.primary.try_init_once(|| name.to_string()) {
            Ok(_) => {
                info!("Timestamp primary source is \"{}\"", name);
                true
            }
            Err(_) => false,
        }
    }

    pub fn primary(&self) -> Option<&str> {
        self.primary.get().map(|s| s.as_str())
    }

    /// Offset applied to primary timestamps, once known.
    pub fn offset_ns(&self) -> Option<i64> {
        self.offset_ns.get().copied()
    }

    /// Correct a primary source timestamp into the authoritative clock.
    pub fn correct(&self, sensor_ts_ns: u64) -> u64 {
        self.correct_at(sensor_ts_ns, time::system_time_ns())
    }

    /// Correct a timestamp, using `system_now_ns` as the system clock reading
    /// should this be the first sample.
    ///
    /// A sample beyond `i64::MAX` can't fix the offset. Until the offset is
    /// fixed such samples read the system clock instead.
    pub fn correct_at(&self, sensor_ts_ns: u64, system_now_ns: u64) -> u64 {
        let offset = match self.offset_ns.get() {
            Some(offset) => *offset,
            None if sensor_ts_ns > i64::MAX as u64 => {
                warn!(
                    "Primary timestamp {} ns out of range, not fixing the offset",
                    sensor_ts_ns
                );
                return system_now_ns;
            }
            None => *self.offset_ns.get_or_init(|| {
                let offset = clamp_i64(system_now_ns as i128 - sensor_ts_ns as i128);
                info!("Timestamp offset fixed at {} ns", offset);
                offset
            }),
        };

        let corrected = (sensor_ts_ns as i128 + offset as i128).clamp(0, u64::MAX as i128) as u64;
        self.last_ns.fetch_max(corrected, Ordering::AcqRel);
        corrected
    }
}

fn clamp_i64(value: i128) -> i64 {
    value.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

impl Default for TimestampAuthority {
    fn default() -> Self {
        Self::new()
    }
}

impl TimestampProvider for TimestampAuthority {
    fn timestamp(&self) -> u64 {
        if self.primary.get().is_none() || self.offset_ns.get().is_none() {
            return time::system_time_ns();
        }

        self.last_ns.load(Ordering::Acquire)
    }
}

impl StatusReporting for TimestampAuthority {
    fn name(&self) -> &str {
        "timestamp"
    }

    fn status(&self) -> Value {
        json!({
            "primary": self.primary(),
            "offset_ns": self.offset_ns(),
            "last_timestamp_ns": self.timestamp(),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_system_clock_without_primary() {
        let ta = TimestampAuthority::new();
        let before = time::system_time_ns();
        let ts = ta.timestamp();
        assert!(ts >= before);
        assert_eq!(ta.offset_ns(), None);

        // Primary designated but no samples yet
        assert!(ta.designate_primary("lidar"));
        assert!(ta.timestamp() >= before);
    }

    #[test]
    fn test_offset_fixed_on_first_sample() {
        let ta = TimestampAuthority::new();
        ta.designate_primary("lidar");

        assert_eq!(ta.correct_at(1_000, 5_000_000), 5_000_000);
        assert_eq!(ta.offset_ns(), Some(4_999_000));
        assert_eq!(ta.timestamp(), 5_000_000);

        // A different system time later doesn't move the offset
        assert_eq!(ta.correct_at(2_000, 9_999_999_999), 5_001_000);
        assert_eq!(ta.offset_ns(), Some(4_999_000));
        assert_eq!(ta.timestamp(), 5_001_000);

        // Late samples don't step the clock back
        assert_eq!(ta.correct_at(1_500, 0), 5_000_500);
        assert_eq!(ta.timestamp(), 5_001_000);
    }

    #[test]
    fn test_single_primary() {
        let ta = TimestampAuthority::new();
        assert!(ta.designate_primary("lidar"));
        assert!(!ta.designate_primary("gnss"));
        assert_eq!(ta.primary(), Some("lidar"));

        let status = ta.status();
        assert_eq!(status["primary"], "lidar");
        assert!(status["offset_ns"].is_null());
    }

    #[test]
    fn test_out_of_range_first_sample() {
        let ta = TimestampAuthority::new();
        ta.designate_primary("lidar");

        let now = 1_790_000_000_000_000_000;
        assert_eq!(ta.correct_at(0x8000_0000_0000_0000, now), now);
        assert_eq!(ta.offset_ns(), None);

        // The next representable sample fixes the offset as usual
        assert_eq!(ta.correct_at(1_000, now), now);
        assert_eq!(ta.offset_ns(), Some(now as i64 - 1_000));

        // Once fixed, large samples saturate rather than wrap
        assert_eq!(ta.correct_at(u64::MAX, now), u64::MAX);
    }
}
