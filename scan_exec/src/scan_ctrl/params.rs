//! # Scan controller parameters

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanCtrlParams {
    /// Period of the controller loop in normal states
    pub tick_period_s: f64,

    /// Half period of the error state blink patterns, which is also the
    /// controller period in those states
    pub error_blink_period_s: f64,

    /// Half period of the fast LED blink used while starting a scan
    pub fast_blink_period_s: f64,

    /// Time between chunk commits while continuously scanning
    pub commit_interval_s: f64,

    /// Delay between a stop scan trigger and the start of logging
    pub stop_scan_pre_roll_s: f64,

    /// Length of a stop scan capture
    pub stop_scan_duration_s: f64,

    /// Clients which must be attached before the controller leaves
    /// `WaitForResources`
    pub mandatory_clients: Vec<String>,
}

/// A controller period which can't be used as a `Duration`.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Invalid controller period {name} = {value}")]
pub struct InvalidPeriod {
    pub name: &'static str,
    pub value: f64,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl ScanCtrlParams {
    /// Check every period converts to a `Duration`. The loop and blink
    /// periods must also be non-zero.
    pub fn validate(&self) -> Result<(), InvalidPeriod> {
        let periods = [
            ("tick_period_s", self.tick_period_s, true),
            ("error_blink_period_s", self.error_blink_period_s, true),
            ("fast_blink_period_s", self.fast_blink_period_s, true),
            ("commit_interval_s", self.commit_interval_s, false),
            ("stop_scan_pre_roll_s", self.stop_scan_pre_roll_s, false),
            ("stop_scan_duration_s", self.stop_scan_duration_s, false),
        ];

        for (name, value, non_zero) in periods.iter().copied() {
            match Duration::try_from_secs_f64(value) {
                Ok(d) if !(non_zero && d.is_zero()) => (),
                _ => return Err(InvalidPeriod { name, value }),
            }
        }

        Ok(())
    }

    pub fn tick_period(&self) -> Duration {
        Duration::from_secs_f64(self.tick_period_s)
    }

    pub fn error_blink_period(&self) -> Duration {
        Duration::from_secs_f64(self.error_blink_period_s)
    }

    pub fn fast_blink_period(&self) -> Duration {
        Duration::from_secs_f64(self.fast_blink_period_s)
    }

    pub fn commit_interval(&self) -> Duration {
        Duration::from_secs_f64(self.commit_interval_s)
    }

    pub fn stop_scan_pre_roll(&self) -> Duration {
        Duration::from_secs_f64(self.stop_scan_pre_roll_s)
    }

    pub fn stop_scan_duration(&self) -> Duration {
        Duration::from_secs_f64(self.stop_scan_duration_s)
    }
}

impl Default for ScanCtrlParams {
    fn default() -> Self {
        Self {
            tick_period_s: 0.1,
            error_blink_period_s: 1.0,
            fast_blink_period_s: 0.1,
            commit_interval_s: 10.0,
            stop_scan_pre_roll_s: 5.0,
            stop_scan_duration_s: 30.0,
            mandatory_clients: vec![String::from("gpio"), String::from("fs")],
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_validate() {
        assert!(ScanCtrlParams::default().validate().is_ok());

        let mut params = ScanCtrlParams::default();
        params.commit_interval_s = -1.0;
        assert_eq!(
            params.validate(),
            Err(InvalidPeriod {
                name: "commit_interval_s",
                value: -1.0
            })
        );

        let mut params = ScanCtrlParams::default();
        params.stop_scan_pre_roll_s = 0.0;
        assert!(params.validate().is_ok());
        params.tick_period_s = 0.0;
        assert_eq!(params.validate().unwrap_err().name, "tick_period_s");

        let mut params = ScanCtrlParams::default();
        params.stop_scan_duration_s = f64::NAN;
        assert!(params.validate().is_err());
        params.stop_scan_duration_s = f64::INFINITY;
        assert!(params.validate().is_err());
    }
}
