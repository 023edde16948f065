//! # Scan command module
//!
//! Commands which can be sent to the scan controller, from buttons, the HTTP
//! surface or the console. All sources map onto the same [`ScanCmd`] set.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::str::FromStr;
use thiserror::Error;

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// A command for the scan controller.
///
/// Commands are requests, not orders: the controller evaluates each one
/// against its current state and drops any that don't apply.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum ScanCmd {
    /// Start continuous scanning.
    StartScan,

    /// Stop continuous scanning, committing the last chunk.
    StopScan,

    /// Start a delayed, fixed-duration stop scan.
    TriggerStopScan,

    /// Start continuous scanning if idle, or stop it if scanning.
    TriggerContinuousScanning,
}

/// Possible parsing errors.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum CmdParseError {
    #[error("\"{0}\" is not a recognised scan command")]
    UnknownCmd(String),
}

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// All commands, in declaration order.
pub const ALL_CMDS: [ScanCmd; 4] = [
    ScanCmd::StartScan,
    ScanCmd::StopScan,
    ScanCmd::TriggerStopScan,
    ScanCmd::TriggerContinuousScanning,
];

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl ScanCmd {
    /// Name of the command as used in config files and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanCmd::StartScan => "start_scan",
            ScanCmd::StopScan => "stop_scan",
            ScanCmd::TriggerStopScan => "trigger_stop_scan",
            ScanCmd::TriggerContinuousScanning => "trigger_continuous_scanning",
        }
    }

    /// The HTTP trigger path which issues this command.
    pub fn http_path(&self) -> &'static str {
        match self {
            ScanCmd::StartScan => "/trig/start_bag",
            ScanCmd::StopScan => "/trig/stop_bag",
            ScanCmd::TriggerStopScan => "/trig/stopscan",
            ScanCmd::TriggerContinuousScanning => "/trig/toggle",
        }
    }

    /// Get the command issued by an HTTP trigger path, if any.
    pub fn from_http_path(path: &str) -> Option<Self> {
        ALL_CMDS.iter().copied().find(|c| c.http_path() == path)
    }
}

impl FromStr for ScanCmd {
    type Err = CmdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ALL_CMDS
            .iter()
            .copied()
            .find(|c| c.as_str() == s.trim())
            .ok_or_else(|| CmdParseError::UnknownCmd(s.to_string()))
    }
}

impl Display for ScanCmd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_http_paths() {
        assert_eq!(ScanCmd::from_http_path("/trig/start_bag"), Some(ScanCmd::StartScan));
        assert_eq!(ScanCmd::from_http_path("/trig/stop_bag"), Some(ScanCmd::StopScan));
        assert_eq!(ScanCmd::from_http_path("/trig/stopscan"), Some(ScanCmd::TriggerStopScan));
        assert_eq!(ScanCmd::from_http_path("/status"), None);
    }

    #[test]
    fn test_parse() {
        for cmd in ALL_CMDS.iter() {
            assert_eq!(cmd.to_string().parse::<ScanCmd>(), Ok(*cmd));
        }
        assert_eq!(
            "launch".parse::<ScanCmd>(),
            Err(CmdParseError::UnknownCmd("launch".into()))
        );
    }
}
