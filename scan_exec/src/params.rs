//! # Scan Executable Parameters
//!
//! Parameters are loaded from `scan_exec.toml` and then overridden by any of
//! the following environment variables which are set:
//!
//! | Variable | Parameter |
//! |---|---|
//! | `SCAN_RIG_REPO` | `storage_root` |
//! | `SCAN_RIG_LIDAR_LISTEN` | `lidar_listen_addr` |
//! | `SCAN_RIG_GNSS_UART` | `gnss_device` |
//! | `SCAN_RIG_HTTP_ADDR` | `http_addr` |
//! | `SCAN_RIG_SIM` | `simulated_hardware` |
//! | `SCAN_RIG_IGNORE_LIDAR_ERROR` | `ignore_lidar_error` |
//! | `SCAN_RIG_CAMERAS` | `camera_indexes`, comma separated |

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::net::SocketAddr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::scan_ctrl::{InvalidPeriod, ScanCtrlParams};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

pub const ENV_STORAGE_ROOT: &str = "SCAN_RIG_REPO";
pub const ENV_LIDAR_LISTEN: &str = "SCAN_RIG_LIDAR_LISTEN";
pub const ENV_GNSS_DEVICE: &str = "SCAN_RIG_GNSS_UART";
pub const ENV_HTTP_ADDR: &str = "SCAN_RIG_HTTP_ADDR";
pub const ENV_SIMULATED: &str = "SCAN_RIG_SIM";
pub const ENV_IGNORE_LIDAR_ERROR: &str = "SCAN_RIG_IGNORE_LIDAR_ERROR";
pub const ENV_CAMERAS: &str = "SCAN_RIG_CAMERAS";

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanExecParams {
    /// Directory the session directories are allocated in
    pub storage_root: PathBuf,

    /// Address the LiDAR packet listener binds to
    pub lidar_listen_addr: SocketAddr,

    /// Serial numbers of the LiDARs expected on the network, which fixes
    /// their ids before any packet arrives
    pub lidar_serials: Vec<String>,

    /// Serial device of the GNSS receiver, empty for no GNSS
    pub gnss_device: PathBuf,

    /// Address of the HTTP command and status server
    pub http_addr: SocketAddr,

    /// Simulate every sensor and the front panel
    pub simulated_hardware: bool,

    /// Carry on with the system clock if the LiDAR can't be started
    pub ignore_lidar_error: bool,

    /// Indexes of the cameras to capture from
    pub camera_indexes: Vec<u32>,

    pub controller: ScanCtrlParams,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ParamsError {
    #[error("Invalid value \"{value}\" for {var}")]
    InvalidEnv { var: &'static str, value: String },

    #[error(transparent)]
    InvalidPeriod(#[from] InvalidPeriod),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl ScanExecParams {
    /// Apply overrides from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<(), ParamsError> {
        self.apply_overrides(|var| std::env::var(var).ok())
    }

    /// Apply overrides from `lookup`, which returns the value of a variable
    /// if it is set.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ParamsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup(ENV_STORAGE_ROOT) {
            self.storage_root = PathBuf::from(v);
        }
        if let Some(v) = lookup(ENV_LIDAR_LISTEN) {
            self.lidar_listen_addr = parse_addr(ENV_LIDAR_LISTEN, v)?;
        }
        if let Some(v) = lookup(ENV_GNSS_DEVICE) {
            self.gnss_device = PathBuf::from(v);
        }
        if let Some(v) = lookup(ENV_HTTP_ADDR) {
            self.http_addr = parse_addr(ENV_HTTP_ADDR, v)?;
        }
        if let Some(v) = lookup(ENV_SIMULATED) {
            self.simulated_hardware = parse_bool(&v);
        }
        if let Some(v) = lookup(ENV_IGNORE_LIDAR_ERROR) {
            self.ignore_lidar_error = parse_bool(&v);
        }
        if let Some(v) = lookup(ENV_CAMERAS) {
            self.camera_indexes = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| s.parse::<u32>())
                .collect::<Result<_, _>>()
                .map_err(|_| ParamsError::InvalidEnv {
                    var: ENV_CAMERAS,
                    value: v.clone(),
                })?;
        }

        Ok(())
    }

    /// Check the loaded and overridden parameters can be used.
    pub fn validate(&self) -> Result<(), ParamsError> {
        self.controller.validate()?;
        Ok(())
    }

    /// GNSS device, if one is configured.
    pub fn gnss_device(&self) -> Option<&PathBuf> {
        if self.gnss_device.as_os_str().is_empty() {
            None
        } else {
            Some(&self.gnss_device)
        }
    }
}

impl Default for ScanExecParams {
    fn default() -> Self {
        Self {
            storage_root: PathBuf::from("/media/usb/"),
            lidar_listen_addr: SocketAddr::from(([0, 0, 0, 0], 56301)),
            lidar_serials: Vec::new(),
            gnss_device: PathBuf::from("/dev/ttyS0"),
            http_addr: SocketAddr::from(([0, 0, 0, 0], 8003)),
            simulated_hardware: false,
            ignore_lidar_error: false,
            camera_indexes: Vec::new(),
            controller: ScanCtrlParams::default(),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn parse_bool(value: &str) -> bool {
    let v = value.trim();
    v == "1" || v.eq_ignore_ascii_case("true")
}

fn parse_addr(var: &'static str, value: String) -> Result<SocketAddr, ParamsError> {
    value
        .trim()
        .parse()
        .map_err(|_| ParamsError::InvalidEnv { var, value })
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults_from_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan_exec.toml");
        std::fs::write(
            &path,
            r#"
            storage_root = "/tmp/scans"
            lidar_serials = ["3GGDJ6K00100101", "3GGDJ6K00100102"]

            [controller]
            commit_interval_s = 5.0
            "#,
        )
        .unwrap();

        let params: ScanExecParams = util::params::load_from_path(&path).unwrap();

        assert_eq!(params.storage_root, PathBuf::from("/tmp/scans"));
        assert_eq!(params.lidar_serials.len(), 2);
        assert_eq!(params.http_addr.port(), 8003);
        assert_eq!(params.controller.commit_interval_s, 5.0);
        assert_eq!(params.controller.stop_scan_duration_s, 30.0);
        assert_eq!(params.controller.mandatory_clients, vec!["gpio", "fs"]);
    }

    #[test]
    fn test_env_overrides() {
        let vars = env(&[
            ("SCAN_RIG_REPO", "/mnt/stick"),
            ("SCAN_RIG_HTTP_ADDR", "127.0.0.1:9000"),
            ("SCAN_RIG_SIM", "1"),
            ("SCAN_RIG_IGNORE_LIDAR_ERROR", "TRUE"),
            ("SCAN_RIG_CAMERAS", "0, 2"),
            ("SCAN_RIG_GNSS_UART", ""),
        ]);

        let mut params = ScanExecParams::default();
        params.apply_overrides(|k| vars.get(k).cloned()).unwrap();

        assert_eq!(params.storage_root, PathBuf::from("/mnt/stick"));
        assert_eq!(params.http_addr, "127.0.0.1:9000".parse().unwrap());
        assert!(params.simulated_hardware);
        assert!(params.ignore_lidar_error);
        assert_eq!(params.camera_indexes, vec![0, 2]);
        assert!(params.gnss_device().is_none());
        assert_eq!(params.lidar_listen_addr.port(), 56301);
    }

    #[test]
    fn test_invalid_env() {
        let mut params = ScanExecParams::default();
        let err = params
            .apply_overrides(|k| match k {
                "SCAN_RIG_LIDAR_LISTEN" => Some(String::from("not an address")),
                _ => None,
            })
            .unwrap_err();
        assert!(matches!(err, ParamsError::InvalidEnv { var: "SCAN_RIG_LIDAR_LISTEN", .. }));

        assert!(params
            .apply_overrides(|k| match k {
                "SCAN_RIG_CAMERAS" => Some(String::from("0,a")),
                _ => None,
            })
            .is_err());

        params
            .apply_overrides(|k| match k {
                "SCAN_RIG_SIM" => Some(String::from("yes")),
                _ => None,
            })
            .unwrap();
        assert!(!params.simulated_hardware);
    }

    #[test]
    fn test_negative_period_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan_exec.toml");
        std::fs::write(
            &path,
            r#"
            [controller]
            commit_interval_s = -1.0
            "#,
        )
        .unwrap();

        let params: ScanExecParams = util::params::load_from_path(&path).unwrap();
        let err = params.validate().unwrap_err();
        assert!(matches!(
            err,
            ParamsError::InvalidPeriod(InvalidPeriod { name: "commit_interval_s", .. })
        ));

        assert!(ScanExecParams::default().validate().is_ok());
    }
}
