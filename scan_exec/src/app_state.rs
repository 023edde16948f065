//! # Application state
//!
//! [`AppState`] is the controller's state, held in an [`AtomicAppState`] so
//! that any thread can read it while only the controller moves it.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::fmt::Display;
use std::sync::atomic::{AtomicU8, Ordering};

use serde::Serialize;

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize)]
#[repr(u8)]
pub enum AppState {
    WaitForResources = 0,
    Idle,
    StartingScan,
    Scanning,
    Stopping,
    StartingStopScan,
    StopScanInitialProgress,
    StopScanInProgress,
    StoppingStopScan,
    LidarError,
    UsbIoError,
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Atomic cell holding an [`AppState`].
#[derive(Debug)]
pub struct AtomicAppState(AtomicU8);

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

pub const ALL_STATES: [AppState; 11] = [
    AppState::WaitForResources,
    AppState::Idle,
    AppState::StartingScan,
    AppState::Scanning,
    AppState::Stopping,
    AppState::StartingStopScan,
    AppState::StopScanInitialProgress,
    AppState::StopScanInProgress,
    AppState::StoppingStopScan,
    AppState::LidarError,
    AppState::UsbIoError,
];

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl AppState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppState::WaitForResources => "WAIT_FOR_RESOURCES",
            AppState::Idle => "IDLE",
            AppState::StartingScan => "STARTING_SCAN",
            AppState::Scanning => "SCANNING",
            AppState::Stopping => "STOPPING",
            AppState::StartingStopScan => "STARTING_STOP_SCAN",
            AppState::StopScanInitialProgress => "STOP_SCAN_IN_INITIAL_PROGRESS",
            AppState::StopScanInProgress => "STOP_SCAN_IN_PROGRESS",
            AppState::StoppingStopScan => "STOPPING_STOP_SCAN",
            AppState::LidarError => "LIDAR_ERROR",
            AppState::UsbIoError => "USB_IO_ERROR",
        }
    }

    /// Error states have no exit transition.
    pub fn is_error(&self) -> bool {
        matches!(self, AppState::LidarError | AppState::UsbIoError)
    }

    /// States whose work is done in a single step, with no condition to wait on.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AppState::StartingScan
                | AppState::Stopping
                | AppState::StartingStopScan
                | AppState::StoppingStopScan
        )
    }

    fn from_u8(v: u8) -> Option<Self> {
        ALL_STATES.get(v as usize).copied()
    }
}

impl Display for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl AtomicAppState {
    pub fn new(state: AppState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub fn load(&self) -> AppState {
        // Only valid discriminants are ever stored
        AppState::from_u8(self.0.load(Ordering::Acquire)).unwrap_or(AppState::UsbIoError)
    }

    pub(crate) fn store(&self, state: AppState) {
        self.0.store(state as u8, Ordering::Release)
    }

    /// Move to `to` if the current state is one of `allowed`.
    ///
    /// Returns the state that was left on success, or the current state on
    /// failure.
    pub(crate) fn transition_from(&self, allowed: &[AppState], to: AppState) -> Result<AppState, AppState> {
        let mut current = self.load();
        loop {
            if !allowed.contains(&current) {
                return Err(current);
            }

            match self.0.compare_exchange(
                current as u8,
                to as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(current),
                Err(actual) => {
                    current = AppState::from_u8(actual).unwrap_or(AppState::UsbIoError)
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_u8_round_trip() {
        for s in ALL_STATES.iter() {
            assert_eq!(AppState::from_u8(*s as u8), Some(*s));
        }
        assert_eq!(AppState::from_u8(11), None);
    }

    #[test]
    fn test_transition_from() {
        let cell = AtomicAppState::new(AppState::Idle);

        assert_eq!(
            cell.transition_from(&[AppState::Scanning], AppState::Stopping),
            Err(AppState::Idle)
        );
        assert_eq!(cell.load(), AppState::Idle);

        assert_eq!(
            cell.transition_from(&[AppState::Idle], AppState::StartingScan),
            Ok(AppState::Idle)
        );
        assert_eq!(cell.load(), AppState::StartingScan);
    }

    #[test]
    fn test_display() {
        assert_eq!(AppState::StopScanInitialProgress.to_string(), "STOP_SCAN_IN_INITIAL_PROGRESS");
        assert!(AppState::UsbIoError.is_error());
        assert!(!AppState::Scanning.is_error());
    }
}
