//! # GPIO equipment
//!
//! Identifiers for the indicator LEDs and push buttons on the rig's front
//! panel.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub enum LedId {
    StopScan,
    CopyData,
    ContinuousScanning,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub enum ButtonId {
    StopScan,
    ContinuousScanning,
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Status report of the GPIO client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GpioStatus {
    pub leds: BTreeMap<String, bool>,
    pub buttons: BTreeMap<String, bool>,
}

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

pub const ALL_LEDS: [LedId; 3] = [LedId::StopScan, LedId::CopyData, LedId::ContinuousScanning];

pub const ALL_BUTTONS: [ButtonId; 2] = [ButtonId::StopScan, ButtonId::ContinuousScanning];

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl LedId {
    pub fn name(&self) -> &'static str {
        match self {
            LedId::StopScan => "LED_GPIO_STOP_SCAN",
            LedId::CopyData => "LED_GPIO_COPY_DATA",
            LedId::ContinuousScanning => "LED_GPIO_CONTINOUS_SCANNING",
        }
    }

    /// BCM pin number on the rig's header.
    pub fn default_pin(&self) -> u8 {
        match self {
            LedId::StopScan => 26,
            LedId::CopyData => 19,
            LedId::ContinuousScanning => 13,
        }
    }
}

impl ButtonId {
    pub fn name(&self) -> &'static str {
        match self {
            ButtonId::StopScan => "BUTTON_STOP_SCAN",
            ButtonId::ContinuousScanning => "BUTTON_CONTINOUS_SCANNING",
        }
    }

    /// BCM pin number on the rig's header.
    pub fn default_pin(&self) -> u8 {
        match self {
            ButtonId::StopScan => 5,
            ButtonId::ContinuousScanning => 6,
        }
    }
}
