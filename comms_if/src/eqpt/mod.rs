//! # Equipment Interface
//!
//! This module defines the records and packets exchanged with the rig's
//! equipment.

// -----------------------------------------------------------------------------------------------
// MODULES
// -----------------------------------------------------------------------------------------------

pub mod cam;
pub mod gnss;
pub mod gpio;
pub mod lidar;
