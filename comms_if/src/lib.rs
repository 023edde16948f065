//! # Communications interface crate.
//!
//! Provides all common interface types shared between the scan executable's
//! collaborators and its command/status surfaces.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

pub mod cmd;

/// Record and packet definitions for equipment (lidar, gnss, cameras, gpio)
pub mod eqpt;

pub mod status;
