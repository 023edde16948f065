//! # Scan Rig executable library
//!
//! Everything the `scan_exec` binary runs: the [`scan_ctrl::ScanController`]
//! state machine, the [`chunk::ChunkPersistenceEngine`], the
//! [`clients::SensorRegistry`] that connects the two, the
//! [`timestamp::TimestampAuthority`], the sensor clients themselves and the
//! HTTP and console command surfaces.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

pub mod app_state;
pub mod chunk;
pub mod cli;
pub mod clients;
pub mod http_server;
pub mod params;
pub mod scan_ctrl;
pub mod status;
pub mod timestamp;
