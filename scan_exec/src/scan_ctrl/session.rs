//! # Scan session
//!
//! The output directories and chunk counters of one run of the rig. Both
//! capture modes share a single chunk numbering space.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::clients::fs_client::SessionDirs;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct ScanSession {
    pub id: u64,
    pub continuous_dir: PathBuf,
    pub stop_scan_dir: PathBuf,
    pub chunks_continuous: u64,
    pub chunks_stop_scan: u64,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ScanMode {
    Continuous,
    StopScan,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl ScanSession {
    pub fn new(dirs: SessionDirs) -> Self {
        Self {
            id: dirs.id,
            continuous_dir: dirs.continuous,
            stop_scan_dir: dirs.stop_scan,
            chunks_continuous: 0,
            chunks_stop_scan: 0,
        }
    }

    /// Index of the next committed chunk, whichever the mode.
    pub fn next_chunk_index(&self) -> u64 {
        self.chunks_continuous + self.chunks_stop_scan
    }

    pub fn dir(&self, mode: ScanMode) -> &Path {
        match mode {
            ScanMode::Continuous => &self.continuous_dir,
            ScanMode::StopScan => &self.stop_scan_dir,
        }
    }

    /// Count a committed chunk.
    pub fn chunk_committed(&mut self, mode: ScanMode) {
        match mode {
            ScanMode::Continuous => self.chunks_continuous += 1,
            ScanMode::StopScan => self.chunks_stop_scan += 1,
        }
    }
}
