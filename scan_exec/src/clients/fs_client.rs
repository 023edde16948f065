//! # File system client
//!
//! Owns the storage medium: its manifest, the allocation of session
//! directories and the writability check.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use log::{info, warn};
use serde_json::{json, Value};

use super::StatusReporting;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

pub const FS_CLIENT_NAME: &str = "fs";

/// Name of the manifest file at the storage root
pub const MANIFEST_FILE: &str = "scan_manifest.txt";

pub const CONTINUOUS_DIR_PREFIX: &str = "continuous_scanning_";

pub const STOP_SCAN_DIR_PREFIX: &str = "stop_scans_";

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// Allocates the output directories of a scan session.
pub trait StorageAllocator: Send + Sync {
    fn allocate_session(&self) -> Result<SessionDirs, AllocError>;
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Output directories of one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDirs {
    pub id: u64,
    pub continuous: PathBuf,
    pub stop_scan: PathBuf,
}

pub struct FsClient {
    root: PathBuf,
    state: Mutex<FsState>,
}

#[derive(Default)]
struct FsState {
    session: Option<SessionDirs>,
    last_error: Option<String>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum AllocError {
    #[error("No storage root is configured")]
    EmptyRoot,

    #[error("Storage root {0:?} is not writable")]
    NotWritable(PathBuf),

    #[error("Manifest {0:?} is corrupt: \"{1}\"")]
    CorruptManifest(PathBuf, String),

    #[error("Could not access the storage: {0}")]
    Io(std::io::Error),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl FsClient {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self {
            root: root.into(),
            state: Mutex::new(FsState::default()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// True if the root is an existing, writable directory.
    pub fn is_writable(&self) -> bool {
        if self.root.as_os_str().is_empty() {
            return false;
        }

        match fs::metadata(&self.root) {
            Ok(m) => m.is_dir() && !m.permissions().readonly(),
            Err(_) => false,
        }
    }

    /// The id the next allocated session will take.
    pub fn next_id(&self) -> Result<u64, AllocError> {
        let path = self.manifest_path();

        let text = match fs::read_to_string(&path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(AllocError::Io(e)),
        };

        text.trim()
            .parse()
            .map_err(|_| AllocError::CorruptManifest(path, text.trim().to_string()))
    }

    /// Directories in the storage root, sorted by name.
    pub fn directories(&self) -> Vec<String> {
        let mut dirs: Vec<String> = match fs::read_dir(&self.root) {
            Ok(rd) => rd
                .filter_map(|e| e.ok())
                .filter(|e| e.path().is_dir())
                .map(|e| e.file_name().to_string_lossy().to_string())
                .collect(),
            Err(_) => Vec::new(),
        };
        dirs.sort();
        dirs
    }

    fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE)
    }

    fn try_allocate(&self) -> Result<SessionDirs, AllocError> {
        if self.root.as_os_str().is_empty() {
            return Err(AllocError::EmptyRoot);
        }
        if !self.is_writable() {
            return Err(AllocError::NotWritable(self.root.clone()));
        }

        let id = self.next_id()?;

        let dirs = SessionDirs {
            id,
            continuous: self.root.join(format!("{}{:04}", CONTINUOUS_DIR_PREFIX, id)),
            stop_scan: self.root.join(format!("{}{:04}", STOP_SCAN_DIR_PREFIX, id)),
        };

        fs::create_dir_all(&dirs.continuous).map_err(AllocError::Io)?;
        fs::create_dir_all(&dirs.stop_scan).map_err(AllocError::Io)?;
        fs::write(self.manifest_path(), format!("{}\n", id + 1)).map_err(AllocError::Io)?;

        Ok(dirs)
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, FsState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl StorageAllocator for FsClient {
    /// Allocate the continuous and stop scan directories of a new session,
    /// both numbered with the next manifest id, and advance the manifest.
    fn allocate_session(&self) -> Result<SessionDirs, AllocError> {
        let res = self.try_allocate();

        let mut state = self.lock_state();
        match &res {
            Ok(dirs) => {
                info!(
                    "Session {} allocated: {:?} and {:?}",
                    dirs.id, dirs.continuous, dirs.stop_scan
                );
                state.session = Some(dirs.clone());
                state.last_error = None;
            }
            Err(e) => {
                warn!("Could not allocate session directories: {}", e);
                state.last_error = Some(e.to_string());
            }
        }

        res
    }
}

impl StatusReporting for FsClient {
    fn name(&self) -> &str {
        FS_CLIENT_NAME
    }

    fn status(&self) -> Value {
        let state = self.lock_state();
        json!({
            "root": self.root,
            "writable": self.is_writable(),
            "next_id": self.next_id().ok(),
            "session_id": state.session.as_ref().map(|s| s.id),
            "dirs": self.directories(),
            "error": state.last_error,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_allocate_advances_manifest() {
        let root = tempfile::tempdir().unwrap();
        let fs_client = FsClient::new(root.path());

        assert_eq!(fs_client.next_id().unwrap(), 0);

        let first = fs_client.allocate_session().unwrap();
        assert_eq!(first.id, 0);
        assert!(root.path().join("continuous_scanning_0000").is_dir());
        assert!(root.path().join("stop_scans_0000").is_dir());

        let second = fs_client.allocate_session().unwrap();
        assert_eq!(second.id, 1);
        assert_eq!(second.continuous, root.path().join("continuous_scanning_0001"));
        assert_eq!(fs_client.next_id().unwrap(), 2);

        let status = fs_client.status();
        assert_eq!(status["writable"], true);
        assert_eq!(status["session_id"], 1);
        assert_eq!(status["dirs"].as_array().unwrap().len(), 4);
    }

    #[test]
    fn test_allocate_failures() {
        let fs_client = FsClient::new("");
        assert!(!fs_client.is_writable());
        match fs_client.allocate_session() {
            Err(AllocError::EmptyRoot) => (),
            r => panic!("Expected EmptyRoot, got {:?}", r),
        }
        assert!(fs_client.status()["error"].is_string());

        let missing = FsClient::new("/no/such/usb/stick");
        match missing.allocate_session() {
            Err(AllocError::NotWritable(_)) => (),
            r => panic!("Expected NotWritable, got {:?}", r),
        }
    }

    #[test]
    fn test_corrupt_manifest() {
        let root = tempfile::tempdir().unwrap();
        fs::write(root.path().join(MANIFEST_FILE), "many").unwrap();

        let fs_client = FsClient::new(root.path());
        match fs_client.allocate_session() {
            Err(AllocError::CorruptManifest(_, s)) => assert_eq!(s, "many"),
            r => panic!("Expected CorruptManifest, got {:?}", r),
        }
    }
}
