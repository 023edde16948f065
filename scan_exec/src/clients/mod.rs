//! # Sensor clients
//!
//! A client is any collaborator of the controller: a sensor, the GPIO panel or
//! the storage medium. Each one implements a subset of four narrow
//! capabilities and declares that subset when it's attached to the
//! [`SensorRegistry`]:
//!
//! - [`Logger`] - starts and stops accumulation of data.
//! - [`ChunkDumpable`] - freezes its buffers into a [`PendingDump`] and
//!   persists that dump into a chunk directory.
//! - [`StatusReporting`] - contributes a key to the status document.
//! - [`TimestampConsumer`] - labels its samples with the authoritative clock.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

pub mod cam_client;
pub mod fs_client;
pub mod gnss_client;
pub mod gpio_client;
pub mod lidar_client;
mod registry;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::path::{Path, PathBuf};
use std::sync::Arc;

use comms_if::eqpt::gpio::LedId;
use serde_json::Value;

pub use registry::{Capabilities, SensorClientHandle, SensorRegistry};

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// Start and stop accumulation of data. Both calls are idempotent.
pub trait Logger: Send + Sync {
    fn start_logging(&self);

    fn stop_logging(&self);
}

/// Two phase chunk output.
pub trait ChunkDumpable: Send + Sync {
    /// Swap the active buffer for an empty one and hand back its contents.
    ///
    /// Must not block on I/O.
    fn freeze(&self) -> PendingDump;

    /// Write a frozen dump into `directory` under the given chunk index,
    /// returning the paths of every file written.
    fn persist(
        &self,
        dump: PendingDump,
        directory: &Path,
        chunk_index: u64,
    ) -> Result<Vec<PathBuf>, PersistError> {
        dump.write_to(directory, chunk_index)
    }
}

/// Contribute a report to the status document.
pub trait StatusReporting: Send + Sync {
    /// Key of the report in the status document.
    fn name(&self) -> &str;

    fn status(&self) -> Value;
}

/// Source of the authoritative timestamp, in nanoseconds.
pub trait TimestampProvider: Send + Sync {
    fn timestamp(&self) -> u64;
}

pub trait TimestampConsumer: Send + Sync {
    fn set_timestamp_provider(&self, provider: Arc<dyn TimestampProvider>);
}

/// Front panel LED output.
pub trait Indicator: Send + Sync {
    fn set_led(&self, led: LedId, on: bool);
}

/// Frozen contents of one client's buffers.
pub trait DumpPayload: Send {
    /// Number of records in the payload.
    fn len(&self) -> usize;

    fn write_to(self: Box<Self>, directory: &Path, chunk_index: u64)
        -> Result<Vec<PathBuf>, PersistError>;
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A point in time snapshot of a client's data, produced by
/// [`ChunkDumpable::freeze`].
///
/// The producer gives up all access to the data when the dump is made.
pub struct PendingDump {
    client: String,
    payload: Option<Box<dyn DumpPayload>>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Errors which can occur while persisting a dump.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("Could not write chunk file: {0}")]
    Io(std::io::Error),

    #[error("Could not write CSV record: {0}")]
    Csv(csv::Error),

    #[error("The client is not available: {0}")]
    Unavailable(String),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl PendingDump {
    pub fn new<S: Into<String>, P: DumpPayload + 'static>(client: S, payload: P) -> Self {
        Self {
            client: client.into(),
            payload: Some(Box::new(payload)),
        }
    }

    /// A dump with nothing in it.
    pub fn empty<S: Into<String>>(client: S) -> Self {
        Self {
            client: client.into(),
            payload: None,
        }
    }

    pub fn client(&self) -> &str {
        &self.client
    }

    pub fn len(&self) -> usize {
        self.payload.as_ref().map(|p| p.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write the payload. An empty dump writes nothing.
    pub fn write_to(self, directory: &Path, chunk_index: u64) -> Result<Vec<PathBuf>, PersistError> {
        match self.payload {
            Some(p) => p.write_to(directory, chunk_index),
            None => Ok(Vec::new()),
        }
    }
}

impl std::fmt::Debug for PendingDump {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingDump")
            .field("client", &self.client)
            .field("len", &self.len())
            .finish()
    }
}

impl From<std::io::Error> for PersistError {
    fn from(e: std::io::Error) -> Self {
        PersistError::Io(e)
    }
}

impl From<csv::Error> for PersistError {
    fn from(e: csv::Error) -> Self {
        PersistError::Csv(e)
    }
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Build a space separated CSV writer for a chunk file, as used by every
/// text sensor format.
pub(crate) fn chunk_csv_writer(path: &Path) -> Result<csv::Writer<std::fs::File>, PersistError> {
    Ok(csv::WriterBuilder::new()
        .delimiter(b' ')
        .has_headers(false)
        .from_path(path)?)
}
