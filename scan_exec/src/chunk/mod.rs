//! # Chunk module
//!
//! Chunked persistence of captured data. See [`ChunkPersistenceEngine`].

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

mod engine;

// ------------------------------------------------------------------------------------------------
// EXPORTS
// ------------------------------------------------------------------------------------------------

pub use engine::{ChunkPersistenceEngine, CommitError, CommitReport};

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Name of a chunk file, `<kind><NNNN>.<ext>`.
pub fn chunk_file_name(kind: &str, chunk_index: u64, ext: &str) -> String {
    format!("{}{:04}.{}", kind, chunk_index, ext)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_chunk_file_name() {
        assert_eq!(chunk_file_name("lidar", 3, "csv"), "lidar0003.csv");
        assert_eq!(chunk_file_name("imu", 12345, "csv"), "imu12345.csv");
    }
}
