//! # Chunk persistence engine
//!
//! Executes a chunk commit in five steps:
//!
//! 1. Check the output directory exists and is writable. Nothing else is
//!    touched if it isn't.
//! 2. Freeze every dumpable client, taking its buffer as a [`PendingDump`].
//! 3. Optionally stop every logger. This always comes after the freeze.
//! 4. Persist the non-empty dumps, one scoped thread per client.
//! 5. Sync every written file and the directory itself.
//!
//! A client whose persist fails doesn't stop the others, and doesn't fail
//! the commit. The failure is logged and counted in the engine status.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, warn};
use serde_json::{json, Value};

use crate::clients::{PendingDump, PersistError, SensorRegistry, StatusReporting};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

pub struct ChunkPersistenceEngine {
    registry: Arc<SensorRegistry>,
    stats: EngineStats,
}

/// Outcome of a successful commit.
#[derive(Debug, Clone)]
pub struct CommitReport {
    pub chunk_index: u64,

    /// Every file written by the clients
    pub files: Vec<PathBuf>,

    /// Clients whose persist failed
    pub failed_clients: Vec<String>,

    pub duration: Duration,
}

#[derive(Default)]
struct EngineStats {
    commits: AtomicU64,
    barriers: AtomicU64,
    persist_failures: AtomicU64,
    last_chunk: AtomicU64,
    last_commit_duration_us: AtomicU64,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum CommitError {
    #[error("No output directory was given")]
    EmptyDirectory,

    #[error("Output directory {0:?} is not accessible: {1}")]
    Inaccessible(PathBuf, std::io::Error),

    #[error("Output path {0:?} is not a directory")]
    NotADirectory(PathBuf),

    #[error("Output directory {0:?} is read only")]
    ReadOnly(PathBuf),

    #[error("Could not sync output directory {0:?}: {1}")]
    SyncFailed(PathBuf, std::io::Error),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl ChunkPersistenceEngine {
    pub fn new(registry: Arc<SensorRegistry>) -> Self {
        Self {
            registry,
            stats: EngineStats::default(),
        }
    }

    /// Commit the data accumulated since the last commit as chunk
    /// `chunk_index` in `directory`, stopping every logger after the freeze
    /// if `stop_logging` is set.
    pub fn commit(
        &self,
        directory: &Path,
        chunk_index: u64,
        stop_logging: bool,
    ) -> Result<CommitReport, CommitError> {
        let start = Instant::now();

        check_directory(directory)?;

        // ---- FREEZE ----

        let frozen: Vec<(String, Arc<_>, PendingDump)> = self
            .registry
            .dumpables()
            .into_iter()
            .map(|(name, client)| {
                let dump = client.freeze();
                (name, client, dump)
            })
            .collect();

        if stop_logging {
            self.registry.broadcast_stop();
        }

        // ---- PERSIST ----

        let results: Vec<(String, Result<Vec<PathBuf>, PersistError>)> = thread::scope(|s| {
            let workers: Vec<_> = frozen
                .into_iter()
                .filter(|(_, _, dump)| !dump.is_empty())
                .map(|(name, client, dump)| {
                    debug!("Persisting {} records from \"{}\"", dump.len(), name);
                    let worker = s.spawn(move || client.persist(dump, directory, chunk_index));
                    (name, worker)
                })
                .collect();

            workers
                .into_iter()
                .map(|(name, worker)| {
                    let res = worker.join().unwrap_or_else(|_| {
                        Err(PersistError::Unavailable(String::from("persist thread panicked")))
                    });
                    (name, res)
                })
                .collect()
        });

        let mut files = Vec::new();
        let mut failed_clients = Vec::new();
        for (name, res) in results {
            match res {
                Ok(f) => files.extend(f),
                Err(e) => {
                    warn!("Client \"{}\" failed to persist chunk {}: {}", name, chunk_index, e);
                    failed_clients.push(name);
                }
            }
        }

        // ---- DURABILITY BARRIER ----

        self.durability_barrier(directory, &files)?;

        let duration = start.elapsed();

        self.stats.commits.fetch_add(1, Ordering::Relaxed);
        self.stats
            .persist_failures
            .fetch_add(failed_clients.len() as u64, Ordering::Relaxed);
        self.stats.last_chunk.store(chunk_index, Ordering::Relaxed);
        self.stats
            .last_commit_duration_us
            .store(duration.as_micros() as u64, Ordering::Relaxed);

        Ok(CommitReport {
            chunk_index,
            files,
            failed_clients,
            duration,
        })
    }

    /// Number of completed commits.
    pub fn num_commits(&self) -> u64 {
        self.stats.commits.load(Ordering::Relaxed)
    }

    /// Number of completed durability barriers.
    pub fn num_barriers(&self) -> u64 {
        self.stats.barriers.load(Ordering::Relaxed)
    }

    pub fn num_persist_failures(&self) -> u64 {
        self.stats.persist_failures.load(Ordering::Relaxed)
    }

    fn durability_barrier(&self, directory: &Path, files: &[PathBuf]) -> Result<(), CommitError> {
        for f in files {
            if let Err(e) = File::open(f).and_then(|f| f.sync_all()) {
                warn!("Could not sync {:?}: {}", f, e);
            }
        }

        File::open(directory)
            .and_then(|d| d.sync_all())
            .map_err(|e| CommitError::SyncFailed(directory.to_path_buf(), e))?;

        self.stats.barriers.fetch_add(1, Ordering::Relaxed);

        Ok(())
    }
}

impl StatusReporting for ChunkPersistenceEngine {
    fn name(&self) -> &str {
        "chunks"
    }

    fn status(&self) -> Value {
        let commits = self.num_commits();
        json!({
            "commits": commits,
            "barriers": self.num_barriers(),
            "persist_failures": self.num_persist_failures(),
            "last_chunk": if commits > 0 {
                Some(self.stats.last_chunk.load(Ordering::Relaxed))
            } else {
                None
            },
            "last_commit_duration_s":
                self.stats.last_commit_duration_us.load(Ordering::Relaxed) as f64 * 1e-6,
        })
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn check_directory(directory: &Path) -> Result<(), CommitError> {
    if directory.as_os_str().is_empty() {
        return Err(CommitError::EmptyDirectory);
    }

    let meta = fs::metadata(directory)
        .map_err(|e| CommitError::Inaccessible(directory.to_path_buf(), e))?;

    if !meta.is_dir() {
        return Err(CommitError::NotADirectory(directory.to_path_buf()));
    }

    if meta.permissions().readonly() {
        return Err(CommitError::ReadOnly(directory.to_path_buf()));
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::chunk::chunk_file_name;
    use crate::clients::{ChunkDumpable, DumpPayload, Logger, SensorClientHandle};
    use crate::timestamp::TimestampAuthority;
    use std::sync::Mutex;

    struct Numbers(Vec<u32>);

    impl DumpPayload for Numbers {
        fn len(&self) -> usize {
            self.0.len()
        }

        fn write_to(
            self: Box<Self>,
            directory: &Path,
            chunk_index: u64,
        ) -> Result<Vec<PathBuf>, PersistError> {
            let path = directory.join(chunk_file_name("numbers", chunk_index, "txt"));
            let text: Vec<String> = self.0.iter().map(|n| n.to_string()).collect();
            fs::write(&path, text.join("\n"))?;
            Ok(vec![path])
        }
    }

    /// Records the order of calls made on it.
    struct Recorder {
        name: &'static str,
        buffer: Mutex<Vec<u32>>,
        events: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    impl Recorder {
        fn new(name: &'static str, data: Vec<u32>, events: Arc<Mutex<Vec<String>>>) -> Arc<Self> {
            Arc::new(Self {
                name,
                buffer: Mutex::new(data),
                events,
                fail: false,
            })
        }

        fn failing(name: &'static str, data: Vec<u32>, events: Arc<Mutex<Vec<String>>>) -> Arc<Self> {
            Arc::new(Self {
                name,
                buffer: Mutex::new(data),
                events,
                fail: true,
            })
        }

        fn log(&self, what: &str) {
            self.events.lock().unwrap().push(format!("{}:{}", self.name, what));
        }
    }

    impl Logger for Recorder {
        fn start_logging(&self) {
            self.log("start");
        }

        fn stop_logging(&self) {
            self.log("stop");
        }
    }

    impl ChunkDumpable for Recorder {
        fn freeze(&self) -> PendingDump {
            self.log("freeze");
            let data = std::mem::take(&mut *self.buffer.lock().unwrap());
            PendingDump::new(self.name, Numbers(data))
        }

        fn persist(
            &self,
            dump: PendingDump,
            directory: &Path,
            chunk_index: u64,
        ) -> Result<Vec<PathBuf>, PersistError> {
            self.log("persist");
            if self.fail {
                return Err(PersistError::Unavailable(String::from("disk on fire")));
            }
            dump.write_to(directory, chunk_index)
        }
    }

    fn registry() -> Arc<SensorRegistry> {
        Arc::new(SensorRegistry::new(Arc::new(TimestampAuthority::new())))
    }

    fn attach(registry: &SensorRegistry, client: &Arc<Recorder>) {
        registry.attach(
            SensorClientHandle::new(client.name)
                .logger(client.clone())
                .dumpable(client.clone()),
        );
    }

    #[test]
    fn test_commit_without_clients() {
        let dir = tempfile::tempdir().unwrap();
        let engine = ChunkPersistenceEngine::new(registry());

        let report = engine.commit(dir.path(), 0, false).unwrap();
        assert!(report.files.is_empty());
        assert_eq!(engine.num_barriers(), 1);
        assert_eq!(engine.num_commits(), 1);

        engine.commit(dir.path(), 1, true).unwrap();
        assert_eq!(engine.num_barriers(), 2);
    }

    #[test]
    fn test_empty_directory_touches_nothing() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let reg = registry();
        let client = Recorder::new("a", vec![1, 2, 3], events.clone());
        attach(&reg, &client);
        let engine = ChunkPersistenceEngine::new(reg);

        match engine.commit(Path::new(""), 0, true) {
            Err(CommitError::EmptyDirectory) => (),
            r => panic!("Expected EmptyDirectory, got {:?}", r),
        }
        match engine.commit(Path::new("/no/such/scan/dir"), 0, true) {
            Err(CommitError::Inaccessible(..)) => (),
            r => panic!("Expected Inaccessible, got {:?}", r),
        }

        assert!(events.lock().unwrap().is_empty());
        assert_eq!(client.buffer.lock().unwrap().len(), 3);
        assert_eq!(engine.num_commits(), 0);
        assert_eq!(engine.num_barriers(), 0);
    }

    #[test]
    fn test_freeze_before_stop() {
        let dir = tempfile::tempdir().unwrap();
        let events = Arc::new(Mutex::new(Vec::new()));
        let reg = registry();
        let a = Recorder::new("a", vec![1], events.clone());
        let b = Recorder::new("b", vec![2], events.clone());
        attach(&reg, &a);
        attach(&reg, &b);
        let engine = ChunkPersistenceEngine::new(reg);

        engine.commit(dir.path(), 4, true).unwrap();

        let events = events.lock().unwrap();
        let last_freeze = events.iter().rposition(|e| e.ends_with(":freeze")).unwrap();
        let first_stop = events.iter().position(|e| e.ends_with(":stop")).unwrap();
        let first_persist = events.iter().position(|e| e.ends_with(":persist")).unwrap();
        assert!(last_freeze < first_stop);
        assert!(first_stop < first_persist);
    }

    #[test]
    fn test_failed_client_does_not_abort_others() {
        let dir = tempfile::tempdir().unwrap();
        let events = Arc::new(Mutex::new(Vec::new()));
        let reg = registry();
        let good = Recorder::new("good", vec![7, 8], events.clone());
        let bad = Recorder::failing("bad", vec![9], events.clone());
        attach(&reg, &bad);
        attach(&reg, &good);
        let engine = ChunkPersistenceEngine::new(reg);

        let report = engine.commit(dir.path(), 2, false).unwrap();

        assert_eq!(report.failed_clients, vec![String::from("bad")]);
        assert_eq!(report.files, vec![dir.path().join("numbers0002.txt")]);
        assert_eq!(fs::read_to_string(&report.files[0]).unwrap(), "7\n8");
        assert_eq!(engine.num_persist_failures(), 1);
        assert_eq!(engine.status()["persist_failures"], 1);
        assert_eq!(engine.status()["last_chunk"], 2);
    }

    #[test]
    fn test_empty_dumps_not_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let events = Arc::new(Mutex::new(Vec::new()));
        let reg = registry();
        let client = Recorder::new("a", Vec::new(), events.clone());
        attach(&reg, &client);
        let engine = ChunkPersistenceEngine::new(reg);

        let report = engine.commit(dir.path(), 0, false).unwrap();
        assert!(report.files.is_empty());
        assert_eq!(*events.lock().unwrap(), vec![String::from("a:freeze")]);
    }
}
