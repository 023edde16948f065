//! # GNSS client
//!
//! Stores raw NMEA sentences from the GNSS receiver, each one stamped with the
//! authoritative timestamp on receipt. The sentences themselves aren't
//! interpreted beyond a checksum count.
//!
//! The serial device must already be configured (baud rate etc.), the client
//! only reads lines from it.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use comms_if::eqpt::gnss::{nmea_checksum_ok, GnssLine};
use log::{info, warn};
use serde_json::{json, Value};
use util::time;

use super::{
    ChunkDumpable, DumpPayload, Logger, PendingDump, PersistError, StatusReporting,
    TimestampConsumer, TimestampProvider,
};
use crate::chunk::chunk_file_name;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

pub const GNSS_CLIENT_NAME: &str = "gnss";

const SIM_PERIOD: Duration = Duration::from_secs(1);

/// Wait before retrying a device that returned an error or end of file
const DEVICE_RETRY_PERIOD: Duration = Duration::from_millis(100);

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

pub struct GnssClient {
    logging: AtomicBool,
    buffer: Mutex<Vec<GnssLine>>,
    provider: Mutex<Option<Arc<dyn TimestampProvider>>>,
    num_lines: AtomicU64,
    num_bad_checksums: AtomicU64,
    last_sentence: Mutex<Option<String>>,
}

pub struct GnssDump(Vec<GnssLine>);

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum GnssClientError {
    #[error("Could not open GNSS device {0:?}: {1}")]
    DeviceOpenError(PathBuf, std::io::Error),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl GnssClient {
    pub fn new() -> Self {
        Self {
            logging: AtomicBool::new(false),
            buffer: Mutex::new(Vec::new()),
            provider: Mutex::new(None),
            num_lines: AtomicU64::new(0),
            num_bad_checksums: AtomicU64::new(0),
            last_sentence: Mutex::new(None),
        }
    }

    /// Current authoritative time, or the system clock if no provider is set.
    fn timestamp(&self) -> u64 {
        match &*lock(&self.provider) {
            Some(p) => p.timestamp(),
            None => time::system_time_ns(),
        }
    }

    /// Handle one line from the receiver.
    pub fn ingest_line(&self, line: &str) {
        let sentence = line.trim();
        if sentence.is_empty() {
            return;
        }

        self.num_lines.fetch_add(1, Ordering::Relaxed);
        if !nmea_checksum_ok(sentence) {
            self.num_bad_checksums.fetch_add(1, Ordering::Relaxed);
        }
        *lock(&self.last_sentence) = Some(sentence.to_string());

        if self.logging.load(Ordering::Acquire) {
            let timestamp_ns = self.timestamp();
            lock(&self.buffer).push(GnssLine {
                timestamp_ns,
                sentence: sentence.to_string(),
            });
        }
    }

    /// Read lines from `device` in a background thread.
    ///
    /// Reads block, so the thread only sees `shutdown` between lines.
    pub fn spawn_device_reader(
        self: &Arc<Self>,
        device: &Path,
        shutdown: Arc<AtomicBool>,
    ) -> Result<JoinHandle<()>, GnssClientError> {
        let file = File::open(device)
            .map_err(|e| GnssClientError::DeviceOpenError(device.to_path_buf(), e))?;

        info!("GNSS client reading from {:?}", device);

        let client = self.clone();
        Ok(thread::spawn(move || {
            let mut reader = BufReader::new(file);
            let mut line = String::new();

            while !shutdown.load(Ordering::Relaxed) {
                line.clear();
                match reader.read_line(&mut line) {
                    Ok(0) => thread::sleep(DEVICE_RETRY_PERIOD),
                    Ok(_) => client.ingest_line(&line),
                    Err(e) => {
                        warn!("GNSS read error: {}", e);
                        thread::sleep(DEVICE_RETRY_PERIOD);
                    }
                }
            }
        }))
    }

    /// Generate a GGA sentence every second until `shutdown` is set.
    pub fn spawn_simulator(self: &Arc<Self>, shutdown: Arc<AtomicBool>) -> JoinHandle<()> {
        let client = self.clone();
        thread::spawn(move || {
            let mut step: u64 = 0;
            while !shutdown.load(Ordering::Relaxed) {
                client.ingest_line(&sim_gga(step));
                step += 1;
                thread::sleep(SIM_PERIOD);
            }
        })
    }
}

impl Default for GnssClient {
    fn default() -> Self {
        Self::new()
    }
}

impl Logger for GnssClient {
    fn start_logging(&self) {
        if !self.logging.swap(true, Ordering::AcqRel) {
            lock(&self.buffer).clear();
        }
    }

    fn stop_logging(&self) {
        self.logging.store(false, Ordering::Release);
    }
}

impl ChunkDumpable for GnssClient {
    fn freeze(&self) -> PendingDump {
        let lines = std::mem::take(&mut *lock(&self.buffer));
        PendingDump::new(GNSS_CLIENT_NAME, GnssDump(lines))
    }
}

impl TimestampConsumer for GnssClient {
    fn set_timestamp_provider(&self, provider: Arc<dyn TimestampProvider>) {
        *lock(&self.provider) = Some(provider);
    }
}

impl StatusReporting for GnssClient {
    fn name(&self) -> &str {
        GNSS_CLIENT_NAME
    }

    fn status(&self) -> Value {
        json!({
            "logging": self.logging.load(Ordering::Acquire),
            "lines": self.num_lines.load(Ordering::Relaxed),
            "bad_checksums": self.num_bad_checksums.load(Ordering::Relaxed),
            "buffer": lock(&self.buffer).len(),
            "last_sentence": *lock(&self.last_sentence),
        })
    }
}

impl DumpPayload for GnssDump {
    fn len(&self) -> usize {
        self.0.len()
    }

    fn write_to(self: Box<Self>, directory: &Path, chunk_index: u64) -> Result<Vec<PathBuf>, PersistError> {
        let path = directory.join(chunk_file_name("gnss", chunk_index, "gnss"));

        let mut w = BufWriter::new(File::create(&path)?);
        for line in self.0.iter() {
            writeln!(w, "{} {}", line.timestamp_ns, line.sentence)?;
        }
        w.flush()?;

        Ok(vec![path])
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// A fix drifting slowly north, with a valid checksum.
fn sim_gga(step: u64) -> String {
    let secs = step % 86_400;
    let body = format!(
        "GPGGA,{:02}{:02}{:02}.000,5321.{:04},N,00630.3372,W,1,8,1.03,61.7,M,55.2,M,,",
        secs / 3600,
        (secs / 60) % 60,
        secs % 60,
        step % 10_000
    );
    let sum = body.bytes().fold(0u8, |acc, b| acc ^ b);
    format!("${}*{:02X}", body, sum)
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

#[cfg(test)]
mod test {
    use super::*;
    use std::fs;

    struct FixedClock(u64);

    impl TimestampProvider for FixedClock {
        fn timestamp(&self) -> u64 {
            self.0
        }
    }

    #[test]
    fn test_lines_stamped_by_provider() {
        let dir = tempfile::tempdir().unwrap();
        let gnss = GnssClient::new();
        gnss.set_timestamp_provider(Arc::new(FixedClock(42)));

        gnss.ingest_line("$GPTXT,before");
        gnss.start_logging();
        gnss.ingest_line(&sim_gga(1));
        gnss.ingest_line("\r\n");

        let dump = gnss.freeze();
        assert_eq!(dump.len(), 1);
        dump.write_to(dir.path(), 3).unwrap();

        let text = fs::read_to_string(dir.path().join("gnss0003.gnss")).unwrap();
        assert_eq!(text, format!("42 {}\n", sim_gga(1)));

        let status = gnss.status();
        assert_eq!(status["lines"], 2);
        assert_eq!(status["bad_checksums"], 0);
    }

    #[test]
    fn test_sim_gga_checksum() {
        for step in [0u64, 59, 3661].iter() {
            assert!(nmea_checksum_ok(&sim_gga(*step)));
        }
    }
}
