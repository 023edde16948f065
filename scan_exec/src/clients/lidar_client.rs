//! # LiDAR client
//!
//! Accumulates points and IMU samples from one or more LiDARs, and is the
//! primary source of the [`TimestampAuthority`].
//!
//! Data arrives as datagrams from the LiDAR bridge (see
//! [`comms_if::eqpt::lidar`]), or from a built in simulator. Each LiDAR is
//! identified by its serial number, and given a small numeric id which is
//! written alongside every record. Configured serials take ids 0, 1, ... in
//! sorted order. Serials first seen at runtime take the next free id in
//! arrival order, since ids already written to a chunk can't change. At most
//! [`MAX_LIDARS`] serials are tracked, packets from any others are dropped.
//!
//! Repeated socket errors on the listener are reported as a sensor failure.
//!
//! Chunk files:
//!
//! - `lidarNNNN.csv` - `timestamp x y z reflectivity tag lidar_id`
//! - `imuNNNN.csv` - `timestamp gyro_x gyro_y gyro_z acc_x acc_y acc_z lidar_id`
//! - `lidarNNNN.sn` - `lidar_id serial_number`

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::collections::BTreeMap;
use std::net::{SocketAddr, UdpSocket};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use comms_if::eqpt::lidar::{
    ImuSample, LidarPacket, LidarPayload, LidarPoint, RawImu, RawPoint,
};
use log::{debug, error, info, warn};
use serde::Serialize;
use serde_json::{json, Value};

use super::{chunk_csv_writer, ChunkDumpable, DumpPayload, Logger, PendingDump, PersistError, StatusReporting};
use crate::chunk::chunk_file_name;
use crate::timestamp::TimestampAuthority;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

pub const LIDAR_CLIENT_NAME: &str = "lidar";

/// Serial simulated when none are configured
pub const SIM_LIDAR_SERIAL: &str = "SIM0000000000001";

/// Largest datagram the bridge sends
const MAX_DATAGRAM_LEN: usize = 65_507;

const SOCKET_READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Most LiDARs tracked at once
pub const MAX_LIDARS: usize = 16;

/// Socket errors in a row before the listener gives up
const MAX_CONSECUTIVE_SOCKET_ERRORS: u32 = 10;

/// Simulated packet period
const SIM_PERIOD: Duration = Duration::from_millis(10);

const SIM_POINTS_PER_PACKET: usize = 96;

/// Offset of the simulated sensor clock, so it visibly differs from the
/// system clock
const SIM_CLOCK_BASE_NS: u64 = 3_600_000_000_000;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

pub struct LidarClient {
    authority: Arc<TimestampAuthority>,
    logging: AtomicBool,
    init_success: AtomicBool,
    buffers: Mutex<Buffers>,
    lidars: Mutex<BTreeMap<String, LidarStats>>,
    decode_errors: AtomicU64,
    rejected_packets: AtomicU64,
}

/// Counts socket errors in a row.
#[derive(Debug, Default)]
struct SocketErrors {
    consecutive: u32,
}

#[derive(Default)]
struct Buffers {
    points: Vec<LidarPoint>,
    imu: Vec<ImuSample>,
}

#[derive(Debug, Clone, Default, Serialize)]
struct LidarStats {
    id: u16,
    point_packets: u64,
    imu_packets: u64,
    last_timestamp_ns: u64,
}

/// Frozen LiDAR buffers.
pub struct LidarDump {
    points: Vec<LidarPoint>,
    imu: Vec<ImuSample>,
    serials: Vec<(u16, String)>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum LidarClientError {
    #[error("Could not bind the LiDAR socket to {0}: {1}")]
    BindError(SocketAddr, std::io::Error),

    #[error("Could not configure the LiDAR socket: {0}")]
    SocketConfigError(std::io::Error),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl LidarClient {
    /// Create the client, making it the primary source of `authority`.
    ///
    /// `known_serials` are given ids in sorted order, starting at 0. Serials
    /// first seen later are given the next free id.
    pub fn new(authority: Arc<TimestampAuthority>, known_serials: &[String]) -> Self {
        authority.designate_primary(LIDAR_CLIENT_NAME);

        let mut sorted = known_serials.to_vec();
        sorted.sort();
        sorted.dedup();
        if sorted.len() > MAX_LIDARS {
            warn!("Only the first {} of {} LiDAR serials are used", MAX_LIDARS, sorted.len());
            sorted.truncate(MAX_LIDARS);
        }

        let lidars = sorted
            .into_iter()
            .enumerate()
            .map(|(id, sn)| {
                (
                    sn,
                    LidarStats {
                        id: id as u16,
                        ..Default::default()
                    },
                )
            })
            .collect();

        Self {
            authority,
            logging: AtomicBool::new(false),
            init_success: AtomicBool::new(false),
            buffers: Mutex::new(Buffers::default()),
            lidars: Mutex::new(lidars),
            decode_errors: AtomicU64::new(0),
            rejected_packets: AtomicU64::new(0),
        }
    }

    pub fn is_logging(&self) -> bool {
        self.logging.load(Ordering::Acquire)
    }

    pub fn init_success(&self) -> bool {
        self.init_success.load(Ordering::Relaxed)
    }

    /// Id of a LiDAR, assigning a new one if the serial is unknown. `None` once
    /// [`MAX_LIDARS`] serials are tracked.
    pub fn lidar_id(&self, serial: &str) -> Option<u16> {
        let mut lidars = lock(&self.lidars);
        if let Some(s) = lidars.get(serial) {
            return Some(s.id);
        }

        if lidars.len() >= MAX_LIDARS {
            return None;
        }

        let id = lidars.len() as u16;
        info!("New LiDAR {} given id {}", serial, id);
        lidars.insert(
            serial.to_string(),
            LidarStats {
                id,
                ..Default::default()
            },
        );
        Some(id)
    }

    /// Handle a decoded packet.
    pub fn ingest(&self, packet: &LidarPacket) {
        let id = match self.lidar_id(&packet.serial) {
            Some(id) => id,
            None => {
                self.rejected_packets.fetch_add(1, Ordering::Relaxed);
                debug!("Dropping packet from untracked LiDAR {}", packet.serial);
                return;
            }
        };

        {
            let mut lidars = lock(&self.lidars);
            if let Some(stats) = lidars.get_mut(&packet.serial) {
                match packet.payload {
                    LidarPayload::Points(_) => stats.point_packets += 1,
                    LidarPayload::Imu(_) => stats.imu_packets += 1,
                }
                stats.last_timestamp_ns = packet.timestamp_ns;
            }
        }

        // The sensor reports a zero timestamp until its clock is running
        if packet.timestamp_ns == 0 {
            return;
        }

        // The first sample fixes the clock offset, logging or not
        let base_ns = self.authority.correct(packet.timestamp_ns);

        if !self.is_logging() {
            return;
        }

        let mut buffers = lock(&self.buffers);
        match &packet.payload {
            LidarPayload::Points(points) => {
                buffers.points.extend(points.iter().map(|p| to_point(p, base_ns, id)))
            }
            LidarPayload::Imu(samples) => {
                buffers.imu.extend(samples.iter().map(|s| to_imu(s, base_ns, id)))
            }
        }
    }

    /// Receive datagrams on `addr` in a background thread until `shutdown`
    /// is set. Returns the thread and the address actually bound.
    ///
    /// `on_failure` is called, and the thread ends, if the socket keeps
    /// failing.
    pub fn spawn_udp_listener<F>(
        self: &Arc<Self>,
        addr: SocketAddr,
        shutdown: Arc<AtomicBool>,
        on_failure: F,
    ) -> Result<(JoinHandle<()>, SocketAddr), LidarClientError>
    where
        F: Fn() + Send + 'static,
    {
        let socket = UdpSocket::bind(addr).map_err(|e| LidarClientError::BindError(addr, e))?;
        socket
            .set_read_timeout(Some(SOCKET_READ_TIMEOUT))
            .map_err(LidarClientError::SocketConfigError)?;
        let local_addr = socket
            .local_addr()
            .map_err(LidarClientError::SocketConfigError)?;

        info!("LiDAR client listening on {}", local_addr);
        self.init_success.store(true, Ordering::Relaxed);

        let client = self.clone();
        let handle = thread::spawn(move || {
            let mut buf = vec![0u8; MAX_DATAGRAM_LEN];
            let mut errors = SocketErrors::default();

            while !shutdown.load(Ordering::Relaxed) {
                let len = match socket.recv_from(&mut buf) {
                    Ok((len, _)) => len,
                    Err(e)
                        if e.kind() == std::io::ErrorKind::WouldBlock
                            || e.kind() == std::io::ErrorKind::TimedOut =>
                    {
                        continue
                    }
                    Err(e) => {
                        warn!("LiDAR socket error: {}", e);
                        if errors.record_error() {
                            error!("LiDAR socket failed {} times in a row", errors.consecutive);
                            client.init_success.store(false, Ordering::Relaxed);
                            on_failure();
                            return;
                        }
                        continue;
                    }
                };
                errors.record_ok();

                match LidarPacket::decode(&buf[..len]) {
                    Ok(p) => client.ingest(&p),
                    Err(e) => {
                        client.decode_errors.fetch_add(1, Ordering::Relaxed);
                        debug!("Dropping LiDAR datagram: {}", e);
                    }
                }
            }
        });

        Ok((handle, local_addr))
    }

    /// Generate data for the given serials in a background thread until
    /// `shutdown` is set.
    pub fn spawn_simulator(self: &Arc<Self>, serials: Vec<String>, shutdown: Arc<AtomicBool>) -> JoinHandle<()> {
        self.init_success.store(true, Ordering::Relaxed);

        let client = self.clone();
        thread::spawn(move || {
            let start = Instant::now();
            let mut step: u64 = 0;

            while !shutdown.load(Ordering::Relaxed) {
                let sensor_ns = SIM_CLOCK_BASE_NS + start.elapsed().as_nanos() as u64;

                for serial in serials.iter() {
                    for packet in sim_packets(serial, sensor_ns, step) {
                        client.ingest(&packet);
                    }
                }

                step += 1;
                thread::sleep(SIM_PERIOD);
            }
        })
    }
}

impl SocketErrors {
    /// Record an error, returning `true` once too many have happened in a row.
    fn record_error(&mut self) -> bool {
        self.consecutive += 1;
        self.consecutive >= MAX_CONSECUTIVE_SOCKET_ERRORS
    }

    fn record_ok(&mut self) {
        self.consecutive = 0;
    }
}

impl Logger for LidarClient {
    fn start_logging(&self) {
        if !self.logging.swap(true, Ordering::AcqRel) {
            *lock(&self.buffers) = Buffers::default();
            info!("LiDAR logging started");
        }
    }

    fn stop_logging(&self) {
        if self.logging.swap(false, Ordering::AcqRel) {
            info!("LiDAR logging stopped");
        }
    }
}

impl ChunkDumpable for LidarClient {
    fn freeze(&self) -> PendingDump {
        let frozen = std::mem::take(&mut *lock(&self.buffers));

        let serials = lock(&self.lidars)
            .iter()
            .map(|(sn, s)| (s.id, sn.clone()))
            .collect();

        PendingDump::new(
            LIDAR_CLIENT_NAME,
            LidarDump {
                points: frozen.points,
                imu: frozen.imu,
                serials,
            },
        )
    }
}

impl StatusReporting for LidarClient {
    fn name(&self) -> &str {
        LIDAR_CLIENT_NAME
    }

    fn status(&self) -> Value {
        let (points, imu) = {
            let b = lock(&self.buffers);
            (b.points.len(), b.imu.len())
        };

        json!({
            "init_success": self.init_success(),
            "logging": self.is_logging(),
            "decode_errors": self.decode_errors.load(Ordering::Relaxed),
            "rejected_packets": self.rejected_packets.load(Ordering::Relaxed),
            "buffers": {
                "points": points,
                "imu": imu,
            },
            "lidars": *lock(&self.lidars),
        })
    }
}

impl DumpPayload for LidarDump {
    fn len(&self) -> usize {
        self.points.len() + self.imu.len()
    }

    fn write_to(self: Box<Self>, directory: &Path, chunk_index: u64) -> Result<Vec<PathBuf>, PersistError> {
        let mut files = Vec::new();

        if !self.points.is_empty() {
            let path = directory.join(chunk_file_name("lidar", chunk_index, "csv"));
            let mut wtr = chunk_csv_writer(&path)?;
            for p in self.points.iter() {
                wtr.serialize((
                    p.timestamp_ns,
                    p.x_mm as f64 * 1e-3,
                    p.y_mm as f64 * 1e-3,
                    p.z_mm as f64 * 1e-3,
                    p.reflectivity,
                    p.tag,
                    p.lidar_id,
                ))?;
            }
            wtr.flush()?;
            files.push(path);
        }

        if !self.imu.is_empty() {
            let path = directory.join(chunk_file_name("imu", chunk_index, "csv"));
            let mut wtr = chunk_csv_writer(&path)?;
            for s in self.imu.iter() {
                wtr.serialize((
                    s.timestamp_ns,
                    s.gyro[0],
                    s.gyro[1],
                    s.gyro[2],
                    s.acc[0],
                    s.acc[1],
                    s.acc[2],
                    s.lidar_id,
                ))?;
            }
            wtr.flush()?;
            files.push(path);
        }

        let path = directory.join(chunk_file_name("lidar", chunk_index, "sn"));
        let mut wtr = chunk_csv_writer(&path)?;
        for (id, sn) in self.serials.iter() {
            wtr.serialize((id, sn))?;
        }
        wtr.flush()?;
        files.push(path);

        Ok(files)
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn to_point(p: &RawPoint, base_ns: u64, lidar_id: u16) -> LidarPoint {
    LidarPoint {
        x_mm: p.x_mm,
        y_mm: p.y_mm,
        z_mm: p.z_mm,
        reflectivity: p.reflectivity,
        tag: p.tag,
        timestamp_ns: base_ns.saturating_add(p.offset_ns as u64),
        lidar_id,
    }
}

fn to_imu(s: &RawImu, base_ns: u64, lidar_id: u16) -> ImuSample {
    ImuSample {
        gyro: s.gyro,
        acc: s.acc,
        timestamp_ns: base_ns.saturating_add(s.offset_ns as u64),
        lidar_id,
    }
}

/// One point packet on a slowly rotating ring, and one IMU sample.
fn sim_packets(serial: &str, sensor_ns: u64, step: u64) -> [LidarPacket; 2] {
    let phase = (step % 360) as f64 * std::f64::consts::PI / 180.0;

    let points = (0..SIM_POINTS_PER_PACKET)
        .map(|i| {
            let a = phase + i as f64 * 2.0 * std::f64::consts::PI / SIM_POINTS_PER_PACKET as f64;
            RawPoint {
                x_mm: (5000.0 * a.cos()) as i32,
                y_mm: (5000.0 * a.sin()) as i32,
                z_mm: ((i % 8) as i32 - 4) * 100,
                reflectivity: (i % 256) as u8,
                tag: 0,
                offset_ns: (i as u32) * 1000,
            }
        })
        .collect();

    let imu = vec![RawImu {
        gyro: [0.0, 0.0, 0.01],
        acc: [0.0, 0.0, 1.0],
        offset_ns: 0,
    }];

    [
        LidarPacket {
            serial: serial.to_string(),
            timestamp_ns: sensor_ns,
            payload: LidarPayload::Points(points),
        },
        LidarPacket {
            serial: serial.to_string(),
            timestamp_ns: sensor_ns,
            payload: LidarPayload::Imu(imu),
        },
    ]
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}
