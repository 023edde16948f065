//! # Cameras client
//!
//! Grabs frames from each configured camera while logging, stamps them with
//! the authoritative timestamp and keeps them JPEG encoded until the next
//! chunk commit. A frame is only kept if the timestamp advanced since the
//! camera's previous frame.
//!
//! Frames come from V4L2 devices (`/dev/videoN`) when the `v4l` feature is
//! enabled, otherwise from a generated test pattern.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use comms_if::eqpt::cam::StampedFrame;
use image::{DynamicImage, ImageBuffer, Rgb};
use log::{info, warn};
use serde_json::{json, Value};
use util::time;

use super::{
    chunk_csv_writer, ChunkDumpable, DumpPayload, Logger, PendingDump, PersistError,
    StatusReporting, TimestampConsumer, TimestampProvider,
};
use crate::chunk::chunk_file_name;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

pub const CAMERAS_CLIENT_NAME: &str = "cameras";

const GRAB_PERIOD: Duration = Duration::from_millis(200);

const JPEG_QUALITY: u8 = 85;

const SIM_WIDTH: u32 = 320;

const SIM_HEIGHT: u32 = 240;

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// Something which produces frames for one camera.
pub trait FrameSource: Send {
    fn grab(&mut self) -> Result<DynamicImage, CamerasClientError>;
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

pub struct CamerasClient {
    logging: AtomicBool,
    buffer: Mutex<Vec<StampedFrame>>,
    provider: Mutex<Option<Arc<dyn TimestampProvider>>>,
    last_timestamps: Mutex<BTreeMap<u32, u64>>,
    num_grabbed: AtomicU64,
    num_stale: AtomicU64,
    num_errors: AtomicU64,
}

pub struct CamerasDump(Vec<StampedFrame>);

/// Moving colour bars.
pub struct SimFrameSource {
    camera: u32,
    step: u32,
}

#[cfg(feature = "v4l")]
pub struct V4lFrameSource {
    camera: rscam::Camera,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum CamerasClientError {
    #[error("Could not encode frame: {0}")]
    EncodeError(image::ImageError),

    #[cfg(feature = "v4l")]
    #[error("Camera device error: {0}")]
    DeviceError(std::io::Error),

    #[cfg(feature = "v4l")]
    #[error("Could not start camera: {0}")]
    StartError(rscam::Error),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl CamerasClient {
    pub fn new() -> Self {
        Self {
            logging: AtomicBool::new(false),
            buffer: Mutex::new(Vec::new()),
            provider: Mutex::new(None),
            last_timestamps: Mutex::new(BTreeMap::new()),
            num_grabbed: AtomicU64::new(0),
            num_stale: AtomicU64::new(0),
            num_errors: AtomicU64::new(0),
        }
    }

    pub fn is_logging(&self) -> bool {
        self.logging.load(Ordering::Acquire)
    }

    fn timestamp(&self) -> u64 {
        match &*lock(&self.provider) {
            Some(p) => p.timestamp(),
            None => time::system_time_ns(),
        }
    }

    /// Stamp and keep a frame from `camera`, if logging.
    ///
    /// Returns true if the frame was kept.
    pub fn record(&self, camera: u32, image: &DynamicImage) -> Result<bool, CamerasClientError> {
        if !self.is_logging() {
            return Ok(false);
        }

        let timestamp_ns = self.timestamp();

        {
            let mut last = lock(&self.last_timestamps);
            let prev = last.entry(camera).or_insert(0);
            if timestamp_ns <= *prev {
                self.num_stale.fetch_add(1, Ordering::Relaxed);
                return Ok(false);
            }
            *prev = timestamp_ns;
        }

        let frame = StampedFrame::from_dyn_image(camera, timestamp_ns, image, JPEG_QUALITY)
            .map_err(CamerasClientError::EncodeError)?;

        self.num_grabbed.fetch_add(1, Ordering::Relaxed);
        lock(&self.buffer).push(frame);

        Ok(true)
    }

    /// Grab from `source` in a background thread until `shutdown` is set.
    pub fn spawn_capture<S: FrameSource + 'static>(
        self: &Arc<Self>,
        camera: u32,
        mut source: S,
        shutdown: Arc<AtomicBool>,
    ) -> JoinHandle<()> {
        info!("Starting capture from camera {}", camera);

        let client = self.clone();
        thread::spawn(move || {
            while !shutdown.load(Ordering::Relaxed) {
                if client.is_logging() {
                    let res = source.grab().and_then(|img| client.record(camera, &img));
                    if let Err(e) = res {
                        client.num_errors.fetch_add(1, Ordering::Relaxed);
                        warn!("Camera {} frame lost: {}", camera, e);
                    }
                }
                thread::sleep(GRAB_PERIOD);
            }
        })
    }
}

impl Default for CamerasClient {
    fn default() -> Self {
        Self::new()
    }
}

impl Logger for CamerasClient {
    fn start_logging(&self) {
        if !self.logging.swap(true, Ordering::AcqRel) {
            lock(&self.buffer).clear();
        }
    }

    fn stop_logging(&self) {
        self.logging.store(false, Ordering::Release);
    }
}

impl ChunkDumpable for CamerasClient {
    fn freeze(&self) -> PendingDump {
        let frames = std::mem::take(&mut *lock(&self.buffer));
        PendingDump::new(CAMERAS_CLIENT_NAME, CamerasDump(frames))
    }
}

impl TimestampConsumer for CamerasClient {
    fn set_timestamp_provider(&self, provider: Arc<dyn TimestampProvider>) {
        *lock(&self.provider) = Some(provider);
    }
}

impl StatusReporting for CamerasClient {
    fn name(&self) -> &str {
        CAMERAS_CLIENT_NAME
    }

    fn status(&self) -> Value {
        json!({
            "logging": self.is_logging(),
            "frames": self.num_grabbed.load(Ordering::Relaxed),
            "stale_frames": self.num_stale.load(Ordering::Relaxed),
            "errors": self.num_errors.load(Ordering::Relaxed),
            "buffer": lock(&self.buffer).len(),
            "last_timestamps": *lock(&self.last_timestamps),
        })
    }
}

impl DumpPayload for CamerasDump {
    fn len(&self) -> usize {
        self.0.len()
    }

    fn write_to(self: Box<Self>, directory: &Path, chunk_index: u64) -> Result<Vec<PathBuf>, PersistError> {
        let mut files = Vec::with_capacity(self.0.len() + 1);

        let index_path = directory.join(chunk_file_name("camera", chunk_index, "csv"));
        let mut index = chunk_csv_writer(&index_path)?;

        for frame in self.0.iter() {
            let name = frame.file_name(chunk_index);
            let path = directory.join(&name);
            fs::write(&path, &frame.jpeg)?;
            index.serialize((frame.timestamp_ns, frame.camera, name))?;
            files.push(path);
        }

        index.flush()?;
        files.push(index_path);

        Ok(files)
    }
}

impl SimFrameSource {
    pub fn new(camera: u32) -> Self {
        Self { camera, step: 0 }
    }
}

impl FrameSource for SimFrameSource {
    fn grab(&mut self) -> Result<DynamicImage, CamerasClientError> {
        let shift = self.step.wrapping_mul(4);
        let tint = (self.camera.wrapping_mul(60) % 256) as u8;
        self.step = self.step.wrapping_add(1);

        let img = ImageBuffer::from_fn(SIM_WIDTH, SIM_HEIGHT, |x, y| {
            let bar = (((x + shift) / 40) % 8) as u8;
            Rgb([bar.wrapping_mul(32), (y % 256) as u8, tint])
        });

        Ok(DynamicImage::ImageRgb8(img))
    }
}

#[cfg(feature = "v4l")]
impl V4lFrameSource {
    /// Open `/dev/video{index}` and start an MJPEG stream.
    pub fn open(index: u32) -> Result<Self, CamerasClientError> {
        let mut camera = rscam::Camera::new(&format!("/dev/video{}", index))
            .map_err(CamerasClientError::DeviceError)?;

        camera
            .start(&rscam::Config {
                interval: (1, 30),
                resolution: (640, 480),
                format: b"MJPG",
                ..Default::default()
            })
            .map_err(CamerasClientError::StartError)?;

        Ok(Self { camera })
    }
}

#[cfg(feature = "v4l")]
impl FrameSource for V4lFrameSource {
    fn grab(&mut self) -> Result<DynamicImage, CamerasClientError> {
        let frame = self.camera.capture().map_err(CamerasClientError::DeviceError)?;
        image::load_from_memory_with_format(&frame, image::ImageFormat::Jpeg)
            .map_err(CamerasClientError::EncodeError)
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

#[cfg(test)]
mod test {
    use super::*;

    struct Clock(AtomicU64);

    impl TimestampProvider for Clock {
        fn timestamp(&self) -> u64 {
            self.0.load(Ordering::SeqCst)
        }
    }

    #[test]
    fn test_stale_frames_dropped() {
        let cams = CamerasClient::new();
        let clock = Arc::new(Clock(AtomicU64::new(100)));
        cams.set_timestamp_provider(clock.clone());
        let img = SimFrameSource::new(0).grab().unwrap();

        assert!(!cams.record(0, &img).unwrap());

        cams.start_logging();
        assert!(cams.record(0, &img).unwrap());
        assert!(!cams.record(0, &img).unwrap());
        // Other cameras have their own history
        assert!(cams.record(1, &img).unwrap());

        clock.0.store(200, Ordering::SeqCst);
        assert!(cams.record(0, &img).unwrap());

        assert_eq!(cams.freeze().len(), 3);
        assert_eq!(cams.status()["stale_frames"], 1);
    }

    #[test]
    fn test_dump_writes_frames_and_index() {
        let dir = tempfile::tempdir().unwrap();
        let cams = CamerasClient::new();
        cams.set_timestamp_provider(Arc::new(Clock(AtomicU64::new(7))));
        cams.start_logging();

        let mut source = SimFrameSource::new(2);
        cams.record(2, &source.grab().unwrap()).unwrap();

        let files = cams.freeze().write_to(dir.path(), 1).unwrap();
        assert_eq!(
            files,
            vec![dir.path().join("camera0001_2_7.jpg"), dir.path().join("camera0001.csv")]
        );

        let index = fs::read_to_string(dir.path().join("camera0001.csv")).unwrap();
        assert_eq!(index, "7 2 camera0001_2_7.jpg\n");

        let img = image::open(dir.path().join("camera0001_2_7.jpg")).unwrap();
        assert_eq!(img.to_rgb8().dimensions(), (SIM_WIDTH, SIM_HEIGHT));
    }
}
