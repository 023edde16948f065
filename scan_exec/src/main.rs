//! Scan rig executable entry point.
//!
//! # Architecture
//!
//! - Initialise the session, logging and parameters
//! - Build the core: timestamp authority, sensor registry, chunk engine and
//!   scan controller
//! - Start every sensor client and attach it to the registry
//! - Start the HTTP server and console reader
//! - Main loop: tick the controller until shutdown is requested
//! - Commit any open continuous scan, join every thread and save the final
//!   status

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use color_eyre::{eyre::WrapErr, Report};
use log::{error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

// Internal
use scan_lib::{
    chunk::ChunkPersistenceEngine,
    cli::{spawn_console_reader, TerminalKeys},
    clients::{
        cam_client::{CamerasClient, SimFrameSource, CAMERAS_CLIENT_NAME},
        fs_client::{FsClient, FS_CLIENT_NAME},
        gnss_client::{GnssClient, GNSS_CLIENT_NAME},
        gpio_client::{GpioClient, GPIO_CLIENT_NAME},
        lidar_client::{LidarClient, LIDAR_CLIENT_NAME, SIM_LIDAR_SERIAL},
        SensorClientHandle, SensorRegistry,
    },
    http_server::{spawn_http_server, HttpState},
    params::ScanExecParams,
    scan_ctrl::ScanController,
    status::StatusBoard,
    timestamp::TimestampAuthority,
};
use util::{
    host,
    logger::{logger_init, LevelFilter},
    session::Session,
};

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Executable main function, entry point.
fn main() -> Result<(), Report> {
    // ---- EARLY INITIALISATION ----

    // Initialise session
    let session = Session::new("scan_exec", "sessions").wrap_err("Failed to create the session")?;

    // Initialise logger
    logger_init(LevelFilter::Debug, &session).wrap_err("Failed to initialise logging")?;

    // Log information on this execution.
    info!("Scan Rig Executable\n");
    info!(
        "Running on: {:#?}",
        host::get_uname().wrap_err("Failed to get host information")?
    );
    info!("Session directory: {:?}\n", session.session_root);

    // ---- LOAD PARAMETERS ----

    let mut params: ScanExecParams = match util::params::load("scan_exec.toml") {
        Ok(p) => p,
        Err(e) => {
            warn!("Could not load scan_exec.toml ({}), using defaults", e);
            ScanExecParams::default()
        }
    };
    params
        .apply_env_overrides()
        .wrap_err("Invalid environment override")?;
    params.validate().wrap_err("Invalid parameters")?;
    session.save("params.json", params.clone());

    info!("Parameters loaded");

    // ---- INITIALISE CORE ----

    let shutdown = Arc::new(AtomicBool::new(false));
    let mut threads: Vec<JoinHandle<()>> = Vec::new();

    let authority = Arc::new(TimestampAuthority::new());
    let registry = Arc::new(SensorRegistry::new(authority.clone()));
    let engine = Arc::new(ChunkPersistenceEngine::new(registry.clone()));

    let fs_client = Arc::new(FsClient::new(&params.storage_root));
    registry.attach(SensorClientHandle::new(FS_CLIENT_NAME).reporter(fs_client.clone()));

    let gpio = match GpioClient::new(params.simulated_hardware) {
        Ok(g) => g,
        Err(e) => {
            warn!("GPIO unavailable ({}), simulating the front panel", e);
            GpioClient::new(true).wrap_err("Failed to initialise the simulated GPIO")?
        }
    };
    let gpio = Arc::new(gpio);

    let mut ctrl = ScanController::new(
        params.controller.clone(),
        registry.clone(),
        engine.clone(),
        fs_client,
        Some(gpio.clone()),
    );
    let scan_handle = ctrl.handle();

    info!("Core initialised");

    // ---- INITIALISE CLIENTS ----

    // The panel only becomes available once it has shown it works
    threads.push({
        let gpio = gpio.clone();
        let registry = registry.clone();
        let commands = scan_handle.sender();
        let shutdown = shutdown.clone();
        thread::spawn(move || {
            gpio.led_dance();
            registry.attach(SensorClientHandle::new(GPIO_CLIENT_NAME).reporter(gpio.clone()));
            info!("GPIO client attached");

            if gpio.spawn_button_thread(commands, shutdown).join().is_err() {
                error!("GPIO button thread panicked");
            }
        })
    });

    let lidar = Arc::new(LidarClient::new(authority.clone(), &params.lidar_serials));
    if params.simulated_hardware {
        let serials = if params.lidar_serials.is_empty() {
            vec![String::from(SIM_LIDAR_SERIAL)]
        } else {
            params.lidar_serials.clone()
        };
        threads.push(lidar.spawn_simulator(serials, shutdown.clone()));
    } else {
        let on_failure = {
            let handle = ctrl.handle();
            let ignore = params.ignore_lidar_error;
            move || {
                if ignore {
                    warn!("LiDAR listener stopped, ignoring the failure");
                } else {
                    handle.report_sensor_failure();
                }
            }
        };
        match lidar.spawn_udp_listener(params.lidar_listen_addr, shutdown.clone(), on_failure) {
            Ok((handle, _)) => threads.push(handle),
            Err(e) if params.ignore_lidar_error => {
                warn!("LiDAR unavailable, using the system clock: {}", e)
            }
            Err(e) => {
                error!("LiDAR initialisation failed: {}", e);
                ctrl.report_sensor_failure();
            }
        }
    }
    registry.attach(
        SensorClientHandle::new(LIDAR_CLIENT_NAME)
            .logger(lidar.clone())
            .dumpable(lidar.clone())
            .reporter(lidar),
    );
    info!("LiDAR client attached");

    let gnss = Arc::new(GnssClient::new());
    let gnss_running = if params.simulated_hardware {
        threads.push(gnss.spawn_simulator(shutdown.clone()));
        true
    } else if let Some(device) = params.gnss_device() {
        // Blocking reads, so the reader is left detached
        match gnss.spawn_device_reader(device, shutdown.clone()) {
            Ok(_) => true,
            Err(e) => {
                warn!("GNSS unavailable: {}", e);
                false
            }
        }
    } else {
        false
    };
    if gnss_running {
        registry.attach(
            SensorClientHandle::new(GNSS_CLIENT_NAME)
                .logger(gnss.clone())
                .dumpable(gnss.clone())
                .reporter(gnss.clone())
                .timestamp_consumer(gnss),
        );
        info!("GNSS client attached");
    }

    if !params.camera_indexes.is_empty() {
        let cameras = Arc::new(CamerasClient::new());
        for index in params.camera_indexes.iter().copied() {
            let capture = if params.simulated_hardware {
                Some(cameras.spawn_capture(index, SimFrameSource::new(index), shutdown.clone()))
            } else {
                spawn_camera(&cameras, index, &shutdown)
            };
            threads.extend(capture);
        }
        registry.attach(
            SensorClientHandle::new(CAMERAS_CLIENT_NAME)
                .logger(cameras.clone())
                .dumpable(cameras.clone())
                .reporter(cameras.clone())
                .timestamp_consumer(cameras),
        );
        info!("Cameras client attached");
    }

    // ---- INITIALISE COMMAND SURFACES ----

    let board = StatusBoard::new(ctrl.state_cell(), registry.clone())
        .with_reporter(engine)
        .with_reporter(authority);

    let (http_thread, _) = spawn_http_server(
        params.http_addr,
        HttpState {
            board: board.clone(),
            handle: scan_handle.clone(),
        },
        shutdown.clone(),
    )
    .wrap_err("Failed to start the HTTP server")?;
    threads.push(http_thread);

    match TerminalKeys::new() {
        Ok(keys) => threads.push(spawn_console_reader(
            keys,
            scan_handle,
            board.clone(),
            shutdown.clone(),
        )),
        Err(e) => warn!("No console commands, could not open the terminal: {}", e),
    }

    // ---- MAIN LOOP ----

    info!("Beginning main loop\n");

    while !shutdown.load(Ordering::Relaxed) {
        // Get cycle start time
        let cycle_start_instant = Instant::now();

        let period = ctrl.tick(cycle_start_instant);

        // ---- CYCLE MANAGEMENT ----

        let cycle_dur = Instant::now() - cycle_start_instant;

        // Get sleep duration
        match period.checked_sub(cycle_dur) {
            Some(d) => thread::sleep(d),
            None => warn!(
                "Cycle overran by {:.06} s",
                cycle_dur.as_secs_f64() - period.as_secs_f64()
            ),
        }
    }

    // ---- SHUTDOWN ----

    info!("Shutting down");

    if ctrl.stop_scan() {
        info!("Committing the final continuous chunk");
        ctrl.tick(Instant::now());
    }

    shutdown.store(true, Ordering::Relaxed);
    registry.broadcast_stop();

    for t in threads {
        if t.join().is_err() {
            warn!("A thread panicked before shutdown");
        }
    }

    session.save("final_status.json", board.document());

    info!("End of execution");

    session.exit();

    Ok(())
}

/// Start capturing from a V4L2 camera.
#[cfg(feature = "v4l")]
fn spawn_camera(
    cameras: &Arc<CamerasClient>,
    index: u32,
    shutdown: &Arc<AtomicBool>,
) -> Option<JoinHandle<()>> {
    use scan_lib::clients::cam_client::V4lFrameSource;

    match V4lFrameSource::open(index) {
        Ok(source) => Some(cameras.spawn_capture(index, source, shutdown.clone())),
        Err(e) => {
            warn!("Could not open camera {}: {}", index, e);
            None
        }
    }
}

/// Built without V4L2 support, so real cameras can't be used.
#[cfg(not(feature = "v4l"))]
fn spawn_camera(
    _cameras: &Arc<CamerasClient>,
    index: u32,
    _shutdown: &Arc<AtomicBool>,
) -> Option<JoinHandle<()>> {
    warn!("Camera {} skipped, built without the v4l feature", index);
    None
}
