//! # Scan controller
//!
//! The [`ScanController`] is the state machine which runs the rig. It is
//! stepped by calling [`ScanController::tick`] from the main loop, which:
//!
//! 1. Applies every command queued since the last tick.
//! 2. Moves to `LidarError` if a sensor failure has been reported.
//! 3. Performs the work of the current state, working straight through any
//!    transient states (`StartingScan`, `Stopping`, `StartingStopScan`,
//!    `StoppingStopScan`).
//! 4. Updates the front panel LEDs.
//!
//! and returns how long the loop should wait before the next tick.
//!
//! Commands never set the state directly. Each one is a guarded transition
//! which only succeeds from an allowed state, a command that doesn't match
//! the current state is dropped.
//!
//! | From | Trigger | To |
//! |---|---|---|
//! | `WaitForResources` | mandatory clients attached, session allocated | `Idle` |
//! | `Idle` | `StartScan`, `TriggerContinuousScanning` | `StartingScan` |
//! | `Idle` | `TriggerStopScan` | `StartingStopScan` |
//! | `StartingScan` | loggers started | `Scanning` |
//! | `Scanning` | commit interval elapsed | `Scanning`, chunk committed |
//! | `Scanning` | `StopScan`, `TriggerContinuousScanning` | `Stopping` |
//! | `Stopping` | final chunk committed | `Idle` |
//! | `StartingStopScan` | deadlines armed | `StopScanInitialProgress` |
//! | `StopScanInitialProgress` | pre-roll elapsed, loggers started | `StopScanInProgress` |
//! | `StopScanInProgress` | capture duration elapsed | `StoppingStopScan` |
//! | `StoppingStopScan` | chunk committed | `Idle` |
//! | any | sensor failure reported | `LidarError` |
//! | any | session allocation or commit failed | `UsbIoError` |

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

mod params;
mod session;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};

use comms_if::cmd::ScanCmd;
use comms_if::eqpt::gpio::LedId;
use log::{debug, error, info};

pub use self::params::{InvalidPeriod, ScanCtrlParams};
pub use self::session::{ScanMode, ScanSession};

use crate::app_state::{AppState, AtomicAppState};
use crate::chunk::ChunkPersistenceEngine;
use crate::clients::fs_client::StorageAllocator;
use crate::clients::{Indicator, SensorRegistry};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Limit on the number of state steps in one tick
const MAX_STEPS_PER_TICK: usize = 8;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

pub struct ScanController {
    params: ScanCtrlParams,

    state: Arc<AtomicAppState>,

    registry: Arc<SensorRegistry>,

    engine: Arc<ChunkPersistenceEngine>,

    storage: Arc<dyn StorageAllocator>,

    indicator: Option<Arc<dyn Indicator>>,

    cmd_tx: Sender<ScanCmd>,

    cmd_rx: Receiver<ScanCmd>,

    sensor_failure: Arc<AtomicBool>,

    /// Allocated when leaving `WaitForResources`
    session: Option<ScanSession>,

    deadlines: Deadlines,

    /// State seen at the end of the last tick, and when it was entered
    last_state: AppState,
    state_entered: Option<Instant>,

    /// Last level sent to each LED
    leds: BTreeMap<LedId, bool>,
}

/// Instants computed on state entry and compared on every tick.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct Deadlines {
    /// Start of the chunk currently being captured
    pub chunk_start: Option<Instant>,

    /// End of the stop scan pre-roll
    pub stop_scan_initial: Option<Instant>,

    /// End of the stop scan capture
    pub stop_scan: Option<Instant>,
}

/// Cloneable access to the controller from other threads.
#[derive(Clone)]
pub struct ScanHandle {
    state: Arc<AtomicAppState>,
    cmd_tx: Sender<ScanCmd>,
    sensor_failure: Arc<AtomicBool>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl ScanController {
    /// Create a controller in `WaitForResources`.
    pub fn new(
        params: ScanCtrlParams,
        registry: Arc<SensorRegistry>,
        engine: Arc<ChunkPersistenceEngine>,
        storage: Arc<dyn StorageAllocator>,
        indicator: Option<Arc<dyn Indicator>>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = channel();

        Self {
            params,
            state: Arc::new(AtomicAppState::new(AppState::WaitForResources)),
            registry,
            engine,
            storage,
            indicator,
            cmd_tx,
            cmd_rx,
            sensor_failure: Arc::new(AtomicBool::new(false)),
            session: None,
            deadlines: Deadlines::default(),
            last_state: AppState::WaitForResources,
            state_entered: None,
            leds: BTreeMap::new(),
        }
    }

    pub fn handle(&self) -> ScanHandle {
        ScanHandle {
            state: self.state.clone(),
            cmd_tx: self.cmd_tx.clone(),
            sensor_failure: self.sensor_failure.clone(),
        }
    }

    pub fn state(&self) -> AppState {
        self.state.load()
    }

    /// Shared cell holding the state, for status reporting.
    pub fn state_cell(&self) -> Arc<AtomicAppState> {
        self.state.clone()
    }

    pub fn session(&self) -> Option<&ScanSession> {
        self.session.as_ref()
    }

    pub fn deadlines(&self) -> &Deadlines {
        &self.deadlines
    }

    pub fn params(&self) -> &ScanCtrlParams {
        &self.params
    }

    /// Flag a sensor initialisation failure. The next tick enters `LidarError`.
    pub fn report_sensor_failure(&self) {
        self.sensor_failure.store(true, Ordering::Release);
    }

    // ---- GUARDED TRIGGERS ----

    /// `Idle` to `StartingScan`.
    pub fn start_scan(&self) -> bool {
        self.trigger(ScanCmd::StartScan, &[AppState::Idle], AppState::StartingScan)
    }

    /// `Scanning` to `Stopping`.
    pub fn stop_scan(&self) -> bool {
        self.trigger(ScanCmd::StopScan, &[AppState::Scanning], AppState::Stopping)
    }

    /// `Idle` to `StartingStopScan`.
    pub fn trigger_stop_scan(&self) -> bool {
        self.trigger(
            ScanCmd::TriggerStopScan,
            &[AppState::Idle],
            AppState::StartingStopScan,
        )
    }

    /// [`Self::start_scan`] from `Idle`, [`Self::stop_scan`] from `Scanning`.
    pub fn trigger_continuous_scanning(&self) -> bool {
        self.start_scan() || self.stop_scan()
    }

    /// Apply a command through its guarded trigger.
    pub fn apply(&self, cmd: ScanCmd) -> bool {
        match cmd {
            ScanCmd::StartScan => self.start_scan(),
            ScanCmd::StopScan => self.stop_scan(),
            ScanCmd::TriggerStopScan => self.trigger_stop_scan(),
            ScanCmd::TriggerContinuousScanning => self.trigger_continuous_scanning(),
        }
    }

    // ---- TICK ----

    /// Run one iteration of the controller at `now`, returning the time to
    /// wait before the next one.
    pub fn tick(&mut self, now: Instant) -> Duration {
        while let Ok(cmd) = self.cmd_rx.try_recv() {
            self.apply(cmd);
        }

        if self.sensor_failure.load(Ordering::Acquire) && self.state() != AppState::LidarError {
            error!("Sensor failure reported");
            self.fail(AppState::LidarError);
        }

        for _ in 0..MAX_STEPS_PER_TICK {
            let before = self.state();
            self.step(now);
            let after = self.state();

            if after == before || !after.is_transient() {
                break;
            }
        }

        self.update_leds(now);

        if self.state().is_error() {
            self.params.error_blink_period()
        } else {
            self.params.tick_period()
        }
    }

    fn step(&mut self, now: Instant) {
        match self.state() {
            AppState::WaitForResources => self.wait_for_resources(),
            AppState::Idle => (),
            AppState::StartingScan => {
                self.registry.broadcast_start();
                self.deadlines.chunk_start = Some(now);
                self.set_state(AppState::Scanning);
            }
            AppState::Scanning => {
                let chunk_start = *self.deadlines.chunk_start.get_or_insert(now);

                if now.saturating_duration_since(chunk_start) >= self.params.commit_interval() {
                    if self.commit_chunk(ScanMode::Continuous, false) {
                        self.deadlines.chunk_start = Some(now);
                    } else {
                        self.fail(AppState::UsbIoError);
                    }
                }
            }
            AppState::Stopping => {
                if self.commit_chunk(ScanMode::Continuous, true) {
                    self.set_state(AppState::Idle);
                } else {
                    self.fail(AppState::UsbIoError);
                }
            }
            AppState::StartingStopScan => {
                let initial = now + self.params.stop_scan_pre_roll();
                self.deadlines.stop_scan_initial = Some(initial);
                self.deadlines.stop_scan = Some(initial + self.params.stop_scan_duration());
                self.set_state(AppState::StopScanInitialProgress);
            }
            AppState::StopScanInitialProgress => {
                if self.deadlines.stop_scan_initial.map_or(true, |d| now >= d) {
                    self.registry.broadcast_start();
                    self.set_state(AppState::StopScanInProgress);
                }
            }
            AppState::StopScanInProgress => {
                if self.deadlines.stop_scan.map_or(true, |d| now >= d) {
                    self.set_state(AppState::StoppingStopScan);
                }
            }
            AppState::StoppingStopScan => {
                if self.commit_chunk(ScanMode::StopScan, true) {
                    self.set_state(AppState::Idle);
                } else {
                    self.fail(AppState::UsbIoError);
                }
            }
            AppState::LidarError | AppState::UsbIoError => (),
        }
    }

    fn wait_for_resources(&mut self) {
        if !self.registry.has_all(&self.params.mandatory_clients) {
            return;
        }

        match self.storage.allocate_session() {
            Ok(dirs) => {
                self.session = Some(ScanSession::new(dirs));
                self.set_state(AppState::Idle);
            }
            Err(e) => {
                error!("Could not allocate the scan session: {}", e);
                self.fail(AppState::UsbIoError);
            }
        }
    }

    /// Commit the next chunk into the directory of `mode`, counting it on
    /// success.
    fn commit_chunk(&mut self, mode: ScanMode, stop_logging: bool) -> bool {
        let (dir, index) = match &self.session {
            Some(s) => (s.dir(mode).to_path_buf(), s.next_chunk_index()),
            None => {
                error!("No scan session to commit into");
                return false;
            }
        };

        self.set_led(LedId::CopyData, true);
        let res = self.engine.commit(&dir, index, stop_logging);
        self.set_led(LedId::CopyData, false);

        match res {
            Ok(report) => {
                if let Some(s) = self.session.as_mut() {
                    s.chunk_committed(mode);
                }
                info!(
                    "Chunk {} committed to {:?}: {} files in {:.3} s",
                    index,
                    dir,
                    report.files.len(),
                    report.duration.as_secs_f64()
                );
                true
            }
            Err(e) => {
                error!("Could not commit chunk {} to {:?}: {}", index, dir, e);
                false
            }
        }
    }

    fn trigger(&self, cmd: ScanCmd, allowed: &[AppState], to: AppState) -> bool {
        match self.state.transition_from(allowed, to) {
            Ok(from) => {
                info!("State transition from {} to {} ({})", from, to, cmd);
                true
            }
            Err(current) => {
                debug!("{} ignored in state {}", cmd, current);
                false
            }
        }
    }

    fn set_state(&self, to: AppState) {
        let from = self.state();
        if from != to {
            self.state.store(to);
            info!("State transition from {} to {}", from, to);
        }
    }

    /// Enter an error state, stopping every logger.
    fn fail(&self, to: AppState) {
        self.set_state(to);
        self.registry.broadcast_stop();
    }

    // ---- LEDS ----

    fn update_leds(&mut self, now: Instant) {
        let state = self.state();
        if state != self.last_state || self.state_entered.is_none() {
            self.last_state = state;
            self.state_entered = Some(now);
        }

        let elapsed = self
            .state_entered
            .map(|t| now.saturating_duration_since(t))
            .unwrap_or_default();

        for (led, on) in led_pattern(state, elapsed, &self.params).iter() {
            self.set_led(*led, *on);
        }
    }

    fn set_led(&mut self, led: LedId, on: bool) {
        if self.leds.get(&led) == Some(&on) {
            return;
        }

        if let Some(i) = &self.indicator {
            i.set_led(led, on);
        }
        self.leds.insert(led, on);
    }
}

impl ScanHandle {
    pub fn state(&self) -> AppState {
        self.state.load()
    }

    /// Queue a command for the next tick. Returns false if the controller
    /// has gone.
    pub fn send(&self, cmd: ScanCmd) -> bool {
        self.cmd_tx.send(cmd).is_ok()
    }

    pub fn sender(&self) -> Sender<ScanCmd> {
        self.cmd_tx.clone()
    }

    pub fn report_sensor_failure(&self) {
        self.sensor_failure.store(true, Ordering::Release);
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// LED levels for a state which was entered `elapsed` ago.
fn led_pattern(state: AppState, elapsed: Duration, params: &ScanCtrlParams) -> [(LedId, bool); 3] {
    let fast = blink_phase(elapsed, params.fast_blink_period());
    let slow = blink_phase(elapsed, params.error_blink_period());

    let (continuous, stop, copy) = match state {
        AppState::WaitForResources | AppState::Idle | AppState::StartingStopScan => {
            (false, false, false)
        }
        AppState::StartingScan => (!fast, false, false),
        AppState::Scanning | AppState::Stopping => (true, false, false),
        AppState::StopScanInitialProgress => (false, !fast, false),
        AppState::StopScanInProgress | AppState::StoppingStopScan => (false, true, false),
        AppState::LidarError => (slow, slow, false),
        AppState::UsbIoError => (false, false, slow),
    };

    [
        (LedId::ContinuousScanning, continuous),
        (LedId::StopScan, stop),
        (LedId::CopyData, copy),
    ]
}

/// False for the first half period, true for the second, and so on.
fn blink_phase(elapsed: Duration, half_period: Duration) -> bool {
    let half = half_period.as_nanos().max(1);
    (elapsed.as_nanos() / half) % 2 == 1
}
