//! # GPIO client
//!
//! Drives the front panel: three indicator LEDs and two push buttons. On a
//! Raspberry Pi the real pins are used, elsewhere (or when asked to) the
//! panel is simulated and buttons can be pressed with
//! [`GpioClient::press_button`].

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use comms_if::cmd::ScanCmd;
use comms_if::eqpt::gpio::{ButtonId, GpioStatus, LedId, ALL_BUTTONS, ALL_LEDS};
use log::{debug, info, warn};
use serde_json::Value;

use super::{Indicator, StatusReporting};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

pub const GPIO_CLIENT_NAME: &str = "gpio";

/// Button polling period
const BUTTON_POLL_PERIOD: Duration = Duration::from_millis(2);

/// How long a button level must be stable to count
pub const BUTTON_DEBOUNCE: Duration = Duration::from_millis(10);

const DANCE_STEP: Duration = Duration::from_millis(100);

const DANCE_ROUNDS: usize = 3;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

pub struct GpioClient {
    backend: Mutex<Backend>,
    leds: Mutex<BTreeMap<LedId, bool>>,
    buttons: Mutex<BTreeMap<ButtonId, bool>>,
}

/// Debounces a single button level.
#[derive(Debug, Clone)]
pub struct Debouncer {
    stable: bool,
    candidate: bool,
    candidate_since: Instant,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

enum Backend {
    Sim(BTreeMap<ButtonId, bool>),
    #[cfg(target_arch = "arm")]
    Pi(pi::PiPins),
}

#[derive(Debug, thiserror::Error)]
pub enum GpioError {
    #[error("GPIO hardware is not available on this platform")]
    HardwareUnavailable,

    #[cfg(target_arch = "arm")]
    #[error("GPIO error: {0}")]
    Pi(rppal::gpio::Error),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl GpioClient {
    /// Open the panel, simulated or on the real pins.
    pub fn new(simulated: bool) -> Result<Self, GpioError> {
        let backend = if simulated {
            Backend::Sim(ALL_BUTTONS.iter().map(|b| (*b, false)).collect())
        } else {
            Self::hardware_backend()?
        };

        info!(
            "GPIO client initialised ({})",
            if simulated { "simulated" } else { "hardware" }
        );

        Ok(Self {
            backend: Mutex::new(backend),
            leds: Mutex::new(ALL_LEDS.iter().map(|l| (*l, false)).collect()),
            buttons: Mutex::new(ALL_BUTTONS.iter().map(|b| (*b, false)).collect()),
        })
    }

    #[cfg(target_arch = "arm")]
    fn hardware_backend() -> Result<Backend, GpioError> {
        pi::PiPins::new().map(Backend::Pi).map_err(GpioError::Pi)
    }

    #[cfg(not(target_arch = "arm"))]
    fn hardware_backend() -> Result<Backend, GpioError> {
        Err(GpioError::HardwareUnavailable)
    }

    pub fn led(&self, led: LedId) -> bool {
        lock(&self.leds).get(&led).copied().unwrap_or(false)
    }

    /// Set the level of a simulated button. Has no effect on real hardware.
    pub fn press_button(&self, button: ButtonId, pressed: bool) {
        match &mut *lock(&self.backend) {
            Backend::Sim(levels) => {
                levels.insert(button, pressed);
            }
            #[allow(unreachable_patterns)]
            _ => warn!("Can't press {} on real hardware", button.name()),
        }
    }

    /// Blink every LED a few times, used at startup to show the panel works.
    pub fn led_dance(&self) {
        for _ in 0..DANCE_ROUNDS {
            for led in ALL_LEDS.iter() {
                self.set_led(*led, true);
                thread::sleep(DANCE_STEP);
                self.set_led(*led, false);
                thread::sleep(DANCE_STEP);
            }
        }
    }

    /// Poll the buttons in a background thread until `shutdown` is set,
    /// sending a command on each debounced press.
    pub fn spawn_button_thread(
        self: &Arc<Self>,
        commands: Sender<ScanCmd>,
        shutdown: Arc<AtomicBool>,
    ) -> JoinHandle<()> {
        let client = self.clone();
        thread::spawn(move || {
            let now = Instant::now();
            let mut debouncers: BTreeMap<ButtonId, Debouncer> = ALL_BUTTONS
                .iter()
                .map(|b| (*b, Debouncer::new(false, now)))
                .collect();

            while !shutdown.load(Ordering::Relaxed) {
                let now = Instant::now();

                for (button, debouncer) in debouncers.iter_mut() {
                    let level = client.read_button(*button);
                    if let Some(pressed) = debouncer.update(level, now) {
                        lock(&client.buttons).insert(*button, pressed);

                        if pressed {
                            let cmd = button_command(*button);
                            debug!("Button {} pressed, sending {}", button.name(), cmd);
                            if commands.send(cmd).is_err() {
                                warn!("Controller is gone, stopping button thread");
                                return;
                            }
                        }
                    }
                }

                thread::sleep(BUTTON_POLL_PERIOD);
            }
        })
    }

    fn read_button(&self, button: ButtonId) -> bool {
        match &*lock(&self.backend) {
            Backend::Sim(levels) => levels.get(&button).copied().unwrap_or(false),
            #[cfg(target_arch = "arm")]
            Backend::Pi(pins) => pins.is_pressed(button),
        }
    }
}

impl Indicator for GpioClient {
    fn set_led(&self, led: LedId, on: bool) {
        match &mut *lock(&self.backend) {
            Backend::Sim(_) => (),
            #[cfg(target_arch = "arm")]
            Backend::Pi(pins) => pins.set(led, on),
        }
        lock(&self.leds).insert(led, on);
    }
}

impl StatusReporting for GpioClient {
    fn name(&self) -> &str {
        GPIO_CLIENT_NAME
    }

    fn status(&self) -> Value {
        let status = GpioStatus {
            leds: lock(&self.leds)
                .iter()
                .map(|(l, on)| (l.name().to_string(), *on))
                .collect(),
            buttons: lock(&self.buttons)
                .iter()
                .map(|(b, on)| (b.name().to_string(), *on))
                .collect(),
        };

        serde_json::to_value(status).unwrap_or(Value::Null)
    }
}

impl Debouncer {
    pub fn new(level: bool, now: Instant) -> Self {
        Self {
            stable: level,
            candidate: level,
            candidate_since: now,
        }
    }

    /// Feed a raw level, returning the new stable level when it changes.
    pub fn update(&mut self, level: bool, now: Instant) -> Option<bool> {
        if level != self.candidate {
            self.candidate = level;
            self.candidate_since = now;
        }

        if self.candidate != self.stable && now - self.candidate_since >= BUTTON_DEBOUNCE {
            self.stable = self.candidate;
            return Some(self.stable);
        }

        None
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Command issued by each button.
fn button_command(button: ButtonId) -> ScanCmd {
    match button {
        ButtonId::StopScan => ScanCmd::TriggerStopScan,
        ButtonId::ContinuousScanning => ScanCmd::TriggerContinuousScanning,
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

#[cfg(target_arch = "arm")]
mod pi {
    use std::collections::BTreeMap;

    use comms_if::eqpt::gpio::{ButtonId, LedId, ALL_BUTTONS, ALL_LEDS};
    use rppal::gpio::{Gpio, InputPin, OutputPin};

    pub struct PiPins {
        leds: BTreeMap<LedId, OutputPin>,
        buttons: BTreeMap<ButtonId, InputPin>,
    }

    impl PiPins {
        pub fn new() -> Result<Self, rppal::gpio::Error> {
            let gpio = Gpio::new()?;

            let mut leds = BTreeMap::new();
            for led in ALL_LEDS.iter() {
                leds.insert(*led, gpio.get(led.default_pin())?.into_output_low());
            }

            // Buttons pull the line to ground
            let mut buttons = BTreeMap::new();
            for button in ALL_BUTTONS.iter() {
                buttons.insert(*button, gpio.get(button.default_pin())?.into_input_pullup());
            }

            Ok(Self { leds, buttons })
        }

        pub fn set(&mut self, led: LedId, on: bool) {
            if let Some(pin) = self.leds.get_mut(&led) {
                if on {
                    pin.set_high()
                } else {
                    pin.set_low()
                }
            }
        }

        pub fn is_pressed(&self, button: ButtonId) -> bool {
            self.buttons.get(&button).map(|p| p.is_low()).unwrap_or(false)
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::mpsc::channel;

    #[test]
    fn test_debouncer() {
        let t0 = Instant::now();
        let mut d = Debouncer::new(false, t0);

        // Bounce shorter than the debounce time is ignored
        assert_eq!(d.update(true, t0), None);
        assert_eq!(d.update(false, t0 + Duration::from_millis(3)), None);
        assert_eq!(d.update(false, t0 + Duration::from_millis(20)), None);

        // Held press registers once
        let t1 = t0 + Duration::from_millis(30);
        assert_eq!(d.update(true, t1), None);
        assert_eq!(d.update(true, t1 + Duration::from_millis(5)), None);
        assert_eq!(d.update(true, t1 + Duration::from_millis(10)), Some(true));
        assert_eq!(d.update(true, t1 + Duration::from_millis(50)), None);
        assert_eq!(d.update(false, t1 + Duration::from_millis(60)), None);
        assert_eq!(d.update(false, t1 + Duration::from_millis(70)), Some(false));
    }

    #[test]
    fn test_sim_leds_in_status() {
        let gpio = GpioClient::new(true).unwrap();
        gpio.set_led(LedId::CopyData, true);

        assert!(gpio.led(LedId::CopyData));
        assert!(!gpio.led(LedId::StopScan));

        let status = gpio.status();
        assert_eq!(status["leds"]["LED_GPIO_COPY_DATA"], true);
        assert_eq!(status["leds"]["LED_GPIO_STOP_SCAN"], false);
        assert_eq!(status["buttons"]["BUTTON_STOP_SCAN"], false);
    }

    #[test]
    fn test_button_sends_command() {
        let gpio = Arc::new(GpioClient::new(true).unwrap());
        let (tx, rx) = channel();
        let shutdown = Arc::new(AtomicBool::new(false));

        let handle = gpio.spawn_button_thread(tx, shutdown.clone());
        gpio.press_button(ButtonId::StopScan, true);

        let cmd = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(cmd, ScanCmd::TriggerStopScan);

        shutdown.store(true, Ordering::Relaxed);
        handle.join().unwrap();
    }
}
