//! # Console reader
//!
//! Single key commands typed on the console, read without waiting for Enter:
//!
//! - `s` - start continuous scanning
//! - `e` - stop continuous scanning
//! - `p` - print the status document
//! - `q` or `Ctrl+C` - quit
//!
//! Whitespace is ignored, anything else is logged and ignored. The terminal is
//! in raw mode for as long as a [`TerminalKeys`] exists.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use comms_if::cmd::ScanCmd;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal;
use log::{info, warn};

use crate::scan_ctrl::ScanHandle;
use crate::status::StatusBoard;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Longest wait for a key before the shutdown flag is checked again
pub const KEY_POLL_PERIOD: Duration = Duration::from_millis(100);

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// Source of key presses, so the reader can be driven without a terminal.
pub trait KeySource: Send {
    /// Wait at most `timeout` for the next key event.
    fn next_key(&mut self, timeout: Duration) -> io::Result<Option<KeyEvent>>;
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Keys from the controlling terminal, which is switched to raw mode.
pub struct TerminalKeys {
    _raw: (),
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ConsoleAction {
    Cmd(ScanCmd),
    PrintStatus,
    Quit,
    Ignore,
    Unknown(char),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl TerminalKeys {
    pub fn new() -> io::Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(Self { _raw: () })
    }
}

impl KeySource for TerminalKeys {
    fn next_key(&mut self, timeout: Duration) -> io::Result<Option<KeyEvent>> {
        if !event::poll(timeout)? {
            return Ok(None);
        }

        match event::read()? {
            Event::Key(key) => Ok(Some(key)),
            _ => Ok(None),
        }
    }
}

impl Drop for TerminalKeys {
    fn drop(&mut self) {
        if let Err(e) = terminal::disable_raw_mode() {
            warn!("Could not restore the terminal: {}", e);
        }
    }
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

pub fn parse_console_char(c: char) -> ConsoleAction {
    match c {
        's' => ConsoleAction::Cmd(ScanCmd::StartScan),
        'e' => ConsoleAction::Cmd(ScanCmd::StopScan),
        'p' => ConsoleAction::PrintStatus,
        'q' => ConsoleAction::Quit,
        c if c.is_whitespace() => ConsoleAction::Ignore,
        c => ConsoleAction::Unknown(c),
    }
}

/// Action for a key event. Releases and repeats are ignored.
pub fn parse_key_event(key: &KeyEvent) -> ConsoleAction {
    if key.kind != KeyEventKind::Press {
        return ConsoleAction::Ignore;
    }

    match key.code {
        // Raw mode swallows SIGINT
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            ConsoleAction::Quit
        }
        KeyCode::Char(c) => parse_console_char(c),
        _ => ConsoleAction::Ignore,
    }
}

/// Read commands from `keys` on a new thread until `q` is typed or
/// `shutdown` is raised. Typing `q` raises `shutdown`.
pub fn spawn_console_reader<K: KeySource + 'static>(
    mut keys: K,
    handle: ScanHandle,
    board: StatusBoard,
    shutdown: Arc<AtomicBool>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        while !shutdown.load(Ordering::Relaxed) {
            let key = match keys.next_key(KEY_POLL_PERIOD) {
                Ok(Some(k)) => k,
                Ok(None) => continue,
                Err(e) => {
                    warn!("Could not read console input: {}", e);
                    return;
                }
            };

            match parse_key_event(&key) {
                ConsoleAction::Cmd(cmd) => {
                    info!("Console command: {}", cmd);
                    handle.send(cmd);
                }
                ConsoleAction::PrintStatus => {
                    match serde_json::to_string_pretty(&board.document()) {
                        Ok(s) => info!("Status:\n{}", s),
                        Err(e) => warn!("Could not format the status: {}", e),
                    }
                }
                ConsoleAction::Quit => {
                    info!("Quit requested from the console");
                    shutdown.store(true, Ordering::Relaxed);
                    return;
                }
                ConsoleAction::Ignore => (),
                ConsoleAction::Unknown(c) => warn!("Unknown instruction \"{}\"", c),
            }
        }
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::app_state::AppState;
    use crate::chunk::ChunkPersistenceEngine;
    use crate::clients::fs_client::FsClient;
    use crate::clients::{SensorClientHandle, SensorRegistry};
    use crate::scan_ctrl::{ScanController, ScanCtrlParams};
    use crate::timestamp::TimestampAuthority;
    use std::collections::VecDeque;
    use std::time::Instant;

    /// Plays back a fixed list of keys, then waits out every poll.
    struct ScriptedKeys(VecDeque<KeyEvent>);

    impl ScriptedKeys {
        fn typed(text: &str) -> Self {
            Self(
                text.chars()
                    .map(|c| KeyEvent::new(KeyCode::Char(c), KeyModifiers::NONE))
                    .collect(),
            )
        }
    }

    impl KeySource for ScriptedKeys {
        fn next_key(&mut self, timeout: Duration) -> io::Result<Option<KeyEvent>> {
            match self.0.pop_front() {
                Some(k) => Ok(Some(k)),
                None => {
                    thread::sleep(timeout);
                    Ok(None)
                }
            }
        }
    }

    fn idle_controller(root: &std::path::Path) -> (ScanController, StatusBoard) {
        let registry = Arc::new(SensorRegistry::new(Arc::new(TimestampAuthority::new())));
        registry.attach(SensorClientHandle::new("gpio"));
        registry.attach(SensorClientHandle::new("fs"));
        let engine = Arc::new(ChunkPersistenceEngine::new(registry.clone()));
        let mut ctrl = ScanController::new(
            ScanCtrlParams::default(),
            registry.clone(),
            engine,
            Arc::new(FsClient::new(root)),
            None,
        );
        ctrl.tick(Instant::now());
        let board = StatusBoard::new(ctrl.state_cell(), registry);
        (ctrl, board)
    }

    #[test]
    fn test_parse_console_char() {
        assert_eq!(parse_console_char('s'), ConsoleAction::Cmd(ScanCmd::StartScan));
        assert_eq!(parse_console_char('e'), ConsoleAction::Cmd(ScanCmd::StopScan));
        assert_eq!(parse_console_char('q'), ConsoleAction::Quit);
        assert_eq!(parse_console_char('p'), ConsoleAction::PrintStatus);
        assert_eq!(parse_console_char(' '), ConsoleAction::Ignore);
        assert_eq!(parse_console_char('x'), ConsoleAction::Unknown('x'));
    }

    #[test]
    fn test_parse_key_event() {
        let ctrl_c = KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL);
        assert_eq!(parse_key_event(&ctrl_c), ConsoleAction::Quit);

        let c = KeyEvent::new(KeyCode::Char('c'), KeyModifiers::NONE);
        assert_eq!(parse_key_event(&c), ConsoleAction::Unknown('c'));

        let enter = KeyEvent::new(KeyCode::Enter, KeyModifiers::NONE);
        assert_eq!(parse_key_event(&enter), ConsoleAction::Ignore);

        let mut release = KeyEvent::new(KeyCode::Char('s'), KeyModifiers::NONE);
        release.kind = KeyEventKind::Release;
        assert_eq!(parse_key_event(&release), ConsoleAction::Ignore);
    }

    #[test]
    fn test_console_reader() {
        let root = tempfile::tempdir().unwrap();
        let (mut ctrl, board) = idle_controller(root.path());
        let shutdown = Arc::new(AtomicBool::new(false));

        // Everything after the quit is never read
        spawn_console_reader(ScriptedKeys::typed("xs pqe"), ctrl.handle(), board, shutdown.clone())
            .join()
            .unwrap();

        assert!(shutdown.load(Ordering::Relaxed));
        ctrl.tick(Instant::now());
        assert_eq!(ctrl.state(), AppState::Scanning);
    }

    #[test]
    fn test_console_reader_stops_on_shutdown() {
        let root = tempfile::tempdir().unwrap();
        let (ctrl, board) = idle_controller(root.path());
        let shutdown = Arc::new(AtomicBool::new(false));

        let reader = spawn_console_reader(
            ScriptedKeys::typed(""),
            ctrl.handle(),
            board,
            shutdown.clone(),
        );

        thread::sleep(KEY_POLL_PERIOD);
        shutdown.store(true, Ordering::Relaxed);
        reader.join().unwrap();
        assert_eq!(ctrl.state(), AppState::Idle);
    }
}
