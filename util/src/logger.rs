//! Logging for the rig executables
//!
//! Lines go to two places. The console gets coloured level tags and `\r\n`
//! line endings, so output stays readable while the console reader has the
//! terminal in raw mode. The session log file gets plain tags and always
//! carries the record's target.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External imports
use colored::{ColoredString, Colorize};
use log::{self, info, Level};
use thiserror::Error;

// Internal imports
use crate::session;

// Re-exports
pub use log::LevelFilter;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Dependencies which are only interesting when something goes wrong
const QUIET_TARGETS: [(&str, LevelFilter); 6] = [
    ("hyper", LevelFilter::Warn),
    ("mio", LevelFilter::Warn),
    ("tokio", LevelFilter::Warn),
    ("tower", LevelFilter::Warn),
    ("axum", LevelFilter::Info),
    ("image", LevelFilter::Info),
];

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Errors associated with initialising the logger.
#[derive(Debug, Error)]
pub enum LoggerInitError {
    #[error("Expected a log level of at least `INFO`, found `{0}`")]
    InvalidMinLogLevel(log::LevelFilter),

    #[error("Error initialising the log file: {0}")]
    LogFileInitError(std::io::Error),

    #[error("An error occured while setting up the logger: {0}")]
    FernInitError(log::SetLoggerError),
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Initialise the logger for this execution.
///
/// `min_level` must be at least `Info`. Only call this once per process.
pub fn logger_init(
    min_level: LevelFilter,
    session: &session::Session,
) -> Result<(), LoggerInitError> {
    if min_level < Level::Info {
        return Err(LoggerInitError::InvalidMinLogLevel(min_level));
    }

    let log_file = fern::log_file(session.log_file_path.clone())
        .map_err(LoggerInitError::LogFileInitError)?;

    let console = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{}",
                console_line(
                    session::get_elapsed_seconds(),
                    record.level(),
                    record.target(),
                    message
                )
            ))
        })
        .chain(fern::Output::stdout("\r\n"));

    let file = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{}",
                file_line(
                    session::get_elapsed_seconds(),
                    record.level(),
                    record.target(),
                    message
                )
            ))
        })
        .chain(log_file);

    QUIET_TARGETS
        .iter()
        .fold(fern::Dispatch::new().level(min_level), |d, (target, level)| {
            d.level_for(*target, *level)
        })
        .chain(console)
        .chain(file)
        .apply()
        .map_err(LoggerInitError::FernInitError)?;

    info!("Logging initialised");
    info!("    Session epoch: {}", session::get_epoch());
    info!("    Log level: {:?}", min_level);
    info!("    Log file path: {:?}", session.log_file_path);

    Ok(())
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

/// Console lines only show the target for debug and trace records.
fn console_line(
    elapsed_s: f64,
    level: Level,
    target: &str,
    message: &std::fmt::Arguments,
) -> String {
    if level > Level::Info {
        format!("[{:10.6} {}] {}: {}", elapsed_s, level_tag(level), target, message)
    } else {
        format!("[{:10.6} {}] {}", elapsed_s, level_tag(level), message)
    }
}

fn file_line(
    elapsed_s: f64,
    level: Level,
    target: &str,
    message: &std::fmt::Arguments,
) -> String {
    format!("[{:10.6} {:<5}] {}: {}", elapsed_s, level, target, message)
}

fn level_tag(level: Level) -> ColoredString {
    match level {
        Level::Trace => "TRC".dimmed().italic(),
        Level::Debug => "DBG".dimmed(),
        Level::Info => "INF".normal(),
        Level::Warn => "WRN".yellow(),
        Level::Error => "ERR".red().bold(),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_line_formats() {
        colored::control::set_override(false);

        assert_eq!(
            console_line(1.5, Level::Info, "scan_lib::chunk", &format_args!("Chunk {}", 3)),
            "[  1.500000 INF] Chunk 3"
        );
        assert_eq!(
            console_line(0.25, Level::Debug, "scan_lib::chunk", &format_args!("froze")),
            "[  0.250000 DBG] scan_lib::chunk: froze"
        );
        assert_eq!(
            file_line(2.0, Level::Warn, "scan_lib::clients", &format_args!("late")),
            "[  2.000000 WARN ] scan_lib::clients: late"
        );
    }

    #[test]
    fn test_quiet_targets_are_not_below_info() {
        for (target, level) in QUIET_TARGETS.iter() {
            assert!(*level <= LevelFilter::Info, "{} would be noisy", target);
        }
    }
}
