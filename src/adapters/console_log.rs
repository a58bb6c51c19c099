//! Console logger for host builds.
//!
//! Writes every record to stderr as `BLE PERI: LEVEL target: message`.
//! On a device the platform logger is installed instead and this module
//! is unused.

use std::io::Write;

use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};

/// Stderr logger with a fixed level filter.
pub struct ConsoleLog {
    level: LevelFilter,
}

impl ConsoleLog {
    pub const fn new(level: LevelFilter) -> Self {
        Self { level }
    }
}

impl Log for ConsoleLog {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let mut err = std::io::stderr().lock();
        let _ = writeln!(
            err,
            "BLE PERI: {:<5} {}: {}",
            record.level(),
            record.target(),
            record.args()
        );
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

/// Install a [`ConsoleLog`] as the global logger.
///
/// Fails if a logger is already installed.
pub fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
    log::set_boxed_logger(Box::new(ConsoleLog::new(level)))?;
    log::set_max_level(level);
    Ok(())
}
