//! # Loader Logging

use boot_qemu::qemu_trace;
use core::sync::atomic::{AtomicBool, Ordering};
use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};

/// Routes `log` records to the QEMU debug port and, while boot services
/// are up, to the UEFI text console.
pub struct UefiLogger {
    max_level: LevelFilter,
    console_available: AtomicBool,
}

impl UefiLogger {
    #[must_use]
    pub const fn new(max_level: LevelFilter) -> Self {
        Self {
            max_level,
            console_available: AtomicBool::new(true),
        }
    }

    /// Install as the global logger. Call once during early init.
    ///
    /// # Errors
    /// Fails when another global logger is already installed.
    #[allow(static_mut_refs)]
    pub fn init(self) -> Result<&'static Self, SetLoggerError> {
        // `log::set_logger` wants a `&'static dyn Log`; park the instance
        // in a static. Single-threaded pre-boot code, initialized once
        // before the first log record.
        static mut LOGGER: Option<UefiLogger> = None;

        let logger: &'static Self = unsafe { LOGGER.insert(self) };
        log::set_logger(logger)?;
        log::set_max_level(LevelFilter::Trace);
        Ok(logger)
    }

    /// Flag the UEFI console as gone. From now on only the debug port is
    /// written; the console belongs to nobody after `ExitBootServices`.
    pub fn console_detached(&self) {
        self.console_available.store(false, Ordering::Relaxed);
    }
}

impl Log for UefiLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.max_level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        qemu_trace!(
            "[{}] {}: {}\n",
            record.level(),
            record.target(),
            record.args()
        );

        if self.console_available.load(Ordering::Relaxed) {
            uefi::println!(
                "[{}] {}: {}",
                record.level(),
                record.target(),
                record.args()
            );
        }
    }

    fn flush(&self) {}
}
