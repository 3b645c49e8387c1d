/*
 * Kernel Logging System
 *
 * Backs the `log` crate with the serial console so `log::info!` etc. work
 * throughout the kernel, including from inside the scheduler and sync
 * primitives.
 */

use core::fmt::Write;

use log::{Level, LevelFilter, Metadata, Record};

use crate::serial_println;

struct KernelLogger;

impl log::Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Info
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            serial_println!("[{}] {}", record.level(), record.args());
        }
    }

    fn flush(&self) {}
}

static LOGGER: KernelLogger = KernelLogger;

/// Initializes the logger, optionally clearing the screen first.
///
/// Assumes the debug infrastructure (COM1 port) has already been initialized.
pub fn init(clearscr: bool) {
    if clearscr {
        let _ = crate::utils::debug::writer::Writer::new().write_str("\u{001B}[2J\u{001B}[H");
    }

    match log::set_logger(&LOGGER).map(|()| log::set_max_level(LevelFilter::Info)) {
        Ok(()) => serial_println!("logger initialized"),
        Err(err) => panic!("failed to initialize logger: {}", err),
    }
}
