/*
 * Serial Console Writer
 *
 * Implements `core::fmt::Write` over the COM1 port so the `print!`/
 * `serial_println!` macros and the `log` backend can share one path to
 * the serial console.
 */

use core::fmt;

use spin::MutexGuard;

use crate::arch::x86_64::peripheral::uart_16550::SerialPort;
use crate::arch::x86_64::peripheral::COM1;

pub struct Writer<'a> {
    serial: MutexGuard<'a, SerialPort>,
}

impl<'a> Writer<'a> {
    pub fn new() -> Writer<'a> {
        Writer { serial: COM1.lock() }
    }

    pub fn write(&mut self, byte: u8) {
        self.serial.write(byte);
    }
}

impl<'a> Default for Writer<'a> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> fmt::Write for Writer<'a> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for byte in s.bytes() {
            self.write(byte);
        }
        Ok(())
    }
}
