/*
 * 16550 UART Serial Port Driver
 *
 * Minimal driver for the 16550-compatible UART behind the legacy COM ports.
 * Used as the kernel's sole output device: logging, panic messages, and
 * the test harness's console all go out over this port.
 */

use bitflags::bitflags;
use x86_64::instructions::port::Port;

bitflags! {
    /// Line status flags
    struct LineStsFlags: u8 {
        const INPUT_FULL = 1;
        const OUTPUT_EMPTY = 1 << 5;
    }
}

/// Serial port representation, addressed by port-mapped I/O.
pub struct SerialPort {
    data: Port<u8>,
    int_en: Port<u8>,
    fifo_ctrl: Port<u8>,
    line_ctrl: Port<u8>,
    modem_ctrl: Port<u8>,
    line_sts: Port<u8>,
}

impl SerialPort {
    /// Creates a new serial port instance at the given base I/O address.
    pub const fn new(base: u16) -> SerialPort {
        SerialPort {
            data: Port::new(base),
            int_en: Port::new(base + 1),
            fifo_ctrl: Port::new(base + 2),
            line_ctrl: Port::new(base + 3),
            modem_ctrl: Port::new(base + 4),
            line_sts: Port::new(base + 5),
        }
    }

    /// Initializes the serial port: 8N1, 38400 baud, FIFO enabled.
    pub fn init(&mut self) {
        unsafe {
            self.int_en.write(0x00);
            self.line_ctrl.write(0x80);
            self.data.write(0x01);
            self.int_en.write(0x00);
            self.line_ctrl.write(0x03);
            self.fifo_ctrl.write(0xC7);
            self.modem_ctrl.write(0x0B);
            self.int_en.write(0x01);
        }
    }

    fn line_sts(&mut self) -> LineStsFlags {
        LineStsFlags::from_bits_truncate(unsafe { self.line_sts.read() })
    }

    /// Sends a single byte, spinning until the transmit buffer is empty.
    pub fn send(&mut self, data: u8) {
        while !self.line_sts().contains(LineStsFlags::OUTPUT_EMPTY) {
            core::hint::spin_loop();
        }
        unsafe { self.data.write(data) };
    }

    /// Writes a byte, translating `\n` to `\r\n` and backspace to a visible erase.
    pub fn write(&mut self, b: u8) {
        match b {
            8 | 0x7F => {
                self.send(8);
                self.send(b' ');
                self.send(8);
            }
            b'\n' => {
                self.send(b'\r');
                self.send(b'\n');
            }
            _ => self.send(b),
        }
    }
}
