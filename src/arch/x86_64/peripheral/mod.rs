/*
 * Peripheral Device Management
 *
 * Centralizes the hardware this kernel actually touches: the legacy PIC
 * for interrupt routing and the COM1 serial port used for all kernel
 * output. Display/input peripherals are outside this kernel's scope.
 */

use spin::Mutex;

use self::uart_16550::SerialPort;

pub mod pic;
pub mod uart_16550;

/// Mutex-protected static instance of the COM1 serial port.
pub static COM1: Mutex<SerialPort> = Mutex::new(SerialPort::new(0x3F8));

/// Initializes the debug port (COM1) for logging. Must run before any
/// logging occurs.
pub fn init_debug_port() {
    COM1.lock().init();
}

/// Initializes the remaining peripherals (the PIC) once logging is up.
pub fn init_peripherals() {
    pic::init_pic();
    log::info!("PIC initialization complete");
}
