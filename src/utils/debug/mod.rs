/*
 * Debugging and Logging Utilities
 *
 * Structured logging backed by the serial console.
 */

pub mod logger;
pub mod writer;

/// Initialize debug infrastructure (COM1 port for logging).
pub fn init_debug_infrastructure() {
    crate::arch::x86_64::peripheral::init_debug_port();
}
