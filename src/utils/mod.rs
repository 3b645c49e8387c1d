/*
 * Kernel Utilities
 *
 * Support code used throughout the kernel: the serial print macros and the
 * `log` backend they feed.
 */

#[macro_use]
pub mod macros;
pub mod debug;
