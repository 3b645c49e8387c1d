/*
 * Memory Management
 *
 * Just the kernel heap: this kernel has no address spaces to manage, no
 * physical frame allocator, and no paging beyond what the bootloader's
 * identity map already provides.
 */

pub mod heap;

/// Top-level memory initialization: bring up the kernel heap.
#[cfg(not(test))]
pub fn init() {
    heap::init();
}
