/*
 * Kernel Heap Allocator
 *
 * This kernel has no virtual memory manager: thread stacks, ready/sleeper
 * queues and wait-queue bookkeeping all live in a single statically-sized
 * heap region carved out of the kernel's BSS, handed to
 * `linked_list_allocator` as the global allocator. That's enough for a
 * single-CPU kernel with a bounded thread count and saves the crate the
 * complexity of a physical frame allocator and page tables it would
 * otherwise never use.
 */

use linked_list_allocator::LockedHeap;

/// Size of the kernel heap in bytes. Sized for a few hundred threads worth
/// of stacks (THREAD_STACK_SIZE each) plus control-block bookkeeping.
pub const HEAP_SIZE: usize = 8 * 1024 * 1024;

#[repr(align(16))]
struct HeapMemory([u8; HEAP_SIZE]);

#[cfg(not(test))]
static mut HEAP_MEMORY: HeapMemory = HeapMemory([0; HEAP_SIZE]);

// Under a hosted test build, the standard library's own global allocator
// is already in charge; registering a second one is a compile error, and
// there is no boot sequence to call `init()` from anyway.
#[cfg(not(test))]
#[global_allocator]
static ALLOCATOR: LockedHeap = LockedHeap::empty();

/// Initialize the kernel heap. Must be called exactly once, before any
/// code that allocates (`Box`, `Vec`, thread stacks, ...) runs.
///
/// # Safety
/// Must only be called once, from `kstart`, before the scheduler spawns
/// any thread or the memory it governs is still uninitialized garbage.
#[cfg(not(test))]
pub fn init() {
    log::info!("Initializing kernel heap ({} KiB)...", HEAP_SIZE / 1024);
    unsafe {
        let start = core::ptr::addr_of_mut!(HEAP_MEMORY) as *mut u8;
        ALLOCATOR.lock().init(start, HEAP_SIZE);
    }
    log::info!("Kernel heap initialized");
}

#[cfg(not(test))]
#[alloc_error_handler]
fn alloc_error(layout: core::alloc::Layout) -> ! {
    panic!("kernel heap allocation failed: {:?}", layout);
}
