/*
 * prio-kernel Boot Entry Point
 *
 * Freestanding single-core x86_64 entry point. Sets up a kernel stack,
 * jumps into `kstart`, and brings up the machine in the order that
 * matters: debug output first so every later step can log, then the
 * GDT/IDT (must be ready before anything can fault safely), then the
 * heap, then the scheduler and timer, then interrupts, then a handful
 * of demo threads to show the priority donation protocol at work.
 */

#![no_std]
#![no_main]
#![feature(abi_x86_interrupt)]
#![allow(dead_code)]

extern crate alloc;

use core::panic::PanicInfo;

use prio_kernel::{arch, external, memory, scheduler, sync, timer, utils};

#[repr(C, align(16))]
pub struct BootStack([u8; 64 * 1024]);

#[unsafe(no_mangle)]
pub static mut BOOT_STACK: BootStack = BootStack([0; 64 * 1024]);

/// Entry point the bootloader jumps to. Switches onto `BOOT_STACK` and
/// calls into Rust; never returns.
#[unsafe(naked)]
#[unsafe(no_mangle)]
pub unsafe extern "C" fn _start() -> ! {
    core::arch::naked_asm!(
        "lea rax, [rip + BOOT_STACK]",
        "add rax, {stack_size}",
        "mov rsp, rax",
        "jmp kstart",
        stack_size = const 64 * 1024,
    );
}

#[unsafe(no_mangle)]
pub extern "C" fn kstart() -> ! {
    utils::debug::init_debug_infrastructure();
    utils::debug::logger::init(true);
    log::info!("prio-kernel starting");

    arch::x86_64::gdt::init();
    arch::x86_64::idt::init();
    arch::x86_64::peripheral::init_peripherals();

    memory::init();

    log::info!("initializing scheduler and timer");
    scheduler::init();
    timer::init();

    x86_64::instructions::interrupts::enable();
    log::info!("interrupts enabled");

    spawn_demo_threads();

    scheduler::enable();
    log::info!("scheduler enabled, handing off to ready threads");

    loop {
        x86_64::instructions::hlt();
    }
}

/// A lock held briefly by a low-priority thread while a high-priority
/// thread blocks on it, demonstrating priority donation end to end.
static DEMO_LOCK: sync::Lock = sync::Lock::new();

fn low_priority_worker() {
    loop {
        DEMO_LOCK.acquire();
        log::info!("low priority worker holding lock");
        timer::msleep(50);
        DEMO_LOCK.release();
        timer::msleep(200);
    }
}

fn high_priority_worker() {
    loop {
        timer::msleep(20);
        DEMO_LOCK.acquire();
        log::info!("high priority worker acquired lock");
        DEMO_LOCK.release();
    }
}

fn spawn_demo_threads() {
    external::spawn_thread_with_priority(low_priority_worker, "low-worker", scheduler::PRI_MIN + 5);
    external::spawn_thread_with_priority(high_priority_worker, "high-worker", scheduler::PRI_MAX - 5);
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    x86_64::instructions::interrupts::disable();

    if let Some(location) = info.location() {
        log::error!(
            "PANIC at {}:{}: {}",
            location.file(),
            location.line(),
            info.message()
        );
    } else {
        log::error!("PANIC: {}", info.message());
    }

    loop {
        x86_64::instructions::hlt();
    }
}
