/*
 * External Boundary
 *
 * Named entry points a caller outside this crate (an exercise harness, a
 * higher layer of the kernel not in scope here) would use to drive the
 * scheduler, timer, and sync primitives without reaching into their
 * internals. Deliberately thin: each function forwards to the module
 * that actually implements the behavior.
 */

use crate::scheduler::{ThreadId, ThreadStats};
use crate::sync::{CondVar, Lock, Semaphore};

pub fn spawn_thread(entry_point: fn(), name: &str) -> ThreadId {
    crate::scheduler::spawn_thread(entry_point, name)
}

pub fn spawn_thread_with_priority(entry_point: fn(), name: &str, priority: u8) -> ThreadId {
    crate::scheduler::spawn_thread_with_priority(entry_point, name, priority)
}

pub fn yield_now() {
    crate::scheduler::yield_now();
}

pub fn current_thread_id() -> ThreadId {
    crate::scheduler::current_thread_id()
}

pub fn thread_stats() -> alloc::vec::Vec<ThreadStats> {
    crate::scheduler::get_thread_stats()
}

pub fn ticks() -> u64 {
    crate::timer::ticks()
}

pub fn sleep_ticks(delta: u64) {
    crate::timer::sleep_ticks(delta);
}

pub fn msleep(ms: u64) {
    crate::timer::msleep(ms);
}

pub fn usleep(us: u64) {
    crate::timer::usleep(us);
}

pub fn nsleep(ns: u64) {
    crate::timer::nsleep(ns);
}

pub const fn new_semaphore(value: u32) -> Semaphore {
    Semaphore::new(value)
}

pub const fn new_lock() -> Lock {
    Lock::new()
}

pub const fn new_condvar() -> CondVar {
    CondVar::new()
}
