/*
 * Thread Control Block
 *
 * Each thread has its own stack and interrupt context for preemptive
 * scheduling, plus the bookkeeping the priority-donation protocol needs:
 * a base priority the thread was created or last set with, an effective
 * priority recomputed whenever a lock it holds gains or loses a waiter,
 * the set of locks it currently holds, and the lock it is currently
 * blocked on (if any).
 *
 * `held_locks`/`wait_on_lock` store raw pointers rather than owned
 * references: locks are not owned by the threads that use them (a lock is
 * typically a `'static` or `Arc`-pinned value shared by many threads), so
 * this is a non-owning relation, mirroring the pointer-based
 * holder/wait_on_lock links of the kernel this scheduler is modeled on.
 * It is sound because a `Lock` is never moved or dropped while a thread
 * still holds or waits on it.
 */

use alloc::{boxed::Box, string::String};
use core::fmt;

use super::InterruptContext;
use crate::sync::lock::Lock;

/// Thread identifier, unique for the lifetime of the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(pub u64);

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Thread({})", self.0)
    }
}

/// Thread priority, clamped to [`PRI_MIN`, `PRI_MAX`]. Higher runs first.
pub const PRI_MIN: u8 = 0;
pub const PRI_MAX: u8 = 63;
pub const PRI_DEFAULT: u8 = 31;

pub fn clamp_priority(p: u8) -> u8 {
    p.clamp(PRI_MIN, PRI_MAX)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    Ready,
    Running,
    Blocked,
    /// Exited but not yet reaped; kept out of every queue.
    Dying,
}

pub struct Thread {
    pub id: ThreadId,
    pub name: String,
    pub state: ThreadState,
    pub stack: Box<[u8]>,

    pub interrupt_context: InterruptContext,

    /// Priority this thread was created with or last set via an explicit
    /// priority change. Never altered by donation.
    pub base_priority: u8,
    /// `max(base_priority, highest priority waiting on any lock this
    /// thread holds)`. Recomputed by the donation protocol in
    /// `crate::sync::lock`; everything else in the scheduler reads this
    /// field to decide scheduling order.
    pub effective_priority: u8,

    /// Locks currently held by this thread, most-recently-acquired last.
    pub held_locks: alloc::vec::Vec<*const Lock>,
    /// Lock this thread is blocked trying to acquire, if any. Used to walk
    /// the donation chain through nested lock holders.
    pub wait_on_lock: Option<*const Lock>,

    pub cpu_time_ticks: u64,
    pub last_scheduled_tick: u64,

    /// Tick at which a sleeping thread should be woken. `None` unless the
    /// thread is parked in the sleep engine's sleeper queue.
    pub wake_tick: Option<u64>,

    pub exit_code: Option<i32>,
}

// SAFETY: Thread is only ever accessed while holding the scheduler's lock,
// so the raw lock pointers it carries are never touched concurrently.
unsafe impl Send for Thread {}

impl Thread {
    pub fn new(
        id: ThreadId,
        name: String,
        stack: Box<[u8]>,
        interrupt_context: InterruptContext,
        priority: u8,
    ) -> Self {
        let priority = clamp_priority(priority);
        Self {
            id,
            name,
            state: ThreadState::Ready,
            stack,
            interrupt_context,
            base_priority: priority,
            effective_priority: priority,
            held_locks: alloc::vec::Vec::new(),
            wait_on_lock: None,
            cpu_time_ticks: 0,
            last_scheduled_tick: 0,
            wake_tick: None,
            exit_code: None,
        }
    }
}

impl fmt::Debug for Thread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Thread")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state)
            .field("base_priority", &self.base_priority)
            .field("effective_priority", &self.effective_priority)
            .finish()
    }
}

// ============================================================================
// THREAD MANAGER
// ============================================================================

use alloc::string::ToString;
use alloc::vec::Vec;

/// Namespaced thread lifecycle operations. A zero-sized type purely for
/// organizing the public API; all state lives in the scheduler singleton.
pub struct ThreadManager;

impl ThreadManager {
    /// Spawn a new ready thread at `PRI_DEFAULT` priority.
    pub fn spawn(entry_point: fn(), name: &str) -> ThreadId {
        Self::spawn_with_priority(entry_point, name, PRI_DEFAULT)
    }

    pub fn spawn_with_priority(entry_point: fn(), name: &str, priority: u8) -> ThreadId {
        super::with_scheduler_mut(|s| s.create_thread(entry_point, name, priority))
    }

    /// Terminate the current thread with an exit code. Never returns.
    ///
    /// # Panics
    /// Panics if called from the idle thread.
    pub fn exit(exit_code: i32) -> ! {
        let current_id = super::current_thread_id();
        if current_id.0 == 0 {
            panic!("cannot exit the idle thread");
        }

        log::info!(
            "thread {} ({}) exiting with code {}",
            current_id.0,
            super::get_thread_name(current_id).unwrap_or_else(|| "?".to_string()),
            exit_code
        );

        crate::arch::x86_64::interrupts::without_interrupts(|| {
            super::with_scheduler_mut(|s| {
                if let Some(thread) = s.find_thread_mut(current_id) {
                    thread.state = ThreadState::Dying;
                    thread.exit_code = Some(exit_code);
                }
                s.ready_queue.retain(|&tid| tid != current_id);
            });
        });

        super::yield_now();
        unreachable!("exited thread was rescheduled");
    }

    pub fn current_id() -> ThreadId {
        super::current_thread_id()
    }

    pub fn with_current<F, R>(f: F) -> Option<R>
    where
        F: FnOnce(&Thread) -> R,
    {
        let current_id = super::current_thread_id();
        super::with_scheduler(|s| s.threads.iter().find(|t| t.id == current_id).map(f))
    }

    /// Snapshot of every thread's scheduling-relevant state.
    pub fn stats() -> Vec<super::ThreadStats> {
        super::get_thread_stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_thread(id: u64, priority: u8) -> Thread {
        Thread::new(
            ThreadId(id),
            alloc::string::String::from("t"),
            alloc::vec![0u8; 16].into_boxed_slice(),
            InterruptContext::default(),
            priority,
        )
    }

    #[test]
    fn new_thread_effective_priority_equals_base() {
        let t = dummy_thread(1, 40);
        assert_eq!(t.base_priority, 40);
        assert_eq!(t.effective_priority, 40);
    }

    #[test]
    fn priority_is_clamped_to_valid_range() {
        let t = dummy_thread(1, 255);
        assert_eq!(t.base_priority, PRI_MAX);
    }
}
