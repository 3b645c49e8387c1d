/*
 * Counting Semaphore
 *
 * The waiter list and count are protected by disabling interrupts for
 * the duration of each operation rather than by a spinlock: this is a
 * uniprocessor kernel, so once interrupts are off nothing else can run
 * until they come back on, and that is the only concurrency this state
 * needs protecting from.
 */

use alloc::vec::Vec;
use core::cell::UnsafeCell;

use crate::arch::x86_64::interrupts::without_interrupts;
use crate::scheduler::{self, ThreadId};

pub struct Semaphore {
    count: UnsafeCell<u32>,
    waiters: UnsafeCell<Vec<ThreadId>>,
}

// SAFETY: every access to `count`/`waiters` happens with interrupts
// disabled, and this is a uniprocessor kernel, so accesses never race.
unsafe impl Sync for Semaphore {}
unsafe impl Send for Semaphore {}

impl Semaphore {
    pub const fn new(value: u32) -> Self {
        Self {
            count: UnsafeCell::new(value),
            waiters: UnsafeCell::new(Vec::new()),
        }
    }

    /// P operation. Blocks until the count is positive, then decrements
    /// it. Waiters are woken in highest-effective-priority order, not
    /// FIFO order.
    pub fn down(&self) {
        loop {
            // Enqueueing onto `waiters` and transitioning to `Blocked`
            // must happen under the same interrupt-disabled section: if
            // an interrupt (e.g. a racing `up()`) landed between the two,
            // it would see the thread in `waiters` but still `Running`
            // and `wake_thread` would no-op, losing the wakeup.
            let parked = without_interrupts(|| unsafe {
                if *self.count.get() > 0 {
                    *self.count.get() -= 1;
                    false
                } else {
                    (*self.waiters.get()).push(scheduler::current_thread_id());
                    scheduler::mark_current_blocked();
                    true
                }
            });
            if !parked {
                return;
            }
            scheduler::yield_now();
        }
    }

    /// Non-blocking P. Returns `true` and decrements the count only if
    /// it was already positive.
    pub fn try_down(&self) -> bool {
        without_interrupts(|| unsafe {
            if *self.count.get() > 0 {
                *self.count.get() -= 1;
                true
            } else {
                false
            }
        })
    }

    /// V operation. Increments the count and, if anyone is waiting,
    /// wakes the highest-effective-priority waiter.
    pub fn up(&self) {
        let woken = without_interrupts(|| unsafe {
            *self.count.get() += 1;
            let waiters = &mut *self.waiters.get();
            if waiters.is_empty() {
                return None;
            }
            let mut best_index = 0;
            let mut best_priority = 0u8;
            for (i, &tid) in waiters.iter().enumerate() {
                let priority = scheduler::effective_priority_of(tid).unwrap_or(0);
                if i == 0 || priority > best_priority {
                    best_priority = priority;
                    best_index = i;
                }
            }
            Some(waiters.remove(best_index))
        });
        if let Some(thread_id) = woken {
            scheduler::wake_thread(thread_id);
            if scheduler::should_preempt() {
                scheduler::yield_now();
            }
        }
    }

    pub fn value(&self) -> u32 {
        without_interrupts(|| unsafe { *self.count.get() })
    }

    /// Highest effective priority among current waiters, if any. Used
    /// by the lock's donation protocol to recompute a holder's priority.
    pub fn max_waiter_priority(&self) -> Option<u8> {
        without_interrupts(|| unsafe {
            (*self.waiters.get())
                .iter()
                .filter_map(|&tid| scheduler::effective_priority_of(tid))
                .max()
        })
    }

    pub fn waiter_count(&self) -> usize {
        without_interrupts(|| unsafe { (*self.waiters.get()).len() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn down_consumes_available_permit() {
        let sem = Semaphore::new(1);
        assert!(sem.try_down());
        assert_eq!(sem.value(), 0);
    }

    #[test]
    fn try_down_fails_when_exhausted() {
        let sem = Semaphore::new(0);
        assert!(!sem.try_down());
    }

    #[test]
    fn up_increments_value() {
        let sem = Semaphore::new(0);
        sem.up();
        assert_eq!(sem.value(), 1);
    }

    #[test]
    fn max_waiter_priority_empty_is_none() {
        let sem = Semaphore::new(1);
        assert_eq!(sem.max_waiter_priority(), None);
    }
}
