/*
 * Condition Variable
 *
 * Mesa-style: a thread that is signaled is moved to the ready queue but
 * does not resume immediately, so it must reacquire the lock and recheck
 * its wait condition in a loop (the standard `while !cond { cv.wait(lock) }`
 * idiom), not an `if`.
 *
 * Each waiter parks on its own private one-shot semaphore rather than
 * sharing the condvar's own queue with a generic wait primitive. This is
 * what lets `signal` wake exactly one specific waiter (the
 * highest-priority one) instead of whichever thread happens to be next
 * in some shared structure, and keeps the donation-aware ordering
 * consistent with how locks and semaphores already pick a waiter.
 */

use alloc::vec::Vec;
use core::cell::UnsafeCell;

use crate::arch::x86_64::interrupts::without_interrupts;
use crate::scheduler::{self, ThreadId};
use crate::sync::lock::Lock;
use crate::sync::semaphore::Semaphore;

struct Waiter {
    thread_id: ThreadId,
    sema: Semaphore,
}

pub struct CondVar {
    waiters: UnsafeCell<Vec<*const Waiter>>,
}

// SAFETY: `waiters` is only touched with interrupts disabled, and this
// is a uniprocessor kernel.
unsafe impl Sync for CondVar {}
unsafe impl Send for CondVar {}

impl CondVar {
    pub const fn new() -> Self {
        Self {
            waiters: UnsafeCell::new(Vec::new()),
        }
    }

    /// Atomically release `lock` and block until signaled, then
    /// reacquire `lock` before returning. The caller must hold `lock`.
    ///
    /// # Panics
    /// Panics if the current thread does not hold `lock`.
    pub fn wait(&self, lock: &Lock) {
        assert!(
            lock.is_held_by_current(),
            "condvar wait called without holding the associated lock"
        );

        let waiter = Waiter {
            thread_id: scheduler::current_thread_id(),
            sema: Semaphore::new(0),
        };
        let waiter_ptr = &waiter as *const Waiter;

        without_interrupts(|| unsafe {
            (*self.waiters.get()).push(waiter_ptr);
        });

        lock.release();
        waiter.sema.down();
        lock.acquire();

        without_interrupts(|| unsafe {
            (*self.waiters.get()).retain(|&w| w != waiter_ptr);
        });
    }

    /// Wake the single highest-effective-priority waiter, if any.
    pub fn signal(&self, lock: &Lock) {
        debug_assert!(
            lock.is_held_by_current(),
            "condvar signal called without holding the associated lock"
        );

        let woken = without_interrupts(|| unsafe {
            let waiters = &mut *self.waiters.get();
            if waiters.is_empty() {
                return None;
            }
            let mut best_index = 0;
            let mut best_priority = 0u8;
            for (i, &w) in waiters.iter().enumerate() {
                let priority = scheduler::effective_priority_of((*w).thread_id).unwrap_or(0);
                if i == 0 || priority > best_priority {
                    best_priority = priority;
                    best_index = i;
                }
            }
            Some(waiters[best_index])
        });

        if let Some(w) = woken {
            unsafe { (*w).sema.up() };
            if scheduler::should_preempt() {
                scheduler::yield_now();
            }
        }
    }

    /// Wake every waiter.
    pub fn broadcast(&self, lock: &Lock) {
        while self.waiter_count() > 0 {
            self.signal(lock);
        }
    }

    pub fn waiter_count(&self) -> usize {
        without_interrupts(|| unsafe { (*self.waiters.get()).len() })
    }
}

impl Default for CondVar {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_condvar_has_no_waiters() {
        let cv = CondVar::new();
        assert_eq!(cv.waiter_count(), 0);
    }

    #[test]
    fn signal_on_empty_condvar_is_noop() {
        let lock = Lock::new();
        lock.acquire();
        let cv = CondVar::new();
        cv.signal(&lock); // must not panic
        lock.release();
    }
}
