/*
 * Interrupt Gate
 *
 * This module is the kernel's sole mutual-exclusion mechanism. CLUU-style
 * kernels running on a single CPU never need spinlocks: disabling interrupts
 * is enough to make a section of code atomic with respect to every other
 * piece of kernel code, since nothing else can run until they're restored.
 *
 * `disable()` returns the interrupt level that was in effect before the
 * call, so callers can nest disable/restore pairs correctly without
 * clobbering an outer critical section's state. `without_interrupts` wraps
 * the common disable-run-restore pattern in an RAII guard.
 *
 * On a hosted test build there is no real CPU to fault, so `cli`/`sti`
 * would trap in ring 3. The backend is swapped for a plain atomic flag in
 * that configuration, which is enough to exercise the scheduling and
 * synchronization logic that sits on top of this gate.
 */

use core::sync::atomic::{AtomicBool, Ordering};

#[cfg(not(test))]
mod backend {
    use x86_64::instructions::interrupts;

    pub fn are_enabled() -> bool {
        interrupts::are_enabled()
    }

    pub fn enable() {
        interrupts::enable();
    }

    pub fn disable_raw() {
        interrupts::disable();
    }
}

#[cfg(test)]
mod backend {
    use core::sync::atomic::{AtomicBool, Ordering};

    static ENABLED: AtomicBool = AtomicBool::new(true);

    pub fn are_enabled() -> bool {
        ENABLED.load(Ordering::SeqCst)
    }

    pub fn enable() {
        ENABLED.store(true, Ordering::SeqCst);
    }

    pub fn disable_raw() {
        ENABLED.store(false, Ordering::SeqCst);
    }
}

/// Set when the scheduler is running inside a hardware interrupt handler.
/// Lets code such as `sema_up` assert it is never invoked from a context
/// where blocking would be fatal.
static IN_INTERRUPT_CONTEXT: AtomicBool = AtomicBool::new(false);

pub fn in_interrupt_context() -> bool {
    IN_INTERRUPT_CONTEXT.load(Ordering::SeqCst)
}

/// RAII marker set for the duration of an ISR body.
pub struct InterruptContextGuard;

impl InterruptContextGuard {
    pub fn enter() -> Self {
        IN_INTERRUPT_CONTEXT.store(true, Ordering::SeqCst);
        InterruptContextGuard
    }
}

impl Drop for InterruptContextGuard {
    fn drop(&mut self) {
        IN_INTERRUPT_CONTEXT.store(false, Ordering::SeqCst);
    }
}

/// Disable interrupts, returning the previous level (`true` = were enabled).
pub fn disable() -> bool {
    let prev = backend::are_enabled();
    backend::disable_raw();
    prev
}

/// Restore a previously-saved interrupt level.
pub fn restore(prev_level: bool) {
    if prev_level {
        backend::enable();
    }
}

pub fn are_enabled() -> bool {
    backend::are_enabled()
}

pub fn enable() {
    backend::enable();
}

pub fn disable_unconditionally() {
    backend::disable_raw();
}

/// Execute a closure with interrupts disabled, restoring the prior level on
/// every exit path including panics.
pub fn without_interrupts<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    let _guard = DisableInterrupts::new();
    f()
}

/// RAII guard that disables interrupts for its lifetime and restores
/// whatever level was in effect when it was created.
pub struct DisableInterrupts {
    prev_level: bool,
}

impl DisableInterrupts {
    pub fn new() -> Self {
        Self {
            prev_level: disable(),
        }
    }
}

impl Default for DisableInterrupts {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for DisableInterrupts {
    fn drop(&mut self) {
        restore(self.prev_level);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disable_returns_prior_level_and_restore_round_trips() {
        enable();
        let prev = disable();
        assert!(prev);
        assert!(!are_enabled());
        restore(prev);
        assert!(are_enabled());
    }

    #[test]
    fn nested_without_interrupts_restores_outer_level() {
        let outer_prev = disable();
        assert!(!are_enabled());
        without_interrupts(|| {
            assert!(!are_enabled());
        });
        assert!(!are_enabled());
        restore(outer_prev);
    }

    #[test]
    fn interrupt_context_guard_is_scoped() {
        assert!(!in_interrupt_context());
        {
            let _g = InterruptContextGuard::enter();
            assert!(in_interrupt_context());
        }
        assert!(!in_interrupt_context());
    }
}
