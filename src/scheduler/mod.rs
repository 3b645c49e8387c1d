/*
 * Preemptive Priority Scheduler
 *
 * A preemptive, strict-priority round-robin scheduler. Threads are
 * switched automatically on every timer tick via the same interrupt-based
 * context-switch mechanism used for voluntary yielding (INT 0x81).
 *
 * SCHEDULING POLICY
 * ==================
 *
 * The highest-effective-priority ready thread always runs. Threads of
 * equal priority round-robin against each other in the order they became
 * ready. "Effective priority" starts out equal to a thread's base
 * priority and is raised by the lock-donation protocol in
 * `crate::sync::lock` whenever the thread holds a lock some higher
 * priority thread is waiting on; released back down when the donating
 * waiter goes away. The scheduler itself only ever reads
 * `effective_priority` — it has no idea donation exists.
 *
 * The ready queue is kept as a plain FIFO (`VecDeque`); rather than
 * keeping it sorted, the next thread to run is found by a linear scan for
 * the maximum-priority entry, with ties broken in FIFO order. This keeps
 * `make_ready`/enqueue paths O(1) and only pays the scan cost when a
 * thread is actually picked.
 *
 * THREAD LIFECYCLE
 * ================
 *
 *   Ready <--> Running
 *     ^           |
 *     |           v
 *     +------- Blocked
 *                 |
 *                 v
 *              Dying
 *
 * Blocked covers both sleeping threads (parked by the tick engine in
 * `crate::timer`) and threads waiting on a semaphore, lock, or condition
 * variable (parked by `crate::sync`). Both use the same
 * `block_current_thread`/`wake_thread` pair; the scheduler does not
 * distinguish why a thread is blocked.
 *
 * INTERRUPT-BASED CONTEXT SWITCHING
 * ==================================
 *
 * 1. CPU pushes the interrupt frame (RIP, CS, RFLAGS, RSP, SS).
 * 2. The naked handler pushes all general-purpose registers, completing
 *    an `InterruptContext` on the stack.
 * 3. `schedule_from_interrupt` picks the next thread and returns a
 *    pointer to its saved context.
 * 4. The handler switches RSP to that pointer, pops the registers back,
 *    and `iretq`s into the next thread.
 */

use alloc::{collections::VecDeque, string::String, vec::Vec};

use core::{
    arch::asm,
    sync::atomic::{AtomicBool, AtomicU64, Ordering},
};
use spin::Mutex;

pub mod thread;

pub use thread::{Thread, ThreadId, ThreadManager, ThreadStats, ThreadState, PRI_DEFAULT, PRI_MAX, PRI_MIN};

/// Thread stack size (64 KiB per thread).
pub const THREAD_STACK_SIZE: usize = 64 * 1024;

/// Ticks a thread may run before an equal-priority ready thread gets a
/// turn. Only breaks ties; a strictly higher-priority ready thread always
/// preempts immediately regardless of this.
const TIME_SLICE_TICKS: u64 = 4;

static SCHEDULER: Mutex<Option<Scheduler>> = Mutex::new(None);

/// Current running thread ID (atomic for IRQ safety).
static CURRENT_THREAD_ID: AtomicU64 = AtomicU64::new(0);

static SCHEDULER_ENABLED: AtomicBool = AtomicBool::new(false);

/// Set during critical scheduler operations; when true the timer
/// interrupt still ticks the clock but skips picking a new thread.
static PREEMPTION_DISABLED: AtomicBool = AtomicBool::new(false);

/// Interrupt frame pushed by the CPU when entering an interrupt handler.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct InterruptFrame {
    pub rip: u64,
    pub cs: u64,
    pub rflags: u64,
    pub rsp: u64,
    pub ss: u64,
}

impl Default for InterruptFrame {
    fn default() -> Self {
        Self {
            rip: 0,
            cs: 0x08,
            rflags: 0x202,
            rsp: 0,
            ss: 0x10,
        }
    }
}

/// Full saved CPU state for a thread not currently running: the
/// interrupt frame plus every general-purpose register, laid out to
/// match what the naked interrupt handlers push onto the stack.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct InterruptContext {
    pub r15: u64,
    pub r14: u64,
    pub r13: u64,
    pub r12: u64,
    pub r11: u64,
    pub r10: u64,
    pub r9: u64,
    pub r8: u64,
    pub rbp: u64,
    pub rdi: u64,
    pub rsi: u64,
    pub rdx: u64,
    pub rcx: u64,
    pub rbx: u64,
    pub rax: u64,
    pub iret_frame: InterruptFrame,
}

impl Default for InterruptContext {
    fn default() -> Self {
        Self {
            r15: 0,
            r14: 0,
            r13: 0,
            r12: 0,
            r11: 0,
            r10: 0,
            r9: 0,
            r8: 0,
            rbp: 0,
            rdi: 0,
            rsi: 0,
            rdx: 0,
            rcx: 0,
            rbx: 0,
            rax: 0,
            iret_frame: InterruptFrame::default(),
        }
    }
}

pub struct Scheduler {
    threads: Vec<Thread>,
    ready_queue: VecDeque<ThreadId>,
    next_thread_id: ThreadId,
}

impl Scheduler {
    fn new() -> Self {
        Self {
            threads: Vec::new(),
            ready_queue: VecDeque::new(),
            next_thread_id: ThreadId(1), // 0 is reserved for the idle thread
        }
    }

    fn create_thread(&mut self, entry_point: fn(), name: &str, priority: u8) -> ThreadId {
        let thread_id = self.next_thread_id;
        self.next_thread_id.0 += 1;

        let stack = alloc::vec![0u8; THREAD_STACK_SIZE].into_boxed_slice();
        let stack_top = stack.as_ptr() as u64 + THREAD_STACK_SIZE as u64;

        let mut interrupt_context = InterruptContext::default();
        interrupt_context.iret_frame.rip = entry_point as u64;
        interrupt_context.iret_frame.rsp = stack_top;

        let thread = Thread::new(thread_id, String::from(name), stack, interrupt_context, priority);
        self.threads.push(thread);
        self.ready_queue.push_back(thread_id);

        log::info!("created thread '{}' ({}) at priority {}", name, thread_id, priority);
        thread_id
    }

    /// Pop the highest effective-priority thread from the ready queue,
    /// breaking ties in FIFO order.
    fn pop_highest_priority_ready(&mut self) -> Option<ThreadId> {
        if self.ready_queue.is_empty() {
            return None;
        }

        let mut best_index = 0;
        let mut best_priority = 0u8;
        for (i, &tid) in self.ready_queue.iter().enumerate() {
            let priority = self
                .threads
                .iter()
                .find(|t| t.id == tid)
                .map(|t| t.effective_priority)
                .unwrap_or(PRI_MIN);
            if i == 0 || priority > best_priority {
                best_priority = priority;
                best_index = i;
            }
        }

        self.ready_queue.remove(best_index)
    }

    pub(crate) fn find_thread(&self, thread_id: ThreadId) -> Option<&Thread> {
        self.threads.iter().find(|t| t.id == thread_id)
    }

    pub(crate) fn find_thread_mut(&mut self, thread_id: ThreadId) -> Option<&mut Thread> {
        self.threads.iter_mut().find(|t| t.id == thread_id)
    }
}

/// Run `f` with shared access to the scheduler singleton. Panics if
/// called before `init()`.
pub fn with_scheduler<F, R>(f: F) -> R
where
    F: FnOnce(&Scheduler) -> R,
{
    #[cfg(test)]
    lazily_init_for_test();

    let guard = SCHEDULER.lock();
    f(guard.as_ref().expect("scheduler not initialized"))
}

/// Run `f` with exclusive access to the scheduler singleton. Panics if
/// called before `init()`.
pub fn with_scheduler_mut<F, R>(f: F) -> R
where
    F: FnOnce(&mut Scheduler) -> R,
{
    #[cfg(test)]
    lazily_init_for_test();

    let mut guard = SCHEDULER.lock();
    f(guard.as_mut().expect("scheduler not initialized"))
}

/// Unit tests exercise `sync`/`timer` code that reaches into the
/// scheduler singleton without ever calling `init()` (there is no boot
/// sequence in a hosted test binary). Rather than require every such
/// test to set up a scheduler by hand, lazily create an empty one on
/// first access so those calls degrade to "thread not found" instead of
/// panicking.
#[cfg(test)]
fn lazily_init_for_test() {
    let mut guard = SCHEDULER.lock();
    if guard.is_none() {
        *guard = Some(Scheduler::new());
    }
}

pub fn init() {
    log::info!("initializing priority scheduler");
    *SCHEDULER.lock() = Some(Scheduler::new());
}

/// Spawn a new thread at [`PRI_DEFAULT`].
pub fn spawn_thread(entry_point: fn(), name: &str) -> ThreadId {
    spawn_thread_with_priority(entry_point, name, PRI_DEFAULT)
}

pub fn spawn_thread_with_priority(entry_point: fn(), name: &str, priority: u8) -> ThreadId {
    PREEMPTION_DISABLED.store(true, Ordering::SeqCst);
    let thread_id = with_scheduler_mut(|s| s.create_thread(entry_point, name, priority));
    PREEMPTION_DISABLED.store(false, Ordering::SeqCst);
    thread_id
}

fn idle_thread_main() {
    log::info!("idle thread starting");
    let mut idle_counter = 0u64;
    loop {
        if idle_counter % 10_000 == 0 {
            log::trace!("idle tick {}", idle_counter);
        }
        idle_counter = idle_counter.wrapping_add(1);
        x86_64::instructions::hlt();
    }
}

/// Spawn the idle thread and start preemptive scheduling. Timer
/// interrupts perform context switches from this point on.
pub fn enable() {
    spawn_thread_with_priority(idle_thread_main, "idle", PRI_MIN);
    SCHEDULER_ENABLED.store(true, Ordering::SeqCst);
    log::info!("scheduler enabled");
}

pub fn is_enabled() -> bool {
    SCHEDULER_ENABLED.load(Ordering::SeqCst)
}

/// Voluntarily give up the CPU via a software interrupt (INT 0x81),
/// which is handled identically to a timer preemption.
pub fn yield_now() {
    if !SCHEDULER_ENABLED.load(Ordering::SeqCst) {
        return;
    }
    if !crate::arch::x86_64::interrupts::are_enabled() {
        return;
    }
    unsafe {
        asm!("int 0x81", options(nostack));
    }
}

pub fn current_thread_id() -> ThreadId {
    ThreadId(CURRENT_THREAD_ID.load(Ordering::SeqCst))
}

pub fn get_thread_name(thread_id: ThreadId) -> Option<String> {
    with_scheduler(|s| s.find_thread(thread_id).map(|t| t.name.clone()))
}

/// Mark the current thread `Blocked` without yielding. Callers that must
/// enqueue themselves onto a wait structure (the sleeper queue, a
/// semaphore's waiter list) and transition to `Blocked` as a single
/// atomic step — so no wakeup lands in the gap between the two and gets
/// lost — should call this from inside the same `without_interrupts`
/// section that does the enqueue, then yield afterward with interrupts
/// restored.
pub fn mark_current_blocked() {
    if !SCHEDULER_ENABLED.load(Ordering::SeqCst) {
        return;
    }
    let current_id = current_thread_id();
    if current_id.0 == 0 {
        return; // idle thread is never blocked
    }
    with_scheduler_mut(|s| {
        if let Some(thread) = s.find_thread_mut(current_id) {
            thread.state = ThreadState::Blocked;
        }
    });
}

/// Remove the current thread from scheduling until [`wake_thread`] is
/// called on it. Must be paired with a wake from somewhere — the timer
/// tick engine, a semaphore/lock/condvar release, or another thread —
/// or the thread sleeps forever.
pub fn block_current_thread() {
    mark_current_blocked();
    yield_now();
}

/// Move a blocked thread back to the ready queue. No-op if the thread is
/// not currently blocked. IRQ-safe: callable from interrupt context.
pub fn wake_thread(thread_id: ThreadId) {
    if !SCHEDULER_ENABLED.load(Ordering::SeqCst) {
        return;
    }
    with_scheduler_mut(|s| {
        let should_enqueue = if let Some(thread) = s.find_thread_mut(thread_id) {
            thread.wake_tick = None;
            if thread.state == ThreadState::Blocked {
                thread.state = ThreadState::Ready;
                true
            } else {
                false
            }
        } else {
            false
        };
        if should_enqueue {
            s.ready_queue.push_back(thread_id);
        }
    });
}

/// Read a thread's current effective priority. Used by the donation
/// protocol to compare a waiter's priority against a holder's.
pub fn effective_priority_of(thread_id: ThreadId) -> Option<u8> {
    with_scheduler(|s| s.find_thread(thread_id).map(|t| t.effective_priority))
}

/// Highest effective priority among ready threads, or `None` if the
/// ready queue is empty.
fn highest_ready_priority(scheduler: &Scheduler) -> Option<u8> {
    scheduler
        .ready_queue
        .iter()
        .filter_map(|&tid| scheduler.find_thread(tid).map(|t| t.effective_priority))
        .max()
}

/// True if some ready thread now outranks the running thread and should
/// preempt it. Called from thread context after waking a waiter
/// (`Semaphore::up`, `Lock::release`, `CondVar::signal`) so the caller
/// can `yield_now()` immediately, per the "a higher-priority thread
/// becoming ready preempts the running thread immediately in thread
/// context" ordering guarantee.
pub fn should_preempt() -> bool {
    if !SCHEDULER_ENABLED.load(Ordering::SeqCst) {
        return false;
    }
    with_scheduler(|s| {
        let current_id = current_thread_id();
        let current_priority = s.find_thread(current_id).map(|t| t.effective_priority).unwrap_or(PRI_MIN);
        highest_ready_priority(s).is_some_and(|p| p > current_priority)
    })
}

/// Run `f` with mutable access to a single thread's control block, by ID.
pub fn with_thread_mut<F, R>(thread_id: ThreadId, f: F) -> Option<R>
where
    F: FnOnce(&mut Thread) -> R,
{
    with_scheduler_mut(|s| s.find_thread_mut(thread_id).map(f))
}

pub fn with_thread<F, R>(thread_id: ThreadId, f: F) -> Option<R>
where
    F: FnOnce(&Thread) -> R,
{
    with_scheduler(|s| s.find_thread(thread_id).map(f))
}

pub fn get_thread_stats() -> Vec<ThreadStats> {
    with_scheduler(|s| {
        s.threads
            .iter()
            .map(|t| ThreadStats {
                id: t.id,
                name: t.name.clone(),
                state: t.state,
                base_priority: t.base_priority,
                effective_priority: t.effective_priority,
                cpu_time_ticks: t.cpu_time_ticks,
            })
            .collect()
    })
}

/// Software interrupt handler for voluntary yielding (INT 0x81).
///
/// Identical to the timer handler except it sends no EOI — software
/// interrupts never touch the PIC.
#[unsafe(naked)]
pub unsafe extern "C" fn yield_interrupt_handler() {
    core::arch::naked_asm!(
        "push rax",
        "push rbx",
        "push rcx",
        "push rdx",
        "push rsi",
        "push rdi",
        "push rbp",
        "push r8",
        "push r9",
        "push r10",
        "push r11",
        "push r12",
        "push r13",
        "push r14",
        "push r15",

        "mov rdi, rsp",
        "call {schedule_fn}",
        "mov rsp, rax",

        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop r11",
        "pop r10",
        "pop r9",
        "pop r8",
        "pop rbp",
        "pop rdi",
        "pop rsi",
        "pop rdx",
        "pop rcx",
        "pop rbx",
        "pop rax",

        "iretq",

        schedule_fn = sym schedule_from_interrupt,
    )
}

/// Preemptive timer interrupt handler (IRQ0). Pushes a full
/// `InterruptContext`, hands it to `schedule_from_timer_tick`, switches to
/// whatever context comes back, sends PIC EOI, and `iretq`s.
#[unsafe(naked)]
pub unsafe extern "C" fn preemptive_timer_interrupt_handler() {
    core::arch::naked_asm!(
        "push rax",
        "push rbx",
        "push rcx",
        "push rdx",
        "push rsi",
        "push rdi",
        "push rbp",
        "push r8",
        "push r9",
        "push r10",
        "push r11",
        "push r12",
        "push r13",
        "push r14",
        "push r15",

        "mov rdi, rsp",
        "call {schedule_fn}",
        "mov rsp, rax",

        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop r11",
        "pop r10",
        "pop r9",
        "pop r8",
        "pop rbp",
        "pop rdi",
        "pop rsi",
        "pop rdx",
        "pop rcx",
        "pop rbx",
        "pop rax",

        "push rax",
        "mov al, 0x20",
        "out 0x20, al",
        "pop rax",

        "iretq",

        schedule_fn = sym schedule_from_timer_tick,
    )
}

/// Entry point for voluntary yielding (INT 0x81): always gives up the
/// CPU, enqueueing the running thread (possibly dispatching it again via
/// FIFO tie-breaking if it's still the highest-priority ready thread).
#[unsafe(no_mangle)]
pub extern "C" fn schedule_from_interrupt(current_ctx_ptr: *const InterruptContext) -> *const InterruptContext {
    dispatch(current_ctx_ptr, true)
}

/// Entry point for the timer tick (IRQ0): only switches away from the
/// running thread if a strictly higher-priority thread is ready, or an
/// equal-priority thread is ready and the running thread's time slice
/// has expired. Ticking the clock (and waking due sleepers) happens on
/// every call regardless of whether a switch follows.
#[unsafe(no_mangle)]
pub extern "C" fn schedule_from_timer_tick(current_ctx_ptr: *const InterruptContext) -> *const InterruptContext {
    dispatch(current_ctx_ptr, false)
}

/// Core dispatch routine, called from interrupt context with interrupts
/// disabled. Ticks the clock, decides whether to switch, and if so picks
/// the next thread and swaps saved contexts. Must not block.
///
/// `force_switch` is true for voluntary yields, which always give up the
/// CPU; false for timer ticks, which only preempt a strictly
/// higher-priority running thread or break a round-robin tie (see
/// `TIME_SLICE_TICKS`).
fn dispatch(current_ctx_ptr: *const InterruptContext, force_switch: bool) -> *const InterruptContext {
    if !SCHEDULER_ENABLED.load(Ordering::SeqCst) {
        return current_ctx_ptr;
    }

    if PREEMPTION_DISABLED.load(Ordering::SeqCst) {
        crate::timer::on_tick();
        return current_ctx_ptr;
    }

    let current_tick = crate::timer::on_tick();

    let mut sched_guard = SCHEDULER.lock();
    let scheduler = match sched_guard.as_mut() {
        Some(s) => s,
        None => return current_ctx_ptr,
    };

    let current_id = current_thread_id();

    if !force_switch {
        // The boot context (before the very first dispatch) has no
        // corresponding Thread; treat it as always preemptable so the
        // first ever switch (into idle) isn't blocked on a tie that can
        // never resolve.
        let current_thread_exists = scheduler.find_thread(current_id).is_some();
        let should_switch = if !current_thread_exists {
            true
        } else {
            let current_priority = scheduler.find_thread(current_id).map(|t| t.effective_priority).unwrap_or(PRI_MIN);
            let head_priority = highest_ready_priority(scheduler);
            let slice_expired = scheduler
                .find_thread(current_id)
                .map(|t| current_tick.saturating_sub(t.last_scheduled_tick) >= TIME_SLICE_TICKS)
                .unwrap_or(false);
            match head_priority {
                Some(p) if p > current_priority => true,
                Some(p) if p == current_priority && slice_expired => true,
                _ => false,
            }
        };
        if !should_switch {
            return current_ctx_ptr;
        }
    }

    let next_id = match scheduler.pop_highest_priority_ready() {
        Some(id) => id,
        None => return current_ctx_ptr,
    };

    if current_id == next_id && current_id.0 != 0 {
        scheduler.ready_queue.push_back(current_id);
        return current_ctx_ptr;
    }

    if current_id.0 != 0 {
        if let Some(current_thread) = scheduler.find_thread_mut(current_id) {
            unsafe {
                current_thread.interrupt_context = *current_ctx_ptr;
            }
            if current_thread.last_scheduled_tick > 0 || current_tick > 0 {
                let elapsed = current_tick.saturating_sub(current_thread.last_scheduled_tick);
                current_thread.cpu_time_ticks = current_thread.cpu_time_ticks.saturating_add(elapsed);
            }
            if current_thread.state == ThreadState::Running {
                current_thread.state = ThreadState::Ready;
            }
            if current_thread.state == ThreadState::Ready {
                scheduler.ready_queue.push_back(current_id);
            }
            // Blocked and Dying threads stay off the ready queue; a
            // blocked thread is re-enqueued only by wake_thread().
        }
    }

    let next_ctx_ptr = if let Some(next_thread) = scheduler.find_thread_mut(next_id) {
        next_thread.state = ThreadState::Running;
        next_thread.last_scheduled_tick = current_tick;
        &next_thread.interrupt_context as *const InterruptContext
    } else {
        return current_ctx_ptr;
    };

    CURRENT_THREAD_ID.store(next_id.0, Ordering::SeqCst);
    next_ctx_ptr
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_scheduler() -> Scheduler {
        Scheduler::new()
    }

    #[test]
    fn create_thread_lands_in_ready_queue() {
        let mut s = fresh_scheduler();
        let id = s.create_thread(|| {}, "t1", PRI_DEFAULT);
        assert_eq!(s.ready_queue.len(), 1);
        assert_eq!(s.ready_queue[0], id);
    }

    #[test]
    fn pop_highest_priority_prefers_higher_priority() {
        let mut s = fresh_scheduler();
        let low = s.create_thread(|| {}, "low", 10);
        let high = s.create_thread(|| {}, "high", 50);
        let picked = s.pop_highest_priority_ready().unwrap();
        assert_eq!(picked, high);
        let remaining = s.pop_highest_priority_ready().unwrap();
        assert_eq!(remaining, low);
    }

    #[test]
    fn pop_highest_priority_breaks_ties_fifo() {
        let mut s = fresh_scheduler();
        let first = s.create_thread(|| {}, "a", 20);
        let second = s.create_thread(|| {}, "b", 20);
        assert_eq!(s.pop_highest_priority_ready().unwrap(), first);
        assert_eq!(s.pop_highest_priority_ready().unwrap(), second);
    }

    #[test]
    fn highest_ready_priority_picks_max_of_ready_queue() {
        let mut s = fresh_scheduler();
        assert_eq!(highest_ready_priority(&s), None);
        s.create_thread(|| {}, "low", 10);
        s.create_thread(|| {}, "high", 50);
        assert_eq!(highest_ready_priority(&s), Some(50));
    }

    #[test]
    fn effective_priority_change_affects_next_pick() {
        let mut s = fresh_scheduler();
        let a = s.create_thread(|| {}, "a", 20);
        let b = s.create_thread(|| {}, "b", 10);
        s.find_thread_mut(b).unwrap().effective_priority = 99;
        assert_eq!(s.pop_highest_priority_ready().unwrap(), b);
        assert_eq!(s.pop_highest_priority_ready().unwrap(), a);
    }
}
