/*
 * Tick Counter and Sleep Engine
 *
 * Programs the 8254 PIT (channel 0) to fire IRQ0 at a fixed rate and
 * counts ticks since boot. Threads that ask to sleep are parked in a
 * queue sorted by the tick at which they should wake; each tick, the
 * front of the queue is popped and woken until the next entry's wake
 * tick is still in the future. This keeps per-tick wake cost
 * proportional to how many threads actually wake on that tick, not to
 * how many are sleeping overall.
 *
 * Calibration follows the textbook busy-wait approach: find how many
 * iterations of a tight loop fit in one tick by doubling a loop count
 * until it overshoots, then use that to convert sub-tick delays
 * (`usleep`/`nsleep`) into spin loops. Sleeps of a full tick or more are
 * handled by blocking the thread instead of spinning.
 */

use alloc::collections::BinaryHeap;
use core::cmp::Reverse;
use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use spin::Mutex;

use crate::scheduler::{self, ThreadId};

/// PIT runs at roughly 1.193182 MHz.
const PIT_BASE_FREQUENCY: u32 = 1_193_182;

/// Timer interrupt rate. 100 Hz gives 10ms resolution, matching the
/// granularity most small kernels of this kind use.
pub const TIMER_FREQ_HZ: u32 = 100;

static TICKS: AtomicU64 = AtomicU64::new(0);

/// Calibrated iterations of `spin_loop_hint` per tick. Filled in by
/// `init()`; a fixed stand-in value is used under test so sub-tick
/// sleeps remain deterministic without ever touching hardware.
static LOOPS_PER_TICK: AtomicU32 = AtomicU32::new(0);

#[derive(Eq, PartialEq)]
struct SleepEntry {
    wake_tick: u64,
    thread_id: ThreadId,
}

impl Ord for SleepEntry {
    fn cmp(&self, other: &Self) -> core::cmp::Ordering {
        self.wake_tick.cmp(&other.wake_tick)
    }
}
impl PartialOrd for SleepEntry {
    fn partial_cmp(&self, other: &Self) -> Option<core::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Sleeper queue, ordered by soonest wake tick first (a min-heap, built
/// from `BinaryHeap`'s max-heap via `Reverse`).
static SLEEPERS: Mutex<BinaryHeap<Reverse<SleepEntry>>> = Mutex::new(BinaryHeap::new());

#[cfg(not(test))]
mod backend {
    use x86_64::instructions::port::Port;

    const PIT_CHANNEL_0: u16 = 0x40;
    const PIT_COMMAND: u16 = 0x43;

    /// Program PIT channel 0 for mode 3 (square wave), rate generator,
    /// at the given divisor.
    pub fn program_pit(divisor: u16) {
        let mut command: Port<u8> = Port::new(PIT_COMMAND);
        let mut data: Port<u8> = Port::new(PIT_CHANNEL_0);
        unsafe {
            command.write(0x36u8); // channel 0, lobyte/hibyte, mode 3, binary
            data.write((divisor & 0xFF) as u8);
            data.write((divisor >> 8) as u8);
        }
    }

    pub fn spin_loop_hint() {
        core::hint::spin_loop();
    }
}

#[cfg(test)]
mod backend {
    pub fn program_pit(_divisor: u16) {}
    pub fn spin_loop_hint() {
        core::hint::spin_loop();
    }
}

/// Program the PIT and calibrate the busy-wait loop. Must run before
/// interrupts are enabled.
pub fn init() {
    let divisor = (PIT_BASE_FREQUENCY / TIMER_FREQ_HZ) as u16;
    backend::program_pit(divisor);
    log::info!(
        "PIT programmed for {} Hz (divisor {})",
        TIMER_FREQ_HZ,
        divisor
    );

    #[cfg(not(test))]
    {
        let loops = calibrate();
        LOOPS_PER_TICK.store(loops, Ordering::SeqCst);
        log::info!("calibrated {} busy-wait loops per tick", loops);
    }
    #[cfg(test)]
    {
        LOOPS_PER_TICK.store(10_000, Ordering::SeqCst);
    }
}

/// Determine how many busy-wait iterations fit in a single tick by
/// doubling a loop count until it spans one or more ticks, then
/// refining with a binary search over the final doubling.
#[cfg(not(test))]
fn calibrate() -> u32 {
    let mut loops: u32 = 1;
    while !busy_wait_spans_tick(loops) {
        let Some(next) = loops.checked_mul(2) else {
            break;
        };
        loops = next;
    }

    let mut low = loops / 2;
    let mut high = loops;
    while high - low > 8 {
        let mid = low + (high - low) / 2;
        if busy_wait_spans_tick(mid) {
            high = mid;
        } else {
            low = mid;
        }
    }
    high.max(1)
}

#[cfg(not(test))]
fn busy_wait_spans_tick(loops: u32) -> bool {
    let start = ticks();
    busy_wait_loops(loops);
    ticks() != start
}

fn busy_wait_loops(loops: u32) {
    for _ in 0..loops {
        backend::spin_loop_hint();
    }
}

/// Current tick count since boot.
pub fn ticks() -> u64 {
    TICKS.load(Ordering::SeqCst)
}

/// Called from the scheduler's timer interrupt path on every tick.
/// Advances the tick counter and wakes any threads whose sleep has
/// expired. Returns the new tick count.
pub fn on_tick() -> u64 {
    let now = TICKS.fetch_add(1, Ordering::SeqCst) + 1;

    loop {
        let due = {
            let mut sleepers = SLEEPERS.lock();
            match sleepers.peek() {
                Some(Reverse(entry)) if entry.wake_tick <= now => sleepers.pop().map(|Reverse(e)| e),
                _ => None,
            }
        };
        match due {
            Some(entry) => scheduler::wake_thread(entry.thread_id),
            None => break,
        }
    }

    now
}

/// Block the calling thread until at least `delta` ticks have passed.
/// A `delta` of 0 returns immediately without yielding.
pub fn sleep_ticks(delta: u64) {
    if delta == 0 {
        return;
    }
    let current = scheduler::current_thread_id();
    if current.0 == 0 || !scheduler::is_enabled() {
        // No scheduler (or called from idle/boot context): fall back to
        // a plain busy-wait against the tick counter.
        let start = ticks();
        while ticks().saturating_sub(start) < delta {
            x86_64::instructions::hlt();
        }
        return;
    }

    // Recording the wake tick, pushing onto the sleeper queue, and
    // transitioning to `Blocked` must happen under one interrupt-disabled
    // section: a tick landing between any two of these steps could find
    // the thread already due to wake but still `Running`, and the wakeup
    // would be lost.
    crate::arch::x86_64::interrupts::without_interrupts(|| {
        let wake_tick = ticks() + delta;
        scheduler::with_thread_mut(current, |t| t.wake_tick = Some(wake_tick));
        SLEEPERS.lock().push(Reverse(SleepEntry {
            wake_tick,
            thread_id: current,
        }));
        scheduler::mark_current_blocked();
    });
    scheduler::yield_now();
}

fn ms_to_ticks(ms: u64) -> u64 {
    (ms * TIMER_FREQ_HZ as u64).div_ceil(1000)
}

/// Sleep for (at least) `ms` milliseconds, blocking the calling thread.
pub fn msleep(ms: u64) {
    sleep_ticks(ms_to_ticks(ms));
}

/// Sleep for (at least) `us` microseconds. Delays shorter than one tick
/// are busy-waited using the calibrated loop count; longer delays block.
pub fn usleep(us: u64) {
    real_time_sleep(us, 1_000_000);
}

/// Sleep for (at least) `ns` nanoseconds.
pub fn nsleep(ns: u64) {
    real_time_sleep(ns, 1_000_000_000);
}

/// Shared implementation for sub-millisecond sleeps: split the request
/// into a whole-tick part (blocked) and a fractional part (busy-waited).
fn real_time_sleep(num: u64, denom: u64) {
    let ticks_requested = (num * TIMER_FREQ_HZ as u64) / denom;
    if ticks_requested > 0 {
        sleep_ticks(ticks_requested);
        return;
    }
    let loops_per_tick = LOOPS_PER_TICK.load(Ordering::SeqCst) as u64;
    let loops = (num * loops_per_tick * TIMER_FREQ_HZ as u64) / denom;
    busy_wait_loops(loops.min(u32::MAX as u64) as u32);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reset() {
        TICKS.store(0, Ordering::SeqCst);
        SLEEPERS.lock().clear();
    }

    #[test]
    fn on_tick_advances_counter() {
        reset();
        assert_eq!(on_tick(), 1);
        assert_eq!(on_tick(), 2);
        assert_eq!(ticks(), 2);
    }

    #[test]
    fn sleeper_queue_wakes_only_due_entries() {
        reset();
        SLEEPERS.lock().push(Reverse(SleepEntry {
            wake_tick: 5,
            thread_id: ThreadId(1),
        }));
        SLEEPERS.lock().push(Reverse(SleepEntry {
            wake_tick: 10,
            thread_id: ThreadId(2),
        }));

        for _ in 0..4 {
            on_tick();
        }
        assert_eq!(SLEEPERS.lock().len(), 2, "nothing due yet");

        on_tick(); // tick 5
        assert_eq!(SLEEPERS.lock().len(), 1, "thread 1 should have woken");
    }

    #[test]
    fn ms_to_ticks_rounds_up() {
        assert_eq!(ms_to_ticks(1), 1); // at 100Hz, 1ms < 1 tick but still rounds up
        assert_eq!(ms_to_ticks(10), 1);
        assert_eq!(ms_to_ticks(11), 2);
        assert_eq!(ms_to_ticks(1000), 100);
    }
}
