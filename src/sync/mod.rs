/*
 * Blocking Synchronization Primitives
 *
 * Built directly on the scheduler's block/wake pair and the interrupt
 * gate, rather than on spinlocks: this is a uniprocessor kernel, so
 * interrupt-disable is already mutual exclusion, and anything willing to
 * block can simply hand the CPU to another thread instead of spinning.
 */

pub mod condvar;
pub mod lock;
pub mod semaphore;

pub use condvar::CondVar;
pub use lock::Lock;
pub use semaphore::Semaphore;
