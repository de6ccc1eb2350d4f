//! Kernel-internal synchronization primitives: Q17.14 fixed-point math
//! (used by the MLFQS statistics) and the semaphore/lock/condvar stack
//! used for both kernel-side mutual exclusion and the process lifecycle's
//! wait/fork handshakes.
//!
//! These are distinct from `spin::Mutex`, which guards plain data
//! structures accessed from interrupt context. `Lock` and `Semaphore`
//! here *block the calling thread* by handing it off to the scheduler —
//! they must never be acquired from an interrupt handler.

pub mod condvar;
pub mod fixed_point;
pub mod lock;
pub mod semaphore;

pub use condvar::Condvar;
pub use lock::Lock;
pub use semaphore::Semaphore;
