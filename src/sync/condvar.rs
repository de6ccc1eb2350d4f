use alloc::vec::Vec;

use crate::scheduler::ProcessId;
use crate::sync::lock::Lock;

/// A condition variable: an ordered list of waiters, each identified by the
/// pid it was waiting with, so `signal` can wake the highest-priority
/// waiter first rather than strict FIFO (the donor kernel keeps this as a
/// list of per-wait semaphores; we fold the "semaphore" down to the
/// scheduler's own block/unblock primitives since a waiter here is always
/// exactly one thread).
pub struct Condvar {
    waiters: spin::Mutex<Vec<ProcessId>>,
}

impl Condvar {
    pub const fn new() -> Self {
        Condvar { waiters: spin::Mutex::new(Vec::new()) }
    }

    /// Atomically release `lock`, block until signaled, then reacquire it.
    pub fn wait(&self, lock: &Lock) {
        let pid = crate::scheduler::current_pid();
        x86_64::instructions::interrupts::without_interrupts(|| {
            self.waiters.lock().push(pid);
        });

        lock.release();

        loop {
            let still_waiting = x86_64::instructions::interrupts::without_interrupts(|| {
                self.waiters.lock().contains(&pid)
            });
            if !still_waiting {
                break;
            }
            crate::scheduler::block_current();
        }

        lock.acquire();
    }

    /// Wake the highest-priority waiter, if any.
    pub fn signal(&self, _lock: &Lock) {
        let woken = x86_64::instructions::interrupts::without_interrupts(|| {
            let mut waiters = self.waiters.lock();
            if waiters.is_empty() {
                return None;
            }
            waiters.sort_by_key(|pid| core::cmp::Reverse(crate::scheduler::effective_priority(*pid)));
            Some(waiters.remove(0))
        });
        if let Some(pid) = woken {
            crate::scheduler::unblock(pid);
            crate::scheduler::preempt_if_higher_priority(pid);
        }
    }

    /// Wake every waiter.
    pub fn broadcast(&self, lock: &Lock) {
        while !x86_64::instructions::interrupts::without_interrupts(|| self.waiters.lock().is_empty()) {
            self.signal(lock);
        }
    }
}
