use alloc::vec::Vec;
use core::cmp::Reverse;
use spin::Mutex;

use crate::scheduler::ProcessId;

/// The counter and waiter list proper, behind a `spin::Mutex` so `down`/
/// `up` can take `&self` — every other kernel lock in this codebase is
/// `&self`, and `Lock`/`Condvar` both hold a bare `Semaphore` by value
/// rather than behind their own indirection.
struct Inner {
    value: u64,
    waiters: Vec<ProcessId>,
}

/// Counting semaphore with a priority-ordered waiter list.
///
/// `down`/`up` follow direct handoff: waking a waiter does not touch the
/// counter (the unit is handed straight to the woken thread); the counter
/// only changes on an uncontended `down` or an `up` with no one waiting.
pub struct Semaphore {
    inner: Mutex<Inner>,
}

impl Semaphore {
    pub const fn new(value: u64) -> Self {
        Semaphore { inner: Mutex::new(Inner { value, waiters: Vec::new() }) }
    }

    /// Acquire one unit, blocking the calling thread if none is available.
    pub fn down(&self) {
        let acquired = x86_64::instructions::interrupts::without_interrupts(|| {
            let mut inner = self.inner.lock();
            if inner.value > 0 {
                inner.value -= 1;
                true
            } else {
                let pid = crate::scheduler::current_pid();
                insert_ordered(&mut inner.waiters, pid);
                false
            }
        });
        if !acquired {
            // Blocks until some `up` hands this thread the unit directly.
            crate::scheduler::block_current();
        }
    }

    /// Try to acquire without blocking. Returns `true` on success.
    pub fn try_down(&self) -> bool {
        x86_64::instructions::interrupts::without_interrupts(|| {
            let mut inner = self.inner.lock();
            if inner.value > 0 {
                inner.value -= 1;
                true
            } else {
                false
            }
        })
    }

    /// Release one unit, waking the highest-priority waiter if any.
    pub fn up(&self) {
        let woken = x86_64::instructions::interrupts::without_interrupts(|| {
            let mut inner = self.inner.lock();
            if !inner.waiters.is_empty() {
                inner.waiters.sort_by_key(|pid| Reverse(crate::scheduler::effective_priority(*pid)));
                Some(inner.waiters.remove(0))
            } else {
                inner.value += 1;
                None
            }
        });
        if let Some(pid) = woken {
            crate::scheduler::unblock(pid);
            crate::scheduler::preempt_if_higher_priority(pid);
        }
    }

    pub fn waiter_count(&self) -> usize {
        self.inner.lock().waiters.len()
    }

    pub fn waiters(&self) -> Vec<ProcessId> {
        self.inner.lock().waiters.clone()
    }
}

/// Insert `pid` into `list`, kept sorted by effective priority descending.
pub(crate) fn insert_ordered(list: &mut Vec<ProcessId>, pid: ProcessId) {
    let prio = crate::scheduler::effective_priority(pid);
    let pos = list
        .iter()
        .position(|&other| crate::scheduler::effective_priority(other) < prio)
        .unwrap_or(list.len());
    list.insert(pos, pid);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_semaphore_has_no_waiters() {
        let sema = Semaphore::new(1);
        assert_eq!(sema.waiter_count(), 0);
    }
}
