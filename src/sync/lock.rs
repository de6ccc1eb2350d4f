use alloc::collections::BTreeMap;
use lazy_static::lazy_static;
use spin::Mutex;

use crate::scheduler::ProcessId;
use crate::sync::semaphore::Semaphore;

/// Maximum depth of a donation chain the kernel will walk. Pintos bounds
/// this the same way: donor graphs are chains in practice, never arbitrary
/// graphs, so 8 hops is generous headroom rather than a real limit.
pub const MAX_DONATION_DEPTH: u32 = 8;

lazy_static! {
    /// Lock identity -> current holder. Keyed by the `Lock`'s own address,
    /// mirroring the donor kernel's use of a raw `struct lock *` as an
    /// identity token: a `Lock` is never moved once a thread can see it.
    static ref LOCK_OWNERS: Mutex<BTreeMap<usize, ProcessId>> = Mutex::new(BTreeMap::new());
}

/// A binary semaphore with an owner, supporting priority donation.
///
/// `acquire` donates the calling thread's priority up the chain of lock
/// holders when it would otherwise starve behind a lower-priority owner;
/// `release` withdraws exactly the donations that were waiting on *this*
/// lock. Donation is disabled outright while MLFQS drives priorities.
pub struct Lock {
    sema: Semaphore,
}

impl Lock {
    pub const fn new() -> Self {
        Lock { sema: Semaphore::new(1) }
    }

    fn id(&self) -> usize {
        self as *const Self as usize
    }

    /// Current owner, if any.
    pub fn holder(&self) -> Option<ProcessId> {
        LOCK_OWNERS.lock().get(&self.id()).copied()
    }

    pub fn is_held_by_current(&self) -> bool {
        self.holder() == Some(crate::scheduler::current_pid())
    }

    /// Acquire the lock, donating priority and blocking if it is held.
    pub fn acquire(&self) {
        let me = crate::scheduler::current_pid();

        if !crate::scheduler::mlfqs_enabled() {
            if let Some(owner) = self.holder() {
                if crate::scheduler::effective_priority(me) > crate::scheduler::effective_priority(owner) {
                    crate::scheduler::set_wait_on_lock(me, Some(self.id()));
                    crate::scheduler::add_donor(owner, me);
                }
            }
        }

        self.sema.down();

        LOCK_OWNERS.lock().insert(self.id(), me);
        crate::scheduler::set_wait_on_lock(me, None);
    }

    /// Try to acquire without blocking or donating. Returns `true` on success.
    pub fn try_acquire(&self) -> bool {
        if self.sema.try_down() {
            LOCK_OWNERS.lock().insert(self.id(), crate::scheduler::current_pid());
            true
        } else {
            false
        }
    }

    /// Release the lock. Strips any donors that were waiting specifically
    /// on this lock from our donor list before handing off the semaphore.
    pub fn release(&self) {
        let me = crate::scheduler::current_pid();
        LOCK_OWNERS.lock().remove(&self.id());
        if !crate::scheduler::mlfqs_enabled() {
            crate::scheduler::remove_donors_for_lock(me, self.id());
        }
        self.sema.up();
    }
}

unsafe impl Send for Lock {}
unsafe impl Sync for Lock {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_lock_has_no_holder() {
        let lock = Lock::new();
        assert!(lock.holder().is_none());
    }
}
