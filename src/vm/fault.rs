//! Page fault resolution: the bridge between the CPU's `#PF` exception
//! and the supplemental page table. Called from the IDT handler with the
//! faulting address and the user stack pointer at the time of the fault
//! (needed to tell a stack-growth access apart from a bad pointer).

use super::spt::{LazySource, PageType};
use super::{PGSIZE, STACK_MAX_SIZE, USER_STACK_TOP};

/// Resolve a fault at `fault_addr`. Returns `true` if the fault was
/// serviced (the faulting instruction can be retried), `false` if it's
/// fatal and the caller should terminate the process instead of
/// panicking the kernel.
pub fn handle_page_fault(fault_addr: u64, user_rsp: u64) -> bool {
    if !crate::memory::paging::in_user_region(fault_addr) {
        return false;
    }
    let pid = crate::scheduler::current_pid();
    let va = super::round_down(fault_addr);

    // First pass (scheduler lock held only briefly): classify the fault
    // and, for stack growth, register the new page — but don't touch the
    // frame table yet. `Some(true)` = already resident (spurious fault),
    // `Some(false)` = tracked/newly-registered but needs a frame, `None`
    // = not ours to service.
    let already_resident = crate::scheduler::with_process_mut(pid, |p| {
        if p.spt.contains(va) {
            return Some(p.spt.is_resident(va));
        }
        if is_stack_growth(fault_addr, user_rsp) {
            p.spt.alloc_uninit(va, true, PageType::Anon, LazySource::Zero);
            p.stack_bottom = p.stack_bottom.min(va);
            return Some(false);
        }
        None
    });
    let already_resident = match already_resident {
        Some(r) => r,
        None => return false,
    };

    // Evict with no scheduler lock held — `vm::frame::acquire` (called
    // from `load` below, under the lock) must never have to evict itself.
    if !already_resident {
        super::frame::ensure_free(1);
    }

    crate::scheduler::with_process_mut(pid, |p| {
        let p4 = p.page_table;
        p.spt.load(pid, p4, va)
    })
    .unwrap_or(false)
}

/// A fault below the current stack pointer (with a little slack for
/// instructions like `push` that touch memory below `rsp` before
/// adjusting it) and inside the reserved stack window is stack growth,
/// not a bad access.
fn is_stack_growth(fault_addr: u64, user_rsp: u64) -> bool {
    let low = USER_STACK_TOP.saturating_sub(STACK_MAX_SIZE);
    fault_addr >= low && fault_addr <= USER_STACK_TOP + PGSIZE - 1 && user_rsp.wrapping_sub(8) <= fault_addr
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stack_growth_window_excludes_far_below() {
        let low = USER_STACK_TOP.saturating_sub(STACK_MAX_SIZE);
        assert!(!is_stack_growth(low - PGSIZE, low));
    }

    #[test]
    fn stack_growth_window_includes_low_bound() {
        let low = USER_STACK_TOP.saturating_sub(STACK_MAX_SIZE);
        assert!(is_stack_growth(low, low));
    }
}
