//! Global frame table for the user pool, with clock (second-chance)
//! eviction. Frames are identity-mapped, so a frame's physical address
//! doubles as its kernel-accessible virtual address.

use alloc::vec::Vec;
use spin::Mutex;

use crate::scheduler::ProcessId;

/// Frames set aside for user pages, distinct from the general kernel pool
/// page tables and the heap draw from. Keeping this small and fixed (1024
/// frames = 4 MiB) makes eviction exercise-able without needing gigabytes
/// of emulated RAM.
const USER_POOL_CAPACITY: usize = 1024;

struct FrameEntry {
    phys: u64,
    /// `None` while the frame is being handed to a fresh allocation and
    /// not yet claimed by a page (a brief window during which eviction
    /// must not pick it).
    owner: Option<(ProcessId, u64)>,
}

struct FrameTable {
    entries: Vec<FrameEntry>,
    cursor: usize,
}

static FRAME_TABLE: Mutex<FrameTable> = Mutex::new(FrameTable { entries: Vec::new(), cursor: 0 });

pub fn init() {
    // Table starts empty; frames are pulled from the general allocator
    // lazily as pages are first touched, up to USER_POOL_CAPACITY.
}

pub fn kva(frame_idx: usize) -> u64 {
    FRAME_TABLE.lock().entries[frame_idx].phys
}

fn owning_page_table(pid: ProcessId) -> Option<u64> {
    crate::scheduler::with_process_mut(pid, |p| p.page_table)
}

/// Acquire a frame for `(owner, va)`. Returns the frame table index, or
/// `None` if the pool is full.
///
/// Deliberately never evicts itself: `acquire` is called from inside
/// `SupplementalPageTable::load`, which callers reach while holding the
/// scheduler lock to get `&mut Process`. `evict_one` needs that same lock
/// to reach the victim's process, and `spin::Mutex` isn't reentrant, so
/// evicting from here would deadlock (or self-deadlock, if the victim
/// turns out to be the caller's own page). Callers must call
/// `ensure_free` for however many frames they'll need *before* taking the
/// scheduler lock.
pub fn acquire(owner: ProcessId, va: u64) -> Option<usize> {
    let mut table = FRAME_TABLE.lock();
    if let Some(idx) = table.free_slot() {
        table.entries[idx].owner = Some((owner, va));
        return Some(idx);
    }
    if table.entries.len() < USER_POOL_CAPACITY {
        let mut alloc = crate::memory::FRAME_ALLOCATOR.lock();
        if let Some(frame) = alloc.allocate_user_frame() {
            let idx = table.entries.len();
            table.entries.push(FrameEntry { phys: frame.start_address().as_u64(), owner: Some((owner, va)) });
            return Some(idx);
        }
    }
    None
}

/// Number of additional frames `acquire` could hand out right now without
/// evicting anything.
fn free_capacity() -> usize {
    let table = FRAME_TABLE.lock();
    let used = table.entries.iter().filter(|e| e.owner.is_some()).count();
    USER_POOL_CAPACITY - used
}

/// Evict until at least `n` frames are free. Must be called with the
/// scheduler lock NOT held (see `acquire`'s doc comment) — it's the
/// caller's job to do this before locking the scheduler for whatever
/// operation (a page-in, a fork) is about to claim those frames.
pub fn ensure_free(n: usize) {
    while free_capacity() < n {
        if evict_one().is_none() {
            break;
        }
    }
}

impl FrameTable {
    /// A slot is "free" once `release` has cleared its owner; reuse it
    /// rather than growing the table further.
    fn free_slot(&mut self) -> Option<usize> {
        self.entries.iter().position(|e| e.owner.is_none())
    }
}

/// Release a resident frame back to the pool (munmap, address-space
/// teardown). Does not write back or swap out — callers that need that
/// must do it before calling `release`.
pub fn release(frame_idx: usize) {
    let phys = {
        let mut table = FRAME_TABLE.lock();
        let entry = &mut table.entries[frame_idx];
        entry.owner = None;
        entry.phys
    };
    let mut alloc = crate::memory::FRAME_ALLOCATOR.lock();
    use x86_64::{structures::paging::PhysFrame, PhysAddr};
    alloc.free_frame(PhysFrame::containing_address(PhysAddr::new(phys)));
}

/// Run one round of clock eviction: skip frames whose hardware accessed
/// bit is set (clearing it as we go), evict the first one found clear.
fn evict_one() -> Option<()> {
    let (victim_idx, owner, va, phys) = loop {
        let (len, cursor) = {
            let table = FRAME_TABLE.lock();
            (table.entries.len(), table.cursor)
        };
        if len == 0 {
            return None;
        }
        let idx = cursor % len;
        let (owner, va, phys) = {
            let mut table = FRAME_TABLE.lock();
            table.cursor = (table.cursor + 1) % len;
            let e = &table.entries[idx];
            match e.owner {
                Some((pid, va)) => (pid, va, e.phys),
                None => continue, // already-free slot, skip
            }
        };

        let p4 = match owning_page_table(owner) {
            Some(p4) => p4,
            None => break (idx, owner, va, phys), // owner gone, frame is free real estate
        };

        if crate::memory::paging::accessed(p4, va) {
            crate::memory::paging::clear_accessed(p4, va);
            continue;
        }
        break (idx, owner, va, phys);
    };

    let _ = phys;
    crate::scheduler::with_process_mut(owner, |p| {
        let p4 = p.page_table;
        p.spt.evict(p4, va);
    });

    let mut table = FRAME_TABLE.lock();
    table.entries[victim_idx].owner = None;
    Some(())
}
