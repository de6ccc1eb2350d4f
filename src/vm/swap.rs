//! Anonymous swap. Backed by a plain `Vec<u8>` standing in for a disk
//! swap partition — there is no block device in this kernel, and a
//! RAM-backed slab lets the eviction path exercise the real protocol
//! (allocate a slot, write a page out, read a page back in, free the
//! slot) without one.

use alloc::vec;
use alloc::vec::Vec;
use spin::Mutex;

use super::PGSIZE;

/// Number of swappable pages the device holds (4 MiB of backing store).
const SWAP_SLOTS: usize = 1024;

struct SwapDevice {
    storage: Vec<u8>,
    used: Vec<bool>,
}

static SWAP: Mutex<Option<SwapDevice>> = Mutex::new(None);

pub fn init() {
    let mut guard = SWAP.lock();
    *guard = Some(SwapDevice {
        storage: vec![0u8; SWAP_SLOTS * PGSIZE as usize],
        used: vec![false; SWAP_SLOTS],
    });
}

/// Claim a free slot. Returns `None` if the device is exhausted — callers
/// treat this as fatal (the page cannot be evicted, so the fault that
/// needed the frame cannot be serviced).
pub fn alloc_slot() -> Option<usize> {
    let mut guard = SWAP.lock();
    let dev = guard.as_mut().expect("swap not initialized");
    let slot = dev.used.iter().position(|&b| !b)?;
    dev.used[slot] = true;
    Some(slot)
}

pub fn free_slot(slot: usize) {
    let mut guard = SWAP.lock();
    let dev = guard.as_mut().expect("swap not initialized");
    dev.used[slot] = false;
}

/// Write a full page into `slot`.
pub fn write_slot(slot: usize, src_kva: u64) {
    let mut guard = SWAP.lock();
    let dev = guard.as_mut().expect("swap not initialized");
    let off = slot * PGSIZE as usize;
    let src = unsafe { core::slice::from_raw_parts(src_kva as *const u8, PGSIZE as usize) };
    dev.storage[off..off + PGSIZE as usize].copy_from_slice(src);
}

/// Read a page out of `slot` into `dst_kva`, then free the slot (the
/// normal swap-in path — the page is moving back into residency and
/// relinquishing its backing store).
pub fn read_and_free(slot: usize, dst_kva: u64) {
    peek(slot, dst_kva);
    free_slot(slot);
}

/// Read a page out of `slot` without freeing it — used when `fork`
/// copies a swapped-out page into a child's fresh frame while the
/// parent keeps owning the original slot.
pub fn peek(slot: usize, dst_kva: u64) {
    let guard = SWAP.lock();
    let dev = guard.as_ref().expect("swap not initialized");
    let off = slot * PGSIZE as usize;
    let dst = unsafe { core::slice::from_raw_parts_mut(dst_kva as *mut u8, PGSIZE as usize) };
    dst.copy_from_slice(&dev.storage[off..off + PGSIZE as usize]);
}
