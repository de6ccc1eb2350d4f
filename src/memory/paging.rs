//! Manual page-table walker.
//!
//! The bootloader identity-maps the first 1 GiB (physical address == kernel
//! virtual address), so every frame the kernel allocates is immediately
//! dereferenceable as `*mut PageTable` — we never need a separate
//! physical-memory offset mapping or a long-lived `OffsetPageTable`
//! borrow. Each call below re-derives its `&mut PageTable` references from
//! a bare `PhysAddr`, which sidesteps the lifetime gymnastics a stored
//! `Mapper` would otherwise force onto every caller across process
//! boundaries.
//!
//! Address space layout: the kernel (text, heap, device memory) lives
//! entirely inside the first 1 GiB and occupies PML4 entry 0. Every
//! process gets PML4 entry 0 copied verbatim from the boot table (shared,
//! read-everywhere kernel mappings) and a private, initially-empty PML4
//! entry [`USER_P4_INDEX`] that roots its own user address space — so two
//! processes can never alias each other's user pages by construction.

use x86_64::{
    structures::paging::{PageTable, PageTableFlags, PhysFrame, Size4KiB},
    PhysAddr, VirtAddr,
};

use crate::memory::frame_allocator::BumpFrameAllocator;

/// PML4 slot every process's user address space roots from.
pub const USER_P4_INDEX: usize = 1;
/// Base virtual address of the user address-space window (PML4 index 1).
pub const USER_BASE: u64 = 1u64 << 39;
/// Size of the window reserved for user addresses.
pub const USER_REGION_SIZE: u64 = 1 << 30;

#[derive(Debug)]
pub struct PagingError(pub &'static str);

unsafe fn table_at(phys: PhysAddr) -> &'static mut PageTable {
    &mut *(phys.as_u64() as *mut PageTable)
}

pub unsafe fn current_p4_phys() -> PhysAddr {
    use x86_64::registers::control::Cr3;
    Cr3::read().0.start_address()
}

fn indices(va: VirtAddr) -> [usize; 4] {
    [
        va.p4_index().into(),
        va.p3_index().into(),
        va.p2_index().into(),
        va.p1_index().into(),
    ]
}

/// Walk from `p4_phys` down to the level-1 entry for `va`, allocating
/// intermediate tables as needed when `create` is true. Returns the
/// physical address of the owning L1 table and the index within it.
fn walk(
    p4_phys: PhysAddr,
    va: VirtAddr,
    create: bool,
    alloc: &mut BumpFrameAllocator,
) -> Option<(PhysAddr, usize)> {
    let idx = indices(va);
    let mut table_phys = p4_phys;

    for level in 0..3 {
        let table = unsafe { table_at(table_phys) };
        let entry = &mut table[idx[level]];

        if entry.is_unused() {
            if !create {
                return None;
            }
            let frame = alloc.allocate_user_frame()?;
            zero_frame(frame);
            entry.set_addr(
                frame.start_address(),
                PageTableFlags::PRESENT | PageTableFlags::WRITABLE | PageTableFlags::USER_ACCESSIBLE,
            );
            table_phys = frame.start_address();
        } else {
            table_phys = entry.addr();
        }
    }

    Some((table_phys, idx[3]))
}

fn zero_frame(frame: PhysFrame) {
    unsafe {
        core::ptr::write_bytes(frame.start_address().as_u64() as *mut u8, 0, 4096);
    }
}

/// Map a single page. Used directly by the heap bootstrap (before the VM
/// subsystem exists) and by `vm::frame`/`vm::spt` once it does.
pub fn map_page_raw(
    p4_phys: PhysAddr,
    va: VirtAddr,
    frame: PhysFrame,
    flags: PageTableFlags,
    alloc: &mut BumpFrameAllocator,
) -> Result<(), PagingError> {
    let (l1_phys, l1_idx) = walk(p4_phys, va, true, alloc).ok_or(PagingError("out of memory walking page tables"))?;
    let l1 = unsafe { table_at(l1_phys) };
    l1[l1_idx].set_addr(frame.start_address(), flags | PageTableFlags::PRESENT);
    x86_64::instructions::tlb::flush(va);
    Ok(())
}

pub fn map_page(
    p4_phys: u64,
    va: u64,
    frame_phys: u64,
    writable: bool,
    user: bool,
) -> Result<(), PagingError> {
    let mut flags = PageTableFlags::PRESENT;
    if writable {
        flags |= PageTableFlags::WRITABLE;
    }
    if user {
        flags |= PageTableFlags::USER_ACCESSIBLE;
    }
    let mut alloc = crate::memory::FRAME_ALLOCATOR.lock();
    map_page_raw(
        PhysAddr::new(p4_phys),
        VirtAddr::new(va),
        PhysFrame::containing_address(PhysAddr::new(frame_phys)),
        flags,
        &mut alloc,
    )
}

/// Remove the mapping for `va`, returning the physical frame that was
/// mapped there (if any). Does not free the frame — callers decide.
pub fn unmap_page(p4_phys: u64, va: u64) -> Option<u64> {
    let mut alloc = crate::memory::FRAME_ALLOCATOR.lock();
    let (l1_phys, l1_idx) = walk(PhysAddr::new(p4_phys), VirtAddr::new(va), false, &mut alloc)?;
    let l1 = unsafe { table_at(l1_phys) };
    let entry = &mut l1[l1_idx];
    if entry.is_unused() {
        return None;
    }
    let frame = entry.addr().as_u64();
    entry.set_unused();
    x86_64::instructions::tlb::flush(VirtAddr::new(va));
    Some(frame)
}

pub fn is_mapped(p4_phys: u64, va: u64) -> bool {
    let mut alloc = crate::memory::FRAME_ALLOCATOR.lock();
    match walk(PhysAddr::new(p4_phys), VirtAddr::new(va), false, &mut alloc) {
        Some((l1_phys, l1_idx)) => !unsafe { table_at(l1_phys) }[l1_idx].is_unused(),
        None => false,
    }
}

pub fn is_writable(p4_phys: u64, va: u64) -> bool {
    let mut alloc = crate::memory::FRAME_ALLOCATOR.lock();
    match walk(PhysAddr::new(p4_phys), VirtAddr::new(va), false, &mut alloc) {
        Some((l1_phys, l1_idx)) => {
            let entry = &unsafe { table_at(l1_phys) }[l1_idx];
            !entry.is_unused() && entry.flags().contains(PageTableFlags::WRITABLE)
        }
        None => false,
    }
}

pub fn translate(p4_phys: u64, va: u64) -> Option<u64> {
    let mut alloc = crate::memory::FRAME_ALLOCATOR.lock();
    let (l1_phys, l1_idx) = walk(PhysAddr::new(p4_phys), VirtAddr::new(va), false, &mut alloc)?;
    let entry = &unsafe { table_at(l1_phys) }[l1_idx];
    if entry.is_unused() {
        None
    } else {
        Some(entry.addr().as_u64())
    }
}

/// Bit 5 of a page-table entry — hardware-maintained "this page was read
/// or written" flag the clock algorithm consults and clears.
const ACCESSED: PageTableFlags = PageTableFlags::ACCESSED;
const DIRTY: PageTableFlags = PageTableFlags::DIRTY;

pub fn accessed(p4_phys: u64, va: u64) -> bool {
    flag_set(p4_phys, va, ACCESSED)
}

pub fn clear_accessed(p4_phys: u64, va: u64) {
    clear_flag(p4_phys, va, ACCESSED);
}

pub fn dirty(p4_phys: u64, va: u64) -> bool {
    flag_set(p4_phys, va, DIRTY)
}

pub fn clear_dirty(p4_phys: u64, va: u64) {
    clear_flag(p4_phys, va, DIRTY);
}

fn flag_set(p4_phys: u64, va: u64, flag: PageTableFlags) -> bool {
    let mut alloc = crate::memory::FRAME_ALLOCATOR.lock();
    match walk(PhysAddr::new(p4_phys), VirtAddr::new(va), false, &mut alloc) {
        Some((l1_phys, l1_idx)) => unsafe { table_at(l1_phys) }[l1_idx].flags().contains(flag),
        None => false,
    }
}

fn clear_flag(p4_phys: u64, va: u64, flag: PageTableFlags) {
    let mut alloc = crate::memory::FRAME_ALLOCATOR.lock();
    if let Some((l1_phys, l1_idx)) = walk(PhysAddr::new(p4_phys), VirtAddr::new(va), false, &mut alloc) {
        let entry = &mut unsafe { table_at(l1_phys) }[l1_idx];
        if !entry.is_unused() {
            let addr = entry.addr();
            let mut flags = entry.flags();
            flags.remove(flag);
            entry.set_addr(addr, flags);
        }
    }
}

/// Allocate a fresh PML4: kernel entry 0 is copied from the boot table
/// (shared kernel mappings), the user entry is left absent — user pages
/// are mapped in lazily as the process faults them in or forks them.
pub fn create_address_space() -> Option<u64> {
    let mut alloc = crate::memory::FRAME_ALLOCATOR.lock();
    let frame = alloc.allocate_user_frame()?;
    zero_frame(frame);

    let boot_p4 = unsafe { table_at(PhysAddr::new(crate::memory::boot_page_table())) };
    let new_p4 = unsafe { table_at(frame.start_address()) };
    new_p4[0].set_addr(boot_p4[0].addr(), boot_p4[0].flags());

    Some(frame.start_address().as_u64())
}

/// Free every page-table node and resident frame under the user PML4 slot,
/// then the PML4 frame itself. Does not touch the shared kernel slot.
pub fn destroy_address_space(p4_phys: u64) {
    let mut alloc = crate::memory::FRAME_ALLOCATOR.lock();
    let p4 = unsafe { table_at(PhysAddr::new(p4_phys)) };
    let p4_entry = &mut p4[USER_P4_INDEX];
    if !p4_entry.is_unused() {
        let p3_phys = p4_entry.addr();
        free_table_tree(p3_phys, 3, &mut alloc);
        alloc.free_frame(PhysFrame::containing_address(p3_phys));
        p4_entry.set_unused();
    }
    alloc.free_frame(PhysFrame::containing_address(PhysAddr::new(p4_phys)));
}

fn free_table_tree(phys: PhysAddr, level: u8, alloc: &mut BumpFrameAllocator) {
    let table = unsafe { table_at(phys) };
    for entry in table.iter_mut() {
        if entry.is_unused() {
            continue;
        }
        if level > 1 {
            free_table_tree(entry.addr(), level - 1, alloc);
        }
        // At level 1 the "child" is a user data frame; VM teardown frees
        // those explicitly (they may be in the frame table / swap), so we
        // only reclaim the page-table node here, never a level-1 leaf's
        // data frame twice.
        if level > 1 {
            alloc.free_frame(PhysFrame::containing_address(entry.addr()));
        }
        entry.set_unused();
    }
}

/// True if `va` lies within the address space any process's user window
/// reserves, regardless of whether it's currently mapped.
pub fn in_user_region(va: u64) -> bool {
    va >= USER_BASE && va < USER_BASE + USER_REGION_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_region_bounds() {
        assert!(!in_user_region(USER_BASE - 1));
        assert!(in_user_region(USER_BASE));
        assert!(in_user_region(USER_BASE + USER_REGION_SIZE - 1));
        assert!(!in_user_region(USER_BASE + USER_REGION_SIZE));
    }
}
