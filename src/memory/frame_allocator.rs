use x86_64::{
    structures::paging::{FrameAllocator, FrameDeallocator, PhysFrame, Size4KiB},
    PhysAddr,
};

/// One physical region handed to us by the multiboot2 memory map.
#[derive(Clone, Copy)]
struct Region {
    start: PhysAddr,
    end: PhysAddr,
}

/// Physical frame allocator for the whole kernel: page-table nodes, the
/// heap, and the VM subsystem's user-pool frames all come from here.
///
/// Bump-allocates forward through the available multiboot2 regions; frames
/// freed by `dealloc_frame` (page-table teardown, VM frame reuse) go onto a
/// free list that `allocate_user_frame` drains before bumping further.
pub struct BumpFrameAllocator {
    regions: alloc::vec::Vec<Region>,
    region_idx: usize,
    next: PhysAddr,
    free_list: alloc::vec::Vec<PhysFrame>,
}

impl BumpFrameAllocator {
    pub const fn new() -> Self {
        BumpFrameAllocator {
            regions: alloc::vec::Vec::new(),
            region_idx: 0,
            next: PhysAddr::new(0),
            free_list: alloc::vec::Vec::new(),
        }
    }

    /// Initialize from the multiboot2 memory map's available regions.
    /// Frames below 1 MiB are skipped (BIOS/bootloader reserved area).
    pub unsafe fn init(&mut self, areas: &[multiboot2::MemoryArea]) {
        const LOW_RESERVED: u64 = 0x10_0000;
        for area in areas {
            let start = core::cmp::max(area.start_address(), LOW_RESERVED);
            let end = area.end_address();
            if end > start {
                self.regions.push(Region {
                    start: PhysAddr::new(start),
                    end: PhysAddr::new(end),
                });
            }
        }
        self.region_idx = 0;
        self.next = self.regions.first().map(|r| r.start).unwrap_or(PhysAddr::new(0));
    }

    fn bump_allocate(&mut self) -> Option<PhysFrame> {
        loop {
            let region = *self.regions.get(self.region_idx)?;
            let candidate = PhysFrame::<Size4KiB>::containing_address(self.next);
            if candidate.start_address() + Size4KiB::SIZE > region.end {
                self.region_idx += 1;
                self.next = self.regions.get(self.region_idx).map(|r| r.start)?;
                continue;
            }
            self.next = candidate.start_address() + Size4KiB::SIZE;
            return Some(candidate);
        }
    }

    /// Allocate a frame for any kernel purpose (page tables, heap pages,
    /// VM user-pool frames). Prefers a previously-freed frame.
    pub fn allocate_user_frame(&mut self) -> Option<PhysFrame> {
        if let Some(f) = self.free_list.pop() {
            return Some(f);
        }
        self.bump_allocate()
    }

    pub fn free_frame(&mut self, frame: PhysFrame) {
        self.free_list.push(frame);
    }
}

unsafe impl FrameAllocator<Size4KiB> for BumpFrameAllocator {
    fn allocate_frame(&mut self) -> Option<PhysFrame> {
        self.allocate_user_frame()
    }
}

impl FrameDeallocator<Size4KiB> for BumpFrameAllocator {
    unsafe fn deallocate_frame(&mut self, frame: PhysFrame) {
        self.free_frame(frame);
    }
}

use x86_64::structures::paging::PageSize;
