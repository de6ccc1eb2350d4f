//! Kernel heap — backs every `alloc::*` collection the scheduler, VM, and
//! filesystem layers use. A fixed virtual range is mapped eagerly at boot;
//! `linked_list_allocator` then manages it as the `#[global_allocator]`.

use linked_list_allocator::LockedHeap;
use x86_64::structures::paging::{Page, PageTableFlags, Size4KiB};
use x86_64::VirtAddr;

use crate::memory::frame_allocator::BumpFrameAllocator;
use crate::memory::paging;

pub const HEAP_START: u64 = 0x_4444_4444_0000;
pub const HEAP_SIZE: u64 = 1024 * 1024; // 1 MiB

#[global_allocator]
static ALLOCATOR: LockedHeap = LockedHeap::empty();

pub fn init_heap(
    p4_phys: x86_64::PhysAddr,
    frame_alloc: &mut BumpFrameAllocator,
) -> Result<(), &'static str> {
    let page_range = {
        let heap_start = VirtAddr::new(HEAP_START);
        let heap_end = heap_start + HEAP_SIZE - 1u64;
        let heap_start_page = Page::<Size4KiB>::containing_address(heap_start);
        let heap_end_page = Page::<Size4KiB>::containing_address(heap_end);
        Page::range_inclusive(heap_start_page, heap_end_page)
    };

    let flags = PageTableFlags::PRESENT | PageTableFlags::WRITABLE;
    for page in page_range {
        let frame = frame_alloc
            .allocate_user_frame()
            .ok_or("out of physical memory while mapping the kernel heap")?;
        paging::map_page_raw(p4_phys, page.start_address(), frame, flags, frame_alloc)
            .map_err(|_| "failed to map heap page")?;
    }

    unsafe {
        ALLOCATOR.lock().init(HEAP_START as *mut u8, HEAP_SIZE as usize);
    }
    Ok(())
}
