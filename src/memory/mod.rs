pub mod paging;
pub mod frame_allocator;

use frame_allocator::BumpFrameAllocator;
use spin::Mutex;
use lazy_static::lazy_static;

lazy_static! {
    pub static ref FRAME_ALLOCATOR: Mutex<BumpFrameAllocator> = Mutex::new(BumpFrameAllocator::new());
}

/// Physical address of the boot-time PML4. Every process's address space
/// is derived from this one by copying its kernel-half entries (§10:
/// `paging::create_address_space`), so it must stay valid and mapped for
/// the lifetime of the kernel.
static BOOT_P4: Mutex<u64> = Mutex::new(0);

pub fn boot_page_table() -> u64 {
    *BOOT_P4.lock()
}

pub fn init(multiboot_info_addr: usize) {
    let boot_info = unsafe {
        multiboot2::BootInformation::load(multiboot_info_addr as *const _)
            .expect("failed to load multiboot2 info")
    };
    let memory_map_tag = boot_info.memory_map_tag().expect("memory map tag required");

    let areas = memory_map_tag.memory_areas();
    let static_areas: &'static [multiboot2::MemoryArea] =
        unsafe { core::slice::from_raw_parts(areas.as_ptr(), areas.len()) };

    let mut allocator = FRAME_ALLOCATOR.lock();
    unsafe { allocator.init(static_areas) };
    crate::log_info!("Physical frame allocator initialized from the multiboot2 memory map.");

    // The bootloader identity-maps the first 1 GiB, so physical address 0
    // doubles as virtual address 0 — every frame we allocate is directly
    // dereferenceable without a separate physical-memory mapping.
    let p4_phys = unsafe { paging::current_p4_phys() };
    *BOOT_P4.lock() = p4_phys.as_u64();
    crate::log_info!("Paging subsystem initialized (boot PML4 at {:#x}).", p4_phys.as_u64());

    crate::allocator::init_heap(p4_phys, &mut allocator).expect("heap initialization failed");
    crate::log_info!("Kernel heap mapped at {:#x}, {} bytes.", crate::allocator::HEAP_START, crate::allocator::HEAP_SIZE);

    drop(allocator);

    crate::vm::frame::init();
    crate::vm::swap::init();
    crate::log_info!("VM frame table and swap device initialized.");
}
