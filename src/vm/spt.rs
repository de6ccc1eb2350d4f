//! Supplemental page table: per-process map from user virtual address to
//! the page's lazy-loading state. The hardware page table only ever
//! records "present" or "absent" — this is where we remember *why* an
//! absent page is absent, and what to do about it.

use alloc::sync::Arc;
use core::hash::{BuildHasherDefault, Hasher};
use hashbrown::HashMap;
use spin::Mutex;

use crate::fs::fd::File;
use crate::scheduler::ProcessId;

use super::PGSIZE;

/// Page-aligned virtual addresses are already well spread out; hashing
/// the raw value (rather than mixing it through a general-purpose
/// hasher) is enough to keep bucket collisions rare without pulling in
/// an extra hashing crate.
#[derive(Default)]
pub struct VaHasher(u64);

impl Hasher for VaHasher {
    fn finish(&self) -> u64 {
        self.0
    }

    fn write(&mut self, bytes: &[u8]) {
        for b in bytes {
            self.0 = self.0.wrapping_mul(31).wrapping_add(*b as u64);
        }
    }

    fn write_u64(&mut self, i: u64) {
        self.0 = i;
    }
}

type VaMap<V> = HashMap<u64, V, BuildHasherDefault<VaHasher>>;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PageType {
    Anon,
    File,
}

/// What a not-yet-resident page should become on its first fault.
#[derive(Clone)]
pub enum LazySource {
    Zero,
    FileBacked { file: Arc<Mutex<File>>, offset: u64, read_bytes: u32 },
}

pub enum PageState {
    Uninit { target: PageType, source: LazySource },
    Anon { swap_slot: Option<usize> },
    File { file: Arc<Mutex<File>>, offset: u64, read_bytes: u32 },
}

pub struct Page {
    pub writable: bool,
    /// Index into the global frame table, `Some` iff currently resident.
    pub frame: Option<usize>,
    pub state: PageState,
}

pub struct SupplementalPageTable {
    pages: VaMap<Page>,
}

impl SupplementalPageTable {
    pub fn new() -> Self {
        SupplementalPageTable { pages: VaMap::default() }
    }

    pub fn contains(&self, va: u64) -> bool {
        self.pages.contains_key(&va)
    }

    pub fn get(&self, va: u64) -> Option<&Page> {
        self.pages.get(&va)
    }

    pub fn is_resident(&self, va: u64) -> bool {
        self.pages.get(&va).map_or(false, |p| p.frame.is_some())
    }

    /// Number of tracked pages that would need a frame acquired for them
    /// right now — every ANON/FILE page, resident or not (fork realizes
    /// all of them eagerly); UNINIT pages are cloned by reference and
    /// need nothing. Used to pre-reserve frame capacity before `fork_copy`.
    pub fn realized_page_count(&self) -> usize {
        self.pages.values().filter(|p| !matches!(p.state, PageState::Uninit { .. })).count()
    }

    /// Register a lazily-initialized page. Fails if `va` is already
    /// tracked (double mmap / overlapping segments).
    pub fn alloc_uninit(&mut self, va: u64, writable: bool, target: PageType, source: LazySource) -> bool {
        if self.pages.contains_key(&va) {
            return false;
        }
        self.pages.insert(va, Page { writable, frame: None, state: PageState::Uninit { target, source } });
        true
    }

    /// Resolve a fault at `va`: bring the page into residency, mapping it
    /// into `p4_phys`. Transmutes UNINIT pages into their target type on
    /// first touch. Returns `false` if `va` isn't tracked at all (a truly
    /// invalid access, as opposed to one this table can service).
    pub fn load(&mut self, owner: ProcessId, p4_phys: u64, va: u64) -> bool {
        let page = match self.pages.get_mut(&va) {
            Some(p) => p,
            None => return false,
        };

        if page.frame.is_some() {
            return true; // already resident — spurious fault (e.g. race with eviction)
        }

        let frame_idx = match super::frame::acquire(owner, va) {
            Some(idx) => idx,
            None => return false,
        };
        let kva = super::frame::kva(frame_idx);

        match &mut page.state {
            PageState::Uninit { target, source } => {
                fill(kva, source);
                let new_state = match target {
                    PageType::Anon => PageState::Anon { swap_slot: None },
                    PageType::File => match source {
                        LazySource::FileBacked { file, offset, read_bytes } => {
                            PageState::File { file: file.clone(), offset: *offset, read_bytes: *read_bytes }
                        }
                        LazySource::Zero => unreachable!("PageType::File must carry a FileBacked source"),
                    },
                };
                page.state = new_state;
            }
            PageState::Anon { swap_slot } => {
                if let Some(slot) = swap_slot.take() {
                    super::swap::read_and_free(slot, kva);
                } else {
                    zero(kva);
                }
            }
            PageState::File { file, offset, read_bytes } => {
                load_file_bytes(kva, file, *offset, *read_bytes);
            }
        }

        page.frame = Some(frame_idx);
        let _ = crate::memory::paging::map_page(p4_phys, va, kva, page.writable, true);
        true
    }

    /// Called by the frame table when it needs this page's frame back.
    /// Writes the page out (to swap, or back to its file if dirty) and
    /// drops its residency, leaving the SPT entry in place so the next
    /// fault reloads it.
    pub fn evict(&mut self, p4_phys: u64, va: u64) {
        let page = match self.pages.get_mut(&va) {
            Some(p) => p,
            None => return,
        };
        let frame_idx = match page.frame.take() {
            Some(idx) => idx,
            None => return,
        };
        let kva = super::frame::kva(frame_idx);

        match &mut page.state {
            PageState::Anon { swap_slot } => {
                let slot = super::swap::alloc_slot().expect("swap device exhausted");
                super::swap::write_slot(slot, kva);
                *swap_slot = Some(slot);
            }
            PageState::File { file, offset, read_bytes } => {
                if crate::memory::paging::dirty(p4_phys, va) {
                    writeback_file(kva, file, *offset, *read_bytes);
                }
            }
            PageState::Uninit { .. } => unreachable!("uninit pages are never resident"),
        }

        crate::memory::paging::unmap_page(p4_phys, va);
        super::frame::release(frame_idx);
    }

    /// Tear down a single page: write back dirty file content, release
    /// its frame and swap slot, and forget it. Used by `munmap` and
    /// address-space teardown.
    pub fn remove(&mut self, p4_phys: u64, va: u64) {
        if let Some(page) = self.pages.get_mut(&va) {
            if let Some(frame_idx) = page.frame {
                let kva = super::frame::kva(frame_idx);
                if let PageState::File { file, offset, read_bytes } = &page.state {
                    if crate::memory::paging::dirty(p4_phys, va) {
                        writeback_file(kva, file, *offset, *read_bytes);
                    }
                }
                crate::memory::paging::unmap_page(p4_phys, va);
                super::frame::release(frame_idx);
            } else if let PageState::Anon { swap_slot: Some(slot) } = &page.state {
                super::swap::free_slot(*slot);
            }
        }
        self.pages.remove(&va);
    }

    /// Walk consecutive pages starting at `va` while each is tracked and
    /// belongs to the same FILE mapping (same open file instance) —
    /// `munmap`'s unit of work.
    pub fn is_file_page(&self, va: u64) -> bool {
        matches!(self.pages.get(&va).map(|p| &p.state), Some(PageState::File { .. }))
    }

    /// Tear down every tracked page (address-space destruction on exit):
    /// write back dirty FILE pages, release frames and swap slots. Leaves
    /// the table empty.
    pub fn teardown(&mut self, p4_phys: u64) {
        let vas: alloc::vec::Vec<u64> = self.pages.keys().copied().collect();
        for va in vas {
            self.remove(p4_phys, va);
        }
    }
}

fn zero(kva: u64) {
    unsafe { core::ptr::write_bytes(kva as *mut u8, 0, PGSIZE as usize) };
}

fn fill(kva: u64, source: &LazySource) {
    match source {
        LazySource::Zero => zero(kva),
        LazySource::FileBacked { file, offset, read_bytes } => load_file_bytes(kva, file, *offset, *read_bytes),
    }
}

fn load_file_bytes(kva: u64, file: &Arc<Mutex<File>>, offset: u64, read_bytes: u32) {
    zero(kva);
    if read_bytes == 0 {
        return;
    }
    let buf = unsafe { core::slice::from_raw_parts_mut(kva as *mut u8, read_bytes as usize) };
    let path = file.lock().path.clone();
    let _ = crate::fs::VFS.lock().read_file(&path, offset as usize, buf);
}

fn writeback_file(kva: u64, file: &Arc<Mutex<File>>, offset: u64, read_bytes: u32) {
    if read_bytes == 0 {
        return;
    }
    let buf = unsafe { core::slice::from_raw_parts(kva as *const u8, read_bytes as usize) };
    let path = file.lock().path.clone();
    let _ = crate::fs::VFS.lock().write_file_at(&path, offset as usize, buf);
}

/// Clone `src`'s tracked pages into `dst`, a fresh child address space.
/// UNINIT pages are copied by reference (same lazy source — cheap, and
/// correct since neither side has touched the memory yet). ANON and FILE
/// pages are eagerly realized: a fresh frame is claimed for the child and
/// the parent's bytes are copied into it, whether the parent's page is
/// currently resident, swapped out, or (for FILE pages) simply never
/// loaded.
pub fn fork_copy(
    src: &SupplementalPageTable,
    src_p4: u64,
    dst: &mut SupplementalPageTable,
    child: ProcessId,
    dst_p4: u64,
) {
    for (&va, page) in src.pages.iter() {
        match &page.state {
            PageState::Uninit { target, source } => {
                dst.pages.insert(va, Page { writable: page.writable, frame: None, state: PageState::Uninit { target: *target, source: source.clone() } });
            }
            PageState::Anon { swap_slot } => {
                let frame_idx = match super::frame::acquire(child, va) {
                    Some(idx) => idx,
                    None => continue,
                };
                let kva = super::frame::kva(frame_idx);
                match (page.frame, swap_slot) {
                    (Some(_), _) => unsafe {
                        let src_kva = super::frame::kva(page.frame.unwrap());
                        core::ptr::copy_nonoverlapping(src_kva as *const u8, kva as *mut u8, PGSIZE as usize);
                    },
                    (None, Some(slot)) => super::swap::peek(*slot, kva),
                    (None, None) => zero(kva),
                }
                dst.pages.insert(va, Page { writable: page.writable, frame: Some(frame_idx), state: PageState::Anon { swap_slot: None } });
                let _ = crate::memory::paging::map_page(dst_p4, va, kva, page.writable, true);
            }
            PageState::File { file, offset, read_bytes } => {
                let frame_idx = match super::frame::acquire(child, va) {
                    Some(idx) => idx,
                    None => continue,
                };
                let kva = super::frame::kva(frame_idx);
                match page.frame {
                    Some(parent_frame) => unsafe {
                        let src_kva = super::frame::kva(parent_frame);
                        core::ptr::copy_nonoverlapping(src_kva as *const u8, kva as *mut u8, PGSIZE as usize);
                    },
                    None => load_file_bytes(kva, file, *offset, *read_bytes),
                }
                dst.pages.insert(va, Page { writable: page.writable, frame: Some(frame_idx), state: PageState::File { file: file.clone(), offset: *offset, read_bytes: *read_bytes } });
                let _ = crate::memory::paging::map_page(dst_p4, va, kva, page.writable, true);
            }
        }
    }
    let _ = src_p4;
}
