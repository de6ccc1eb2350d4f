//! Memory-mapped files: maps a file's bytes into a process's address
//! space lazily, page by page, through the same UNINIT/FILE machinery
//! ordinary demand-paged segments use.

use alloc::sync::Arc;
use spin::Mutex;

use crate::fs::fd::File;

use super::spt::{LazySource, PageType, SupplementalPageTable};
use super::{round_up, PGSIZE};

/// Reopen `path` as an independent file handle for the mapping to own,
/// so closing the caller's original fd (or further seeks on it) can
/// never disturb pages already mapped from it.
fn reopen(path: &str) -> Arc<Mutex<File>> {
    File::new_regular(path, true, true)
}

/// Register the UNINIT/FILE pages for a mapping of `length` bytes from
/// `path`, starting at `va_start`. Fails (returning `None`) if any page
/// in the range is already tracked in the supplemental page table —
/// `mmap` must pick addresses that don't collide with existing mappings.
/// Returns the number of pages registered.
pub fn mmap_pages(spt: &mut SupplementalPageTable, va_start: u64, path: &str, length: u64) -> Option<u64> {
    if length == 0 {
        return None;
    }
    let page_count = round_up(length) / PGSIZE;

    for i in 0..page_count {
        if spt.contains(va_start + i * PGSIZE) {
            return None;
        }
    }

    let file = reopen(path);
    for i in 0..page_count {
        let va = va_start + i * PGSIZE;
        let file_off = i * PGSIZE;
        let read_bytes = core::cmp::min(PGSIZE, length.saturating_sub(file_off)) as u32;
        let source = LazySource::FileBacked { file: file.clone(), offset: file_off, read_bytes };
        spt.alloc_uninit(va, true, PageType::File, source);
    }

    Some(page_count)
}

/// Unmap a file-backed mapping starting at `va_start`: walk consecutive
/// FILE pages (writing back any that are dirty) until a non-FILE page or
/// the end of the tracked range is reached.
pub fn munmap_pages(spt: &mut SupplementalPageTable, p4_phys: u64, va_start: u64) {
    let mut va = va_start;
    while spt.is_file_page(va) {
        spt.remove(p4_phys, va);
        va += PGSIZE;
    }
}
