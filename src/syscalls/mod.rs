//! Syscall dispatcher: the `int 0x80` entry point's Rust half, userspace
//! pointer/fd validation, and the sixteen syscalls this kernel serves
//! (§4.5, §6).

use alloc::format;
use alloc::string::String;
use alloc::sync::Arc;
use spin::Mutex;

use crate::fs::fd::{File, FileType};
use crate::memory::paging;
use crate::scheduler::{self, task, TrapFrame};
use crate::vm;

pub const SYS_HALT: u64 = 0;
pub const SYS_EXIT: u64 = 1;
pub const SYS_FORK: u64 = 2;
pub const SYS_EXEC: u64 = 3;
pub const SYS_WAIT: u64 = 4;
pub const SYS_CREATE: u64 = 5;
pub const SYS_REMOVE: u64 = 6;
pub const SYS_OPEN: u64 = 7;
pub const SYS_FILESIZE: u64 = 8;
pub const SYS_READ: u64 = 9;
pub const SYS_WRITE: u64 = 10;
pub const SYS_SEEK: u64 = 11;
pub const SYS_TELL: u64 = 12;
pub const SYS_CLOSE: u64 = 13;
pub const SYS_MMAP: u64 = 14;
pub const SYS_MUNMAP: u64 = 15;

/// Serializes every filesystem-touching syscall (§5's `global_sys_lock`).
static FILESYS_LOCK: Mutex<()> = Mutex::new(());

/// The sentinel returned to userspace on a recoverable failure — `-1` or
/// `NULL` reinterpreted as `u64` (§7).
const ERR: u64 = u64::MAX;

const MAX_PATH_LEN: usize = 128;
const MAX_RW_LEN: usize = 16 * 1024 * 1024;

/// Terminate the caller for violating its contract: bad pointer,
/// out-of-range fd, malformed mmap request (§4.5, §7).
fn kill_current() -> ! {
    scheduler::exit_current(-1)
}

/// True iff every byte of `[va, va+len)` is one the calling process may
/// legally touch right now: inside the user window, and either already
/// mapped with the needed permission or tracked (lazily loadable) in its
/// supplemental page table with that permission (§4.5).
fn validate_user_range(va: u64, len: usize, need_write: bool) -> bool {
    if va == 0 || len == 0 {
        return false;
    }
    let end = match va.checked_add(len as u64) {
        Some(e) => e,
        None => return false,
    };
    if !paging::in_user_region(va) || !paging::in_user_region(end - 1) {
        return false;
    }
    let pid = scheduler::current_pid();
    scheduler::with_process_mut(pid, |p| {
        let p4 = p.page_table;
        let mut page = va & !(vm::PGSIZE - 1);
        while page < end {
            let ok = if paging::is_mapped(p4, page) {
                !need_write || paging::is_writable(p4, page)
            } else if let Some(tracked) = p.spt.get(page) {
                !need_write || tracked.writable
            } else {
                false
            };
            if !ok {
                return false;
            }
            page += vm::PGSIZE;
        }
        true
    })
    .unwrap_or(false)
}

/// Validate and copy out a NUL-terminated user string, one byte at a
/// time (mirrors the donor kernel's byte-at-a-time `get_user`), up to
/// `MAX_PATH_LEN`.
fn validate_user_cstr(va: u64) -> Option<String> {
    if va == 0 || !paging::in_user_region(va) {
        return None;
    }
    let mut out = alloc::vec::Vec::new();
    let mut cur = va;
    loop {
        if out.len() >= MAX_PATH_LEN {
            return None;
        }
        if !validate_user_range(cur, 1, false) {
            return None;
        }
        let byte = unsafe { core::ptr::read(cur as *const u8) };
        if byte == 0 {
            return core::str::from_utf8(&out).ok().map(String::from);
        }
        out.push(byte);
        cur += 1;
    }
}

/// File-descriptor range reserved for real files (0/1/2 are console
/// stdio, always present — §4.5).
fn is_file_fd(fd: usize) -> bool {
    (3..task::OPEN_MAX).contains(&fd)
}

fn fd_file(fd: usize) -> Option<Arc<Mutex<File>>> {
    if fd >= task::OPEN_MAX {
        return None;
    }
    let pid = scheduler::current_pid();
    scheduler::with_process_mut(pid, |p| p.fd_table[fd].clone()).flatten()
}

/// Paths are flat names under the root mount (§6 — "no directories");
/// the VFS itself wants absolute paths, so prefix one if the caller
/// didn't supply it.
fn to_abs_path(name: &str) -> String {
    if name.starts_with('/') {
        String::from(name)
    } else {
        format!("/{}", name)
    }
}

/// One polled byte of console input. Fixes the donor kernel's `read(fd=0)`
/// bug, which fed the single byte `input_getc()` returns to `file_read` as
/// though it were a `struct file*` — here STDIN is serviced directly,
/// never routed through the filesystem at all, and `SYS_READ` loops this
/// to actually fill the caller's `size` bytes instead of silently
/// under-reading.
fn input_getc() -> u8 {
    use crate::drivers::keyboard::scancodes::KeyCode;
    match crate::drivers::keyboard::read_char() {
        KeyCode::Char(c) => c as u8,
        KeyCode::Enter => b'\n',
        KeyCode::Backspace => 0x08,
        KeyCode::Space => b' ',
        _ => 0,
    }
}

fn console_putbuf(bytes: &[u8]) {
    if let Ok(s) = core::str::from_utf8(bytes) {
        crate::print!("{}", s);
    }
}

/// Central syscall dispatcher — called from the `int 0x80` handler with
/// the six System V integer argument registers carrying `number` and the
/// syscall's own up-to-four arguments (§6).
pub extern "C" fn dispatch(number: u64, arg0: u64, arg1: u64, arg2: u64, arg3: u64, arg4: u64) -> u64 {
    let _ = arg4;
    let frame_ptr = crate::interrupts::usermode::current_trap_frame();
    let frame: TrapFrame = unsafe { core::ptr::read(frame_ptr) };

    // The saved user `rsp` is captured here, once, rather than read live
    // later — by the time a stack-growth fault asks for it we're running
    // on the kernel stack and the live `rsp` no longer means anything
    // about the user stack (§4.6).
    let pid = scheduler::current_pid();
    scheduler::with_process_mut(pid, |p| p.saved_user_rsp = frame.rsp);

    // `int 0x80` enters through an interrupt gate, which clears IF; a
    // long-running syscall (a blocking read, a page-in) must not hold
    // interrupts off for that long, so re-enable them immediately.
    x86_64::instructions::interrupts::enable();

    match number {
        SYS_HALT => {
            crate::log_info!("halt: system halted");
            loop {
                x86_64::instructions::hlt();
            }
        }
        SYS_EXIT => scheduler::exit_current(arg0 as i64),
        SYS_FORK => scheduler::sys_fork(&frame) as u64,
        SYS_EXEC => {
            let path = match validate_user_cstr(arg0) {
                Some(s) => s,
                None => kill_current(),
            };
            match scheduler::sys_exec(&path) {
                Ok(()) => unreachable!("sys_exec never returns on success"),
                Err(e) => {
                    crate::log_warn!("exec '{}' failed: {}", path, e);
                    ERR
                }
            }
        }
        SYS_WAIT => scheduler::sys_wait(arg0 as i64) as u64,
        SYS_CREATE => {
            let name = match validate_user_cstr(arg0) {
                Some(s) => s,
                None => kill_current(),
            };
            let _guard = FILESYS_LOCK.lock();
            match crate::fs::VFS.lock().create(&to_abs_path(&name)) {
                Ok(_) => 1,
                Err(_) => 0,
            }
        }
        SYS_REMOVE => {
            let name = match validate_user_cstr(arg0) {
                Some(s) => s,
                None => kill_current(),
            };
            let _guard = FILESYS_LOCK.lock();
            match crate::fs::VFS.lock().unlink(&to_abs_path(&name)) {
                Ok(()) => 1,
                Err(_) => 0,
            }
        }
        SYS_OPEN => {
            let name = match validate_user_cstr(arg0) {
                Some(s) => s,
                None => kill_current(),
            };
            let abs = to_abs_path(&name);
            let _guard = FILESYS_LOCK.lock();
            if !crate::fs::VFS.lock().exists(&abs) {
                return ERR;
            }
            let file = File::new_regular(&abs, true, true);
            let pid = scheduler::current_pid();
            let fd = scheduler::with_process_mut(pid, |p| {
                for i in 3..task::OPEN_MAX {
                    if p.fd_table[i].is_none() {
                        p.fd_table[i] = Some(file.clone());
                        return Some(i);
                    }
                }
                None
            })
            .flatten();
            match fd {
                Some(i) => i as u64,
                None => ERR,
            }
        }
        SYS_FILESIZE => {
            let fd = arg0 as usize;
            if !is_file_fd(fd) {
                return ERR;
            }
            let file = match fd_file(fd) {
                Some(f) => f,
                None => return ERR,
            };
            let path = file.lock().path.clone();
            let _guard = FILESYS_LOCK.lock();
            match crate::fs::VFS.lock().lookup(&path) {
                Ok(inode) => inode.size as u64,
                Err(_) => ERR,
            }
        }
        SYS_READ => {
            let fd = arg0 as usize;
            let buf = arg1;
            let len = arg2 as usize;
            if len == 0 {
                return 0;
            }
            if len > MAX_RW_LEN || fd >= task::OPEN_MAX {
                kill_current();
            }
            if !validate_user_range(buf, len, true) {
                kill_current();
            }
            let slice = unsafe { core::slice::from_raw_parts_mut(buf as *mut u8, len) };
            if fd == 0 {
                for byte in slice.iter_mut() {
                    *byte = input_getc();
                }
                return len as u64;
            }
            let file = match fd_file(fd) {
                Some(f) => f,
                None => return ERR,
            };
            let file_guard = file.lock();
            if !file_guard.readable {
                return ERR;
            }
            let is_regular = matches!(file_guard.file_type, FileType::Regular);
            if is_regular {
                let path = file_guard.path.clone();
                let offset = file_guard.offset as usize;
                drop(file_guard);
                let _guard = FILESYS_LOCK.lock();
                match crate::fs::VFS.lock().read_file(&path, offset, slice) {
                    Ok(n) => {
                        file.lock().offset += n as u64;
                        n as u64
                    }
                    Err(_) => ERR,
                }
            } else {
                ERR
            }
        }
        SYS_WRITE => {
            let fd = arg0 as usize;
            let buf = arg1;
            let len = arg2 as usize;
            if len == 0 {
                return 0;
            }
            if len > MAX_RW_LEN || fd >= task::OPEN_MAX {
                kill_current();
            }
            if !validate_user_range(buf, len, false) {
                kill_current();
            }
            let slice = unsafe { core::slice::from_raw_parts(buf as *const u8, len) };
            if fd == 1 || fd == 2 {
                console_putbuf(slice);
                return len as u64;
            }
            let file = match fd_file(fd) {
                Some(f) => f,
                None => return ERR,
            };
            let file_guard = file.lock();
            if !file_guard.writable {
                return ERR;
            }
            let is_regular = matches!(file_guard.file_type, FileType::Regular);
            if is_regular {
                let path = file_guard.path.clone();
                let offset = file_guard.offset as usize;
                drop(file_guard);
                let _guard = FILESYS_LOCK.lock();
                match crate::fs::VFS.lock().write_file_at(&path, offset, slice) {
                    Ok(n) => {
                        file.lock().offset += n as u64;
                        n as u64
                    }
                    Err(_) => ERR,
                }
            } else {
                ERR
            }
        }
        SYS_SEEK => {
            let fd = arg0 as usize;
            if !is_file_fd(fd) {
                return ERR;
            }
            let file = match fd_file(fd) {
                Some(f) => f,
                None => return ERR,
            };
            let _guard = FILESYS_LOCK.lock();
            file.lock().offset = arg1;
            0
        }
        SYS_TELL => {
            let fd = arg0 as usize;
            if !is_file_fd(fd) {
                return ERR;
            }
            let file = match fd_file(fd) {
                Some(f) => f,
                None => return ERR,
            };
            let _guard = FILESYS_LOCK.lock();
            file.lock().offset
        }
        SYS_CLOSE => {
            let fd = arg0 as usize;
            if !is_file_fd(fd) {
                return ERR;
            }
            let _guard = FILESYS_LOCK.lock();
            let pid = scheduler::current_pid();
            scheduler::with_process_mut(pid, |p| p.fd_table[fd] = None);
            0
        }
        SYS_MMAP => {
            let fd = arg0 as usize;
            let addr = arg1;
            // fd ∈ {0,1}, addr 0, or an unaligned addr all fail outright (§8).
            if !is_file_fd(fd) || addr == 0 || addr & (vm::PGSIZE - 1) != 0 {
                return ERR;
            }
            let file = match fd_file(fd) {
                Some(f) => f,
                None => return ERR,
            };
            let path = file.lock().path.clone();
            let length = {
                let _guard = FILESYS_LOCK.lock();
                match crate::fs::VFS.lock().lookup(&path) {
                    Ok(inode) => inode.size as u64,
                    Err(_) => return ERR,
                }
            };
            if length == 0 {
                return ERR;
            }
            if !paging::in_user_region(addr) || !paging::in_user_region(addr + vm::round_up(length) - 1) {
                return ERR;
            }
            let pid = scheduler::current_pid();
            let mapid = scheduler::with_process_mut(pid, |p| {
                let pages = vm::mmap::mmap_pages(&mut p.spt, addr, &path, length)?;
                let _ = pages;
                let id = p.next_mapid;
                p.next_mapid += 1;
                p.mmaps.push(task::MmapRegion { id, va_start: addr });
                Some(id)
            })
            .flatten();
            match mapid {
                Some(id) => id as u64,
                None => ERR,
            }
        }
        SYS_MUNMAP => {
            let mapid = arg0 as i32;
            let pid = scheduler::current_pid();
            scheduler::with_process_mut(pid, |p| {
                if let Some(pos) = p.mmaps.iter().position(|m| m.id == mapid) {
                    let region = p.mmaps.remove(pos);
                    let p4 = p.page_table;
                    vm::mmap::munmap_pages(&mut p.spt, p4, region.va_start);
                }
            });
            0
        }
        _ => {
            crate::log_warn!("syscall: unknown number {}", number);
            kill_current();
        }
    }
}

pub fn init() {
    crate::log_info!("syscall interface initialized (16 syscalls)");
}
