//! ELF64 loader: validates an executable, demand-maps its segments, and
//! builds the argv-carrying user stack a freshly started process resumes
//! on.

use alloc::string::{String, ToString};
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use spin::Mutex;

use crate::fs::fd::File;
use crate::scheduler::ProcessId;
use crate::vm::spt::{LazySource, PageType, SupplementalPageTable};
use crate::vm::{round_down, PGSIZE, USER_STACK_TOP};

const ELF_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];
const ELFCLASS64: u8 = 2;
const ELFDATA2LSB: u8 = 1;
const ET_EXEC: u16 = 2;
const EM_X86_64: u16 = 62;
const PT_LOAD: u32 = 1;
const PT_DYNAMIC: u32 = 2;
const PT_INTERP: u32 = 3;
const PT_SHLIB: u32 = 5;

/// Program headers beyond this are refused outright rather than parsed —
/// guards against a corrupt `e_phnum` driving an unbounded loop.
const MAX_PHDRS: u16 = 1024;

/// argv strings beyond this many bytes are refused — keeps the
/// command-line build from ever overflowing the single page reserved for
/// it below the stack top.
const MAX_CMDLINE_LEN: usize = 2048;

struct Elf64Ehdr {
    e_entry: u64,
    e_phoff: u64,
    e_phentsize: u16,
    e_phnum: u16,
}

impl Elf64Ehdr {
    fn parse(data: &[u8]) -> Result<Self, ExecError> {
        if data.len() < 64 {
            return Err(ExecError::InvalidFormat);
        }
        if data[0..4] != ELF_MAGIC {
            return Err(ExecError::InvalidFormat);
        }
        if data[4] != ELFCLASS64 {
            return Err(ExecError::UnsupportedArch);
        }
        if data[5] != ELFDATA2LSB {
            return Err(ExecError::UnsupportedArch);
        }

        let e_type = u16::from_le_bytes([data[16], data[17]]);
        let e_machine = u16::from_le_bytes([data[18], data[19]]);
        if e_type != ET_EXEC {
            return Err(ExecError::UnsupportedType);
        }
        if e_machine != EM_X86_64 {
            return Err(ExecError::UnsupportedArch);
        }

        let e_phentsize = u16::from_le_bytes([data[54], data[55]]);
        let e_phnum = u16::from_le_bytes([data[56], data[57]]);
        if e_phnum > MAX_PHDRS {
            return Err(ExecError::InvalidFormat);
        }
        if e_phentsize < 56 {
            return Err(ExecError::InvalidFormat);
        }

        Ok(Elf64Ehdr {
            e_entry: u64::from_le_bytes(data[24..32].try_into().unwrap()),
            e_phoff: u64::from_le_bytes(data[32..40].try_into().unwrap()),
            e_phentsize,
            e_phnum,
        })
    }
}

struct Elf64Phdr {
    p_type: u32,
    p_offset: u64,
    p_vaddr: u64,
    p_filesz: u64,
    p_memsz: u64,
    p_flags: u32,
}

impl Elf64Phdr {
    fn parse(data: &[u8]) -> Result<Self, ExecError> {
        if data.len() < 56 {
            return Err(ExecError::InvalidFormat);
        }
        Ok(Elf64Phdr {
            p_type: u32::from_le_bytes(data[0..4].try_into().unwrap()),
            p_flags: u32::from_le_bytes(data[4..8].try_into().unwrap()),
            p_offset: u64::from_le_bytes(data[8..16].try_into().unwrap()),
            p_vaddr: u64::from_le_bytes(data[16..24].try_into().unwrap()),
            p_filesz: u64::from_le_bytes(data[32..40].try_into().unwrap()),
            p_memsz: u64::from_le_bytes(data[40..48].try_into().unwrap()),
        })
    }

    /// Writable per the hardware PF_W bit (bit 1).
    fn writable(&self) -> bool {
        self.p_flags & 0x2 != 0
    }
}

#[derive(Debug)]
pub enum ExecError {
    FileNotFound,
    InvalidFormat,
    UnsupportedArch,
    UnsupportedType,
    DynamicLinkingUnsupported,
    SegmentOutOfBounds,
    TooManyArguments,
    MemoryError,
    ReadError,
}

impl fmt::Display for ExecError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ExecError::FileNotFound => write!(f, "File not found"),
            ExecError::InvalidFormat => write!(f, "Invalid ELF format"),
            ExecError::UnsupportedArch => write!(f, "Unsupported architecture"),
            ExecError::UnsupportedType => write!(f, "Unsupported ELF type (need ET_EXEC)"),
            ExecError::DynamicLinkingUnsupported => write!(f, "Dynamically linked executables are not supported"),
            ExecError::SegmentOutOfBounds => write!(f, "Segment falls outside the user address region"),
            ExecError::TooManyArguments => write!(f, "Command line too long"),
            ExecError::MemoryError => write!(f, "Memory allocation error"),
            ExecError::ReadError => write!(f, "File read error"),
        }
    }
}

/// Everything a newly built process record needs pulled out of the
/// loader, since `exec`/`spawn_user` build the `Process` themselves
/// (address-space replacement and address-space creation differ).
pub struct LoadedImage {
    pub page_table: u64,
    pub spt: SupplementalPageTable,
    pub entry: u64,
    pub user_rsp: u64,
    pub argc: u64,
    pub argv_ptr: u64,
    pub stack_bottom: u64,
    pub name: String,
    pub file_in_use: Arc<Mutex<File>>,
}

/// Load `cmdline` (the program path, followed by whitespace-separated
/// arguments) into a brand-new address space. Does not touch the calling
/// process's own state — `exec`/`spawn_user` apply the result atomically.
pub fn load_image(cmdline: &str) -> Result<LoadedImage, ExecError> {
    if cmdline.len() > MAX_CMDLINE_LEN {
        return Err(ExecError::TooManyArguments);
    }
    let mut args: Vec<&str> = cmdline.split_whitespace().collect();
    if args.is_empty() {
        return Err(ExecError::FileNotFound);
    }
    let path = args.remove(0);

    let file_data = read_file_all(path)?;
    let ehdr = Elf64Ehdr::parse(&file_data)?;

    let mut phdrs = Vec::with_capacity(ehdr.e_phnum as usize);
    for i in 0..ehdr.e_phnum as usize {
        let off = ehdr.e_phoff as usize + i * ehdr.e_phentsize as usize;
        if off + 56 > file_data.len() {
            return Err(ExecError::InvalidFormat);
        }
        phdrs.push(Elf64Phdr::parse(&file_data[off..])?);
    }

    for phdr in &phdrs {
        if phdr.p_type == PT_DYNAMIC || phdr.p_type == PT_INTERP || phdr.p_type == PT_SHLIB {
            return Err(ExecError::DynamicLinkingUnsupported);
        }
    }

    let p4_phys = crate::memory::paging::create_address_space().ok_or(ExecError::MemoryError)?;
    let mut spt = SupplementalPageTable::new();

    let executable = File::new_regular(path, true, false);
    executable.lock().deny_write = true;
    crate::fs::VFS.lock().deny_write(path);

    for phdr in &phdrs {
        if phdr.p_type != PT_LOAD {
            continue;
        }
        if phdr.p_memsz == 0 {
            continue;
        }
        if phdr.p_memsz < phdr.p_filesz {
            crate::memory::paging::destroy_address_space(p4_phys);
            return Err(ExecError::InvalidFormat);
        }
        // Same page offset so file and memory pages line up byte-for-byte.
        if phdr.p_offset % PGSIZE != phdr.p_vaddr % PGSIZE {
            crate::memory::paging::destroy_address_space(p4_phys);
            return Err(ExecError::InvalidFormat);
        }
        let seg_end = match phdr.p_vaddr.checked_add(phdr.p_memsz) {
            Some(e) => e,
            None => {
                crate::memory::paging::destroy_address_space(p4_phys);
                return Err(ExecError::SegmentOutOfBounds);
            }
        };
        if phdr.p_vaddr < PGSIZE
            || !crate::memory::paging::in_user_region(phdr.p_vaddr)
            || !crate::memory::paging::in_user_region(seg_end - 1)
        {
            crate::memory::paging::destroy_address_space(p4_phys);
            return Err(ExecError::SegmentOutOfBounds);
        }

        // `p_offset` and `p_vaddr` share the same page-offset remainder
        // (checked above), so the file offset backing page `va` is just
        // `p_offset` shifted by the same delta as `va` is from `p_vaddr`.
        let page_start = round_down(phdr.p_vaddr);
        let page_end = round_down(seg_end - 1) + PGSIZE;
        let seg_file_end = phdr.p_offset + phdr.p_filesz;
        let mut va = page_start;
        while va < page_end {
            let in_page_file_off = (phdr.p_offset as i64 + (va as i64 - phdr.p_vaddr as i64)) as u64;

            let read_bytes: u32 = if in_page_file_off >= seg_file_end {
                0
            } else if in_page_file_off + PGSIZE <= seg_file_end {
                PGSIZE as u32
            } else {
                (seg_file_end - in_page_file_off) as u32
            };

            let source = if read_bytes > 0 {
                LazySource::FileBacked { file: executable.clone(), offset: in_page_file_off, read_bytes }
            } else {
                LazySource::Zero
            };
            spt.alloc_uninit(va, phdr.writable(), PageType::Anon, source);
            va += PGSIZE;
        }
    }

    // User stack: one UNINIT anon page at the top of the user region,
    // grown lazily by `vm::fault`'s stack-growth path (§5).
    let stack_bottom = USER_STACK_TOP;
    spt.alloc_uninit(stack_bottom, true, PageType::Anon, LazySource::Zero);

    let (user_rsp, argc, argv_ptr) = build_argv_stack(&mut spt, p4_phys, path, &args)?;

    let name = path.rsplit('/').next().unwrap_or(path).to_string();

    Ok(LoadedImage {
        page_table: p4_phys,
        spt,
        entry: ehdr.e_entry,
        user_rsp,
        argc,
        argv_ptr,
        stack_bottom,
        name,
        file_in_use: executable,
    })
}

/// Build the argv-carrying stack image in the top page of the user
/// stack, matching Pintos's layout: strings first (top-down), 8-byte
/// alignment padding, a null sentinel, then the `argv` pointer array
/// (right to left), then a fake return address. The page is demand-paged
/// (just registered, not yet resident) so this writes through the
/// supplemental table's fault handler rather than a raw pointer.
fn build_argv_stack(spt: &mut SupplementalPageTable, p4_phys: u64, path: &str, args: &[&str]) -> Result<(u64, u64, u64), ExecError> {
    // Force the top stack page resident now — we need to write into it
    // directly, something only possible once it has a real frame. The
    // process isn't admitted to the scheduler yet, so frame ownership is
    // provisionally attributed to pid 0 (the kernel thread); harmless
    // except under heavy eviction pressure against a process that hasn't
    // started running yet, which can't happen before it's admitted.
    let top_page = round_down(USER_STACK_TOP + PGSIZE - 1);
    if !spt.is_resident(top_page) {
        spt.load(ProcessId(0), p4_phys, top_page);
    }
    // `load`'s mapping target is irrelevant here (no process owns this
    // address space yet); what we need is the frame's kernel-accessible
    // address to write into directly.
    let page = spt.get(top_page).ok_or(ExecError::MemoryError)?;
    let frame_idx = page.frame.ok_or(ExecError::MemoryError)?;
    let kva_base = crate::vm::frame::kva(frame_idx);

    let mut sp = USER_STACK_TOP + PGSIZE;
    let write = |at: u64, bytes: &[u8]| unsafe {
        let off = (at - top_page) as usize;
        core::ptr::copy_nonoverlapping(bytes.as_ptr(), (kva_base as usize + off) as *mut u8, bytes.len());
    };

    let mut argv_addrs = Vec::with_capacity(args.len() + 1);

    sp -= path.len() as u64 + 1;
    write(sp, path.as_bytes());
    write(sp + path.len() as u64, &[0u8]);
    argv_addrs.push(sp);

    for arg in args {
        sp -= arg.len() as u64 + 1;
        write(sp, arg.as_bytes());
        write(sp + arg.len() as u64, &[0u8]);
        argv_addrs.push(sp);
    }

    // `argv[]` (including its null terminator) is `(argc + 1)` quadwords;
    // choose the 16-byte-aligned boundary below the strings such that
    // writing that whole block, then the fake return address, leaves
    // `sp % 16 == 8` — the state the ABI expects on entry to a function
    // reached via `call` (which itself consumed 8 bytes of alignment).
    let ptr_block_bytes = 8 * (argv_addrs.len() as u64 + 1);
    sp &= !0xF;
    if (sp - ptr_block_bytes) % 16 != 0 {
        sp -= 8;
    }

    // Null sentinel terminating argv[].
    sp -= 8;
    write(sp, &0u64.to_le_bytes());

    // Written highest-index-first so the lowest address (becomes
    // `argv_ptr`, i.e. argv[0]) ends up holding the path — argv[] is
    // read forward from there.
    for &addr in argv_addrs.iter().rev() {
        sp -= 8;
        write(sp, &addr.to_le_bytes());
    }
    let argv_ptr = sp;

    // Fake return address: main() is entered directly, never returns to
    // this frame, but the ABI still expects *something* at [rsp].
    sp -= 8;
    write(sp, &0u64.to_le_bytes());

    Ok((sp, argv_addrs.len() as u64, argv_ptr))
}

fn read_file_all(path: &str) -> Result<Vec<u8>, ExecError> {
    let vfs = crate::fs::VFS.lock();
    let inode = vfs.lookup(path).map_err(|_| ExecError::FileNotFound)?;
    if inode.size == 0 {
        return Err(ExecError::InvalidFormat);
    }
    let mut buf = alloc::vec![0u8; inode.size];
    let bytes_read = vfs.read_file(path, 0, &mut buf).map_err(|_| ExecError::ReadError)?;
    buf.truncate(bytes_read);
    Ok(buf)
}

/// Entered via a manufactured `Context` (see `scheduler::sys_exec`): the
/// callee-saved register slots a normal context switch would restore are
/// repurposed to carry the new program's entry point, user stack pointer,
/// argc and argv, since this "function" is jumped into directly rather
/// than called with real arguments.
#[unsafe(naked)]
pub extern "C" fn usermode_entry_trampoline() {
    unsafe {
        core::arch::naked_asm!(
            "mov rdi, r12", // entry
            "mov rsi, r13", // user_rsp
            "mov rdx, r14", // argc
            "mov rcx, r15", // argv_ptr
            "call {finish}",
            finish = sym finish_exec_entry,
        );
    }
}

extern "C" fn finish_exec_entry(entry: u64, user_rsp: u64, argc: u64, argv_ptr: u64) -> ! {
    let user_cs = crate::interrupts::gdt::user_code_selector().0;
    let user_ss = crate::interrupts::gdt::user_data_selector().0;
    crate::interrupts::usermode::jump_to_usermode_with_args(entry, user_rsp, user_cs, user_ss, argc, argv_ptr);
}
