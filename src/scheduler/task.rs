use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::Mutex;

use super::context::Context;
use crate::sync::fixed_point::Fixed;
use crate::vm::spt::SupplementalPageTable;

/// Priority range, matching the donor scheduler's bounds.
pub const PRI_MIN: i64 = 0;
pub const PRI_DEFAULT: i64 = 31;
pub const PRI_MAX: i64 = 63;

/// Unique process identifier (PID). Also doubles as the thread id: this
/// kernel is thread-per-process, so "tid" and "pid" name the same thing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessId(pub u64);

pub const TID_ERROR: i64 = -1;

/// Highest fd index + 1; fds 0/1/2 are reserved for stdio.
pub const OPEN_MAX: usize = 64;

/// A live `mmap`'d region, tracked so `munmap` can find where a mapping
/// starts and the address-space teardown path knows what to walk.
pub struct MmapRegion {
    pub id: i32,
    pub va_start: u64,
}

/// Process/thread state machine: READY -> RUNNING -> {READY, BLOCKED, DYING},
/// BLOCKED -> READY.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Ready,
    Running,
    Blocked,
    /// Exited; its exit record has been (or will be) posted to its parent.
    /// Torn down lazily on the scheduler's next pass (deferred destruction).
    Dying,
}

/// `(tid, exit_code)` parked on the parent's exit-code list when a child
/// terminates, consumed by the first matching `wait`.
#[derive(Debug, Clone, Copy)]
pub struct ExitRecord {
    pub tid: ProcessId,
    pub exit_code: i64,
}

/// Shared, reference-counted handle to a process/thread. Cloning a handle
/// shares the underlying process; the scheduler's registry (`all`) is the
/// sole owner needed to keep a process alive — `children`/`parent` store
/// bare ids, not handles, so a process's resources are freed as soon as
/// the registry drops it (see `scheduler::reap_death_row`).
pub type ProcessHandle = Arc<Mutex<Process>>;

/// A single process/thread unit. The kernel is thread-per-process: a
/// "thread" in the donor scheduler's vocabulary and a "process" here are
/// the same struct.
pub struct Process {
    pub pid: ProcessId,
    pub parent: Option<ProcessId>,
    pub name: String,
    pub state: ProcessState,

    // --- priority & donation ---
    pub base_priority: i64,
    /// Threads currently donating to this one (insertion order; re-sorted
    /// by priority on demand rather than kept sorted eagerly).
    pub donors: Vec<ProcessId>,
    /// Identity (address) of the lock this thread is blocked acquiring,
    /// or `None` if it isn't blocked on a lock. A thread with this set is
    /// BLOCKED.
    pub wait_on_lock: Option<usize>,

    // --- MLFQS statistics ---
    pub nice: i64,
    pub recent_cpu: Fixed,

    // --- scheduling bookkeeping ---
    pub ticks_in_slice: u64,
    pub wake_tick: u64,

    // --- lifecycle ---
    pub exit_status: Option<i64>,
    pub children: Vec<ProcessId>,
    /// Exit records of dead children not yet consumed by `wait`. A child
    /// posts its record here and the scheduler wakes any blocked parent;
    /// `wait` itself polls this list rather than downing a semaphore, since
    /// a `Process` lives by value inside the scheduler's single global lock
    /// and a semaphore embedded in it could never release that lock before
    /// blocking (see `scheduler::sys_wait`).
    pub exit_records: Vec<ExitRecord>,

    pub context: Context,

    /// Address-space root (CR3 value) for this process.
    pub page_table: u64,

    /// Owned kernel stack memory — kept alive as long as the process exists.
    pub kernel_stack: Box<[u8]>,

    pub fd_table: Vec<Option<Arc<Mutex<crate::fs::fd::File>>>>,

    /// The executable file backing this process, held open (deny-write)
    /// for as long as the process runs.
    pub file_in_use: Option<Arc<Mutex<crate::fs::fd::File>>>,

    /// Per-process demand-paging table.
    pub spt: SupplementalPageTable,
    /// Lowest mapped address of the user stack; shrinks (grows downward)
    /// as `vm::fault` services stack-growth faults.
    pub stack_bottom: u64,
    /// User `rsp` captured at the most recent syscall/interrupt entry from
    /// ring 3 — the only reliable source of "the user stack pointer" once
    /// we're running on the kernel stack. Used by stack-growth detection.
    pub saved_user_rsp: u64,
    /// The trap frame saved at the point a fork() was requested; copied
    /// into the child and replayed via `iretq` after `__do_fork` finishes.
    pub fork_frame: Option<crate::scheduler::TrapFrame>,

    /// Live memory-mapped-file regions, most recent last. `next_mapid`
    /// hands out small increasing ids, matching the donor kernel's
    /// `mapid_t`.
    pub mmaps: Vec<MmapRegion>,
    pub next_mapid: i32,
}

impl Process {
    /// 4.4BSD MLFQS priority formula: `PRI_MAX - recent_cpu/4 - nice*2`,
    /// clamped to the valid priority range. Donation plays no part while
    /// MLFQS drives priorities (§4.3).
    pub fn mlfqs_priority(&self) -> i64 {
        let raw = Fixed::from_int(PRI_MAX)
            .sub(self.recent_cpu.div_int(4))
            .sub_int(self.nice * 2)
            .to_int_trunc();
        raw.clamp(PRI_MIN, PRI_MAX)
    }
}
