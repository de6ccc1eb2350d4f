//! Thread scheduler: priority ready list, sleep list, priority donation
//! integration, optional MLFQS, and the process lifecycle (fork/exec/
//! wait/exit) built on top of it.
//!
//! Single-lock design: `SCHEDULER` is the only lock the scheduler, the
//! process lifecycle, and the VM subsystem's frame table ever need to
//! reach a `Process`. A `Process` lives *by value* inside the scheduler's
//! map rather than behind its own `Arc<Mutex<_>>` — embedding a second
//! lock per-process would let two call paths each hold one half of a
//! lock-ordering cycle (see `vm::frame::acquire`'s doc comment). The
//! trade-off is that every access goes through `with_process_mut`, which
//! takes the global lock for the duration of the closure.

pub mod task;
pub mod context;

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;
use spin::Mutex;
use lazy_static::lazy_static;

pub use task::{ExitRecord, Process, ProcessId, ProcessState, PRI_DEFAULT, PRI_MAX, PRI_MIN, TID_ERROR};
use context::Context;
use crate::sync::fixed_point::Fixed;
use crate::vm::spt::SupplementalPageTable;

/// Size of each process's kernel stack.
const TASK_STACK_SIZE: usize = 4096 * 4;

/// Ticks between forced time-slice yields (§4.3).
const TIME_SLICE: u64 = 4;

/// Timer frequency, used to gate the once-a-second MLFQS recomputation.
const TIMER_HZ: u64 = 100;

/// Bound on how deep a donation chain is ever walked (§4.2, §9).
const MAX_DONATION_DEPTH: u32 = 8;

/// The interrupt frame layout pushed by `syscall_handler_asm` before
/// calling into Rust: fourteen explicitly-saved GPRs followed by the
/// five the CPU itself pushes on a ring transition. `fork` copies this
/// verbatim into the child so it can resume in userspace exactly where
/// the parent trapped in; stack-growth faults read the saved `rsp` field
/// out of it via `Process::saved_user_rsp` (captured at trap entry,
/// before the kernel stack is disturbed any further).
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct TrapFrame {
    pub rcx: u64,
    pub rbx: u64,
    pub rdi: u64,
    pub rsi: u64,
    pub rdx: u64,
    pub rbp: u64,
    pub r8: u64,
    pub r9: u64,
    pub r10: u64,
    pub r11: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
    pub rip: u64,
    pub cs: u64,
    pub rflags: u64,
    pub rsp: u64,
    pub ss: u64,
}

/// What becomes of the currently running process when the scheduler is
/// next entered.
enum Disposition {
    /// Still runnable; goes back onto the ready list.
    Ready,
    /// Parked on some wait channel (semaphore waiter list, sleep list,
    /// `wait()` poll); left exactly where the blocking call already put
    /// it, untouched here.
    Blocked,
    /// Terminated; staged for deferred destruction.
    Dying,
}

struct Scheduler {
    /// Every live process, keyed by pid. The sole owner of each
    /// `Process` — removing an entry frees its kernel stack, fd table,
    /// and address space resources via `Drop`.
    processes: BTreeMap<ProcessId, Process>,
    /// Ready-to-run pids, not including `current`.
    ready: Vec<ProcessId>,
    /// `(pid, wake_tick)`, kept sorted ascending by wake tick so
    /// `wakeup` can stop at the first still-sleeping entry.
    sleeping: Vec<(ProcessId, u64)>,
    current: Option<ProcessId>,
    /// Pids marked Dying as of the last scheduling decision; freed at
    /// the start of the *next* one (one context switch later — the
    /// exiting process is still executing on its own kernel stack when
    /// it's marked, so its memory can't be reclaimed until some other
    /// process is running).
    death_row: Vec<ProcessId>,
    next_id: u64,
    ticks: u64,
    active: bool,

    // --- MLFQS ---
    mlfqs: bool,
    load_avg: Fixed,

    // --- preemption bookkeeping ---
    /// Incremented/decremented around interrupt handlers; `yield_now`
    /// inside an interrupt would corrupt the handler's own stack frame,
    /// so preemption requests made from interrupt context are deferred
    /// to `poll_need_resched`, called at the handler's return path.
    interrupt_depth: u32,
    need_resched: bool,
}

impl Scheduler {
    fn new() -> Self {
        Scheduler {
            processes: BTreeMap::new(),
            ready: Vec::new(),
            sleeping: Vec::new(),
            current: None,
            death_row: Vec::new(),
            next_id: 1,
            ticks: 0,
            active: false,
            mlfqs: false,
            load_avg: Fixed::ZERO,
            interrupt_depth: 0,
            need_resched: false,
        }
    }

    fn alloc_id(&mut self) -> ProcessId {
        let id = ProcessId(self.next_id);
        self.next_id += 1;
        id
    }
}

lazy_static! {
    static ref SCHEDULER: Mutex<Scheduler> = Mutex::new(Scheduler::new());
}

fn default_fd_table() -> Vec<Option<alloc::sync::Arc<spin::Mutex<crate::fs::fd::File>>>> {
    use crate::fs::fd::File;
    let mut table = Vec::with_capacity(task::OPEN_MAX);
    for _ in 0..task::OPEN_MAX {
        table.push(None);
    }
    table[0] = Some(File::new_console());
    table[1] = Some(File::new_console());
    table[2] = Some(File::new_console());
    table
}

fn alloc_kernel_stack() -> Box<[u8]> {
    vec![0u8; TASK_STACK_SIZE].into_boxed_slice()
}

fn stack_top_of(stack: &[u8]) -> u64 {
    (stack.as_ptr() as u64 + TASK_STACK_SIZE as u64) & !0xF
}

/// Build a fresh `Process` record. Shared by `init` (pid 0, the idle/
/// kernel thread), `spawn` (kernel threads), and the exec/fork paths
/// (which overwrite the fields their callers care about afterward).
fn new_process(name: &str, parent: Option<ProcessId>, page_table: u64) -> Process {
    let kernel_stack = alloc_kernel_stack();
    Process {
        pid: ProcessId(0), // caller assigns
        parent,
        name: String::from(name),
        state: ProcessState::Ready,
        base_priority: PRI_DEFAULT,
        donors: Vec::new(),
        wait_on_lock: None,
        nice: 0,
        recent_cpu: Fixed::ZERO,
        ticks_in_slice: 0,
        wake_tick: 0,
        exit_status: None,
        children: Vec::new(),
        exit_records: Vec::new(),
        context: Context::empty(),
        page_table,
        kernel_stack,
        fd_table: default_fd_table(),
        file_in_use: None,
        spt: SupplementalPageTable::new(),
        stack_bottom: 0,
        saved_user_rsp: 0,
        fork_frame: None,
        mmaps: Vec::new(),
        next_mapid: 0,
    }
}

/// Bring up the scheduler: process 0 is the kernel's boot thread (the
/// one already running on the boot stack), marked RUNNING with no
/// kernel-owned stack of its own (it keeps using whatever stack `_start`
/// is on).
pub fn init() {
    let mut sched = SCHEDULER.lock();
    let p4 = unsafe { crate::memory::paging::current_p4_phys() }.as_u64();

    let mut kernel = new_process("kernel", None, p4);
    kernel.pid = ProcessId(0);
    kernel.state = ProcessState::Running;
    kernel.kernel_stack = Vec::new().into_boxed_slice(); // unused: this thread never context-switches away from _start's own stack as "new"
    sched.next_id = 1;
    sched.processes.insert(ProcessId(0), kernel);
    sched.current = Some(ProcessId(0));
    sched.active = true;
    drop(sched);

    crate::log_info!("scheduler: initialized, kernel thread is pid 0");
}

/// Enable MLFQS (from the `-o mlfqs` boot option). Must be called before
/// any process other than pid 0 exists.
pub fn enable_mlfqs() {
    SCHEDULER.lock().mlfqs = true;
    crate::log_info!("scheduler: MLFQS enabled");
}

pub fn mlfqs_enabled() -> bool {
    SCHEDULER.lock().mlfqs
}

/// Spawn a kernel-mode thread (no user address space) running `entry`.
pub fn spawn(entry: fn(), name: &str) -> ProcessId {
    let mut sched = SCHEDULER.lock();
    let parent = sched.current;
    let p4 = sched.current.and_then(|c| sched.processes.get(&c)).map(|p| p.page_table)
        .unwrap_or_else(|| unsafe { crate::memory::paging::current_p4_phys() }.as_u64());

    let mut proc = new_process(name, parent, p4);
    let id = sched.alloc_id();
    proc.pid = id;
    let stack_top = stack_top_of(&proc.kernel_stack);
    proc.context = Context::new(entry as u64, stack_top);

    if let Some(parent_pid) = parent {
        if let Some(p) = sched.processes.get_mut(&parent_pid) {
            p.children.push(id);
        }
    }

    sched.processes.insert(id, proc);
    sched.ready.push(id);
    id
}

/// Register a freshly built process (used by exec's first call and by
/// fork) and place it on the ready list.
fn admit(mut proc: Process) -> ProcessId {
    let mut sched = SCHEDULER.lock();
    let id = sched.alloc_id();
    proc.pid = id;
    if let Some(parent_pid) = proc.parent {
        if let Some(p) = sched.processes.get_mut(&parent_pid) {
            p.children.push(id);
        }
    }
    sched.processes.insert(id, proc);
    sched.ready.push(id);
    id
}

// ───────────────────────── process/priority queries ─────────────────────────

pub fn current_pid() -> ProcessId {
    SCHEDULER.lock().current.unwrap_or(ProcessId(0))
}

/// Run `f` with mutable access to process `pid`'s record, if it still
/// exists. This is the only way outside this module to reach a
/// `Process` — see the module doc comment for why there's no per-process
/// lock to take instead.
pub fn with_process_mut<R>(pid: ProcessId, f: impl FnOnce(&mut Process) -> R) -> Option<R> {
    let mut sched = SCHEDULER.lock();
    sched.processes.get_mut(&pid).map(f)
}

/// Effective priority: `max(base, max over donors of their own effective
/// priority)`, recursively — nested donation (§4.2's "walk the chain")
/// falls out of this for free, since a donor's own effective priority
/// already reflects *its* donors. `depth` bounds the recursion at the
/// same 8 hops the donor kernel bounds its explicit chain walk to (§9).
/// While MLFQS drives priorities, donation is ignored entirely (§4.3).
pub fn effective_priority(pid: ProcessId) -> i64 {
    effective_priority_depth(pid, MAX_DONATION_DEPTH)
}

fn effective_priority_depth(pid: ProcessId, depth: u32) -> i64 {
    let sched = SCHEDULER.lock();
    let proc = match sched.processes.get(&pid) {
        Some(p) => p,
        None => return PRI_MIN,
    };
    if sched.mlfqs {
        return proc.mlfqs_priority();
    }
    let mut best = proc.base_priority;
    if depth > 0 {
        let donors = proc.donors.clone();
        drop(sched);
        for donor in donors {
            let dp = effective_priority_depth(donor, depth - 1);
            if dp > best {
                best = dp;
            }
        }
    }
    best
}

pub fn set_wait_on_lock(pid: ProcessId, lock_id: Option<usize>) {
    with_process_mut(pid, |p| p.wait_on_lock = lock_id);
}

/// Add `donor` to `owner`'s donor list (idempotent). Called from
/// `Lock::acquire` when a higher-priority thread blocks on a
/// lower-priority holder.
pub fn add_donor(owner: ProcessId, donor: ProcessId) {
    with_process_mut(owner, |p| {
        if !p.donors.contains(&donor) {
            p.donors.push(donor);
        }
    });
}

/// Remove every donor from `pid`'s list that was blocked specifically on
/// `lock_id` — called from `Lock::release`.
pub fn remove_donors_for_lock(pid: ProcessId, lock_id: usize) {
    let mut sched = SCHEDULER.lock();
    let donors = match sched.processes.get(&pid) {
        Some(proc) => proc.donors.clone(),
        None => return,
    };
    let keep: Vec<ProcessId> = donors
        .into_iter()
        .filter(|&donor| {
            sched.processes.get(&donor).and_then(|d| d.wait_on_lock) != Some(lock_id)
        })
        .collect();
    if let Some(proc) = sched.processes.get_mut(&pid) {
        proc.donors = keep;
    }
}

pub fn set_priority(pid: ProcessId, new_base: i64) {
    // Ignored while MLFQS is active — priorities are derived, not set (§4.3, §9).
    if mlfqs_enabled() {
        return;
    }
    with_process_mut(pid, |p| p.base_priority = new_base.clamp(PRI_MIN, PRI_MAX));
    preempt_if_higher_priority_than_running();
}

pub fn set_nice(pid: ProcessId, nice: i64) {
    with_process_mut(pid, |p| p.nice = nice.clamp(-20, 20));
    preempt_if_higher_priority_than_running();
}

pub fn get_nice(pid: ProcessId) -> i64 {
    with_process_mut(pid, |p| p.nice).unwrap_or(0)
}

/// Reported `recent_cpu`, scaled by 100 and rounded to nearest (§4.3).
pub fn get_recent_cpu(pid: ProcessId) -> i64 {
    with_process_mut(pid, |p| p.recent_cpu.mul_int(100).to_int_round()).unwrap_or(0)
}

/// Reported `load_avg`, scaled by 100 and rounded to nearest (§4.3).
pub fn get_load_avg() -> i64 {
    SCHEDULER.lock().load_avg.mul_int(100).to_int_round()
}

/// If the woken/raised thread `pid` now outranks whoever is running,
/// yield to it — unless we're inside an interrupt handler, in which
/// case the request is deferred to the handler's return path
/// (`poll_need_resched`), matching "preemptive at interrupt-return
/// points" (§5).
pub fn preempt_if_higher_priority(pid: ProcessId) {
    let current = current_pid();
    if effective_priority(pid) > effective_priority(current) {
        request_preempt();
    }
}

fn preempt_if_higher_priority_than_running() {
    let current = current_pid();
    let head = SCHEDULER.lock().ready.iter().copied().max_by_key(|&p| effective_priority(p));
    if let Some(head) = head {
        if effective_priority(head) > effective_priority(current) {
            request_preempt();
        }
    }
}

fn request_preempt() {
    let in_interrupt = {
        let mut sched = SCHEDULER.lock();
        if sched.interrupt_depth > 0 {
            sched.need_resched = true;
            true
        } else {
            false
        }
    };
    if !in_interrupt {
        yield_now();
    }
}

// ───────────────────────── blocking primitives ─────────────────────────

/// Block the calling thread (used by `Semaphore::down`, `Condvar::wait`).
/// The caller is responsible for having already recorded *why* it's
/// blocked (e.g. inserted itself into a waiter list) before calling this.
pub fn block_current() {
    switch(Disposition::Blocked);
}

/// Move a blocked thread back onto the ready list.
pub fn unblock(pid: ProcessId) {
    let mut sched = SCHEDULER.lock();
    if let Some(p) = sched.processes.get_mut(&pid) {
        if p.state == ProcessState::Blocked {
            p.state = ProcessState::Ready;
            sched.ready.push(pid);
        }
    }
}

/// Cooperatively yield the CPU to the next ready thread.
pub fn yield_now() {
    switch(Disposition::Ready);
}

// ───────────────────────── core scheduling ─────────────────────────

/// Pick the next pid to run: highest effective priority in `ready`, or
/// `None` if the ready list is empty (the caller falls back to idling
/// pid 0 in place).
fn pick_next(sched: &Scheduler) -> Option<ProcessId> {
    sched
        .ready
        .iter()
        .copied()
        .max_by_key(|&pid| sched_effective_priority_locked(sched, pid))
}

/// `effective_priority` without re-taking the scheduler lock (the caller
/// already holds it). Duplicates the donation walk rather than sharing
/// code with `effective_priority_depth`, since that function takes the
/// lock itself.
fn sched_effective_priority_locked(sched: &Scheduler, pid: ProcessId) -> i64 {
    fn go(sched: &Scheduler, pid: ProcessId, depth: u32) -> i64 {
        let proc = match sched.processes.get(&pid) {
            Some(p) => p,
            None => return PRI_MIN,
        };
        if sched.mlfqs {
            return proc.mlfqs_priority();
        }
        let mut best = proc.base_priority;
        if depth > 0 {
            for &donor in &proc.donors {
                let dp = go(sched, donor, depth - 1);
                if dp > best {
                    best = dp;
                }
            }
        }
        best
    }
    go(sched, pid, MAX_DONATION_DEPTH)
}

/// The single point where a context switch happens. Disables interrupts
/// for the whole transition (ready-list/sleep-list mutation must be
/// atomic w.r.t. the timer handler), stages the outgoing thread per
/// `disposition`, reaps whatever died one switch ago, picks a successor,
/// and jumps.
fn switch(disposition: Disposition) {
    x86_64::instructions::interrupts::without_interrupts(|| {
        let mut sched = SCHEDULER.lock();
        if !sched.active {
            return;
        }

        // Reap corpses from the *previous* scheduling decision — deferred
        // by exactly one switch so a Dying thread's own stack is never
        // freed while it might still be "current".
        let corpses: Vec<ProcessId> = sched.death_row.drain(..).collect();
        for pid in corpses {
            sched.processes.remove(&pid);
        }

        let outgoing = match sched.current {
            Some(pid) => pid,
            None => return,
        };

        match disposition {
            Disposition::Ready => {
                if let Some(p) = sched.processes.get_mut(&outgoing) {
                    p.state = ProcessState::Ready;
                    p.ticks_in_slice = 0;
                }
                sched.ready.push(outgoing);
            }
            Disposition::Blocked => {
                if let Some(p) = sched.processes.get_mut(&outgoing) {
                    p.state = ProcessState::Blocked;
                }
            }
            Disposition::Dying => {
                sched.death_row.push(outgoing);
            }
        }

        let next = match pick_next(&sched) {
            Some(pid) => {
                sched.ready.retain(|&p| p != pid);
                pid
            }
            None => {
                // Nothing ready: idle on pid 0 if it still exists,
                // otherwise there is truly nothing left to run.
                if sched.processes.contains_key(&ProcessId(0)) {
                    ProcessId(0)
                } else {
                    sched.current = None;
                    return;
                }
            }
        };

        if next == outgoing && !matches!(disposition, Disposition::Ready) {
            // Outgoing thread blocked/died but there's nothing else to
            // run; this only happens for pid 0 (idle) going dormant,
            // which can't happen (pid 0 never blocks or exits). Guard
            // against an infinite self-switch regardless.
            return;
        }

        if let Some(p) = sched.processes.get_mut(&next) {
            p.state = ProcessState::Running;
        }
        sched.current = Some(next);

        let next_p4 = sched.processes.get(&next).map(|p| p.page_table);
        if let Some(p4) = next_p4 {
            crate::interrupts::gdt::set_tss_rsp0(
                sched.processes.get(&next).map(stack_top_of_process).unwrap_or(0),
            );
            unsafe { core::arch::asm!("mov cr3, {0}", in(reg) p4) };
        }

        if matches!(disposition, Disposition::Dying) {
            // The outgoing thread is never resumed: jump straight into
            // the successor without saving the dying thread's context.
            let next_ctx_ptr = &sched.processes.get(&next).unwrap().context as *const Context;
            drop(sched);
            unsafe { context::restore_context(next_ctx_ptr) };
            unreachable!("restore_context does not return");
        }

        let out_ptr = sched.processes.get_mut(&outgoing).unwrap() as *mut Process;
        let next_ptr = sched.processes.get_mut(&next).unwrap() as *mut Process;
        let out_ctx_ptr = unsafe { &mut (*out_ptr).context as *mut Context };
        let next_ctx_ptr = unsafe { &(*next_ptr).context as *const Context };

        drop(sched);
        unsafe { context::switch_context(out_ctx_ptr, next_ctx_ptr) };
    });
}

fn stack_top_of_process(p: &Process) -> u64 {
    if p.kernel_stack.is_empty() {
        // pid 0: keep whatever RSP0 is already installed.
        x86_64::VirtAddr::new(0).as_u64()
    } else {
        stack_top_of(&p.kernel_stack)
    }
}

/// Park the calling thread until `wake_tick`. Used by the `sleep`
/// internal primitive (no syscall exposes it directly in this kernel,
/// but it's available to kernel code and tests the same way Pintos's
/// `timer_sleep` is).
pub fn sleep(ticks: u64) {
    let wake_at = {
        let mut sched = SCHEDULER.lock();
        let now = sched.ticks;
        let pid = sched.current.unwrap_or(ProcessId(0));
        let wake_at = now + ticks;
        if let Some(p) = sched.processes.get_mut(&pid) {
            p.wake_tick = wake_at;
        }
        let pos = sched.sleeping.partition_point(|&(_, t)| t <= wake_at);
        sched.sleeping.insert(pos, (pid, wake_at));
        wake_at
    };
    let _ = wake_at;
    block_current();
}

/// Timer-interrupt entry point: advance the tick counter, account CPU
/// time, wake sleepers, recompute MLFQS statistics on their schedule,
/// and request a preemption if the running thread has used up its slice
/// or a higher-priority thread just became ready.
pub fn thread_tick() {
    let mut sched = SCHEDULER.lock();
    if !sched.active {
        return;
    }
    sched.ticks += 1;
    let now = sched.ticks;

    if let Some(pid) = sched.current {
        if pid != ProcessId(0) {
            if sched.mlfqs {
                if let Some(p) = sched.processes.get_mut(&pid) {
                    p.recent_cpu = p.recent_cpu.add_int(1);
                }
            }
            if let Some(p) = sched.processes.get_mut(&pid) {
                p.ticks_in_slice += 1;
            }
        }
    }

    // Wake sleepers whose time has come; `sleeping` is kept sorted
    // ascending by wake tick so this can stop at the first future one.
    let mut woken = Vec::new();
    while let Some(&(pid, wake_at)) = sched.sleeping.first() {
        if wake_at > now {
            break;
        }
        sched.sleeping.remove(0);
        woken.push(pid);
    }
    for pid in &woken {
        if let Some(p) = sched.processes.get_mut(pid) {
            p.state = ProcessState::Ready;
        }
        sched.ready.push(*pid);
    }

    if sched.mlfqs {
        if now % TIMER_HZ == 0 {
            recompute_load_avg_and_recent_cpu(&mut sched);
        }
        if now % 4 == 0 {
            recompute_mlfqs_priorities(&mut sched);
        }
    }

    let slice_expired = sched
        .current
        .and_then(|pid| sched.processes.get(&pid))
        .map_or(false, |p| p.ticks_in_slice >= TIME_SLICE);
    let higher_ready = sched
        .current
        .map(|cur| {
            sched
                .ready
                .iter()
                .any(|&r| sched_effective_priority_locked(&sched, r) > sched_effective_priority_locked(&sched, cur))
        })
        .unwrap_or(false);

    if slice_expired || higher_ready {
        sched.need_resched = true;
    }
}

fn recompute_load_avg_and_recent_cpu(sched: &mut Scheduler) {
    let ready_count = sched.ready.len() as i64
        + match sched.current {
            Some(pid) if pid != ProcessId(0) => 1,
            _ => 0,
        };
    let fifty_nine_sixtieths = Fixed::from_int(59).div_int(60);
    let one_sixtieth = Fixed::from_int(1).div_int(60);
    sched.load_avg = fifty_nine_sixtieths.mul(sched.load_avg).add(one_sixtieth.mul_int(ready_count));

    let load_avg = sched.load_avg;
    let two_load_avg = load_avg.mul_int(2);
    let coeff = two_load_avg.div(two_load_avg.add_int(1));
    for proc in sched.processes.values_mut() {
        proc.recent_cpu = coeff.mul(proc.recent_cpu).add_int(proc.nice);
    }
}

fn recompute_mlfqs_priorities(sched: &mut Scheduler) {
    for proc in sched.processes.values_mut() {
        // `mlfqs_priority` reads `recent_cpu`/`nice` directly; nothing to
        // cache since `effective_priority` calls it on demand.
        let _ = proc.mlfqs_priority();
    }
}

/// Called right after an interrupt handler's body, before `iretq`:
/// perform the deferred preemption a handler requested (timer slice
/// expiry, a semaphore `up` waking a higher-priority thread) now that
/// we're no longer inside interrupt context.
pub fn poll_need_resched() {
    let should = {
        let mut sched = SCHEDULER.lock();
        let was = sched.need_resched;
        sched.need_resched = false;
        was
    };
    if should {
        yield_now();
    }
}

pub fn enter_interrupt() {
    SCHEDULER.lock().interrupt_depth += 1;
}

pub fn leave_interrupt() {
    let mut sched = SCHEDULER.lock();
    sched.interrupt_depth = sched.interrupt_depth.saturating_sub(1);
}

pub fn in_interrupt_context() -> bool {
    SCHEDULER.lock().interrupt_depth > 0
}

/// Snapshot of all processes for `ps`.
pub fn list_tasks() -> Vec<(u64, String, String)> {
    let sched = SCHEDULER.lock();
    sched
        .processes
        .values()
        .map(|p| {
            let state = match p.state {
                ProcessState::Running => "running",
                ProcessState::Ready => "ready",
                ProcessState::Blocked => "blocked",
                ProcessState::Dying => "dying",
            };
            (p.pid.0, p.name.clone(), String::from(state))
        })
        .collect()
}

// ───────────────────────── process lifecycle ─────────────────────────

/// `exit`: print the exit line, release every resource this process
/// owns, post an exit record to the parent (if it still exists), and
/// hand the CPU to the next ready thread without ever returning here
/// (§4.4).
pub fn exit_current(exit_code: i64) -> ! {
    x86_64::instructions::interrupts::without_interrupts(|| {
        let mut sched = SCHEDULER.lock();
        let pid = sched.current.expect("exit_current with no running process");
        let name = sched.processes.get(&pid).map(|p| p.name.clone()).unwrap_or_default();
        drop(sched);

        crate::println!("{}: exit({})", name, exit_code);

        with_process_mut(pid, |p| {
            // Close fds 3..OPEN_MAX; 0/1/2 go away with the rest of the
            // table when the Process itself is dropped (§4.4).
            for fd in 3..task::OPEN_MAX {
                p.fd_table[fd] = None;
            }
            p.exit_status = Some(exit_code);

            // VM teardown: unmap everything, writing back dirty
            // file-backed pages, before the address space itself is freed.
            let p4 = p.page_table;
            p.spt.teardown(p4);
            p.mmaps.clear();

            p.file_in_use = None; // releases deny-write via File::drop
        });

        let (parent, p4) = with_process_mut(pid, |p| (p.parent, p.page_table)).unwrap();

        if let Some(parent_pid) = parent {
            let mut sched = SCHEDULER.lock();
            if let Some(parent_proc) = sched.processes.get_mut(&parent_pid) {
                parent_proc.exit_records.push(ExitRecord { tid: pid, exit_code });
                parent_proc.children.retain(|&c| c != pid);
                if parent_proc.state == ProcessState::Blocked {
                    parent_proc.state = ProcessState::Ready;
                    sched.ready.push(parent_pid);
                }
            }
        }

        crate::memory::paging::destroy_address_space(p4);

        with_process_mut(pid, |p| p.state = ProcessState::Dying);
    });

    switch(Disposition::Dying);
    unreachable!("switch(Dying) never returns to the exiting thread");
}

/// `fork`: duplicate the calling process's address space and open files
/// into a brand-new child, returning the child's pid to the parent.
///
/// Simplification vs. the donor kernel: rather than spawning a child
/// thread that performs its own copy-and-signal-`fork_sema` dance (which
/// would need a blocking primitive embedded in `Process`, ruled out by
/// this kernel's single-lock design — see the module doc comment), the
/// parent performs the entire copy synchronously before the child is
/// ever admitted to the ready list. The child never observably exists in
/// a half-copied state, and the parent never blocks, which is strictly
/// stronger than the donor's guarantee. On any failure this returns
/// `TID_ERROR` directly instead of spawning a child that immediately
/// reports `exit_code = -1`.
pub fn sys_fork(frame: &TrapFrame) -> i64 {
    let pid = current_pid();

    let (parent_p4, fd_table, name) = match with_process_mut(pid, |p| {
        (p.page_table, p.fd_table.clone(), p.name.clone())
    }) {
        Some(v) => v,
        None => return TID_ERROR,
    };

    let child_p4 = match crate::memory::paging::create_address_space() {
        Some(addr) => addr,
        None => return TID_ERROR,
    };

    let mut child = new_process(&alloc::format!("{}", name), Some(pid), child_p4);
    child.fd_table = fd_table;

    // Reserve frames before touching the scheduler lock that
    // `with_process_mut`/`fork_copy` need (see `vm::frame::acquire`'s
    // doc comment on why eviction can't happen while that lock is held).
    let needed = with_process_mut(pid, |p| p.spt.realized_page_count()).unwrap_or(0);
    crate::vm::frame::ensure_free(needed);

    let ok = with_process_mut(pid, |parent| {
        crate::vm::spt::fork_copy(&parent.spt, parent_p4, &mut child.spt, ProcessId(0), child_p4);
        true
    })
    .unwrap_or(false);
    if !ok {
        crate::memory::paging::destroy_address_space(child_p4);
        return TID_ERROR;
    }

    // Child resumes via `fork_trampoline`, which pops the copied trap
    // frame, zeroes rax (the syscall-return register — "child sees
    // fork() return 0"; rax isn't part of `TrapFrame` since the syscall
    // handler never saves it), and `iretq`s straight back to the
    // instruction after the parent's `fork()` call, in userspace.
    child.fork_frame = Some(*frame);
    let kernel_stack_top = stack_top_of(&child.kernel_stack);
    let frame_ptr = (kernel_stack_top - core::mem::size_of::<TrapFrame>() as u64) as *mut TrapFrame;
    unsafe { core::ptr::write(frame_ptr, *frame) };

    child.context = Context::empty();
    child.context.rsp = frame_ptr as u64;
    child.context.rip = fork_trampoline as *const () as u64;

    let child_pid = admit(child);
    child_pid.0 as i64
}

#[unsafe(naked)]
pub extern "C" fn fork_trampoline() {
    unsafe {
        core::arch::naked_asm!(
            "pop rcx",
            "pop rbx",
            "pop rdi",
            "pop rsi",
            "pop rdx",
            "pop rbp",
            "pop r8",
            "pop r9",
            "pop r10",
            "pop r11",
            "pop r12",
            "pop r13",
            "pop r14",
            "pop r15",
            "xor eax, eax",
            "iretq",
        );
    }
}

/// `exec`: reclaim the current address space and replace it with the
/// named ELF binary. Never returns on success; on failure, returns an
/// error for the syscall dispatcher to translate into `-1` (§4.4).
pub fn sys_exec(cmdline: &str) -> Result<(), crate::loader::elf::ExecError> {
    let owned = String::from(cmdline);
    let pid = current_pid();

    let image = crate::loader::elf::load_image(&owned)?;

    x86_64::instructions::interrupts::without_interrupts(|| {
        with_process_mut(pid, |p| {
            let old_p4 = p.page_table;
            p.spt.teardown(old_p4);
            p.mmaps.clear();
            crate::memory::paging::destroy_address_space(old_p4);

            p.page_table = image.page_table;
            p.spt = image.spt;
            p.stack_bottom = image.stack_bottom;
            p.name = image.name.clone();
            p.file_in_use = Some(image.file_in_use.clone());

            let kernel_stack_top = stack_top_of(&p.kernel_stack);
            p.context = Context::new(crate::loader::elf::usermode_entry_trampoline as *const () as u64, kernel_stack_top);
            p.context.r12 = image.entry;
            p.context.r13 = image.user_rsp;
            p.context.r14 = image.argc;
            p.context.r15 = image.argv_ptr;

            crate::interrupts::gdt::set_tss_rsp0(kernel_stack_top);
            unsafe { core::arch::asm!("mov cr3, {0}", in(reg) p.page_table) };
        });

        let ctx_ptr = with_process_mut(pid, |p| &p.context as *const Context).unwrap();
        unsafe { context::restore_context(ctx_ptr) };
    });

    unreachable!("sys_exec never returns on success");
}

/// `wait`: block until `target_pid` (a direct child) has posted an exit
/// record, then consume and return it. Returns `-1` if `target_pid`
/// isn't a live or already-reaped child of the caller (§4.4).
pub fn sys_wait(target_pid: i64) -> i64 {
    let target = ProcessId(target_pid as u64);
    loop {
        let pid = current_pid();

        let (is_child, record) = with_process_mut(pid, |p| {
            let is_child = p.children.contains(&target);
            let pos = p.exit_records.iter().position(|r| r.tid == target);
            let record = pos.map(|i| p.exit_records.remove(i));
            (is_child, record)
        })
        .unwrap_or((false, None));

        if let Some(rec) = record {
            return rec.exit_code;
        }
        if !is_child {
            return -1;
        }

        block_current();
    }
}

/// Spawn the very first user process (analogous to Pintos's `init`
/// process) from the given command line. Used once at boot.
pub fn spawn_user(cmdline: &str) -> Result<ProcessId, crate::loader::elf::ExecError> {
    let image = crate::loader::elf::load_image(cmdline)?;
    let parent = Some(current_pid());
    let mut proc = new_process(&image.name.clone(), parent, image.page_table);
    proc.spt = image.spt;
    proc.stack_bottom = image.stack_bottom;
    proc.file_in_use = Some(image.file_in_use.clone());

    let kernel_stack_top = stack_top_of(&proc.kernel_stack);
    proc.context = Context::new(crate::loader::elf::usermode_entry_trampoline as *const () as u64, kernel_stack_top);
    proc.context.r12 = image.entry;
    proc.context.r13 = image.user_rsp;
    proc.context.r14 = image.argc;
    proc.context.r15 = image.argv_ptr;

    Ok(admit(proc))
}
