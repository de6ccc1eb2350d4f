/// Usermode support — int 0x80 syscall handler and Ring 3 transition.

use core::arch::naked_asm;
use core::sync::atomic::{AtomicU64, Ordering};

use crate::scheduler::TrapFrame;

/// Trap frame pointer of the syscall currently being serviced. Single-CPU
/// kernel (§5), so one slot is all the concurrency this needs — it's
/// read by `sys_fork` (to copy the frame into the child) and by the
/// page-fault handler (to pull `saved_user_rsp` when a fault happens on
/// the kernel side of a syscall, not from the live `rsp`). Stashing it
/// here rather than threading it through as a sixth `dispatch` argument
/// keeps a full syscall argument register free for `r8`/arg4.
static CURRENT_TRAP_FRAME: AtomicU64 = AtomicU64::new(0);

/// The trap frame of the syscall presently executing, or null outside
/// of one.
pub fn current_trap_frame() -> *const TrapFrame {
    CURRENT_TRAP_FRAME.load(Ordering::Acquire) as *const TrapFrame
}

/// The int 0x80 handler — entered from Ring 3.
/// Saves user registers, calls the Rust syscall dispatcher, restores and
/// `iretq`s back.
///
/// Convention (§6): RAX=number, RDI=arg0, RSI=arg1, RDX=arg2, R10=arg3,
/// R8=arg4. Result in RAX.
#[unsafe(naked)]
pub extern "C" fn syscall_handler_asm() {
    naked_asm!(
        // Save all general-purpose registers
        "push r15",
        "push r14",
        "push r13",
        "push r12",
        "push r11",
        "push r10",
        "push r9",
        "push r8",
        "push rbp",
        "push rdx",
        "push rsi",
        "push rdi",
        "push rbx",
        "push rcx",

        // rsp now points exactly at the lowest address of the 152-byte
        // region [14 saved GP regs][hardware iretq frame] — the
        // `TrapFrame` the process lifecycle layer needs for fork() and
        // for the saved-user-rsp stack-growth check. Record it before
        // the alignment pad below disturbs rsp.
        "mov r11, rsp",
        "mov [rip + {tf_slot}], r11",

        // Align the stack strictly to 16 bytes as required by the
        // System V AMD64 ABI: the CPU pushes 5 qwords (40 bytes), we
        // push 14 qwords (112 bytes) = 152 bytes total, 8 bytes short of
        // 16-aligned.
        "sub rsp, 8",

        // Call dispatch(number, arg0, arg1, arg2, arg3, arg4), filling
        // the System V integer argument registers rdi,rsi,rdx,rcx,r8,r9
        // from the user's rax,rdi,rsi,rdx,r10,r8 — in an order where
        // each line's source is read before any later line overwrites
        // it.
        "mov r9, r8",     // arg4 (user r8) → r9 (6th param)
        "mov r8, r10",    // arg3 (user r10) → r8 (5th param)
        "mov rcx, rdx",   // arg2 (user rdx) → rcx (4th param)
        "mov rdx, rsi",   // arg1 (user rsi) → rdx (3rd param)
        "mov rsi, rdi",   // arg0 (user rdi) → rsi (2nd param)
        "mov rdi, rax",   // number (user rax) → rdi (1st param)
        "call {dispatch}",

        // Un-align stack before resuming the pop sequence.
        "add rsp, 8",

        // Return value is in RAX — restored to the user's RAX by virtue
        // of never being pushed/popped here.

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

        "iretq",
        dispatch = sym crate::syscalls::dispatch,
        tf_slot = sym CURRENT_TRAP_FRAME,
    );
}

/// Jump to Ring 3 and execute user code.
/// Pushes the iretq frame: SS, RSP, RFLAGS, CS, RIP.
pub fn jump_to_usermode(entry: u64, user_stack_top: u64, user_cs: u16, user_ss: u16) {
    unsafe {
        core::arch::asm!(
            "cli",                  // Disable interrupts during transition
            "push rax",             // SS (user data segment)
            "push rcx",             // RSP (user stack)
            "pushfq",               // RFLAGS — will set IF below
            "pop r11",
            "or r11, 0x200",        // Set IF (interrupt enable)
            "push r11",
            "push rdx",             // CS (user code segment)
            "push rdi",             // RIP (entry point)
            "iretq",
            in("rdi") entry,
            in("rcx") user_stack_top,
            in("rdx") user_cs as u64,
            in("rax") user_ss as u64,
            options(noreturn),
        );
    }
}

/// Same transition, but also loads `argc`/`argv` into `rdi`/`rsi` — the
/// System V calling convention a freshly `exec`'d `main(argc, argv)`
/// expects its very first two arguments in.
pub fn jump_to_usermode_with_args(entry: u64, user_stack_top: u64, user_cs: u16, user_ss: u16, argc: u64, argv: u64) {
    unsafe {
        core::arch::asm!(
            "cli",
            "push rax",             // SS
            "push r8",              // RSP
            "pushfq",
            "pop r11",
            "or r11, 0x200",
            "push r11",             // RFLAGS
            "push r9",              // CS
            "push r10",             // RIP
            "mov rdi, r12",         // argc (first user arg)
            "mov rsi, r13",         // argv (second user arg)
            "iretq",
            in("r10") entry,
            in("r8") user_stack_top,
            in("r9") user_cs as u64,
            in("rax") user_ss as u64,
            in("r12") argc,
            in("r13") argv,
            options(noreturn),
        );
    }
}
