use x86_64::structures::idt::{InterruptDescriptorTable, InterruptStackFrame, PageFaultErrorCode};
use x86_64::{PrivilegeLevel, VirtAddr};
use lazy_static::lazy_static;
use crate::{println, log_error, log_info, log_warn};
use super::gdt;
use super::usermode;
use pic8259::ChainedPics;
use spin::Mutex;

/// The syscall gate's interrupt vector (§6's `int 0x80` ABI).
const SYSCALL_VECTOR: usize = 0x80;

pub const PIC_1_OFFSET: u8 = 32;
pub const PIC_2_OFFSET: u8 = PIC_1_OFFSET + 8;

pub static PICS: Mutex<ChainedPics> = Mutex::new(unsafe { ChainedPics::new(PIC_1_OFFSET, PIC_2_OFFSET) });

#[derive(Debug, Clone, Copy)]
#[repr(u8)]
pub enum InterruptIndex {
    Timer = PIC_1_OFFSET,
    Keyboard = PIC_1_OFFSET + 1,
}

impl InterruptIndex {
    fn as_u8(self) -> u8 {
        self as u8
    }

    fn as_usize(self) -> usize {
        usize::from(self.as_u8())
    }
}

lazy_static! {
    static ref IDT: InterruptDescriptorTable = {
        let mut idt = InterruptDescriptorTable::new();
        idt.breakpoint.set_handler_fn(breakpoint_handler);
        unsafe {
            idt.double_fault.set_handler_fn(double_fault_handler)
                .set_stack_index(gdt::DOUBLE_FAULT_IST_INDEX);
        }
        idt.page_fault.set_handler_fn(page_fault_handler);
        idt.general_protection_fault.set_handler_fn(general_protection_fault_handler);
        idt[InterruptIndex::Timer.as_usize()]
            .set_handler_fn(timer_interrupt_handler);
        idt[InterruptIndex::Keyboard.as_usize()]
            .set_handler_fn(keyboard_interrupt_handler);
        // Ring-3-callable gate: DPL 3 so userspace's `int 0x80` doesn't
        // trip a GP fault on the privilege check (§6).
        idt[SYSCALL_VECTOR]
            .set_handler_addr(VirtAddr::new(usermode::syscall_handler_asm as u64))
            .set_privilege_level(PrivilegeLevel::Ring3);
        idt
    };
}

pub fn init() {
    IDT.load();
}

extern "x86-interrupt" fn breakpoint_handler(
    stack_frame: InterruptStackFrame)
{
    println!("EXCEPTION: BREAKPOINT\n{:#?}", stack_frame);
}

extern "x86-interrupt" fn double_fault_handler(
    stack_frame: InterruptStackFrame, _error_code: u64) -> !
{
    panic!("EXCEPTION: DOUBLE FAULT\n{:#?}", stack_frame);
}

/// Resolves a page fault against the faulting process's supplemental
/// page table (uninit transmutation, swap-in, stack growth — §4.6);
/// kills that process on a fault it can't service, rather than ever
/// blaming the kernel for a userspace program's bad pointer.
extern "x86-interrupt" fn page_fault_handler(
    stack_frame: InterruptStackFrame, error_code: PageFaultErrorCode)
{
    use x86_64::registers::control::Cr2;

    let fault_addr = Cr2::read().as_u64();

    // RPL of the interrupted code segment: 3 means the fault happened in
    // Ring 3, where `stack_frame.stack_pointer` is the live user `rsp`.
    // RPL 0 means it happened in the kernel servicing a syscall's user
    // pointer access — there the only trustworthy "user rsp" is the one
    // captured at syscall entry (see `syscalls::dispatch`), since the
    // live `rsp` now points into the kernel stack (§4.6).
    let from_user = stack_frame.code_segment & 0x3 == 3;
    let user_rsp = if from_user {
        stack_frame.stack_pointer.as_u64()
    } else {
        crate::scheduler::with_process_mut(crate::scheduler::current_pid(), |p| p.saved_user_rsp)
            .unwrap_or(0)
    };

    if crate::vm::handle_page_fault(fault_addr, user_rsp) {
        return;
    }

    if crate::scheduler::current_pid() == crate::scheduler::ProcessId(0) {
        log_error!("unrecoverable page fault in kernel context at {:#x}", fault_addr);
        log_error!("error code: {:?}\n{:#?}", error_code, stack_frame);
        panic!("page fault outside any process's address space");
    }

    log_warn!("process killed: unmapped access at {:#x} ({:?})", fault_addr, error_code);
    crate::scheduler::exit_current(-1);
}

/// Ticks the scheduler's time-slice and sleep-wakeup accounting, then
/// flushes any preemption the tick decided on before returning to
/// whichever thread is now current (§4.3, §5).
extern "x86-interrupt" fn timer_interrupt_handler(
    _stack_frame: InterruptStackFrame)
{
    unsafe {
        PICS.lock()
            .notify_end_of_interrupt(InterruptIndex::Timer.as_u8());
    }

    crate::scheduler::enter_interrupt();
    crate::scheduler::thread_tick();
    crate::scheduler::leave_interrupt();
    crate::scheduler::poll_need_resched();
}

extern "x86-interrupt" fn keyboard_interrupt_handler(
    _stack_frame: InterruptStackFrame)
{
    use x86_64::instructions::port::Port;
    let mut port: Port<u8> = Port::new(0x60);
    // Lê o scancode da porta 0x60
    let scancode = unsafe { port.read() };

    // Envia o scancode para o driver de teclado processar
    crate::drivers::keyboard::push_scancode(scancode);

    unsafe {
        PICS.lock()
            .notify_end_of_interrupt(InterruptIndex::Keyboard.as_u8());
    }
}

extern "x86-interrupt" fn general_protection_fault_handler(
    stack_frame: InterruptStackFrame, error_code: u64)
{
    panic!("EXCEPTION: GENERAL PROTECTION FAULT\nError Code: {error_code}\n{:#?}", stack_frame);
}
