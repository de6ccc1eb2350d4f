#![cfg_attr(not(test), no_std)]
#![feature(abi_x86_interrupt)]

extern crate alloc;

pub mod allocator;
pub mod vga;
pub mod serial;
pub mod interrupts;
pub mod memory;
pub mod sync;
pub mod scheduler;
pub mod syscalls;
pub mod vm;
pub mod loader;
pub mod fs;
pub mod drivers;
pub mod shell;

use alloc::string::String;
use core::panic::PanicInfo;

/// Boot-time option `-o mlfqs` (§6) — read out of the Multiboot2 command
/// line tag, since there is no argv on bare metal.
fn cmdline_requests_mlfqs(multiboot_info_addr: usize) -> bool {
    let boot_info = match unsafe { multiboot2::BootInformation::load(multiboot_info_addr as *const _) } {
        Ok(info) => info,
        Err(_) => return false,
    };
    let cmdline = match boot_info.command_line_tag() {
        Some(tag) => tag.cmdline().unwrap_or(""),
        None => return false,
    };
    cmdline.split_whitespace().collect::<alloc::vec::Vec<_>>().windows(2).any(|w| w == ["-o", "mlfqs"])
}

/// Entry point jumped to by the assembly boot stub once long mode and a
/// stack are up. `multiboot_info_addr` is the pointer GRUB left in `ebx`,
/// forwarded here as the first System V argument register (§2, §6).
#[no_mangle]
pub extern "C" fn _start(multiboot_info_addr: usize) -> ! {
    vga::init();
    serial::init();
    interrupts::init();
    log_info!("kernel started.");

    memory::init(multiboot_info_addr);
    log_info!("memory subsystem initialized.");

    if cmdline_requests_mlfqs(multiboot_info_addr) {
        scheduler::enable_mlfqs();
    }

    fs::init();
    scheduler::init();
    syscalls::init();
    drivers::init();

    println!("kernel is running. Type 'help' for a command list.");

    x86_64::instructions::interrupts::enable();

    run_shell();
}

/// Line-buffered console front end: accumulates keystrokes from the
/// keyboard driver's ring buffer and dispatches a whole line to
/// `shell::exec_command` on Enter (§6 — CLI test harness, freely
/// redesigned plumbing).
fn run_shell() -> ! {
    use drivers::keyboard::scancodes::KeyCode;

    let mut line = String::new();
    shell::print_prompt();
    loop {
        let key = drivers::keyboard::read_char();
        match key {
            KeyCode::Char(c) => {
                line.push(c);
                print!("{}", c);
            }
            KeyCode::Space => {
                line.push(' ');
                print!(" ");
            }
            KeyCode::Enter => {
                println!();
                shell::exec_command(&line);
                line.clear();
                shell::print_prompt();
            }
            KeyCode::Backspace => {
                if line.pop().is_some() {
                    vga::WRITER.lock().backspace();
                }
            }
            KeyCode::ArrowUp | KeyCode::ArrowDown | KeyCode::ArrowLeft | KeyCode::ArrowRight | KeyCode::F(_) | KeyCode::Unknown => {}
        }
    }
}

#[cfg(not(test))]
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    println!("{}", info);
    log_error!("{}", info);
    loop {
        x86_64::instructions::hlt();
    }
}
