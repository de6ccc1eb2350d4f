use crate::println;

/// exec <path> [args...] — load an ELF64 binary and admit it as a new
/// user process (a shell-level spawn, not the `exec` syscall, which
/// replaces the calling process's own address space — §4.4).
pub fn run(args: &str) {
    let cmdline = args.trim();
    if cmdline.is_empty() {
        println!("exec: usage: exec <path> [args...]");
        return;
    }

    match crate::scheduler::spawn_user(cmdline) {
        Ok(pid) => println!("exec: started '{}' as pid {}", cmdline, pid.0),
        Err(e) => println!("exec: {}: {}", cmdline, e),
    }
}
