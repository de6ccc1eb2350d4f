use crate::println;

/// kill <pid> — the kernel has no cross-thread termination primitive
/// (§5: "no thread can forcibly terminate another; `exit` is
/// self-only"), so this only reports whether the pid is alive.
pub fn run(args: &str) {
    let pid_str = args.trim();
    if pid_str.is_empty() {
        println!("kill: usage: kill <pid>");
        return;
    }

    let pid: u64 = match pid_str.parse() {
        Ok(v) => v,
        Err(_) => { println!("kill: invalid pid: {}", pid_str); return; }
    };

    let alive = crate::scheduler::list_tasks().iter().any(|(p, _, _)| *p == pid);
    if alive {
        println!("kill: {} is running; a process can only exit itself", pid);
    } else {
        println!("kill: no such process: {}", pid);
    }
}
