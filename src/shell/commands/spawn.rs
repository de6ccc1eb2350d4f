use crate::println;

/// spawn <name> — spawn a demo kernel-mode background thread via
/// `scheduler::spawn`. These share the kernel's page table rather than
/// owning a private address space, so they park forever once done
/// rather than calling `exit_current` — that path tears down its
/// caller's address space (§4.4), which here would be the shared boot
/// page table every kernel thread runs on.
pub fn run(args: &str) {
    let name = args.trim();
    if name.is_empty() {
        println!("spawn: usage: spawn <task_name>");
        println!("  Available demo tasks: counter, ticker, hello");
        return;
    }

    let id = match name {
        "counter" => crate::scheduler::spawn(task_counter, "counter"),
        "ticker" => crate::scheduler::spawn(task_ticker, "ticker"),
        "hello" => crate::scheduler::spawn(task_hello, "hello"),
        _ => { println!("spawn: unknown task '{}'", name); return; }
    };
    println!("spawn: started '{}' as pid {}", name, id.0);
}

fn park_forever() -> ! {
    loop {
        crate::scheduler::yield_now();
    }
}

/// Demo task: counts to 5, then idles.
fn task_counter() {
    for i in 1..=5 {
        crate::println!("[counter] tick {}", i);
        for _ in 0..500_000 { core::hint::spin_loop(); }
        crate::scheduler::yield_now();
    }
    crate::println!("[counter] done!");
    park_forever();
}

/// Demo task: prints 3 ticks, then idles.
fn task_ticker() {
    for _ in 0..3 {
        crate::println!("[ticker] *");
        for _ in 0..300_000 { core::hint::spin_loop(); }
        crate::scheduler::yield_now();
    }
    crate::println!("[ticker] finished.");
    park_forever();
}

/// Demo task: prints hello, then idles.
fn task_hello() {
    crate::println!("[hello] Hello from a background task!");
    park_forever();
}
