//! Exercises the `wait-twice` scenario (§8, scenario 3): fork a child,
//! `wait` for it once and get its real exit code back, `wait` for the
//! same pid again and get -1 — its exit record was already consumed
//! (§4.4).
#![no_std]
#![no_main]

use atomiclibc::{entry_point, exit, fork, print, print_int, println, wait};

const CHILD_EXIT_CODE: i32 = 42;

fn main(_argc: i64, _argv: *const *const u8) -> i32 {
    let pid = fork();

    if pid == 0 {
        println!("fork_wait: child running, exiting with a known code");
        exit(CHILD_EXIT_CODE);
    }

    if pid < 0 {
        println!("fork_wait: fork failed");
        return -1;
    }

    let first = wait(pid);
    print("fork_wait: first wait() = ");
    print_int(first);
    println!();

    let second = wait(pid);
    print("fork_wait: second wait() = ");
    print_int(second);
    println!();

    if first == CHILD_EXIT_CODE as i64 && second == -1 {
        println!("fork_wait: PASS");
        0
    } else {
        println!("fork_wait: FAIL");
        -1
    }
}

entry_point!(main);
