//! Exercises fork's file-descriptor duplication (§4.4): a parent opens a
//! file, forks, and the child writes through the *same* fd before the
//! parent does. Because `fork` duplicates the fd table by cloning the
//! shared file handle rather than opening a fresh one, the two writes
//! share one offset cursor — the child's bytes land first and the
//! parent's follow immediately after, as if a single writer had done
//! both in order. (No `pipe()` syscall is exposed over this kernel's
//! ABI — §6 lists the sixteen it does serve — so this is the closest
//! analogue to a pipe's shared-conduit behavior the syscall surface
//! actually supports.)
#![no_std]
#![no_main]

use atomiclibc::{close, create, entry_point, exit, fork, open, print_uint, println, read, remove, seek, wait, write};

const PATH: &[u8] = b"fdshare.tmp\0";

fn main(_argc: i64, _argv: *const *const u8) -> i32 {
    create(PATH);
    let fd = open(PATH);
    if fd < 0 {
        println!("pipe_test: open failed");
        return -1;
    }

    let pid = fork();
    if pid == 0 {
        write(fd, b"child-");
        exit(0);
    }
    if pid < 0 {
        println!("pipe_test: fork failed");
        return -1;
    }

    wait(pid);
    write(fd, b"parent");

    seek(fd, 0);
    let mut buf = [0u8; 16];
    let n = read(fd, &mut buf) as usize;
    close(fd);
    remove(PATH);

    print_uint(n as u64);
    println!();

    if n == 12 && &buf[..12] == b"child-parent" {
        println!("pipe_test: PASS");
        0
    } else {
        println!("pipe_test: FAIL");
        -1
    }
}

entry_point!(main);
