//! Simplest possible user process: prints one line and exits cleanly.
//! Used by the `exec` shell command to sanity-check the ELF loader and
//! argument-passing stack layout (§4.4, §6) end to end.
#![no_std]
#![no_main]

use atomiclibc::{entry_point, println};

fn main(_argc: i64, _argv: *const *const u8) -> i32 {
    println!("hello: Hello from userland!");
    0
}

entry_point!(main);
