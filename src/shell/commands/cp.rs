use crate::println;
use super::super::state;

/// cp <src> <dst> — copy a file's contents via the VFS.
pub fn run(args: &str) {
    let parts: alloc::vec::Vec<&str> = args.trim().split_whitespace().collect();
    if parts.len() < 2 {
        println!("cp: usage: cp <source> <dest>");
        return;
    }

    let src = state::resolve_path(parts[0]);
    let dst = state::resolve_path(parts[1]);

    let mut vfs = crate::fs::VFS.lock();
    let inode = match vfs.lookup(&src) {
        Ok(i) => i,
        Err(e) => { println!("cp: '{}': {}", parts[0], e); return; }
    };
    let mut buf = alloc::vec![0u8; inode.size];
    if let Err(e) = vfs.read_file(&src, 0, &mut buf) {
        println!("cp: '{}': {}", parts[0], e);
        return;
    }

    if !vfs.exists(&dst) {
        if let Err(e) = vfs.create(&dst) {
            println!("cp: '{}': {}", parts[1], e);
            return;
        }
    }
    match vfs.write_file(&dst, &buf) {
        Ok(n) => println!("cp: copied {} bytes {} -> {}", n, parts[0], parts[1]),
        Err(e) => println!("cp: '{}': {}", parts[1], e),
    }
    drop(vfs);
    state::log_cmd(&alloc::format!("cp {} {}", parts[0], parts[1]));
}
