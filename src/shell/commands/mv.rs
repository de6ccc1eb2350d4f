use crate::println;
use super::super::state;

/// mv <src> <dst> — rename a file by copying its contents then unlinking
/// the source (the VFS has no native rename across mount points).
pub fn run(args: &str) {
    let parts: alloc::vec::Vec<&str> = args.trim().split_whitespace().collect();
    if parts.len() < 2 {
        println!("mv: usage: mv <source> <dest>");
        return;
    }

    let src = state::resolve_path(parts[0]);
    let dst = state::resolve_path(parts[1]);

    let mut vfs = crate::fs::VFS.lock();
    let inode = match vfs.lookup(&src) {
        Ok(i) => i,
        Err(e) => { println!("mv: '{}': {}", parts[0], e); return; }
    };
    let mut buf = alloc::vec![0u8; inode.size];
    if let Err(e) = vfs.read_file(&src, 0, &mut buf) {
        println!("mv: '{}': {}", parts[0], e);
        return;
    }

    if !vfs.exists(&dst) {
        if let Err(e) = vfs.create(&dst) {
            println!("mv: '{}': {}", parts[1], e);
            return;
        }
    }
    if let Err(e) = vfs.write_file(&dst, &buf) {
        println!("mv: '{}': {}", parts[1], e);
        return;
    }
    if let Err(e) = vfs.unlink(&src) {
        println!("mv: '{}': {}", parts[0], e);
        return;
    }
    println!("mv: {} -> {}", parts[0], parts[1]);
    drop(vfs);
    state::log_cmd(&alloc::format!("mv {} {}", parts[0], parts[1]));
}
