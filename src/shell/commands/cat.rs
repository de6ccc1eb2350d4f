use crate::println;
use crate::shell::state;

/// cat <file> — print a file's contents via the VFS.
pub fn run(args: &str) {
    let filename = args.trim();
    if filename.is_empty() {
        println!("cat: missing filename");
        return;
    }

    let path = state::resolve_path(filename);
    let vfs = crate::fs::VFS.lock();
    let inode = match vfs.lookup(&path) {
        Ok(i) => i,
        Err(e) => {
            println!("cat: {}: {}", filename, e);
            return;
        }
    };
    if inode.file_type == crate::fs::inode::FileType::Directory {
        println!("cat: {}: {}", filename, crate::fs::error::FsError::IsADirectory);
        return;
    }

    let mut buf = alloc::vec![0u8; inode.size];
    match vfs.read_file(&path, 0, &mut buf) {
        Ok(n) => match core::str::from_utf8(&buf[..n]) {
            Ok(text) => println!("{}", text),
            Err(_) => println!("cat: {}: binary data ({} bytes)", filename, n),
        },
        Err(e) => println!("cat: {}: {}", filename, e),
    }
}
