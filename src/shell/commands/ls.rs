use crate::println;
use crate::shell::state;

/// ls [dir] — list a directory's entries via the VFS, defaulting to cwd.
pub fn run(args: &str) {
    let target = args.trim();
    let path = if target.is_empty() {
        state::CWD.lock().clone()
    } else {
        state::resolve_path(target)
    };

    let vfs = crate::fs::VFS.lock();
    match vfs.readdir(&path) {
        Ok(entries) => {
            for entry in &entries {
                println!("  {}", entry.name);
            }
        }
        Err(e) => println!("ls: {}: {}", target, e),
    }
}
