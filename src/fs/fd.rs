use alloc::sync::Arc;
use spin::Mutex;

pub enum FileType {
    Regular,
    Directory,
    Console,
}

pub struct File {
    pub file_type: FileType,
    pub path: alloc::string::String, // Only used for Regular/Directory
    pub offset: u64,
    pub readable: bool,
    pub writable: bool,
    /// Set on the file backing a running executable image; `write_file`
    /// rejects writes to its path for as long as this flag is held.
    pub deny_write: bool,
}

impl File {
    pub fn new_console() -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(File {
            file_type: FileType::Console,
            path: alloc::string::String::from("console"),
            offset: 0,
            readable: true,
            writable: true,
            deny_write: false,
        }))
    }

    pub fn new_regular(path: &str, readable: bool, writable: bool) -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(File {
            file_type: FileType::Regular,
            path: alloc::string::String::from(path),
            offset: 0,
            readable,
            writable,
            deny_write: false,
        }))
    }
}

impl Drop for File {
    fn drop(&mut self) {
        if self.deny_write {
            crate::fs::VFS.lock().allow_write(&self.path);
        }
    }
}
