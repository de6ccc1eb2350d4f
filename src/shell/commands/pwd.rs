use crate::println;

pub fn run(_args: &str) {
    println!("{}", crate::shell::state::CWD.lock());
}
