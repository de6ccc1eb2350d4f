use crate::println;

/// yield — cooperatively yield to the next ready task.
pub fn run(_args: &str) {
    let others = crate::scheduler::list_tasks().len().saturating_sub(1);
    if others == 0 {
        println!("yield: no other tasks to switch to");
    } else {
        println!("yield: switching to next task...");
        crate::scheduler::yield_now();
    }
}
