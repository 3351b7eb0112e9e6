//! `reap`/`find`, spec §4.6, plus `reap_any` (SPEC_FULL.md §B, "the original
//! exposes a wait that takes no specific child"). These are the only paths
//! that ever remove a process and its surviving records from [`table`].

use crate::error::KernelError;
use crate::process::pcb::ProcessState;
use crate::process::table;
use crate::sched::scheduler;

/// `find(pid) → Option<P>`: existence check, not a handle — every other
/// operation in this module re-resolves `pid` through [`table`] itself.
pub fn find(pid: u64) -> bool {
    table::process_exists(pid)
}

/// `reap(P, child) → code`: retrieves `child`'s exit code and destroys it,
/// providing `child` is `P`'s and is a Zombie. Blocks the caller (on `P`'s
/// own reap wait queue, see [`super::exit::reap_wait_queue`]) until `child`
/// becomes a Zombie if it has not yet exited.
pub fn reap(parent_pid: u64, child_pid: u64) -> Result<i32, KernelError> {
    loop {
        let is_child = table::with_process(parent_pid, |p| p.children.lock().contains(&child_pid))
            .ok_or(KernelError::NoSuchProcess { pid: parent_pid })?;
        if !is_child {
            return Err(KernelError::NoSuchProcess { pid: child_pid });
        }

        let state = table::with_process(child_pid, |c| c.state());
        match state {
            None => return Err(KernelError::NoSuchProcess { pid: child_pid }),
            Some(ProcessState::Zombie) => return Ok(terminate(parent_pid, child_pid)),
            Some(_) => {
                scheduler::block_on(super::exit::reap_wait_queue(parent_pid));
            }
        }
    }
}

/// `reap_any(P) → (pid, code)`: reaps whichever of `P`'s children is a
/// Zombie first, blocking until at least one is if none currently are.
/// Spec-supplemented per `SPEC_FULL.md`, mirroring the teacher's
/// `wait_process(pid: None)`.
pub fn reap_any(parent_pid: u64) -> Result<(u64, i32), KernelError> {
    loop {
        let children = table::with_process(parent_pid, |p| p.children.lock().clone())
            .ok_or(KernelError::NoSuchProcess { pid: parent_pid })?;
        if children.is_empty() {
            return Err(KernelError::NoSuchProcess { pid: parent_pid });
        }

        let zombie = children
            .iter()
            .copied()
            .find(|c| table::with_process(*c, |p| p.state()) == Some(ProcessState::Zombie));

        match zombie {
            Some(child_pid) => return Ok((child_pid, terminate(parent_pid, child_pid))),
            None => scheduler::block_on(super::exit::reap_wait_queue(parent_pid)),
        }
    }
}

/// Removes `child_pid` from `parent_pid`'s children list and from the
/// process table entirely, returning its recorded exit code. The thread
/// table and address space were already released by `exit::exit_process`;
/// this is solely the Zombie→Terminated transition and PCB teardown.
fn terminate(parent_pid: u64, child_pid: u64) -> i32 {
    let code = table::with_process(child_pid, |c| {
        c.exit_code.load(core::sync::atomic::Ordering::Acquire)
    })
    .unwrap_or(0);

    table::with_process(child_pid, |c| c.set_state(ProcessState::Terminated));
    table::with_process(parent_pid, |p| p.children.lock().retain(|c| *c != child_pid));

    let tids = table::with_process(child_pid, |c| c.threads.lock().clone()).unwrap_or_default();
    for tid in tids {
        table::remove_thread(tid);
    }
    table::remove_process(child_pid);

    crate::println!("[TPR] process {} reaped by {} (code {})", child_pid, parent_pid, code);
    code
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;
    use crate::process::creation;
    use crate::process::exit::exit_process;
    use crate::sched::task::Priority;

    extern "C" fn noop_entry(_arg: usize) -> ! {
        loop {}
    }

    #[test]
    fn reap_returns_the_exact_exit_code_and_terminates_the_child() {
        let parent = creation::process_create("p1", Priority::Normal, 0, 0, None).unwrap();
        let child = creation::process_create("c1", Priority::Normal, 0, 0, Some(parent)).unwrap();
        creation::thread_create(child, noop_entry, 0, crate::process::thread::KERNEL_STACK_SIZE).unwrap();
        exit_process(child, 42);
        assert_eq!(reap(parent, child), Ok(42));
        assert!(!find(child));
    }

    #[test]
    fn reap_any_picks_a_zombie_child_without_naming_it() {
        let parent = creation::process_create("p2", Priority::Normal, 0, 0, None).unwrap();
        let child_a = creation::process_create("ca", Priority::Normal, 0, 0, Some(parent)).unwrap();
        let child_b = creation::process_create("cb", Priority::Normal, 0, 0, Some(parent)).unwrap();
        creation::thread_create(child_a, noop_entry, 0, crate::process::thread::KERNEL_STACK_SIZE).unwrap();
        creation::thread_create(child_b, noop_entry, 0, crate::process::thread::KERNEL_STACK_SIZE).unwrap();
        exit_process(child_b, 5);
        let (pid, code) = reap_any(parent).unwrap();
        assert_eq!(pid, child_b);
        assert_eq!(code, 5);
        assert!(find(child_a));
    }

    #[test]
    fn reaping_a_non_child_is_rejected() {
        let parent = creation::process_create("p3", Priority::Normal, 0, 0, None).unwrap();
        let stranger = creation::process_create("s3", Priority::Normal, 0, 0, None).unwrap();
        assert!(reap(parent, stranger).is_err());
    }
}
