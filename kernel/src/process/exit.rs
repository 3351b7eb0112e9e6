//! `exit(P, code)`, spec §4.6's terminal process transition and invariant #9
//! ("after exit(P, c), P is Zombie until reaped; reap yields exactly c").
//!
//! Grounded on the teacher's `process::exit::exit_process`: zombie every
//! thread, release resources, flip the process to Zombie, wake a blocked
//! parent. This kernel has no signal subsystem to notify beyond that wakeup
//! (spec's Non-goals exclude signals), and reparents orphaned children to
//! the kernel process rather than leaving them parentless, a decision
//! recorded in `DESIGN.md`.

use crate::process::pcb::ProcessState;
use crate::process::table;
use crate::process::thread::ThreadState;
use crate::sched::scheduler;

/// Exit code a thread is given when the kernel kills it out-of-band (e.g.
/// an unhandled page fault), per `mm::page_fault::deliver_fatal`.
pub const FAULT_EXIT_CODE: i32 = -11; // SIGSEGV-shaped, for a diagnostic that means something to a reader

/// Terminates every thread of `pid`, tears down its address space, reparents
/// its children to the kernel process, records `code` as its exit status,
/// and transitions it to Zombie. Wakes a parent blocked in `reap`/`reap_any`.
///
/// No-op if `pid` does not exist or is already past Running.
pub fn exit_process(pid: u64, code: i32) {
    let Some(already_zombie) = table::with_process(pid, |p| p.state() >= ProcessState::Zombie) else {
        return;
    };
    if already_zombie {
        return;
    }

    let tids = table::with_process(pid, |p| p.threads.lock().clone()).unwrap_or_default();
    for tid in &tids {
        scheduler::remove(*tid);
        table::with_thread_mut(*tid, |t| t.state = ThreadState::Zombie);
    }

    table::with_process(pid, |p| {
        p.exit_code.store(code, core::sync::atomic::Ordering::Release);
        if let Some(aspace) = p.address_space.lock().take() {
            aspace.destroy();
        }
    });

    reparent_children(pid);

    table::with_process(pid, |p| p.set_state(ProcessState::Zombie));
    crate::println!("[TPR] process {} exited with code {}", pid, code);

    if let Some(parent_pid) = table::with_process(pid, |p| p.parent).flatten() {
        scheduler::wake_all(reap_wait_queue(parent_pid));
    }

    // The current thread exiting itself: there is nothing left to resume
    // into, so hand control straight back to the scheduler.
    if crate::process::current_tid().is_some_and(|cur| tids.contains(&cur)) {
        scheduler::reschedule();
    }
}

/// Every parent blocks on the same wait-queue id while reaping: its own pid,
/// which doubles as a stable, collision-free wait-queue handle (spec names
/// no dedicated queue for this, so each process reuses its own pid).
pub fn reap_wait_queue(parent_pid: u64) -> u64 {
    parent_pid
}

/// Moves every child of `pid` onto the kernel process, spec §4.6's "children
/// reparented" with the target left open by the spec itself. The kernel
/// process (pid 0) always exists, so an orphan is never left unreachable to
/// a future `reap_any` the way an un-reparented orphan would be.
fn reparent_children(pid: u64) {
    let children = table::with_process(pid, |p| p.children.lock().clone()).unwrap_or_default();
    for child in &children {
        table::with_process_mut(*child, |c| c.parent = Some(crate::process::KERNEL_PID));
    }
    if !children.is_empty() {
        table::with_process(crate::process::KERNEL_PID, |k| {
            k.children.lock().extend(children.iter().copied())
        });
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;
    use crate::process::creation;
    use crate::sched::task::Priority;

    extern "C" fn noop_entry(_arg: usize) -> ! {
        loop {}
    }

    #[test]
    fn exiting_twice_is_a_no_op() {
        let pid = creation::process_create("t", Priority::Normal, 0, 0, None).unwrap();
        creation::thread_create(pid, noop_entry, 0, crate::process::thread::KERNEL_STACK_SIZE).unwrap();
        exit_process(pid, 7);
        assert_eq!(
            table::with_process(pid, |p| p.exit_code.load(core::sync::atomic::Ordering::Acquire)),
            Some(7)
        );
        exit_process(pid, 99);
        assert_eq!(
            table::with_process(pid, |p| p.exit_code.load(core::sync::atomic::Ordering::Acquire)),
            Some(7)
        );
    }

    #[test]
    fn orphaned_children_are_reparented_to_the_kernel_process() {
        let parent = creation::process_create("parent", Priority::Normal, 0, 0, None).unwrap();
        let child = creation::process_create("child", Priority::Normal, 0, 0, Some(parent)).unwrap();
        creation::thread_create(parent, noop_entry, 0, crate::process::thread::KERNEL_STACK_SIZE).unwrap();
        exit_process(parent, 0);
        assert_eq!(table::with_process(child, |c| c.parent), Some(Some(crate::process::KERNEL_PID)));
    }
}
