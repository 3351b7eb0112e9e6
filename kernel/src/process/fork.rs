//! `fork`, spec §4.6's fork semantics and invariant #8 (return-value split).
//!
//! This kernel has no ELF loader or ring-3 process image to duplicate
//! verbatim through a saved trap frame — every thread is a kernel function
//! pointer plus an argument (see [`crate::process::thread::Thread`]).
//! `fork` therefore clones the address space and descriptor table exactly
//! as spec §4.6 requires, and gives the child a fresh kernel stack that
//! restarts the *same* entry function the parent thread was created with,
//! rather than resuming mid-trap. The return-value split still holds at
//! the level spec §8 tests it: the caller of `fork` (synchronously, in its
//! own control flow) gets back the child's pid, and the child thread's
//! own copy of `entry` is invoked with `arg` forced to `0`, this kernel's
//! rendering of "the child observes a zero return value."

extern crate alloc;

use crate::error::KernelError;
use crate::process::pcb::Process;
use crate::process::table;
use crate::process::thread::Thread;
use alloc::string::String;

/// Clones `parent`'s address space (CoW for private mappings, per
/// [`crate::mm::vas::AddressSpace::clone_into`]) and descriptor table
/// (shared by reference), creates one child thread that restarts the
/// parent's first thread's entry point with its argument forced to zero,
/// and enqueues it Ready. Returns the child's pid to the caller.
pub fn fork(parent_pid: u64) -> Result<u64, KernelError> {
    let name = table::with_process(parent_pid, |p| p.name.clone())
        .ok_or(KernelError::NoSuchProcess { pid: parent_pid })?;
    let priority = table::with_process(parent_pid, |p| p.base_priority)
        .ok_or(KernelError::NoSuchProcess { pid: parent_pid })?;
    let security = table::with_process(parent_pid, |p| p.security)
        .ok_or(KernelError::NoSuchProcess { pid: parent_pid })?;
    let descriptors = table::with_process(parent_pid, |p| alloc::sync::Arc::clone(&p.descriptors))
        .ok_or(KernelError::NoSuchProcess { pid: parent_pid })?;
    let first_tid = table::with_process(parent_pid, |p| p.threads.lock().first().copied())
        .ok_or(KernelError::NoSuchProcess { pid: parent_pid })?
        .ok_or(KernelError::Inval)?;
    let entry = table::with_thread(first_tid, |t| t.entry).ok_or(KernelError::NoSuchThread { tid: first_tid })?;

    let child_aspace = table::with_process(parent_pid, |p| {
        let guard = p.address_space.lock();
        let aspace = guard.as_ref().ok_or(KernelError::NoSuchProcess { pid: parent_pid })?;
        aspace.clone_into(crate::mm::kernel_root())
    })
    .ok_or(KernelError::NoSuchProcess { pid: parent_pid })??;

    let child_pid = table::alloc_pid();
    let mut child = Process::new(
        child_pid,
        Some(parent_pid),
        String::from(name.as_str()),
        priority,
        security,
        child_aspace,
    );
    // Shared by reference, not by content: parent and child see the same
    // descriptor table, per spec §4.6.
    child.descriptors = descriptors;
    table::insert_process(child);
    table::with_process(parent_pid, |p| p.children.lock().push(child_pid));

    let child_tid = table::alloc_tid();
    // `arg` forced to 0: this is the child's rendering of "fork returns 0".
    let thread = Thread::new(child_tid, child_pid, priority, entry, 0);
    table::insert_thread(thread);
    table::with_process(child_pid, |p| p.threads.lock().push(child_tid));
    crate::sched::scheduler::add(child_tid);

    crate::println!("[TPR] fork: pid {} -> child pid {}", parent_pid, child_pid);
    Ok(child_pid)
}
