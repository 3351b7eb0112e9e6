//! Thread & Process Registry (TPR), spec §4.6.
//!
//! `pcb`/`thread` define the records; `table` is the global registry;
//! `creation`/`fork`/`exit`/`lifecycle` are the operations spec §4.6 names.
//! This module also owns the "current thread" pointer the rest of the
//! kernel (demand paging, user-pointer validation, the syscall dispatcher)
//! reads to know whose address space a user pointer belongs to.

extern crate alloc;

pub mod creation;
pub mod exit;
pub mod fork;
pub mod lifecycle;
pub mod pcb;
pub mod table;
pub mod thread;

use crate::mm::vas::AddressSpace;
use alloc::string::String;
use core::sync::atomic::{AtomicU64, Ordering};
use pcb::{Process, SecurityIdentity};

/// Reserved pid for the kernel's own process, which owns the idle thread
/// and every thread created before any user process exists.
pub const KERNEL_PID: u64 = 0;

/// 0 means "no thread running yet" (true only during early boot, before
/// `sched::scheduler::init` dispatches the idle thread for the first time).
static CURRENT_TID: AtomicU64 = AtomicU64::new(0);

pub fn current_tid() -> Option<u64> {
    match CURRENT_TID.load(Ordering::Acquire) {
        0 => None,
        tid => Some(tid),
    }
}

pub fn current_pid() -> Option<u64> {
    table::with_thread(current_tid()?, |t| t.pid)
}

/// Called exactly once per context switch, by `sched::scheduler`, right
/// after the switch that makes `tid` the running thread.
pub fn set_current_tid(tid: u64) {
    CURRENT_TID.store(tid, Ordering::Release);
}

/// Runs `f` against process `pid`'s address space, holding both the
/// process-table lock and the address space's own lock only for the
/// duration of the call. Returns `None` if `pid` does not exist or its
/// address space has already been torn down (a Zombie past `exit`).
pub fn with_address_space<R>(pid: u64, f: impl FnOnce(&mut AddressSpace) -> R) -> Option<R> {
    table::with_process(pid, |p| {
        let mut guard = p.address_space.lock();
        guard.as_mut().map(f)
    })
    .flatten()
}

/// Creates the kernel's own process (pid 0): no user mappings, root
/// privilege, shares the kernel half of every address space. Every thread
/// created before the first user process — in particular the scheduler's
/// idle thread — belongs to it.
pub fn init() -> u64 {
    let aspace =
        AddressSpace::create(crate::mm::kernel_root()).expect("failed to create kernel address space");
    let process = Process::new(
        KERNEL_PID,
        None,
        String::from("kernel"),
        crate::sched::task::Priority::Idle,
        SecurityIdentity::new(0, 0),
        aspace,
    );
    process.set_state(pcb::ProcessState::Running);
    table::insert_process(process);
    crate::println!("[TPR] kernel process (pid {}) registered", KERNEL_PID);
    KERNEL_PID
}
