//! Adapts a CPU `#PF` trap into a call to [`demand_paging::resolve_fault`],
//! and decides what to do when resolution fails: a user-mode fault that
//! can't be resolved terminates the faulting process (spec §7's
//! propagation rule — "faults in kernel code that dereference kernel
//! pointers are fatal; faults against user pointers... are recoverable");
//! `idt::page_fault_handler` already separates the two by checking the
//! error code's user/supervisor bit before deciding whether to call
//! [`deliver_fatal`] at all.

use crate::error::KernelError;
use crate::mm::demand_paging;
use crate::process;

/// The faulting access, decoded from the CPU's page-fault error code and
/// `CR2`, per spec §4.4.
#[derive(Debug, Clone, Copy)]
pub struct FaultInfo {
    pub address: u64,
    pub write: bool,
    pub present: bool,
    pub user: bool,
}

/// Resolves `fault` against the faulting thread's address space. Returns
/// `Err` for a genuine access violation or an unresolvable fault (no
/// current process, no covering VMA, wrong permission, out of memory).
pub fn handle(fault: FaultInfo) -> Result<(), KernelError> {
    let pid = process::current_pid().ok_or(KernelError::Fault { addr: fault.address })?;
    demand_paging::resolve_fault(pid, fault.address, fault.write)
}

/// Terminates the current process after an unresolvable user-mode fault.
/// Mirrors what a Unix kernel delivering `SIGSEGV` ultimately does: the
/// process becomes a zombie with a fixed fault exit code, to be reaped by
/// its parent like any other exit.
pub fn deliver_fatal(error: KernelError, fault: &FaultInfo) {
    const FAULT_EXIT_CODE: i32 = -11; // conventional SIGSEGV-style code

    crate::serial_println!(
        "[PF] fatal fault at {:#x} (write={}, user={}): {}",
        fault.address,
        fault.write,
        fault.user,
        error
    );

    if let Some(pid) = process::current_pid() {
        process::exit::exit_process(pid, FAULT_EXIT_CODE);
        crate::sched::scheduler::reschedule();
    }
}
