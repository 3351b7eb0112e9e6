//! Process-lifecycle syscalls — numbers 56/57, 60, 62 of spec §6's table.

use crate::error::KernelError;
use crate::process::{self, exit, fork, table};

/// `clone`/`fork() → child pid (parent), 0 (child)`. The return-value split
/// itself is `fork::fork`'s contract (invariant #8); this handler is only
/// the syscall-number plumbing spec §6 lists both 56 and 57 under.
pub fn sys_fork(_a1: u64, _a2: u64, _a3: u64, _a4: u64, _a5: u64, _a6: u64) -> Result<i64, KernelError> {
    let pid = process::current_pid().ok_or(KernelError::NoSuchProcess { pid: 0 })?;
    let child_pid = fork::fork(pid)?;
    Ok(child_pid as i64)
}

/// `exit(code)`: no return in the syscall table's own terms, since
/// [`exit::exit_process`] reschedules away from the calling thread; this
/// handler's `Ok(0)` is only ever observed if `exit_process` finds nothing
/// to reschedule into (already-exited caller), which cannot happen through
/// this trap path.
pub fn sys_exit(code: u64, _a2: u64, _a3: u64, _a4: u64, _a5: u64, _a6: u64) -> Result<i64, KernelError> {
    let pid = process::current_pid().ok_or(KernelError::NoSuchProcess { pid: 0 })?;
    exit::exit_process(pid, code as i32);
    Ok(0)
}

/// `kill(pid, sig) → 0`. No signal-delivery subsystem exists (out of scope
/// per spec §1's framing of "what an implementer must reproduce"); `kill`
/// terminates the target directly, the signal number surfacing only in its
/// negated exit code, the conventional Unix "killed by signal N" encoding.
/// Requires root or matching uid, per spec §6's `Perm` error.
pub fn sys_kill(target_pid: u64, sig: u64, _a3: u64, _a4: u64, _a5: u64, _a6: u64) -> Result<i64, KernelError> {
    let caller_pid = process::current_pid().ok_or(KernelError::NoSuchProcess { pid: 0 })?;
    table::require_process(target_pid)?;

    let caller = table::with_process(caller_pid, |p| p.security).ok_or(KernelError::NoSuchProcess { pid: caller_pid })?;
    let target_uid = table::with_process(target_pid, |p| p.security.uid).ok_or(KernelError::NoSuchProcess { pid: target_pid })?;
    if !caller.is_root() && caller.uid != target_uid {
        return Err(KernelError::Perm);
    }

    exit::exit_process(target_pid, (sig as i32).wrapping_neg());
    Ok(0)
}
