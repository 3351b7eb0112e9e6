//! Basic read/write/identity syscalls — numbers 0, 1, 39, 102 of spec §6's
//! table. None of these name a subsystem module of their own in spec §2;
//! grouped here as the calls that report or move a small amount of state
//! rather than change the caller's process/memory layout.
//!
//! This kernel has no character-device or filesystem layer (both explicit
//! spec Non-goals), so `read`/`write` are scoped to the three descriptors
//! every process starts with (0/1/2): `write` renders to the serial
//! console tests assert against, `read` reports end-of-stream since there
//! is no input device to source bytes from.

extern crate alloc;

use crate::error::KernelError;
use crate::mm::demand_paging;
use crate::process;
use alloc::vec;

const COPY_CHUNK: usize = 256;

fn fd_is_known(pid: u64, fd: u64) -> bool {
    let fd = fd as i32;
    process::table::with_process(pid, |p| p.descriptors.lock().contains(&fd)).unwrap_or(false)
}

/// `read(fd, buf*, len) → bytes read`. Only fd 0 (stdin) is recognized;
/// since there is no keyboard driver behind it (spec Non-goal), every read
/// reports immediate end-of-stream rather than blocking forever.
pub fn sys_read(fd: u64, _buf: u64, _len: u64, _a4: u64, _a5: u64, _a6: u64) -> Result<i64, KernelError> {
    let pid = process::current_pid().ok_or(KernelError::NoSuchProcess { pid: 0 })?;
    if fd != 0 || !fd_is_known(pid, fd) {
        return Err(KernelError::Inval);
    }
    Ok(0)
}

/// `write(fd, buf*, len) → bytes written`. fd 1/2 (stdout/stderr) are
/// rendered to the serial console; any other fd is `Inval` (this kernel's
/// rendering of the table's `BadFd`, per spec §7's taxonomy, which has no
/// dedicated "bad descriptor" kind).
pub fn sys_write(fd: u64, buf: u64, len: u64, _a4: u64, _a5: u64, _a6: u64) -> Result<i64, KernelError> {
    let pid = process::current_pid().ok_or(KernelError::NoSuchProcess { pid: 0 })?;
    if (fd != 1 && fd != 2) || !fd_is_known(pid, fd) {
        return Err(KernelError::Inval);
    }

    let len = len as usize;
    let mut chunk = vec![0u8; COPY_CHUNK.min(len.max(1))];
    let mut done = 0usize;
    while done < len {
        let take = core::cmp::min(chunk.len(), len - done);
        demand_paging::copy_in(&mut chunk, buf + done as u64, take)?;
        if let Ok(s) = core::str::from_utf8(&chunk[..take]) {
            crate::serial_print!("{}", s);
        }
        done += take;
    }
    Ok(len as i64)
}

/// `getpid() → pid`.
pub fn sys_getpid(_a1: u64, _a2: u64, _a3: u64, _a4: u64, _a5: u64, _a6: u64) -> Result<i64, KernelError> {
    process::current_pid()
        .map(|pid| pid as i64)
        .ok_or(KernelError::NoSuchProcess { pid: 0 })
}

/// `getuid() → uid`.
pub fn sys_getuid(_a1: u64, _a2: u64, _a3: u64, _a4: u64, _a5: u64, _a6: u64) -> Result<i64, KernelError> {
    let pid = process::current_pid().ok_or(KernelError::NoSuchProcess { pid: 0 })?;
    process::table::with_process(pid, |p| p.security.uid as i64).ok_or(KernelError::NoSuchProcess { pid })
}
