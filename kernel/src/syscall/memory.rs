//! Memory-management syscalls — numbers 9, 11, 12 of spec §6's table, each
//! a thin marshalling layer over [`crate::mm::vas::AddressSpace`].

use crate::error::KernelError;
use crate::mm::vas::{MappingKind, Protection, Sharing, PAGE_SIZE};
use crate::process;

/// `mmap(hint, len, prot, flags, fd, off) → addr`. File-backed mapping is
/// out of scope (filesystem format is a spec Non-goal), so `fd` must be
/// the `-1` sentinel (`u64::MAX`) that marks an anonymous mapping;
/// anything else is `Inval`. `flags` bit 0 selects `Shared` over the
/// default `Private`.
pub fn sys_mmap(hint: u64, len: u64, prot_bits: u64, flags: u64, fd: u64, _off: u64) -> Result<i64, KernelError> {
    if fd != u64::MAX {
        return Err(KernelError::Inval);
    }
    let prot = Protection::from_bits_truncate(prot_bits as u8);
    let sharing = if flags & 0x1 != 0 { Sharing::Shared } else { Sharing::Private };
    let hint = if hint == 0 { None } else { Some(hint) };

    let pid = process::current_pid().ok_or(KernelError::NoSuchProcess { pid: 0 })?;
    let addr = process::with_address_space(pid, |aspace| {
        aspace.map(hint, len, prot, sharing, MappingKind::Anonymous)
    })
    .ok_or(KernelError::NoSuchProcess { pid })??;
    Ok(addr as i64)
}

/// `munmap(addr, len) → 0`.
pub fn sys_munmap(addr: u64, len: u64, _a3: u64, _a4: u64, _a5: u64, _a6: u64) -> Result<i64, KernelError> {
    let pid = process::current_pid().ok_or(KernelError::NoSuchProcess { pid: 0 })?;
    process::with_address_space(pid, |aspace| aspace.unmap(addr, len))
        .ok_or(KernelError::NoSuchProcess { pid })??;
    Ok(0)
}

/// `brk(addr) → new heap_end`. `addr == 0` queries the current break
/// without changing it. Growing installs a fresh RW anonymous `Heap` VMA
/// over the new range (demand-paged like any other anonymous mapping,
/// per spec §4.4); shrinking unmaps the freed range outright. `addr` is
/// rounded up to a page boundary, matching the table's "new heap_end" as
/// the value actually installed.
pub fn sys_brk(addr: u64, _a2: u64, _a3: u64, _a4: u64, _a5: u64, _a6: u64) -> Result<i64, KernelError> {
    let pid = process::current_pid().ok_or(KernelError::NoSuchProcess { pid: 0 })?;

    let result = process::with_address_space(pid, |aspace| -> Result<u64, KernelError> {
        let current = aspace.heap_end();
        if addr == 0 {
            return Ok(current);
        }
        let new_end = (addr + PAGE_SIZE - 1) & !(PAGE_SIZE - 1);
        if new_end == current {
            return Ok(current);
        }
        if new_end > current {
            aspace.map_fixed(current, new_end - current, Protection::RW, Sharing::Private, MappingKind::Heap)?;
        } else {
            aspace.unmap(new_end, current - new_end)?;
        }
        aspace.set_heap_end(new_end);
        Ok(new_end)
    })
    .ok_or(KernelError::NoSuchProcess { pid })?;

    result.map(|v| v as i64)
}
