//! User-pointer range validation, shared by `demand_paging::copy_in`/
//! `copy_out` and the syscall dispatcher's argument checks (spec §4.4(b),
//! §6's "argument validation" stage).
//!
//! Deliberately page-granular and VMA-only: it answers "does every byte
//! in this range belong to a VMA with at least `required` permission",
//! not "is it currently resident" — residency is `demand_paging`'s job.

use crate::error::KernelError;
use crate::mm::vas::{Protection, PAGE_SIZE};
use crate::process;

/// Checks that `[addr, addr + len)` lies entirely within VMAs of `pid`'s
/// address space that each grant at least `required`. An empty range is
/// always valid. Returns the first offending address on failure.
pub fn validate_range(pid: u64, addr: u64, len: usize, required: Protection) -> Result<(), KernelError> {
    if len == 0 {
        return Ok(());
    }
    let end = addr
        .checked_add(len as u64)
        .ok_or(KernelError::Fault { addr })?;

    let ok = process::with_address_space(pid, |aspace| {
        let mut page = addr & !(PAGE_SIZE - 1);
        while page < end {
            match aspace.find(page) {
                Some(vma) if vma.prot.contains(required) => {}
                _ => return Err(KernelError::Fault { addr: page.max(addr) }),
            }
            page += PAGE_SIZE;
        }
        Ok(())
    });

    match ok {
        Some(result) => result,
        None => Err(KernelError::NoSuchProcess { pid }),
    }
}

/// Convenience check for a single null-terminated string argument, used
/// before scanning it byte-by-byte: validates only the first page so the
/// caller can read to find the terminator without over-validating an
/// unknown length up front.
pub fn validate_string_start(pid: u64, addr: u64) -> Result<(), KernelError> {
    validate_range(pid, addr, 1, Protection::READ)
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn empty_range_always_valid() {
        assert!(validate_range(1, 0x1000, 0, Protection::READ).is_ok());
    }

    #[test]
    fn unknown_process_is_rejected() {
        assert!(matches!(
            validate_range(u64::MAX, 0x1000, 8, Protection::READ),
            Err(KernelError::NoSuchProcess { .. })
        ));
    }
}
