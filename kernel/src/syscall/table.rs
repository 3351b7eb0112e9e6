//! The immutable syscall table, spec §3's "Syscall Table Entry" (number →
//! handler, argument count, permission bit, name) and spec §6's "selected
//! core" numbering, which this kernel adopts as-is (spec §9's design note:
//! the POSIX-ish numbering is authoritative, the smaller "cleaned-up"
//! enum some original files carry is not reproduced).
//!
//! Built once as a `const` slice; [`lookup`] is a linear scan, which is
//! fine at this table's size and keeps the table itself `'static` with no
//! init-order dependency on an allocator.

use super::{info, memory, process, raeen};
use crate::error::KernelError;

pub type Handler = fn(u64, u64, u64, u64, u64, u64) -> Result<i64, KernelError>;

pub struct SyscallEntry {
    pub number: usize,
    pub name: &'static str,
    /// Spec §4.8 step 2: "if the entry requires a permission ... root
    /// bypasses all". Every entry in this table either needs root or needs
    /// nothing — per-target checks (e.g. `kill`'s "same uid or root") are
    /// the handler's own business, since the table can't see the target
    /// argument.
    pub requires_root: bool,
    pub handler: Handler,
}

macro_rules! entry {
    ($number:expr, $name:expr, $handler:path) => {
        SyscallEntry {
            number: $number,
            name: $name,
            requires_root: false,
            handler: $handler,
        }
    };
    ($number:expr, $name:expr, $handler:path, root) => {
        SyscallEntry {
            number: $number,
            name: $name,
            requires_root: true,
            handler: $handler,
        }
    };
}

static TABLE: &[SyscallEntry] = &[
    entry!(0, "read", info::sys_read),
    entry!(1, "write", info::sys_write),
    entry!(9, "mmap", memory::sys_mmap),
    entry!(11, "munmap", memory::sys_munmap),
    entry!(12, "brk", memory::sys_brk),
    entry!(39, "getpid", info::sys_getpid),
    entry!(56, "clone", process::sys_fork),
    entry!(57, "fork", process::sys_fork),
    entry!(60, "exit", process::sys_exit),
    entry!(62, "kill", process::sys_kill),
    entry!(102, "getuid", info::sys_getuid),
    entry!(1000, "raeen_game_mode", raeen::sys_game_mode),
    entry!(1001, "raeen_set_priority", raeen::sys_set_priority, root),
];

pub fn lookup(number: usize) -> Option<&'static SyscallEntry> {
    TABLE.iter().find(|e| e.number == number)
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn every_table_number_is_unique() {
        for (i, a) in TABLE.iter().enumerate() {
            for b in &TABLE[i + 1..] {
                assert_ne!(a.number, b.number, "duplicate syscall number {}", a.number);
            }
        }
    }

    #[test]
    fn set_priority_requires_root_but_game_mode_does_not() {
        assert!(lookup(1001).unwrap().requires_root);
        assert!(!lookup(1000).unwrap().requires_root);
    }

    #[test]
    fn unknown_number_misses() {
        assert!(lookup(9999).is_none());
    }
}
