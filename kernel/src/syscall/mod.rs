//! Syscall Dispatcher (SD), spec §4.8.
//!
//! `table` holds the immutable syscall table (handler, permission bit,
//! name) from spec §3's "Syscall Table Entry" and §6's numbering;
//! `process`/`memory`/`info`/`raeen` hold the handlers themselves, split by
//! the subsystem each ultimately calls into. [`dispatch`] is spec §4.8's
//! six steps, the only place a raw trap becomes a call into the rest of
//! the kernel, and the only place allowed to read a user pointer (via
//! `mm::demand_paging::copy_in`/`copy_out`, never directly).

pub mod info;
pub mod memory;
pub mod process;
pub mod raeen;
pub mod table;

extern crate alloc;

use crate::error::KernelError;
use crate::process::table as proc_table;
use alloc::collections::BTreeMap;
use core::sync::atomic::Ordering;
use spin::Mutex;

/// Running count/min/max/total for one syscall number, at `timer::now_ms`'s
/// 1 ms resolution, per spec §4.8 step 5 ("record per-call statistics").
/// Guarded by its own lock, per spec §5's "the syscall statistics table is
/// guarded by its own lock" — first in the lock order, so nothing else is
/// ever held while this one is taken.
#[derive(Debug, Default, Clone, Copy)]
pub struct CallStats {
    pub count: u64,
    total_ms: u64,
    pub min_ms: u64,
    pub max_ms: u64,
}

impl CallStats {
    fn record(&mut self, elapsed_ms: u64) {
        if self.count == 0 {
            self.min_ms = elapsed_ms;
        } else {
            self.min_ms = self.min_ms.min(elapsed_ms);
        }
        self.max_ms = self.max_ms.max(elapsed_ms);
        self.total_ms += elapsed_ms;
        self.count += 1;
    }

    pub fn avg_ms(&self) -> u64 {
        if self.count == 0 {
            0
        } else {
            self.total_ms / self.count
        }
    }
}

static STATS: Mutex<BTreeMap<usize, CallStats>> = Mutex::new(BTreeMap::new());

/// Snapshot of a syscall number's accumulated statistics, for the
/// `raeen_*` info surface and for tests.
pub fn stats_for(number: usize) -> Option<CallStats> {
    STATS.lock().get(&number).copied()
}

/// The six-argument trap entry every arch-layer trampoline calls into.
/// Implements spec §4.8's six steps and returns the value the caller's
/// result register is set to: non-negative on success, a negative
/// [`KernelError::to_errno`] encoding on failure.
pub fn dispatch(number: u64, a1: u64, a2: u64, a3: u64, a4: u64, a5: u64, a6: u64) -> isize {
    let result = dispatch_inner(number, a1, a2, a3, a4, a5, a6);

    if let Some(tid) = crate::process::current_tid() {
        proc_table::with_thread(tid, |t| t.stats.syscalls.fetch_add(1, Ordering::Relaxed));
    }

    match result {
        Ok(value) => value as isize,
        Err(e) => e.to_errno(),
    }
}

fn dispatch_inner(number: u64, a1: u64, a2: u64, a3: u64, a4: u64, a5: u64, a6: u64) -> Result<i64, KernelError> {
    let number = number as usize;
    let entry = table::lookup(number).ok_or(KernelError::NoSuchCall { number })?;

    if entry.requires_root {
        let pid = crate::process::current_pid().ok_or(KernelError::Perm)?;
        let is_root = proc_table::with_process(pid, |p| p.security.is_root()).unwrap_or(false);
        if !is_root {
            return Err(KernelError::Perm);
        }
    }

    let started = crate::timer::now_ms();
    let result = (entry.handler)(a1, a2, a3, a4, a5, a6);
    let elapsed = crate::timer::now_ms().saturating_sub(started);
    STATS.lock().entry(number).or_default().record(elapsed);

    result
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn unknown_syscall_number_is_rejected() {
        assert_eq!(dispatch(u64::MAX, 0, 0, 0, 0, 0, 0), KernelError::NoSuchCall { number: 0 }.to_errno());
    }

    #[test]
    fn stats_accumulate_across_calls() {
        let before = stats_for(39).map(|s| s.count).unwrap_or(0);
        dispatch(39, 0, 0, 0, 0, 0, 0);
        dispatch(39, 0, 0, 0, 0, 0, 0);
        let after = stats_for(39).unwrap().count;
        assert_eq!(after, before + 2);
    }
}
