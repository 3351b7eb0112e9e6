//! `raeen_game_mode`/`raeen_set_priority` — numbers 1000/1001 of spec §6's
//! table, this lineage's own extension beyond the POSIX-ish core. Spec §9
//! notes several `raeen`-prefixed entry points in the original sources are
//! "banner printers" with no contract; these two are the pair that spec §4.6
//! and §8's S6 scenario actually specify behavior for, so only they are
//! implemented here.

use crate::error::KernelError;
use crate::process::table;
use crate::process::thread::ThreadState;
use crate::sched::scheduler;
use crate::sched::task::Priority;

/// `raeen_game_mode(pid, enable) → 0`. Toggles [`crate::process::pcb::GameMode`]
/// and, when it actually changed, re-homes every Ready thread of `pid` into
/// its new priority band immediately rather than waiting for its next
/// natural ready-queue transition — spec §8 S6 requires the very next
/// dispatch to already reflect the raised band.
pub fn sys_game_mode(pid: u64, enable: u64, _a3: u64, _a4: u64, _a5: u64, _a6: u64) -> Result<i64, KernelError> {
    table::require_process(pid)?;
    let changed = table::with_process(pid, |p| p.game_mode.set(enable != 0)).ok_or(KernelError::NoSuchProcess { pid })?;
    if changed {
        rehome_threads(pid);
    }
    Ok(0)
}

/// `raeen_set_priority(pid, prio) → 0`. Root-only (enforced by the table
/// entry's `requires_root`, spec §4.8 step 2); `prio` must be one of the
/// five band discriminants in spec §4.7's order (0=Critical..4=Idle).
pub fn sys_set_priority(pid: u64, prio: u64, _a3: u64, _a4: u64, _a5: u64, _a6: u64) -> Result<i64, KernelError> {
    let new_base = priority_from_u64(prio).ok_or(KernelError::Inval)?;
    table::require_process(pid)?;
    table::with_process_mut(pid, |p| p.base_priority = new_base).ok_or(KernelError::NoSuchProcess { pid })?;
    rehome_threads(pid);
    Ok(0)
}

fn priority_from_u64(v: u64) -> Option<Priority> {
    match v {
        0 => Some(Priority::Critical),
        1 => Some(Priority::High),
        2 => Some(Priority::Normal),
        3 => Some(Priority::Low),
        4 => Some(Priority::Idle),
        _ => None,
    }
}

/// Propagates `pid`'s current effective priority onto every one of its
/// threads, moving any that are currently sitting Ready into the
/// corresponding band's queue.
fn rehome_threads(pid: u64) {
    let Some(new_pri) = table::with_process(pid, |p| p.effective_priority()) else {
        return;
    };
    let tids = table::with_process(pid, |p| p.threads.lock().clone()).unwrap_or_default();
    for tid in tids {
        table::with_thread_mut(tid, |t| t.priority = new_pri);
        let is_ready = table::with_thread(tid, |t| t.state == ThreadState::Ready).unwrap_or(false);
        if is_ready {
            scheduler::remove(tid);
            scheduler::add(tid);
        }
    }
}
