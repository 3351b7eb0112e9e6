//! Global process and thread tables, spec §4.6's "registry" half of TPR.
//!
//! Each table is one `BTreeMap` behind one `spin::Mutex`, per spec §5's
//! per-resource-lock discipline (no single big kernel lock) and the design
//! notes' "intrusive lists... rewrite as owned collections indexed by
//! identifiers."

extern crate alloc;

use crate::error::KernelError;
use crate::process::pcb::Process;
use crate::process::thread::Thread;
use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use core::sync::atomic::{AtomicU64, Ordering};
use lazy_static::lazy_static;
use spin::Mutex;

lazy_static! {
    static ref PROCESSES: Mutex<BTreeMap<u64, Box<Process>>> = Mutex::new(BTreeMap::new());
    static ref THREADS: Mutex<BTreeMap<u64, Box<Thread>>> = Mutex::new(BTreeMap::new());
}

static NEXT_PID: AtomicU64 = AtomicU64::new(1);
static NEXT_TID: AtomicU64 = AtomicU64::new(1);

pub fn alloc_pid() -> u64 {
    NEXT_PID.fetch_add(1, Ordering::Relaxed)
}

pub fn alloc_tid() -> u64 {
    NEXT_TID.fetch_add(1, Ordering::Relaxed)
}

pub fn insert_process(process: Process) -> u64 {
    let pid = process.pid;
    PROCESSES.lock().insert(pid, Box::new(process));
    pid
}

pub fn remove_process(pid: u64) -> Option<Box<Process>> {
    PROCESSES.lock().remove(&pid)
}

pub fn process_exists(pid: u64) -> bool {
    PROCESSES.lock().contains_key(&pid)
}

/// Runs `f` against the process `pid`, holding the table lock only for the
/// duration of the call. Returns `None` if no such process exists.
pub fn with_process<R>(pid: u64, f: impl FnOnce(&Process) -> R) -> Option<R> {
    PROCESSES.lock().get(&pid).map(|p| f(p))
}

/// As [`with_process`], but with mutable access — for the handful of PCB
/// fields with no interior mutability of their own (`parent`, `base_priority`).
pub fn with_process_mut<R>(pid: u64, f: impl FnOnce(&mut Process) -> R) -> Option<R> {
    PROCESSES.lock().get_mut(&pid).map(|p| f(p))
}

/// Returns a raw pointer to the process `pid`'s boxed storage without
/// holding the table lock past this call.
///
/// # Safety
/// The returned pointer is valid only until the process is removed from
/// the table via [`remove_process`]; callers must not retain it across a
/// point where that could happen (e.g. across a suspension point).
pub unsafe fn process_ptr(pid: u64) -> Option<*const Process> {
    PROCESSES.lock().get(&pid).map(|p| p.as_ref() as *const Process)
}

pub fn all_pids() -> alloc::vec::Vec<u64> {
    PROCESSES.lock().keys().copied().collect()
}

pub fn insert_thread(thread: Thread) -> u64 {
    let tid = thread.tid;
    THREADS.lock().insert(tid, Box::new(thread));
    tid
}

pub fn remove_thread(tid: u64) -> Option<Box<Thread>> {
    THREADS.lock().remove(&tid)
}

pub fn with_thread<R>(tid: u64, f: impl FnOnce(&Thread) -> R) -> Option<R> {
    THREADS.lock().get(&tid).map(|t| f(t))
}

pub fn with_thread_mut<R>(tid: u64, f: impl FnOnce(&mut Thread) -> R) -> Option<R> {
    THREADS.lock().get_mut(&tid).map(|t| f(t))
}

/// Returns a raw mutable pointer to thread `tid`'s boxed storage without
/// holding the table lock past this call, so the scheduler can drive a
/// context switch through it without deadlocking against the thread it is
/// switching into (which may itself need the table lock once running).
///
/// # Safety
/// Valid only until `tid` is removed from the table; the scheduler upholds
/// this by never removing a thread that is currently selected to run.
pub unsafe fn thread_ptr(tid: u64) -> Option<*mut Thread> {
    THREADS.lock().get_mut(&tid).map(|t| t.as_mut() as *mut Thread)
}

pub fn thread_exists(tid: u64) -> bool {
    THREADS.lock().contains_key(&tid)
}

pub fn require_process(pid: u64) -> Result<(), KernelError> {
    if process_exists(pid) {
        Ok(())
    } else {
        Err(KernelError::NoSuchProcess { pid })
    }
}

pub fn require_thread(tid: u64) -> Result<(), KernelError> {
    if thread_exists(tid) {
        Ok(())
    } else {
        Err(KernelError::NoSuchThread { tid })
    }
}
