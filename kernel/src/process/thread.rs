//! Thread control block, spec §3/§4.6.

use crate::arch::x86_64::context::TaskContext;
use crate::sched::task::Priority;
use core::sync::atomic::{AtomicU64, Ordering};

extern crate alloc;
use alloc::vec::Vec;

/// `New → Ready → Running ⇄ Blocked/Sleeping → Ready → … → Zombie →
/// Terminated`, one state machine per thread; a process is Zombie iff
/// every thread it owns is Zombie or later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    New,
    Ready,
    Running,
    Blocked,
    Sleeping,
    Zombie,
    Terminated,
}

/// Per-thread accounting, spec §3's "per-thread accounting" attribute.
#[derive(Debug, Default)]
pub struct ThreadStats {
    pub runtime_ms: AtomicU64,
    pub context_switches: AtomicU64,
    pub syscalls: AtomicU64,
}

/// A kernel thread. Owns its kernel stack outright; the entry point and
/// argument are retained (not just consumed at creation) so [`super::fork`]
/// can give a child thread a fresh stack that starts the same top-level
/// function, since this kernel has no ELF loader to re-enter a saved user
/// trap frame through.
pub struct Thread {
    pub tid: u64,
    pub pid: u64,
    pub state: ThreadState,
    pub priority: Priority,
    pub context: TaskContext,
    /// Backing storage for the kernel stack; `context.rsp` always points
    /// somewhere inside this allocation (or, before the first run, to the
    /// synthetic frame [`TaskContext::new`] built atop it).
    pub kernel_stack: Vec<u8>,
    pub entry: extern "C" fn(usize) -> !,
    pub entry_arg: usize,
    /// Milliseconds left in the current time slice; reloaded from
    /// `priority.time_slice_ms()` on every dispatch.
    pub time_slice_remaining: u32,
    /// Absolute tick deadline, set by `sched::scheduler::sleep`.
    pub wake_deadline: Option<u64>,
    /// Id of the wait queue this thread is blocked on, if any.
    pub wait_queue: Option<u64>,
    /// Bitmap of CPUs this thread may run on; always `0b1` on this
    /// single-CPU kernel, retained for the attribute's own sake.
    pub affinity: u64,
    pub stats: ThreadStats,
}

pub const KERNEL_STACK_SIZE: usize = 64 * 1024;

impl Thread {
    /// Builds a never-yet-run thread with a freshly allocated kernel
    /// stack; `entry` will first execute with `arg` in its only argument.
    pub fn new(tid: u64, pid: u64, priority: Priority, entry: extern "C" fn(usize) -> !, arg: usize) -> Self {
        let mut kernel_stack = alloc::vec![0u8; KERNEL_STACK_SIZE];
        let stack_top = (kernel_stack.as_mut_ptr() as u64 + KERNEL_STACK_SIZE as u64) & !0xf;
        let context = TaskContext::new(stack_top, entry, arg);
        Self {
            tid,
            pid,
            state: ThreadState::New,
            priority,
            context,
            kernel_stack,
            entry,
            entry_arg: arg,
            time_slice_remaining: priority.time_slice_ms(),
            wake_deadline: None,
            wait_queue: None,
            affinity: 0b1,
            stats: ThreadStats::default(),
        }
    }

    pub fn reload_time_slice(&mut self) {
        self.time_slice_remaining = self.priority.time_slice_ms();
    }
}

// SAFETY: a `Thread` is only ever reachable through the table's lock, or
// through a raw pointer the scheduler takes after looking it up there and
// promises not to alias mutably across threads; see `process::table`.
unsafe impl Send for Thread {}
