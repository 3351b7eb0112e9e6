//! Locking primitives and helpers shared across subsystems.
//!
//! The kernel has no multi-CPU scaling requirement today, but per the
//! design notes it must not be built around a single global lock: every
//! subsystem in §5 of the spec (PFA, kernel heap, each address space, each
//! wait queue, the scheduler's per-band ready queues, the syscall
//! statistics table) owns its own [`spin::Mutex`]. This module holds only
//! the cross-cutting helpers, not the locks themselves.

use core::sync::atomic::{AtomicBool, Ordering};
use x86_64::instructions::interrupts;

/// Runs `f` with interrupts disabled, restoring the prior interrupt flag on
/// exit (including on panic-driven unwind, since this is a bare guard, not
/// a raw `cli`/`sti` pair).
///
/// Every lock that may be taken from both interrupt and thread context
/// (the scheduler's ready queues, the timer-sleep queue) must be acquired
/// through this helper to avoid self-deadlock against the timer tick.
pub fn without_interrupts<F: FnOnce() -> R, R>(f: F) -> R {
    interrupts::without_interrupts(f)
}

/// A one-shot latch for subsystem bring-up: set once during boot, read
/// many times afterward. Cheaper than a `Mutex<bool>` and documents intent
/// at call sites such as "has the scheduler been initialized yet".
pub struct OnceFlag(AtomicBool);

impl OnceFlag {
    pub const fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    /// Returns `true` the first time it is called, `false` on every
    /// subsequent call.
    pub fn set(&self) -> bool {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}
