//! RAII guards over the kernel's manually-managed resources.
//!
//! Frames, mapped regions, and scoped cleanups are acquired explicitly and
//! released on `Drop` rather than by remembering to call a matching
//! `free`/`unmap` at every exit path, including the panic/error ones.

extern crate alloc;

use crate::mm::frame_allocator::{self, FrameNumber};
use crate::println;

/// Owns exactly one physical frame; frees it when dropped.
///
/// Used for frames allocated for a purpose that is abandoned before being
/// installed into a page table (e.g. a table-level frame allocated then
/// made unnecessary by a concurrent mapping).
pub struct FrameGuard {
    frame: Option<FrameNumber>,
}

impl FrameGuard {
    pub fn new(frame: FrameNumber) -> Self {
        Self { frame: Some(frame) }
    }

    /// Hands the frame to the caller permanently; the guard no longer frees it.
    pub fn take(mut self) -> FrameNumber {
        self.frame.take().expect("FrameGuard::take called twice")
    }

    pub fn frame(&self) -> FrameNumber {
        self.frame.expect("FrameGuard used after take")
    }
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        if let Some(frame) = self.frame.take() {
            frame_allocator::free(frame);
            println!("[RAII] released frame {:?} via FrameGuard", frame);
        }
    }
}

/// Owns a contiguous run of physical frames allocated as a batch.
pub struct FramesGuard {
    frames: alloc::vec::Vec<FrameNumber>,
}

impl FramesGuard {
    pub fn new(frames: alloc::vec::Vec<FrameNumber>) -> Self {
        Self { frames }
    }

    pub fn take(mut self) -> alloc::vec::Vec<FrameNumber> {
        core::mem::take(&mut self.frames)
    }
}

impl Drop for FramesGuard {
    fn drop(&mut self) {
        for frame in self.frames.drain(..) {
            frame_allocator::free(frame);
        }
    }
}

/// Runs a closure when dropped, unless [`ScopeGuard::cancel`] was called.
///
/// Mirrors `scopeguard`-style cleanup without a crate dependency: used for
/// one-off rollback paths (e.g. unwinding a partially built address space
/// on an error return).
pub struct ScopeGuard<F: FnOnce()> {
    cleanup: Option<F>,
}

impl<F: FnOnce()> ScopeGuard<F> {
    pub fn new(cleanup: F) -> Self {
        Self {
            cleanup: Some(cleanup),
        }
    }

    /// Disarms the guard; its closure will not run on drop.
    pub fn cancel(mut self) {
        self.cleanup = None;
    }
}

impl<F: FnOnce()> Drop for ScopeGuard<F> {
    fn drop(&mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            cleanup();
        }
    }
}

/// Builds a [`ScopeGuard`] that runs `$body` unless cancelled.
#[macro_export]
macro_rules! defer {
    ($($body:tt)*) => {
        let _guard = $crate::raii::ScopeGuard::new(|| { $($body)* });
    };
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_scope_guard_runs_on_drop() {
        static COUNTER: AtomicUsize = AtomicUsize::new(0);
        {
            let _guard = ScopeGuard::new(|| {
                COUNTER.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(COUNTER.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_scope_guard_cancel_suppresses_cleanup() {
        static COUNTER: AtomicUsize = AtomicUsize::new(0);
        {
            let guard = ScopeGuard::new(|| {
                COUNTER.fetch_add(1, Ordering::SeqCst);
            });
            guard.cancel();
        }
        assert_eq!(COUNTER.load(Ordering::SeqCst), 0);
    }
}
