//! Physical Frame Allocator (PFA).
//!
//! Hands out and reclaims 4 KiB physical frames. Per spec §4.1 this is
//! deliberately a simple doubly-linked free list behind one spinlock, not
//! the NUMA/buddy/per-CPU-cache machinery a multi-socket server kernel
//! would want — `alloc`/`free` are both O(1).

use crate::error::FrameAllocatorError;
use spin::Mutex;

pub const FRAME_SIZE: usize = 4096;

/// A physical frame number: physical address ÷ `FRAME_SIZE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FrameNumber(pub u64);

impl FrameNumber {
    pub const fn from_phys_addr(addr: u64) -> Self {
        Self(addr / FRAME_SIZE as u64)
    }

    pub const fn start_address(self) -> PhysicalAddress {
        PhysicalAddress(self.0 * FRAME_SIZE as u64)
    }
}

/// A physical address. Kept distinct from `VirtAddr` (x86_64 crate) and
/// from a bare `u64` so a mixed-up address never typechecks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PhysicalAddress(pub u64);

impl PhysicalAddress {
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }

    pub const fn containing_frame(self) -> FrameNumber {
        FrameNumber(self.0 / FRAME_SIZE as u64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeState {
    Free,
    Used,
}

/// One entry in the free list. Frames are never moved once placed in the
/// backing array built at `init` time; only their `next` link and `state`
/// change.
struct FreeListNode {
    frame: FrameNumber,
    next: Option<usize>,
    state: NodeState,
}

struct Inner {
    nodes: alloc::vec::Vec<FreeListNode>,
    /// `FrameNumber -> index into nodes`, so `free` recovers a frame's node
    /// without scanning, keeping it O(1)/O(log n) like `alloc`.
    index_of: alloc::collections::BTreeMap<FrameNumber, usize>,
    /// Index into `nodes` of the head of the free list, or `None` if empty.
    head: Option<usize>,
    total_frames: usize,
    free_frames: usize,
}

impl Inner {
    const fn empty() -> Self {
        Self {
            nodes: alloc::vec::Vec::new(),
            index_of: alloc::collections::BTreeMap::new(),
            head: None,
            total_frames: 0,
            free_frames: 0,
        }
    }

    fn push_free(&mut self, index: usize) {
        self.nodes[index].state = NodeState::Free;
        self.nodes[index].next = self.head;
        self.head = Some(index);
        self.free_frames += 1;
    }

    fn pop_free(&mut self) -> Option<FrameNumber> {
        let index = self.head?;
        self.head = self.nodes[index].next;
        self.nodes[index].state = NodeState::Used;
        self.free_frames -= 1;
        Some(self.nodes[index].frame)
    }

    /// Returns `frame` to the free list in O(1)/O(log n): `index_of` gives
    /// the node directly instead of a linear scan. Fails with `DoubleFree`
    /// both when `frame` was never handed out by this allocator and when it
    /// is already Free — both are "freeing a frame not currently Used",
    /// spec §4.1's fatal invariant violation.
    fn try_free(&mut self, frame: FrameNumber) -> Result<(), FrameAllocatorError> {
        let index = *self
            .index_of
            .get(&frame)
            .ok_or(FrameAllocatorError::DoubleFree { frame: frame.0 })?;
        if self.nodes[index].state != NodeState::Used {
            return Err(FrameAllocatorError::DoubleFree { frame: frame.0 });
        }
        self.push_free(index);
        Ok(())
    }
}

pub static FRAME_ALLOCATOR: Mutex<Inner> = Mutex::new(Inner::empty());

/// Initializes the allocator from a list of usable physical frame numbers,
/// already filtered by `mm::bootloader` to exclude reserved regions, the
/// kernel image, and anything below 1 MiB.
pub fn init(usable_frames: impl Iterator<Item = FrameNumber>) {
    let mut inner = FRAME_ALLOCATOR.lock();
    for frame in usable_frames {
        let index = inner.nodes.len();
        inner.nodes.push(FreeListNode {
            frame,
            next: None,
            state: NodeState::Free,
        });
        inner.index_of.insert(frame, index);
        inner.push_free(index);
    }
    inner.total_frames = inner.nodes.len();
}

/// Allocates one frame, or `None` if the free list is exhausted. Callers
/// that want a `KernelError` should use [`alloc_checked`].
pub fn alloc() -> Option<FrameNumber> {
    FRAME_ALLOCATOR.lock().pop_free()
}

pub fn alloc_checked() -> Result<FrameNumber, FrameAllocatorError> {
    alloc().ok_or(FrameAllocatorError::OutOfFrames)
}

/// Returns `frame` to the free list in O(1)/O(log n) via `index_of`
/// (never a scan over `nodes`). Returns `DoubleFree` rather than
/// corrupting the list if `frame` was never handed out by this allocator
/// or is already Free; callers that want to handle that should use
/// [`free_checked`].
///
/// Freeing a frame not currently Used is a fatal invariant violation per
/// spec §4.1, so the unchecked path panics on it — every frame a
/// well-behaved subsystem frees is one it or the allocator itself handed
/// out.
pub fn free(frame: FrameNumber) {
    free_checked(frame).expect("freeing a frame that is not currently Used is a fatal invariant violation");
}

/// Like [`free`] but returns the [`FrameAllocatorError::DoubleFree`]
/// instead of panicking.
pub fn free_checked(frame: FrameNumber) -> Result<(), FrameAllocatorError> {
    FRAME_ALLOCATOR.lock().try_free(frame)
}

pub fn total() -> usize {
    FRAME_ALLOCATOR.lock().total_frames
}

pub fn free_count() -> usize {
    FRAME_ALLOCATOR.lock().free_frames
}

extern crate alloc;

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    fn fresh(n: u64) {
        let mut inner = FRAME_ALLOCATOR.lock();
        *inner = Inner::empty();
        drop(inner);
        init((0..n).map(FrameNumber));
    }

    #[test]
    fn alloc_then_free_restores_free_count() {
        fresh(8);
        assert_eq!(free_count(), 8);
        let f = alloc().expect("fresh allocator should have frames");
        assert_eq!(free_count(), 7);
        free(f);
        assert_eq!(free_count(), 8);
    }

    #[test]
    fn exhaustion_returns_none() {
        fresh(2);
        assert!(alloc().is_some());
        assert!(alloc().is_some());
        assert!(alloc().is_none());
    }

    #[test]
    fn frame_conservation_holds_across_churn() {
        fresh(16);
        let mut held = alloc::vec::Vec::new();
        for _ in 0..10 {
            held.push(alloc().unwrap());
        }
        assert_eq!(free_count() + held.len(), total());
        for f in held.drain(..5) {
            free(f);
        }
        assert_eq!(free_count() + held.len(), total());
    }

    #[test]
    fn freeing_an_untracked_frame_is_rejected() {
        fresh(4);
        assert_eq!(
            free_checked(FrameNumber(999)),
            Err(FrameAllocatorError::DoubleFree { frame: 999 })
        );
    }

    #[test]
    fn double_free_of_an_already_free_frame_is_rejected() {
        fresh(4);
        let f = alloc().unwrap();
        assert_eq!(free_checked(f), Ok(()));
        assert_eq!(free_checked(f), Err(FrameAllocatorError::DoubleFree { frame: f.0 }));
    }
}
