//! Copy-on-write reference counts.
//!
//! A frame backing a private VMA is either exclusively owned by one
//! address space (no entry here) or shared between a parent and its forks
//! (an entry here with count ≥ 2). The page-table engine consults this
//! table only at fork time (to mark both sides CoW) and at write-fault
//! time (to decide whether a write must copy or may simply clear the CoW
//! bit in place).

use crate::mm::frame_allocator::{self, FrameNumber};
use alloc::collections::BTreeMap;
use spin::Mutex;

static REFCOUNTS: Mutex<BTreeMap<FrameNumber, usize>> = Mutex::new(BTreeMap::new());

/// Marks `frame` as shared by one more address space than before. Called
/// once per side when a private VMA's frame becomes CoW-shared at fork.
pub fn share(frame: FrameNumber) {
    let mut table = REFCOUNTS.lock();
    *table.entry(frame).or_insert(1) += 1;
}

/// Returns the number of address spaces currently sharing `frame`; `1`
/// (the implicit default) means exclusively owned.
pub fn ref_count(frame: FrameNumber) -> usize {
    *REFCOUNTS.lock().get(&frame).unwrap_or(&1)
}

/// Drops one reference to `frame`. If the count reaches 1, the caller now
/// holds the last reference and the frame reverts to exclusive ownership
/// (the entry is removed so `ref_count` returns the implicit `1`). If the
/// count reaches 0 (the frame had no other owner at all, a logic error
/// elsewhere) the frame is freed back to the allocator.
pub fn drop_ref(frame: FrameNumber) -> usize {
    let mut table = REFCOUNTS.lock();
    match table.get_mut(&frame) {
        Some(count) if *count > 2 => {
            *count -= 1;
            *count
        }
        Some(_) => {
            table.remove(&frame);
            1
        }
        None => {
            drop(table);
            frame_allocator::free(frame);
            0
        }
    }
}

extern crate alloc;

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn fresh_frame_has_implicit_refcount_one() {
        let f = FrameNumber(4242);
        assert_eq!(ref_count(f), 1);
    }

    #[test]
    fn share_then_drop_returns_to_exclusive() {
        let f = FrameNumber(4243);
        share(f);
        share(f);
        assert_eq!(ref_count(f), 2);
        assert_eq!(drop_ref(f), 1);
        assert_eq!(ref_count(f), 1);
    }
}
