//! Kernel Heap (KH), spec §4.5.
//!
//! Three tiers, each reusing a piece already built elsewhere instead of
//! inventing new machinery: objects of half a page or less come out of a
//! segregated free list in O(1); anything up to a full page is served by
//! `linked_list_allocator` (the same crate the teacher's own heap leans
//! on); anything larger is mapped frame-by-frame straight from the PFA
//! into a reserved window of the kernel's shared address-space half,
//! using the ordinary `page_table::PageMapper` API against the live CR3
//! root.

use crate::error::KernelError;
use crate::mm::frame_allocator::{self, FrameNumber, FRAME_SIZE};
use crate::mm::page_table::{self, PageFlags, PageMapper};
use alloc::collections::BTreeMap;
use bitflags::bitflags;
use core::alloc::{GlobalAlloc, Layout};
use core::ptr::NonNull;
use linked_list_allocator::LockedHeap;
use spin::Mutex;

extern crate alloc;

/// Backing store for the size-class slabs and the sub-page fallback tier.
const HEAP_BYTES: usize = 4 * 1024 * 1024;
static mut HEAP_MEMORY: [u8; HEAP_BYTES] = [0; HEAP_BYTES];

/// Start of the window large (> 1 page) allocations are mapped into. Well
/// clear of both the kernel image and the bootloader's direct physical
/// map, which live at offsets chosen by the bootloader at boot time.
const LARGE_REGION_START: u64 = 0xffff_ff80_0000_0000;

const SIZE_CLASSES: [usize; 8] = [16, 32, 64, 128, 256, 512, 1024, 2048];
const SLAB_OBJECTS: usize = 64;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AllocFlags: u8 {
        const ZEROED = 1 << 0;
    }
}

struct FreeNode {
    next: Option<NonNull<FreeNode>>,
}

struct SizeClasses {
    heads: [Option<NonNull<FreeNode>>; SIZE_CLASSES.len()],
}

// SAFETY: every access to `heads` happens with `CLASSES`'s spinlock held.
unsafe impl Send for SizeClasses {}

impl SizeClasses {
    const fn empty() -> Self {
        Self {
            heads: [None; SIZE_CLASSES.len()],
        }
    }
}

static CLASSES: Mutex<SizeClasses> = Mutex::new(SizeClasses::empty());
static FALLBACK: LockedHeap = LockedHeap::empty();
/// base virtual address → frame count, for allocations served by
/// [`large_alloc`]; `kfree` needs this to know how many pages to unmap.
static LARGE_ALLOCS: Mutex<BTreeMap<usize, usize>> = Mutex::new(BTreeMap::new());
static LARGE_REGION_NEXT: Mutex<u64> = Mutex::new(LARGE_REGION_START);

/// # Safety
/// Must run exactly once, after the direct physical map is installed
/// (`mm::bootloader::init`) and before the first heap allocation — which
/// in practice means before any `alloc::vec::Vec`, `BTreeMap`, etc. is
/// touched anywhere in the kernel.
pub unsafe fn init() {
    // SAFETY: HEAP_MEMORY is private to this module and this function runs
    // exactly once, before any other heap access.
    unsafe {
        let base = core::ptr::addr_of_mut!(HEAP_MEMORY) as *mut u8;
        FALLBACK.lock().init(base, HEAP_BYTES);
    }
}

fn class_index(size: usize, align: usize) -> Option<usize> {
    let need = size.max(align);
    SIZE_CLASSES.iter().position(|&s| s >= need)
}

fn refill(index: usize) -> Result<(), KernelError> {
    let object_size = SIZE_CLASSES[index];
    let layout = Layout::from_size_align(object_size * SLAB_OBJECTS, object_size)
        .map_err(|_| KernelError::Inval)?;
    // SAFETY: layout is well-formed and non-zero-sized; FALLBACK was
    // initialized in `init` before any allocation can reach here.
    let base = unsafe { FALLBACK.alloc(layout) };
    if base.is_null() {
        return Err(KernelError::NoMemory {
            requested: layout.size(),
            available: 0,
        });
    }
    let mut classes = CLASSES.lock();
    for i in 0..SLAB_OBJECTS {
        // SAFETY: slot `i` lies entirely within the block just carved from
        // FALLBACK and is exclusively owned until linked into the free
        // list below, guarded by CLASSES's lock.
        unsafe {
            let slot = base.add(i * object_size) as *mut FreeNode;
            (*slot).next = classes.heads[index];
            classes.heads[index] = NonNull::new(slot);
        }
    }
    Ok(())
}

fn alloc_from_class(index: usize) -> Option<NonNull<u8>> {
    loop {
        {
            let mut classes = CLASSES.lock();
            if let Some(head) = classes.heads[index] {
                // SAFETY: `head` was linked by `refill` or a prior
                // `free_to_class` call for this exact class.
                classes.heads[index] = unsafe { head.as_ref().next };
                return Some(head.cast());
            }
        }
        refill(index).ok()?;
    }
}

fn free_to_class(index: usize, ptr: NonNull<u8>) {
    let mut classes = CLASSES.lock();
    let node = ptr.cast::<FreeNode>();
    // SAFETY: `ptr` was handed out by `alloc_from_class` for this same
    // class, which is always at least `size_of::<FreeNode>()` bytes.
    unsafe {
        (*node.as_ptr()).next = classes.heads[index];
    }
    classes.heads[index] = Some(node);
}

/// A `PageMapper` over the currently-active (shared, kernel-half) root
/// table, read straight from CR3. Valid on any CPU at any time; every
/// address space's kernel half is the same tables by construction.
fn kernel_mapper() -> PageMapper {
    let (frame, _) = x86_64::registers::control::Cr3::read();
    let kframe = FrameNumber::from_phys_addr(frame.start_address().as_u64());
    // SAFETY: CR3 always names the currently loaded, valid level-4 table.
    unsafe { PageMapper::from_root(kframe) }
}

fn large_alloc(frames: usize) -> Option<NonNull<u8>> {
    let mapper = kernel_mapper();
    let mut cursor = LARGE_REGION_NEXT.lock();
    let base = *cursor;
    let mut acquired = alloc::vec::Vec::with_capacity(frames);
    for i in 0..frames {
        let Some(frame) = frame_allocator::alloc() else {
            break;
        };
        let addr = base + (i * FRAME_SIZE) as u64;
        if mapper
            .map(addr, frame.start_address(), PageFlags::PRESENT | PageFlags::WRITABLE)
            .is_err()
        {
            frame_allocator::free(frame);
            break;
        }
        acquired.push(frame);
    }
    if acquired.len() != frames {
        for (i, frame) in acquired.into_iter().enumerate() {
            let addr = base + (i * FRAME_SIZE) as u64;
            let _ = mapper.unmap(addr);
            frame_allocator::free(frame);
        }
        return None;
    }
    *cursor = base + (frames * FRAME_SIZE) as u64;
    LARGE_ALLOCS.lock().insert(base as usize, frames);
    NonNull::new(base as *mut u8)
}

fn large_free(ptr: NonNull<u8>) {
    let base = ptr.as_ptr() as u64;
    let Some(frames) = LARGE_ALLOCS.lock().remove(&(base as usize)) else {
        return;
    };
    let mapper = kernel_mapper();
    for i in 0..frames {
        let addr = base + (i * FRAME_SIZE) as u64;
        if let Ok(phys) = mapper.unmap(addr) {
            frame_allocator::free(phys.containing_frame());
        }
    }
}

pub struct KernelHeap;

// SAFETY: every tier (size classes, fallback, large) is internally
// synchronized by its own spinlock.
unsafe impl GlobalAlloc for KernelHeap {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let size = layout.size();
        let align = layout.align();
        if size > FRAME_SIZE {
            let frames = size.div_ceil(FRAME_SIZE);
            return large_alloc(frames)
                .map(|p| p.as_ptr())
                .unwrap_or(core::ptr::null_mut());
        }
        if let Some(idx) = class_index(size, align) {
            return alloc_from_class(idx)
                .map(|p| p.as_ptr())
                .unwrap_or(core::ptr::null_mut());
        }
        // Bigger than the largest size class but no more than a page, or
        // an alignment no size class can satisfy: served directly by the
        // fallback allocator.
        // SAFETY: FALLBACK is initialized in `init` before any allocator
        // use, and `layout` is the caller's well-formed request.
        unsafe { FALLBACK.alloc(layout) }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        let Some(nn) = NonNull::new(ptr) else {
            return;
        };
        let size = layout.size();
        let align = layout.align();
        if size > FRAME_SIZE {
            large_free(nn);
            return;
        }
        if let Some(idx) = class_index(size, align) {
            free_to_class(idx, nn);
            return;
        }
        // SAFETY: `ptr`/`layout` match a prior `alloc` that took this same
        // branch, by the `GlobalAlloc` contract.
        unsafe { FALLBACK.dealloc(ptr, layout) };
    }
}

/// Named kernel-internal allocation entry point (spec §4.5), for code that
/// wants a raw pointer and a byte count rather than building a `Layout`
/// itself. Backed by the same `GlobalAlloc` impl as every `alloc::`
/// collection in the kernel.
pub fn kalloc(size: usize, flags: AllocFlags) -> Option<NonNull<u8>> {
    if size == 0 {
        return None;
    }
    let layout = Layout::from_size_align(size, core::mem::align_of::<usize>()).ok()?;
    // SAFETY: `layout` is well-formed and non-zero-sized.
    let raw = unsafe { alloc::alloc::alloc(layout) };
    let ptr = NonNull::new(raw)?;
    if flags.contains(AllocFlags::ZEROED) {
        // SAFETY: `ptr` was just allocated with exactly `size` usable bytes.
        unsafe { core::ptr::write_bytes(ptr.as_ptr(), 0, size) };
    }
    Some(ptr)
}

/// # Safety
/// `ptr` and `size` must match a value and length previously returned
/// together by [`kalloc`], not yet freed.
pub unsafe fn kfree(ptr: NonNull<u8>, size: usize) {
    let Ok(layout) = Layout::from_size_align(size, core::mem::align_of::<usize>()) else {
        return;
    };
    // SAFETY: delegated to the caller's contract on this function.
    unsafe { alloc::alloc::dealloc(ptr.as_ptr(), layout) };
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn class_index_picks_smallest_fit() {
        assert_eq!(class_index(10, 8), Some(0));
        assert_eq!(class_index(17, 8), Some(1));
        assert_eq!(class_index(2048, 8), Some(7));
        assert_eq!(class_index(2049, 8), None);
    }

    #[test]
    fn class_index_respects_alignment() {
        assert_eq!(class_index(8, 64), Some(SIZE_CLASSES.iter().position(|&s| s == 64).unwrap()));
    }
}
