//! Memory management: spec §4.1–§4.5 (PFA, PTE, AS/VMA, DPS, KH).
//!
//! `bootloader` parses the boot-time memory map and wires the direct
//! physical map offset into `page_table` before anything else in this
//! module is touched; every other submodule is leaf-first per the spec §2
//! dependency graph (PFA → PTE → AS → DPS, PFA → KH).

pub mod bootloader;
pub mod cow;
pub mod demand_paging;
pub mod frame_allocator;
pub mod heap;
pub mod page_fault;
pub mod page_table;
pub mod user_validation;
pub mod vas;

pub use frame_allocator::{FrameNumber, PhysicalAddress, FRAME_SIZE};

use core::sync::atomic::{AtomicU64, Ordering};

/// The level-4 frame every address space copies its kernel half (indices
/// 256..512) from. `u64::MAX` means "not yet set"; read only after `init`.
static KERNEL_ROOT: AtomicU64 = AtomicU64::new(u64::MAX);

/// The shared kernel-half template frame, set once by [`init`]. Every
/// address space `process::creation::process_create`/`process::fork::fork`
/// build is handed this same frame so the kernel mapping is identical
/// across every process, per spec §3's AS invariant.
pub fn kernel_root() -> FrameNumber {
    let raw = KERNEL_ROOT.load(Ordering::Acquire);
    debug_assert_ne!(raw, u64::MAX, "mm::kernel_root read before mm::init");
    FrameNumber(raw)
}

/// Runs the full boot-time bring-up for this module in dependency order.
///
/// # Safety
/// Must run exactly once, very early in `bootstrap::init`, with `boot_info`
/// untouched by any other subsystem beforehand.
pub unsafe fn init(boot_info: &'static mut bootloader_api::BootInfo) -> FrameNumber {
    // SAFETY: delegated to this function's own contract; `bootloader::init`
    // runs before any frame is allocated or any page table is walked.
    let kernel_root = unsafe { bootloader::init(boot_info) };
    KERNEL_ROOT.store(kernel_root.0, Ordering::Release);
    // SAFETY: runs immediately after `bootloader::init`, before the first
    // heap allocation anywhere in the kernel.
    unsafe { heap::init() };
    kernel_root
}
