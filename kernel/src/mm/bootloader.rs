//! Boot-time memory-map ingestion, spec §6 "Boot interface".
//!
//! Consumes the `bootloader_api::BootInfo` handed to `entry_point!`: a
//! sequence of `{base, length, kind}` regions plus the physical-memory
//! mapping base the bootloader already installed. Only `Usable` regions
//! become PFA backing; everything else (the kernel image itself,
//! bootloader-reserved pages, ACPI tables) is left untouched, exactly as
//! spec §6 specifies ("the kernel consumes only Available regions (minus
//! its own image)").

use crate::mm::frame_allocator::{self, FrameNumber, FRAME_SIZE};
use crate::mm::page_table;
use bootloader_api::info::{MemoryRegionKind, MemoryRegions};
use bootloader_api::BootInfo;

/// Ingests `boot_info`, installs the direct physical map offset, seeds the
/// frame allocator from every `Usable` region, and returns the physical
/// frame backing the level-4 table the bootloader left active in `CR3` —
/// the "kernel_root" every [`crate::mm::vas::AddressSpace`] shares its
/// kernel half with.
///
/// # Safety
/// Must run exactly once, as the very first step of kernel bring-up,
/// before any frame is allocated or any page table walked.
pub unsafe fn init(boot_info: &'static mut BootInfo) -> FrameNumber {
    let phys_mem_offset = boot_info
        .physical_memory_offset
        .into_option()
        .expect("bootloader did not map physical memory");
    // SAFETY: `phys_mem_offset` is the offset the bootloader itself used to
    // map all physical memory into the kernel's virtual space, and this
    // runs before anything calls `page_table::phys_to_virt_ptr`.
    unsafe {
        page_table::set_physical_memory_offset(phys_mem_offset);
    }

    frame_allocator::init(usable_frames(&boot_info.memory_regions));

    let (cr3_frame, _) = x86_64::registers::control::Cr3::read();
    FrameNumber::from_phys_addr(cr3_frame.start_address().as_u64())
}

/// Yields every 4 KiB frame number covered by a `Usable` region. Regions
/// are not guaranteed frame-aligned at their boundaries by the bootloader
/// contract, so both ends are rounded inward.
fn usable_frames(regions: &'static MemoryRegions) -> impl Iterator<Item = FrameNumber> {
    regions
        .iter()
        .filter(|r| r.kind == MemoryRegionKind::Usable)
        .flat_map(|r| {
            let start = r.start.div_ceil(FRAME_SIZE as u64);
            let end = r.end / FRAME_SIZE as u64;
            start..end
        })
        .map(FrameNumber)
}
