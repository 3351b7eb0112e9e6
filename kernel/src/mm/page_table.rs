//! Page Table Engine (PTE).
//!
//! A mechanism, not a policy: `Address Space` and the demand-paging
//! controller decide *what* should be mapped and *why*; this module only
//! knows how to walk and mutate the four-level x86-64 hierarchy. Every
//! present entry always points at a frame owned by some address space's
//! VMA — this module never allocates or frees a *user* frame, only the
//! intermediate table frames needed to hold one.

use crate::error::PageTableError;
use crate::mm::cow;
use crate::mm::frame_allocator::{self, FrameNumber, PhysicalAddress, FRAME_SIZE};
use bitflags::bitflags;

bitflags! {
    /// Mirrors the hardware PTE bits this kernel cares about, plus two
    /// OS-defined bits (9 and 10, unused by the CPU) for CoW and Swapped
    /// bookkeeping, per spec §3/§4.2.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageFlags: u64 {
        const PRESENT    = 1 << 0;
        const WRITABLE   = 1 << 1;
        const USER       = 1 << 2;
        const ACCESSED   = 1 << 5;
        const DIRTY      = 1 << 6;
        const COW        = 1 << 9;
        const SWAPPED    = 1 << 10;
        const NO_EXECUTE = 1 << 63;
    }
}

impl PageFlags {
    pub fn user_rw() -> Self {
        PageFlags::PRESENT | PageFlags::WRITABLE | PageFlags::USER
    }

    pub fn user_ro() -> Self {
        PageFlags::PRESENT | PageFlags::USER
    }
}

const ADDR_MASK: u64 = 0x000f_ffff_ffff_f000;
const SWAP_SLOT_SHIFT: u64 = 12;
const SWAP_SLOT_MASK: u64 = 0x000f_ffff_ffff_f000;

/// Physical memory is identity-mapped into the kernel's virtual space at
/// this offset, per the `bootloader_api` "map physical memory" contract;
/// set once from `mm::bootloader::init` before any page table is walked.
static mut PHYS_MEM_OFFSET: u64 = 0;

/// # Safety
/// Must be called exactly once, during boot, before any call to
/// [`phys_to_virt`].
pub unsafe fn set_physical_memory_offset(offset: u64) {
    PHYS_MEM_OFFSET = offset;
}

fn phys_to_virt(addr: PhysicalAddress) -> *mut u64 {
    // SAFETY: PHYS_MEM_OFFSET is set once at boot before paging-dependent
    // code runs, and never changes afterward.
    let offset = unsafe { PHYS_MEM_OFFSET };
    (addr.as_u64() + offset) as *mut u64
}

/// Byte-granular view of the direct physical map, for callers (demand
/// paging, the kernel heap, `copy_in`/`copy_out`) that need to read or
/// write frame contents rather than walk a table.
pub fn phys_to_virt_ptr(addr: PhysicalAddress) -> *mut u8 {
    phys_to_virt(addr) as *mut u8
}

fn table_ptr(frame: FrameNumber) -> *mut [u64; 512] {
    phys_to_virt(frame.start_address()) as *mut [u64; 512]
}

/// One level-4/3/2/1 table view, backed by a physical frame mapped through
/// the direct physical map.
struct Table {
    frame: FrameNumber,
}

impl Table {
    fn entries(&self) -> &mut [u64; 512] {
        // SAFETY: `frame` is a table frame owned by this address space and
        // reachable only through `PageMapper`, which never aliases mutable
        // access to the same table concurrently (single-CPU, and callers
        // hold the owning AS's lock).
        unsafe { &mut *table_ptr(self.frame) }
    }

    fn entry_flags(raw: u64) -> PageFlags {
        PageFlags::from_bits_truncate(raw)
    }

    fn entry_frame(raw: u64) -> FrameNumber {
        FrameNumber::from_phys_addr(raw & ADDR_MASK)
    }
}

fn new_table_frame() -> Result<FrameNumber, PageTableError> {
    let frame = frame_allocator::alloc().ok_or(PageTableError::OutOfFrames)?;
    // SAFETY: frame was just allocated and is not yet referenced by any
    // page table, so zeroing it cannot race with another reader.
    unsafe {
        core::ptr::write_bytes(table_ptr(frame), 0, 1);
    }
    Ok(frame)
}

fn indices(virt: u64) -> [usize; 4] {
    [
        ((virt >> 39) & 0x1ff) as usize,
        ((virt >> 30) & 0x1ff) as usize,
        ((virt >> 21) & 0x1ff) as usize,
        ((virt >> 12) & 0x1ff) as usize,
    ]
}

/// Owns (a reference to) one address space's root table and provides the
/// mapping primitives spec §4.2 names.
pub struct PageMapper {
    l4_frame: FrameNumber,
}

impl PageMapper {
    /// # Safety
    /// `l4_frame` must be a valid, currently-allocated level-4 table frame,
    /// and the direct physical map must already be installed.
    pub unsafe fn from_root(l4_frame: FrameNumber) -> Self {
        Self { l4_frame }
    }

    pub fn root(&self) -> FrameNumber {
        self.l4_frame
    }

    /// Allocates a fresh, zeroed level-4 table and copies the kernel half
    /// (indices 256..512) from `kernel_root` so every address space shares
    /// the same kernel mapping, per spec §3's AS invariant.
    pub fn new_address_space(kernel_root: FrameNumber) -> Result<Self, PageTableError> {
        let l4_frame = new_table_frame()?;
        let table = Table { frame: l4_frame };
        let kernel_table = Table { frame: kernel_root };
        for i in 256..512 {
            table.entries()[i] = kernel_table.entries()[i];
        }
        Ok(Self { l4_frame })
    }

    fn walk_create(&self, virt: u64) -> Result<&'static mut [u64; 512], PageTableError> {
        let idx = indices(virt);
        let mut table = Table { frame: self.l4_frame };
        for &i in &idx[..3] {
            let raw = table.entries()[i];
            let flags = Table::entry_flags(raw);
            if flags.contains(PageFlags::PRESENT) {
                table = Table {
                    frame: Table::entry_frame(raw),
                };
            } else {
                let new_frame = new_table_frame()?;
                table.entries()[i] = new_frame.start_address().as_u64()
                    | (PageFlags::PRESENT | PageFlags::WRITABLE | PageFlags::USER).bits();
                table = Table { frame: new_frame };
            }
        }
        Ok(table.entries())
    }

    fn walk_existing(&self, virt: u64) -> Option<&'static mut [u64; 512]> {
        let idx = indices(virt);
        let mut table = Table { frame: self.l4_frame };
        for &i in &idx[..3] {
            let raw = table.entries()[i];
            let flags = Table::entry_flags(raw);
            if !flags.contains(PageFlags::PRESENT) {
                return None;
            }
            table = Table {
                frame: Table::entry_frame(raw),
            };
        }
        Some(table.entries())
    }

    /// Installs a mapping from `virt` to `phys` with `flags`. Allocates any
    /// missing intermediate table levels from the frame allocator.
    pub fn map(
        &self,
        virt: u64,
        phys: PhysicalAddress,
        flags: PageFlags,
    ) -> Result<(), PageTableError> {
        let l1 = self.walk_create(virt)?;
        let i = indices(virt)[3];
        if Table::entry_flags(l1[i]).contains(PageFlags::PRESENT) {
            return Err(PageTableError::AlreadyMapped { virt });
        }
        l1[i] = phys.as_u64() | (flags | PageFlags::PRESENT).bits();
        Self::flush(virt);
        Ok(())
    }

    /// Removes the mapping at `virt`, returning the physical address it
    /// pointed to. The caller (the owning `AddressSpace`) is responsible
    /// for deciding whether to free the frame, drop a CoW reference, or
    /// free a swap slot.
    pub fn unmap(&self, virt: u64) -> Result<PhysicalAddress, PageTableError> {
        let l1 = self
            .walk_existing(virt)
            .ok_or(PageTableError::NotMapped { virt })?;
        let i = indices(virt)[3];
        let raw = l1[i];
        if !Table::entry_flags(raw).contains(PageFlags::PRESENT) {
            return Err(PageTableError::NotMapped { virt });
        }
        l1[i] = 0;
        Self::flush(virt);
        Ok(PhysicalAddress::new(raw & ADDR_MASK))
    }

    pub fn translate(&self, virt: u64) -> Option<PhysicalAddress> {
        let l1 = self.walk_existing(virt)?;
        let raw = l1[indices(virt)[3]];
        Table::entry_flags(raw)
            .contains(PageFlags::PRESENT)
            .then(|| PhysicalAddress::new((raw & ADDR_MASK) + (virt & 0xfff)))
    }

    pub fn flags_at(&self, virt: u64) -> Option<PageFlags> {
        let l1 = self.walk_existing(virt)?;
        Some(Table::entry_flags(l1[indices(virt)[3]]))
    }

    /// Updates the flags of an existing entry without touching its
    /// physical address. Used by `protect` (narrowing permissions) and by
    /// the CoW fault path (clearing `COW`, setting `WRITABLE`).
    pub fn set_flags(&self, virt: u64, flags: PageFlags) -> Result<(), PageTableError> {
        let l1 = self
            .walk_existing(virt)
            .ok_or(PageTableError::NotMapped { virt })?;
        let i = indices(virt)[3];
        let raw = l1[i];
        if !Table::entry_flags(raw).contains(PageFlags::PRESENT) {
            return Err(PageTableError::NotMapped { virt });
        }
        l1[i] = (raw & ADDR_MASK) | (flags | PageFlags::PRESENT).bits();
        Self::flush(virt);
        Ok(())
    }

    /// Marks the entry at `virt` as swapped out, encoding `slot` in the
    /// bits the hardware ignores once `PRESENT` is clear.
    pub fn mark_swapped(&self, virt: u64, slot: u32) -> Result<(), PageTableError> {
        let l1 = self
            .walk_existing(virt)
            .ok_or(PageTableError::NotMapped { virt })?;
        let i = indices(virt)[3];
        l1[i] = ((slot as u64) << SWAP_SLOT_SHIFT) | PageFlags::SWAPPED.bits();
        Self::flush(virt);
        Ok(())
    }

    /// Unconditionally clears the entry at `virt`, whatever its flags.
    /// Used only during address-space teardown, where `unmap`'s
    /// "must currently be present" check would reject a Swapped entry.
    pub fn clear(&self, virt: u64) {
        if let Some(l1) = self.walk_existing(virt) {
            l1[indices(virt)[3]] = 0;
        }
    }

    pub fn swap_slot_at(&self, virt: u64) -> Option<u32> {
        let l1 = self.walk_existing(virt)?;
        let raw = l1[indices(virt)[3]];
        Table::entry_flags(raw)
            .contains(PageFlags::SWAPPED)
            .then(|| ((raw & SWAP_SLOT_MASK) >> SWAP_SLOT_SHIFT) as u32)
    }

    /// Clones the user half (virtual addresses below the kernel split) of
    /// `self` into a fresh address space. Private mappings are shared
    /// read-only with `COW` set on both sides and their refcount bumped;
    /// shared mappings are duplicated as-is (same frame, same flags, no
    /// CoW). The kernel half is already shared by construction
    /// (`new_address_space` copies it once).
    pub fn clone_user_half(&self, dest: &PageMapper) -> Result<(), PageTableError> {
        const USER_L4_ENTRIES: usize = 256;
        let src_l4 = Table { frame: self.l4_frame }.entries();
        for l4i in 0..USER_L4_ENTRIES {
            let l4_raw = src_l4[l4i];
            if !Table::entry_flags(l4_raw).contains(PageFlags::PRESENT) {
                continue;
            }
            let virt_base = (l4i as u64) << 39;
            self.clone_l3(virt_base, Table::entry_frame(l4_raw), dest)?;
        }
        Ok(())
    }

    fn clone_l3(
        &self,
        virt_base: u64,
        l3_frame: FrameNumber,
        dest: &PageMapper,
    ) -> Result<(), PageTableError> {
        let l3 = Table { frame: l3_frame }.entries();
        for (i, &raw) in l3.iter().enumerate() {
            if !Table::entry_flags(raw).contains(PageFlags::PRESENT) {
                continue;
            }
            let virt_base = virt_base | ((i as u64) << 30);
            self.clone_l2(virt_base, Table::entry_frame(raw), dest)?;
        }
        Ok(())
    }

    fn clone_l2(
        &self,
        virt_base: u64,
        l2_frame: FrameNumber,
        dest: &PageMapper,
    ) -> Result<(), PageTableError> {
        let l2 = Table { frame: l2_frame }.entries();
        for (i, &raw) in l2.iter().enumerate() {
            if !Table::entry_flags(raw).contains(PageFlags::PRESENT) {
                continue;
            }
            let virt_base = virt_base | ((i as u64) << 21);
            self.clone_l1(virt_base, Table::entry_frame(raw), dest)?;
        }
        Ok(())
    }

    fn clone_l1(
        &self,
        virt_base: u64,
        l1_frame: FrameNumber,
        dest: &PageMapper,
    ) -> Result<(), PageTableError> {
        let l1 = Table { frame: l1_frame }.entries();
        for (i, &raw) in l1.iter().enumerate() {
            let flags = Table::entry_flags(raw);
            if !flags.contains(PageFlags::PRESENT) && !flags.contains(PageFlags::SWAPPED) {
                continue;
            }
            let virt = virt_base | ((i as u64) << 12);
            if flags.contains(PageFlags::SWAPPED) {
                dest.mark_swapped(virt, ((raw & SWAP_SLOT_MASK) >> SWAP_SLOT_SHIFT) as u32)?;
                continue;
            }
            let frame = Table::entry_frame(raw);
            let phys = frame.start_address();
            if flags.contains(PageFlags::WRITABLE) {
                // Private mapping: share the frame CoW on both sides.
                cow::share(frame);
                let cow_flags = (flags & !PageFlags::WRITABLE) | PageFlags::COW;
                self.set_flags(virt, cow_flags)?;
                dest.map(virt, phys, cow_flags)?;
            } else {
                // Already read-only or an explicitly shared mapping: no
                // copy-on-write bookkeeping needed, just duplicate.
                dest.map(virt, phys, flags)?;
            }
        }
        Ok(())
    }

    fn flush(virt: u64) {
        use x86_64::instructions::tlb;
        use x86_64::VirtAddr;
        tlb::flush(VirtAddr::new(virt));
    }
}

/// The level-4 frame currently loaded in `CR3`.
pub fn current_root() -> FrameNumber {
    let (frame, _) = x86_64::registers::control::Cr3::read();
    FrameNumber::from_phys_addr(frame.start_address().as_u64())
}

/// Switches the active level-4 table to `frame`'s, the page-table half of
/// a context switch (spec §4.7: "switch the page-table root to the next
/// thread's address space, or skip if identical").
///
/// # Safety
/// `frame` must be the root of a fully-constructed address space whose
/// kernel half (L4 indices 256..512) matches every other address space's,
/// which holds for every `AddressSpace` in this kernel by construction.
pub unsafe fn load_root(frame: FrameNumber) {
    use x86_64::registers::control::{Cr3, Cr3Flags};
    use x86_64::structures::paging::PhysFrame;
    use x86_64::PhysAddr;

    let phys_frame = PhysFrame::containing_address(PhysAddr::new(frame.start_address().as_u64()));
    // SAFETY: delegated to this function's own contract.
    unsafe { Cr3::write(phys_frame, Cr3Flags::empty()) };
}

/// Frees every intermediate table frame reachable from the user half
/// (L4 indices 0..256) of `l4_frame`, then `l4_frame` itself. Leaf data
/// frames must already have been released by the caller (`AddressSpace`
/// unmaps every VMA, freeing or CoW-dropping each data frame, before
/// tearing down the tables that pointed at them) — by the time this runs
/// every L1 entry in the user half is either absent or would leak a table
/// frame, never a data frame.
///
/// The kernel half (indices 256..511) is shared across every address
/// space and is never touched here.
pub fn free_user_page_table_frames(l4_frame: FrameNumber) -> usize {
    let mut freed = 0;
    let l4 = Table { frame: l4_frame }.entries();
    for entry in l4.iter_mut().take(256) {
        let flags = Table::entry_flags(*entry);
        if flags.contains(PageFlags::PRESENT) {
            freed += free_subtree(Table::entry_frame(*entry), 3);
        }
        *entry = 0;
    }
    frame_allocator::free(l4_frame);
    freed + 1
}

/// `level` is 3 for an L3 table, 2 for L2, 1 for L1. L1 entries point at
/// data frames, already released by the caller, so at level 1 this only
/// frees the L1 table frame itself. Returns the number of table frames
/// freed, including `frame` itself.
fn free_subtree(frame: FrameNumber, level: u8) -> usize {
    let mut freed = 0;
    if level > 1 {
        let table = Table { frame }.entries();
        for &raw in table.iter() {
            let flags = Table::entry_flags(raw);
            if flags.contains(PageFlags::PRESENT) {
                freed += free_subtree(Table::entry_frame(raw), level - 1);
            }
        }
    }
    frame_allocator::free(frame);
    freed + 1
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn indices_round_trip_covers_full_address() {
        let virt = 0x0000_7f12_3456_7000u64;
        let idx = indices(virt);
        let rebuilt = ((idx[0] as u64) << 39)
            | ((idx[1] as u64) << 30)
            | ((idx[2] as u64) << 21)
            | ((idx[3] as u64) << 12);
        assert_eq!(rebuilt, virt & 0x0000_ffff_ffff_f000);
    }

    #[test]
    fn page_flags_user_rw_includes_present_writable_user() {
        let f = PageFlags::user_rw();
        assert!(f.contains(PageFlags::PRESENT));
        assert!(f.contains(PageFlags::WRITABLE));
        assert!(f.contains(PageFlags::USER));
    }
}
