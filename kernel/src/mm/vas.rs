//! Address Space (AS) and Virtual Memory Areas (VMA), spec §4.3.
//!
//! Names user-visible regions and enforces their semantics; all frame and
//! page-table mechanics are delegated to `page_table`/`frame_allocator`.
//! An `AddressSpace` owns its VMAs and, for non-CoW-shared pages, its
//! frames outright.

use crate::error::{KernelError, PageTableError};
use crate::mm::cow;
use crate::mm::frame_allocator::{self, FrameNumber};
use crate::mm::page_table::{PageFlags, PageMapper};
use alloc::vec::Vec;
use bitflags::bitflags;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Protection: u8 {
        const READ    = 1 << 0;
        const WRITE   = 1 << 1;
        const EXECUTE = 1 << 2;
    }
}

impl Protection {
    pub const RW: Protection = Protection::READ.union(Protection::WRITE);
    pub const RWX: Protection = Protection::READ.union(Protection::WRITE).union(Protection::EXECUTE);

    pub(crate) fn to_page_flags(self) -> PageFlags {
        let mut flags = PageFlags::PRESENT | PageFlags::USER;
        if self.contains(Protection::WRITE) {
            flags |= PageFlags::WRITABLE;
        }
        if !self.contains(Protection::EXECUTE) {
            flags |= PageFlags::NO_EXECUTE;
        }
        flags
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingKind {
    Anonymous,
    Stack,
    Heap,
    File,
    Device,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sharing {
    Private,
    Shared,
}

/// A contiguous, uniformly-protected virtual range, half-open `[start, end)`.
#[derive(Debug, Clone)]
pub struct Vma {
    pub start: u64,
    pub end: u64,
    pub prot: Protection,
    pub sharing: Sharing,
    pub kind: MappingKind,
}

impl Vma {
    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.start && addr < self.end
    }

    pub fn overlaps(&self, start: u64, end: u64) -> bool {
        self.start < end && start < self.end
    }

    pub fn len(&self) -> u64 {
        self.end - self.start
    }
}

pub const PAGE_SIZE: u64 = 4096;
pub const USER_REGION_START: u64 = 0x0000_1000_0000_0000 >> 1; // well below the user/kernel split
pub const STACK_REGION_START: u64 = 0x0000_7fff_ff00_0000;

fn align_up(addr: u64) -> u64 {
    (addr + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
}

/// Per-process collection of VMAs plus a page-table root.
pub struct AddressSpace {
    mapper: PageMapper,
    vmas: Vec<Vma>,
    heap_end: u64,
    stack_start: u64,
}

impl AddressSpace {
    /// Creates a fresh address space sharing the kernel half of `kernel_root`.
    pub fn create(kernel_root: FrameNumber) -> Result<Self, KernelError> {
        let mapper = PageMapper::new_address_space(kernel_root)?;
        Ok(Self {
            mapper,
            vmas: Vec::new(),
            heap_end: USER_REGION_START,
            stack_start: STACK_REGION_START,
        })
    }

    pub fn root_frame(&self) -> FrameNumber {
        self.mapper.root()
    }

    fn overlaps_any(&self, start: u64, end: u64) -> bool {
        self.vmas.iter().any(|v| v.overlaps(start, end))
    }

    /// `map_fixed`: installs a VMA at the exact `[addr, addr+len)` range,
    /// failing if it overlaps an existing VMA.
    pub fn map_fixed(
        &mut self,
        addr: u64,
        len: u64,
        prot: Protection,
        sharing: Sharing,
        kind: MappingKind,
    ) -> Result<u64, KernelError> {
        if addr % PAGE_SIZE != 0 || len == 0 {
            return Err(KernelError::Inval);
        }
        let end = addr + align_up(len);
        if self.overlaps_any(addr, end) {
            return Err(KernelError::Inval);
        }
        self.vmas.push(Vma {
            start: addr,
            end,
            prot,
            sharing,
            kind,
        });
        Ok(addr)
    }

    /// `map`: first-fit from `heap_end` upward, never crossing into the
    /// stack region, when `hint` is `None`.
    pub fn map(
        &mut self,
        hint: Option<u64>,
        len: u64,
        prot: Protection,
        sharing: Sharing,
        kind: MappingKind,
    ) -> Result<u64, KernelError> {
        if len == 0 {
            return Err(KernelError::Inval);
        }
        let len = align_up(len);
        if let Some(addr) = hint {
            if addr % PAGE_SIZE == 0 && !self.overlaps_any(addr, addr + len) {
                return self.map_fixed(addr, len, prot, sharing, kind);
            }
        }
        let mut candidate = self.heap_end;
        loop {
            if candidate + len > self.stack_start {
                return Err(KernelError::NoMemory {
                    requested: len as usize,
                    available: 0,
                });
            }
            if !self.overlaps_any(candidate, candidate + len) {
                return self.map_fixed(candidate, len, prot, sharing, kind);
            }
            candidate = self
                .vmas
                .iter()
                .filter(|v| v.start >= candidate)
                .map(|v| v.end)
                .min()
                .unwrap_or(candidate + len);
        }
    }

    /// Narrows or widens the protection of `[addr, addr+len)`, splitting
    /// VMAs at the boundary as needed, and strips `WRITABLE` from every
    /// covered page-table entry when write access is removed.
    ///
    /// Builds the replacement VMA list in a single forward pass over the
    /// old one rather than rescanning after each split: the freshly
    /// narrowed middle piece still `overlaps(addr, end)`, so a scan that
    /// restarted at the front after every split would re-find it forever.
    pub fn protect(&mut self, addr: u64, len: u64, new_prot: Protection) -> Result<(), KernelError> {
        if addr % PAGE_SIZE != 0 {
            return Err(KernelError::Inval);
        }
        let end = addr + align_up(len);
        let old = core::mem::take(&mut self.vmas);
        let mut new_vmas = Vec::with_capacity(old.len() + 2);

        for v in old {
            if !v.overlaps(addr, end) {
                new_vmas.push(v);
                continue;
            }
            if v.start < addr {
                new_vmas.push(Vma {
                    start: v.start,
                    end: addr,
                    ..v.clone()
                });
            }
            if v.end > end {
                new_vmas.push(Vma {
                    start: end,
                    end: v.end,
                    ..v.clone()
                });
            }
            let mid_start = v.start.max(addr);
            let mid_end = v.end.min(end);
            new_vmas.push(Vma {
                start: mid_start,
                end: mid_end,
                prot: new_prot,
                sharing: v.sharing,
                kind: v.kind,
            });

            let mut page = mid_start;
            while page < mid_end {
                if let Some(flags) = self.mapper.flags_at(page) {
                    if !flags.contains(PageFlags::SWAPPED) {
                        let mut new_flags = new_prot.to_page_flags();
                        if flags.contains(PageFlags::COW) {
                            new_flags |= PageFlags::COW;
                            new_flags.remove(PageFlags::WRITABLE);
                        }
                        let _ = self.mapper.set_flags(page, new_flags);
                    }
                }
                page += PAGE_SIZE;
            }
        }

        self.vmas = new_vmas;
        Ok(())
    }

    /// Unmaps `[addr, addr+len)`, splitting/truncating overlapping VMAs and
    /// releasing frames (dropping a CoW reference instead of freeing,
    /// where shared). Idempotent over ranges with no mapped VMA.
    pub fn unmap(&mut self, addr: u64, len: u64) -> Result<(), KernelError> {
        if addr % PAGE_SIZE != 0 {
            return Err(KernelError::Inval);
        }
        let end = addr + align_up(len);
        let mut i = 0;
        while i < self.vmas.len() {
            let v = self.vmas[i].clone();
            if !v.overlaps(addr, end) {
                i += 1;
                continue;
            }
            self.vmas.remove(i);
            if v.start < addr {
                self.vmas.push(Vma {
                    end: addr,
                    ..v.clone()
                });
            }
            if v.end > end {
                self.vmas.push(Vma {
                    start: end,
                    ..v.clone()
                });
            }
            let mut page = v.start.max(addr);
            let stop = v.end.min(end);
            while page < stop {
                self.release_page(page);
                page += PAGE_SIZE;
            }
        }
        Ok(())
    }

    fn release_page(&mut self, virt: u64) {
        let Some(flags) = self.mapper.flags_at(virt) else {
            return;
        };
        if flags.contains(PageFlags::SWAPPED) {
            if let Some(slot) = self.mapper.swap_slot_at(virt) {
                crate::mm::demand_paging::free_swap_slot(slot);
            }
            let _ = self.mapper.unmap(virt);
            return;
        }
        if let Ok(phys) = self.mapper.unmap(virt) {
            let frame = phys.containing_frame();
            if flags.contains(PageFlags::COW) {
                cow::drop_ref(frame);
            } else {
                frame_allocator::free(frame);
            }
        }
    }

    pub fn find(&self, addr: u64) -> Option<&Vma> {
        self.vmas.iter().find(|v| v.contains(addr))
    }

    pub fn heap_end(&self) -> u64 {
        self.heap_end
    }

    pub fn set_heap_end(&mut self, new_end: u64) {
        self.heap_end = new_end;
    }

    pub fn mapper(&self) -> &PageMapper {
        &self.mapper
    }

    /// `clone`: child AS with CoW-shared pages for private VMAs, per
    /// spec §4.3/§4.6 and invariant #4. Shared VMAs are duplicated
    /// verbatim (no CoW bit, same frame, both sides keep writing to it).
    pub fn clone_into(&self, kernel_root: FrameNumber) -> Result<Self, KernelError> {
        let mut child = Self::create(kernel_root)?;
        child.vmas = self.vmas.clone();
        child.heap_end = self.heap_end;
        child.stack_start = self.stack_start;
        self.mapper
            .clone_user_half(&child.mapper)
            .map_err(Into::<KernelError>::into)?;
        Ok(child)
    }

    /// Releases every user frame and intermediate table frame owned by
    /// this address space, then the root table itself. Called on process
    /// teardown; the kernel half (indices 256..512) is shared and must
    /// never be freed here.
    pub fn destroy(mut self) {
        let vmas = core::mem::take(&mut self.vmas);
        for v in &vmas {
            let mut page = v.start;
            while page < v.end {
                self.release_page(page);
                page += PAGE_SIZE;
            }
        }
        crate::mm::page_table::free_user_page_table_frames(self.mapper.root());
    }
}

extern crate alloc;

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn protection_rw_includes_read_and_write() {
        let p = Protection::RW;
        assert!(p.contains(Protection::READ));
        assert!(p.contains(Protection::WRITE));
        assert!(!p.contains(Protection::EXECUTE));
    }

    #[test]
    fn vma_overlap_detection() {
        let a = Vma {
            start: 0x1000,
            end: 0x2000,
            prot: Protection::RW,
            sharing: Sharing::Private,
            kind: MappingKind::Anonymous,
        };
        assert!(a.overlaps(0x1800, 0x3000));
        assert!(!a.overlaps(0x2000, 0x3000));
        assert!(!a.overlaps(0x0000, 0x1000));
    }
}
