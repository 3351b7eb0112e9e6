//! Demand-Paging and Swap Controller (DPS), spec §4.4.
//!
//! Owns the policy `frame_allocator` and `page_table` deliberately don't:
//! which frame to evict under pressure, where a swapped-out page's
//! contents live, and how to resolve the four fault cases a trap hands
//! it. `page_fault` adapts the CPU's own fault into a call here; the
//! kernel-side `copy_in`/`copy_out` used by the syscall layer route
//! through the same [`resolve_fault`] so a not-yet-resident page faults in
//! identically whether the access came from user code or `copy_in`.

use crate::error::KernelError;
use crate::mm::frame_allocator::{self, FrameNumber, FRAME_SIZE};
use crate::mm::page_table::{self, PageFlags};
use crate::mm::vas::{MappingKind, Protection, PAGE_SIZE};
use crate::mm::{cow, user_validation};
use crate::process;
use alloc::collections::{BTreeMap, VecDeque};
use spin::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionPolicy {
    Lru,
    Fifo,
    Clock,
}

static POLICY: Mutex<EvictionPolicy> = Mutex::new(EvictionPolicy::Clock);

pub fn set_policy(policy: EvictionPolicy) {
    *POLICY.lock() = policy;
}

pub fn policy() -> EvictionPolicy {
    *POLICY.lock()
}

/// Bookkeeping `frame_allocator` itself doesn't keep: which address space
/// and virtual address a frame currently backs, and the data an eviction
/// policy needs to pick a victim.
struct Owner {
    pid: u64,
    virt: u64,
    last_access: u64,
    accessed: bool,
}

struct Registry {
    owners: BTreeMap<FrameNumber, Owner>,
    /// Insertion order, for FIFO/Clock. A frame appears at most once.
    order: VecDeque<FrameNumber>,
    clock_hand: usize,
}

impl Registry {
    const fn empty() -> Self {
        Self {
            owners: BTreeMap::new(),
            order: VecDeque::new(),
            clock_hand: 0,
        }
    }
}

static REGISTRY: Mutex<Registry> = Mutex::new(Registry::empty());

fn register_owner(frame: FrameNumber, pid: u64, virt: u64) {
    let mut reg = REGISTRY.lock();
    reg.owners.insert(
        frame,
        Owner {
            pid,
            virt,
            last_access: crate::timer::now_ms(),
            accessed: true,
        },
    );
    reg.order.push_back(frame);
}

pub fn unregister_owner(frame: FrameNumber) {
    let mut reg = REGISTRY.lock();
    reg.owners.remove(&frame);
    if let Some(pos) = reg.order.iter().position(|f| *f == frame) {
        reg.order.remove(pos);
        if pos < reg.clock_hand {
            reg.clock_hand -= 1;
        }
    }
}

fn touch(frame: FrameNumber) {
    let mut reg = REGISTRY.lock();
    let now = crate::timer::now_ms();
    if let Some(o) = reg.owners.get_mut(&frame) {
        o.last_access = now;
        o.accessed = true;
    }
}

/// Only frames not currently CoW-shared are evictable: evicting one side
/// of a shared page would corrupt the other.
fn evictable(reg: &Registry, frame: FrameNumber) -> bool {
    reg.owners.contains_key(&frame) && cow::ref_count(frame) == 1
}

fn select_victim() -> Option<(FrameNumber, u64, u64)> {
    let mut reg = REGISTRY.lock();
    match policy() {
        EvictionPolicy::Lru => {
            let victim = reg
                .owners
                .iter()
                .filter(|(f, _)| cow::ref_count(**f) == 1)
                .min_by_key(|(_, o)| o.last_access)
                .map(|(f, o)| (*f, o.pid, o.virt));
            victim
        }
        EvictionPolicy::Fifo => {
            let found = reg.order.iter().find(|f| evictable(&reg, **f)).copied();
            found.map(|f| {
                let o = &reg.owners[&f];
                (f, o.pid, o.virt)
            })
        }
        EvictionPolicy::Clock => {
            let len = reg.order.len();
            if len == 0 {
                return None;
            }
            let mut attempts = 0;
            loop {
                if attempts >= 2 * len {
                    break None;
                }
                let idx = reg.clock_hand % len;
                let frame = reg.order[idx];
                reg.clock_hand = (reg.clock_hand + 1) % len;
                if !evictable(&reg, frame) {
                    attempts += 1;
                    continue;
                }
                let accessed = reg.owners.get(&frame).map(|o| o.accessed).unwrap_or(false);
                if accessed {
                    if let Some(o) = reg.owners.get_mut(&frame) {
                        o.accessed = false;
                    }
                    attempts += 1;
                    continue;
                }
                let o = &reg.owners[&frame];
                break Some((frame, o.pid, o.virt));
            }
        }
    }
}

// --- Swap store -------------------------------------------------------

pub const SWAP_SLOTS: usize = 1024;

struct SwapBitmap {
    used: [bool; SWAP_SLOTS],
    next_hint: usize,
}

impl SwapBitmap {
    const fn empty() -> Self {
        Self {
            used: [false; SWAP_SLOTS],
            next_hint: 0,
        }
    }

    fn alloc(&mut self) -> Option<u32> {
        for i in 0..SWAP_SLOTS {
            let idx = (self.next_hint + i) % SWAP_SLOTS;
            if !self.used[idx] {
                self.used[idx] = true;
                self.next_hint = (idx + 1) % SWAP_SLOTS;
                return Some(idx as u32);
            }
        }
        None
    }

    fn free(&mut self, slot: u32) {
        self.used[slot as usize] = false;
    }

    fn used_count(&self) -> usize {
        self.used.iter().filter(|b| **b).count()
    }
}

static SWAP_BITMAP: Mutex<SwapBitmap> = Mutex::new(SwapBitmap::empty());
/// The swap region itself: a fixed reserved block, per spec §3's "Swap
/// Slot" glossary entry ("a fixed-size bitmap over a contiguous swap
/// region"). A real deployment would back this with disk I/O; this
/// kernel's swap device is simply more physical-adjacent memory.
static mut SWAP_STORE: [[u8; FRAME_SIZE]; SWAP_SLOTS] = [[0; FRAME_SIZE]; SWAP_SLOTS];

fn swap_store_ptr(slot: u32) -> *mut u8 {
    // SAFETY: `slot` is always a value previously returned by
    // `SwapBitmap::alloc`, so `slot < SWAP_SLOTS`.
    unsafe { (core::ptr::addr_of_mut!(SWAP_STORE) as *mut u8).add(slot as usize * FRAME_SIZE) }
}

/// Releases a swap slot without reading it back. Called both after a
/// successful swap-in and when an address space unmaps (or tears down) a
/// VMA whose page is currently swapped out.
pub fn free_swap_slot(slot: u32) {
    SWAP_BITMAP.lock().free(slot);
}

pub fn swap_slots_used() -> usize {
    SWAP_BITMAP.lock().used_count()
}

// --- Fault resolution ---------------------------------------------------

fn alloc_frame_with_eviction() -> Result<FrameNumber, KernelError> {
    if let Some(f) = frame_allocator::alloc() {
        return Ok(f);
    }
    evict_one()?;
    frame_allocator::alloc().ok_or(KernelError::NoMemory {
        requested: 1,
        available: frame_allocator::free_count(),
    })
}

fn evict_one() -> Result<(), KernelError> {
    let (victim, pid, virt) = select_victim().ok_or(KernelError::NoMemory {
        requested: 1,
        available: 0,
    })?;

    let is_clean_file = process::with_address_space(pid, |aspace| {
        matches!(aspace.find(virt), Some(v) if v.kind == MappingKind::File)
    })
    .unwrap_or(false);

    if is_clean_file {
        process::with_address_space(pid, |aspace| {
            let _ = aspace.mapper().unmap(virt);
        });
        unregister_owner(victim);
        frame_allocator::free(victim);
        return Ok(());
    }

    let slot = SWAP_BITMAP.lock().alloc().ok_or(KernelError::NoMemory {
        requested: 1,
        available: 0,
    })?;
    // SAFETY: `slot` was just reserved exclusively for this eviction, and
    // `victim` is a present, mapped, exclusively-owned frame.
    unsafe {
        core::ptr::copy_nonoverlapping(
            page_table::phys_to_virt_ptr(victim.start_address()),
            swap_store_ptr(slot),
            FRAME_SIZE,
        );
    }
    process::with_address_space(pid, |aspace| {
        let _ = aspace.mapper().unmap(virt);
        let _ = aspace.mapper().mark_swapped(virt, slot);
    });
    unregister_owner(victim);
    frame_allocator::free(victim);
    Ok(())
}

fn zero_frame(frame: FrameNumber) {
    // SAFETY: `frame` was just allocated and is not yet reachable from any
    // page table, so nothing else can observe it mid-write.
    unsafe {
        core::ptr::write_bytes(page_table::phys_to_virt_ptr(frame.start_address()), 0, FRAME_SIZE);
    }
}

/// Resolves a fault at `addr` in `pid`'s address space. `write` is
/// whether the access that faulted was a write. Implements the four
/// cases of spec §4.4; anything else is a genuine access violation.
pub fn resolve_fault(pid: u64, addr: u64, write: bool) -> Result<(), KernelError> {
    let page = addr & !(PAGE_SIZE - 1);

    let (vma, flags) = process::with_address_space(pid, |aspace| {
        (aspace.find(page).cloned(), aspace.mapper().flags_at(page))
    })
    .ok_or(KernelError::NoSuchProcess { pid })?;

    let Some(vma) = vma else {
        return Err(KernelError::Fault { addr });
    };
    if !vma.prot.contains(Protection::READ) || (write && !vma.prot.contains(Protection::WRITE)) {
        return Err(KernelError::Fault { addr });
    }

    match flags {
        None => {
            let frame = alloc_frame_with_eviction()?;
            zero_frame(frame);
            let install_flags = vma.prot.to_page_flags();
            process::with_address_space(pid, |aspace| {
                aspace.mapper().map(page, frame.start_address(), install_flags)
            })
            .ok_or(KernelError::NoSuchProcess { pid })?
            .map_err(KernelError::from)?;
            register_owner(frame, pid, page);
            Ok(())
        }
        Some(f) if f.contains(PageFlags::SWAPPED) => {
            let slot = process::with_address_space(pid, |aspace| aspace.mapper().swap_slot_at(page))
                .flatten()
                .ok_or(KernelError::Fault { addr })?;
            let frame = alloc_frame_with_eviction()?;
            // SAFETY: `slot` was populated by a prior eviction and is read
            // here exactly once, before being freed below.
            unsafe {
                core::ptr::copy_nonoverlapping(
                    swap_store_ptr(slot),
                    page_table::phys_to_virt_ptr(frame.start_address()),
                    FRAME_SIZE,
                );
            }
            free_swap_slot(slot);
            let install_flags = vma.prot.to_page_flags();
            process::with_address_space(pid, |aspace| {
                aspace.mapper().clear(page);
                aspace.mapper().map(page, frame.start_address(), install_flags)
            })
            .ok_or(KernelError::NoSuchProcess { pid })?
            .map_err(KernelError::from)?;
            register_owner(frame, pid, page);
            Ok(())
        }
        Some(f) if write && f.contains(PageFlags::COW) => {
            let old_phys = process::with_address_space(pid, |aspace| aspace.mapper().translate(page))
                .flatten()
                .ok_or(KernelError::Fault { addr })?;
            let old_frame = old_phys.containing_frame();
            let new_frame = alloc_frame_with_eviction()?;
            // SAFETY: `old_frame` is present and mapped; `new_frame` was
            // just allocated and is not yet reachable from any page table.
            unsafe {
                core::ptr::copy_nonoverlapping(
                    page_table::phys_to_virt_ptr(old_frame.start_address()),
                    page_table::phys_to_virt_ptr(new_frame.start_address()),
                    FRAME_SIZE,
                );
            }
            let install_flags = vma.prot.to_page_flags();
            process::with_address_space(pid, |aspace| {
                let _ = aspace.mapper().unmap(page);
                aspace.mapper().map(page, new_frame.start_address(), install_flags)
            })
            .ok_or(KernelError::NoSuchProcess { pid })?
            .map_err(KernelError::from)?;
            cow::drop_ref(old_frame);
            register_owner(new_frame, pid, page);
            Ok(())
        }
        Some(_) => Err(KernelError::Fault { addr }),
    }
}

fn ensure_resident(pid: u64, page: u64, write: bool) -> Result<(), KernelError> {
    let present = process::with_address_space(pid, |aspace| {
        aspace
            .mapper()
            .flags_at(page)
            .map(|f| f.contains(PageFlags::PRESENT) && (!write || f.contains(PageFlags::WRITABLE)))
            .unwrap_or(false)
    })
    .ok_or(KernelError::NoSuchProcess { pid })?;
    if present {
        return Ok(());
    }
    resolve_fault(pid, page, write)
}

fn translate(pid: u64, addr: u64) -> Result<frame_allocator::PhysicalAddress, KernelError> {
    process::with_address_space(pid, |aspace| aspace.mapper().translate(addr))
        .ok_or(KernelError::NoSuchProcess { pid })?
        .ok_or(KernelError::Fault { addr })
}

/// Copies `len` bytes from user address `src_user` in the current
/// process's address space into the kernel buffer `dst`, faulting in any
/// not-yet-resident page along the way. Used by every syscall that reads
/// a user buffer.
pub fn copy_in(dst: &mut [u8], src_user: u64, len: usize) -> Result<(), KernelError> {
    assert!(dst.len() >= len);
    let pid = process::current_pid().ok_or(KernelError::Fault { addr: src_user })?;
    user_validation::validate_range(pid, src_user, len, Protection::READ)?;

    let mut done = 0usize;
    while done < len {
        let addr = src_user + done as u64;
        let page = addr & !(PAGE_SIZE - 1);
        let offset_in_page = (addr - page) as usize;
        let chunk = core::cmp::min(len - done, FRAME_SIZE - offset_in_page);
        ensure_resident(pid, page, false)?;
        let phys = translate(pid, addr)?;
        // SAFETY: `phys` was just resolved present via the direct physical
        // map, and `chunk` was sized to stay within both the source page
        // and `dst`.
        unsafe {
            core::ptr::copy_nonoverlapping(
                page_table::phys_to_virt_ptr(phys),
                dst[done..].as_mut_ptr(),
                chunk,
            );
        }
        touch(phys.containing_frame());
        done += chunk;
    }
    Ok(())
}

/// Copies `src` into user address `dst_user` in the current process's
/// address space, faulting in (and CoW-materializing) any page along the
/// way. Used by every syscall that writes a user buffer.
pub fn copy_out(dst_user: u64, src: &[u8]) -> Result<(), KernelError> {
    let pid = process::current_pid().ok_or(KernelError::Fault { addr: dst_user })?;
    user_validation::validate_range(pid, dst_user, src.len(), Protection::WRITE)?;

    let mut done = 0usize;
    while done < src.len() {
        let addr = dst_user + done as u64;
        let page = addr & !(PAGE_SIZE - 1);
        let offset_in_page = (addr - page) as usize;
        let chunk = core::cmp::min(src.len() - done, FRAME_SIZE - offset_in_page);
        ensure_resident(pid, page, true)?;
        let phys = translate(pid, addr)?;
        // SAFETY: `phys` was just resolved present and writable via the
        // direct physical map, and `chunk` stays within the destination
        // page and `src`.
        unsafe {
            core::ptr::copy_nonoverlapping(
                src[done..].as_ptr(),
                page_table::phys_to_virt_ptr(phys),
                chunk,
            );
        }
        touch(phys.containing_frame());
        done += chunk;
    }
    Ok(())
}

/// Copies a NUL-terminated user string of at most `max_len` bytes
/// (terminator excluded) into `dst`, returning the copied length. Used by
/// syscalls that take a `*const char` argument.
pub fn copy_in_string(dst: &mut [u8], src_user: u64, max_len: usize) -> Result<usize, KernelError> {
    let pid = process::current_pid().ok_or(KernelError::Fault { addr: src_user })?;
    let mut len = 0usize;
    while len < max_len {
        let addr = src_user + len as u64;
        user_validation::validate_range(pid, addr, 1, Protection::READ)?;
        let page = addr & !(PAGE_SIZE - 1);
        ensure_resident(pid, page, false)?;
        let phys = translate(pid, addr)?;
        // SAFETY: `phys` was just resolved present via the direct physical
        // map; reading one byte never crosses a page boundary.
        let byte = unsafe { *page_table::phys_to_virt_ptr(phys) };
        if byte == 0 {
            return Ok(len);
        }
        if len < dst.len() {
            dst[len] = byte;
        }
        len += 1;
    }
    Err(KernelError::Inval)
}

extern crate alloc;

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn swap_bitmap_alloc_then_free_is_reusable() {
        let mut bm = SwapBitmap::empty();
        let slot = bm.alloc().unwrap();
        assert_eq!(bm.used_count(), 1);
        bm.free(slot);
        assert_eq!(bm.used_count(), 0);
    }

    #[test]
    fn swap_bitmap_exhaustion_returns_none() {
        let mut bm = SwapBitmap::empty();
        for _ in 0..SWAP_SLOTS {
            assert!(bm.alloc().is_some());
        }
        assert!(bm.alloc().is_none());
    }

    #[test]
    fn default_policy_is_clock() {
        assert_eq!(policy(), EvictionPolicy::Clock);
    }

    #[test]
    fn set_policy_round_trips() {
        set_policy(EvictionPolicy::Lru);
        assert_eq!(policy(), EvictionPolicy::Lru);
        set_policy(EvictionPolicy::Clock);
    }
}
