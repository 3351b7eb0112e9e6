//! Process Control Block (PCB), spec §3/§4.6.

extern crate alloc;

use crate::error::KernelError;
use crate::mm::frame_allocator::FrameNumber;
use crate::mm::vas::AddressSpace;
use crate::sched::task::Priority;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, AtomicU8, Ordering};
use spin::Mutex;

/// `New → Ready → Running ⇄ Blocked/Sleeping → Ready → … → Zombie →
/// Terminated`. A process is Zombie iff every one of its threads has
/// reached at least Zombie; `reap` is the only transition into Terminated.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ProcessState {
    New = 0,
    Ready = 1,
    Running = 2,
    Blocked = 3,
    Zombie = 4,
    Terminated = 5,
}

impl ProcessState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => ProcessState::New,
            1 => ProcessState::Ready,
            2 => ProcessState::Running,
            3 => ProcessState::Blocked,
            4 => ProcessState::Zombie,
            _ => ProcessState::Terminated,
        }
    }
}

/// User/group identity, checked by the syscall permission gate. Root (uid
/// 0) bypasses every permission bit, per spec §4.8 step 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecurityIdentity {
    pub uid: u32,
    pub gid: u32,
    pub euid: u32,
    pub egid: u32,
}

impl SecurityIdentity {
    pub const fn new(uid: u32, gid: u32) -> Self {
        Self {
            uid,
            gid,
            euid: uid,
            egid: gid,
        }
    }

    pub fn is_root(&self) -> bool {
        self.euid == 0
    }
}

/// Per-process resource accounting named in the spec's data model.
#[derive(Debug, Default)]
pub struct ProcessAccounting {
    pub cpu_time_ms: AtomicU64,
    pub page_faults: AtomicU64,
    pub context_switches: AtomicU64,
}

/// Game Mode: a per-process flag bundle, spec §4.6. Raises effective
/// priority one band, hints the eviction policy to spare this process's
/// anonymous pages last, and exposes a bit I/O-policy consumers outside
/// this core may read.
#[derive(Debug, Default)]
pub struct GameMode {
    enabled: AtomicBool,
}

impl GameMode {
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub(crate) fn set(&self, on: bool) -> bool {
        self.enabled.swap(on, Ordering::AcqRel) != on
    }
}

/// The Process Control Block.
pub struct Process {
    pub pid: u64,
    pub parent: Option<u64>,
    pub name: String,
    state: AtomicU8,
    /// The priority `process_create` was called with; restored when Game
    /// Mode is cleared.
    pub base_priority: Priority,
    pub security: SecurityIdentity,
    /// `None` once a Zombie process has had its address space torn down
    /// by `exit`; the PCB itself survives until `reap`.
    pub address_space: Mutex<Option<AddressSpace>>,
    /// Open-descriptor table, shared by reference across `fork` per spec
    /// §4.6's fork semantics.
    pub descriptors: Arc<Mutex<Vec<i32>>>,
    pub threads: Mutex<Vec<u64>>,
    pub children: Mutex<Vec<u64>>,
    pub exit_code: AtomicI32,
    pub accounting: ProcessAccounting,
    pub game_mode: GameMode,
}

impl Process {
    pub fn new(
        pid: u64,
        parent: Option<u64>,
        name: String,
        priority: Priority,
        security: SecurityIdentity,
        address_space: AddressSpace,
    ) -> Self {
        Self {
            pid,
            parent,
            name,
            state: AtomicU8::new(ProcessState::New as u8),
            base_priority: priority,
            security,
            address_space: Mutex::new(Some(address_space)),
            descriptors: Arc::new(Mutex::new(alloc::vec![0, 1, 2])),
            threads: Mutex::new(Vec::new()),
            children: Mutex::new(Vec::new()),
            exit_code: AtomicI32::new(0),
            accounting: ProcessAccounting::default(),
            game_mode: GameMode::default(),
        }
    }

    pub fn state(&self) -> ProcessState {
        ProcessState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, state: ProcessState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub fn root_frame(&self) -> Option<FrameNumber> {
        self.address_space.lock().as_ref().map(AddressSpace::root_frame)
    }

    /// The priority this process's threads should run at right now:
    /// `base_priority` raised one band while Game Mode is on, capped below
    /// `Critical`.
    pub fn effective_priority(&self) -> Priority {
        if self.game_mode.is_enabled() {
            self.base_priority.raise_one_band()
        } else {
            self.base_priority
        }
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn root_is_privileged() {
        assert!(SecurityIdentity::new(0, 0).is_root());
        assert!(!SecurityIdentity::new(1000, 1000).is_root());
    }

    #[test]
    fn game_mode_toggle_reports_change() {
        let gm = GameMode::default();
        assert!(gm.set(true));
        assert!(!gm.set(true));
        assert!(gm.set(false));
    }
}
