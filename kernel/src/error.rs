//! Crate-wide error currency.
//!
//! Every fallible kernel operation ultimately resolves to a [`KernelError`].
//! Subsystems with a narrower failure surface define their own error enum
//! and provide a `From` conversion into this one, so call sites deep in a
//! subsystem can use `?` against their local error type while callers at a
//! module boundary see the one taxonomy from spec §7.

use core::fmt;

/// The result type returned by nearly every kernel API.
pub type KernelResult<T> = Result<T, KernelError>;

/// The crate-wide error taxonomy.
///
/// Variants carry enough payload to print a useful diagnostic and to encode
/// a stable negative-integer errno at the syscall boundary. Adding a field
/// to a variant is not a breaking change to callers that only match on the
/// discriminant.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// Caller-supplied arguments are malformed or out of range.
    Inval,
    /// Physical frames, kernel heap, or swap could not satisfy a request.
    NoMemory { requested: usize, available: usize },
    /// A user pointer did not resolve to a valid mapping with the required
    /// protection.
    Fault { addr: u64 },
    /// Caller lacks the permission bit the operation requires.
    Perm,
    /// No process with the given id exists.
    NoSuchProcess { pid: u64 },
    /// No thread with the given id exists.
    NoSuchThread { tid: u64 },
    /// No syscall with the given number is registered.
    NoSuchCall { number: usize },
    /// Target is engaged in an operation incompatible with the request
    /// (e.g. reaping a process that is not yet a zombie).
    Busy,
    /// A deadline expired before the operation completed.
    TimedOut,
    /// A blocking operation was cancelled before it completed.
    Interrupted,
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelError::Inval => write!(f, "invalid argument"),
            KernelError::NoMemory { requested, available } => write!(
                f,
                "out of memory: requested {requested} bytes, {available} available"
            ),
            KernelError::Fault { addr } => write!(f, "fault at address {addr:#x}"),
            KernelError::Perm => write!(f, "permission denied"),
            KernelError::NoSuchProcess { pid } => write!(f, "no such process: {pid}"),
            KernelError::NoSuchThread { tid } => write!(f, "no such thread: {tid}"),
            KernelError::NoSuchCall { number } => write!(f, "no such syscall: {number}"),
            KernelError::Busy => write!(f, "resource busy"),
            KernelError::TimedOut => write!(f, "operation timed out"),
            KernelError::Interrupted => write!(f, "operation interrupted"),
        }
    }
}

impl KernelError {
    /// Encodes this error as the small negative integer a syscall handler
    /// returns to userland, per spec §7/§4.8 step 6.
    pub const fn to_errno(self) -> isize {
        let code = match self {
            KernelError::Inval => 1,
            KernelError::NoMemory { .. } => 2,
            KernelError::Fault { .. } => 3,
            KernelError::Perm => 4,
            KernelError::NoSuchProcess { .. } => 5,
            KernelError::NoSuchThread { .. } => 6,
            KernelError::NoSuchCall { .. } => 7,
            KernelError::Busy => 8,
            KernelError::TimedOut => 9,
            KernelError::Interrupted => 10,
        };
        -(code as isize)
    }
}

/// Failure modes specific to the physical frame allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameAllocatorError {
    /// The free list is empty.
    OutOfFrames,
    /// `free` was called on a frame that was not marked Used.
    DoubleFree { frame: u64 },
}

impl From<FrameAllocatorError> for KernelError {
    fn from(e: FrameAllocatorError) -> Self {
        match e {
            FrameAllocatorError::OutOfFrames => KernelError::NoMemory {
                requested: 1,
                available: 0,
            },
            FrameAllocatorError::DoubleFree { .. } => KernelError::Inval,
        }
    }
}

/// Failure modes specific to the page table engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageTableError {
    /// No mapping exists at the requested virtual address.
    NotMapped { virt: u64 },
    /// A mapping already exists where a fresh one was requested.
    AlreadyMapped { virt: u64 },
    /// The frame allocator could not supply a frame for a new table level.
    OutOfFrames,
}

impl From<PageTableError> for KernelError {
    fn from(e: PageTableError) -> Self {
        match e {
            PageTableError::NotMapped { virt } => KernelError::Fault { addr: virt },
            PageTableError::AlreadyMapped { .. } => KernelError::Inval,
            PageTableError::OutOfFrames => KernelError::NoMemory {
                requested: 1,
                available: 0,
            },
        }
    }
}

/// Failure modes specific to the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerError {
    /// No thread with the given id is known to the scheduler.
    NoSuchThread { tid: u64 },
    /// The named wait queue does not exist.
    NoSuchWaitQueue,
}

impl From<SchedulerError> for KernelError {
    fn from(e: SchedulerError) -> Self {
        match e {
            SchedulerError::NoSuchThread { tid } => KernelError::NoSuchThread { tid },
            SchedulerError::NoSuchWaitQueue => KernelError::Inval,
        }
    }
}

/// Convenience macro for building a [`KernelError`] without repeating the
/// enum path at every call site.
#[macro_export]
macro_rules! kernel_error {
    (inval) => {
        $crate::error::KernelError::Inval
    };
    (no_memory, $requested:expr, $available:expr) => {
        $crate::error::KernelError::NoMemory {
            requested: $requested,
            available: $available,
        }
    };
    (fault, $addr:expr) => {
        $crate::error::KernelError::Fault { addr: $addr }
    };
    (perm) => {
        $crate::error::KernelError::Perm
    };
}
