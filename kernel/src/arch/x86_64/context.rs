//! Saved CPU context and the context switch itself.
//!
//! Per the design notes, the switch is unavoidably assembly; every other
//! subsystem only ever calls [`switch`], which is pure with respect to the
//! rest of the kernel's data structures (it touches exactly the two
//! contexts and the live CPU register file).

/// A thread's saved machine state. Populated on creation with an entry
/// point and stack, and overwritten by every context switch away from the
/// thread.
#[derive(Debug, Default)]
#[repr(C)]
pub struct TaskContext {
    pub r15: u64,
    pub r14: u64,
    pub r13: u64,
    pub r12: u64,
    pub rbx: u64,
    pub rbp: u64,
    /// The stack pointer to resume at; for a never-yet-run thread this
    /// points at a synthetic stack frame that `switch`'s own `ret` unwinds
    /// into [`entry_trampoline`], which starts execution at the thread's
    /// real entry point.
    pub rsp: u64,
}

impl TaskContext {
    pub const fn empty() -> Self {
        Self {
            r15: 0,
            r14: 0,
            r13: 0,
            r12: 0,
            rbx: 0,
            rbp: 0,
            rsp: 0,
        }
    }

    /// Builds the initial context for a thread that has never run.
    ///
    /// The saved stack pointer is arranged so `switch`'s final `ret` pops
    /// [`entry_trampoline`]'s address as its return address; the trampoline
    /// then pops `entry` and `arg` off the same stack and tail-calls into
    /// the thread body with `arg` in `rdi`, matching `extern "C" fn(usize)`.
    pub fn new(stack_top: u64, entry: extern "C" fn(usize) -> !, arg: usize) -> Self {
        // SAFETY: stack_top is a valid, writable, 16-byte-aligned kernel
        // stack top handed in by the thread/process creation path, and no
        // other code touches these words until this context is first
        // switched to.
        unsafe {
            let mut sp = stack_top as *mut u64;
            sp = sp.sub(1);
            *sp = arg as u64;
            sp = sp.sub(1);
            *sp = entry as usize as u64;
            sp = sp.sub(1);
            *sp = entry_trampoline as usize as u64;

            Self {
                r15: 0,
                r14: 0,
                r13: 0,
                r12: 0,
                rbx: 0,
                rbp: 0,
                rsp: sp as u64,
            }
        }
    }
}

/// The first code a new thread ever runs. Pops the `entry`/`arg` pair
/// [`TaskContext::new`] left on the stack below its own return address and
/// jumps into the real entry point; never returns, so it needs no epilogue
/// and no stack frame of its own.
#[unsafe(naked)]
unsafe extern "C" fn entry_trampoline() -> ! {
    core::arch::naked_asm!(
        "pop rax", // entry fn pointer
        "pop rdi", // arg, in the register extern "C" fn(usize) expects it
        "jmp rax",
    );
}

/// Switches from `prev` to `next`: saves the current callee-saved
/// registers and stack pointer into `prev`, restores the same from `next`,
/// and returns with `next`'s register state live — either into whatever
/// call site last suspended `next`, or into [`entry_trampoline`] if `next`
/// has never run. Must be called with the local interrupt flag clear;
/// callers that may be re-entered by the timer (i.e. the scheduler) are
/// responsible for that via `sync::without_interrupts`.
///
/// Naked: a normal Rust function's compiler-generated prologue/epilogue
/// would manage `rbp`/`rsp` around the `asm!` block, which conflicts with
/// an `asm!` block that deliberately switches to an entirely different
/// stack out from under it. Naked makes this function's body, and nothing
/// else, own the stack and the final `ret`.
///
/// # Safety
/// `prev` and `next` must each point at a `TaskContext` that is not
/// concurrently being written by another CPU, and `next` must have been
/// produced either by a prior `switch` out of that thread or by
/// [`TaskContext::new`].
#[unsafe(naked)]
pub unsafe extern "C" fn switch(prev: *mut TaskContext, next: *const TaskContext) {
    core::arch::naked_asm!(
        // Save prev's callee-saved registers and stack pointer.
        "mov [rdi + 0x00], r15",
        "mov [rdi + 0x08], r14",
        "mov [rdi + 0x10], r13",
        "mov [rdi + 0x18], r12",
        "mov [rdi + 0x20], rbx",
        "mov [rdi + 0x28], rbp",
        "mov [rdi + 0x30], rsp",
        // Restore next's.
        "mov r15, [rsi + 0x00]",
        "mov r14, [rsi + 0x08]",
        "mov r13, [rsi + 0x10]",
        "mov r12, [rsi + 0x18]",
        "mov rbx, [rsi + 0x20]",
        "mov rbp, [rsi + 0x28]",
        "mov rsp, [rsi + 0x30]",
        "ret",
    );
}
