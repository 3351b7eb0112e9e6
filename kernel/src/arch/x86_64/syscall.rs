//! Legacy `int 0x80` syscall gate entry point.
//!
//! Naked so every general-purpose register the ABI might carry an argument
//! in survives the trap intact; this is where the raw machine trap becomes
//! the argument tuple [`syscall::dispatch`] actually wants. Grounded in the
//! teacher's `SYSCALL`/`SYSRET` entry (`arch/x86_64/syscall.rs`) but
//! adapted to the interrupt-gate convention this kernel's IDT uses instead
//! of the `SYSCALL` instruction.

use crate::syscall;
use x86_64::structures::idt::InterruptDescriptorTable;
use x86_64::{PrivilegeLevel, VirtAddr};

/// The register file as the naked trampoline leaves it on the kernel
/// stack, lowest address first (i.e. in push order, reversed).
#[repr(C)]
struct TrapRegs {
    r15: u64,
    r14: u64,
    r13: u64,
    r12: u64,
    r11: u64,
    r10: u64,
    r9: u64,
    r8: u64,
    rbp: u64,
    rdi: u64,
    rsi: u64,
    rdx: u64,
    rcx: u64,
    rbx: u64,
    rax: u64,
}

/// Called from `syscall_entry_naked` with every GPR saved on the current
/// kernel stack. Dispatches to [`syscall::dispatch`] and writes the return
/// value back into the saved `rax` slot, which the trampoline restores
/// into the real `rax` right before `iretq`.
#[no_mangle]
extern "C" fn syscall_trap_dispatch(regs: *mut TrapRegs) {
    // SAFETY: `regs` points at the register block `syscall_entry_naked`
    // just pushed on this CPU's own stack, and nothing else touches it
    // while this function runs.
    let regs = unsafe { &mut *regs };
    let result = syscall::dispatch(regs.rax, regs.rdi, regs.rsi, regs.rdx, regs.r10, regs.r8, regs.r9);
    regs.rax = result as u64;
}

#[unsafe(naked)]
unsafe extern "C" fn syscall_entry_naked() {
    core::arch::naked_asm!(
        "push rax",
        "push rbx",
        "push rcx",
        "push rdx",
        "push rsi",
        "push rdi",
        "push rbp",
        "push r8",
        "push r9",
        "push r10",
        "push r11",
        "push r12",
        "push r13",
        "push r14",
        "push r15",
        "mov rdi, rsp",
        "call {dispatch}",
        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop r11",
        "pop r10",
        "pop r9",
        "pop r8",
        "pop rbp",
        "pop rdi",
        "pop rsi",
        "pop rdx",
        "pop rcx",
        "pop rbx",
        "pop rax",
        "iretq",
        dispatch = sym syscall_trap_dispatch,
    );
}

/// Points `idt[vector]` at the naked trampoline instead of an
/// `extern "x86-interrupt"` handler, and marks the gate callable from ring
/// 3 so user-mode `int 0x80` actually reaches it.
///
/// # Safety
/// Must run before `idt.load()`, and `vector` must not already be in use
/// for a CPU exception.
pub unsafe fn install(idt: &mut InterruptDescriptorTable, vector: u8) {
    // SAFETY: `syscall_entry_naked` preserves and restores every register
    // the caller's context requires and ends in `iretq`, matching the
    // contract `set_handler_addr` imposes on a raw handler address.
    unsafe {
        idt[vector as usize]
            .set_handler_addr(VirtAddr::new(syscall_entry_naked as usize as u64))
            .set_privilege_level(PrivilegeLevel::Ring3);
    }
}
