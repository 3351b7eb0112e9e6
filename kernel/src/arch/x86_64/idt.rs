//! Interrupt Descriptor Table: CPU exceptions, the timer tick, and the
//! `int 0x80` syscall gate.

use super::gdt::DOUBLE_FAULT_IST_INDEX;
use super::pics::{notify_end_of_interrupt, TIMER_INTERRUPT_ID};
use crate::serial_println;
use lazy_static::lazy_static;
use x86_64::structures::idt::{InterruptDescriptorTable, InterruptStackFrame, PageFaultErrorCode};

/// Software interrupt vector user-mode traps into for a syscall, matching
/// the classic x86 `int 0x80` convention this lineage's arch layer uses.
pub const SYSCALL_INTERRUPT_ID: u8 = 0x80;

lazy_static! {
    static ref IDT: InterruptDescriptorTable = {
        let mut idt = InterruptDescriptorTable::new();
        idt.breakpoint.set_handler_fn(breakpoint_handler);
        // SAFETY: DOUBLE_FAULT_IST_INDEX names a stack set up in gdt::init,
        // which always runs before idt::init.
        unsafe {
            idt.double_fault
                .set_handler_fn(double_fault_handler)
                .set_stack_index(DOUBLE_FAULT_IST_INDEX);
        }
        idt.page_fault.set_handler_fn(page_fault_handler);
        idt[TIMER_INTERRUPT_ID as usize].set_handler_fn(timer_interrupt_handler);
        // SAFETY: runs here, before `IDT.load()` in `init`, and vector 0x80
        // is reserved for syscalls only.
        unsafe {
            super::syscall::install(&mut idt, SYSCALL_INTERRUPT_ID);
        }
        idt
    };
}

pub fn init() {
    IDT.load();
}

extern "x86-interrupt" fn breakpoint_handler(stack_frame: InterruptStackFrame) {
    serial_println!("[IDT] breakpoint\n{:#?}", stack_frame);
}

extern "x86-interrupt" fn double_fault_handler(
    stack_frame: InterruptStackFrame,
    error_code: u64,
) -> ! {
    panic!(
        "double fault (error code {:#x})\n{:#?}",
        error_code, stack_frame
    );
}

extern "x86-interrupt" fn page_fault_handler(
    stack_frame: InterruptStackFrame,
    error_code: PageFaultErrorCode,
) {
    let faulting_address = x86_64::registers::control::Cr2::read();
    let write = error_code.contains(PageFaultErrorCode::CAUSED_BY_WRITE);
    let present = error_code.contains(PageFaultErrorCode::PROTECTION_VIOLATION);
    let user = error_code.contains(PageFaultErrorCode::USER_MODE);

    let fault = crate::mm::page_fault::FaultInfo {
        address: faulting_address.as_u64(),
        write,
        present,
        user,
    };

    match crate::mm::page_fault::handle(fault) {
        Ok(()) => {}
        Err(e) => {
            if user {
                crate::mm::page_fault::deliver_fatal(e, &fault);
            } else {
                panic!(
                    "unrecoverable kernel page fault at {:?}: {:?}\n{:#?}",
                    faulting_address, e, stack_frame
                );
            }
        }
    }
}

extern "x86-interrupt" fn timer_interrupt_handler(_stack_frame: InterruptStackFrame) {
    crate::sched::scheduler::tick();
    notify_end_of_interrupt(TIMER_INTERRUPT_ID);
}

