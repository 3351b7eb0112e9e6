pub mod context;
pub mod gdt;
pub mod idt;
pub mod pics;
pub mod syscall;

/// Performs all architecture bring-up that must happen before any other
/// subsystem touches the CPU's protection or interrupt state: GDT/TSS
/// (so a double fault has its own stack), IDT (so faults and the timer
/// have handlers installed before interrupts are ever unmasked), and the
/// legacy 8259 PIC remap (so its vectors don't collide with CPU
/// exceptions 0-31).
pub fn init() {
    gdt::init();
    idt::init();
    pics::init();
}
