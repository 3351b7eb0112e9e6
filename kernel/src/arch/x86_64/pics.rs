//! Legacy 8259 Programmable Interrupt Controller.
//!
//! Remapped so IRQ0-15 land on vectors 32-47, clear of the CPU's 0-31
//! exception vectors. IRQ0 (the PIT, reprogrammed by `crate::timer` to
//! fire every millisecond) is the sole interrupt source this kernel
//! actually depends on; the remaining lines are masked until a driver
//! needs them, which is out of scope here.

use pic8259::ChainedPics;
use spin::Mutex;

pub const PIC_1_OFFSET: u8 = 32;
pub const PIC_2_OFFSET: u8 = PIC_1_OFFSET + 8;

pub const TIMER_INTERRUPT_ID: u8 = PIC_1_OFFSET;

pub static PICS: Mutex<ChainedPics> =
    // SAFETY: PIC_1_OFFSET/PIC_2_OFFSET are chosen clear of exception
    // vectors 0-31 and do not overlap each other.
    unsafe { Mutex::new(ChainedPics::new(PIC_1_OFFSET, PIC_2_OFFSET)) };

pub fn init() {
    // SAFETY: called exactly once during boot, before interrupts are
    // unmasked.
    unsafe {
        PICS.lock().initialize();
    }
}

pub fn notify_end_of_interrupt(interrupt_id: u8) {
    unsafe {
        PICS.lock().notify_end_of_interrupt(interrupt_id);
    }
}
