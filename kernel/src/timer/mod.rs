//! Programmable Interval Timer: the source of the 1 ms preemption tick
//! required by spec §4.7.

use core::sync::atomic::{AtomicU64, Ordering};
use x86_64::instructions::port::Port;

const PIT_FREQUENCY_HZ: u32 = 1_193_182;
const TARGET_HZ: u32 = 1000;
const PIT_CHANNEL0: u16 = 0x40;
const PIT_COMMAND: u16 = 0x43;

static TICKS: AtomicU64 = AtomicU64::new(0);

/// Programs PIT channel 0 for a 1 kHz square wave (mode 3) and resets the
/// millisecond counter. Must run once during boot before interrupts are
/// unmasked.
pub fn init() {
    let divisor = (PIT_FREQUENCY_HZ / TARGET_HZ) as u16;

    // SAFETY: 0x40/0x43 are the fixed legacy PIT I/O ports; this sequence
    // (command byte, then low then high divisor byte) is the documented
    // programming protocol for channel 0, mode 3.
    unsafe {
        let mut command: Port<u8> = Port::new(PIT_COMMAND);
        let mut data: Port<u8> = Port::new(PIT_CHANNEL0);
        command.write(0x36u8);
        data.write((divisor & 0xff) as u8);
        data.write((divisor >> 8) as u8);
    }
    TICKS.store(0, Ordering::SeqCst);
}

/// Called once per timer interrupt, before the scheduler's own tick logic.
pub fn on_tick() -> u64 {
    TICKS.fetch_add(1, Ordering::SeqCst) + 1
}

/// Milliseconds elapsed since `init`, at 1 ms resolution.
pub fn now_ms() -> u64 {
    TICKS.load(Ordering::SeqCst)
}
