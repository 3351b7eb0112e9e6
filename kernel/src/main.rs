//! Freestanding kernel image entry point.
//!
//! `bootloader_api::entry_point!` generates the real `_start` and hands us a
//! `&'static mut BootInfo` already past real-mode/long-mode setup; all
//! kernel-proper bring-up happens in [`raeen_kernel::bootstrap::init`].

#![no_std]
#![no_main]

use bootloader_api::{entry_point, BootInfo};
use core::panic::PanicInfo;

entry_point!(kernel_main);

fn kernel_main(boot_info: &'static mut BootInfo) -> ! {
    raeen_kernel::bootstrap::init(boot_info)
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    raeen_kernel::serial_println!("[PANIC] {}", info);
    raeen_kernel::println!("kernel panic: {}", info);
    loop {
        x86_64::instructions::hlt();
    }
}
