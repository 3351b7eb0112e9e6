//! Shared bare-metal bring-up for the kernel's integration test binaries.
//!
//! Each file under `tests/` still owns its own `entry_point!`, panic
//! handler, and test thread; this module only factors out the bring-up
//! steps identical across all of them, mirroring `bootstrap::init` minus
//! the final `scheduler::start` call — every test decides for itself what
//! thread(s) to run instead of booting straight to idle.
//!
//! Not itself a `[[test]]` target: `tests/common/mod.rs` is outside the
//! `tests/*.rs` glob Cargo uses to discover integration test binaries, so
//! each binary pulls it in with `#[path = "common/mod.rs"] mod common;`.

#![allow(dead_code)]

use bootloader_api::BootInfo;

pub fn bring_up(boot_info: &'static mut BootInfo) {
    raeen_kernel::arch::target::init();
    // SAFETY: the first and only call to `mm::init` in this test binary's
    // lifetime, with `boot_info` untouched up to this point.
    unsafe { raeen_kernel::mm::init(boot_info) };
    raeen_kernel::process::init();
    raeen_kernel::sched::scheduler::init();
    raeen_kernel::timer::init();
    x86_64::instructions::interrupts::enable();
}
