//! Ordered boot sequence, run exactly once from `main`'s `entry_point!`
//! callback.
//!
//! Each subsystem's own `init` documents what must already be true before it
//! runs; this function exists only to call them in that order and nowhere
//! else, so the dependency graph lives in one place instead of being
//! reconstructed from doc comments scattered across the tree.

use bootloader_api::BootInfo;

/// Brings up every subsystem and hands control to the scheduler. Never
/// returns: the last step, `sched::scheduler::start`, switches into the
/// idle thread's context and this stack frame is never resumed.
pub fn init(boot_info: &'static mut BootInfo) -> ! {
    crate::arch::target::init();

    // SAFETY: this is the one and only call to `mm::init` in the kernel's
    // lifetime, made before any other subsystem allocates a frame or maps a
    // page, with `boot_info` untouched up to this point.
    unsafe { crate::mm::init(boot_info) };

    if let Some(framebuffer) = boot_info.framebuffer.as_mut() {
        crate::print::WRITER.lock().install(framebuffer);
    }

    crate::println!("raeen-kernel {} ({})", env!("GIT_HASH"), env!("BUILD_TIMESTAMP"));
    crate::serial_println!(
        "[BOOT] raeen-kernel starting, commit {}, built at {}",
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP")
    );

    crate::process::init();
    crate::sched::scheduler::init();
    crate::timer::init();

    crate::serial_println!(
        "[BOOT] {} physical frames available, self-test complete",
        crate::mm::frame_allocator::free_count()
    );

    // SAFETY: every handler the IDT needs is installed (arch::target::init,
    // above) and the scheduler has an idle thread to dispatch
    // (sched::scheduler::init, above); nothing before this point relies on
    // interrupts being enabled.
    x86_64::instructions::interrupts::enable();

    crate::sched::scheduler::start();
}
