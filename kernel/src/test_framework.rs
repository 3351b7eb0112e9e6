//! `no_std` integration test harness.
//!
//! Unit tests under `#[cfg(test)] mod tests` blocks run on the host target
//! against `std`'s ordinary `#[test]` runner. The bare-metal integration
//! tests under `kernel/tests/` cannot: they need real page tables and a
//! real timer interrupt, so they run as freestanding `x86_64-unknown-none`
//! binaries under QEMU, report over the serial line, and signal pass/fail
//! through the `isa-debug-exit` device rather than process exit status.

use crate::{serial_print, serial_println};

/// Exit codes written to the `isa-debug-exit` I/O port. QEMU is configured
/// (`-device isa-debug-exit,iobase=0xf4,iosize=0x04`) to map these to the
/// process exit codes `(code << 1) | 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum QemuExitCode {
    Success = 0x10,
    Failed = 0x11,
}

/// Anything that can be run as one named test case and reports its own
/// name before executing, matching the teacher's convention of visible
/// per-test progress on the serial log.
pub trait Testable {
    fn run(&self);
}

impl<T> Testable for T
where
    T: Fn() -> Result<(), crate::error::KernelError>,
{
    fn run(&self) {
        serial_print!("{}...\t", core::any::type_name::<T>());
        match self() {
            Ok(()) => serial_println!("[ok]"),
            Err(e) => {
                serial_println!("[failed]\n  error: {:?}", e);
                exit_qemu(QemuExitCode::Failed);
            }
        }
    }
}

/// Entry point registered as `#[cfg(test)]`'s test runner for bare-metal
/// integration test binaries.
pub fn test_runner(tests: &[&dyn Testable]) -> ! {
    serial_println!("Running {} tests", tests.len());
    for test in tests {
        test.run();
    }
    exit_qemu(QemuExitCode::Success);
    loop {
        x86_64::instructions::hlt();
    }
}

/// Panic handler installed for bare-metal test binaries: reports the panic
/// over serial, then signals failure to the harness.
pub fn test_panic_handler(info: &core::panic::PanicInfo) -> ! {
    serial_println!("[failed]\n");
    serial_println!("Error: {}\n", info);
    exit_qemu(QemuExitCode::Failed);
    loop {
        x86_64::instructions::hlt();
    }
}

/// Writes `code` to the `isa-debug-exit` port, terminating the QEMU
/// process. Never returns.
pub fn exit_qemu(code: QemuExitCode) -> ! {
    use x86_64::instructions::port::Port;

    // SAFETY: 0xf4 is the iobase configured for `isa-debug-exit` in every
    // invocation of this crate's test runner; writing to it is defined to
    // terminate the VM and never return control here.
    unsafe {
        let mut port = Port::new(0xf4);
        port.write(code as u32);
    }
    loop {
        x86_64::instructions::hlt();
    }
}

/// Asserts `$cond`, printing `[failed]` and exiting QEMU with a failure
/// code rather than unwinding, since the bare-metal panic handler already
/// does that — this gives a less noisy failure for simple boolean checks.
#[macro_export]
macro_rules! kernel_assert {
    ($cond:expr) => {
        if !$cond {
            $crate::serial_println!("[failed] assertion failed: {}", stringify!($cond));
            $crate::test_framework::exit_qemu($crate::test_framework::QemuExitCode::Failed);
        }
    };
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            $crate::serial_println!("[failed] {}", format_args!($($arg)+));
            $crate::test_framework::exit_qemu($crate::test_framework::QemuExitCode::Failed);
        }
    };
}

#[macro_export]
macro_rules! kernel_assert_eq {
    ($left:expr, $right:expr) => {
        match (&$left, &$right) {
            (left_val, right_val) => {
                $crate::kernel_assert!(
                    left_val == right_val,
                    "assertion failed: `(left == right)`\n  left: `{:?}`\n right: `{:?}`",
                    left_val,
                    right_val
                );
            }
        }
    };
}

#[macro_export]
macro_rules! kernel_assert_ne {
    ($left:expr, $right:expr) => {
        match (&$left, &$right) {
            (left_val, right_val) => {
                $crate::kernel_assert!(
                    left_val != right_val,
                    "assertion failed: `(left != right)`\n  left: `{:?}`\n right: `{:?}`",
                    left_val,
                    right_val
                );
            }
        }
    };
}
