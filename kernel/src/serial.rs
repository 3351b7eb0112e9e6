//! COM1 16550 UART output.
//!
//! This is the channel the QEMU integration harness reads: everything
//! written with [`serial_print!`]/[`serial_println!`] lands in the test
//! runner's captured output, and the `isa-debug-exit` exit code is the
//! pass/fail signal on top of it.

use core::fmt::{self, Write};
use spin::Mutex;
use uart_16550::SerialPort;

const COM1_PORT: u16 = 0x3f8;

lazy_static::lazy_static! {
    static ref SERIAL1: Mutex<SerialPort> = {
        let mut port = unsafe { SerialPort::new(COM1_PORT) };
        port.init();
        Mutex::new(port)
    };
}

#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    use x86_64::instructions::interrupts;

    interrupts::without_interrupts(|| {
        SERIAL1
            .lock()
            .write_fmt(args)
            .expect("serial write should not fail");
    });
}

/// Prints to the serial console, without a trailing newline.
#[macro_export]
macro_rules! serial_print {
    ($($arg:tt)*) => {
        $crate::serial::_print(format_args!($($arg)*))
    };
}

/// Prints to the serial console, with a trailing newline.
#[macro_export]
macro_rules! serial_println {
    () => ($crate::serial_print!("\n"));
    ($fmt:expr) => ($crate::serial_print!(concat!($fmt, "\n")));
    ($fmt:expr, $($arg:tt)*) => (
        $crate::serial_print!(concat!($fmt, "\n"), $($arg)*)
    );
}
