//! Framebuffer text output.
//!
//! `bootloader_api` hands the kernel a linear pixel framebuffer rather than
//! a legacy VGA text buffer, so `print!`/`println!` render glyphs with
//! `noto-sans-mono-bitmap` onto it. This is purely a diagnostic surface —
//! nothing in the kernel's control flow depends on it — `serial_println!`
//! is the channel tests actually assert against.

use bootloader_api::info::{FrameBuffer, PixelFormat};
use core::fmt::{self, Write};
use noto_sans_mono_bitmap::{get_raster, get_raster_width, FontWeight, RasterHeight};
use spin::Mutex;

const GLYPH_HEIGHT: RasterHeight = RasterHeight::Size16;
const GLYPH_WIDTH: usize = get_raster_width(FontWeight::Regular, GLYPH_HEIGHT);

pub struct FramebufferWriter {
    framebuffer: Option<&'static mut FrameBuffer>,
    col: usize,
    row: usize,
}

impl FramebufferWriter {
    const fn new() -> Self {
        Self {
            framebuffer: None,
            col: 0,
            row: 0,
        }
    }

    /// Installs the framebuffer handed to the kernel by the bootloader.
    /// Called once from `bootstrap` before any `println!` is reachable.
    pub fn install(&mut self, framebuffer: &'static mut FrameBuffer) {
        self.framebuffer = Some(framebuffer);
        self.col = 0;
        self.row = 0;
    }

    fn newline(&mut self) {
        self.col = 0;
        self.row += 1;
    }

    fn write_char(&mut self, c: char) {
        let Some(fb) = self.framebuffer.as_mut() else {
            return;
        };
        let info = fb.info();
        if c == '\n' {
            self.newline();
            return;
        }
        if (self.col + 1) * GLYPH_WIDTH >= info.width {
            self.newline();
        }
        if (self.row + 1) * usize::from(GLYPH_HEIGHT.val()) >= info.height {
            self.row = 0;
        }

        let Some(raster) = get_raster(c, FontWeight::Regular, GLYPH_HEIGHT) else {
            return;
        };
        let x_off = self.col * GLYPH_WIDTH;
        let y_off = self.row * usize::from(GLYPH_HEIGHT.val());
        let stride = info.stride;
        let bpp = info.bytes_per_pixel;
        let format = info.pixel_format;
        let buf = fb.buffer_mut();

        for (dy, row) in raster.raster().iter().enumerate() {
            for (dx, intensity) in row.iter().enumerate() {
                let px = x_off + dx;
                let py = y_off + dy;
                let idx = (py * stride + px) * bpp;
                if idx + bpp > buf.len() {
                    continue;
                }
                let bytes = match format {
                    PixelFormat::Rgb | PixelFormat::Bgr => [*intensity, *intensity, *intensity, 0],
                    _ => [*intensity, *intensity, *intensity, 0],
                };
                buf[idx..idx + bpp].copy_from_slice(&bytes[..bpp]);
            }
        }
        self.col += 1;
    }
}

impl Write for FramebufferWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for c in s.chars() {
            self.write_char(c);
        }
        Ok(())
    }
}

pub static WRITER: Mutex<FramebufferWriter> = Mutex::new(FramebufferWriter::new());

#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    use x86_64::instructions::interrupts;

    interrupts::without_interrupts(|| {
        let _ = WRITER.lock().write_fmt(args);
    });
}

/// Prints to the framebuffer console, without a trailing newline.
#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => ($crate::print::_print(format_args!($($arg)*)));
}

/// Prints to the framebuffer console, with a trailing newline.
#[macro_export]
macro_rules! println {
    () => ($crate::print!("\n"));
    ($fmt:expr) => ($crate::print!(concat!($fmt, "\n")));
    ($fmt:expr, $($arg:tt)*) => ($crate::print!(concat!($fmt, "\n"), $($arg)*));
}
