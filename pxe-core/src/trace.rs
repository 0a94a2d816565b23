//! `pxe_trace!()`/`pxe_warn!()` macros.
//!
//! Modeled on the teacher crate's `print!`/`println!` macros over
//! `core::fmt::Write`, except the sink is whatever [`crate::env::Console`]
//! the `Stack` was installed with, rather than a hardcoded serial driver --
//! the concrete console is a platform concern (§6), out of scope here.

use core::fmt::Write;

/// Adapts an `&dyn Console` into `core::fmt::Write` so `format_args!` can
/// be written through it without an intermediate allocation.
pub(crate) struct ConsoleWriter<'a>(pub &'a dyn crate::env::Console);

impl<'a> Write for ConsoleWriter<'a> {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        self.0.write_str(s);
        Ok(())
    }
}

/// Trace a line to the installed console, prefixed `[pxe]`. A no-op if no
/// console has been installed.
#[macro_export]
macro_rules! pxe_trace {
    ($stack:expr, $($arg:tt)*) => {{
        if let Some(console) = $stack.console() {
            let mut w = $crate::trace::ConsoleWriter(console);
            let _ = ::core::fmt::Write::write_fmt(
                &mut w, format_args!("[pxe] {}\n", format_args!($($arg)*)));
        }
    }};
}

/// Like [`pxe_trace!`], but prefixed `[pxe:warn]` for conditions that are
/// recoverable but worth a human's attention.
#[macro_export]
macro_rules! pxe_warn {
    ($stack:expr, $($arg:tt)*) => {{
        if let Some(console) = $stack.console() {
            let mut w = $crate::trace::ConsoleWriter(console);
            let _ = ::core::fmt::Write::write_fmt(
                &mut w, format_args!("[pxe:warn] {}\n", format_args!($($arg)*)));
        }
    }};
}
