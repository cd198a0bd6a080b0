//! Logging infrastructure for zloader
//!
//! This module provides logging via the `log` crate, outputting to the EFI
//! console (`ConOut`) of the system table.

use core::fmt::{self, Write};
use core::sync::atomic::{AtomicPtr, Ordering};

use log::{Level, LevelFilter, Metadata, Record};
use r_efi::efi::Char16;
use r_efi::protocols::simple_text_output::Protocol as SimpleTextOutput;

/// UCS-2 characters converted per OutputString call, NUL included
const CHUNK_LEN: usize = 128;

/// Formats text as UCS-2 in fixed-size chunks handed to `sink`
///
/// Newlines become CRLF; characters outside the BMP are printed as '?'.
struct Ucs2Writer<F: FnMut(&[Char16])> {
    buffer: [Char16; CHUNK_LEN],
    len: usize,
    sink: F,
}

impl<F: FnMut(&[Char16])> Ucs2Writer<F> {
    fn new(sink: F) -> Self {
        Self {
            buffer: [0; CHUNK_LEN],
            len: 0,
            sink,
        }
    }

    fn push(&mut self, c: Char16) {
        // Leave room for the terminating NUL
        if self.len == CHUNK_LEN - 1 {
            self.flush();
        }
        self.buffer[self.len] = c;
        self.len += 1;
    }

    /// Emit buffered characters as one NUL terminated chunk
    fn flush(&mut self) {
        if self.len == 0 {
            return;
        }
        self.buffer[self.len] = 0;
        (self.sink)(&self.buffer[..=self.len]);
        self.len = 0;
    }
}

impl<F: FnMut(&[Char16])> Write for Ucs2Writer<F> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for c in s.chars() {
            if c == '\n' {
                self.push('\r' as Char16);
            }
            self.push(if (c as u32) <= 0xFFFF { c as Char16 } else { '?' as Char16 });
        }
        Ok(())
    }
}

/// Console logger implementation
struct ConsoleLogger {
    con_out: AtomicPtr<SimpleTextOutput>,
}

impl log::Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let con_out = self.con_out.load(Ordering::Acquire);
        if con_out.is_null() {
            return;
        }

        let level_str = match record.level() {
            Level::Error => "ERROR",
            Level::Warn => "WARN ",
            Level::Info => "INFO ",
            Level::Debug => "DEBUG",
            Level::Trace => "TRACE",
        };

        let mut writer = Ucs2Writer::new(|chunk: &[Char16]| {
            // SAFETY: con_out stays valid until ExitBootServices, and the
            // chunk is NUL terminated
            unsafe {
                ((*con_out).output_string)(con_out, chunk.as_ptr() as *mut Char16);
            }
        });
        // Format: [LEVEL] target: message
        let _ = writeln!(writer, "[{}] {}: {}", level_str, record.target(), record.args());
        writer.flush();
    }

    fn flush(&self) {}
}

static LOGGER: ConsoleLogger = ConsoleLogger {
    con_out: AtomicPtr::new(core::ptr::null_mut()),
};

/// Initialize the logging subsystem on `con_out`
///
/// A null console silences output. Calling this again only switches the
/// console and level.
pub fn init(con_out: *mut SimpleTextOutput, level: LevelFilter) {
    LOGGER.con_out.store(con_out, Ordering::Release);
    if log::set_logger(&LOGGER).is_ok() {
        log::debug!("Logger installed");
    }
    log::set_max_level(level);
}

/// Set the maximum log level
pub fn set_level(level: LevelFilter) {
    log::set_max_level(level);
}
