//! Serialized output channel shared by every worker.
//!
//! All normal output flows through one [`OutputSink`]: a mutex over the
//! output stream plus the bits of state that must be consistent across
//! workers (the sticky write error, the group-separator `used` flag).
//! Formatter code locks once per block of lines and passes the guard down,
//! so no lock is ever taken reentrantly.
//!
//! Write failures are never surfaced at the call site. The first error is
//! recorded and every later write becomes a no-op; the line formatter
//! checks the slot after each line, reports `write error` once, and exits
//! with the trouble status.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::config::Config;

pub const PROGRAM: &str = "linescout";

/// Field separator after head fields of a selected line.
pub const SEP_CHAR_SELECTED: u8 = b':';
/// Field separator after head fields of a rejected (context) line.
pub const SEP_CHAR_REJECTED: u8 = b'-';
/// Default separator line between non-adjacent context groups.
pub const SEP_STR_GROUP: &str = "--";

pub struct SinkState {
    out: Box<dyn Write + Send>,
    /// First write error observed; all output stops once set.
    pub write_error: Option<std::io::Error>,
    /// True once any line or separator has been emitted.
    pub used: bool,
}

impl SinkState {
    pub fn write(&mut self, bytes: &[u8]) {
        if self.write_error.is_some() {
            return;
        }
        if let Err(e) = self.out.write_all(bytes) {
            self.write_error = Some(e);
        }
    }

    pub fn write_byte(&mut self, byte: u8) {
        self.write(&[byte]);
    }

    pub fn flush(&mut self) {
        if self.write_error.is_some() {
            return;
        }
        if let Err(e) = self.out.flush() {
            self.write_error = Some(e);
        }
    }
}

pub struct OutputSink {
    inner: Mutex<SinkState>,
    errseen: AtomicBool,
}

impl OutputSink {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        OutputSink {
            inner: Mutex::new(SinkState {
                out,
                write_error: None,
                used: false,
            }),
            errseen: AtomicBool::new(false),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, SinkState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn errseen(&self) -> bool {
        self.errseen.load(Ordering::SeqCst)
    }

    pub fn set_errseen(&self) {
        self.errseen.store(true, Ordering::SeqCst);
    }

    /// Reports a recoverable per-file error and records that one happened.
    /// The diagnostic is suppressed under `--no-messages`; the error flag
    /// is set either way.
    pub fn report(&self, cfg: &Config, what: &str, err: &std::io::Error) {
        if !cfg.suppress_errors {
            let _guard = self.lock();
            eprintln!("{}: {}: {}", PROGRAM, what, err);
        }
        self.set_errseen();
    }

    /// Like [`OutputSink::report`], for diagnostics without an io::Error.
    pub fn report_message(&self, cfg: &Config, msg: &str) {
        if !cfg.suppress_errors {
            let _guard = self.lock();
            eprintln!("{}: {}", PROGRAM, msg);
        }
        self.set_errseen();
    }

    /// A warning: printed unless suppressed, but not counted as an error.
    pub fn warn(&self, cfg: &Config, msg: &str) {
        if !cfg.suppress_errors {
            let _guard = self.lock();
            eprintln!("{}: warning: {}", PROGRAM, msg);
        }
    }
}

/// Prints the display name of the current file, colorized as a filename.
pub fn print_filename(st: &mut SinkState, cfg: &Config, name: &str) {
    if cfg.color {
        cfg.colors.sgr_start(st, &cfg.colors.filename);
    }
    st.write(name.as_bytes());
    if cfg.color {
        cfg.colors.sgr_end(st, &cfg.colors.filename);
    }
}

/// Prints a one-character field separator.
pub fn print_sep(st: &mut SinkState, cfg: &Config, sep: u8) {
    if cfg.color {
        cfg.colors.sgr_start(st, &cfg.colors.separator);
    }
    st.write_byte(sep);
    if cfg.color {
        cfg.colors.sgr_end(st, &cfg.colors.separator);
    }
}

/// Prints a line number or byte offset. The field is space-padded to
/// `min_width` only under `--initial-tab`, to maximize the chance of
/// alignment across lines.
pub fn print_offset(st: &mut SinkState, cfg: &Config, pos: u64, min_width: usize, attrs: &str) {
    let digits = pos.to_string();
    if cfg.color {
        cfg.colors.sgr_start(st, attrs);
    }
    if cfg.align_tabs {
        for _ in digits.len()..min_width {
            st.write_byte(b' ');
        }
    }
    st.write(digits.as_bytes());
    if cfg.color {
        cfg.colors.sgr_end(st, attrs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex as StdMutex};

    /// Test writer that collects output into a shared buffer.
    #[derive(Clone)]
    pub struct SharedBuf(pub Arc<StdMutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct FailingWriter {
        allowed: usize,
    }

    impl Write for FailingWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if self.allowed == 0 {
                return Err(std::io::Error::new(std::io::ErrorKind::Other, "disk full"));
            }
            self.allowed -= 1;
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_write_error_is_sticky() {
        let sink = OutputSink::new(Box::new(FailingWriter { allowed: 1 }));
        let mut st = sink.lock();
        st.write(b"first\n");
        assert!(st.write_error.is_none());
        st.write(b"second\n");
        assert!(st.write_error.is_some());
        // Later writes are swallowed without touching the writer again.
        st.write(b"third\n");
        assert!(st.write_error.is_some());
    }

    #[test]
    fn test_errseen_flag() {
        let buf = Arc::new(StdMutex::new(Vec::new()));
        let sink = OutputSink::new(Box::new(SharedBuf(buf)));
        assert!(!sink.errseen());
        sink.set_errseen();
        assert!(sink.errseen());
    }
}
