//! Shared console sink for deploy output and rendered stack events.
//!
//! Every write is a whole line or a whole block taken under one lock, so
//! lines from the stdout worker and blocks from the poller interleave but
//! never tear.

use std::io::{self, Write};
use std::sync::{Arc, Mutex, PoisonError};

type Sink = Arc<Mutex<Box<dyn Write + Send>>>;

/// Cloneable handle to the process stdout/stderr (or test buffers).
#[derive(Clone)]
pub struct Console {
    out: Sink,
    err: Sink,
    color: bool,
}

impl std::fmt::Debug for Console {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Console").field("color", &self.color).finish()
    }
}

/// In-memory capture of what was written to a [`Console`].
#[derive(Clone, Default)]
pub struct Captured(Arc<Mutex<Vec<u8>>>);

impl Captured {
    /// Everything written so far, lossily decoded.
    pub fn contents(&self) -> String {
        let buf = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&buf).into_owned()
    }

    /// Everything written so far, byte for byte.
    pub fn bytes(&self) -> Vec<u8> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl Write for Captured {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn sink(w: impl Write + Send + 'static) -> Sink {
    Arc::new(Mutex::new(Box::new(w)))
}

fn write_all(sink: &Sink, bytes: &[u8]) -> io::Result<()> {
    let mut w = sink.lock().unwrap_or_else(PoisonError::into_inner);
    w.write_all(bytes)?;
    w.flush()
}

impl Console {
    /// Console writing to the process stdout and stderr.
    ///
    /// Writes are blocking std writes made from inside tokio tasks; a stalled
    /// reader of our stdout parks the writing worker thread until it drains.
    pub fn stdio(color: bool) -> Self {
        Self {
            out: sink(io::stdout()),
            err: sink(io::stderr()),
            color,
        }
    }

    /// Console writing into memory, returned alongside the stdout and
    /// stderr captures.
    pub fn captured(color: bool) -> (Self, Captured, Captured) {
        let out = Captured::default();
        let err = Captured::default();
        let console = Self {
            out: sink(out.clone()),
            err: sink(err.clone()),
            color,
        };
        (console, out, err)
    }

    /// Whether rendered output should carry ANSI styling.
    pub fn color(&self) -> bool {
        self.color
    }

    /// Write `line` plus a newline to stdout.
    pub fn line(&self, line: &str) -> io::Result<()> {
        self.line_bytes(line.as_bytes())
    }

    /// Write raw `line` bytes plus a newline to stdout, undecoded.
    pub fn line_bytes(&self, line: &[u8]) -> io::Result<()> {
        let mut buf = Vec::with_capacity(line.len() + 1);
        buf.extend_from_slice(line);
        buf.push(b'\n');
        write_all(&self.out, &buf)
    }

    /// Write a pre-formatted block to stdout as-is.
    pub fn block(&self, block: &str) -> io::Result<()> {
        write_all(&self.out, block.as_bytes())
    }

    /// Write raw bytes to stderr.
    pub fn err_bytes(&self, bytes: &[u8]) -> io::Result<()> {
        write_all(&self.err, bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captured_console_separates_streams() {
        let (console, out, err) = Console::captured(false);
        console.line("to stdout").unwrap();
        console.block("block\n\n").unwrap();
        console.err_bytes(b"to stderr").unwrap();

        assert_eq!(out.contents(), "to stdout\nblock\n\n");
        assert_eq!(err.contents(), "to stderr");
    }

    #[test]
    fn line_bytes_are_written_undecoded() {
        let (console, out, _err) = Console::captured(false);
        console.line_bytes(b"caf\xe9").unwrap();
        assert_eq!(out.bytes(), b"caf\xe9\n");
    }

    #[test]
    fn clones_share_sinks() {
        let (console, out, _err) = Console::captured(true);
        let other = console.clone();
        console.line("a").unwrap();
        other.line("b").unwrap();
        assert_eq!(out.contents(), "a\nb\n");
        assert!(other.color());
    }

    #[test]
    fn debug_does_not_panic() {
        let (console, _, _) = Console::captured(false);
        assert!(format!("{console:?}").contains("Console"));
    }
}
