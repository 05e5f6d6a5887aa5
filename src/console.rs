//! Operator-facing output.
//!
//! Progress lines, check marks and banners go here rather than through the
//! logger. The writer is injectable so tests can capture exactly what the
//! operator would have seen.

use std::io::{self, Write};
use std::sync::{Arc, Mutex};

const BANNER_WIDTH: usize = 50;

/// Line-oriented writer shared by every stage of a run.
#[derive(Clone)]
pub struct Console {
    out: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl Console {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Console {
            out: Arc::new(Mutex::new(out)),
        }
    }

    pub fn stdout() -> Self {
        Console::new(Box::new(io::stdout()))
    }

    /// Console writing into an in-memory buffer.
    pub fn capture() -> (Console, CaptureBuffer) {
        let buffer = CaptureBuffer::default();
        (Console::new(Box::new(buffer.clone())), buffer)
    }

    pub fn line(&self, text: impl AsRef<str>) {
        if let Ok(mut out) = self.out.lock() {
            // Nothing sensible to do if the terminal is gone
            let _ = writeln!(out, "{}", text.as_ref());
            let _ = out.flush();
        }
    }

    pub fn blank(&self) {
        self.line("");
    }

    pub fn rule(&self) {
        self.line("=".repeat(BANNER_WIDTH));
    }

    /// Title between two rules.
    pub fn banner(&self, title: impl AsRef<str>) {
        self.rule();
        self.line(title);
        self.rule();
    }

    /// Multi-line text (captured stderr, remedies), indented.
    pub fn block(&self, text: &str, indent: usize) {
        let pad = " ".repeat(indent);
        for line in text.trim_end().lines() {
            self.line(format!("{}{}", pad, line));
        }
    }
}

/// Shared byte buffer behind a captured [`Console`].
#[derive(Clone, Default)]
pub struct CaptureBuffer {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl CaptureBuffer {
    pub fn contents(&self) -> String {
        self.bytes
            .lock()
            .map(|b| String::from_utf8_lossy(&b).into_owned())
            .unwrap_or_default()
    }
}

impl Write for CaptureBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut bytes = self
            .bytes
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "capture buffer poisoned"))?;
        bytes.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_records_lines() {
        let (console, buffer) = Console::capture();
        console.banner("ESP32 Upload Tool");
        console.line("Port: /dev/ttyUSB0");

        let out = buffer.contents();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "=".repeat(50));
        assert_eq!(lines[1], "ESP32 Upload Tool");
        assert_eq!(lines[3], "Port: /dev/ttyUSB0");
    }

    #[test]
    fn test_block_indents_each_line() {
        let (console, buffer) = Console::capture();
        console.block("first\nsecond\n", 2);
        assert_eq!(buffer.contents(), "  first\n  second\n");
    }
}
