//! Output seam between script code and the host.
//!
//! `escreva`/`escrevaln` and handler output flow into a [`TextSink`] owned
//! by the world. The default sink renders colour markup to ANSI and writes
//! stdout; tests collect into a string; servers route per session.

use std::io::{self, Write as _};

use crate::color;

/// Receives text produced by scripts. Text arrives with colour markup
/// (`{red}`, `{reset}`, ...) intact; each sink decides what to do with it.
pub trait TextSink {
    fn write_text(&mut self, text: &str);

    /// Flushes buffered output, if any.
    fn flush(&mut self) {}

    /// Collected output, for sinks that retain it (`CollectSink`).
    fn collected(&self) -> Option<&str> {
        None
    }
}

/// Default sink: renders markup to ANSI escapes and writes stdout.
///
/// Output is buffered and flushed per write of a newline (and on drop), so
/// partial `escreva` output coalesces into whole lines.
#[derive(Debug, Default)]
pub struct StdSink {
    buffer: String,
}

impl TextSink for StdSink {
    fn write_text(&mut self, text: &str) {
        self.buffer.push_str(&color::render(text));
        if self.buffer.contains('\n') {
            self.flush();
        }
    }

    fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let _ = io::stdout().write_all(self.buffer.as_bytes());
        let _ = io::stdout().flush();
        self.buffer.clear();
    }
}

impl Drop for StdSink {
    fn drop(&mut self) {
        self.flush();
    }
}

/// Collects raw output (markup untouched) for tests and embedding.
#[derive(Debug, Default)]
pub struct CollectSink(String);

impl CollectSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn output(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_output(self) -> String {
        self.0
    }
}

impl TextSink for CollectSink {
    fn write_text(&mut self, text: &str) {
        self.0.push_str(text);
    }

    fn collected(&self) -> Option<&str> {
        Some(&self.0)
    }
}

/// Discards everything.
#[derive(Debug, Default)]
pub struct NullSink;

impl TextSink for NullSink {
    fn write_text(&mut self, _text: &str) {}
}
