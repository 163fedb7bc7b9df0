//! Load-time diagnostics and the runtime error-code register.
//!
//! The split follows the language's tradition: parse and compile failures
//! are collected as diagnostics (parse errors are fatal for the containing
//! file, compile errors exclude one class or function), while everything at
//! run time degrades to a sentinel `Value` plus a code in `_progerro`.

use thiserror::Error;

/// A source position (1-based line and column).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourcePos {
    pub line: u32,
    pub column: u32,
}

impl std::fmt::Display for SourcePos {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Failure to lex or parse a source file. Fatal for that file.
#[derive(Debug, Clone, Error)]
#[error("{file}:{pos}: {message}")]
pub struct ParseError {
    pub file: String,
    pub pos: SourcePos,
    pub message: String,
}

/// Resolution or lowering failure in one class or function. The affected
/// item is excluded from the registry; loading continues.
#[derive(Debug, Clone, Error)]
#[error("{file}:{line}: in `{scope}`: {message}")]
pub struct CompileError {
    pub file: String,
    pub line: u32,
    pub scope: String,
    pub message: String,
}

/// Aggregate result of loading a source tree.
#[derive(Debug, Default)]
pub struct Diagnostics {
    pub parse_errors: Vec<ParseError>,
    pub compile_errors: Vec<CompileError>,
}

impl Diagnostics {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.parse_errors.is_empty() && self.compile_errors.is_empty()
    }

    pub fn extend(&mut self, other: Self) {
        self.parse_errors.extend(other.parse_errors);
        self.compile_errors.extend(other.compile_errors);
    }
}

/// Error that aborts loading entirely (the project directory or `.int`
/// file is unusable).
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("no source files found under {0}")]
    Empty(String),
}

/// Runtime error codes exposed to scripts through `_progerro`.
///
/// Codes never unwind; the VM stores the most recent one and execution
/// continues with a sentinel value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum ErrorCode {
    #[default]
    None = 0,
    /// Unknown name, field, or method at run time.
    LookupMiss = 1,
    /// Arithmetic anomaly (kept for parity with the legacy register; the
    /// operators themselves already produce their defined sentinels).
    Arithmetic = 2,
    /// Instruction budget exhausted; the frame was suspended.
    BudgetExhausted = 3,
    /// A handler operation failed and returned its sentinel.
    HandlerFailure = 4,
    /// Background I/O failure surfaced through the event queue.
    IoFailure = 5,
}

impl ErrorCode {
    #[must_use]
    pub fn as_i64(self) -> i64 {
        i64::from(self as u8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostics_accumulate() {
        let mut all = Diagnostics::default();
        assert!(all.is_clean());
        all.extend(Diagnostics {
            parse_errors: vec![ParseError {
                file: "mapa.int".into(),
                pos: SourcePos { line: 4, column: 7 },
                message: "unterminated string".into(),
            }],
            compile_errors: vec![],
        });
        assert!(!all.is_clean());
        assert_eq!(all.parse_errors[0].to_string(), "mapa.int:4:7: unterminated string");
    }
}
