//! User-facing status stream.
//!
//! A supervising front-end (a launcher window, a hotkey daemon) reads the
//! process's stdout and stderr line by line and forwards them verbatim, so
//! the line format is the whole contract:
//!
//! ```text
//! [INFO] Mode: Table Recognition        (stdout)
//! [WARNING] Clipboard step failed: …    (stdout)
//! [SUCCESS] Table Recognition finished  (stdout)
//! [ERROR] Model execution timed out.    (stderr)
//! ```
//!
//! Anything longer than a one-line summary belongs in the debug log
//! ([`crate::debug_log`]), never here.
//!
//! The pipeline talks to a [`StatusSink`] rather than printing directly so
//! library callers and tests can capture or silence the stream.

use std::io::{self, Write};
use std::sync::Arc;

/// Severity of one status line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusLevel {
    Info,
    Warning,
    Success,
    Error,
}

impl StatusLevel {
    /// Bracketed line prefix, e.g. `[INFO]`.
    pub fn prefix(self) -> &'static str {
        match self {
            StatusLevel::Info => "[INFO]",
            StatusLevel::Warning => "[WARNING]",
            StatusLevel::Success => "[SUCCESS]",
            StatusLevel::Error => "[ERROR]",
        }
    }

    /// Format a complete status line (without trailing newline).
    pub fn line(self, message: &str) -> String {
        format!("{} {}", self.prefix(), message)
    }
}

/// Receives status lines as the pipeline progresses.
///
/// Implementations must be `Send + Sync`: side-effect hand-offs run
/// concurrently and may report from different tasks. All methods have
/// default no-op implementations; override [`StatusSink::emit`] to receive
/// every level in one place.
pub trait StatusSink: Send + Sync {
    /// Called for every status line.
    fn emit(&self, level: StatusLevel, message: &str) {
        let _ = (level, message);
    }

    fn info(&self, message: &str) {
        self.emit(StatusLevel::Info, message);
    }

    fn warning(&self, message: &str) {
        self.emit(StatusLevel::Warning, message);
    }

    fn success(&self, message: &str) {
        self.emit(StatusLevel::Success, message);
    }

    fn error(&self, message: &str) {
        self.emit(StatusLevel::Error, message);
    }
}

/// Writes `[INFO]`/`[WARNING]`/`[SUCCESS]` to stdout and `[ERROR]` to
/// stderr, flushing after every line so a parent process sees it at once.
pub struct StdStatus;

impl StatusSink for StdStatus {
    fn emit(&self, level: StatusLevel, message: &str) {
        let line = level.line(message);
        // A closed pipe to the front-end must not abort the run.
        if level == StatusLevel::Error {
            let mut err = io::stderr().lock();
            let _ = writeln!(err, "{line}");
            let _ = err.flush();
        } else {
            let mut out = io::stdout().lock();
            let _ = writeln!(out, "{line}");
            let _ = out.flush();
        }
    }
}

/// Discards everything. Useful for library callers that only want the
/// [`crate::output::RunReport`].
pub struct NoopStatus;

impl StatusSink for NoopStatus {}

/// Convenience alias for the shared sink handed to the pipeline.
pub type SharedStatus = Arc<dyn StatusSink>;
