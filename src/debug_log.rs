//! Append-only diagnostic log shared by every run.
//!
//! Several runs may be writing at the same time (one per hotkey press), so
//! the file is opened in append mode for each entry and closed right after;
//! no handle or lock is held between entries. Each entry is written with a
//! single `write_all`, which keeps entries from interleaving on local file
//! systems.
//!
//! Entry layout:
//!
//! ```text
//! [2026-01-02 12:00:05] Ollama Failed (124)
//! DETAILS:
//! <stderr of the backend>
//! ----------------------------------------
//! ```

use chrono::Local;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

const RULE_WIDTH: usize = 40;

/// Handle to the debug log file. Cheap to clone; holds only the path.
#[derive(Debug, Clone)]
pub struct DebugLog {
    path: PathBuf,
}

impl DebugLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open the log for one append. The caller drops the handle when done.
    pub fn open_append(&self) -> io::Result<File> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        OpenOptions::new().create(true).append(true).open(&self.path)
    }

    /// Append one entry. Failures are reported through `tracing` only; the
    /// log is never allowed to break a run.
    pub fn record(&self, message: &str, details: &str) {
        let entry = format_entry(
            &Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            message,
            details,
        );
        let result = self
            .open_append()
            .and_then(|mut f| f.write_all(entry.as_bytes()));
        if let Err(e) = result {
            warn!(path = %self.path.display(), "Could not append to debug log: {}", e);
        }
    }
}

fn format_entry(timestamp: &str, message: &str, details: &str) -> String {
    let mut entry = format!("[{timestamp}] {message}\n");
    if !details.is_empty() {
        entry.push_str("DETAILS:\n");
        entry.push_str(details);
        entry.push('\n');
    }
    entry.push_str(&"-".repeat(RULE_WIDTH));
    entry.push('\n');
    entry
}
