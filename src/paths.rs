//! File-system locations and artifact naming.
//!
//! All artifacts of a run share one stem: the capture
//! `Screenshot_20260101_120000.png`, its sanitized copy
//! `Screenshot_20260101_120000.temp.jpg` and the transcription
//! `Screenshot_20260101_120000.txt`.

use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};

/// Gets the user's home directory.
///
/// Uses the platform lookup from `dirs`, then falls back to `HOME` and
/// (on Windows) `USERPROFILE`, and finally to the current directory.
pub fn home_dir() -> PathBuf {
    if let Some(home) = dirs::home_dir() {
        return home;
    }
    if let Some(home) = std::env::var_os("HOME") {
        return PathBuf::from(home);
    }
    #[cfg(target_os = "windows")]
    {
        if let Some(profile) = std::env::var_os("USERPROFILE") {
            return PathBuf::from(profile);
        }
    }
    PathBuf::from(".")
}

/// Default capture directory: `${HOME}/Pictures/ocr`
pub fn default_capture_dir() -> PathBuf {
    home_dir().join("Pictures").join("ocr")
}

/// Default debug log: `${HOME}/ocr_debug.log`
pub fn default_debug_log() -> PathBuf {
    home_dir().join("ocr_debug.log")
}

/// Pick a fresh capture path inside `dir` for a run started at `now`.
///
/// Runs started within the same second get a numeric suffix so no run ever
/// reuses (or deletes) another run's files.
pub fn capture_path(dir: &Path, now: DateTime<Local>) -> PathBuf {
    let stem = format!("Screenshot_{}", now.format("%Y%m%d_%H%M%S"));
    let first = dir.join(format!("{stem}.png"));
    if !claimed(&first) {
        return first;
    }
    (1u32..)
        .map(|n| dir.join(format!("{stem}_{n}.png")))
        .find(|p| !claimed(p))
        .unwrap_or(first)
}

/// A stem is taken if any artifact derived from it exists.
fn claimed(capture: &Path) -> bool {
    capture.exists() || sanitized_path(capture).exists() || output_path(capture).exists()
}

/// Sanitized copy handed to the model: `<stem>.temp.jpg`.
pub fn sanitized_path(capture: &Path) -> PathBuf {
    capture.with_extension("temp.jpg")
}

/// Transcription file: `<stem>.txt`.
pub fn output_path(capture: &Path) -> PathBuf {
    capture.with_extension("txt")
}
