//! Desktop collaborators: region capture, clipboard and editor.
//!
//! The pipeline only sees the [`Desktop`] trait. [`native`] picks the
//! implementation for the running platform at startup:
//!
//! | Platform | Capture                    | Clipboard          | Editor        |
//! |----------|----------------------------|--------------------|---------------|
//! | Linux    | `spectacle -r -b -n -o`    | `wl-copy` / `xclip`| `kwrite`      |
//! | macOS    | `screencapture -i -x`      | `pbcopy`           | `open -t`     |
//! | Windows  | Snipping Tool + clipboard  | clipboard API      | `notepad.exe` |
//!
//! Every external tool is looked up on `PATH` before use so a missing tool
//! is reported by name instead of as a bare spawn error.

#[cfg(all(unix, not(target_os = "macos")))]
mod linux;
#[cfg(target_os = "macos")]
mod macos;
#[cfg(windows)]
mod windows;

use crate::config::OcrConfig;
use crate::error::SideEffectError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Why no capture was produced.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// The user dismissed the region selection.
    #[error("Screenshot canceled or failed.")]
    Cancelled,

    /// The capture tool is not installed.
    #[error("Missing dependency: {0}")]
    ToolMissing(String),

    /// The tool ran but something else went wrong.
    #[error("Failed to capture screenshot: {0}")]
    Failed(String),
}

/// Platform capabilities the pipeline hands work to.
#[async_trait]
pub trait Desktop: Send + Sync {
    /// Let the user select a region and save it as PNG at `dest`.
    ///
    /// `Ok(None)` means the tool reported success but wrote no file.
    async fn capture(&self, dest: &Path) -> Result<Option<PathBuf>, CaptureError>;

    /// Put `text` on the clipboard.
    async fn copy_text(&self, text: &str) -> Result<(), SideEffectError>;

    /// Open `path` in a text editor without waiting for it to close.
    async fn open_editor(&self, path: &Path) -> Result<(), SideEffectError>;
}

/// The implementation for the platform this binary was built for.
pub fn native(config: &OcrConfig) -> Arc<dyn Desktop> {
    let editor = config.editor.clone();

    #[cfg(all(unix, not(target_os = "macos")))]
    {
        Arc::new(linux::LinuxDesktop::new(editor))
    }
    #[cfg(target_os = "macos")]
    {
        Arc::new(macos::MacDesktop::new(editor))
    }
    #[cfg(windows)]
    {
        Arc::new(windows::WindowsDesktop::new(editor))
    }
}

// ── Shared helpers ───────────────────────────────────────────────────────────

/// `true` when `program` resolves on `PATH` (or is an existing path).
pub(crate) fn tool_available(program: &str) -> bool {
    which::which(program).is_ok()
}

/// Feed `text` to `program args…` on stdin and wait for it to exit.
///
/// Stdout and stderr go to the null device: clipboard tools like `wl-copy`
/// fork a server that would otherwise hold the pipes open.
pub(crate) async fn pipe_text(program: &str, args: &[&str], text: &str) -> Result<(), String> {
    let mut child = tokio::process::Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| format!("{program}: {e}"))?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(text.as_bytes())
            .await
            .map_err(|e| format!("{program}: {e}"))?;
    }

    let status = child.wait().await.map_err(|e| format!("{program}: {e}"))?;
    if status.success() {
        debug!(program, bytes = text.len(), "Text handed to clipboard tool");
        Ok(())
    } else {
        Err(format!("{program} exited with {status}"))
    }
}

/// Launch `program args… path` detached; the editor outlives the run.
pub(crate) fn launch_editor(program: &str, args: &[&str], path: &Path) -> Result<(), SideEffectError> {
    if !tool_available(program) {
        return Err(SideEffectError::Editor(format!(
            "{program} not found. File saved but not opened."
        )));
    }
    let mut cmd = std::process::Command::new(program);
    cmd.args(args).arg(path);
    child_reaper::detach(&mut cmd)
        .map(|pid| debug!(pid, program, "Editor launched"))
        .map_err(|e| SideEffectError::Editor(e.to_string()))
}

/// Split an editor override like `code --wait` into program and arguments.
pub(crate) fn split_editor(command: &str) -> Option<(String, Vec<String>)> {
    let mut parts = command.split_whitespace().map(str::to_string);
    let program = parts.next()?;
    Some((program, parts.collect()))
}
