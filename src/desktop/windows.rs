//! Windows: Snipping Tool region capture read back from the clipboard,
//! clipboard text via `arboard`, and Notepad.

use super::{launch_editor, split_editor, tool_available, CaptureError, Desktop};
use crate::error::SideEffectError;
use arboard::Clipboard;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::debug;

const SNIPPING_TOOL: &str = "SnippingTool.exe";
const DEFAULT_EDITOR: &str = "notepad.exe";
/// How long the user has to finish the region selection.
const SELECTION_WINDOW: Duration = Duration::from_secs(120);
const POLL_INTERVAL: Duration = Duration::from_millis(200);

pub struct WindowsDesktop {
    editor: Option<String>,
}

impl WindowsDesktop {
    pub fn new(editor: Option<String>) -> Self {
        Self { editor }
    }
}

#[async_trait]
impl Desktop for WindowsDesktop {
    async fn capture(&self, dest: &Path) -> Result<Option<PathBuf>, CaptureError> {
        if !tool_available(SNIPPING_TOOL) {
            return Err(CaptureError::ToolMissing(SNIPPING_TOOL.into()));
        }
        let dest = dest.to_path_buf();
        tokio::task::spawn_blocking(move || capture_blocking(&dest))
            .await
            .map_err(|e| CaptureError::Failed(e.to_string()))?
    }

    async fn copy_text(&self, text: &str) -> Result<(), SideEffectError> {
        let text = text.to_string();
        tokio::task::spawn_blocking(move || {
            Clipboard::new()
                .and_then(|mut cb| cb.set_text(text))
                .map_err(|e| SideEffectError::Clipboard(e.to_string()))
        })
        .await
        .map_err(|e| SideEffectError::Clipboard(e.to_string()))?
    }

    async fn open_editor(&self, path: &Path) -> Result<(), SideEffectError> {
        match self.editor.as_deref().and_then(split_editor) {
            Some((program, args)) => {
                let args: Vec<&str> = args.iter().map(String::as_str).collect();
                launch_editor(&program, &args, path)
            }
            None => launch_editor(DEFAULT_EDITOR, &[], path),
        }
    }
}

/// Clear the clipboard, start the snip, then wait for an image to appear.
fn capture_blocking(dest: &Path) -> Result<Option<PathBuf>, CaptureError> {
    let mut clipboard = Clipboard::new().map_err(|e| CaptureError::Failed(e.to_string()))?;
    let _ = clipboard.clear();

    let mut cmd = std::process::Command::new(SNIPPING_TOOL);
    cmd.arg("/clip");
    child_reaper::detach(&mut cmd).map_err(|e| CaptureError::Failed(e.to_string()))?;

    let started = Instant::now();
    while started.elapsed() < SELECTION_WINDOW {
        std::thread::sleep(POLL_INTERVAL);
        let Ok(img) = clipboard.get_image() else {
            continue;
        };
        debug!(
            width = img.width,
            height = img.height,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Snip arrived on clipboard"
        );
        let rgba = image::RgbaImage::from_raw(
            img.width as u32,
            img.height as u32,
            img.bytes.into_owned(),
        )
        .ok_or_else(|| CaptureError::Failed("clipboard image has an unexpected size".into()))?;
        rgba.save(dest)
            .map_err(|e| CaptureError::Failed(e.to_string()))?;
        return Ok(Some(dest.to_path_buf()));
    }
    Err(CaptureError::Cancelled)
}
