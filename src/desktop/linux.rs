//! Linux / KDE: spectacle, wl-copy (or xclip on X11) and kwrite.

use super::{launch_editor, pipe_text, split_editor, tool_available, CaptureError, Desktop};
use crate::error::SideEffectError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tracing::debug;

const CAPTURE_TOOL: &str = "spectacle";
const DEFAULT_EDITOR: &str = "kwrite";

pub struct LinuxDesktop {
    editor: Option<String>,
}

impl LinuxDesktop {
    pub fn new(editor: Option<String>) -> Self {
        Self { editor }
    }
}

#[async_trait]
impl Desktop for LinuxDesktop {
    async fn capture(&self, dest: &Path) -> Result<Option<PathBuf>, CaptureError> {
        if !tool_available(CAPTURE_TOOL) {
            return Err(CaptureError::ToolMissing(CAPTURE_TOOL.into()));
        }
        // -r region, -b background (no main window), -n no notification.
        let out = tokio::process::Command::new(CAPTURE_TOOL)
            .args(["-r", "-b", "-n", "-o"])
            .arg(dest)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| CaptureError::Failed(e.to_string()))?;

        if !out.status.success() {
            debug!(
                "spectacle exited with {}: {}",
                out.status,
                String::from_utf8_lossy(&out.stderr).trim()
            );
            return Err(CaptureError::Cancelled);
        }
        Ok(dest.exists().then(|| dest.to_path_buf()))
    }

    async fn copy_text(&self, text: &str) -> Result<(), SideEffectError> {
        let result = if tool_available("wl-copy") {
            pipe_text("wl-copy", &[], text).await
        } else if tool_available("xclip") {
            pipe_text("xclip", &["-selection", "clipboard"], text).await
        } else {
            Err("wl-copy not found".to_string())
        };
        result.map_err(SideEffectError::Clipboard)
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
