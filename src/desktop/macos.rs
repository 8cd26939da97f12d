//! macOS: screencapture, pbcopy and TextEdit via `open -t`.

use super::{launch_editor, pipe_text, split_editor, tool_available, CaptureError, Desktop};
use crate::error::SideEffectError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tracing::{debug, error};

pub struct MacDesktop {
    editor: Option<String>,
}

impl MacDesktop {
    pub fn new(editor: Option<String>) -> Self {
        Self { editor }
    }
}

#[async_trait]
impl Desktop for MacDesktop {
    async fn capture(&self, dest: &Path) -> Result<Option<PathBuf>, CaptureError> {
        if !tool_available("screencapture") {
            return Err(CaptureError::ToolMissing("screencapture".into()));
        }
        // -i interactive region selection, -x no sound. Escape cancels.
        let out = tokio::process::Command::new("screencapture")
            .args(["-i", "-x"])
            .arg(dest)
            .stdin(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| CaptureError::Failed(e.to_string()))?;

        match out.status.code() {
            Some(0) => Ok(dest.exists().then(|| dest.to_path_buf())),
            Some(1) => {
                debug!("User cancelled screenshot selection");
                Err(CaptureError::Cancelled)
            }
            _ => {
                let stderr = String::from_utf8_lossy(&out.stderr).trim().to_string();
                error!(error = %stderr, "screencapture failed");
                Err(CaptureError::Failed(if stderr.is_empty() {
                    format!("screencapture exited with {}", out.status)
                } else {
                    stderr
                }))
            }
        }
    }

    async fn copy_text(&self, text: &str) -> Result<(), SideEffectError> {
        if !tool_available("pbcopy") {
            return Err(SideEffectError::Clipboard("pbcopy not found".into()));
        }
        pipe_text("pbcopy", &[], text)
            .await
            .map_err(SideEffectError::Clipboard)
    }

    async fn open_editor(&self, path: &Path) -> Result<(), SideEffectError> {
        match self.editor.as_deref().and_then(split_editor) {
            Some((program, args)) => {
                let args: Vec<&str> = args.iter().map(String::as_str).collect();
                launch_editor(&program, &args, path)
            }
            None => launch_editor("open", &["-t"], path),
        }
    }
}
