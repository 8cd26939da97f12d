//! Values produced by a run: the capture, the inference result and the
//! final report.

use crate::config::Mode;
use crate::error::SideEffectError;
use chrono::{DateTime, Local};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// The image produced by the capture collaborator.
///
/// Read-only to the pipeline and never deleted by it: its stem names the
/// output text file.
#[derive(Debug, Clone, Serialize)]
pub struct CaptureArtifact {
    pub path: PathBuf,
    pub created: DateTime<Local>,
    /// `(width, height)` when the image header could be read.
    pub dimensions: Option<(u32, u32)>,
}

impl CaptureArtifact {
    /// Describe a freshly captured file, reading only its image header.
    pub fn inspect(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let dimensions = image::image_dimensions(&path).ok();
        Self {
            path,
            created: Local::now(),
            dimensions,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Outcome of one inference call. Produced exactly once per run.
#[derive(Debug, Clone, Serialize)]
pub struct InferenceResult {
    /// Exit status; 124 when the call was stopped at its deadline.
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl InferenceResult {
    pub fn succeeded(&self) -> bool {
        self.status == 0 && !self.timed_out
    }
}

/// Where the backend reports the model is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Processor {
    Gpu,
    Cpu,
    /// The model is loaded but its processor column could not be parsed.
    Unknown,
}

/// Summary of a successful run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub mode: Mode,
    /// The screenshot the text was read from.
    pub capture: CaptureArtifact,
    /// The written transcription, if persisting succeeded.
    pub output_path: Option<PathBuf>,
    /// Cleaned transcription text.
    pub text: String,
    /// Processor diagnostics, when enabled and readable.
    pub processor: Option<Processor>,
    /// Hand-offs that failed; already reported as warnings.
    pub warnings: Vec<SideEffectError>,
    pub duration_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timed_out_result_is_not_success() {
        let r = InferenceResult {
            status: 124,
            stdout: "partial".into(),
            stderr: String::new(),
            timed_out: true,
        };
        assert!(!r.succeeded());
    }

    #[test]
    fn inspect_reads_dimensions_from_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shot.png");
        image::RgbImage::new(30, 20).save(&path).unwrap();
        let capture = CaptureArtifact::inspect(&path);
        assert_eq!(capture.dimensions, Some((30, 20)));
    }

    #[test]
    fn inspect_tolerates_unreadable_files() {
        let capture = CaptureArtifact::inspect("/definitely/not/here.png");
        assert_eq!(capture.dimensions, None);
    }
}
