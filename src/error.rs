//! Error types for the snap2text library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`OcrError`] is **fatal**: the run cannot produce a transcription
//!   (nothing captured, backend down, model missing, inference failed).
//!   Each variant maps to a process exit code via [`OcrError::exit_code`].
//!
//! * [`SideEffectError`] is **non-fatal**: the transcription exists but one
//!   of the hand-offs (file, clipboard, editor) failed. Collected in
//!   [`crate::output::RunReport`] and surfaced as warnings; they never
//!   change the exit code.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Exit code of a successful run.
pub const EXIT_OK: i32 = 0;
/// Exit code when no capture was produced.
pub const EXIT_NO_CAPTURE: i32 = 1;
/// Exit code when the backend or model is unavailable.
pub const EXIT_BACKEND_UNAVAILABLE: i32 = 2;
/// Exit code when the model produced no usable text.
pub const EXIT_EMPTY_OUTPUT: i32 = 3;
/// Exit code for any unexpected internal failure.
pub const EXIT_INTERNAL: i32 = 99;

/// All fatal errors returned by the snap2text pipeline.
#[derive(Debug, Error)]
pub enum OcrError {
    // ── Capture errors ────────────────────────────────────────────────────
    /// The capture collaborator produced no image (cancelled, tool missing).
    #[error("No screenshot captured: {reason}")]
    NoCapture { reason: String },

    // ── Backend errors ────────────────────────────────────────────────────
    /// The backend program is not on PATH.
    #[error("Missing dependency: {program}")]
    BackendMissing { program: String },

    /// The daemon did not answer status queries, even after a launch attempt.
    #[error("Backend daemon is not reachable after {attempts} status polls")]
    DaemonUnreachable { attempts: u32, detail: String },

    /// The daemon is up but the model is absent or not loadable.
    #[error("Model '{model}' is not ready: {detail}")]
    ModelNotReady { model: String, detail: String },

    // ── Inference errors ──────────────────────────────────────────────────
    /// The inference subprocess could not be started at all.
    #[error("Failed to launch inference for '{model}': {source}")]
    InferenceLaunch {
        model: String,
        #[source]
        source: child_reaper::ReapError,
    },

    /// The inference subprocess exited nonzero or overran its deadline.
    #[error("{}", inference_failure_message(.status, .timed_out, .limit))]
    InferenceFailed {
        status: i32,
        timed_out: bool,
        limit: Duration,
        stderr: String,
    },

    /// Nothing remained after stripping markers and whitespace.
    #[error("Model returned no text")]
    EmptyOutput,

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

fn inference_failure_message(status: &i32, timed_out: &bool, limit: &Duration) -> String {
    if *timed_out {
        format!("Model execution timed out after {}s", limit.as_secs())
    } else {
        format!("Model failed with exit status {status}")
    }
}

impl OcrError {
    /// Process exit code for this failure.
    ///
    /// Timeouts carry 124 through `status`, so a timeout and a generic
    /// inference failure differ only in their message.
    pub fn exit_code(&self) -> i32 {
        match self {
            OcrError::NoCapture { .. } => EXIT_NO_CAPTURE,
            OcrError::BackendMissing { .. }
            | OcrError::DaemonUnreachable { .. }
            | OcrError::ModelNotReady { .. } => EXIT_BACKEND_UNAVAILABLE,
            OcrError::InferenceFailed { status, .. } => normalise_status(*status),
            OcrError::EmptyOutput => EXIT_EMPTY_OUTPUT,
            OcrError::InferenceLaunch { .. }
            | OcrError::InvalidConfig(_)
            | OcrError::Internal(_) => EXIT_INTERNAL,
        }
    }
}

/// Keep a subprocess status usable as our own exit code: it must be a
/// nonzero value a parent process can observe (1–255).
fn normalise_status(status: i32) -> i32 {
    if (1..=255).contains(&status) {
        status
    } else {
        1
    }
}

/// A non-fatal failure while handing the result to a collaborator.
#[derive(Debug, Clone, Error, serde::Serialize)]
pub enum SideEffectError {
    /// Writing the output text file failed.
    #[error("Could not write output file '{path}': {detail}")]
    Persist { path: PathBuf, detail: String },

    /// The clipboard collaborator failed or is missing.
    #[error("Clipboard step failed: {0}")]
    Clipboard(String),

    /// The editor collaborator failed or is missing.
    #[error("Could not open editor: {0}")]
    Editor(String),

    /// A hand-off did not finish within its bound.
    #[error("{step} step did not finish within {secs}s")]
    TimedOut { step: &'static str, secs: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_the_documented_table() {
        assert_eq!(
            OcrError::NoCapture { reason: "cancelled".into() }.exit_code(),
            1
        );
        assert_eq!(
            OcrError::BackendMissing { program: "ollama".into() }.exit_code(),
            2
        );
        assert_eq!(
            OcrError::DaemonUnreachable { attempts: 10, detail: String::new() }.exit_code(),
            2
        );
        assert_eq!(
            OcrError::ModelNotReady { model: "m".into(), detail: String::new() }.exit_code(),
            2
        );
        assert_eq!(OcrError::EmptyOutput.exit_code(), 3);
        assert_eq!(OcrError::Internal("x".into()).exit_code(), 99);
    }

    #[test]
    fn inference_status_passes_through() {
        let e = OcrError::InferenceFailed {
            status: 42,
            timed_out: false,
            limit: Duration::from_secs(180),
            stderr: String::new(),
        };
        assert_eq!(e.exit_code(), 42);
        assert!(e.to_string().contains("exit status 42"));
    }

    #[test]
    fn timeout_differs_only_in_message() {
        let e = OcrError::InferenceFailed {
            status: 124,
            timed_out: true,
            limit: Duration::from_secs(180),
            stderr: String::new(),
        };
        assert_eq!(e.exit_code(), 124);
        assert!(e.to_string().contains("timed out after 180s"), "got: {e}");
    }

    #[test]
    fn out_of_range_status_is_clamped_to_failure() {
        let e = OcrError::InferenceFailed {
            status: -1,
            timed_out: false,
            limit: Duration::from_secs(1),
            stderr: String::new(),
        };
        assert_eq!(e.exit_code(), 1);
    }

    #[test]
    fn side_effect_display() {
        let e = SideEffectError::TimedOut { step: "Clipboard", secs: 5 };
        assert_eq!(e.to_string(), "Clipboard step did not finish within 5s");
    }
}
