//! The run controller: capture → normalize → daemon → model → inference →
//! postprocess → hand-offs.
//!
//! Stages run strictly in sequence; each can end the run with its own
//! [`OcrError`] and therefore its own exit code. Only the final hand-offs
//! (clipboard, editor) run concurrently, each under `side_effect_timeout`,
//! and their failures are downgraded to warnings.
//!
//! The sanitized image is owned by a [`SanitizedArtifact`] guard, so it is
//! deleted on every path out of the run once normalisation produced it.
//!
//! [`SanitizedArtifact`]: crate::pipeline::normalize::SanitizedArtifact

use crate::config::{Mode, OcrConfig};
use crate::debug_log::DebugLog;
use crate::desktop::{CaptureError, Desktop};
use crate::error::{OcrError, SideEffectError, EXIT_INTERNAL, EXIT_OK};
use crate::output::{CaptureArtifact, RunReport};
use crate::paths;
use crate::pipeline::{daemon, invoke, model, normalize, postprocess};
use crate::prompts::build_prompt;
use crate::status::{SharedStatus, StatusSink};
use chrono::Local;
use std::fmt;
use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Where a run currently is. Failures are logged with the stage they hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    CapturePending,
    Sanitizing,
    ProbingDaemon,
    CheckingModel,
    Inferring,
    Postprocessing,
    Distributing,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::CapturePending => "capture",
            Stage::Sanitizing => "sanitize",
            Stage::ProbingDaemon => "daemon probe",
            Stage::CheckingModel => "model check",
            Stage::Inferring => "inference",
            Stage::Postprocessing => "postprocess",
            Stage::Distributing => "distribute",
            Stage::Done => "done",
        };
        f.write_str(name)
    }
}

/// Run the whole pipeline once and map the outcome to a process exit code.
///
/// The run executes in its own task so that a panic anywhere inside it is
/// caught here and reported as an internal failure (99) instead of tearing
/// down the process without a status line.
pub async fn run(
    mode: Mode,
    config: OcrConfig,
    desktop: Arc<dyn Desktop>,
    status: SharedStatus,
) -> i32 {
    let log = DebugLog::new(&config.debug_log);
    let task_status = Arc::clone(&status);
    let handle = tokio::spawn(async move {
        recognize(mode, &config, desktop.as_ref(), task_status.as_ref()).await
    });

    match handle.await {
        Ok(Ok(_)) => EXIT_OK,
        Ok(Err(e)) => e.exit_code(),
        Err(join) => {
            let detail = if join.is_panic() {
                panic_message(join.into_panic())
            } else {
                join.to_string()
            };
            error!("Run aborted: {}", detail);
            log.record("Script Error", &detail);
            status.error(&format!("Unexpected error: {detail}"));
            status.error(&format!("Check {}", log.path().display()));
            EXIT_INTERNAL
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "panic".to_string())
}

/// Capture a region and transcribe it.
///
/// Status lines are emitted as the run progresses. On failure the error
/// has already been reported to `status`; the caller only needs
/// [`OcrError::exit_code`].
pub async fn recognize(
    mode: Mode,
    config: &OcrConfig,
    desktop: &dyn Desktop,
    status: &dyn StatusSink,
) -> Result<RunReport, OcrError> {
    let log = DebugLog::new(&config.debug_log);
    let mut stage = Stage::CapturePending;

    let result = drive(mode, config, desktop, status, &log, &mut stage).await;
    match &result {
        Ok(report) => info!(
            "Run finished in {}ms ({} chars)",
            report.duration_ms,
            report.text.len()
        ),
        Err(e) => {
            warn!(%stage, exit_code = e.exit_code(), "Run failed: {}", e);
            if e.exit_code() == EXIT_INTERNAL {
                log.record(&format!("Script Error ({stage})"), &e.to_string());
                status.error(&format!("Unexpected error: {e}"));
                status.error(&format!("Check {}", log.path().display()));
            }
        }
    }
    result
}

async fn drive(
    mode: Mode,
    config: &OcrConfig,
    desktop: &dyn Desktop,
    status: &dyn StatusSink,
    log: &DebugLog,
    stage: &mut Stage,
) -> Result<RunReport, OcrError> {
    let start = Instant::now();
    status.info(&format!("Mode: {mode}"));
    debug!(
        config = %serde_json::to_string(config).unwrap_or_default(),
        "Run configuration"
    );

    // ── Step 1: Capture ──────────────────────────────────────────────────
    let capture = capture(config, desktop, status, log).await?;
    status.info(&format!("Screenshot saved: {}", capture.path().display()));
    debug!(dimensions = ?capture.dimensions, "Capture inspected");
    status.info(&format!("Running {}...", config.model));

    // ── Step 2: Normalize ────────────────────────────────────────────────
    *stage = Stage::Sanitizing;
    let image = normalize::normalize(capture.path(), config, log, status).await;
    status.info(&format!("Model prompt image: {}", image.path().display()));

    // ── Step 3: Backend present and reachable ────────────────────────────
    *stage = Stage::ProbingDaemon;
    let program = config.backend_program();
    if let Err(e) = which::which(program) {
        debug!("Backend lookup failed: {}", e);
        status.error(&format!("Missing dependency: {program}"));
        return Err(OcrError::BackendMissing {
            program: program.to_string(),
        });
    }
    if let daemon::Readiness::Unreachable { polls, detail } =
        daemon::ensure_reachable(config, status).await
    {
        return Err(OcrError::DaemonUnreachable {
            attempts: polls,
            detail,
        });
    }

    // ── Step 4: Model available ──────────────────────────────────────────
    *stage = Stage::CheckingModel;
    model::ensure_model_ready(config, status).await?;

    // ── Step 5: Inference ────────────────────────────────────────────────
    *stage = Stage::Inferring;
    status.info(&format!(
        "Waiting for OCR result (timeout: {}s)...",
        config.inference_timeout.as_secs()
    ));
    let prompt = build_prompt(mode, image.path());
    let result = invoke::invoke(config, &prompt).await?;
    image.discard();

    let processor = if config.processor_diagnostics {
        let p = model::detect_processor(config).await;
        model::report_processor(config, p, status);
        p
    } else {
        None
    };

    if !result.succeeded() {
        let stderr = result.stderr.trim();
        let mut details = String::new();
        if result.timed_out {
            details.push_str(&format!(
                "Model execution timed out after {}s\n",
                config.inference_timeout.as_secs()
            ));
        }
        details.push_str(stderr);
        log.record(&format!("Inference Failed ({})", result.status), details.trim_end());

        if result.timed_out {
            status.error("Model execution timed out.");
        } else {
            status.error(&format!("Model failed. Check {}", log.path().display()));
        }
        if !stderr.is_empty() {
            status.error(stderr);
        }
        return Err(OcrError::InferenceFailed {
            status: result.status,
            timed_out: result.timed_out,
            limit: config.inference_timeout,
            stderr: stderr.to_string(),
        });
    }
    if !result.stderr.trim().is_empty() {
        // Successful runs keep their stderr out of the verdict.
        debug!("Backend stderr on success: {}", result.stderr.trim());
    }

    // ── Step 6: Postprocess ──────────────────────────────────────────────
    *stage = Stage::Postprocessing;
    let text = postprocess::clean(mode, &result.stdout);
    if text.is_empty() {
        status.warning("Model returned no text.");
        return Err(OcrError::EmptyOutput);
    }

    // ── Step 7: Hand-offs ────────────────────────────────────────────────
    *stage = Stage::Distributing;
    let mut warnings = Vec::new();
    let output_path = match persist(&paths::output_path(capture.path()), &text).await {
        Ok(path) => {
            status.info(&format!("Saved output file: {}", path.display()));
            Some(path)
        }
        Err(e) => {
            log.record("Output Error", &e.to_string());
            status.warning(&e.to_string());
            warnings.push(e);
            None
        }
    };

    let clipboard = async {
        if !config.copy_to_clipboard || text.is_empty() {
            return Ok(());
        }
        bounded(config, "Clipboard", desktop.copy_text(&text)).await
    };
    let editor = async {
        match (&output_path, config.open_editor) {
            (Some(path), true) => bounded(config, "Editor", desktop.open_editor(path)).await,
            _ => Ok(()),
        }
    };
    let (clipboard, editor) = futures::future::join(clipboard, editor).await;
    for (label, outcome) in [("Clipboard Error", clipboard), ("Editor Error", editor)] {
        if let Err(e) = outcome {
            log.record(label, &e.to_string());
            status.warning(&e.to_string());
            warnings.push(e);
        }
    }

    *stage = Stage::Done;
    status.success(&format!("{mode} finished successfully."));
    Ok(RunReport {
        mode,
        capture,
        output_path,
        text,
        processor,
        warnings,
        duration_ms: start.elapsed().as_millis() as u64,
    })
}

/// Ask the desktop for a capture in a fresh, unclaimed file.
async fn capture(
    config: &OcrConfig,
    desktop: &dyn Desktop,
    status: &dyn StatusSink,
    log: &DebugLog,
) -> Result<CaptureArtifact, OcrError> {
    tokio::fs::create_dir_all(&config.capture_dir)
        .await
        .map_err(|e| {
            OcrError::Internal(format!(
                "Cannot create {}: {}",
                config.capture_dir.display(),
                e
            ))
        })?;
    let dest = paths::capture_path(&config.capture_dir, Local::now());
    debug!("Capturing to {}", dest.display());

    let reason = match desktop.capture(&dest).await {
        Ok(Some(path)) => return Ok(CaptureArtifact::inspect(path)),
        Ok(None) => "capture tool wrote no file".to_string(),
        Err(CaptureError::Cancelled) => {
            status.warning(&CaptureError::Cancelled.to_string());
            "cancelled".to_string()
        }
        Err(e @ CaptureError::ToolMissing(_)) => {
            status.error(&e.to_string());
            e.to_string()
        }
        Err(e @ CaptureError::Failed(_)) => {
            log.record("Screenshot Error", &e.to_string());
            status.error(&e.to_string());
            e.to_string()
        }
    };
    status.warning("No screenshot captured. OCR aborted.");
    Err(OcrError::NoCapture { reason })
}

/// Write `text` to `path` atomically: a temp file in the same directory,
/// then rename. A failed write leaves no partial file behind. The result
/// gets the default file mode, not the private mode of a temp file.
async fn persist(path: &Path, text: &str) -> Result<PathBuf, SideEffectError> {
    let target = path.to_path_buf();
    let text = text.to_string();
    let written = tokio::task::spawn_blocking(move || -> std::io::Result<PathBuf> {
        let dir = target.parent().unwrap_or_else(|| Path::new("."));
        #[cfg_attr(not(unix), allow(unused_mut))]
        let mut builder = tempfile::Builder::new();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            // 0666 minus the umask, like any plainly created file.
            builder.permissions(std::fs::Permissions::from_mode(0o666));
        }
        let mut tmp = builder.tempfile_in(dir)?;
        tmp.write_all(text.as_bytes())?;
        tmp.persist(&target).map_err(|e| e.error)?;
        Ok(target)
    })
    .await;

    match written {
        Ok(Ok(path)) => Ok(path),
        Ok(Err(e)) => Err(SideEffectError::Persist {
            path: path.to_path_buf(),
            detail: e.to_string(),
        }),
        Err(e) => Err(SideEffectError::Persist {
            path: path.to_path_buf(),
            detail: e.to_string(),
        }),
    }
}

/// Bound one hand-off by `side_effect_timeout`; a hung tool is dropped
/// (and its child killed) rather than holding up the exit code.
async fn bounded<F>(config: &OcrConfig, step: &'static str, fut: F) -> Result<(), SideEffectError>
where
    F: Future<Output = Result<(), SideEffectError>>,
{
    match tokio::time::timeout(config.side_effect_timeout, fut).await {
        Ok(outcome) => outcome,
        Err(_) => Err(SideEffectError::TimedOut {
            step,
            secs: config.side_effect_timeout.as_secs(),
        }),
    }
}
