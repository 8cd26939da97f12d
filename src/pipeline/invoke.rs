//! Inference: one `<backend> run <model>` child per run.
//!
//! The prompt goes in on stdin, newline-terminated, and stdin is closed
//! straight after so the backend never falls into its interactive mode.
//! The call is bounded by `inference_timeout`; on expiry the child gets a
//! graceful stop request and, after `termination_grace`, a forced kill.
//! Whatever it printed up to then is kept.
//!
//! There is no retry here. A run makes exactly one inference attempt.

use crate::config::OcrConfig;
use crate::error::OcrError;
use crate::output::InferenceResult;
use child_reaper::{communicate, isolate, Limits};
use std::process::Stdio;
use std::time::Instant;
use tracing::{debug, warn};

/// Run the model on `prompt` under the configured deadline.
///
/// Returns the result for any exit status, including the timeout sentinel
/// 124. Only a child that could not be started at all is an error
/// ([`OcrError::InferenceLaunch`]).
pub async fn invoke(config: &OcrConfig, prompt: &str) -> Result<InferenceResult, OcrError> {
    let start = Instant::now();
    let launch_err = |source| OcrError::InferenceLaunch {
        model: config.model.clone(),
        source,
    };

    let mut cmd = config.backend(&["run", &config.model]);
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    isolate(&mut cmd);

    let child = child_reaper::spawn(&mut cmd).map_err(launch_err)?;
    debug!(pid = child.id(), model = %config.model, "Inference started");

    let input = format!("{prompt}\n").into_bytes();
    let limits = Limits::new(config.inference_timeout, config.termination_grace);
    let finished = communicate(child, Some(input), limits)
        .await
        .map_err(launch_err)?;

    if let Some(how) = finished.termination {
        warn!(
            "Inference stopped after {}s ({:?})",
            config.inference_timeout.as_secs(),
            how
        );
    }

    let result = InferenceResult {
        status: finished.code(),
        stdout: String::from_utf8_lossy(&finished.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&finished.stderr).into_owned(),
        timed_out: finished.timed_out,
    };
    debug!(
        status = result.status,
        stdout_bytes = result.stdout.len(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Inference finished"
    );
    Ok(result)
}
