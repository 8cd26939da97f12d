//! Model availability and processor diagnostics.
//!
//! The daemon can be up while the model is missing or still being pulled.
//! [`ensure_model_ready`] asks the backend to describe the model before the
//! run commits to the long inference timeout.

use crate::config::OcrConfig;
use crate::error::OcrError;
use crate::output::Processor;
use crate::pipeline::daemon::backend_name;
use crate::status::StatusSink;
use child_reaper::{output_within, ReapError};
use tracing::{debug, warn};

/// Fail fast unless `<backend> show <model>` succeeds within
/// `model_check_timeout`. Diagnostics from the query are passed through as
/// `[ERROR]` lines.
pub async fn ensure_model_ready(
    config: &OcrConfig,
    status: &dyn StatusSink,
) -> Result<(), OcrError> {
    let name = backend_name(config);
    let model = config.model.as_str();
    let mut cmd = config.backend(&["show", model]);

    let detail = match output_within(&mut cmd, config.model_check_timeout).await {
        Ok(out) if out.status.success() => {
            debug!("Model '{}' is ready", model);
            return Ok(());
        }
        Ok(out) => {
            let stderr = String::from_utf8_lossy(&out.stderr).trim().to_string();
            status.error(&format!("Model '{model}' is not ready in {name}."));
            if !stderr.is_empty() {
                status.error(&stderr);
            }
            stderr
        }
        Err(ReapError::TimedOut { .. }) => {
            status.error(&format!(
                "Timeout while checking model availability in {name}."
            ));
            format!(
                "describe query exceeded {}s",
                config.model_check_timeout.as_secs()
            )
        }
        Err(e) => {
            status.error(&format!("Failed to check model availability: {e}"));
            e.to_string()
        }
    };

    warn!("Model '{}' not ready: {}", model, detail);
    Err(OcrError::ModelNotReady {
        model: model.to_string(),
        detail,
    })
}

/// Where the loaded model runs, read from the backend's `ps` table.
///
/// Best effort: `None` when the query fails or the model has no row.
pub async fn detect_processor(config: &OcrConfig) -> Option<Processor> {
    let mut cmd = config.backend(&["ps"]);
    match output_within(&mut cmd, config.probe_timeout).await {
        Ok(out) if out.status.success() => {
            parse_processor(&String::from_utf8_lossy(&out.stdout), &config.model)
        }
        Ok(out) => {
            debug!("Processor query exited with {}", out.status);
            None
        }
        Err(e) => {
            debug!("Processor query failed: {}", e);
            None
        }
    }
}

/// Find the model's row in a `ps` listing and classify its processor column.
///
/// The header row (starting with `NAME`) and blank lines are skipped. The
/// first row mentioning `model` decides: `GPU` anywhere wins over `CPU`,
/// neither yields [`Processor::Unknown`].
pub fn parse_processor(listing: &str, model: &str) -> Option<Processor> {
    listing
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.to_lowercase().starts_with("name"))
        .find(|line| line.contains(model))
        .map(|line| {
            let upper = line.to_uppercase();
            if upper.contains("GPU") {
                Processor::Gpu
            } else if upper.contains("CPU") {
                Processor::Cpu
            } else {
                Processor::Unknown
            }
        })
}

/// Emit the status lines for a processor reading.
pub fn report_processor(config: &OcrConfig, processor: Option<Processor>, status: &dyn StatusSink) {
    let name = backend_name(config);
    match processor {
        Some(Processor::Gpu) => status.info(&format!("{name} processor: GPU")),
        Some(Processor::Cpu) => {
            status.warning(&format!("{name} processor: CPU (slow)."));
            status.warning(&format!(
                "Restart the daemon and re-check with `{name} ps`."
            ));
            status.warning(&format!("Try: `pkill -f \"{name} serve\" && {name} serve`"));
            status.warning("If still CPU, verify the GPU drivers and toolkit.");
        }
        Some(Processor::Unknown) => status.warning(&format!(
            "{name} processor is active but could not be parsed from `{name} ps`."
        )),
        None => status.warning(&format!("Could not read `{name} ps` processor status.")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::StatusLevel;
    use std::sync::Mutex;

    const LISTING: &str = "\
NAME              ID              SIZE      PROCESSOR    UNTIL
glm-ocr:latest    1a2b3c4d5e6f    3.1 GB    100% GPU     4 minutes from now
";

    #[test]
    fn gpu_row_is_detected() {
        assert_eq!(parse_processor(LISTING, "glm-ocr"), Some(Processor::Gpu));
    }

    #[test]
    fn cpu_row_is_detected() {
        let listing = LISTING.replace("100% GPU", "100% CPU");
        assert_eq!(parse_processor(&listing, "glm-ocr"), Some(Processor::Cpu));
    }

    #[test]
    fn unparseable_row_is_unknown() {
        let listing = LISTING.replace("100% GPU", "");
        assert_eq!(parse_processor(&listing, "glm-ocr"), Some(Processor::Unknown));
    }

    #[test]
    fn header_and_other_models_are_ignored() {
        assert_eq!(parse_processor(LISTING, "llava"), None);
        assert_eq!(parse_processor("NAME glm-ocr GPU\n", "glm-ocr"), None);
        assert_eq!(parse_processor("", "glm-ocr"), None);
    }

    #[derive(Default)]
    struct Lines(Mutex<Vec<(StatusLevel, String)>>);

    impl StatusSink for Lines {
        fn emit(&self, level: StatusLevel, message: &str) {
            self.0.lock().unwrap().push((level, message.to_string()));
        }
    }

    #[test]
    fn cpu_reading_produces_remediation_warnings() {
        let sink = Lines::default();
        report_processor(&OcrConfig::default(), Some(Processor::Cpu), &sink);
        let lines = sink.0.lock().unwrap();
        assert_eq!(lines.len(), 4);
        assert!(lines.iter().all(|(l, _)| *l == StatusLevel::Warning));
        assert_eq!(lines[0].1, "ollama processor: CPU (slow).");
    }

    #[test]
    fn gpu_reading_is_informational() {
        let sink = Lines::default();
        report_processor(&OcrConfig::default(), Some(Processor::Gpu), &sink);
        assert_eq!(
            *sink.0.lock().unwrap(),
            vec![(StatusLevel::Info, "ollama processor: GPU".to_string())]
        );
    }

    #[cfg(unix)]
    mod with_stub {
        use super::*;
        use std::time::Duration;

        fn stub(dir: &std::path::Path, body: &str) -> OcrConfig {
            let script = dir.join("backend.sh");
            std::fs::write(&script, body).unwrap();
            OcrConfig::builder()
                .backend_command(["sh".to_string(), script.display().to_string()])
                .model_check_timeout(Duration::from_millis(500))
                .build()
                .unwrap()
        }

        #[tokio::test]
        async fn present_model_passes() {
            let dir = tempfile::tempdir().unwrap();
            let config = stub(dir.path(), "[ \"$1\" = show ] && [ \"$2\" = glm-ocr ] && exit 0\nexit 1\n");
            ensure_model_ready(&config, &Lines::default()).await.unwrap();
        }

        #[tokio::test]
        async fn missing_model_passes_stderr_through() {
            let dir = tempfile::tempdir().unwrap();
            let config = stub(dir.path(), "echo \"model 'glm-ocr' not found\" >&2\nexit 1\n");
            let sink = Lines::default();
            let err = ensure_model_ready(&config, &sink).await.unwrap_err();

            assert_eq!(err.exit_code(), 2);
            let lines = sink.0.lock().unwrap();
            assert_eq!(lines[0].1, "Model 'glm-ocr' is not ready in sh.");
            assert_eq!(lines[1].1, "model 'glm-ocr' not found");
        }

        #[tokio::test]
        async fn hanging_describe_query_times_out() {
            let dir = tempfile::tempdir().unwrap();
            let config = stub(dir.path(), "sleep 30\n");
            let sink = Lines::default();
            let err = ensure_model_ready(&config, &sink).await.unwrap_err();

            assert!(matches!(err, OcrError::ModelNotReady { .. }));
            assert!(sink.0.lock().unwrap()[0].1.starts_with("Timeout while checking"));
        }

        #[tokio::test]
        async fn processor_is_read_from_stub_listing() {
            let dir = tempfile::tempdir().unwrap();
            let body = format!("cat <<'EOF'\n{LISTING}EOF\n");
            let config = stub(dir.path(), &body);
            assert_eq!(detect_processor(&config).await, Some(Processor::Gpu));
        }
    }
}
