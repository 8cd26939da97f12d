//! Configuration types for a capture-and-transcribe run.
//!
//! Every tunable of the pipeline (backend command, timeouts, retry budget,
//! image constraints, file locations) lives in [`OcrConfig`], built once at
//! process start via [`OcrConfigBuilder`] and then passed by reference to
//! each stage. Nothing reads ambient global state, so tests can hand the
//! pipeline a config pointing at stub binaries and scratch directories.

use crate::error::OcrError;
use crate::paths;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for one capture-and-transcribe run.
///
/// Built via [`OcrConfig::builder()`] or using [`OcrConfig::default()`].
///
/// # Example
/// ```rust
/// use snap2text::OcrConfig;
/// use std::time::Duration;
///
/// let config = OcrConfig::builder()
///     .model("glm-ocr")
///     .inference_timeout(Duration::from_secs(120))
///     .build()
///     .unwrap();
/// assert_eq!(config.alignment_unit, 28);
/// ```
#[derive(Clone, Serialize)]
pub struct OcrConfig {
    /// Model tag served by the backend. Default: `glm-ocr`.
    pub model: String,

    /// Backend program followed by any leading arguments. Default: `["ollama"]`.
    ///
    /// The subcommands `ps`, `serve`, `show <model>` and `run <model>` are
    /// appended to this prefix.
    pub backend_command: Vec<String>,

    /// Hard wall-clock limit for the inference call. Default: 180 s.
    pub inference_timeout: Duration,

    /// Time between the graceful stop request and the forced kill. Default: 5 s.
    pub termination_grace: Duration,

    /// Per-attempt limit for the daemon status query. Default: 8 s.
    pub probe_timeout: Duration,

    /// Status polls after a daemon launch before giving up. Default: 10.
    pub probe_attempts: u32,

    /// Pause between status polls. Default: 500 ms.
    ///
    /// With the default budget a daemon that cannot start costs about five
    /// seconds beyond the initial probe.
    pub probe_interval: Duration,

    /// Limit for the "describe model" query. Default: 20 s.
    pub model_check_timeout: Duration,

    /// Both output image sides are multiples of this. Default: 28.
    ///
    /// Vision encoders split the image into square patches; sides that are
    /// not patch-aligned trip assertions in some GGML backends.
    pub alignment_unit: u32,

    /// Upper bound for either side of the sanitized image. Default: 1120.
    pub max_dimension: u32,

    /// JPEG quality of the sanitized image (1–100). Default: 100.
    pub jpeg_quality: u8,

    /// Re-encode and resize captures before inference. Default: true.
    pub normalize_images: bool,

    /// Where captures, sanitized copies and output text are written.
    /// Default: `~/Pictures/ocr`.
    pub capture_dir: PathBuf,

    /// Append-only diagnostic log. Default: `~/ocr_debug.log`.
    pub debug_log: PathBuf,

    /// Hand the result to the clipboard collaborator. Default: true.
    pub copy_to_clipboard: bool,

    /// Open the output file in the editor collaborator. Default: true.
    pub open_editor: bool,

    /// Editor program overriding the platform default.
    pub editor: Option<String>,

    /// Upper bound for each clipboard/editor hand-off. Default: 5 s.
    pub side_effect_timeout: Duration,

    /// Report whether the model runs on GPU or CPU after inference. Default: true.
    pub processor_diagnostics: bool,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            model: "glm-ocr".to_string(),
            backend_command: vec!["ollama".to_string()],
            inference_timeout: Duration::from_secs(180),
            termination_grace: Duration::from_secs(5),
            probe_timeout: Duration::from_secs(8),
            probe_attempts: 10,
            probe_interval: Duration::from_millis(500),
            model_check_timeout: Duration::from_secs(20),
            alignment_unit: 28,
            max_dimension: 1120,
            jpeg_quality: 100,
            normalize_images: true,
            capture_dir: paths::default_capture_dir(),
            debug_log: paths::default_debug_log(),
            copy_to_clipboard: true,
            open_editor: true,
            editor: None,
            side_effect_timeout: Duration::from_secs(5),
            processor_diagnostics: true,
        }
    }
}

impl fmt::Debug for OcrConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OcrConfig")
            .field("model", &self.model)
            .field("backend_command", &self.backend_command)
            .field("inference_timeout", &self.inference_timeout)
            .field("termination_grace", &self.termination_grace)
            .field("probe_attempts", &self.probe_attempts)
            .field("alignment_unit", &self.alignment_unit)
            .field("max_dimension", &self.max_dimension)
            .field("capture_dir", &self.capture_dir)
            .field("debug_log", &self.debug_log)
            .finish()
    }
}

impl OcrConfig {
    /// Create a new builder for `OcrConfig`.
    pub fn builder() -> OcrConfigBuilder {
        OcrConfigBuilder {
            config: Self::default(),
        }
    }

    /// The backend program (first element of [`OcrConfig::backend_command`]).
    pub fn backend_program(&self) -> &str {
        self.backend_command
            .first()
            .map(String::as_str)
            .unwrap_or("ollama")
    }

    /// Build a command for a backend subcommand, e.g. `["show", "glm-ocr"]`.
    pub fn backend(&self, subcommand: &[&str]) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(self.backend_program());
        cmd.args(self.backend_command.iter().skip(1));
        cmd.args(subcommand);
        cmd
    }

    /// Same as [`OcrConfig::backend`] for a process the caller will not await.
    pub fn backend_std(&self, subcommand: &[&str]) -> std::process::Command {
        let mut cmd = std::process::Command::new(self.backend_program());
        cmd.args(self.backend_command.iter().skip(1));
        cmd.args(subcommand);
        cmd
    }
}

/// Builder for [`OcrConfig`].
#[derive(Debug)]
pub struct OcrConfigBuilder {
    config: OcrConfig,
}

impl OcrConfigBuilder {
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    /// Program plus leading arguments, e.g. `["ollama"]` or `["sh", "stub.sh"]`.
    pub fn backend_command<I, S>(mut self, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.backend_command = command.into_iter().map(Into::into).collect();
        self
    }

    pub fn inference_timeout(mut self, t: Duration) -> Self {
        self.config.inference_timeout = t;
        self
    }

    pub fn termination_grace(mut self, t: Duration) -> Self {
        self.config.termination_grace = t;
        self
    }

    pub fn probe_timeout(mut self, t: Duration) -> Self {
        self.config.probe_timeout = t;
        self
    }

    pub fn probe_attempts(mut self, n: u32) -> Self {
        self.config.probe_attempts = n.max(1);
        self
    }

    pub fn probe_interval(mut self, t: Duration) -> Self {
        self.config.probe_interval = t;
        self
    }

    pub fn model_check_timeout(mut self, t: Duration) -> Self {
        self.config.model_check_timeout = t;
        self
    }

    pub fn alignment_unit(mut self, px: u32) -> Self {
        self.config.alignment_unit = px;
        self
    }

    pub fn max_dimension(mut self, px: u32) -> Self {
        self.config.max_dimension = px;
        self
    }

    pub fn jpeg_quality(mut self, q: u8) -> Self {
        self.config.jpeg_quality = q.clamp(1, 100);
        self
    }

    pub fn normalize_images(mut self, v: bool) -> Self {
        self.config.normalize_images = v;
        self
    }

    pub fn capture_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.capture_dir = dir.into();
        self
    }

    pub fn debug_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.debug_log = path.into();
        self
    }

    pub fn copy_to_clipboard(mut self, v: bool) -> Self {
        self.config.copy_to_clipboard = v;
        self
    }

    pub fn open_editor(mut self, v: bool) -> Self {
        self.config.open_editor = v;
        self
    }

    pub fn editor(mut self, program: impl Into<String>) -> Self {
        self.config.editor = Some(program.into());
        self
    }

    pub fn side_effect_timeout(mut self, t: Duration) -> Self {
        self.config.side_effect_timeout = t;
        self
    }

    pub fn processor_diagnostics(mut self, v: bool) -> Self {
        self.config.processor_diagnostics = v;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<OcrConfig, OcrError> {
        let c = &self.config;
        if c.model.trim().is_empty() {
            return Err(OcrError::InvalidConfig("Model name must not be empty".into()));
        }
        if c.backend_command.first().is_none_or(|p| p.trim().is_empty()) {
            return Err(OcrError::InvalidConfig(
                "Backend command must name a program".into(),
            ));
        }
        if c.alignment_unit == 0 {
            return Err(OcrError::InvalidConfig(
                "Alignment unit must be ≥ 1".into(),
            ));
        }
        if c.max_dimension < c.alignment_unit {
            return Err(OcrError::InvalidConfig(format!(
                "Max dimension ({}) must be ≥ alignment unit ({})",
                c.max_dimension, c.alignment_unit
            )));
        }
        if c.probe_attempts == 0 {
            return Err(OcrError::InvalidConfig(
                "Probe attempts must be ≥ 1".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Mode ─────────────────────────────────────────────────────────────────────

/// What the model is asked to transcribe. Fixed for the whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum Mode {
    /// Plain text (default).
    #[default]
    TextRecognition,
    /// Tables; HTML table output gets scroll wrappers and a style block.
    TableRecognition,
    /// Figures and charts.
    FigureRecognition,
}

impl Mode {
    /// Select the mode from the single invocation argument.
    ///
    /// Matching is by case-insensitive substring: anything containing
    /// `table` selects tables, then `figure` selects figures; anything else,
    /// including no argument, selects text.
    pub fn from_arg(arg: Option<&str>) -> Self {
        let Some(arg) = arg else {
            return Mode::TextRecognition;
        };
        let arg = arg.to_lowercase();
        if arg.contains("table") {
            Mode::TableRecognition
        } else if arg.contains("figure") {
            Mode::FigureRecognition
        } else {
            Mode::TextRecognition
        }
    }

    /// Human-readable label, also used as the prompt prefix.
    pub fn label(self) -> &'static str {
        match self {
            Mode::TextRecognition => "Text Recognition",
            Mode::TableRecognition => "Table Recognition",
            Mode::FigureRecognition => "Figure Recognition",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_from_arg_matches_substrings() {
        assert_eq!(Mode::from_arg(None), Mode::TextRecognition);
        assert_eq!(Mode::from_arg(Some("")), Mode::TextRecognition);
        assert_eq!(Mode::from_arg(Some("--table")), Mode::TableRecognition);
        assert_eq!(Mode::from_arg(Some("TableMode")), Mode::TableRecognition);
        assert_eq!(Mode::from_arg(Some("figure")), Mode::FigureRecognition);
        assert_eq!(Mode::from_arg(Some("whatever")), Mode::TextRecognition);
        // "table" wins when both appear.
        assert_eq!(
            Mode::from_arg(Some("figure-table")),
            Mode::TableRecognition
        );
    }

    #[test]
    fn defaults_match_backend_constraints() {
        let c = OcrConfig::default();
        assert_eq!(c.model, "glm-ocr");
        assert_eq!(c.inference_timeout, Duration::from_secs(180));
        assert_eq!(c.termination_grace, Duration::from_secs(5));
        assert_eq!(c.probe_attempts, 10);
        assert_eq!(c.alignment_unit, 28);
        assert_eq!(c.max_dimension, 1120);
        assert!(c.capture_dir.ends_with("Pictures/ocr"));
    }

    #[test]
    fn builder_rejects_misaligned_limits() {
        let err = OcrConfig::builder()
            .alignment_unit(28)
            .max_dimension(10)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("Max dimension"));
    }

    #[test]
    fn builder_rejects_empty_backend() {
        let empty: [&str; 0] = [];
        assert!(OcrConfig::builder().backend_command(empty).build().is_err());
        assert!(OcrConfig::builder().model("  ").build().is_err());
    }

    #[test]
    fn backend_command_prefix_is_kept() {
        let c = OcrConfig::builder()
            .backend_command(["sh", "/tmp/stub.sh"])
            .build()
            .unwrap();
        assert_eq!(c.backend_program(), "sh");
        let cmd = c.backend_std(&["show", "glm-ocr"]);
        let args: Vec<_> = cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(args, vec!["/tmp/stub.sh", "show", "glm-ocr"]);
    }

    #[test]
    fn config_serialises_for_the_debug_log() {
        let json = serde_json::to_string(&OcrConfig::default()).unwrap();
        assert!(json.contains("\"model\":\"glm-ocr\""));
    }
}
