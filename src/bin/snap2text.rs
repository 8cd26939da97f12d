//! CLI binary for snap2text.
//!
//! A thin shim over the library crate: maps CLI flags to `OcrConfig`,
//! routes `tracing` into the debug log and turns the run outcome into the
//! process exit code. Stdout and stderr carry only the `[INFO]`/`[ERROR]`
//! status lines a supervising front-end parses.

use anyhow::{Context, Result};
use clap::Parser;
use snap2text::error::EXIT_INTERNAL;
use snap2text::{desktop, run, DebugLog, Mode, OcrConfig, SharedStatus, StatusSink, StdStatus};
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const AFTER_HELP: &str = r#"EXAMPLES:
  # Capture a region and transcribe it as text
  snap2text

  # Table mode: HTML tables get scroll wrappers and a style block
  snap2text table

  # Figures, with a longer inference budget
  snap2text figure --timeout 300

EXIT CODES:
  0    success
  1    no screenshot captured
  2    backend or model unavailable
  3    model returned no text
  124  inference timed out
  99   unexpected internal error
  any other nonzero value is the backend's own exit status

ENVIRONMENT VARIABLES:
  SNAP2TEXT_MODEL         Model tag (default: glm-ocr)
  SNAP2TEXT_BACKEND       Backend command (default: ollama)
  SNAP2TEXT_TIMEOUT       Inference timeout in seconds
  SNAP2TEXT_CAPTURE_DIR   Where screenshots and .txt files go
  SNAP2TEXT_DEBUG_LOG     Append-only diagnostic log
  SNAP2TEXT_EDITOR        Editor command overriding the platform default
  RUST_LOG                tracing filter for the debug log (default: warn)
"#;

/// Capture a screen region and transcribe it with a local vision model.
#[derive(Parser, Debug)]
#[command(
    name = "snap2text",
    version,
    about = "Capture a screen region and transcribe it with a local vision model",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Recognition mode: anything containing "table" or "figure"; text otherwise.
    #[arg(allow_hyphen_values = true)]
    mode: Option<String>,

    /// Further positional arguments are accepted and ignored.
    #[arg(hide = true)]
    extra: Vec<String>,

    /// Model tag served by the backend.
    #[arg(long, env = "SNAP2TEXT_MODEL", default_value = "glm-ocr")]
    model: String,

    /// Backend command, program first (e.g. "ollama").
    #[arg(long, env = "SNAP2TEXT_BACKEND", default_value = "ollama")]
    backend: String,

    /// Hard inference timeout in seconds.
    #[arg(long, env = "SNAP2TEXT_TIMEOUT", default_value_t = 180)]
    timeout: u64,

    /// Seconds between the stop request and the forced kill.
    #[arg(long, env = "SNAP2TEXT_GRACE", default_value_t = 5)]
    grace: u64,

    /// Directory for screenshots and output text.
    #[arg(long, env = "SNAP2TEXT_CAPTURE_DIR")]
    capture_dir: Option<PathBuf>,

    /// Append-only diagnostic log.
    #[arg(long, env = "SNAP2TEXT_DEBUG_LOG")]
    debug_log: Option<PathBuf>,

    /// Editor command overriding the platform default.
    #[arg(long, env = "SNAP2TEXT_EDITOR")]
    editor: Option<String>,

    /// Do not copy the result to the clipboard.
    #[arg(long, env = "SNAP2TEXT_NO_CLIPBOARD")]
    no_clipboard: bool,

    /// Do not open the result in an editor.
    #[arg(long, env = "SNAP2TEXT_NO_EDITOR")]
    no_editor: bool,

    /// Send the capture to the model without resizing or re-encoding.
    #[arg(long)]
    no_normalize: bool,

    /// Skip the GPU/CPU processor report after inference.
    #[arg(long)]
    no_diagnostics: bool,

    /// Enable DEBUG-level tracing in the debug log.
    #[arg(short, long, env = "SNAP2TEXT_VERBOSE")]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => return usage_exit(e),
    };
    match try_main(cli) {
        Ok(code) => code,
        Err(e) => {
            StdStatus.error(&format!("Unexpected error: {e:#}"));
            ExitCode::from(EXIT_INTERNAL as u8)
        }
    }
}

/// `--help` and `--version` exit 0; a malformed command line is reported
/// as an `[ERROR]` line and must not reuse the "backend unavailable" code.
fn usage_exit(err: clap::Error) -> ExitCode {
    if err.use_stderr() {
        let message = err.to_string();
        let first = message.lines().next().unwrap_or_default();
        StdStatus.error(&format!(
            "Invalid arguments: {}",
            first.trim_start_matches("error: ")
        ));
    } else {
        let _ = err.print();
    }
    ExitCode::from(usage_exit_code(&err))
}

fn usage_exit_code(err: &clap::Error) -> u8 {
    if err.use_stderr() {
        EXIT_INTERNAL as u8
    } else {
        0
    }
}

fn try_main(cli: Cli) -> Result<ExitCode> {
    let config = build_config(&cli)?;
    init_tracing(&config, cli.verbose);
    if !cli.extra.is_empty() {
        tracing::debug!(extra = ?cli.extra, "Ignoring extra arguments");
    }

    let mode = Mode::from_arg(cli.mode.as_deref());
    let desktop = desktop::native(&config);
    let status: SharedStatus = Arc::new(StdStatus);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to create tokio runtime")?;
    let code = runtime.block_on(run(mode, config, desktop, status));
    // A blocking hand-off that outlived its bound must not delay the exit.
    runtime.shutdown_timeout(Duration::from_millis(500));

    Ok(ExitCode::from(code.clamp(0, 255) as u8))
}

fn build_config(cli: &Cli) -> Result<OcrConfig> {
    let mut builder = OcrConfig::builder()
        .model(cli.model.as_str())
        .backend_command(cli.backend.split_whitespace())
        .inference_timeout(Duration::from_secs(cli.timeout))
        .termination_grace(Duration::from_secs(cli.grace))
        .normalize_images(!cli.no_normalize)
        .copy_to_clipboard(!cli.no_clipboard)
        .open_editor(!cli.no_editor)
        .processor_diagnostics(!cli.no_diagnostics);

    if let Some(ref dir) = cli.capture_dir {
        builder = builder.capture_dir(dir);
    }
    if let Some(ref log) = cli.debug_log {
        builder = builder.debug_log(log);
    }
    if let Some(ref editor) = cli.editor {
        builder = builder.editor(editor.as_str());
    }

    builder.build().context("Invalid configuration")
}

/// Route `tracing` into the debug log, never to the status streams.
///
/// Each event opens the log for append and closes it again, like every
/// other writer of that file.
fn init_tracing(config: &OcrConfig, verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let log = DebugLog::new(&config.debug_log);

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_ansi(false)
        .with_writer(move || -> Box<dyn Write> {
            match log.open_append() {
                Ok(file) => Box::new(file),
                Err(_) => Box::new(io::sink()),
            }
        })
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn mode_argument_is_free_form() {
        let cli = Cli::try_parse_from(["snap2text", "TableMode"]).unwrap();
        assert_eq!(Mode::from_arg(cli.mode.as_deref()), Mode::TableRecognition);
        let cli = Cli::try_parse_from(["snap2text"]).unwrap();
        assert_eq!(Mode::from_arg(cli.mode.as_deref()), Mode::TextRecognition);
    }

    #[test]
    fn flags_map_onto_the_config() {
        let cli = Cli::try_parse_from([
            "snap2text",
            "figure",
            "--backend",
            "sh /tmp/stub.sh",
            "--timeout",
            "30",
            "--no-editor",
        ])
        .unwrap();
        let config = build_config(&cli).unwrap();
        assert_eq!(config.backend_command, vec!["sh", "/tmp/stub.sh"]);
        assert_eq!(config.inference_timeout, Duration::from_secs(30));
        assert!(!config.open_editor);
        assert!(config.copy_to_clipboard);
    }

    #[test]
    fn trailing_arguments_are_ignored() {
        let cli = Cli::try_parse_from(["snap2text", "table", "extra"]).unwrap();
        assert_eq!(Mode::from_arg(cli.mode.as_deref()), Mode::TableRecognition);
        assert_eq!(cli.extra, vec!["extra"]);
    }

    #[test]
    fn usage_errors_never_exit_with_the_backend_code() {
        let err = Cli::try_parse_from(["snap2text", "--timeout", "soon"]).unwrap_err();
        assert_eq!(usage_exit_code(&err), 99);

        let err = Cli::try_parse_from(["snap2text", "--help"]).unwrap_err();
        assert_eq!(usage_exit_code(&err), 0);
        let err = Cli::try_parse_from(["snap2text", "--version"]).unwrap_err();
        assert_eq!(usage_exit_code(&err), 0);
    }

    #[test]
    fn blank_backend_is_rejected() {
        let cli = Cli::try_parse_from(["snap2text", "--backend", " "]).unwrap();
        assert!(build_config(&cli).is_err());
    }
}
