//! # snap2text
//!
//! Capture a screen region and transcribe it with a locally served
//! vision-language model (GLM-OCR on Ollama by default).
//!
//! ## Pipeline Overview
//!
//! ```text
//! region
//!  │
//!  ├─ 1. Capture    platform tool writes Screenshot_<timestamp>.png
//!  ├─ 2. Normalize  RGB, ≤ 1120 px, sides multiple of 28, JPEG (spawn_blocking)
//!  ├─ 3. Daemon     `ps` probe; one detached `serve`; bounded polling
//!  ├─ 4. Model      `show <model>` fails fast before the long call
//!  ├─ 5. Inference  `run <model>` with a hard timeout, SIGTERM then SIGKILL
//!  ├─ 6. Polish     strip backend markers; scrollable tables in table mode
//!  └─ 7. Hand-off   .txt beside the capture, clipboard, editor
//! ```
//!
//! Every stage can end the run with its own exit code (see [`error`]).
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use snap2text::{desktop, recognize, Mode, OcrConfig, StdStatus};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = OcrConfig::default();
//!     let desktop = desktop::native(&config);
//!     match recognize(Mode::TableRecognition, &config, desktop.as_ref(), &StdStatus).await {
//!         Ok(report) => println!("{}", report.text),
//!         Err(e) => std::process::exit(e.exit_code()),
//!     }
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `snap2text` binary (clap + anyhow + tracing-subscriber) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod debug_log;
pub mod desktop;
pub mod error;
pub mod output;
pub mod paths;
pub mod pipeline;
pub mod prompts;
pub mod recognize;
pub mod status;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{Mode, OcrConfig, OcrConfigBuilder};
pub use debug_log::DebugLog;
pub use desktop::{CaptureError, Desktop};
pub use error::{OcrError, SideEffectError};
pub use output::{CaptureArtifact, InferenceResult, Processor, RunReport};
pub use recognize::{recognize, run, Stage};
pub use status::{NoopStatus, SharedStatus, StatusLevel, StatusSink, StdStatus};
