//! Pipeline stages for capture-to-text transcription.
//!
//! Each submodule implements exactly one step, so each can be tested on
//! its own against stub backends and scratch directories.
//!
//! ## Data Flow
//!
//! ```text
//! capture ──▶ normalize ──▶ daemon ──▶ model ──▶ invoke ──▶ postprocess
//!  (.png)     (.temp.jpg)   (ps/serve)  (show)    (run)      (cleanup)
//! ```
//!
//! 1. [`normalize`]: decode, RGB, patch-align and JPEG-encode the capture;
//!    CPU-bound, so it runs in `spawn_blocking`
//! 2. [`daemon`]: probe the model server, launch it once, poll with a
//!    bounded budget
//! 3. [`model`]: fail fast if the model is not available; processor
//!    diagnostics after inference
//! 4. [`invoke`]: the single inference call, bounded by a hard timeout
//!    with graceful-then-forced termination
//! 5. [`postprocess`]: strip backend markers; scrollable, styled tables

pub mod daemon;
pub mod invoke;
pub mod model;
pub mod normalize;
pub mod postprocess;
