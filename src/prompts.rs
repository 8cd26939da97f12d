//! Prompts sent to the OCR model.
//!
//! GLM-OCR style models take a task label followed by the image reference
//! on a single line, e.g. `Table Recognition: /home/me/Pictures/ocr/x.jpg`.
//! The backend attaches the referenced file as an image and echoes an
//! `Added image '…'` marker that post-processing strips again.

use crate::config::Mode;
use std::path::Path;

/// Build the prompt for `mode` and the image at `image`.
pub fn build_prompt(mode: Mode, image: &Path) -> String {
    format!("{}: {}", mode.label(), image.display())
}
