//! Post-processing: deterministic cleanup of raw model output.
//!
//! Two rules, applied in order:
//!
//! 1. Remove the `Added image '…'` markers the backend CLI prints when it
//!    attaches the image path from the prompt, then trim.
//! 2. Table mode only: wrap each `<table>` in a horizontally scrollable
//!    `<div>` and prepend [`TABLE_STYLE_BLOCK`] unless the text already
//!    carries a `<style`.
//!
//! [`clean`] is pure and idempotent: cleaning its own output changes
//! nothing, so tables are never double-wrapped and the style block never
//! appears twice.

use crate::config::Mode;
use once_cell::sync::Lazy;
use regex::Regex;

/// Opening wrapper inserted before every table.
pub const SCROLL_WRAPPER_OPEN: &str = r#"<div style="overflow-x:auto;">"#;
const SCROLL_WRAPPER_CLOSE: &str = "</div>";

/// Styles sized for narrow, wrapped columns.
pub const TABLE_STYLE_BLOCK: &str = "<style>
table {
  width: auto;
  max-width: 100%;
  display: inline-table;
  border-collapse: collapse;
  font-family: sans-serif;
  font-size: 14px;
}

th, td {
  padding: 8px 10px;
  border: 1px solid #ddd;
  text-align: left;
  vertical-align: top;
  max-width: 48ch;
  white-space: normal;
  overflow-wrap: anywhere;
}

th {
  background: #f5f5f5;
  font-weight: 600;
}
</style>
";

/// Clean raw model output for `mode`.
pub fn clean(mode: Mode, raw: &str) -> String {
    let text = strip_markers(raw);
    if mode == Mode::TableRecognition {
        style_tables(&text)
    } else {
        text
    }
}

// ── Rule 1: Strip backend markers ────────────────────────────────────────────

static RE_ADDED_IMAGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Added image '.*?'").expect("valid marker regex"));

fn strip_markers(input: &str) -> String {
    RE_ADDED_IMAGE.replace_all(input, "").trim().to_string()
}

// ── Rule 2: Scrollable tables ────────────────────────────────────────────────

static RE_TABLE_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)<table(?:\s[^>]*)?>|</table\s*>").expect("valid table regex")
});

fn style_tables(input: &str) -> String {
    let lower = input.to_lowercase();
    if !lower.contains("<table") {
        return input.to_string();
    }

    let wrapped = wrap_tables(input);
    if lower.contains("<style") {
        wrapped
    } else {
        format!("{TABLE_STYLE_BLOCK}\n{wrapped}")
    }
}

/// Wrap every table not already inside a scroll wrapper.
///
/// Tags are matched as a stack so nested tables close the right wrapper.
/// A `</table>` closes our `<div>` only if the matching `<table>` was
/// wrapped in this pass.
fn wrap_tables(input: &str) -> String {
    let mut out = String::with_capacity(input.len() + 64);
    let mut opened_here: Vec<bool> = Vec::new();
    let mut last = 0;

    for m in RE_TABLE_TAG.find_iter(input) {
        out.push_str(&input[last..m.start()]);
        let tag = m.as_str();
        if tag.starts_with("</") {
            out.push_str(tag);
            if opened_here.pop().unwrap_or(false) {
                out.push_str(SCROLL_WRAPPER_CLOSE);
            }
        } else {
            let already = ends_with_wrapper(&out);
            if !already {
                out.push_str(SCROLL_WRAPPER_OPEN);
            }
            out.push_str(tag);
            opened_here.push(!already);
        }
        last = m.end();
    }
    out.push_str(&input[last..]);
    out
}

fn ends_with_wrapper(text: &str) -> bool {
    let (bytes, open) = (text.as_bytes(), SCROLL_WRAPPER_OPEN.as_bytes());
    bytes.len() >= open.len() && bytes[bytes.len() - open.len()..].eq_ignore_ascii_case(open)
}
