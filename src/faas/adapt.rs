//! Function source adaptation.
//!
//! User function sources are written against a generic `(req, res)`
//! signature; each provider wants a slightly different entry-point shape.
//! Adaptation stages the source directory into a temp dir and rewrites the
//! entry file so the original source tree is never modified.

use std::path::Path;

use regex::Regex;
use tempfile::TempDir;
use tracing::debug;

use crate::AgentError;

const JS_FILE_NAME: &str = "index.js";

/// Copy the function source at `path` into a fresh temp directory and
/// rewrite its entry point for the tinyFaaS handler shape.
///
/// - `nodejs`: the exported `(req, res)` handler body is re-wrapped as
///   `module.exports = (req, res) => { ... }`.
/// - `python` (and anything else): sources pass through unchanged; the
///   tinyFaaS python shim already matches.
///
/// The returned [`TempDir`] owns the staged copy; it is removed when
/// dropped, so callers keep it alive until the upload finishes.
pub fn stage_for_tinyfaas(path: &Path, runtime: &str) -> Result<TempDir, AgentError> {
    let staged = tempfile::Builder::new()
        .prefix("adapted_function_")
        .tempdir()?;
    debug!(from = %path.display(), to = %staged.path().display(), "staging function source");
    copy_dir(path, staged.path())?;

    if runtime == "nodejs" {
        let entry_path = staged.path().join(JS_FILE_NAME);
        let code = std::fs::read_to_string(&entry_path)?;
        let rewritten = rewrite_nodejs_entry(&code)?;
        std::fs::write(&entry_path, rewritten)?;
    }

    Ok(staged)
}

/// Re-wrap the exported handler body as a tinyFaaS `module.exports`.
fn rewrite_nodejs_entry(code: &str) -> Result<String, AgentError> {
    // The (?s) flag lets `.` span lines; the handler body is the capture.
    let pattern = Regex::new(r"(?s)exports\.\w+\s*=\s*\(req,\s*res\)\s*=>\s*\{(.*)\}")
        .map_err(|e| AgentError::Adapt(format!("entry-point pattern: {e}")))?;
    let captures = pattern.captures(code).ok_or_else(|| {
        AgentError::Adapt(
            "invalid function format: 'req' and 'res' parameters are required for js".into(),
        )
    })?;
    let inner = captures.get(1).map(|m| m.as_str()).unwrap_or_default();

    Ok(format!(
        "module.exports = (req, res) => {{\n{}\n}}",
        indent(inner, 1)
    ))
}

fn indent(code: &str, level: usize) -> String {
    let indentation = "  ".repeat(level);
    code.lines()
        .map(|line| format!("{indentation}{line}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Recursively copy a directory tree.
fn copy_dir(src: &Path, dst: &Path) -> Result<(), AgentError> {
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            std::fs::create_dir_all(&target)?;
            copy_dir(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
