//! Run report: the JSON artifact written at the end of every run.

use std::fs;
use std::io::Write;
use std::path::Path;

use serde::Serialize;

use crate::aggregator::Summary;
use crate::error::FanoutError;
use crate::task::Outcome;

/// Full output of one run: the command and one outcome per finalized host.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub command: String,
    /// RFC 3339 timestamp taken when the run started.
    pub started_at: String,
    /// RFC 3339 timestamp taken when the report was produced.
    pub completed_at: String,
    /// True when the run was interrupted and drained; `results` is then partial.
    pub interrupted: bool,
    /// In finalization order.
    pub results: Vec<Outcome>,
}

impl Report {
    pub fn summary(&self) -> Summary {
        Summary::of(&self.results)
    }
}

/// Write the report as pretty JSON. Creates parent dirs if needed; writes
/// atomically (temp file then rename), falling back to a direct write when
/// the rename fails (e.g. cross-device).
pub fn write_report(report: &Report, path: &Path) -> Result<(), FanoutError> {
    let fail = |detail: String| FanoutError::ReportWriteFailed {
        path: path.to_path_buf(),
        detail,
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .map_err(|e| fail(format!("failed to create parent directory: {e}")))?;
        }
    }

    let json = serde_json::to_string_pretty(report)
        .map_err(|e| fail(format!("serialization failed: {e}")))?;

    let tmp_path = path.with_extension("json.tmp");
    let write_tmp = (|| -> std::io::Result<()> {
        let mut f = fs::File::create(&tmp_path)?;
        f.write_all(json.as_bytes())?;
        f.sync_all()?;
        Ok(())
    })();
    if let Err(e) = write_tmp {
        let _ = fs::remove_file(&tmp_path);
        return Err(fail(e.to_string()));
    }

    if fs::rename(&tmp_path, path).is_err() {
        let direct = fs::write(path, &json);
        let _ = fs::remove_file(&tmp_path);
        direct.map_err(|e| fail(e.to_string()))?;
    }

    tracing::debug!(path = %path.display(), bytes = json.len(), "report written");
    Ok(())
}
