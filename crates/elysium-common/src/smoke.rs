use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::cache_dirs::{volume_root, CachePaths};
use crate::job::HandlerResponse;

pub const RESULTS_DIR: &str = "smoke-results";
pub const TRACEBACK_LIMIT: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SmokeStatus {
    Unknown,
    Success,
    Error,
}

/// Result of one pod smoke run. Written once, never updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmokeRecord {
    pub status: SmokeStatus,
    pub model_name: String,
    pub started_at_unix: f64,
    pub caches: CachePaths,
    pub result_path: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handler_output: Option<HandlerResponse>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traceback: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at_unix: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_s: Option<f64>,
}

impl SmokeRecord {
    pub fn start(model_name: &str, caches: CachePaths, result_path: &str, now_unix: f64) -> Self {
        Self {
            status: SmokeStatus::Unknown,
            model_name: model_name.to_string(),
            started_at_unix: now_unix,
            caches,
            result_path: result_path.to_string(),
            handler_output: None,
            error: None,
            traceback: None,
            finished_at_unix: None,
            duration_s: None,
        }
    }

    /// Records the handler's answer; success exactly when the handler reported success.
    pub fn record_output(&mut self, output: HandlerResponse) {
        self.status = if output.is_success() {
            SmokeStatus::Success
        } else {
            SmokeStatus::Error
        };
        self.handler_output = Some(output);
    }

    pub fn record_error(&mut self, err: &anyhow::Error) {
        self.status = SmokeStatus::Error;
        self.error = Some(err.to_string());
        self.traceback = Some(bounded_traceback(err, TRACEBACK_LIMIT));
    }

    pub fn finish(&mut self, now_unix: f64) {
        self.finished_at_unix = Some(now_unix);
        let duration = (now_unix - self.started_at_unix).max(0.0);
        self.duration_s = Some((duration * 1000.0).round() / 1000.0);
    }

    pub fn is_success(&self) -> bool {
        self.status == SmokeStatus::Success
    }
}

/// Where the record goes: `SMOKE_RESULT_PATH`, else a file under
/// `<volume>/smoke-results`, else an empty string meaning "do not persist".
pub fn result_path(
    model_name: &str,
    lookup: impl Fn(&str) -> Option<String>,
    now_unix_secs: i64,
) -> std::io::Result<String> {
    let explicit = lookup("SMOKE_RESULT_PATH").unwrap_or_default();
    if !explicit.trim().is_empty() {
        return Ok(explicit.trim().to_string());
    }

    let root = volume_root(&lookup);
    if !root.is_dir() {
        return Ok(String::new());
    }

    let base = root.join(RESULTS_DIR);
    std::fs::create_dir_all(&base)?;

    let safe_model = model_name.replace('/', "__");
    let key = lookup("SMOKE_KEY").unwrap_or_default();
    let key = key.trim();
    let ts = lookup("SMOKE_TS")
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| now_unix_secs.to_string());

    let fname = if key.is_empty() {
        format!("{safe_model}_{ts}.json")
    } else {
        format!("{key}_{safe_model}_{ts}.json")
    };
    Ok(base.join(fname).to_string_lossy().to_string())
}

/// Writes `record` to `<path>.tmp` and renames it over `path`, so readers
/// never see a partial file. An empty path is a no-op.
pub fn write_atomic(path: &str, record: &SmokeRecord) -> anyhow::Result<()> {
    if path.is_empty() {
        return Ok(());
    }

    let target = Path::new(path);
    if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let tmp = PathBuf::from(format!("{path}.tmp"));
    {
        let mut f = std::fs::File::create(&tmp)?;
        serde_json::to_writer_pretty(&mut f, record)?;
        f.write_all(b"\n")?;
        f.sync_all()?;
    }
    std::fs::rename(&tmp, target)?;
    Ok(())
}

/// The error and its causes, outermost first, at most `limit` lines.
pub fn bounded_traceback(err: &anyhow::Error, limit: usize) -> String {
    err.chain()
        .take(limit)
        .enumerate()
        .map(|(i, cause)| {
            if i == 0 {
                cause.to_string()
            } else {
                format!("caused by: {cause}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn unix_now() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}
