//! Debug recorder that dumps request/response pairs to disk.

use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// Writes one JSON file per successful API call.
#[derive(Debug, Clone)]
pub struct RequestRecorder {
    dir: PathBuf,
}

impl RequestRecorder {
    /// Record into `dir`. The directory is created on first write.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Target directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File name for a call made at `epoch_ms`. The query string is dropped.
    #[must_use]
    pub fn file_name(epoch_ms: u128, method: &str, path: &str) -> String {
        let path = path.split('?').next().unwrap_or_default();
        let path: String = path
            .trim_start_matches('/')
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
            .collect();
        format!("dump-{}-api-{}-{}.json", epoch_ms, method, path)
    }

    /// Write a dump. Failures are logged and otherwise ignored.
    pub async fn record(
        &self,
        method: &str,
        url: &str,
        path: &str,
        request: Option<&str>,
        response: &Value,
    ) {
        let epoch_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let target = self.dir.join(Self::file_name(epoch_ms, method, path));
        let request: Value = request
            .and_then(|r| serde_json::from_str(r).ok())
            .unwrap_or(Value::Null);
        let dump = json!({
            "url": url,
            "request": request,
            "response": response,
        });

        let contents = match serde_json::to_vec_pretty(&dump) {
            Ok(contents) => contents,
            Err(e) => {
                warn!(error = %e, "Failed to encode request dump");
                return;
            }
        };
        if let Err(e) = tokio::fs::create_dir_all(&self.dir).await {
            warn!(dir = %self.dir.display(), error = %e, "Failed to create dump directory");
            return;
        }
        match tokio::fs::write(&target, contents).await {
            Ok(()) => debug!(file = %target.display(), "Request recorded"),
            Err(e) => warn!(file = %target.display(), error = %e, "Failed to write request dump"),
        }
    }
}
